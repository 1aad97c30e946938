//! Command-line parsing into a [`FuseArgs`].
//!
//! The FUSE command line is a small DSL: an optional mountpoint, the
//! conventional `-f`/`-d`/`-s` flags and any number of `-o opt[,opt...]`
//! groups. Parsing never exits the process; every failure comes back as a
//! [`ParseError`] for the caller to report or propagate.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::debug;

use crate::error::{ConfigError, ParseError};
use crate::options::{FuseArgs, Modifier, program_name};

const ARG_HELP: &str = "help";
const ARG_VERSION: &str = "version";
const ARG_OPTIONS: &str = "options";
const ARG_MOUNTPOINT: &str = "mountpoint";
const ARG_FOREGROUND: &str = "foreground";
const ARG_DEBUG: &str = "debug";
const ARG_SINGLE: &str = "single";

/// The service's "run multithreaded" setting, shared between the parser and
/// the service that owns it.
#[derive(Debug, Clone)]
pub struct ThreadingSwitch(Arc<AtomicBool>);

impl ThreadingSwitch {
    /// A new switch, initially multithreaded.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn multithreaded(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_multithreaded(&self, on: bool) {
        self.0.store(on, Ordering::Release);
    }

    pub fn set_single(&self) {
        self.set_multithreaded(false);
    }
}

impl Default for ThreadingSwitch {
    fn default() -> Self {
        Self::new()
    }
}

/// What the parser does with `-s`.
///
/// Threading is a property of the service, not of the FUSE command line, so
/// honoring `-s` means reaching past the option set. Services must opt in.
#[derive(Debug, Clone, Default)]
pub enum SingleThreadPolicy {
    /// Fail with [`ParseError::SingleThreadNotEnabled`] when `-s` is given.
    #[default]
    Reject,
    /// Do not register `-s` at all. The caller may add its own argument for
    /// it through [`ParserConfig::arg`].
    Ignore,
    /// Switch the given service setting to single-threaded.
    SetSingle(ThreadingSwitch),
}

/// Parser setup.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Program name shown in usage and help.
    pub program: String,
    /// Version string; enables `-V/--version` when set.
    pub version: Option<String>,
    pub about: Option<String>,
    /// Register the conventional `-f` and `-d` flags.
    pub standard_mods: bool,
    /// Take the positional argument as the mountpoint.
    pub fetch_mountpoint: bool,
    pub single_thread: SingleThreadPolicy,
    /// Additional application arguments, returned in
    /// [`ParsedCommandLine::matches`].
    pub extra_args: Vec<Arg>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            program: program_name().to_string_lossy().into_owned(),
            version: None,
            about: None,
            standard_mods: true,
            fetch_mountpoint: true,
            single_thread: SingleThreadPolicy::Reject,
            extra_args: Vec::new(),
        }
    }
}

impl ParserConfig {
    #[must_use]
    pub fn program(mut self, name: impl Into<String>) -> Self {
        self.program = name.into();
        self
    }

    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn about(mut self, about: impl Into<String>) -> Self {
        self.about = Some(about.into());
        self
    }

    #[must_use]
    pub fn standard_mods(mut self, on: bool) -> Self {
        self.standard_mods = on;
        self
    }

    #[must_use]
    pub fn fetch_mountpoint(mut self, on: bool) -> Self {
        self.fetch_mountpoint = on;
        self
    }

    #[must_use]
    pub fn single_thread(mut self, policy: SingleThreadPolicy) -> Self {
        self.single_thread = policy;
        self
    }

    #[must_use]
    pub fn arg(mut self, arg: Arg) -> Self {
        self.extra_args.push(arg);
        self
    }
}

/// A custom `-o` sub-option, routed into [`ParsedCommandLine`] instead of
/// the generic option set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOpt {
    name: String,
    dest: String,
    takes_value: bool,
    default: Option<String>,
    help: Option<String>,
}

impl MountOpt {
    /// A sub-option given as `-o name=VALUE`.
    pub fn value(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            dest: name.clone(),
            name,
            takes_value: true,
            default: None,
            help: None,
        }
    }

    /// A sub-option given as a bare `-o name`.
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            takes_value: false,
            ..Self::value(name)
        }
    }

    /// Field name the value is stored under. Defaults to the option name.
    #[must_use]
    pub fn dest(mut self, dest: impl Into<String>) -> Self {
        self.dest = dest.into();
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn usage(&self) -> String {
        if self.takes_value {
            format!("-o {}=VALUE", self.name)
        } else {
            format!("-o {}", self.name)
        }
    }
}

/// Everything a parse produced besides the option set.
#[derive(Debug, Clone)]
pub struct ParsedCommandLine {
    sub_options: BTreeMap<String, Option<String>>,
    matches: ArgMatches,
}

impl ParsedCommandLine {
    /// Value of a custom sub-option, by destination field.
    pub fn get(&self, dest: &str) -> Option<&str> {
        self.sub_options.get(dest).and_then(Option::as_deref)
    }

    /// Whether a custom sub-option was given (or has a default).
    pub fn is_set(&self, dest: &str) -> bool {
        self.sub_options.contains_key(dest)
    }

    /// The raw matches, for application arguments added via
    /// [`ParserConfig::arg`].
    pub fn matches(&self) -> &ArgMatches {
        &self.matches
    }
}

/// The FUSE command-line parser.
#[derive(Debug, Clone)]
pub struct OptionParser {
    config: ParserConfig,
    mount_opts: Vec<MountOpt>,
}

impl Default for OptionParser {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}

impl OptionParser {
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config,
            mount_opts: Vec::new(),
        }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Replaces the configuration, keeping the declared sub-options.
    pub fn set_config(&mut self, config: ParserConfig) {
        self.config = config;
    }

    /// Declares a custom sub-option. Declaring the same name twice is a
    /// configuration error.
    pub fn add_mount_opt(&mut self, opt: MountOpt) -> Result<(), ConfigError> {
        if self.mount_opts.iter().any(|o| o.name == opt.name) {
            return Err(ConfigError::DuplicateSubOption(opt.name));
        }
        self.mount_opts.push(opt);
        Ok(())
    }

    pub fn mount_opts(&self) -> &[MountOpt] {
        &self.mount_opts
    }

    /// Builds the clap command for the current configuration.
    pub fn command(&self) -> Command {
        let cfg = &self.config;
        let mut cmd = Command::new(cfg.program.clone())
            .disable_help_flag(true)
            .disable_version_flag(true)
            .override_usage(format!("{} [mountpoint] [options]", cfg.program))
            .arg(
                Arg::new(ARG_HELP)
                    .short('h')
                    .long("help")
                    .action(ArgAction::SetTrue)
                    .help("Print help"),
            )
            .arg(
                Arg::new(ARG_OPTIONS)
                    .short('o')
                    .value_name("opt,[opt...]")
                    .action(ArgAction::Append)
                    .help("Mount options"),
            );

        if let Some(about) = &cfg.about {
            cmd = cmd.about(about.clone());
        }
        if cfg.version.is_some() {
            cmd = cmd.arg(
                Arg::new(ARG_VERSION)
                    .short('V')
                    .long("version")
                    .action(ArgAction::SetTrue)
                    .help("Print version"),
            );
        }
        if cfg.fetch_mountpoint {
            cmd = cmd.arg(
                Arg::new(ARG_MOUNTPOINT)
                    .value_parser(clap::value_parser!(PathBuf))
                    .help("Mount point"),
            );
        }
        if cfg.standard_mods {
            cmd = cmd
                .arg(
                    Arg::new(ARG_FOREGROUND)
                        .short('f')
                        .long("foreground")
                        .action(ArgAction::SetTrue)
                        .hide(true),
                )
                .arg(
                    Arg::new(ARG_DEBUG)
                        .short('d')
                        .long("debug")
                        .action(ArgAction::SetTrue)
                        .hide(true),
                );
        }
        if !matches!(cfg.single_thread, SingleThreadPolicy::Ignore) {
            cmd = cmd.arg(
                Arg::new(ARG_SINGLE)
                    .short('s')
                    .long("single")
                    .action(ArgAction::SetTrue)
                    .hide(true),
            );
        }
        for arg in &cfg.extra_args {
            cmd = cmd.arg(arg.clone());
        }
        if !self.mount_opts.is_empty() {
            cmd = cmd.after_help(self.mount_opts_help());
        }
        cmd
    }

    fn mount_opts_help(&self) -> String {
        let width = self
            .mount_opts
            .iter()
            .map(|o| o.usage().len())
            .max()
            .unwrap_or(0);
        let mut help = String::from("Mount options:\n");
        for opt in &self.mount_opts {
            let _ = write!(help, "  {:width$}", opt.usage());
            if let Some(text) = &opt.help {
                let _ = write!(help, "  {text}");
            }
            if let Some(default) = &opt.default {
                let _ = write!(help, " [default: {default}]");
            }
            help.push('\n');
        }
        help
    }

    /// The parser's help text.
    pub fn render_help(&self) -> String {
        self.command().render_help().to_string()
    }

    /// Parses `args` (program name first, as in [`std::env::args_os`]) into
    /// a fresh option set.
    pub fn parse<I, T>(&self, args: I) -> Result<(FuseArgs, ParsedCommandLine), ParseError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let mut fuse_args = FuseArgs::new();
        let cmdline = self.parse_into(args, &mut fuse_args)?;
        Ok((fuse_args, cmdline))
    }

    /// Parses `args` into an existing option set.
    ///
    /// Nothing is modified, neither `fuse_args` nor any threading switch,
    /// unless the whole command line is valid.
    pub fn parse_into<I, T>(
        &self,
        args: I,
        fuse_args: &mut FuseArgs,
    ) -> Result<ParsedCommandLine, ParseError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = self.command().try_get_matches_from(args)?;

        let single = flag(&matches, ARG_SINGLE);
        if single && matches!(self.config.single_thread, SingleThreadPolicy::Reject) {
            return Err(ParseError::SingleThreadNotEnabled);
        }

        let mut generic = Vec::new();
        let mut sub_options: BTreeMap<String, Option<String>> = self
            .mount_opts
            .iter()
            .filter_map(|o| o.default.clone().map(|d| (o.dest.clone(), Some(d))))
            .collect();
        for token in matches
            .get_many::<String>(ARG_OPTIONS)
            .into_iter()
            .flatten()
            .flat_map(|group| group.split(','))
            .filter(|t| !t.is_empty())
        {
            let (key, value) = match token.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (token, None),
            };
            match self.mount_opts.iter().find(|o| o.name == key) {
                Some(opt) => {
                    let value = check_sub_option(opt, value)?;
                    sub_options.insert(opt.dest.clone(), value);
                }
                None => generic.push(token),
            }
        }

        let mountpoint = match matches.get_one::<PathBuf>(ARG_MOUNTPOINT) {
            Some(path) => Some(resolve_mountpoint(path)?),
            None => None,
        };

        // The command line is valid; apply it.
        if flag(&matches, ARG_HELP) {
            print!("{}", self.render_help());
            fuse_args.set_modifier(Modifier::ShowHelp);
        }
        if flag(&matches, ARG_VERSION) {
            if let Some(version) = &self.config.version {
                println!("{} version {version}", self.config.program);
            }
            fuse_args.set_modifier(Modifier::ShowVersion);
        }
        if flag(&matches, ARG_FOREGROUND) {
            fuse_args.set_modifier(Modifier::Foreground);
        }
        if flag(&matches, ARG_DEBUG) {
            fuse_args.add("debug");
        }
        if single && let SingleThreadPolicy::SetSingle(switch) = &self.config.single_thread {
            switch.set_single();
        }
        for token in generic {
            fuse_args.add(token);
        }
        if let Some(mp) = mountpoint {
            fuse_args.set_mountpoint(mp);
        }

        debug!(args = %fuse_args, "Parsed command line");
        Ok(ParsedCommandLine {
            sub_options,
            matches,
        })
    }
}

/// Reads a boolean flag, treating unregistered arguments as unset.
fn flag(matches: &ArgMatches, id: &str) -> bool {
    matches
        .try_get_one::<bool>(id)
        .ok()
        .flatten()
        .copied()
        .unwrap_or(false)
}

fn check_sub_option(opt: &MountOpt, value: Option<&str>) -> Result<Option<String>, ParseError> {
    match (opt.takes_value, value) {
        (true, Some(v)) => Ok(Some(v.to_string())),
        (false, None) => Ok(None),
        (true, None) => Err(ParseError::SubOption {
            name: opt.name.clone(),
            reason: "requires a value",
        }),
        (false, Some(_)) => Err(ParseError::SubOption {
            name: opt.name.clone(),
            reason: "does not take a value",
        }),
    }
}

/// Makes the mountpoint absolute, resolving symlinks when it exists.
fn resolve_mountpoint(path: &Path) -> Result<PathBuf, ParseError> {
    if let Ok(real) = std::fs::canonicalize(path) {
        return Ok(real);
    }
    std::path::absolute(path).map_err(|source| ParseError::Mountpoint {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptValue;

    fn parser() -> OptionParser {
        OptionParser::new(ParserConfig::default().program("testfs"))
    }

    #[test]
    fn test_options_and_flags() {
        let (args, _) = parser()
            .parse(["testfs", "-o", "ro,uid=1000", "-f", "-d", "-o", "allow_other"])
            .unwrap();
        assert!(args.has_flag("ro"));
        assert!(args.has_flag("allow_other"));
        assert!(args.has_flag("debug"));
        assert_eq!(args.value("uid"), Some(&OptValue::from("1000")));
        assert!(args.modifier(Modifier::Foreground));
        assert!(args.mount_expected());
        assert!(args.mountpoint().is_none());
    }

    #[test]
    fn test_command_uses_configured_program() {
        let program = format!("{}-{}", "test", "fs");
        let mut parser = OptionParser::new(ParserConfig::default().program(program));
        assert_eq!(parser.command().get_name(), "test-fs");
        assert!(parser.render_help().contains("test-fs [mountpoint] [options]"));

        parser.add_mount_opt(MountOpt::flag("cache")).unwrap();
        parser.set_config(ParserConfig::default().program("other"));
        assert_eq!(parser.command().get_name(), "other");
        assert_eq!(parser.mount_opts().len(), 1);
    }

    #[test]
    fn test_mountpoint_is_made_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let (args, _) = parser()
            .parse([OsString::from("testfs"), dir.path().as_os_str().to_owned()])
            .unwrap();
        let expected = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(args.mountpoint(), Some(expected.as_path()));

        let (args, _) = parser().parse(["testfs", "does-not-exist"]).unwrap();
        let mp = args.mountpoint().unwrap();
        assert!(mp.is_absolute());
        assert!(mp.ends_with("does-not-exist"));
    }

    #[test]
    fn test_single_thread_rejected_by_default() {
        let switch = ThreadingSwitch::new();
        let mut args = FuseArgs::new();
        let err = parser()
            .parse_into(["testfs", "-s", "-o", "ro"], &mut args)
            .unwrap_err();
        assert!(matches!(err, ParseError::SingleThreadNotEnabled));
        assert!(switch.multithreaded());
        assert_eq!(args, FuseArgs::new());
    }

    #[test]
    fn test_single_thread_set_single() {
        let switch = ThreadingSwitch::new();
        let parser = OptionParser::new(
            ParserConfig::default().single_thread(SingleThreadPolicy::SetSingle(switch.clone())),
        );
        parser.parse(["testfs", "-s"]).unwrap();
        assert!(!switch.multithreaded());
    }

    #[test]
    fn test_single_thread_ignore_leaves_flag_to_caller() {
        let parser = OptionParser::new(
            ParserConfig::default().single_thread(SingleThreadPolicy::Ignore),
        );
        assert!(matches!(
            parser.parse(["testfs", "-s"]),
            Err(ParseError::Cli(_))
        ));

        let parser = OptionParser::new(
            ParserConfig::default()
                .single_thread(SingleThreadPolicy::Ignore)
                .arg(Arg::new("single").short('s').action(ArgAction::SetTrue)),
        );
        let (_, cmdline) = parser.parse(["testfs", "-s"]).unwrap();
        assert!(cmdline.matches().get_flag("single"));
    }

    #[test]
    fn test_unknown_flag_is_error_not_exit() {
        let err = parser().parse(["testfs", "--bogus"]).unwrap_err();
        assert!(matches!(err, ParseError::Cli(_)));
    }

    #[test]
    fn test_custom_sub_options() {
        let mut parser = parser();
        parser
            .add_mount_opt(MountOpt::value("root").dest("source").help("mirrored directory"))
            .unwrap();
        parser.add_mount_opt(MountOpt::flag("nocache")).unwrap();
        parser
            .add_mount_opt(MountOpt::value("mode").default_value("fast"))
            .unwrap();

        let (args, cmdline) = parser
            .parse(["testfs", "-o", "root=/srv,nocache,ro"])
            .unwrap();
        assert_eq!(cmdline.get("source"), Some("/srv"));
        assert!(cmdline.is_set("nocache"));
        assert_eq!(cmdline.get("mode"), Some("fast"));
        assert!(!args.contains("root"));
        assert!(args.has_flag("ro"));

        let help = parser.render_help();
        assert!(help.contains("-o root=VALUE"));
        assert!(help.contains("-o nocache"));
    }

    #[test]
    fn test_sub_option_value_mismatch() {
        let mut parser = parser();
        parser.add_mount_opt(MountOpt::value("root")).unwrap();
        parser.add_mount_opt(MountOpt::flag("nocache")).unwrap();
        assert!(matches!(
            parser.parse(["testfs", "-o", "root"]),
            Err(ParseError::SubOption { .. })
        ));
        assert!(matches!(
            parser.parse(["testfs", "-o", "nocache=1"]),
            Err(ParseError::SubOption { .. })
        ));
    }

    #[test]
    fn test_duplicate_sub_option_is_config_error() {
        let mut parser = parser();
        parser.add_mount_opt(MountOpt::value("root")).unwrap();
        let err = parser.add_mount_opt(MountOpt::flag("root")).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSubOption(name) if name == "root"));
    }

    #[test]
    fn test_help_and_version_set_modifiers() {
        let versioned = OptionParser::new(ParserConfig::default().version("1.2.3"));
        let (args, _) = versioned.parse(["testfs", "-h"]).unwrap();
        assert!(args.modifier(Modifier::ShowHelp));
        assert!(!args.mount_expected());

        let (args, _) = versioned.parse(["testfs", "--version"]).unwrap();
        assert!(args.modifier(Modifier::ShowVersion));

        // Without a version string there is no -V.
        assert!(parser().parse(["testfs", "-V"]).is_err());
    }

    #[test]
    fn test_standard_mods_off() {
        let parser = OptionParser::new(ParserConfig::default().standard_mods(false));
        assert!(parser.parse(["testfs", "-f"]).is_err());
    }
}
