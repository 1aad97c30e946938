//! Reading the assembled engine command line back into mount settings.

use std::ffi::OsString;
use std::path::PathBuf;

use fuser::MountOption;
use fuseshim::EngineError;
use tracing::debug;

use crate::config::EngineConfig;

/// The engine command line, split into its parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountArgs {
    pub mountpoint: Option<PathBuf>,
    pub foreground: bool,
    pub debug: bool,
    pub single_threaded: bool,
    pub show_help: bool,
    pub show_version: bool,
    /// `-o` entries in command-line order, split at the first `=`.
    pub options: Vec<(String, Option<String>)>,
}

impl MountArgs {
    /// Parses `args`, program name first.
    ///
    /// Accepts the layout `FuseArgs::assemble` produces plus the usual
    /// spellings (`-o opts` as two arguments, `-h`, `--help`, `--version`).
    pub fn parse(args: &[OsString]) -> Result<Self, EngineError> {
        let mut parsed = MountArgs::default();
        let mut iter = args.iter().skip(1);

        while let Some(arg) = iter.next() {
            let Some(text) = arg.to_str() else {
                parsed.set_mountpoint(arg)?;
                continue;
            };
            match text {
                "-f" => parsed.foreground = true,
                "-d" => parsed.debug = true,
                "-s" => parsed.single_threaded = true,
                "-ho" | "-h" | "--help" => parsed.show_help = true,
                "-V" | "--version" => parsed.show_version = true,
                "-o" => {
                    let group = iter
                        .next()
                        .and_then(|g| g.to_str())
                        .ok_or_else(|| EngineError::InvalidArgs("-o requires an argument".into()))?;
                    parsed.add_options(group);
                }
                _ => {
                    if let Some(group) = text.strip_prefix("-o") {
                        parsed.add_options(group);
                    } else if text.starts_with('-') {
                        return Err(EngineError::InvalidArgs(format!("unknown option {text}")));
                    } else {
                        parsed.set_mountpoint(arg)?;
                    }
                }
            }
        }
        if parsed.options.iter().any(|(k, _)| k == "debug") {
            parsed.debug = true;
        }
        Ok(parsed)
    }

    fn set_mountpoint(&mut self, arg: &OsString) -> Result<(), EngineError> {
        if let Some(existing) = &self.mountpoint {
            return Err(EngineError::InvalidArgs(format!(
                "unexpected argument {} after mountpoint {}",
                arg.to_string_lossy(),
                existing.display()
            )));
        }
        self.mountpoint = Some(PathBuf::from(arg));
        Ok(())
    }

    fn add_options(&mut self, group: &str) {
        for token in group.split(',').filter(|t| !t.is_empty()) {
            let entry = match token.split_once('=') {
                Some((k, v)) => (k.to_string(), Some(v.to_string())),
                None => (token.to_string(), None),
            };
            self.options.push(entry);
        }
    }

    /// Whether the command line asks only for help or version output.
    pub fn informational(&self) -> bool {
        self.show_help || self.show_version
    }

    /// Whether the process should stay attached to the terminal.
    pub fn stay_in_foreground(&self) -> bool {
        self.foreground || self.debug
    }

    /// Applies engine options to `config` and maps the rest to mount
    /// options. Options fuser has no name for are passed through verbatim.
    pub fn mount_options(&self, config: &mut EngineConfig) -> Vec<MountOption> {
        let mut options = Vec::new();
        for (key, value) in &self.options {
            if key == "debug" || config.apply_option(key, value.as_deref()) {
                continue;
            }
            let option = match (key.as_str(), value) {
                ("ro", None) => MountOption::RO,
                ("rw", None) => MountOption::RW,
                ("allow_other", None) => MountOption::AllowOther,
                ("allow_root", None) => MountOption::AllowRoot,
                ("auto_unmount", None) => MountOption::AutoUnmount,
                ("default_permissions", None) => MountOption::DefaultPermissions,
                ("dev", None) => MountOption::Dev,
                ("nodev", None) => MountOption::NoDev,
                ("suid", None) => MountOption::Suid,
                ("nosuid", None) => MountOption::NoSuid,
                ("exec", None) => MountOption::Exec,
                ("noexec", None) => MountOption::NoExec,
                ("atime", None) => MountOption::Atime,
                ("noatime", None) => MountOption::NoAtime,
                ("sync", None) => MountOption::Sync,
                ("async", None) => MountOption::Async,
                ("dirsync", None) => MountOption::DirSync,
                (k, Some(v)) => MountOption::CUSTOM(format!("{k}={v}")),
                (k, None) => MountOption::CUSTOM(k.to_string()),
            };
            options.push(option);
        }
        options.push(MountOption::FSName(config.fsname.clone()));
        if let Some(subtype) = &config.subtype {
            options.push(MountOption::Subtype(subtype.clone()));
        }
        debug!(?options, "Mount options");
        options
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn test_parse_assembled_layout() {
        let parsed = MountArgs::parse(&args(&[
            "hello",
            "/mnt/hello",
            "-f",
            "-oallow_other,fsname=hello,ro",
        ]))
        .unwrap();
        assert_eq!(parsed.mountpoint, Some(PathBuf::from("/mnt/hello")));
        assert!(parsed.foreground);
        assert!(!parsed.informational());
        assert_eq!(
            parsed.options,
            vec![
                ("allow_other".to_string(), None),
                ("fsname".to_string(), Some("hello".to_string())),
                ("ro".to_string(), None),
            ]
        );
    }

    #[test]
    fn test_parse_help_and_split_o() {
        let parsed = MountArgs::parse(&args(&["hello", "-ho", "-o", "debug"])).unwrap();
        assert!(parsed.show_help);
        assert!(parsed.debug);
        assert!(parsed.stay_in_foreground());
        assert!(parsed.mountpoint.is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(MountArgs::parse(&args(&["hello", "--frobnicate"])).is_err());
        assert!(MountArgs::parse(&args(&["hello", "/a", "/b"])).is_err());
        assert!(MountArgs::parse(&args(&["hello", "-o"])).is_err());
    }

    #[test]
    fn test_mount_options_consume_engine_settings() {
        let parsed = MountArgs::parse(&args(&[
            "hello",
            "/mnt",
            "-oattr_timeout=3,debug,nosuid,max_read=4096,fsname=demo,subtype=hello",
        ]))
        .unwrap();
        let mut config = EngineConfig::default();
        let options = parsed.mount_options(&mut config);

        assert_eq!(config.attr_ttl, Duration::from_secs(3));
        assert_eq!(
            options,
            vec![
                MountOption::NoSuid,
                MountOption::CUSTOM("max_read=4096".to_string()),
                MountOption::FSName("demo".to_string()),
                MountOption::Subtype("hello".to_string()),
            ]
        );
    }
}
