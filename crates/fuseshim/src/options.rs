//! The in-memory form of a FUSE command line.
//!
//! [`FuseArgs`] holds a mountpoint, the engine modifiers (`-ho`, `-V`, `-f`)
//! and the `-o` mount options, split into bare flags and `key=value` pairs.
//! It is the single currency between the option parser, the engine's
//! reference option set and the argument list finally handed to the engine.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::error::OptionError;

/// Program name used when the process name cannot be determined.
const FALLBACK_PROGRAM: &str = "fuseshim";

/// An engine-recognized boolean command-line flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    ShowHelp,
    ShowVersion,
    Foreground,
}

impl Modifier {
    pub const ALL: [Modifier; 3] = [
        Modifier::ShowHelp,
        Modifier::ShowVersion,
        Modifier::Foreground,
    ];

    /// The literal flag passed to the engine.
    pub fn flag(self) -> &'static str {
        match self {
            Modifier::ShowHelp => "-ho",
            Modifier::ShowVersion => "-V",
            Modifier::Foreground => "-f",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Modifier::ShowHelp => "showhelp",
            Modifier::ShowVersion => "showversion",
            Modifier::Foreground => "foreground",
        }
    }
}

/// A value stored under a `-o` key.
///
/// Booleans are only a transient state: canonicalization drops `false` and
/// turns `true` into a bare flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OptValue {
    Bool(bool),
    Str(String),
}

impl fmt::Display for OptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptValue::Bool(b) => write!(f, "{b}"),
            OptValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for OptValue {
    fn from(b: bool) -> Self {
        OptValue::Bool(b)
    }
}

impl From<&str> for OptValue {
    fn from(s: &str) -> Self {
        OptValue::Str(s.to_string())
    }
}

impl From<String> for OptValue {
    fn from(s: String) -> Self {
        OptValue::Str(s)
    }
}

macro_rules! opt_value_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for OptValue {
            fn from(n: $t) -> Self {
                OptValue::Str(n.to_string())
            }
        })*
    };
}

opt_value_from_int!(u16, u32, u64, i32, i64, usize);

/// A FUSE command line: mountpoint, modifiers and mount options.
///
/// Invariant: a key is never present both as a flag and as a value option.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FuseArgs {
    mountpoint: Option<PathBuf>,
    modifiers: BTreeSet<Modifier>,
    flags: BTreeSet<String>,
    values: BTreeMap<String, OptValue>,
}

impl FuseArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mountpoint(&self) -> Option<&Path> {
        self.mountpoint.as_deref()
    }

    pub fn set_mountpoint(&mut self, path: impl Into<PathBuf>) {
        self.mountpoint = Some(path.into());
    }

    pub fn modifier(&self, m: Modifier) -> bool {
        self.modifiers.contains(&m)
    }

    pub fn set_modifier(&mut self, m: Modifier) {
        self.modifiers.insert(m);
    }

    pub fn unset_modifier(&mut self, m: Modifier) {
        self.modifiers.remove(&m);
    }

    /// Whether running the engine with these arguments is expected to mount
    /// something. Help and version requests print and return instead.
    pub fn mount_expected(&self) -> bool {
        !self.modifier(Modifier::ShowHelp) && !self.modifier(Modifier::ShowVersion)
    }

    /// Adds a `-o` token, splitting an embedded value on the first `=`.
    ///
    /// `foo` and `foo=` add the flag `foo`; `foo=bar` stores `bar` under `foo`.
    pub fn add(&mut self, token: &str) {
        let (key, embedded) = split_token(token);
        match embedded {
            Some(v) => self.store(key, OptValue::Str(v.to_string())),
            None => self.store(key, OptValue::Bool(true)),
        }
    }

    /// Adds a `-o` token with an explicit value.
    ///
    /// `false` suppresses the option entirely and `true` adds it as a flag.
    /// Fails if `token` also carries an embedded `=value`.
    pub fn add_value(
        &mut self,
        token: &str,
        value: impl Into<OptValue>,
    ) -> Result<(), OptionError> {
        let value = value.into();
        let (key, embedded) = split_token(token);
        if let Some(embedded) = embedded {
            return Err(OptionError::ConflictingValue {
                option: key.to_string(),
                embedded: embedded.to_string(),
                explicit: value.to_string(),
            });
        }
        self.store(key, value);
        Ok(())
    }

    fn store(&mut self, key: &str, value: OptValue) {
        match value {
            OptValue::Bool(false) => {}
            OptValue::Bool(true) => {
                self.values.remove(key);
                self.flags.insert(key.to_string());
            }
            OptValue::Str(s) => {
                self.flags.remove(key);
                self.values.insert(key.to_string(), OptValue::Str(s));
            }
        }
    }

    /// Stores a raw value under `key` without normalizing it.
    ///
    /// Boolean values stay in place until the next [`canonicalize`].
    ///
    /// [`canonicalize`]: FuseArgs::canonicalize
    pub fn set_value(&mut self, key: &str, value: impl Into<OptValue>) {
        self.flags.remove(key);
        self.values.insert(key.to_string(), value.into());
    }

    /// Removes `key` whether it is a flag or a value option.
    pub fn remove(&mut self, key: &str) -> bool {
        let flag = self.flags.remove(key);
        let value = self.values.remove(key).is_some();
        flag || value
    }

    pub fn has_flag(&self, key: &str) -> bool {
        self.flags.contains(key)
    }

    pub fn value(&self, key: &str) -> Option<&OptValue> {
        self.values.get(key)
    }

    /// Whether `key` is present as either a flag or a value option.
    pub fn contains(&self, key: &str) -> bool {
        self.flags.contains(key) || self.values.contains_key(key)
    }

    /// Bare flag options in lexicographic order.
    pub fn flags(&self) -> impl Iterator<Item = &str> {
        self.flags.iter().map(String::as_str)
    }

    /// Value options in lexicographic key order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &OptValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether there are no `-o` options at all.
    pub fn has_no_options(&self) -> bool {
        self.flags.is_empty() && self.values.is_empty()
    }

    /// Brings the option set into canonical form: no boolean values remain.
    /// Idempotent.
    pub fn canonicalize(&mut self) {
        let promoted: Vec<String> = self
            .values
            .iter()
            .filter(|(_, v)| matches!(v, OptValue::Bool(true)))
            .map(|(k, _)| k.clone())
            .collect();
        self.values.retain(|_, v| !matches!(v, OptValue::Bool(_)));
        self.flags.extend(promoted);
    }

    pub fn is_canonical(&self) -> bool {
        self.values.values().all(|v| matches!(v, OptValue::Str(_)))
    }

    /// Moves every option not known to `reference` out of `self`.
    ///
    /// Flags are checked against the reference's flags and value options
    /// against its value options. Returns the rejected options, carrying
    /// their values; `self` keeps only the accepted ones.
    pub fn filter(&mut self, reference: &FuseArgs) -> FuseArgs {
        self.canonicalize();
        let mut reference = reference.clone();
        reference.canonicalize();

        let mut rejected = FuseArgs::new();
        rejected.flags = self.flags.difference(&reference.flags).cloned().collect();
        self.flags.retain(|f| reference.flags.contains(f));

        let (kept, dropped): (BTreeMap<_, _>, BTreeMap<_, _>) = std::mem::take(&mut self.values)
            .into_iter()
            .partition(|(k, _)| reference.values.contains_key(k));
        self.values = kept;
        rejected.values = dropped;
        rejected
    }

    /// The sorted `-o` payload entries: flags and `key=value` pairs.
    fn option_list(&self) -> Vec<String> {
        let mut opts: Vec<String> = self
            .flags
            .iter()
            .cloned()
            .chain(self.values.iter().map(|(k, v)| format!("{k}={v}")))
            .collect();
        opts.sort();
        opts
    }

    /// Canonicalizes and renders the argument vector for the engine.
    ///
    /// Layout: program name, mountpoint if set, one flag per active modifier,
    /// then a single `-o` argument carrying every mount option, sorted and
    /// comma-joined.
    pub fn assemble(&mut self) -> Vec<OsString> {
        self.canonicalize();

        let mut args = vec![program_name()];
        if let Some(mp) = &self.mountpoint {
            args.push(mp.clone().into_os_string());
        }
        for m in &self.modifiers {
            args.push(OsString::from(m.flag()));
        }
        if !self.has_no_options() {
            args.push(OsString::from(format!("-o{}", self.option_list().join(","))));
        }
        args
    }

    /// Builds the reference option set from an engine's help text.
    ///
    /// Every `-o name` and `-o name=value` occurrence is added. A name with
    /// one bracketed optional part, like `[no]foo` or `foo[bar]baz`, expands
    /// to both spellings; any other use of brackets is skipped.
    pub fn from_help_text(text: &str) -> FuseArgs {
        static OPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"-o\s+([\w\[\]]+(?:=\w+)?)").expect("static regex is valid")
        });

        let mut args = FuseArgs::new();
        for line in text.lines() {
            for caps in OPTION_RE.captures_iter(line) {
                let token = &caps[1];
                match expand_brackets(token) {
                    Some(names) => {
                        for name in names {
                            args.add(&name);
                        }
                    }
                    None => warn!(option = token, "Skipping unsupported bracketed option"),
                }
            }
        }
        args
    }
}

fn split_token(token: &str) -> (&str, Option<&str>) {
    match token.split_once('=') {
        Some((key, v)) if !v.is_empty() => (key, Some(v)),
        Some((key, _)) => (key, None),
        None => (token, None),
    }
}

/// Expands one `prefix[optional]suffix` group into its two spellings.
/// Returns `None` for nested, unbalanced or repeated brackets.
fn expand_brackets(token: &str) -> Option<Vec<String>> {
    if !token.contains(['[', ']']) {
        return Some(vec![token.to_string()]);
    }
    let (prefix, rest) = token.split_once('[')?;
    let (optional, suffix) = rest.split_once(']')?;
    if prefix.contains(']') || optional.contains('[') || suffix.contains(['[', ']']) {
        return None;
    }
    Some(vec![
        format!("{prefix}{suffix}"),
        format!("{prefix}{optional}{suffix}"),
    ])
}

pub(crate) fn program_name() -> OsString {
    std::env::args_os()
        .next()
        .and_then(|arg0| Path::new(&arg0).file_name().map(ToOwned::to_owned))
        .unwrap_or_else(|| OsString::from(FALLBACK_PROGRAM))
}

impl fmt::Display for FuseArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mountpoint = self
            .mountpoint
            .as_ref()
            .map_or_else(|| "(none)".to_string(), |p| p.display().to_string());
        writeln!(f, "< on {mountpoint}:")?;

        let modifiers: Vec<&str> = self.modifiers.iter().map(|m| m.name()).collect();
        if modifiers.is_empty() {
            writeln!(f, "  modifiers: (none)")?;
        } else {
            writeln!(f, "  modifiers: {}", modifiers.join(", "))?;
        }

        let mut opts = self.option_list();
        if opts.is_empty() {
            opts.push("(none)".to_string());
        }
        write!(f, "  -o {} >", opts.join(",\n     "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(args: &mut FuseArgs) -> Option<String> {
        args.assemble()
            .into_iter()
            .filter_map(|a| a.into_string().ok())
            .find_map(|a| a.strip_prefix("-o").map(str::to_string))
    }

    #[test]
    fn test_add_splits_on_first_equals() {
        let mut args = FuseArgs::new();
        args.add("fsname=a=b");
        args.add("ro");
        args.add("debug=");
        assert_eq!(args.value("fsname"), Some(&OptValue::from("a=b")));
        assert!(args.has_flag("ro"));
        assert!(args.has_flag("debug"));
    }

    #[test]
    fn test_add_value_rejects_embedded_and_explicit() {
        let mut args = FuseArgs::new();
        let err = args.add_value("uid=1000", 1001u32).unwrap_err();
        assert_eq!(
            err,
            OptionError::ConflictingValue {
                option: "uid".into(),
                embedded: "1000".into(),
                explicit: "1001".into(),
            }
        );
        assert!(!args.contains("uid"));
    }

    #[test]
    fn test_false_suppresses_option() {
        let mut args = FuseArgs::new();
        args.set_mountpoint("/mnt");
        args.add_value("allow_other", false).unwrap();
        let assembled = args.assemble();
        assert!(
            assembled
                .iter()
                .all(|a| !a.to_string_lossy().contains("allow_other"))
        );
    }

    #[test]
    fn test_true_promotes_to_flag() {
        let mut args = FuseArgs::new();
        args.add_value("allow_other", true).unwrap();
        assert!(args.has_flag("allow_other"));
        assert!(args.value("allow_other").is_none());
    }

    #[test]
    fn test_keys_stay_disjoint() {
        let mut args = FuseArgs::new();
        args.add("uid");
        args.add("uid=1000");
        assert!(!args.has_flag("uid"));
        args.add("uid");
        assert!(args.value("uid").is_none());

        args.set_value("uid", "7");
        assert!(!args.has_flag("uid"));
    }

    #[test]
    fn test_canonicalize_normalizes_raw_booleans() {
        let mut args = FuseArgs::new();
        args.set_value("allow_other", true);
        args.set_value("ro", false);
        args.set_value("uid", 1000u32);
        assert!(!args.is_canonical());

        args.canonicalize();
        assert!(args.is_canonical());
        assert!(args.has_flag("allow_other"));
        assert!(!args.contains("ro"));

        let once = args.clone();
        args.canonicalize();
        assert_eq!(args, once);
    }

    #[test]
    fn test_assemble_sorts_options() {
        let mut args = FuseArgs::new();
        args.add("gid=1000");
        args.add("debug");
        args.add("uid=1000");
        assert_eq!(payload(&mut args).as_deref(), Some("debug,gid=1000,uid=1000"));
    }

    #[test]
    fn test_assemble_layout() {
        let mut args = FuseArgs::new();
        args.set_mountpoint("/mnt/x");
        args.set_modifier(Modifier::Foreground);
        args.set_modifier(Modifier::ShowHelp);
        args.add("ro");

        let assembled = args.assemble();
        assert_eq!(
            &assembled[1..],
            &[
                OsString::from("/mnt/x"),
                OsString::from("-ho"),
                OsString::from("-f"),
                OsString::from("-oro"),
            ]
        );
    }

    #[test]
    fn test_assemble_without_options_has_no_o_flag() {
        let mut args = FuseArgs::new();
        args.set_modifier(Modifier::ShowVersion);
        assert_eq!(args.assemble().len(), 2);
        assert!(!args.mount_expected());
    }

    #[test]
    fn test_filter_partitions() {
        let mut reference = FuseArgs::new();
        reference.add("allow_other");
        reference.add("uid=N");

        let mut args = FuseArgs::new();
        args.add("allow_other");
        args.add("uid=1000");
        args.add("root=/srv");
        args.add("fancy");

        let rejected = args.filter(&reference);
        assert_eq!(args.flags().collect::<Vec<_>>(), vec!["allow_other"]);
        assert_eq!(args.value("uid"), Some(&OptValue::from("1000")));
        assert_eq!(rejected.flags().collect::<Vec<_>>(), vec!["fancy"]);
        assert_eq!(rejected.value("root"), Some(&OptValue::from("/srv")));
        assert!(!args.contains("root"));
    }

    #[test]
    fn test_help_text_parsing() {
        let help = "\
general options:
    -o opt,[opt...]        mount options
FUSE options:
    -o allow_other         allow access to other users
    -o uid=N               set file owner
    -o [no]auto_cache      enable caching based on modification times
    -o large_read          issue large read requests (2.4 only)
    -o max_read=N          set maximum size of read requests
";
        let reference = FuseArgs::from_help_text(help);
        assert!(reference.has_flag("allow_other"));
        assert!(reference.has_flag("auto_cache"));
        assert!(reference.has_flag("noauto_cache"));
        assert!(reference.has_flag("large_read"));
        assert_eq!(reference.value("uid"), Some(&OptValue::from("N")));
        assert_eq!(reference.value("max_read"), Some(&OptValue::from("N")));
        // "opt,[opt...]" is not an option name.
        assert!(reference.has_flag("opt"));
        assert!(!reference.contains("[opt"));
    }

    #[test]
    fn test_expand_brackets() {
        assert_eq!(
            expand_brackets("foo[bar]baz"),
            Some(vec!["foobaz".to_string(), "foobarbaz".to_string()])
        );
        assert_eq!(expand_brackets("plain"), Some(vec!["plain".to_string()]));
        assert_eq!(expand_brackets("a[b]c[d]"), None);
        assert_eq!(expand_brackets("a[b[c]]"), None);
        assert_eq!(expand_brackets("a]b"), None);
    }

    #[test]
    fn test_display() {
        let mut args = FuseArgs::new();
        assert_eq!(
            args.to_string(),
            "< on (none):\n  modifiers: (none)\n  -o (none) >"
        );
        args.set_mountpoint("/mnt");
        args.set_modifier(Modifier::Foreground);
        args.add("ro");
        args.add("uid=5");
        assert_eq!(
            args.to_string(),
            "< on /mnt:\n  modifiers: foreground\n  -o ro,\n     uid=5 >"
        );
    }
    #[test]
    fn test_serialize_diagnostics() {
        let mut args = FuseArgs::new();
        args.set_mountpoint("/mnt");
        args.set_modifier(Modifier::ShowHelp);
        args.add("ro");
        args.add("uid=5");
        args.set_value("big_writes", true);
        assert_eq!(
            serde_json::to_value(&args).unwrap()["values"],
            serde_json::json!({"big_writes": true, "uid": "5"})
        );

        args.canonicalize();
        assert_eq!(
            serde_json::to_value(&args).unwrap(),
            serde_json::json!({
                "mountpoint": "/mnt",
                "modifiers": ["showhelp"],
                "flags": ["big_writes", "ro"],
                "values": {"uid": "5"},
            })
        );
        assert_eq!(
            serde_json::to_value(crate::Operation::Fgetattr).unwrap(),
            serde_json::json!("fgetattr")
        );
    }
}
