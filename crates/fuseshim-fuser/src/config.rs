//! Engine configuration.
//!
//! Defaults match what libfuse's high-level API does: one second attribute
//! and entry timeouts and a worker per CPU. A few `-o` options on the
//! engine command line override them per mount.

use std::time::Duration;

use tracing::warn;

/// Default time-to-live for attributes and directory entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(1);

/// Default filesystem name shown in the mount table.
pub const DEFAULT_FSNAME: &str = "fuseshim";

/// Configuration for [`FuserEngine`](crate::FuserEngine).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Time-to-live for attributes returned by `getattr` and `setattr`.
    pub attr_ttl: Duration,

    /// Time-to-live for name lookups.
    pub entry_ttl: Duration,

    /// Worker threads used in multithreaded mode.
    ///
    /// Default: the number of CPUs.
    pub workers: usize,

    /// Filesystem name reported to the kernel.
    pub fsname: String,

    /// Filesystem subtype (the `fuse.<subtype>` type name).
    pub subtype: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            attr_ttl: DEFAULT_TTL,
            entry_ttl: DEFAULT_TTL,
            workers: num_cpus::get().max(1),
            fsname: DEFAULT_FSNAME.to_string(),
            subtype: None,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    #[must_use]
    pub fn entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    /// Sets the worker count. Zero is treated as one.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn fsname(mut self, name: impl Into<String>) -> Self {
        self.fsname = name.into();
        self
    }

    #[must_use]
    pub fn subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    /// Applies an engine-level `-o` option. Returns `false` if `key` is not
    /// an engine option and should be passed on to the mount.
    ///
    /// Timeouts are in (possibly fractional) seconds. Unparseable or out of range values are
    /// logged and ignored.
    pub fn apply_option(&mut self, key: &str, value: Option<&str>) -> bool {
        match (key, value) {
            ("attr_timeout", Some(v)) => {
                if let Some(ttl) = parse_seconds(key, v) {
                    self.attr_ttl = ttl;
                }
                true
            }
            ("entry_timeout", Some(v)) => {
                if let Some(ttl) = parse_seconds(key, v) {
                    self.entry_ttl = ttl;
                }
                true
            }
            ("fsname", Some(v)) => {
                self.fsname = v.to_string();
                true
            }
            ("subtype", Some(v)) => {
                self.subtype = Some(v.to_string());
                true
            }
            _ => false,
        }
    }
}

fn parse_seconds(key: &str, value: &str) -> Option<Duration> {
    match value.parse::<f64>().ok().map(Duration::try_from_secs_f64) {
        Some(Ok(ttl)) => Some(ttl),
        _ => {
            warn!(option = key, value, "Ignoring invalid timeout");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.attr_ttl, Duration::from_secs(1));
        assert_eq!(config.entry_ttl, Duration::from_secs(1));
        assert!(config.workers >= 1);
        assert_eq!(config.fsname, "fuseshim");
        assert_eq!(config.subtype, None);
    }

    #[test]
    fn test_builder_pattern() {
        let config = EngineConfig::default()
            .attr_ttl(Duration::from_secs(5))
            .workers(0)
            .subtype("hello");
        assert_eq!(config.attr_ttl, Duration::from_secs(5));
        assert_eq!(config.workers, 1);
        assert_eq!(config.subtype.as_deref(), Some("hello"));
    }

    #[test]
    fn test_apply_option() {
        let mut config = EngineConfig::default();
        assert!(config.apply_option("attr_timeout", Some("2.5")));
        assert_eq!(config.attr_ttl, Duration::from_millis(2500));
        assert!(config.apply_option("entry_timeout", Some("0")));
        assert_eq!(config.entry_ttl, Duration::ZERO);
        assert!(config.apply_option("fsname", Some("memfs")));
        assert_eq!(config.fsname, "memfs");

        // Consumed but ignored.
        assert!(config.apply_option("attr_timeout", Some("soon")));
        assert_eq!(config.attr_ttl, Duration::from_millis(2500));
        assert!(config.apply_option("attr_timeout", Some("1e30")));
        assert!(config.apply_option("entry_timeout", Some("-1")));
        assert!(config.apply_option("entry_timeout", Some("NaN")));
        assert_eq!(config.attr_ttl, Duration::from_millis(2500));
        assert_eq!(config.entry_ttl, Duration::ZERO);

        assert!(!config.apply_option("allow_other", None));
        assert!(!config.apply_option("attr_timeout", None));
    }
}
