//! Setup-time error types.
//!
//! Errors raised from inside dispatched operations live in
//! [`dispatch::errno`](crate::dispatch::errno); everything here is detected
//! before or around the service loop.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from manipulating an option set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionError {
    /// A token carried an embedded `=value` and an explicit value as well.
    #[error("ambiguous value for option {option}: {embedded:?} and {explicit:?}")]
    ConflictingValue {
        option: String,
        embedded: String,
        explicit: String,
    },
}

/// Configuration errors, detected while setting things up and never
/// recoverable at run time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Two custom mount sub-options were declared with the same name.
    #[error("mount sub-option declared twice: {0}")]
    DuplicateSubOption(String),

    /// A capability graph entry refers to a name the graph does not define.
    #[error("capability {feature} refers to unknown capability {reference}")]
    UnknownReference { feature: String, reference: String },

    /// The capability graph has a reference cycle through this name.
    #[error("capability graph has a cycle through {0}")]
    Cycle(String),

    /// A capability pattern is not a valid regular expression.
    #[error("invalid capability pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Command-line parsing failures.
///
/// Callers choose whether to exit with a status code or propagate these;
/// the parser itself never terminates the process.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Unknown flag, missing value or a similar command-line error.
    #[error(transparent)]
    Cli(#[from] clap::Error),

    /// The single-threading flag was given but the service has not opted in
    /// to handling it.
    #[error(
        "the -s option was given but single-threaded mode handling is not \
         enabled; configure the parser with a single-thread policy of \
         `Ignore` or `SetSingle` to accept it"
    )]
    SingleThreadNotEnabled,

    /// A `-o` token could not be added to the option set.
    #[error(transparent)]
    Option(#[from] OptionError),

    /// A custom sub-option was given with or without a value against its
    /// declaration.
    #[error("mount option {name} {reason}")]
    SubOption { name: String, reason: &'static str },

    /// The mountpoint argument could not be turned into an absolute path.
    #[error("cannot resolve mountpoint {path}: {source}")]
    Mountpoint {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ParseError {
    /// Prints the error the way command-line tools do, on stderr.
    pub fn print(&self) {
        match self {
            ParseError::Cli(e) => {
                let _ = e.print();
            }
            other => eprintln!("error: {other}"),
        }
    }
}

/// Capability resolution and assertion failures.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The name is neither in the capability graph nor `has_<op>` for a
    /// dispatchable operation.
    #[error("unknown capability: {0}")]
    Unknown(String),

    /// The running engine is older than the requested capabilities need.
    #[error(
        "engine API version {required} is required for {} but only {available} is available",
        names.join(", ")
    )]
    Unsupported {
        required: u32,
        available: u32,
        names: Vec<String>,
    },

    /// A requested pattern did not compile.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The engine version could not be determined.
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Failures while probing an engine process for its metadata.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run engine {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("engine reported an unparseable version: {0:?}")]
    InvalidVersion(String),

    #[error("engine produced no version output")]
    NoVersion,
}

/// Failures starting or running the engine's service loop.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The argument list handed to the engine was malformed.
    #[error("invalid engine arguments: {0}")]
    InvalidArgs(String),

    /// No mountpoint was given but a mount was requested.
    #[error("no mountpoint specified")]
    NoMountpoint,

    /// The engine failed to mount or lost its session.
    #[error("mount at {mountpoint} failed: {source}")]
    Mount {
        mountpoint: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from [`Service::run`](crate::Service::run).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_message_names_everything() {
        let err = CapabilityError::Unsupported {
            required: 26,
            available: 23,
            names: vec!["has_lock".into(), "has_bmap".into()],
        };
        assert_eq!(
            err.to_string(),
            "engine API version 26 is required for has_lock, has_bmap but only 23 is available"
        );
    }

    #[test]
    fn test_single_thread_message_explains_opt_in() {
        let msg = ParseError::SingleThreadNotEnabled.to_string();
        assert!(msg.contains("-s"));
        assert!(msg.contains("SetSingle"));
    }
}
