//! The contract between this crate and the engine that speaks the kernel
//! protocol.
//!
//! An engine receives three things: the dispatch table, whether it may
//! dispatch from several threads, and the assembled argument list. Engines
//! also answer two metadata questions, their API version and their option
//! help text, used for capability checks and option filtering.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::dispatch::DispatchTable;
use crate::error::{EngineError, ProbeError};
use crate::options::{FuseArgs, Modifier};

/// Metadata an engine reports about itself.
pub trait EngineProbe {
    /// The engine's API version.
    fn api_version(&self) -> Result<u32, ProbeError>;

    /// The engine's option help, as printed for `-ho`.
    fn help_text(&self) -> Result<String, ProbeError>;

    /// The options the engine understands, scraped from its help text.
    fn reference_options(&self) -> Result<FuseArgs, ProbeError> {
        Ok(FuseArgs::from_help_text(&self.help_text()?))
    }
}

/// An engine that runs the filesystem service loop.
pub trait Engine: EngineProbe {
    /// Runs the service loop until the filesystem is unmounted.
    ///
    /// `args` is the assembled command line, program name first. Errors are
    /// startup or session failures; errors inside dispatched operations
    /// never surface here.
    fn main(
        &self,
        table: DispatchTable,
        multithreaded: bool,
        args: &[OsString],
    ) -> Result<(), EngineError>;
}

/// Parses the first `API version: N` line in an engine's version output.
pub fn parse_api_version(output: &str) -> Result<u32, ProbeError> {
    static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)API version:?\s*(\S+)").expect("static regex is valid")
    });

    let caps = VERSION_RE.captures(output).ok_or(ProbeError::NoVersion)?;
    caps[1]
        .parse()
        .map_err(|_| ProbeError::InvalidVersion(caps[1].to_string()))
}

/// Probes an engine binary by running it.
///
/// Each probe spawns a short-lived process and reads its output to the
/// end before returning.
#[derive(Debug, Clone)]
pub struct ProcessProbe {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessProbe {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Extra arguments passed before the probe flag.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn run(&self, flag: &str) -> Result<(String, String), ProbeError> {
        debug!(program = %self.program.display(), flag, "Probing engine");
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(flag)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ProbeError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        // Help and version requests commonly exit non-zero; the output is
        // what matters.
        Ok((
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }
}

impl EngineProbe for ProcessProbe {
    fn api_version(&self) -> Result<u32, ProbeError> {
        let (stdout, stderr) = self.run(Modifier::ShowVersion.flag())?;
        parse_api_version(&stderr).or_else(|_| parse_api_version(&stdout))
    }

    fn help_text(&self) -> Result<String, ProbeError> {
        let (_, stderr) = self.run(Modifier::ShowHelp.flag())?;
        Ok(stderr)
    }
}
