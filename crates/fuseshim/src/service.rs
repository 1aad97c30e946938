//! The service entry point tying parser, dispatch table and engine together.

use std::ffi::OsString;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::capability::CapabilityResolver;
use crate::dispatch::{DirHandle, DispatchBuilder, FileHandle};
use crate::engine::Engine;
use crate::error::{CapabilityError, ParseError, ServiceError};
use crate::filesystem::Filesystem;
use crate::options::FuseArgs;
use crate::parser::{
    MountOpt, OptionParser, ParsedCommandLine, ParserConfig, SingleThreadPolicy, ThreadingSwitch,
};

/// A filesystem service: one filesystem, one engine, one command line.
///
/// Everything a service needs is owned by it; several services can coexist
/// in one process without seeing each other's configuration.
pub struct Service<F: Filesystem, E: Engine> {
    builder: DispatchBuilder<F>,
    engine: E,
    parser: OptionParser,
    fuse_args: FuseArgs,
    threading: ThreadingSwitch,
    resolver: CapabilityResolver,
    cmdline: Option<ParsedCommandLine>,
}

impl<F: Filesystem, E: Engine> Service<F, E> {
    /// A service with a default parser, which rejects `-s`.
    pub fn new(fs: F, engine: E) -> Self {
        Self {
            builder: DispatchBuilder::new(Arc::new(fs)),
            engine,
            parser: OptionParser::default(),
            fuse_args: FuseArgs::new(),
            threading: ThreadingSwitch::new(),
            resolver: CapabilityResolver::default(),
            cmdline: None,
        }
    }

    /// Replaces the parser configuration. Declared sub-options are kept.
    #[must_use]
    pub fn with_parser_config(mut self, config: ParserConfig) -> Self {
        self.parser.set_config(config);
        self
    }

    /// A parser configuration whose `-s` flag switches this service to
    /// single-threaded mode.
    pub fn single_thread_config(&self) -> ParserConfig {
        ParserConfig::default().single_thread(SingleThreadPolicy::SetSingle(self.threading.clone()))
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: CapabilityResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Declares a custom sub-option on this service's parser.
    pub fn add_mount_opt(&mut self, opt: MountOpt) -> Result<&mut Self, ServiceError> {
        self.parser.add_mount_opt(opt)?;
        Ok(self)
    }

    /// Registers a file handle class.
    pub fn file_class<H: FileHandle<Fs = F>>(&mut self) -> &mut Self {
        self.builder.set_file_class::<H>();
        self
    }

    /// Registers a directory handle class.
    pub fn dir_class<D: DirHandle<Fs = F>>(&mut self) -> &mut Self {
        self.builder.set_dir_class::<D>();
        self
    }

    pub fn fs(&self) -> &Arc<F> {
        self.builder.fs()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn parser(&self) -> &OptionParser {
        &self.parser
    }

    pub fn threading(&self) -> &ThreadingSwitch {
        &self.threading
    }

    pub fn multithreaded(&self) -> bool {
        self.threading.multithreaded()
    }

    pub fn set_multithreaded(&mut self, on: bool) {
        self.threading.set_multithreaded(on);
    }

    pub fn fuse_args(&self) -> &FuseArgs {
        &self.fuse_args
    }

    pub fn fuse_args_mut(&mut self) -> &mut FuseArgs {
        &mut self.fuse_args
    }

    /// The result of the last successful [`parse`](Self::parse).
    pub fn cmdline(&self) -> Option<&ParsedCommandLine> {
        self.cmdline.as_ref()
    }

    /// Parses `args` (program name first) into this service's option set.
    pub fn parse<I, T>(&mut self, args: I) -> Result<&ParsedCommandLine, ParseError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cmdline = self.parser.parse_into(args, &mut self.fuse_args)?;
        Ok(self.cmdline.insert(cmdline))
    }

    /// Like [`parse`](Self::parse), but prints the error and exits the
    /// process with `code` on failure.
    pub fn parse_or_exit<I, T>(&mut self, args: I, code: i32) -> &ParsedCommandLine
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        match self.parser.parse_into(args, &mut self.fuse_args) {
            Ok(cmdline) => self.cmdline.insert(cmdline),
            Err(e) => {
                e.print();
                std::process::exit(code);
            }
        }
    }

    /// Fails unless the engine supports every named capability.
    pub fn feature_assert<I, S>(&self, names: I) -> Result<(), CapabilityError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.resolver.assert_supported(&self.engine, names)
    }

    /// Drops the options the engine does not list in its help, returning
    /// them.
    pub fn filter_options(&mut self) -> Result<FuseArgs, ServiceError> {
        let reference = self.engine.reference_options()?;
        let rejected = self.fuse_args.filter(&reference);
        if !rejected.has_no_options() {
            warn!(rejected = %rejected, "Dropping options the engine does not know");
        }
        Ok(rejected)
    }

    /// Builds the dispatch table and runs the engine's service loop.
    ///
    /// `explicit_args` replaces the assembled option arguments; an empty
    /// list counts as none. Without them, an engine failure is swallowed when the command line asked for
    /// no mount, e.g. help or version only.
    pub fn run(&mut self, explicit_args: Option<Vec<OsString>>) -> Result<(), ServiceError> {
        let table = self.builder.build();
        let multithreaded = self.threading.multithreaded();
        let explicit_args = explicit_args.filter(|args| !args.is_empty());
        let explicit = explicit_args.is_some();
        let args = match explicit_args {
            Some(args) => args,
            None => self.fuse_args.assemble(),
        };

        info!(
            operations = table.operations().len(),
            multithreaded,
            "Starting engine"
        );
        debug!(?args, "Engine arguments");

        match self.engine.main(table, multithreaded, &args) {
            Ok(()) => Ok(()),
            Err(e) if !explicit && !self.fuse_args.mount_expected() => {
                debug!(error = %e, "Ignoring engine error, no mount was requested");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
