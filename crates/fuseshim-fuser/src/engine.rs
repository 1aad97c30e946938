//! The in-process engine: mounts a dispatch table with fuser.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use fuseshim::{DispatchTable, Engine, EngineError, EngineProbe, ProbeError};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::filesystem::ShimFs;
use crate::mount_args::MountArgs;
use crate::notify::Invalidator;

/// API version this engine reports; every capability in the built-in
/// graph is available at it.
pub const ENGINE_API_VERSION: u32 = 26;

/// Option help printed for `-ho`, in the layout option scraping reads.
pub const ENGINE_HELP: &str = "\
general options:
    -h   --help            print help
    -V   --version         print version

FUSE options:
    -d   -o debug          enable debug output (implies -f)
    -f                     foreground operation
    -s                     disable multi-threaded operation

    -o allow_other         allow access to other users
    -o allow_root          allow access to root
    -o auto_unmount        unmount when the process exits
    -o default_permissions enable permission checking by kernel
    -o fsname=NAME         set filesystem name
    -o subtype=NAME        set filesystem type
    -o ro                  mount read-only
    -o rw                  mount read-write
    -o [no]dev             allow device files
    -o [no]suid            allow setuid binaries
    -o [no]exec            allow executables
    -o [no]atime           update access times
    -o sync                synchronous writes
    -o async               asynchronous writes
    -o dirsync             synchronous directory updates
    -o attr_timeout=T      cache timeout for attributes (1.0 secs)
    -o entry_timeout=T     cache timeout for names (1.0 secs)
    -o max_read=N          set maximum size of read requests
";

/// Mounts dispatch tables through fuser.
#[derive(Debug, Clone, Default)]
pub struct FuserEngine {
    config: EngineConfig,
    invalidator: Invalidator,
}

impl FuserEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine whose defaults come from `config`. `-o` options on the
    /// command line still override them.
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            invalidator: Invalidator::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A handle for invalidating kernel caches of the filesystem this engine
    /// mounts. It connects once the session is up.
    pub fn invalidator(&self) -> Invalidator {
        self.invalidator.clone()
    }

    fn print_info(args: &[OsString], parsed: &MountArgs) {
        let program = args
            .first()
            .map_or_else(|| "fuseshim".into(), |p| p.to_string_lossy().into_owned());
        if parsed.show_help {
            eprintln!("usage: {program} mountpoint [options]\n");
            eprint!("{ENGINE_HELP}");
        }
        if parsed.show_version {
            eprintln!("fuser engine {}", env!("CARGO_PKG_VERSION"));
            eprintln!("API version: {ENGINE_API_VERSION}");
        }
    }
}

impl EngineProbe for FuserEngine {
    fn api_version(&self) -> Result<u32, ProbeError> {
        Ok(ENGINE_API_VERSION)
    }

    fn help_text(&self) -> Result<String, ProbeError> {
        Ok(ENGINE_HELP.to_string())
    }
}

impl Engine for FuserEngine {
    fn main(
        &self,
        table: DispatchTable,
        multithreaded: bool,
        args: &[OsString],
    ) -> Result<(), EngineError> {
        let parsed = MountArgs::parse(args)?;
        if parsed.informational() {
            Self::print_info(args, &parsed);
            return Ok(());
        }
        let mountpoint = parsed.mountpoint.as_deref().ok_or(EngineError::NoMountpoint)?;
        let mountpoint = std::fs::canonicalize(mountpoint).map_err(|source| EngineError::Mount {
            mountpoint: mountpoint.to_path_buf(),
            source,
        })?;

        let mut config = self.config.clone();
        let options = parsed.mount_options(&mut config);
        let multithreaded = multithreaded && !parsed.single_threaded;

        if !parsed.stay_in_foreground() {
            daemonize()?;
        }

        info!(
            mountpoint = %mountpoint.display(),
            multithreaded,
            operations = ?table.operations(),
            "Mounting filesystem"
        );
        let fs = ShimFs::new(table, config, multithreaded);
        run_session(fs, &mountpoint, &options, &self.invalidator)
    }
}

/// Mounts `fs` and serves requests until the filesystem is unmounted,
/// externally or by SIGINT/SIGTERM.
fn run_session(
    fs: ShimFs,
    mountpoint: &Path,
    options: &[fuser::MountOption],
    invalidator: &Invalidator,
) -> Result<(), EngineError> {
    let mount_error = |source: io::Error| EngineError::Mount {
        mountpoint: mountpoint.to_path_buf(),
        source,
    };

    let core = fs.core();
    let mut session = fuser::Session::new(fs, mountpoint, options).map_err(mount_error)?;
    invalidator.attach(session.notifier(), core);
    let mut unmounter = session.unmount_callable();
    let target: PathBuf = mountpoint.to_path_buf();
    if let Err(e) = ctrlc::set_handler(move || {
        info!(mountpoint = %target.display(), "Received signal, unmounting");
        if let Err(e) = unmounter.unmount() {
            warn!(error = %e, "Unmount failed");
        }
    }) {
        warn!(error = %e, "Failed to install signal handler");
    }

    info!(mountpoint = %mountpoint.display(), "Filesystem mounted");
    session.run().map_err(mount_error)?;
    info!(mountpoint = %mountpoint.display(), "Filesystem unmounted");
    Ok(())
}

#[cfg(target_os = "linux")]
fn daemonize() -> Result<(), EngineError> {
    tracing::debug!("Detaching from terminal");
    nix::unistd::daemon(false, false).map_err(|errno| EngineError::Io(errno.into()))
}

#[cfg(not(target_os = "linux"))]
fn daemonize() -> Result<(), EngineError> {
    warn!("Background operation is not supported here, staying in the foreground");
    Ok(())
}
