//! Example filesystems for fuseshim.
//!
//! - [`hello`]: a read-only filesystem with a single file, using only
//!   stateless operations.
//! - [`xmp`]: a pass-through mirror of a host directory, using file and
//!   directory handle classes.

pub mod hello;
pub mod xmp;

use tracing_subscriber::EnvFilter;

/// Installs the stderr log subscriber. `RUST_LOG` overrides the default
/// level, which is `debug` when `debug` is set and `info` otherwise.
pub fn init_logging(debug: bool) {
    let filter = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
