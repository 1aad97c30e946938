//! Mounts a filesystem with one read-only file, `/hello`.
//!
//! ```text
//! hello /mnt/hello -f
//! cat /mnt/hello/hello
//! ```

// Use mimalloc for reduced allocation latency (enabled by default).
#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use fuseshim::{ParserConfig, Service};
use fuseshim_demos::hello::HelloFs;
use fuseshim_fuser::FuserEngine;

fn main() -> Result<()> {
    let config = ParserConfig::default()
        .program("hello")
        .version(concat!("hello ", env!("CARGO_PKG_VERSION")))
        .about("A filesystem holding a single read-only file");
    let mut service = Service::new(HelloFs, FuserEngine::new()).with_parser_config(config);
    service.parse_or_exit(std::env::args_os(), 1);

    fuseshim_demos::init_logging(service.fuse_args().has_flag("debug"));
    tracing::debug!(args = %service.fuse_args(), "Parsed command line");

    service.run(None).context("Failed to serve hello filesystem")
}
