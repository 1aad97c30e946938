//! Userspace nullfs-alike: mirrors the tree under `-o root=PATH`.
//!
//! ```text
//! xmp /mnt/mirror -o root=/srv/data -f
//! ```

// Use mimalloc for reduced allocation latency (enabled by default).
#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use anyhow::{Context, Result};
use fuseshim::{MountOpt, Service};
use fuseshim_demos::xmp::{XmpDir, XmpFile, XmpFs};
use fuseshim_fuser::FuserEngine;
use tracing::info;

fn main() -> Result<()> {
    let service = Service::new(XmpFs::default(), FuserEngine::new());
    let config = service
        .single_thread_config()
        .program("xmp")
        .version(concat!("xmp ", env!("CARGO_PKG_VERSION")))
        .about("Mirror the filesystem tree from some point on");
    let mut service = service.with_parser_config(config);
    service.add_mount_opt(
        MountOpt::value("root")
            .default_value("/")
            .help("mirror filesystem from under PATH [default: /]"),
    )?;
    service.feature_assert(["stateful_io"])?;
    service.file_class::<XmpFile>().dir_class::<XmpDir>();

    let root = PathBuf::from(
        service
            .parse_or_exit(std::env::args_os(), 1)
            .get("root")
            .unwrap_or("/"),
    );
    fuseshim_demos::init_logging(service.fuse_args().has_flag("debug"));

    if service.fuse_args().mount_expected() {
        std::fs::metadata(&root)
            .with_context(|| format!("Can't stat root of underlying filesystem {}", root.display()))?;
    }
    info!(root = %root.display(), "Mirroring");
    service.fs().set_root(root);

    service.run(None).context("Failed to serve xmp filesystem")
}
