use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{fmt, EnvFilter};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Install the tracing subscriber. Logs go to stderr so listings and
/// `--json` output on stdout stay clean.
///
/// `RUST_LOG` wins when set; otherwise `debug` selects DEBUG for this
/// crate and INFO for everything else.
pub fn init(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("info,cloudfs_lib=debug,cloudfs=debug")
        } else {
            EnvFilter::new("warn,cloudfs_lib=info")
        }
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_timer(fmt::time::SystemTime)
        .with_level(true)
        .with_target(true)
        .try_init();
}

pub fn set_verbose(enabled: bool) {
    VERBOSE.store(enabled, Ordering::SeqCst);
}

pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::SeqCst)
}
