//! Log setup. Stdout carries IPC responses, so logs always go to stderr.
//!
//! Verbosity comes from `HALAQA_LOG` (e.g. `HALAQA_LOG=debug`), default `info`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_ENV: &str = "HALAQA_LOG";

pub fn init() {
    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    // A second init (e.g. from a test harness) is not an error worth failing over.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(false),
        )
        .try_init();
}
