// src/logging.rs
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Used when `RUST_LOG` is not set. Cycle summaries log under the `digest` target.
pub const DEFAULT_FILTER: &str = "news_digest=info,digest=info,warn";
pub const ENV_LOG_JSON: &str = "DIGEST_LOG_JSON";

/// Install the global subscriber: compact text, or JSON lines when
/// `DIGEST_LOG_JSON=1`. A subscriber installed earlier (e.g. by the hosting
/// runtime) is left in place.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var(ENV_LOG_JSON).is_ok_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
