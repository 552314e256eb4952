//! News digest service: scheduled and on-demand digest cycles behind a
//! small HTTP control surface.

use news_digest::{app, config::DigestSettings, logging, metrics::Metrics};
use shuttle_axum::ShuttleAxum;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    logging::init();

    let settings = DigestSettings::load()?;
    let metrics = Metrics::init()?;
    let router = app::build_service(&settings, Some(&metrics))?;

    tracing::info!(
        max_parse_hours = settings.max_parse_hours,
        workers = settings.max_concurrent_workers,
        "news digest service ready"
    );
    Ok(router.into())
}
