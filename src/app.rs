// src/app.rs
//! Wiring of the concrete collaborators from configuration.

use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::axum::Router;
use tracing::{error, info, warn};

use crate::ai::OpenRouterClient;
use crate::api::{create_router, AppState};
use crate::checkpoint::JsonFileCheckpoint;
use crate::config::ai::AiConfig;
use crate::config::DigestSettings;
use crate::cycle::{CycleDeps, CycleOrchestrator, CycleSettings};
use crate::fetch::RssFetcher;
use crate::job::RunJob;
use crate::lock::RunLock;
use crate::metrics::Metrics;
use crate::notify::{DiscordChannel, DynChannel, FanoutChannel, LogChannel, TelegramChannel};
use crate::scheduler::Scheduler;
use crate::sources::{FileSourceLoader, JsonlFailureSink};

/// Orchestrator backed by files under `state_dir`, RSS feeds and OpenRouter.
pub fn build_orchestrator(settings: &DigestSettings) -> anyhow::Result<CycleOrchestrator> {
    let ai = AiConfig::load_or_default(&settings.ai_config_path)
        .with_context(|| format!("loading {}", settings.ai_config_path.display()))?;
    info!(
        filter_model = %ai.filter_model,
        final_model = %ai.final_model,
        base_url = %ai.base_url,
        "AI clients configured"
    );

    let deps = CycleDeps {
        sources: Arc::new(FileSourceLoader::new(&settings.sources_path)),
        fetcher: Arc::new(
            RssFetcher::new(settings.fetch_retry.policy())?
                .with_disable_after(settings.disable_feed_after),
        ),
        filter_ai: Arc::new(OpenRouterClient::from_config(&ai, &ai.filter_model)?),
        final_ai: Arc::new(OpenRouterClient::from_config(&ai, &ai.final_model)?),
        checkpoint: Arc::new(JsonFileCheckpoint::new(settings.checkpoint_path())),
        failures: Arc::new(JsonlFailureSink::new(settings.failures_path())),
    };
    Ok(CycleOrchestrator::new(deps, CycleSettings::from(settings)))
}

/// Every configured chat transport; the log when none is.
pub fn build_channel(settings: &DigestSettings) -> DynChannel {
    let mut channels: Vec<DynChannel> = Vec::new();
    if let Some(tg) = &settings.telegram {
        channels.push(Arc::new(TelegramChannel::new(
            tg.bot_token.clone(),
            tg.chat_id.clone(),
        )));
    }
    if let Some(d) = &settings.discord {
        channels.push(Arc::new(DiscordChannel::new(d.webhook_url.clone())));
    }
    match channels.len() {
        0 => {
            warn!("no chat channel configured, digests are written to the log");
            Arc::new(LogChannel)
        }
        1 => channels.remove(0),
        _ => Arc::new(FanoutChannel::new(channels)),
    }
}

pub fn build_job(settings: &DigestSettings, orchestrator: CycleOrchestrator) -> Arc<RunJob> {
    Arc::new(RunJob::new(
        Arc::new(orchestrator),
        RunLock::new(),
        build_channel(settings),
        settings.liveness_interval(),
        settings.no_news_message.clone(),
    ))
}

/// Full service: scheduler started, HTTP router returned. Must be called
/// from within a tokio runtime.
pub fn build_service(settings: &DigestSettings, metrics: Option<&Metrics>) -> anyhow::Result<Router> {
    let job = build_job(settings, build_orchestrator(settings)?);

    let times = match job.orchestrator().sources().load_schedule() {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "could not load schedule, starting without scheduled runs");
            Vec::new()
        }
    };
    let scheduler = Arc::new(Scheduler::spawn(job.clone(), times));

    Ok(create_router(AppState { job, scheduler }, metrics))
}
