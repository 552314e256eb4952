// src/job.rs
//! Trigger handling around a cycle: single-flight gate, liveness signal,
//! status message, delivery of the result.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cycle::{CycleOrchestrator, CycleOutput};
use crate::lock::{Liveness, RunGuard, RunLock};
use crate::metrics as m;
use crate::notify::{DynChannel, MessageId, TypingSignal};

pub const ALREADY_RUNNING: &str = "⏳ Processing is already running. Please wait for it to finish.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Manual,
    Scheduled { name: String },
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Manual => f.write_str("manual"),
            Trigger::Scheduled { .. } => f.write_str("scheduled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// Another cycle held the lock. Nothing was run.
    Rejected,
    Completed(CycleOutput),
    /// The cycle panicked or its result could not be delivered.
    Crashed(String),
}

pub struct RunJob {
    orchestrator: Arc<CycleOrchestrator>,
    lock: RunLock,
    channel: DynChannel,
    liveness_interval: Duration,
    no_news_message: String,
}

impl RunJob {
    pub fn new(
        orchestrator: Arc<CycleOrchestrator>,
        lock: RunLock,
        channel: DynChannel,
        liveness_interval: Duration,
        no_news_message: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            lock,
            channel,
            liveness_interval,
            no_news_message: no_news_message.into(),
        }
    }

    pub fn lock(&self) -> &RunLock {
        &self.lock
    }

    pub fn orchestrator(&self) -> &Arc<CycleOrchestrator> {
        &self.orchestrator
    }

    /// Run a cycle for `trigger` and wait for it, unless one is already running.
    pub async fn trigger(&self, trigger: Trigger) -> TriggerOutcome {
        match self.lock.try_acquire() {
            Some(guard) => self.run_accepted(guard, trigger).await,
            None => {
                self.reject(&trigger).await;
                TriggerOutcome::Rejected
            }
        }
    }

    /// Like [`RunJob::trigger`], but the accepted cycle runs in the background.
    /// The lock is taken before returning, so `None` means rejected.
    pub async fn spawn_trigger(self: Arc<Self>, trigger: Trigger) -> Option<JoinHandle<TriggerOutcome>> {
        match self.lock.try_acquire() {
            Some(guard) => Some(tokio::spawn(async move {
                self.run_accepted(guard, trigger).await
            })),
            None => {
                self.reject(&trigger).await;
                None
            }
        }
    }

    async fn reject(&self, trigger: &Trigger) {
        warn!(%trigger, "processing already active, trigger rejected");
        counter!(m::TRIGGERS_REJECTED_TOTAL).increment(1);
        let mut text = ALREADY_RUNNING.to_string();
        if let Trigger::Scheduled { name } = trigger {
            text.push_str(&format!(
                "\n\n<i>(Scheduled run «{}» was skipped)</i>",
                html_escape::encode_text(name)
            ));
        }
        if let Err(e) = self.channel.send_message(&text).await {
            warn!(error = %e, "could not send already-running notice");
        }
    }

    async fn run_accepted(&self, guard: RunGuard, trigger: Trigger) -> TriggerOutcome {
        info!(%trigger, "lock acquired");
        let liveness = Liveness::spawn(
            Arc::new(TypingSignal(self.channel.clone())),
            self.liveness_interval,
        );

        let status: Option<MessageId> = match self
            .channel
            .send_message(&format!("🚀 Starting news processing… (trigger: {trigger})"))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "could not send start message");
                None
            }
        };

        let orchestrator = self.orchestrator.clone();
        let joined = tokio::spawn(async move { orchestrator.run().await }).await;
        liveness.stop().await;

        let outcome = match joined {
            Ok(output) => match self.deliver(&output).await {
                Ok(()) => TriggerOutcome::Completed(output),
                Err(e) => {
                    error!(error = %e, "delivering cycle result failed");
                    self.critical(&e).await;
                    TriggerOutcome::Crashed(e)
                }
            },
            Err(e) => {
                let reason = e.to_string();
                error!(error = %reason, "cycle crashed");
                self.critical(&reason).await;
                TriggerOutcome::Crashed(reason)
            }
        };

        if let Some(id) = status {
            match self.channel.delete_message(&id).await {
                Ok(()) => info!("start message deleted"),
                Err(e) => warn!(error = %e, "could not delete start message"),
            }
        }
        drop(guard);
        info!("lock released");
        outcome
    }

    async fn deliver(&self, output: &CycleOutput) -> Result<(), String> {
        let text = match output {
            CycleOutput::Digest(text) => text.as_str(),
            CycleOutput::NoNews => {
                info!("no new items to send");
                self.no_news_message.as_str()
            }
            CycleOutput::Failed(text) => text.as_str(),
        };
        self.channel
            .send_message(text)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn critical(&self, reason: &str) {
        let text = format!(
            "❌ <b>Critical error</b>\n\n<code>{}</code>",
            html_escape::encode_text(reason)
        );
        if let Err(e) = self.channel.send_message(&text).await {
            error!(error = %e, "could not even send the error notice");
        }
    }
}
