// src/scheduler.rs
//! Daily UTC run times with hot reload.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::job::{RunJob, Trigger};
use crate::sources::format_hhmm;

pub fn job_name(t: &NaiveTime) -> String {
    format!("Daily digest at {} UTC", format_hhmm(t))
}

/// Earliest run time strictly after `now`, with the schedule entry it came from.
pub fn next_fire(times: &[NaiveTime], now: DateTime<Utc>) -> Option<(DateTime<Utc>, NaiveTime)> {
    let today = now.date_naive();
    times
        .iter()
        .filter_map(|t| {
            let mut at = today.and_time(*t).and_utc();
            if at <= now {
                at = today.checked_add_days(Days::new(1))?.and_time(*t).and_utc();
            }
            Some((at, *t))
        })
        .min_by_key(|(at, _)| *at)
}

pub struct Scheduler {
    times: watch::Sender<Vec<NaiveTime>>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Start the scheduling task. Each fire runs the job in the background
    /// so a long cycle never delays the next computation.
    pub fn spawn(job: Arc<RunJob>, times: Vec<NaiveTime>) -> Self {
        log_schedule(&times);
        let (tx, mut rx) = watch::channel(times);
        let handle = tokio::spawn(async move {
            loop {
                let times = rx.borrow_and_update().clone();
                let Some((at, t)) = next_fire(&times, Utc::now()) else {
                    if rx.changed().await.is_err() {
                        break;
                    }
                    continue;
                };
                let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        let name = job_name(&t);
                        info!(job = %name, "scheduled run fired");
                        if job.clone().spawn_trigger(Trigger::Scheduled { name }).await.is_none() {
                            warn!("scheduled run skipped, a cycle is already running");
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Self { times: tx, handle }
    }

    pub fn times(&self) -> Vec<NaiveTime> {
        self.times.borrow().clone()
    }

    /// Replace the schedule. Returns `(removed, added)` entry counts.
    pub fn reload(&self, times: Vec<NaiveTime>) -> (usize, usize) {
        let old: BTreeSet<NaiveTime> = self.times.borrow().iter().copied().collect();
        let new: BTreeSet<NaiveTime> = times.iter().copied().collect();
        let removed = old.difference(&new).count();
        let added = new.difference(&old).count();
        log_schedule(&times);
        self.times.send_replace(times);
        info!(removed, added, "schedule reloaded");
        (removed, added)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn log_schedule(times: &[NaiveTime]) {
    if times.is_empty() {
        info!("no scheduled runs configured");
    } else {
        info!(jobs = ?times.iter().map(job_name).collect::<Vec<_>>(), "scheduled runs");
    }
}
