//! Run one cycle against the configured feeds and print the digest.
//!
//! `--deliver` sends the result to the configured chat channels instead,
//! going through the same single-flight job as the service.

use news_digest::app::{build_job, build_orchestrator};
use news_digest::config::DigestSettings;
use news_digest::cycle::CycleOutput;
use news_digest::job::{Trigger, TriggerOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    news_digest::logging::init();

    let settings = DigestSettings::load()?;
    let orchestrator = build_orchestrator(&settings)?;
    let deliver = std::env::args().any(|a| a == "--deliver");

    if deliver {
        let job = build_job(&settings, orchestrator);
        match job.trigger(Trigger::Manual).await {
            TriggerOutcome::Crashed(reason) => anyhow::bail!("cycle crashed: {reason}"),
            other => println!("{other:?}"),
        }
        return Ok(());
    }

    match orchestrator.run().await {
        CycleOutput::Digest(text) => println!("{text}"),
        CycleOutput::NoNews => println!("{}", settings.no_news_message),
        CycleOutput::Failed(text) => anyhow::bail!("{text}"),
    }
    Ok(())
}
