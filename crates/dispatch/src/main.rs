//! Score submission demo binary.
//!
//! Submits one score to the dispatcher and polls until the job reaches a
//! terminal state. The HTTP surface lives elsewhere; this binary exercises
//! the same contract it would call.
//!
//! ```bash
//! RUST_LOG=info submit-score alice 42 3
//! ```

use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing_subscriber::EnvFilter;

use dispatch::{Dispatcher, DispatcherConfig, Submission};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let submission = parse_args().context("usage: submit-score <player_id> <score> <difficulty>")?;

    let config = DispatcherConfig::from_env();
    tracing::info!(
        work_dir = %config.pipeline.work_dir.display(),
        base_port = config.pipeline.base_port,
        "starting dispatcher"
    );
    let dispatcher = Dispatcher::builder().config(config).build();

    let job = dispatcher
        .submit(submission)
        .await
        .context("submission rejected")?;
    tracing::info!(job_id = %job.id, "submission accepted, waiting for proof");

    loop {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let job = dispatcher.get_status(&job.id).await?;
        tracing::info!(state = %job.state, "job status");

        if job.state.is_terminal() {
            println!("{}", serde_json::to_string_pretty(&job)?);
            match job.error_message {
                Some(error) => bail!("proof generation did not complete: {error}"),
                None => return Ok(()),
            }
        }
    }
}

fn parse_args() -> Result<Submission> {
    let mut args = std::env::args().skip(1);
    let player_id = args.next().context("missing player_id")?;
    let score: u32 = args
        .next()
        .context("missing score")?
        .parse()
        .context("score must be an integer")?;
    let difficulty: u8 = args
        .next()
        .context("missing difficulty")?
        .parse()
        .context("difficulty must be an integer")?;
    Ok(Submission::new(player_id, score, difficulty))
}
