//! `beacon poll`: follow a job until it finishes.

use anyhow::{Context, Result};
use beacon_core::auth::{Credentials, HttpAuthApi, TokenManager};
use beacon_core::config::Config;
use beacon_core::poller::{HttpJobStatus, JobPoller, JobRecord, JobStatus};

use crate::cli::InterruptedError;

pub async fn run(config: &Config, credentials: &Credentials, job_id: &str) -> Result<()> {
    let api = HttpAuthApi::new(&config.auth).context("build auth client")?;
    let http = api.http().clone();
    let manager = TokenManager::builder(api)
        .policy(config.auth.refresh_policy())
        .build();
    manager
        .login(credentials)
        .await
        .with_context(|| format!("sign in as {}", credentials.email))?;

    let tokens = manager.clone();
    let status = HttpJobStatus::new(http, &config.auth, &config.poller, move || tokens.token());
    let poller = JobPoller::new(config.poller.poller_config(), move |id: String| {
        let status = status.clone();
        async move {
            let result = status.fetch(&id).await;
            match &result {
                Ok(record) => println!("{id}: {}", describe(record)),
                Err(err) => eprintln!("{id}: {err}"),
            }
            result
        }
    });

    let mut updates = poller.subscribe();
    poller.set_job(Some(job_id.to_string()));

    let finished = tokio::select! {
        state = updates.wait_for(|s| s.data.as_ref().is_some_and(JobStatus::is_terminal)) => {
            state.context("poller stopped")?.data.clone()
        }
        _ = tokio::signal::ctrl_c() => None,
    };
    drop(poller);
    manager.logout().await;

    match finished {
        Some(record) if record.status == "failed" => {
            anyhow::bail!("Job {job_id} failed")
        }
        Some(_) => Ok(()),
        None => {
            eprintln!("Interrupted while polling job {job_id}");
            Err(InterruptedError.into())
        }
    }
}

fn describe(record: &JobRecord) -> String {
    match record.progress {
        Some(progress) => format!("{} ({:.0}%)", record.status, progress * 100.0),
        None => record.status.clone(),
    }
}
