//! `agentdesk` -- command-line client for the coding agent.
//!
//! Submits a request to the agent, follows its progress over the agent
//! WebSocket, and reports the outcome. Configuration comes from the
//! environment (see `ClientConfig::from_env`); a `.env` file is honoured.
//!
//! Exit codes for `submit`: `0` succeeded, `1` failed or rejected,
//! `2` timed out waiting for the agent, `130` interrupted.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agentdesk_client::api::{AgentApi, JobApi};
use agentdesk_client::config::ClientConfig;
use agentdesk_client::connection::WsConnectionRegistry;
use agentdesk_client::events::SessionEvent;
use agentdesk_client::session::{AgentSession, SessionHandle};
use agentdesk_client::submitter::SubmitRequest;
use agentdesk_client::transport::WsConnector;
use agentdesk_core::models::{default_model, MODELS};

/// How long `submit` waits for the first connection before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for the post-success record refresh.
const RECONCILE_WAIT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "agentdesk")]
#[command(about = "Submit work to the coding agent and follow its outcome")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the selectable target models
    Models,

    /// List projects and their remaining request quota
    Projects,

    /// Submit a request and wait for its outcome
    Submit {
        /// Project to run the request against
        #[arg(short, long)]
        project: String,

        /// Target model name (see `agentdesk models`)
        #[arg(short, long)]
        model: Option<String>,

        /// Identity to register with the agent (overrides AGENT_IDENTITY)
        #[arg(long)]
        identity: Option<String>,

        /// Request text
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentdesk=info,agentdesk_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::from_env().context("Invalid configuration")?;

    match cli.command {
        Command::Models => {
            list_models();
            Ok(ExitCode::SUCCESS)
        }
        Command::Projects => {
            list_projects(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Submit {
            project,
            model,
            identity,
            prompt,
        } => {
            let request = SubmitRequest {
                project_id: project,
                payload: prompt.join(" "),
                model,
            };
            submit(config, identity, request).await
        }
    }
}

fn list_models() {
    let default = default_model();
    for model in MODELS {
        let marker = if model.name == default.name { " (default)" } else { "" };
        println!(
            "{:<8} {:<24} {}{}",
            model.model_type, model.name, model.display_name, marker
        );
    }
}

async fn list_projects(config: &ClientConfig) -> anyhow::Result<()> {
    let api = AgentApi::new(config.api_url.clone(), config.access_token.clone());
    let projects = api
        .fetch_projects()
        .await
        .context("Failed to fetch projects")?;

    if projects.is_empty() {
        println!("No projects.");
        return Ok(());
    }
    for project in &projects {
        let repo = project
            .repo
            .as_ref()
            .map(|r| r.full_name.as_str())
            .unwrap_or("-");
        println!(
            "{:<26} {:<40} {:>4} requests left  {:>3} pull requests",
            project.id,
            repo,
            project.requests_available,
            project.fulfilled_chats().len()
        );
    }
    Ok(())
}

async fn submit(
    config: ClientConfig,
    identity: Option<String>,
    request: SubmitRequest,
) -> anyhow::Result<ExitCode> {
    let cancel = CancellationToken::new();
    let api = Arc::new(AgentApi::new(
        config.api_url.clone(),
        config.access_token.clone(),
    ));
    let registry = WsConnectionRegistry::start(
        WsConnector::new(config.ws_url.clone()),
        config.reconnect.clone(),
        &cancel,
    );
    let (session, join) = AgentSession::spawn(registry.clone(), api, &config, &cancel);
    let mut events = session.subscribe();

    if let Some(identity) = identity {
        session.bind_identity(identity).await?;
    }

    let outcome = tokio::select! {
        outcome = run_submission(&session, &mut events, request) => outcome,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted; the agent may still finish the request.");
            Ok(ExitCode::from(130))
        }
    };

    session.shutdown();
    let _ = join.await;
    registry.shutdown().await;
    cancel.cancel();
    outcome
}

async fn run_submission(
    session: &SessionHandle,
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    request: SubmitRequest,
) -> anyhow::Result<ExitCode> {
    wait_connected(events).await?;

    let job_id = match session.submit(request.clone()).await {
        Ok(job_id) => job_id,
        Err(e) => {
            eprintln!("{e}");
            return Ok(ExitCode::FAILURE);
        }
    };
    println!("Request submitted (job {job_id}); waiting for the agent...");

    loop {
        match events.recv().await {
            Ok(SessionEvent::JobProgress { message, .. }) => println!("  {message}"),
            Ok(SessionEvent::Disconnected { .. }) => {
                tracing::info!("Connection lost; reconnecting");
            }
            Ok(SessionEvent::JobSucceeded { result, .. }) => {
                println!("{}", result.message);
                if !result.pull_request_url.is_empty() {
                    println!("Pull request: {}", result.pull_request_url);
                }
                report_remaining(session, events, &request.project_id).await;
                return Ok(ExitCode::SUCCESS);
            }
            Ok(SessionEvent::JobFailed { detail, .. }) => {
                eprintln!("Agent error: {detail}");
                return Ok(ExitCode::FAILURE);
            }
            Ok(SessionEvent::JobTimedOut { advisory, .. }) => {
                eprintln!("{advisory}");
                return Ok(ExitCode::from(2));
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Missed session events");
            }
            Err(RecvError::Closed) => bail!("Agent session stopped unexpectedly"),
        }
    }
}

async fn wait_connected(
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
) -> anyhow::Result<()> {
    let connected = async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Connected { .. }) => return Ok(()),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => bail!("Agent session stopped unexpectedly"),
            }
        }
    };
    tokio::time::timeout(CONNECT_TIMEOUT, connected)
        .await
        .context("Failed to connect to the agent")?
}

async fn report_remaining(
    session: &SessionHandle,
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    project_id: &str,
) {
    let refreshed = tokio::time::timeout(RECONCILE_WAIT, async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::RecordsRefreshed { .. }) => return true,
                Err(RecvError::Closed) => return false,
                _ => continue,
            }
        }
    })
    .await
    .unwrap_or(false);

    if refreshed {
        if let Some(left) = session.records().borrow().requests_available(project_id) {
            println!("Requests left on this project: {left}");
        }
    }
}
