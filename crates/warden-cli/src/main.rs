// ABOUTME: Entry point for the warden terminal client.
// ABOUTME: Loads config, opens a session controller and runs a line-based chat loop.

mod commands;
mod render;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;
use warden_stream::{
    ControllerConfig, HttpSessionIssuer, ProfileConfig, SessionController, SessionHandle,
    SessionIssuer, StaticSessionIssuer, StaticToken, StreamError,
};

use crate::commands::{Line, HELP};
use crate::render::Renderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProfileKind {
    Policy,
    PageHelp,
}

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Chat with the warden policy and page-help assistants")]
#[command(version)]
struct Cli {
    /// Config file path (defaults to ~/.config/warden/assistant.toml)
    #[arg(short, long, env = "WARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Streaming endpoint, overrides the config file
    #[arg(short, long, env = "WARDEN_ENDPOINT")]
    endpoint: Option<String>,

    /// Resume an existing session instead of starting a new one
    #[arg(short, long)]
    session: Option<String>,

    /// Assistant to talk to, overrides the config file
    #[arg(short, long, value_enum)]
    profile: Option<ProfileKind>,

    /// Policy to work on (policy assistant)
    #[arg(long)]
    policy_id: Option<String>,

    /// Console page to get help with (page-help assistant)
    #[arg(long)]
    page: Option<String>,

    /// Access token passed to the backend
    #[arg(long, env = "WARDEN_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log to stderr instead of the log file (-v: session controller, -vv: everything)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn load_config(&self) -> Result<ControllerConfig> {
        let path = self.config.clone().or_else(ControllerConfig::default_path);
        let mut config = match (&path, &self.endpoint) {
            (Some(path), _) if path.exists() => ControllerConfig::load_from(path)?,
            (Some(path), None) if self.config.is_some() => {
                bail!("config file {} does not exist", path.display())
            }
            (_, Some(endpoint)) => ControllerConfig::new(endpoint.clone()),
            (_, None) => bail!(
                "no endpoint configured; pass --endpoint or create {}",
                ControllerConfig::default_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "a config file".into())
            ),
        };

        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        self.apply_profile(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply_profile(&self, config: &mut ControllerConfig) {
        if let Some(kind) = self.profile {
            config.profile = match kind {
                ProfileKind::Policy => ProfileConfig::default(),
                ProfileKind::PageHelp => ProfileConfig::PageHelp { page: None },
            };
        }
        match &mut config.profile {
            ProfileConfig::Policy { policy_id, .. } => {
                if self.policy_id.is_some() {
                    *policy_id = self.policy_id.clone();
                }
            }
            ProfileConfig::PageHelp { page } => {
                if self.page.is_some() {
                    *page = self.page.clone();
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // stdout belongs to the conversation, so logs go to a file unless asked otherwise.
    let log_path = match cli.verbose {
        0 => warden_log::init_file("warden"),
        1 => {
            warden_log::init_for("warden-stream");
            None
        }
        _ => {
            warden_log::init();
            None
        }
    };

    // Idempotent; another crate may have installed one already.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = cli.load_config()?;
    tracing::info!(config = ?config, "Loaded configuration");

    let tokens = StaticToken::new(cli.token.clone());
    let issuer: Arc<dyn SessionIssuer> = match config.session_api_url()? {
        Some(api) => Arc::new(HttpSessionIssuer::new(api, tokens.clone())?),
        None => Arc::new(StaticSessionIssuer),
    };

    let session_id = match &cli.session {
        Some(id) => id.clone(),
        None => issuer
            .create_session()
            .await
            .context("Failed to start a session")?,
    };

    let endpoint: Url = config.endpoint_url()?;
    let handle = SessionController::new(config)?
        .with_issuer(issuer)
        .with_tokens(Arc::new(tokens))
        .spawn(session_id.clone());

    println!(
        "{} {} {}",
        "warden".bold(),
        endpoint.host_str().unwrap_or("assistant").dimmed(),
        format!("session {}", session_id).dimmed()
    );
    println!("{}", "Type /help for commands.".dimmed());

    let renderer = tokio::spawn(render_loop(handle.clone()));
    handle.connect().await?;

    let result = chat_loop(&handle, log_path).await;

    if let Err(e) = handle.shutdown().await {
        tracing::debug!(error = %e, "Controller already stopped");
    }
    let _ = renderer.await;
    result
}

async fn render_loop(handle: SessionHandle) {
    let mut rx = handle.subscribe();
    drop(handle);
    let mut renderer = Renderer::new();
    loop {
        let snapshot = rx.borrow_and_update().clone();
        let out = renderer.update(&snapshot);
        if !out.is_empty() {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(out.as_bytes());
            let _ = stdout.flush();
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}

async fn chat_loop(handle: &SessionHandle, log_path: Option<PathBuf>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match Line::parse(&line) {
            Line::Empty => {}
            Line::Text(text) => match handle.submit(text.clone()).await {
                Ok(()) => {}
                Err(StreamError::Rejected(rejection)) => {
                    println!("{} {}", "!".yellow().bold(), rejection);
                    println!("{}", format!("  not sent: {}", text).dimmed());
                }
                Err(e) => return Err(e.into()),
            },
            Line::Skip => {
                if handle.snapshot().pending_question.is_none() {
                    println!("{}", "No question to skip.".dimmed());
                } else if let Err(e) = handle.skip().await {
                    println!("{} {}", "!".yellow().bold(), e);
                }
            }
            Line::Stop => handle.stop().await?,
            Line::New => match handle.new_session().await {
                Ok(id) => tracing::info!(session_id = %id, "New session"),
                Err(e) => println!("{} {}", "x".red().bold(), e),
            },
            Line::Status => print_status(handle, log_path.as_ref()),
            Line::Help => println!("{}", HELP),
            Line::Quit => break,
            Line::Unknown(cmd) => {
                println!("{} unknown command /{} (try /help)", "!".yellow().bold(), cmd)
            }
        }
    }
    Ok(())
}

fn print_status(handle: &SessionHandle, log_path: Option<&PathBuf>) {
    let snapshot = handle.snapshot();
    println!("  session:    {}", snapshot.session_id);
    println!(
        "  connection: {:?}{}",
        snapshot.connection,
        if snapshot.validated { " (validated)" } else { "" }
    );
    println!(
        "  progress:   {:.0}% {:?}",
        snapshot.progress.value, snapshot.progress.status
    );
    println!("  phase:      {:?}", snapshot.phase);
    println!("  messages:   {}", snapshot.messages.len());
    if let Some(question) = &snapshot.pending_question {
        println!("  question:   {}", question.question);
    }
    if let Some(path) = log_path {
        println!("  log:        {}", path.display());
    }
}
