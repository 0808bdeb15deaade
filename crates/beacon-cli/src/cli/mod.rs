//! CLI entry and dispatch.

use anyhow::{Context, Result};
use beacon_core::auth::Credentials;
use beacon_core::config;
use clap::Parser;

mod commands;

/// Returned when Ctrl-C ends a command; `main` exits with 130 for it.
#[derive(Debug)]
pub struct InterruptedError;

impl std::fmt::Display for InterruptedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Interrupted")
    }
}

impl std::error::Error for InterruptedError {}

#[derive(Parser)]
#[command(name = "beacon")]
#[command(version)]
#[command(about = "Dashboard session and job status client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override the API base URL from config
    #[arg(long, global = true, env = "BEACON_BASE_URL", value_name = "URL")]
    base_url: Option<String>,

    /// Log debug output to stderr (BEACON_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Dashboard credentials.
#[derive(clap::Args, Debug, Clone)]
struct LoginArgs {
    /// Account email
    #[arg(long, env = "BEACON_EMAIL")]
    email: String,

    /// Account password
    #[arg(long, env = "BEACON_PASSWORD", hide_env_values = true)]
    password: String,
}

impl From<LoginArgs> for Credentials {
    fn from(args: LoginArgs) -> Self {
        Credentials {
            email: args.email,
            password: args.password,
        }
    }
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Decode an access token and report its expiry
    Decode {
        /// The token (header.payload.signature)
        #[arg(value_name = "TOKEN")]
        token: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Sign in and keep the session refreshed until it ends or Ctrl-C
    Session {
        #[command(flatten)]
        login: LoginArgs,

        /// Exit right after signing in
        #[arg(long)]
        once: bool,
    },

    /// Sign in and poll a job until it reaches a terminal status
    Poll {
        /// Job identifier
        #[arg(value_name = "JOB_ID")]
        job_id: String,

        #[command(flatten)]
        login: LoginArgs,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
    /// Print a fresh config generated from defaults
    Generate,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    crate::logging::init(cli.verbose);

    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    let Cli {
        command,
        base_url,
        verbose: _,
    } = cli;

    let load = || -> Result<config::Config> {
        let mut config = config::Config::load().context("load config")?;
        if let Some(url) = base_url.as_deref() {
            config.auth.base_url = url.to_string();
        }
        Ok(config)
    };

    match command {
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
            ConfigCommands::Generate => commands::config::generate(),
        },

        Commands::Decode { token, json } => commands::decode::run(&token, json),

        Commands::Session { login, once } => {
            let config = load()?;
            commands::session::run(&config, &login.into(), once).await
        }

        Commands::Poll { job_id, login } => {
            let config = load()?;
            commands::poll::run(&config, &login.into(), &job_id).await
        }
    }
}
