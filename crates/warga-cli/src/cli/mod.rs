//! CLI entry and dispatch.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use warga_core::config::{self, Config};
use warga_core::identity::Registration;
use warga_core::logging;
use warga_core::provider::{IdentityProvider, RestProvider, SessionCache};
use warga_core::session::{SessionManager, SessionOptions};

mod commands;

use commands::session::SessionCommand;

#[derive(Parser)]
#[command(name = "warga")]
#[command(version = "0.1")]
#[command(about = "Warga village portal session client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use an in-memory backend with demo accounts instead of the hosted one
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Sign in and cache the session
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "WARGA_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Register a resident account
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long, env = "WARGA_PASSWORD", hide_env_values = true)]
        password: String,
        /// Full name as on the identity card
        #[arg(long)]
        full_name: String,
        /// National identity number
        #[arg(long)]
        nik: String,
        #[arg(long)]
        address: String,
        #[arg(long)]
        phone: Option<String>,
    },

    /// Sign out and clear the cached session
    Logout,

    /// Show the signed-in identity and profile
    Whoami,

    /// Interactive shell driving the session and navigation
    Shell,
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Config { command } => {
            return match command {
                ConfigCommands::Path => {
                    commands::config::path();
                    Ok(())
                }
                ConfigCommands::Init => commands::config::init(),
            };
        }
        Commands::Login { email, password } => SessionCommand::Login { email, password },
        Commands::Signup {
            email,
            password,
            full_name,
            nik,
            address,
            phone,
        } => SessionCommand::Signup(Registration {
            email,
            password,
            full_name,
            nik,
            address,
            phone,
        }),
        Commands::Logout => SessionCommand::Logout,
        Commands::Whoami => SessionCommand::Whoami,
        Commands::Shell => SessionCommand::Shell,
    };

    let config = Config::load().context("load config")?;
    // Held until exit so buffered file output is flushed.
    let _log_guard = logging::init(&config.log)?;

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    rt.block_on(async move { dispatch(command, cli.offline, &config).await })
}

async fn dispatch(command: SessionCommand, offline: bool, config: &Config) -> Result<()> {
    if offline {
        tracing::info!("using in-memory backend");
        return with_session(Arc::new(commands::session::demo_provider()), command, config).await;
    }

    let cache = SessionCache::new(config::paths::session_cache_path());
    let provider = RestProvider::new(&config.backend, Some(cache));
    with_session(Arc::new(provider), command, config).await
}

/// Runs `command` against a session manager that lives for the command only.
async fn with_session<P: IdentityProvider>(
    provider: Arc<P>,
    command: SessionCommand,
    config: &Config,
) -> Result<()> {
    let session = SessionManager::init(provider, SessionOptions::from(config));
    let result = commands::session::run(&session, command).await;
    session.dispose();
    result
}
