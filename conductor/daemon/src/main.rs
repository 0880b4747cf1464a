//! npc-studio - Streamed Command Execution from the Terminal
//!
//! The privileged process of npc-studio. It hosts the streaming core and
//! either serves it to UI surfaces over a Unix socket, or acts as a surface
//! itself.
//!
//! # Usage
//!
//! ```bash
//! # Serve surfaces on the default socket
//! npc-studio serve
//!
//! # Interactive chat in this terminal
//! npc-studio chat --model qwen2.5
//!
//! # One streamed answer
//! npc-studio ask "summarize README.md"
//!
//! # Listings
//! npc-studio models --json
//! npc-studio npcs --project .
//!
//! # Verbose logging (stderr)
//! RUST_LOG=debug npc-studio chat
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: graceful shutdown of `serve`
//! - `SIGINT` in `chat`/`ask`: interrupt the answer being streamed

mod chat;
mod commands;
mod server;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use studio_core::backend::NpcScope;
use studio_core::{
    default_config_path, default_socket_path, load_config_from_path, Conductor, ConductorConfig,
    ConfigOverrides, ConversationId, NpcServeBackend, StudioConfig,
};

use chat::{LineSurface, StreamEnd};
use commands::Format;
use server::DaemonServer;

/// npc-studio - streamed command execution against npc serve
#[derive(Parser, Debug)]
#[command(name = "npc-studio")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "NPC_STUDIO_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Backend base URL
    #[arg(long, value_name = "URL", global = true)]
    base_url: Option<String>,

    /// Model used when a command names none
    #[arg(short = 'm', long, global = true)]
    model: Option<String>,

    /// NPC used when a command names none
    #[arg(short = 'n', long, global = true)]
    npc: Option<String>,

    /// Seconds without data before a stream fails (0 disables)
    #[arg(long, value_name = "SECS", global = true)]
    idle_timeout: Option<u64>,

    /// Print listings as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "NPC_STUDIO_LOG_LEVEL", default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve UI surfaces over a Unix socket
    Serve {
        /// Unix socket path for surface connections
        #[arg(short = 's', long, value_name = "PATH")]
        socket_path: Option<PathBuf>,
    },

    /// Interactive chat in this terminal
    Chat {
        /// Continue an existing conversation
        #[arg(long, value_name = "ID")]
        conversation: Option<String>,
    },

    /// Stream the answer to one command
    Ask {
        /// The command
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Run one command without streaming
    Exec {
        /// The command
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// List models available for a directory
    Models {
        /// Directory (defaults to the configured base dir)
        #[arg(long, value_name = "PATH")]
        path: Option<String>,
    },

    /// List recorded conversations
    Conversations {
        /// Directory (defaults to the configured base dir)
        #[arg(long, value_name = "PATH")]
        path: Option<String>,
    },

    /// List the global NPC team, or a project's
    Npcs {
        /// Project directory
        #[arg(long, value_name = "PATH")]
        project: Option<String>,
    },

    /// Check that the backend is reachable
    Status,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(url) = &self.base_url {
            overrides = overrides.with_base_url(url.clone());
        }
        if let Some(model) = &self.model {
            overrides = overrides.with_model(model.clone());
        }
        if let Some(npc) = &self.npc {
            overrides = overrides.with_npc(npc.clone());
        }
        if let Some(secs) = self.idle_timeout {
            overrides = overrides.with_idle_timeout_secs(secs);
        }
        if let Command::Serve {
            socket_path: Some(path),
        } = &self.command
        {
            overrides = overrides.with_socket_path(path.clone());
        }
        overrides
    }

    fn format(&self) -> Format {
        if self.json {
            Format::Json
        } else {
            Format::Plain
        }
    }
}

/// Initialize logging with the specified level
///
/// Logs go to stderr so streamed answers on stdout stay clean.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "npc_studio={level},studio_daemon={level},studio_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

fn load_config(args: &Args) -> Result<StudioConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;
    info!(source = %config.source(), base_url = %config.base_url, "Configuration loaded");
    Ok(config)
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = load_config(&args)?;
    let backend = NpcServeBackend::from_config(&config)?;
    let format = args.format();
    let base_dir = config.base_dir.to_string_lossy().into_owned();

    let output = match args.command {
        Command::Serve { .. } => {
            info!(version = env!("CARGO_PKG_VERSION"), pid = std::process::id(), "npc-studio starting");
            let socket_path = config.socket_path.clone().unwrap_or_else(default_socket_path);
            let conductor = Conductor::new(backend, ConductorConfig::from(&config));
            DaemonServer::new(socket_path)
                .run(conductor, shutdown_signal())
                .await?;
            return Ok(());
        }

        Command::Chat { conversation } => {
            let conductor = Conductor::new(backend, ConductorConfig::from(&config));
            let mut surface = LineSurface::new(conductor, conversation.map(ConversationId::from));
            surface.run().await?;
            return Ok(());
        }

        Command::Ask { command } => {
            let conductor = Conductor::new(backend, ConductorConfig::from(&config));
            let mut surface = LineSurface::new(conductor, None);
            return match surface.ask(command.join(" ")).await? {
                StreamEnd::Completed | StreamEnd::Interrupted => Ok(()),
                StreamEnd::Errored(error) => Err(anyhow::anyhow!(error)),
            };
        }

        Command::Exec { command } => {
            commands::exec(&backend, &config, command.join(" "), format).await?
        }
        Command::Models { path } => {
            commands::models(&backend, path.as_deref().unwrap_or(&base_dir), format).await?
        }
        Command::Conversations { path } => {
            commands::conversations(&backend, path.as_deref().unwrap_or(&base_dir), format)
                .await?
        }
        Command::Npcs { project } => {
            let scope = match project {
                Some(current_path) => NpcScope::Project { current_path },
                None => NpcScope::Global,
            };
            commands::npcs(&backend, &scope, format).await?
        }
        Command::Status => commands::status(&backend, &config, format).await?,
    };

    println!("{output}");
    Ok(())
}
