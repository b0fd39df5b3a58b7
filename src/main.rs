mod cli;
mod server;
mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cortex::config::CortexConfig;

#[derive(Parser)]
#[command(name = "cortex", version, about = "Knowledge coordination layer for a personal assistant")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server
    Serve {
        /// stdio or http; overrides `server.transport`
        #[arg(long)]
        transport: Option<String>,
    },
    /// Inspect and switch identities
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },
    /// Control the active identity's graph service
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
    /// Compare local facts with the knowledge graph
    Audit {
        /// Re-issue graph writes for facts missing from the graph
        #[arg(long)]
        repair: bool,
    },
    /// Show fact store statistics for the active identity
    Stats,
}

#[derive(Subcommand)]
enum IdentityAction {
    /// Show the active identity
    Current,
    /// List registered identities
    List,
    /// Register a new identity
    Add {
        id: String,
        #[arg(long)]
        name: Option<String>,
        /// primary or bot
        #[arg(long, default_value = "primary")]
        role: String,
    },
    /// Make another identity active
    Switch { id: String },
}

#[derive(Subcommand)]
enum ServiceAction {
    Start,
    Stop,
    Restart,
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config (for log level)
    let mut config = CortexConfig::load()?;

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { transport } => {
            if let Some(transport) = transport {
                config.server.transport = transport;
            }
            match config.server.transport.as_str() {
                "http" => server::serve_http(config).await,
                "stdio" => server::serve_stdio(config).await,
                other => anyhow::bail!("unknown transport: {other}"),
            }
        }
        admin => run_admin(admin, config).await,
    }
}

async fn run_admin(command: Command, config: CortexConfig) -> Result<()> {
    let state = server::build_state(config)?;
    match command {
        Command::Serve { .. } => anyhow::bail!("serve is not an admin command"),
        Command::Identity { action } => match action {
            IdentityAction::Current => cli::identity::current(&state).await?,
            IdentityAction::List => cli::identity::list(&state).await?,
            IdentityAction::Add { id, name, role } => {
                cli::identity::add(&state, &id, name.as_deref(), &role).await?
            }
            IdentityAction::Switch { id } => cli::identity::switch(&state, &id).await?,
        },
        Command::Service { action } => match action {
            ServiceAction::Start => cli::service::start(&state).await?,
            ServiceAction::Stop => cli::service::stop(&state).await?,
            ServiceAction::Restart => cli::service::restart(&state).await?,
            ServiceAction::Status => cli::service::status(&state).await?,
        },
        Command::Audit { repair } => cli::audit::audit(&state, repair).await?,
        Command::Stats => cli::stats::stats(&state).await?,
    }

    Ok(())
}
