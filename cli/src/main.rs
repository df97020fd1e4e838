mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use config::{default_config_path, Config, Overrides, Settings};

#[derive(Parser, Debug)]
#[command(name = "ptero-pilot")]
#[command(about = "Pterodactyl panel automation", long_about = None)]
struct Args {
    /// Panel base URL
    #[arg(long, env = "PTERODACTYL_URL", global = true)]
    panel_url: Option<String>,

    /// Application API key
    #[arg(long, env = "PTERODACTYL_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// Client API key (live stats and power signals)
    #[arg(long, env = "PTERODACTYL_CLIENT_KEY", global = true, hide_env_values = true)]
    client_key: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Retries for network, 5xx and 429 failures
    #[arg(long, global = true)]
    retries: Option<u32>,

    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Nodes
    #[command(subcommand)]
    Nodes(NodeCommand),
    /// Servers, including provisioning
    #[command(subcommand)]
    Servers(ServerCommand),
    /// Users
    #[command(subcommand)]
    Users(CrudCommand),
    /// Admin roles
    #[command(subcommand)]
    Roles(CrudCommand),
    /// Nests
    #[command(subcommand)]
    Nests(NestCommand),
    /// Mounts
    #[command(subcommand)]
    Mounts(MountCommand),
    /// Database hosts
    #[command(subcommand)]
    DatabaseHosts(DatabaseHostCommand),
    /// Locations
    #[command(subcommand)]
    Locations(CrudCommand),
    /// Node allocations (IP:port)
    #[command(subcommand)]
    Allocations(AllocationCommand),
    /// Eggs
    #[command(subcommand)]
    Eggs(EggCommand),
    /// Send a power signal through the client API
    Power {
        /// Short server identifier
        identifier: String,
        #[arg(value_enum)]
        signal: Signal,
    },
    /// Stream live usage as JSON lines
    Monitor {
        /// Short server identifier
        identifier: String,
        /// Poll interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Stop after this many snapshots
        #[arg(long)]
        count: Option<u64>,
    },
    /// Save connection settings to the config file
    Configure,
}

#[derive(Subcommand, Debug)]
pub enum CrudCommand {
    List,
    Get {
        id: u64,
    },
    Create {
        /// JSON body, or @file
        #[arg(long)]
        json: String,
    },
    Update {
        id: u64,
        /// JSON body, or @file
        #[arg(long)]
        json: String,
    },
    Delete {
        id: u64,
    },
}

#[derive(Subcommand, Debug)]
pub enum NodeCommand {
    #[command(flatten)]
    Crud(CrudCommand),
    /// Servers placed on the node
    Servers { id: u64 },
}

#[derive(Subcommand, Debug)]
pub enum NestCommand {
    #[command(flatten)]
    Crud(CrudCommand),
    /// Servers grouped by nest
    Servers,
}

#[derive(Subcommand, Debug)]
pub enum MountCommand {
    #[command(flatten)]
    Crud(CrudCommand),
    /// Servers the mount is attached to
    Servers { id: u64 },
    /// Nodes the mount is available on
    Nodes { id: u64 },
    /// Eggs the mount is available to
    Eggs { id: u64 },
}

#[derive(Subcommand, Debug)]
pub enum DatabaseHostCommand {
    #[command(flatten)]
    Crud(CrudCommand),
    /// Server databases living on the host
    Databases { id: u64 },
}

#[derive(Subcommand, Debug)]
pub enum ServerCommand {
    List,
    /// Server with all relationships
    Get {
        id: u64,
    },
    /// Raw create call; see `provision` for the guided flow
    Create {
        #[arg(long)]
        json: String,
    },
    Update {
        id: u64,
        #[arg(long, value_enum)]
        section: ServerSection,
        #[arg(long)]
        json: String,
    },
    #[command(alias = "destroy")]
    Delete {
        id: u64,
        /// Delete even if the daemon cannot be reached
        #[arg(long)]
        force: bool,
    },
    Suspend {
        id: u64,
    },
    Unsuspend {
        id: u64,
    },
    Reinstall {
        id: u64,
    },
    Databases {
        id: u64,
    },
    Provision(ProvisionArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ServerSection {
    Details,
    Build,
    Startup,
}

#[derive(ClapArgs, Debug)]
pub struct ProvisionArgs {
    #[arg(long)]
    pub name: String,
    /// Owner user id
    #[arg(long)]
    pub user: u64,
    #[arg(long)]
    pub node: u64,
    #[arg(long)]
    pub egg: u64,
    /// Looked up when omitted
    #[arg(long)]
    pub nest: Option<u64>,
    #[arg(long)]
    pub image: Option<String>,
    #[arg(long)]
    pub startup: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub external_id: Option<String>,
    /// Variable override, repeatable
    #[arg(long = "env", value_parser = output::parse_key_value)]
    pub env: Vec<(String, String)>,
    #[arg(long, default_value_t = 1024)]
    pub memory: i64,
    #[arg(long, default_value_t = 0)]
    pub swap: i64,
    #[arg(long, default_value_t = 5120)]
    pub disk: i64,
    #[arg(long, default_value_t = 500)]
    pub io: u32,
    #[arg(long, default_value_t = 100)]
    pub cpu: i64,
    #[arg(long, default_value_t = 5)]
    pub databases: u32,
    #[arg(long, default_value_t = 3)]
    pub backups: u32,
}

#[derive(Subcommand, Debug)]
pub enum AllocationCommand {
    List {
        node: u64,
        /// Only unassigned allocations
        #[arg(long)]
        free: bool,
    },
    Create {
        node: u64,
        #[arg(long)]
        ip: String,
        /// Ports and ranges, e.g. 25565,25570-25580
        #[arg(long)]
        ports: String,
        #[arg(long)]
        alias: Option<String>,
    },
    Delete {
        node: u64,
        allocation: u64,
    },
}

#[derive(Subcommand, Debug)]
pub enum EggCommand {
    List {
        /// Only this nest's eggs
        #[arg(long)]
        nest: Option<u64>,
    },
    /// Egg with its variables
    Get {
        egg: u64,
        #[arg(long)]
        nest: Option<u64>,
    },
    /// Servers built from the egg
    Servers { egg: u64 },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Signal {
    Start,
    Stop,
    Restart,
    Kill,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout carries JSON output only.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let config = Config::load(&config_path)?;
    debug!("Using config {:?}", config_path);

    let overrides = Overrides {
        panel_url: args.panel_url,
        api_key: args.api_key,
        client_key: args.client_key,
        timeout_secs: args.timeout_secs,
        retries: args.retries,
    };

    if let Command::Configure = args.command {
        return commands::configure(&overrides, config, &config_path);
    }

    let settings = Settings::resolve(&overrides, &config)?;
    let engine = ptero_pilot_engine::PanelEngine::new(&settings.credential, settings.options)
        .context("Failed to set up panel client")?;

    commands::run(&engine, args.command, settings.monitor_interval).await
}
