use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tsunagi::bridge::LifecycleController;
use tsunagi::bridge::bus::TcpBus;
use tsunagi::config::{
    self, BridgeConfig, BridgeSettings, BusConfig, ServerConfig, ServerMode, load_user_config,
};

/// Host the editor bus listens on
const BUS_HOST: &str = "127.0.0.1";

/// Bridge an editor message bus to a language server over TCP
#[derive(Parser)]
#[command(name = "tsunagi")]
#[command(version)]
#[command(about = "Bridge an editor message bus to a language server over TCP")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    bridge: BridgeArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as TOML and exit
    PrintConfig,
}

#[derive(Args)]
struct BridgeArgs {
    /// Extra configuration file, applied over the user config
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Language server host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Language server port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Workspace directory the server is started in
    #[arg(long, global = true, value_name = "DIR")]
    workspace: Option<PathBuf>,

    /// Attach to a running server instead of spawning one
    #[arg(long, global = true)]
    external_server: bool,

    /// Language server executable
    #[arg(long, global = true, value_name = "CMD")]
    server: Option<String>,

    /// Argument for the server executable ({host} and {port} are substituted); repeatable
    #[arg(long = "server-arg", global = true, value_name = "ARG", allow_hyphen_values = true)]
    server_args: Vec<String>,

    /// Bus port the editor sends requests on
    #[arg(long, global = true, value_name = "PORT")]
    bus_in_port: Option<u16>,

    /// Bus port the bridge publishes deliveries on
    #[arg(long, global = true, value_name = "PORT")]
    bus_out_port: Option<u16>,

    /// How long to keep retrying the server connection
    #[arg(long, global = true, value_name = "MS")]
    connect_timeout_ms: Option<u64>,

    /// Default log filter; RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info", value_name = "LEVEL")]
    log_level: String,
}

impl BridgeArgs {
    /// The command-line configuration layer.
    fn to_config(&self) -> BridgeConfig {
        let server = (self.server.is_some() || !self.server_args.is_empty()).then(|| ServerConfig {
            command: self.server.clone(),
            args: (!self.server_args.is_empty()).then(|| self.server_args.clone()),
        });
        let bus = (self.bus_in_port.is_some() || self.bus_out_port.is_some()).then(|| BusConfig {
            in_port: self.bus_in_port,
            out_port: self.bus_out_port,
        });

        BridgeConfig {
            host: self.host.clone(),
            port: self.port,
            workspace: self.workspace.clone(),
            server_mode: self.external_server.then_some(ServerMode::Attach),
            connect_timeout_ms: self.connect_timeout_ms,
            poll_timeout_ms: None,
            shutdown_timeout_ms: None,
            server,
            bus,
        }
    }
}

fn load_settings(args: &BridgeArgs) -> Result<BridgeSettings, config::ConfigError> {
    let user = load_user_config()?;
    let file = args
        .config
        .as_deref()
        .map(config::load_config_file)
        .transpose()?;
    config::resolve(&[user, file, Some(args.to_config())])
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.bridge.log_level))
        .init();

    let settings = match load_settings(&cli.bridge) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Some(Commands::PrintConfig) => match toml::to_string_pretty(&settings) {
            Ok(text) => print!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            if let Err(e) = run_bridge(settings).await {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn run_bridge(settings: BridgeSettings) -> tsunagi::BridgeResult<()> {
    let (source, sink) = TcpBus::connect(BUS_HOST, settings.bus.in_port, settings.bus.out_port).await?;
    let mut controller = LifecycleController::from_settings(&settings, source, sink)?;
    controller.start().await?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!(target: "tsunagi::lifecycle", "Interrupted, shutting down");
            on_signal.cancel();
        }
    });

    let report = controller.run(shutdown).await?;
    if !report.abandoned.is_empty() {
        log::warn!(
            target: "tsunagi::lifecycle",
            "Abandoned requests: {}",
            report
                .abandoned
                .iter()
                .map(|r| format!("{} ({})", r.id, r.method))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(())
}
