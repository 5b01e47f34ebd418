use clap::{Args, Parser, Subcommand};
use gatelink::config::{load_config, ClientConfig};
use gatelink::GatewayClient;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gatelink")]
#[command(about = "Gateway client CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Send one request and print the response payload as JSON.
    Call {
        /// Method name, e.g. `health` or `sessions.list`
        method: String,

        /// Request params as a JSON value
        #[arg(long, short, value_name = "JSON")]
        params: Option<String>,

        #[command(flatten)]
        conn: ConnArgs,
    },

    /// Print gateway events until Ctrl-C.
    Watch {
        /// Only print events whose name starts with this prefix
        #[arg(long, short, value_name = "PREFIX")]
        filter: Option<String>,

        #[command(flatten)]
        conn: ConnArgs,
    },

    /// Connect, authenticate, and print the gateway's hello payload.
    Status {
        #[command(flatten)]
        conn: ConnArgs,
    },
}

#[derive(Args, Clone)]
struct ConnArgs {
    /// Config file path (default: GATELINK_CONFIG_PATH or ~/.gatelink/config.json)
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Gateway WebSocket URL
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// Gateway token (CLAWDBOT_GATEWAY_TOKEN takes precedence)
    #[arg(long)]
    token: Option<String>,

    /// Gateway password (CLAWDBOT_GATEWAY_PASSWORD takes precedence)
    #[arg(long)]
    password: Option<String>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("gatelink {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Call {
            method,
            params,
            conn,
        }) => {
            if let Err(e) = run_call(conn, method, params).await {
                log::error!("call failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Watch { filter, conn }) => {
            if let Err(e) = run_watch(conn, filter).await {
                log::error!("watch failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Status { conn }) => {
            if let Err(e) = run_status(conn).await {
                log::error!("status failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

/// Config file, then flags, then environment on top.
fn resolve_config(args: &ConnArgs) -> anyhow::Result<ClientConfig> {
    let (mut config, path) = load_config(args.config.clone())?;
    log::debug!("using config {}", path.display());
    if let Some(url) = &args.url {
        config.url = url.clone();
    }
    if let Some(token) = &args.token {
        config.auth.token = Some(token.clone());
    }
    if let Some(password) = &args.password {
        config.auth.password = Some(password.clone());
    }
    config.apply_env();
    Ok(config)
}

async fn run_call(args: ConnArgs, method: String, params: Option<String>) -> anyhow::Result<()> {
    let params = match params {
        Some(raw) => Some(
            serde_json::from_str::<serde_json::Value>(&raw)
                .map_err(|e| anyhow::anyhow!("--params is not valid JSON: {}", e))?,
        ),
        None => None,
    };
    let client = GatewayClient::new(resolve_config(&args)?)?;
    let result = client.request_connected::<serde_json::Value, _>(&method, params).await;
    client.shutdown().await;
    let payload = result?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

async fn run_watch(args: ConnArgs, filter: Option<String>) -> anyhow::Result<()> {
    let client = GatewayClient::new(resolve_config(&args)?)?;
    let _subscription = client.on_event(move |event| {
        if let Some(prefix) = &filter {
            if !event.event.starts_with(prefix.as_str()) {
                return;
            }
        }
        let line = serde_json::json!({
            "event": event.event,
            "seq": event.seq,
            "payload": event.payload(),
        });
        println!("{}", line);
    });
    client.ensure_connected().await?;
    log::info!("watching gateway events; Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    client.shutdown().await;
    Ok(())
}

async fn run_status(args: ConnArgs) -> anyhow::Result<()> {
    let config = resolve_config(&args)?;
    let url = config.url.clone();
    let client = GatewayClient::new(config)?;
    let connected = client.ensure_connected().await;
    let hello = client.hello();
    client.shutdown().await;
    connected?;
    println!("connected to {}", url);
    if let Some(hello) = hello {
        println!("{}", serde_json::to_string_pretty(&hello)?);
    }
    Ok(())
}
