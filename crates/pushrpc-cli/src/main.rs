//! PushRPC CLI - talk to an MCP server over an SSE stream.
//!
//! Every subcommand connects, runs the MCP handshake, issues its request,
//! and disconnects. Command output goes to stdout; logs go to stderr.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pushrpc_core::{ClientInfo, McpClient, SseTransport, TransportConfig, TransportDefaults};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "pushrpc")]
#[command(about = "Call tools on an MCP server reachable over SSE")]
struct Args {
    /// Stream URL of the server (scheme optional)
    #[arg(short, long, default_value = TransportDefaults::BASE_URL)]
    url: String,

    /// Seconds to wait for the session to be announced
    #[arg(long, default_value = "5")]
    handshake_timeout: u64,

    /// Seconds to wait for each response
    #[arg(long, default_value = "30")]
    request_timeout: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Client name sent during initialization
    #[arg(long, default_value = "pushrpc")]
    client_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// List the tools the server offers
    Tools,

    /// Call a tool and print its text output
    Call {
        /// Tool name
        name: String,

        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Send an arbitrary request and print the outcome as JSON
    Raw {
        /// JSON-RPC method
        method: String,

        /// Request params as JSON
        #[arg(long, default_value = "{}")]
        params: String,
    },
}

impl Args {
    fn transport_config(&self) -> Result<TransportConfig> {
        if self.handshake_timeout == 0 || self.request_timeout == 0 {
            bail!("timeouts must be at least one second");
        }

        let config = TransportConfig::new(&self.url)?
            .with_handshake_timeout(Duration::from_secs(self.handshake_timeout))
            .with_request_timeout(Duration::from_secs(self.request_timeout));
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging on stderr so stdout carries only results
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = args.transport_config()?;
    debug!("Using {:?}", config);

    let client_info = ClientInfo::new(&args.client_name, env!("CARGO_PKG_VERSION"));
    let client = McpClient::new(SseTransport::new(config)?).with_client_info(client_info);

    client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", args.url))?;

    let result = run(&client, args.command).await;
    client.disconnect();
    result
}

async fn run(client: &McpClient, command: Command) -> Result<()> {
    match command {
        Command::Tools => {
            for tool in client.list_tools().await? {
                match tool.description {
                    Some(description) => println!("{}\t{}", tool.name, description),
                    None => println!("{}", tool.name),
                }
            }
        }
        Command::Call { name, args } => {
            let arguments = parse_json("--args", &args)?;
            let result = client.call_tool(&name, arguments).await?;
            println!("{}", result.text());
            if result.is_error {
                bail!("Tool {} reported an error", name);
            }
        }
        Command::Raw { method, params } => {
            let params = parse_json("--params", &params)?;
            let outcome = client.transport().request(&method, params).await?;
            println!("{}", serde_json::to_string_pretty(&outcome.to_json())?);
        }
    }

    Ok(())
}

fn parse_json(flag: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("{} is not valid JSON: {}", flag, raw))
}
