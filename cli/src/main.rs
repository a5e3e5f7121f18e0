//! chainpipe CLI — exercise a node connection from the terminal.
//!
//! Usage:
//! ```bash
//! # Connect, handshake and report capabilities + handshake latency
//! chainpipe ping --url wss://node.example.org:8547
//!
//! # One untracked query (hex payload in, hex payload out)
//! chainpipe query --url wss://node.example.org:8547 --payload 0a0b0c
//!
//! # Submit a tracked request and wait for its terminal status
//! chainpipe send --url wss://node.example.org:8547 --payload 0a0b0c
//!
//! # Subscribe to a topic and print events as they arrive
//! chainpipe watch --url wss://node.example.org:8547 --topic Transfer
//! ```

use std::env;
use std::process;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use chainpipe_core::CorrelationId;
use chainpipe_runtime::{ConnectOptions, NodeClient};
use chainpipe_ws::WsTransport;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "ping" => cmd_ping(&args[2..]).await,
        "query" => cmd_query(&args[2..]).await,
        "send" => cmd_send(&args[2..]).await,
        "watch" => cmd_watch(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("chainpipe {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainpipe {}", env!("CARGO_PKG_VERSION"));
    println!("Exercise a ChainPipe node connection\n");
    println!("USAGE:");
    println!("    chainpipe <COMMAND>\n");
    println!("COMMANDS:");
    println!("    ping       Connect, handshake and report capabilities");
    println!("    query      Send one untracked query (hex payload)");
    println!("    send       Submit a tracked request and wait for terminal status");
    println!("    watch      Subscribe to a topic and print events");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("COMMON FLAGS:");
    println!("    --url <URL>        Node endpoint  [required]");
    println!("    --auth <KEY>       Credentials for the handshake");
    println!("    --payload <HEX>    Request payload (query/send)");
    println!("    --topic <NAME>     Event topic (watch)");
    println!("    --timeout <SECS>   Wait bound (default 30)");
}

async fn connect(args: &[String]) -> Result<NodeClient> {
    let url = parse_flag(args, "--url").ok_or_else(|| anyhow!("--url is required"))?;
    let client = NodeClient::default();
    let transport = WsTransport::connect(&url, Duration::from_secs(10)).await?;
    let mut opts = ConnectOptions::new(&url);
    opts.auth_key = parse_flag(args, "--auth");
    client.connect(transport, opts).await?;
    Ok(client)
}

async fn cmd_ping(args: &[String]) -> Result<()> {
    let start = std::time::Instant::now();
    let client = connect(args).await?;
    let latency = start.elapsed();

    let state = client.state();
    println!("  Status:        connected");
    println!("  Handshake:     {}ms", latency.as_millis());
    println!("  Capabilities:  {}", state.capabilities.join(", "));

    client.destroy().await?;
    Ok(())
}

async fn cmd_query(args: &[String]) -> Result<()> {
    let payload = parse_payload(args)?;
    let client = connect(args).await?;
    let reply = client.send_non_blocking(payload).await?;
    println!("{}", to_hex(&reply));
    client.destroy().await?;
    Ok(())
}

async fn cmd_send(args: &[String]) -> Result<()> {
    let payload = parse_payload(args)?;
    let timeout = parse_flag(args, "--timeout")
        .map(|s| s.parse::<u64>())
        .transpose()
        .context("--timeout must be a number of seconds")?
        .unwrap_or(30);

    let client = connect(args).await?;
    let id = CorrelationId::generate();
    println!("  Correlation id: {id}");

    let record = client
        .send_blocking(id, payload, Duration::from_secs(timeout))
        .await?;

    println!("  Status:         {}", record.status);
    if let Some(result_id) = &record.result_id {
        println!("  Result id:      {result_id}");
    }
    if let Some(message) = &record.error_message {
        println!("  Error:          {message}");
    }
    println!("{}", serde_json::to_string_pretty(&record)?);

    client.destroy().await?;
    Ok(())
}

async fn cmd_watch(args: &[String]) -> Result<()> {
    let topic = parse_flag(args, "--topic").ok_or_else(|| anyhow!("--topic is required"))?;
    let client = connect(args).await?;
    client.subscribe(&topic)?;
    println!("Watching '{topic}' (Ctrl-C to stop)...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                for event in client.drain(&[topic.as_str()]) {
                    println!("{}", serde_json::to_string(&event)?);
                }
                if !client.is_connected() {
                    return Err(anyhow!("connection lost"));
                }
            }
        }
    }

    client.destroy().await?;
    Ok(())
}

fn parse_payload(args: &[String]) -> Result<Vec<u8>> {
    let hex = parse_flag(args, "--payload").unwrap_or_default();
    from_hex(hex.trim_start_matches("0x")).context("--payload must be hex")
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn from_hex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(anyhow!("odd-length hex string"));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(Into::into))
        .collect()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
