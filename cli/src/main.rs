//! solrpc CLI: watch ledger subscriptions from the terminal.
//!
//! Usage:
//! ```bash
//! # Print every new slot
//! solrpc watch slot --url wss://api.devnet.solana.com
//!
//! # Watch an account at confirmed commitment
//! solrpc watch account --url wss://api.devnet.solana.com \
//!     --address CM78CPUeXjn8o3yroDHxUtKsZZgoy4GPkPPXfouKNH12 --commitment confirmed
//! ```

mod logging;

use std::env;
use std::process;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use solrpc_ws::{
    Commitment, LogsFilter, SubscribeConfig, Subscription, WsClientConfig, WsStreamClient,
};

use crate::logging::{init_tracing, LogConfig};

const UNSUBSCRIBE_WAIT: Duration = Duration::from_secs(2);

/// Contents of the `--config` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CliConfig {
    client: WsClientConfig,
    log: LogConfig,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "watch" => cmd_watch(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("solrpc {}", env!("CARGO_PKG_VERSION"));
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
    println!("solrpc {}", env!("CARGO_PKG_VERSION"));
    println!("Watch ledger subscriptions over WebSocket\n");
    println!("USAGE:");
    println!("    solrpc <COMMAND>\n");
    println!("COMMANDS:");
    println!("    watch <CHANNEL>  Print notifications until Ctrl-C");
    println!("    version          Print version");
    println!("    help             Print this help\n");
    println!("CHANNELS:");
    println!("    account    --address <PUBKEY>");
    println!("    program    --address <PROGRAM_ID>");
    println!("    signature  --signature <SIG>");
    println!("    logs       [--mentions <PUBKEY>]");
    println!("    slot");
    println!("    root\n");
    println!("WATCH FLAGS:");
    println!("    --url <URL>           WebSocket endpoint  [required]");
    println!("    --commitment <LEVEL>  processed | confirmed | finalized");
    println!("    --config <FILE>       JSON file with `client` and `log` sections");
}

async fn cmd_watch(args: &[String]) -> Result<(), String> {
    let channel = args
        .first()
        .filter(|a| !a.starts_with("--"))
        .ok_or("watch needs a channel (account, program, signature, logs, slot, root)")?;
    let url = parse_flag(args, "--url").ok_or("--url is required")?;

    let config = match parse_flag(args, "--config") {
        Some(path) => load_config(&path)?,
        None => CliConfig::default(),
    };
    init_tracing(&config.log);

    let sub_config = match parse_flag(args, "--commitment") {
        Some(level) => SubscribeConfig::with_commitment(level.parse::<Commitment>()?),
        None => SubscribeConfig::default(),
    };

    tracing::debug!(%url, %channel, "starting watch");
    let client = WsStreamClient::connect(url.as_str(), config.client)
        .await
        .map_err(|e| e.to_string())?;

    let subscription = match channel.as_str() {
        "account" => {
            let address = parse_flag(args, "--address").ok_or("--address is required")?;
            client
                .account_subscribe(&address, sub_config, |_, n| print_json(&n))
                .await
        }
        "program" => {
            let address = parse_flag(args, "--address").ok_or("--address is required")?;
            client
                .program_subscribe(&address, sub_config, |_, n| print_json(&n))
                .await
        }
        "signature" => {
            let signature = parse_flag(args, "--signature").ok_or("--signature is required")?;
            client
                .signature_subscribe(&signature, sub_config, |_, n| print_json(&n))
                .await
        }
        "logs" => {
            let filter = match parse_flag(args, "--mentions") {
                Some(address) => LogsFilter::Mentions(vec![address]),
                None => LogsFilter::All,
            };
            client
                .logs_subscribe(filter, sub_config, |_, n| print_json(&n))
                .await
        }
        "slot" => client.slot_subscribe(|_, n| print_json(&n)).await,
        "root" => client.root_subscribe(|_, n| print_json(&n)).await,
        other => {
            let _ = client.close().await;
            return Err(format!("unknown channel: {other}"));
        }
    }
    .map_err(|e| e.to_string())?;

    let server_id = subscription.confirmed().await.map_err(|e| e.to_string())?;
    eprintln!("Subscribed to {channel} (subscription {server_id}), Ctrl-C to stop");

    watch_until_interrupted(&subscription).await?;

    subscription.unsubscribe().await.map_err(|e| e.to_string())?;
    let _ = tokio::time::timeout(
        UNSUBSCRIBE_WAIT,
        subscription.wait_for_status(|s| s.is_terminal()),
    )
    .await;
    client.close().await.map_err(|e| e.to_string())
}

/// Block until Ctrl-C, or until the subscription dies on its own.
async fn watch_until_interrupted(subscription: &Subscription) -> Result<(), String> {
    tokio::select! {
        signal = tokio::signal::ctrl_c() => signal.map_err(|e| e.to_string()),
        status = subscription.wait_for_status(|s| s.is_terminal()) => {
            let reason = subscription
                .last_error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| status.to_string());
            Err(format!("subscription ended: {reason}"))
        }
    }
}

fn load_config(path: &str) -> Result<CliConfig, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("{path}: {e}"))?;
    serde_json::from_str(&raw).map_err(|e| format!("{path}: {e}"))
}

fn print_json<T: Serialize>(value: &T) {
    println!("{}", serde_json::to_string(value).unwrap_or_default());
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_flag_reads_following_value() {
        let a = args(&["slot", "--url", "ws://localhost:8900"]);
        assert_eq!(parse_flag(&a, "--url").as_deref(), Some("ws://localhost:8900"));
        assert_eq!(parse_flag(&a, "--address"), None);
    }

    #[test]
    fn parse_flag_missing_value() {
        let a = args(&["slot", "--url"]);
        assert_eq!(parse_flag(&a, "--url"), None);
    }

    #[test]
    fn cli_config_sections_default() {
        let config: CliConfig =
            serde_json::from_str(r#"{"log":{"level":"debug","json":true}}"#).unwrap();
        assert_eq!(config.log.level, "debug");
        assert!(config.log.json);
        assert_eq!(config.client.max_message_bytes, WsClientConfig::default().max_message_bytes);
    }
}
