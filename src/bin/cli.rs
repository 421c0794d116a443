use clap::{Parser, Subcommand};
use crossbeam_channel::bounded;
use std::error::Error;
use std::net::ToSocketAddrs;
use std::time::{Duration, Instant};

use btc_p2p::config::{Network, SessionConfig};
use btc_p2p::session::Session;
use btc_p2p::wire::codec::sha256d;
use btc_p2p::wire::{InvEntry, Payload};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "btc-p2p", version, about = "Talk to a single Bitcoin node over the P2P protocol")]
struct Cli {
    /// Peer to connect to, `host:port` or `host` for the network's default port.
    #[arg(long)]
    node: String,

    #[arg(long, default_value = "mainnet")]
    network: Network,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log transaction and block announcements.
    Watch {
        /// Stop after this many seconds; 0 runs until interrupted.
        #[arg(long, default_value_t = 0)]
        seconds: u64,
    },
    /// Announce a raw transaction and serve it when the peer asks.
    Broadcast {
        /// Serialized transaction, hex.
        #[arg(long)]
        tx: String,
        /// Transaction id (display order). Defaults to the double SHA-256 of
        /// the raw bytes, which is only correct for non-witness transactions.
        #[arg(long)]
        txid: Option<String>,
        /// How long to keep serving the transaction.
        #[arg(long, default_value_t = 30)]
        seconds: u64,
    },
    /// Request a transaction by id and print the peer's answer.
    GetTx {
        /// Transaction id (display order).
        #[arg(long)]
        txid: String,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let node = if cli.node.contains(':') {
        cli.node.clone()
    } else {
        format!("{}:{}", cli.node, cli.network.default_port())
    };
    let addr = node
        .to_socket_addrs()?
        .next()
        .ok_or("could not resolve address")?;

    let config = SessionConfig {
        watcher: !matches!(cli.command, Commands::Watch { .. }),
        ..SessionConfig::for_network(cli.network)
    };

    info!(%addr, network = %cli.network, "connecting");
    let session = Session::over_tcp(config, addr);

    match cli.command {
        Commands::Watch { seconds } => watch(&session, seconds)?,
        Commands::Broadcast { tx, txid, seconds } => broadcast(&session, &tx, txid.as_deref(), seconds)?,
        Commands::GetTx { txid } => get_tx(&session, &txid)?,
    }

    session.shutdown();
    Ok(())
}

/// Parses a 32-byte hash given in display (byte-reversed) order.
fn parse_hash(hash_hex: &str) -> Result<[u8; 32], Box<dyn Error>> {
    let mut hash = hex::decode(hash_hex)?;
    if hash.len() != 32 {
        return Err(format!("expected 32 bytes, got {}", hash.len()).into());
    }
    hash.reverse();

    let mut arr = [0u8; 32];
    arr.copy_from_slice(&hash);
    Ok(arr)
}

fn watch(session: &Session, seconds: u64) -> Result<(), Box<dyn Error>> {
    session.on_tx_inventory(|entries| {
        for entry in entries {
            println!("tx    {}", entry.hash_hex());
        }
    });
    session.on_status_changed(|| info!("connection status changed"));

    session.connect()?;
    info!(
        start_height = session.peer_start_height(),
        witness = session.peer_uses_witness(),
        "handshake complete"
    );

    let blocks = session
        .block_inventory()
        .ok_or("block inventory is disabled for watchers")?;
    let deadline = (seconds > 0).then(|| Instant::now() + Duration::from_secs(seconds));

    loop {
        let wait = match deadline {
            Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                Some(left) => left,
                None => break,
            },
            None => Duration::from_secs(60),
        };

        match blocks.recv_timeout(wait) {
            Ok(batch) => {
                for entry in batch {
                    println!("block {}", entry.hash_hex());
                }
            }
            Err(e) if e.is_disconnected() => break,
            Err(_) => {}
        }
    }

    Ok(())
}

fn broadcast(session: &Session, tx_hex: &str, txid: Option<&str>, seconds: u64) -> Result<(), Box<dyn Error>> {
    let raw = hex::decode(tx_hex)?;
    let txid = match txid {
        Some(txid) => parse_hash(txid)?,
        None => sha256d(&raw),
    };

    let (rejected_tx, rejected) = bounded(1);
    session.on_tx_result(move |payload| {
        if let Payload::Reject(reject) = payload {
            let _ = rejected_tx.try_send(reject);
        }
    });

    session.connect()?;
    session.broadcast_tx(txid, raw)?;
    println!("announced {}", InvEntry::tx(txid).hash_hex());

    match rejected.recv_timeout(Duration::from_secs(seconds)) {
        Ok(reject) => warn!(code = ?reject.code, reason = %reject.reason, "peer rejected the transaction"),
        Err(_) if session.pending_getdata().is_empty() => println!("peer fetched the transaction"),
        Err(_) => println!("peer did not request the transaction"),
    }

    Ok(())
}

fn get_tx(session: &Session, txid_hex: &str) -> Result<(), Box<dyn Error>> {
    let txid = parse_hash(txid_hex)?;

    let (result_tx, result) = bounded(1);
    session.on_tx_result(move |payload| {
        let _ = result_tx.try_send(payload);
    });

    session.connect()?;
    session.fetch_tx(txid)?;

    match result.recv_timeout(Duration::from_secs(30))? {
        Payload::Tx(raw) => println!("{}", hex::encode(raw)),
        Payload::Reject(reject) => println!("rejected ({:?}): {}", reject.code, reject.reason),
        other => println!("Received (ignored): {:?}", other),
    }

    Ok(())
}
