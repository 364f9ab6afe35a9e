//! Electrum command-line client
//!
//! One-shot queries (version, balance, header, broadcast) and streaming
//! watch commands over a single session. Watch commands enable the
//! keep-alive timer and run until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_rustls::rustls;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use electrum_rpc::{Client, Options};

/// Electrum server CLI
#[derive(Parser)]
#[command(name = "electrum")]
#[command(about = "Query and watch Electrum index servers")]
#[command(version)]
struct Cli {
    /// Server address as host:port
    #[arg(long, short)]
    server: String,

    /// Wrap the connection in TLS, trusting the webpki root store
    #[arg(long)]
    tls: bool,

    /// Protocol version to speak (1.0, 1.1, or 1.2)
    #[arg(long, default_value = "1.2")]
    protocol: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show server software and protocol version
    Version,

    /// Show the server banner
    Banner,

    /// Show server features and endpoints
    Features,

    /// Show the donation address of the server operator
    Donation,

    /// List peer servers known to this server
    Peers,

    /// Show the confirmed and unconfirmed balance of an address
    Balance {
        /// Address to query
        address: String,
    },

    /// List the transaction history of an address
    History {
        /// Address to query
        address: String,
    },

    /// List the unspent outputs of an address
    Unspent {
        /// Address to query
        address: String,
    },

    /// Show the header of a block
    Header {
        /// Block height
        height: u64,
    },

    /// Estimate the fee, in coins per kilobyte, for confirmation within a
    /// number of blocks
    Fee {
        /// Confirmation target in blocks
        #[arg(default_value_t = 6)]
        blocks: u32,
    },

    /// Broadcast a raw transaction and print its hash
    Broadcast {
        /// Raw transaction in hex
        raw_tx: String,
    },

    /// Stream new block headers until interrupted
    #[command(name = "watch-headers")]
    WatchHeaders,

    /// Stream status changes for an address until interrupted
    #[command(name = "watch-address")]
    WatchAddress {
        /// Address to watch
        address: String,
    },
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn tls_config() -> Arc<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();

    let mut options = Options::new(cli.server.clone());
    options.protocol = cli.protocol.clone();
    options.keep_alive = matches!(
        cli.command,
        Commands::WatchHeaders | Commands::WatchAddress { .. }
    );
    if cli.tls {
        options.tls = Some(tls_config());
    }

    let client = Client::connect(options)
        .await
        .with_context(|| format!("failed to connect to {}", cli.server))?;

    let outcome = run_command(&client, cli.command).await;
    client.close();
    outcome
}

async fn run_command(client: &Client, command: Commands) -> Result<()> {
    match command {
        Commands::Version => {
            let version = client.server_version().await?;
            if version.protocol.is_empty() {
                println!("{}", version.software);
            } else {
                println!("{} (protocol {})", version.software, version.protocol);
            }
        }
        Commands::Banner => println!("{}", client.server_banner().await?),
        Commands::Features => {
            let info = client.server_features().await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Donation => println!("{}", client.server_donation_address().await?),
        Commands::Peers => {
            for peer in client.server_peers().await? {
                println!("{}\t{}\t{}", peer.address, peer.name, peer.features.join(","));
            }
        }
        Commands::Balance { address } => {
            let balance = client.address_balance(&address).await?;
            println!("confirmed: {}", balance.confirmed);
            println!("unconfirmed: {}", balance.unconfirmed);
        }
        Commands::History { address } => {
            let history = client.address_history(&address).await?;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
        Commands::Unspent { address } => {
            let unspent = client.address_list_unspent(&address).await?;
            println!("{}", serde_json::to_string_pretty(&unspent)?);
        }
        Commands::Header { height } => {
            let header = client.block_header(height).await?;
            println!("{}", serde_json::to_string_pretty(&header)?);
        }
        Commands::Fee { blocks } => println!("{}", client.estimate_fee(blocks).await?),
        Commands::Broadcast { raw_tx } => {
            println!("{}", client.broadcast_transaction(&raw_tx).await?);
        }
        Commands::WatchHeaders => watch_headers(client).await?,
        Commands::WatchAddress { address } => watch_address(client, &address).await?,
    }
    Ok(())
}

async fn watch_headers(client: &Client) -> Result<()> {
    let (handle, mut headers) = client.notify_block_headers().await?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            header = headers.recv() => match header {
                Some(header) => println!("{}", serde_json::to_string(&header)?),
                None => break,
            },
        }
    }
    client.unsubscribe(&handle);
    Ok(())
}

async fn watch_address(client: &Client, address: &str) -> Result<()> {
    let (handle, mut statuses) = client.notify_address_transactions(address).await?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            status = statuses.recv() => match status {
                Some(status) => println!("{status}"),
                None => break,
            },
        }
    }
    client.unsubscribe(&handle);
    Ok(())
}
