use anyhow::{Result, bail};
use clap::Parser;
use sockslite::{Socks5Server, auth::UserPass, config};
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "A lightweight SOCKS5 proxy", long_about = None)]
struct Args {
    /// Listener address
    #[arg(short, long, default_value = config::DEFAULT_LISTEN_ADDR)]
    listen: String,

    /// Username for SOCKS5 proxy
    #[arg(short, long)]
    username: Option<String>,

    /// Password for SOCKS5 proxy
    #[arg(short, long)]
    password: Option<String>,

    /// Seconds allowed for connecting to a target
    #[arg(long, default_value_t = config::DEFAULT_DIAL_TIMEOUT.as_secs())]
    dial_timeout: u64,

    /// Seconds allowed for a client to finish its handshake and request
    #[arg(long, default_value_t = config::DEFAULT_HANDSHAKE_TIMEOUT.as_secs())]
    handshake_timeout: u64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    // Check for auth and grab it if present
    let auth = match (args.username, args.password) {
        (Some(u), Some(p)) => Some(UserPass {
            username: u,
            password: p,
        }),
        (None, None) => None,
        _ => bail!("[ERR] must provide both username and password (or neither)"),
    };

    if args.dial_timeout == 0 || args.handshake_timeout == 0 {
        bail!("[ERR] timeouts must be at least one second");
    }

    // Instantiate server
    let mut server = Socks5Server::new(args.listen)
        .with_auth(auth)
        .with_dial_timeout(Duration::from_secs(args.dial_timeout))
        .with_handshake_timeout(Duration::from_secs(args.handshake_timeout));

    info!("Starting SOCKS5 proxy: {}", server.listen_addr());

    // Run until the accept loop fails or we are interrupted
    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
