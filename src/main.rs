use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sabertooth_runtime::config::RuntimeConfig;

/// Drive a Sabertooth dual motor controller from zenoh velocity commands
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON config file (missing fields use defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port of the controller
    #[arg(short, long)]
    port: Option<String>,

    /// Packet Serial address (128..=135)
    #[arg(short, long)]
    address: Option<u8>,

    /// Run against a simulated controller instead of hardware
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match RuntimeConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Config error: {}", e);
                std::process::exit(2);
            }
        },
        None => RuntimeConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(address) = args.address {
        config.address = address;
    }
    config.simulate |= args.simulate;

    if let Err(e) = sabertooth_runtime::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
