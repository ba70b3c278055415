// dnspipe entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dnspipe_analyzer::config::Config;
use dnspipe_analyzer::runtime;

#[derive(Parser)]
#[command(name = "dnspipe", version, about = "Offline/online DNS traffic analyzer")]
struct Cli {
    /// Configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Write a sample configuration file and exit.
    #[arg(long)]
    gen: bool,

    /// Enumerate capture devices and exit.
    #[arg(long)]
    devices: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.gen {
        Config::generate(&cli.config)?;
        println!("sample config {} generated", cli.config.display());
        return Ok(());
    }

    if cli.devices {
        return list_devices();
    }

    let cfg = Config::load(&cli.config)?;

    let default_level = if cfg.enable_debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!(config = %cli.config.display(), "starting dnspipe");
    runtime::run(cfg).await.context("pipeline terminated unexpectedly")
}

fn list_devices() -> anyhow::Result<()> {
    let devices = pcap::Device::list().context("enumerate capture devices")?;
    println!("Devices:");
    for device in devices {
        println!("#################");
        println!("Name------>{}", device.name);
        println!(
            "Description------>{}",
            device.desc.unwrap_or_default()
        );
        let addresses: Vec<String> = device
            .addresses
            .iter()
            .map(|a| {
                let netmask = a
                    .netmask
                    .map(|n| n.to_string())
                    .unwrap_or_default();
                format!("{} {}", a.addr, netmask)
            })
            .collect();
        println!("Addresses------>{}", addresses.join(" "));
        println!();
    }
    Ok(())
}
