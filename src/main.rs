//! muxsim - manual control of the dual-ToR mux cable simulator
//!
//! Drives the same operations the test suite uses, one subcommand each, so a
//! testbed can be inspected or put back into shape by hand.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use muxsim::{ActiveSide, Config, DirectionSet, MuxSimulatorClient, Side};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "muxsim")]
#[command(about = "Control the dual-ToR mux cable simulator")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "muxsim.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the status of one port, or of every port
    Status {
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Toggle one port to upper_tor or lower_tor
    Toggle {
        #[arg(short, long)]
        interface: String,

        #[arg(short, long)]
        side: Side,
    },

    /// Toggle every port (upper_tor, lower_tor, toggle, random), or toward a DUT
    ToggleAll {
        #[arg(short, long, required_unless_present = "dut", conflicts_with = "dut")]
        side: Option<Side>,

        /// Toggle toward this DUT's ToR
        #[arg(long)]
        dut: Option<String>,
    },

    /// Block traffic toward the given directions on a port
    Drop {
        #[arg(short, long)]
        interface: String,

        /// Comma-separated: upper_tor,lower_tor,nic
        #[arg(short, long)]
        directions: DirectionSet,
    },

    /// Let traffic through toward the given directions on a port
    Output {
        #[arg(short, long)]
        interface: String,

        /// Comma-separated: upper_tor,lower_tor,nic
        #[arg(short, long)]
        directions: DirectionSet,
    },

    /// Restore upper_tor, lower_tor and nic on a port
    Recover {
        #[arg(short, long)]
        interface: String,
    },

    /// Print the flap counter of one port, or of every port
    FlapCounter {
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Clear the flap counter of one port, or of every port
    ClearFlapCounter {
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Reset one port, or every port
    Reset {
        #[arg(short, long)]
        interface: Option<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("muxsim=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_file(&args.config)
        .await
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    config.validate();

    let client = MuxSimulatorClient::from_config(&config)?;
    info!(url = client.base_url(), "Using mux simulator");

    match args.command {
        Command::Status { interface: None } => {
            let statuses = client
                .all_port_status()
                .await
                .context("Failed to read status of all ports")?;
            print_json(&statuses)?;
        }
        Command::Status {
            interface: Some(interface),
        } => {
            let status = client
                .port_status(&interface)
                .await?
                .with_context(|| format!("Failed to read status of {}", interface))?;
            print_json(&status)?;
        }
        Command::Toggle { interface, side } => {
            client.toggle_to(&interface, side).await?;
            let active = client.read_active_side(&interface).await?;
            if active == ActiveSide::Indeterminate {
                anyhow::bail!("{} toggled but its active side could not be read back", interface);
            }
            println!("{interface}: {active:?}");
        }
        Command::ToggleAll { side, dut } => match (side, dut) {
            (Some(side), _) => client.toggle_all(side).await?,
            (None, Some(dut)) => {
                if !client.toggle_all_to_dut(&config, &dut).await? {
                    info!("Testbed is not dual-ToR; nothing toggled");
                }
            }
            (None, None) => anyhow::bail!("toggle-all needs --side or --dut"),
        },
        Command::Drop {
            interface,
            directions,
        } => {
            client.set_drop(&interface, &directions).await?;
        }
        Command::Output {
            interface,
            directions,
        } => {
            client.set_output(&interface, &directions).await?;
        }
        Command::Recover { interface } => {
            client.recover_all_directions(&interface).await?;
        }
        Command::FlapCounter { interface: None } => {
            print_json(&client.flap_counters().await?)?;
        }
        Command::FlapCounter {
            interface: Some(interface),
        } => {
            println!("{}", client.flap_counter(&interface).await?);
        }
        Command::ClearFlapCounter { interface } => {
            client.clear_flap_counter(interface.as_deref()).await?;
        }
        Command::Reset { interface } => {
            client.reset_port(interface.as_deref()).await?;
        }
    }

    Ok(())
}
