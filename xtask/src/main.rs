use anyhow::Result;
use clap::{Parser, Subcommand};
use rigbus_core::usb::{NativeDevice, NusbBus, UsbBus};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project
    Build,
    /// Run the test suite
    Test,
    /// Run clippy with warnings denied
    Lint,
    /// List attached USB devices
    Devices,
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    println!("{}...", what);
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{} failed", what);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => cargo(&["build", "--workspace"], "Building project")?,
        Commands::Test => cargo(&["test", "-p", "rigbus-core"], "Running tests")?,
        Commands::Lint => cargo(
            &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
            "Linting",
        )?,
        Commands::Devices => {
            let devices = NusbBus.scan()?;
            for device in devices {
                println!(
                    "usb:{}: ID={:04X}:{:04X}",
                    device.location(),
                    device.vendor_id(),
                    device.product_id()
                );
            }
        }
    }

    Ok(())
}
