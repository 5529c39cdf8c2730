mod commandline;
mod daemon;
mod mqtt;

use anyhow::{Context, Result};
use clap::Parser;
use commandline::{CliArgs, CliCommands};
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{ops::Deref, panic};

use jbdbms_lib::bluest_async::BleTransport;
use jbdbms_lib::client::JbdBMS;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let mut bms = JbdBMS::new(BleTransport::new(&args.device));
    bms.set_timeout(args.timeout);
    bms.set_keep_alive(!args.reconnect);

    match args.command {
        CliCommands::Info => {
            let telemetry = bms
                .update()
                .await
                .with_context(|| format!("Cannot read telemetry from '{}'", args.device))?;
            bms.disconnect().await;
            if telemetry.is_empty() {
                anyhow::bail!("BMS returned no usable data");
            }
            print!("{telemetry}");
        }
        CliCommands::Daemon { output, interval } => {
            daemon::run(bms, output, interval).await?;
        }
    }

    Ok(())
}
