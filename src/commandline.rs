use crate::mqtt;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::time::Duration;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Read the pack once and print all telemetry
    Info,
    /// Run in daemon mode, periodically fetching and outputting telemetry
    Daemon {
        /// Output destination for telemetry
        #[command(subcommand)]
        output: DaemonOutput,
        /// Interval between reads (e.g., "30s", "1m")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "30s")]
        interval: Duration,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, PartialEq)]
pub enum MqttFormat {
    Simple,
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Continuously read telemetry and print it to the standard output (console).
    Console,
    /// Continuously read telemetry and publish it to an MQTT broker.
    Mqtt {
        /// The configuration file for the MQTT broker
        #[arg(long, default_value_t = mqtt::MqttConfig::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,
        /// Output format for MQTT messages
        #[arg(long, value_enum, default_value_t = MqttFormat::Simple)]
        format: MqttFormat,
    },
}

const fn about_text() -> &'static str {
    "jbd bms command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Advertised Bluetooth name of the pack (e.g., "JBD-SP04S020")
    #[arg(short, long)]
    pub device: String,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Timeout for a complete response after a request (e.g., "5s", "10s")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "10s")]
    pub timeout: Duration,

    /// Disconnect after every read instead of keeping the link up
    #[arg(long, action)]
    pub reconnect: bool,
}
