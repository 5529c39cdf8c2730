use anyhow::{Context, Result};
use jbdbms_lib::client::{JbdBMS, Transport};
use jbdbms_lib::telemetry::{Telemetry, Value};
use log::{error, info, warn};
use serde_json::json;

use crate::{commandline, mqtt};

fn to_json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Float(v) => json!(v),
        Value::Int(v) => json!(v),
        Value::Bool(v) => json!(v),
    }
}

pub async fn run<T: Transport>(
    mut bms: JbdBMS<T>,
    output: commandline::DaemonOutput,
    interval: std::time::Duration,
) -> Result<()> {
    info!("Starting daemon mode: output={output:?}, interval={interval:?}");

    let mut mqtt_publisher: Option<mqtt::MqttPublisher> = None;

    if let commandline::DaemonOutput::Mqtt { config_file, .. } = &output {
        let config = mqtt::MqttConfig::load(config_file)
            .with_context(|| format!("Failed to open MQTT config file at '{config_file}'"))?;
        info!("Successfully loaded MQTT config from {config_file}: {config:?}");
        let publisher = mqtt::MqttPublisher::new(config);
        info!("MQTT Publisher created successfully.");
        mqtt_publisher = Some(publisher);
    }

    loop {
        let telemetry = match bms.update().await {
            Ok(telemetry) => telemetry,
            Err(e) => {
                error!("Error reading telemetry: {e}");
                Telemetry::default()
            }
        };
        if telemetry.is_empty() {
            // The session never retries by itself; dropping the link makes
            // the next interval re-establish it.
            warn!("No usable telemetry in this cycle, reconnecting next interval");
            bms.disconnect().await;
        }

        match &output {
            commandline::DaemonOutput::Console => {
                println!("--- Telemetry at {} ---", chrono::Local::now().to_rfc3339());
                print!("{telemetry}");
                println!("--------------------------");
            }
            commandline::DaemonOutput::Mqtt { format, .. } => {
                if let Some(publisher) = &mqtt_publisher {
                    match format {
                        commandline::MqttFormat::Json => {
                            let mut data_to_publish = serde_json::Map::new();
                            data_to_publish.insert(
                                "timestamp".to_string(),
                                json!(chrono::Utc::now().to_rfc3339()),
                            );

                            for (metric, value) in telemetry.iter() {
                                data_to_publish
                                    .insert(metric.as_str().to_string(), to_json_value(value));
                            }

                            if data_to_publish.len() > 1 {
                                match serde_json::to_string(&data_to_publish) {
                                    Ok(json_payload) => {
                                        info!(
                                            "MQTT output: Attempting to publish data: {json_payload}"
                                        );
                                        if let Err(e) = publisher
                                            .publish(publisher.topic(), &json_payload)
                                            .await
                                        {
                                            error!("Failed to publish data to MQTT: {e:?}");
                                        } else {
                                            info!("Successfully published data to MQTT.");
                                        }
                                    }
                                    Err(e) => {
                                        error!("Failed to serialize data to JSON string: {e}");
                                    }
                                }
                            } else {
                                info!("No telemetry fetched in this cycle to publish via MQTT.");
                            }
                        }
                        commandline::MqttFormat::Simple => {
                            let base_topic = publisher.topic();
                            for (metric, value) in telemetry.iter() {
                                let topic = format!("{base_topic}/{metric}");
                                if let Err(e) =
                                    publisher.publish(&topic, &value.to_string()).await
                                {
                                    error!("Failed to publish message to topic {topic}: {e}");
                                }
                            }
                        }
                    }
                } else {
                    warn!(
                        "MQTT output selected, but publisher is not initialized. Skipping publish."
                    );
                }
            }
        }
        tokio::time::sleep(interval).await;
    }
}
