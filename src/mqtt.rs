use anyhow::{Context, Result};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    host: String,
    #[serde(default = "MqttConfig::default_port")]
    port: u16,
    username: Option<String>,
    password: Option<String>,
    #[serde(default = "MqttConfig::default_topic")]
    topic: String,
    #[serde(default = "MqttConfig::default_qos")]
    qos: u8,
    #[serde(default = "MqttConfig::default_client_id")]
    client_id: String,
    #[serde(
        default = "MqttConfig::default_keep_alive_interval",
        with = "humantime_serde"
    )]
    keep_alive_interval: Duration,
    #[serde(
        default = "MqttConfig::default_reconnect_delay",
        with = "humantime_serde"
    )]
    reconnect_delay: Duration,
}

impl MqttConfig {
    fn default_port() -> u16 {
        1883
    }

    fn default_topic() -> String {
        "jbdbms".into()
    }

    fn default_qos() -> u8 {
        0
    }

    fn generate_random_string(len: usize) -> String {
        use rand::distributions::Alphanumeric;
        use rand::Rng;

        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    fn default_client_id() -> String {
        format!("jbdbms-{}", Self::generate_random_string(8))
    }

    fn default_keep_alive_interval() -> Duration {
        Duration::from_secs(30)
    }

    fn default_reconnect_delay() -> Duration {
        Duration::from_secs(1)
    }

    pub const DEFAULT_CONFIG_FILE: &str = "mqtt.yaml";

    pub fn load(config_file_path: &str) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open MQTT config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read MQTT config from file: {config_file_path:?}"))?;
        Ok(config)
    }
}

pub struct MqttPublisher {
    client: AsyncClient,
    config: MqttConfig,
}

impl MqttPublisher {
    pub fn new(config: MqttConfig) -> Self {
        let mut options =
            MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive_interval);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }

        log::info!(
            "Connecting to MQTT broker {}:{} with client_id: {}",
            config.host,
            config.port,
            config.client_id
        );

        let (client, mut eventloop) = AsyncClient::new(options, 16);
        let reconnect_delay = config.reconnect_delay;
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(event) => log::trace!("MQTT event: {event:?}"),
                    Err(e) => {
                        log::warn!("MQTT connection error: {e}");
                        tokio::time::sleep(reconnect_delay).await;
                    }
                }
            }
        });

        Self { client, config }
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    fn qos(&self) -> QoS {
        match self.config.qos {
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtMostOnce,
        }
    }

    pub async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        log::debug!(
            "Publishing to MQTT: Topic='{topic}', Payload='{payload}', QoS={}",
            self.config.qos
        );

        self.client
            .publish(topic, self.qos(), false, payload)
            .await
            .with_context(|| format!("Failed to publish message to MQTT topic: {topic}"))?;

        Ok(())
    }
}
