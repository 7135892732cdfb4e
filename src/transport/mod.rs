//! MQTT connection setup shared by the control loop and the MQTT notifier.

mod broker;

use anyhow::Result;
use rumqttc::v5::{Client, Connection, MqttOptions};
use std::path::PathBuf;
use std::time::Duration;
use zeroize::Zeroizing;

pub use broker::{transport_for, BrokerAddress, TlsFiles};

pub const DEFAULT_CLIENT_ID: &str = "stream-watch";
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// `stream-watch-xxxxxx`. Brokers disconnect an older session when a second
/// client connects with the same id, so every daemon gets its own.
pub fn default_client_id() -> String {
    format!("{}-{:06x}", DEFAULT_CLIENT_ID, rand::random::<u32>() & 0x00ff_ffff)
}

/// Broker connection settings.
#[derive(Clone)]
pub struct MqttSettings {
    /// `host:port` or `mqtt(s)://host:port`.
    pub broker: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<Zeroizing<String>>,
    pub use_tls: bool,
    pub ca_path: Option<PathBuf>,
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
}

impl MqttSettings {
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            client_id: default_client_id(),
            username: None,
            password: None,
            use_tls: false,
            ca_path: None,
            client_cert_path: None,
            client_key_path: None,
        }
    }

    pub fn endpoint(&self) -> Result<BrokerAddress> {
        BrokerAddress::parse(&self.broker, self.use_tls)
    }

    /// Resolve the endpoint, load TLS material and build rumqttc options.
    pub fn mqtt_options(&self) -> Result<MqttOptions> {
        let endpoint = self.endpoint()?;
        let tls = TlsFiles {
            ca: self.ca_path.as_deref(),
            client_cert: self.client_cert_path.as_deref(),
            client_key: self.client_key_path.as_deref(),
        };

        let mut options = MqttOptions::new(&self.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(DEFAULT_KEEP_ALIVE);
        options.set_clean_start(true);
        if let Some(user) = &self.username {
            let password = self.password.as_deref().map(String::as_str).unwrap_or_default();
            options.set_credentials(user, password);
        }
        options.set_transport(transport_for(&endpoint, tls)?);
        Ok(options)
    }
}

impl std::fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSettings")
            .field("broker", &self.broker)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("use_tls", &self.use_tls)
            .field("ca_path", &self.ca_path)
            .field("client_cert_path", &self.client_cert_path)
            .field("client_key_path", &self.client_key_path)
            .finish()
    }
}

/// Create a client and its event loop. Nothing goes over the wire until the
/// connection is iterated.
pub fn connect(settings: &MqttSettings, capacity: usize) -> Result<(Client, Connection)> {
    let options = settings.mqtt_options()?;
    let (client, connection) = Client::new(options, capacity);
    log::info!(
        "MQTT client configured for {} as {} (auth: {})",
        settings.endpoint()?,
        settings.client_id,
        settings.username.is_some()
    );
    Ok((client, connection))
}

/// `connect`, with a failure logged instead of returned. The caller then runs
/// without a broker.
pub fn connect_or_log(settings: &MqttSettings, capacity: usize) -> Option<(Client, Connection)> {
    match connect(settings, capacity) {
        Ok(pair) => Some(pair),
        Err(e) => {
            log::error!("MQTT setup failed, continuing without a broker: {:#}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_carry_endpoint_and_client_id() -> Result<()> {
        let mut settings = MqttSettings::new("mqtt://broker.local:1884");
        settings.client_id = "watch-test".to_string();
        let options = settings.mqtt_options()?;
        assert_eq!(
            options.broker_address(),
            ("broker.local".to_string(), 1884)
        );
        assert_eq!(options.client_id(), "watch-test");
        Ok(())
    }

    #[test]
    fn default_client_ids_are_distinct() {
        let a = MqttSettings::new("localhost:1883").client_id;
        let b = default_client_id();
        assert!(a.starts_with("stream-watch-"));
        assert_eq!(a.len(), "stream-watch-".len() + 6);
        assert_ne!(a, b);
    }

    #[test]
    fn debug_output_redacts_password() {
        let mut settings = MqttSettings::new("localhost:1883");
        settings.username = Some("cam".to_string());
        settings.password = Some(Zeroizing::new("hunter2".to_string()));
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn missing_client_key_fails_option_building() {
        let mut settings = MqttSettings::new("mqtts://localhost:8883");
        settings.client_cert_path = Some(PathBuf::from("/nonexistent/cert.pem"));
        assert!(settings.mqtt_options().is_err());
    }

    #[test]
    fn unreadable_tls_files_mean_no_connection() {
        let mut settings = MqttSettings::new("mqtts://broker.local:8883");
        settings.ca_path = Some(PathBuf::from("/nonexistent/stream-watch/ca.pem"));
        assert!(connect(&settings, 4).is_err());
        assert!(connect_or_log(&settings, 4).is_none());

        let plain = MqttSettings::new("broker.local:1883");
        assert!(connect_or_log(&plain, 4).is_some());
    }
}
