use anyhow::{Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client};

use super::{Notification, Notifier};

pub const DEFAULT_TOPIC_PREFIX: &str = "stream-watch";

/// Publishes a JSON summary to `{prefix}/{stream}/detection` and the snapshot
/// to `{prefix}/{stream}/snapshot`.
///
/// Shares the client of the control loop, which drives the connection. Publishes
/// never wait for room in the request queue: when it is full (broker unreachable)
/// the notification fails and is dropped.
pub struct MqttNotifier {
    client: Client,
    topic_prefix: String,
}

impl MqttNotifier {
    pub fn new(client: Client, topic_prefix: impl Into<String>) -> Self {
        Self {
            client,
            topic_prefix: topic_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn detection_topic(&self, stream: &str) -> String {
        format!("{}/{}/detection", self.topic_prefix, stream)
    }

    pub fn snapshot_topic(&self, stream: &str) -> String {
        format!("{}/{}/snapshot", self.topic_prefix, stream)
    }
}

impl Notifier for MqttNotifier {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn notify(&self, notification: &Notification<'_>) -> Result<()> {
        let summary = serde_json::to_vec(notification).context("serialize notification")?;
        let topic = self.detection_topic(notification.stream);
        self.client
            .try_publish(&topic, QoS::AtLeastOnce, false, summary)
            .with_context(|| format!("queue notification for {} (MQTT queue full?)", topic))?;
        let topic = self.snapshot_topic(notification.stream);
        self.client
            .try_publish(&topic, QoS::AtLeastOnce, false, notification.attachment.to_vec())
            .with_context(|| format!("queue snapshot for {} (MQTT queue full?)", topic))?;
        Ok(())
    }
}
