//! MQTT control ingress: each stream name is a topic, the payload switches the
//! stream's capture window on or off.

use rumqttc::v5::mqttbytes::v5::Publish;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Connection, Event, Incoming};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::manager::{StreamCommand, StreamManager};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Map a control payload to a command. `None` for payloads that are neither on nor off.
pub fn parse_command(payload: &[u8]) -> Option<StreamCommand> {
    let text = std::str::from_utf8(payload).ok()?;
    match text.trim().to_lowercase().as_str() {
        "on" | "activate" | "start" | "true" | "1" => Some(StreamCommand::Activate),
        "off" | "deactivate" | "stop" | "false" | "0" => Some(StreamCommand::Deactivate),
        _ => None,
    }
}

/// Unrecognized payloads deactivate.
pub fn command_for_payload(topic: &str, payload: &[u8]) -> StreamCommand {
    parse_command(payload).unwrap_or_else(|| {
        log::warn!(
            "Control: unrecognized payload {:?} on {}, treating as deactivate",
            String::from_utf8_lossy(payload),
            topic
        );
        StreamCommand::Deactivate
    })
}

/// Subscribes to every stream topic and forwards commands to the manager.
pub struct ControlLoop<'a> {
    manager: &'a StreamManager,
    client: Client,
    topics: Vec<String>,
}

impl<'a> ControlLoop<'a> {
    pub fn new(manager: &'a StreamManager, client: Client) -> Self {
        let topics = manager.names().map(str::to_string).collect();
        Self {
            manager,
            client,
            topics,
        }
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Drive the connection until `shutdown` is set. Connection errors are logged
    /// and retried after `RECONNECT_DELAY`; rumqttc reconnects on the next poll.
    pub fn run(&self, connection: &mut Connection, shutdown: &AtomicBool) {
        for event in connection.iter() {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    self.subscribe_all();
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => self.handle_publish(&publish),
                Ok(_) => {}
                Err(e) => {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    log::error!("MQTT connection error: {}. Reconnecting...", e);
                    std::thread::sleep(RECONNECT_DELAY);
                }
            }
        }
        log::info!("Control: MQTT loop stopped");
    }

    /// Called on every ConnAck: clean-start sessions drop subscriptions.
    ///
    /// Runs on the thread that drains the request queue, so it must not wait for
    /// room in it. Returns how many subscriptions were queued.
    pub fn subscribe_all(&self) -> usize {
        let mut queued = 0;
        for topic in &self.topics {
            match self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                Ok(()) => {
                    log::info!("Control: subscribed to {}", topic);
                    queued += 1;
                }
                Err(e) => log::error!("Control: failed to subscribe to {}: {}", topic, e),
            }
        }
        queued
    }

    fn handle_publish(&self, publish: &Publish) {
        let topic = match std::str::from_utf8(&publish.topic) {
            Ok(topic) => topic,
            Err(e) => {
                log::warn!("Skipping publish with invalid topic: {}", e);
                return;
            }
        };
        self.handle_message(topic, &publish.payload);
    }

    /// Apply one control message. Returns whether a stream state was changed.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> bool {
        let command = command_for_payload(topic, payload);
        self.manager.dispatch(topic, command)
    }
}
