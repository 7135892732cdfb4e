//! Where positive detections go: an object store for the winning frame and a
//! notifier that points at the stored object.
//!
//! The processor always stores before it notifies; a failed store means no
//! notification for that batch.

mod fs;
mod http;
mod mqtt;

use anyhow::Result;
use serde::Serialize;

use crate::stream::StreamIdentity;

pub use fs::FilesystemObjectStore;
pub use http::{HttpObjectStore, HttpObjectStoreConfig};
pub use mqtt::{MqttNotifier, DEFAULT_TOPIC_PREFIX};

pub const DEFAULT_ATTACHMENT_NAME: &str = "person.jpg";

/// The winning frame of a batch, ready to be stored.
#[derive(Clone, Copy, Debug)]
pub struct StoreRequest<'a> {
    pub stream: &'a StreamIdentity,
    pub jpeg: &'a [u8],
    pub confidence: f32,
    pub position: usize,
    /// Local time, `%Y-%m-%d_%H:%M:%S`.
    pub timestamp: &'a str,
}

impl StoreRequest<'_> {
    /// `{stream with '/' replaced by '_'}/{timestamp}_{confidence}_{position}`
    pub fn storage_key(&self) -> String {
        format!(
            "{}/{}_{}_{}",
            self.stream.sanitized_name(),
            self.timestamp,
            self.confidence,
            self.position
        )
    }
}

/// Persists detection snapshots. Returns the key the object was stored under.
pub trait ObjectStore: Send + Sync {
    fn name(&self) -> &'static str;

    fn store(&self, request: &StoreRequest<'_>) -> Result<String>;
}

/// Outbound alert for a stored detection.
#[derive(Clone, Debug, Serialize)]
pub struct Notification<'a> {
    pub stream: &'a str,
    pub subject: String,
    pub body: String,
    pub storage_key: &'a str,
    pub confidence: f32,
    pub position: usize,
    pub timestamp: &'a str,
    pub attachment_name: &'a str,
    #[serde(skip)]
    pub attachment: &'a [u8],
}

impl<'a> Notification<'a> {
    pub fn detection(
        request: &StoreRequest<'a>,
        storage_key: &'a str,
        attachment_name: &'a str,
    ) -> Self {
        let stream = request.stream.name.as_str();
        Self {
            stream,
            subject: stream.to_string(),
            body: format!(
                "Camera : {}\nStorage key : {}\nTime : {}",
                stream, storage_key, request.timestamp
            ),
            storage_key,
            confidence: request.confidence,
            position: request.position,
            timestamp: request.timestamp,
            attachment_name,
            attachment: request.jpeg,
        }
    }
}

/// Delivers notifications.
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn notify(&self, notification: &Notification<'_>) -> Result<()>;
}

/// Writes notifications to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn notify(&self, notification: &Notification<'_>) -> Result<()> {
        log::info!(
            "{}: detection {:.1} at position {} stored as {} ({} bytes attached as {})",
            notification.stream,
            notification.confidence,
            notification.position,
            notification.storage_key,
            notification.attachment.len(),
            notification.attachment_name
        );
        Ok(())
    }
}
