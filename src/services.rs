//! The collaborators every stream's processor shares.

use anyhow::{anyhow, Result};
use rumqttc::v5::Client;
use std::sync::Arc;

use crate::config::{DetectorKind, NotifyKind, StorageKind, WatchConfig};
use crate::detect::{Classifier, HttpClassifier, HttpClassifierConfig, MatchRule, StubClassifier};
use crate::publish::{
    FilesystemObjectStore, HttpObjectStore, HttpObjectStoreConfig, LogNotifier, MqttNotifier,
    Notifier, ObjectStore,
};

#[derive(Clone)]
pub struct Services {
    pub classifier: Arc<dyn Classifier>,
    pub store: Arc<dyn ObjectStore>,
    pub notifier: Arc<dyn Notifier>,
    pub rule: MatchRule,
    pub attachment_name: String,
}

impl Services {
    /// Build the configured detector, store and notifier.
    ///
    /// `mqtt` is the control-loop client. Without it, MQTT notifications fall back
    /// to the log notifier.
    pub fn from_config(config: &WatchConfig, mqtt: Option<&Client>) -> Result<Self> {
        let detector = &config.detector;
        let classifier: Arc<dyn Classifier> = match detector.kind {
            DetectorKind::Stub => Arc::new(StubClassifier::new()),
            DetectorKind::Http => {
                let endpoint = detector
                    .endpoint
                    .clone()
                    .ok_or_else(|| anyhow!("detector.endpoint is required for the http detector"))?;
                Arc::new(HttpClassifier::new(HttpClassifierConfig {
                    endpoint,
                    timeout: detector.timeout,
                    token: detector.token.clone(),
                })?)
            }
        };

        let storage = &config.storage;
        let store: Arc<dyn ObjectStore> = match storage.kind {
            StorageKind::Filesystem => Arc::new(FilesystemObjectStore::new(&storage.root)?),
            StorageKind::Http => {
                let endpoint = storage
                    .endpoint
                    .clone()
                    .ok_or_else(|| anyhow!("storage.endpoint is required for http storage"))?;
                Arc::new(HttpObjectStore::new(HttpObjectStoreConfig {
                    endpoint,
                    bucket: storage.bucket.clone(),
                    token: storage.token.clone(),
                    timeout: storage.timeout,
                })?)
            }
        };

        let notify = &config.notify;
        let notifier: Arc<dyn Notifier> = match notify.kind {
            NotifyKind::Log => Arc::new(LogNotifier),
            NotifyKind::Mqtt => match mqtt {
                Some(client) => {
                    Arc::new(MqttNotifier::new(client.clone(), notify.topic_prefix.clone()))
                }
                None => {
                    log::warn!("Services: no MQTT connection, notifications go to the log");
                    Arc::new(LogNotifier)
                }
            },
        };

        log::info!(
            "Services: detector={} store={} notifier={} (match '{}' >= {})",
            classifier.name(),
            store.name(),
            notifier.name(),
            detector.rule.label,
            detector.rule.min_confidence
        );

        Ok(Self {
            classifier,
            store,
            notifier,
            rule: detector.rule.clone(),
            attachment_name: notify.attachment_name.clone(),
        })
    }
}
