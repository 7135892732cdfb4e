//! Owns every stream controller, keyed by stream name, and routes control commands.

use anyhow::{anyhow, Result};
use rumqttc::v5::Client;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::WatchConfig;
use crate::controller::StreamController;
use crate::ingest::CaptureFactory;
use crate::services::Services;
use crate::stream::{PipelineSettings, StreamIdentity, StreamStats};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamCommand {
    Activate,
    Deactivate,
}

impl std::fmt::Display for StreamCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Activate => write!(f, "activate"),
            Self::Deactivate => write!(f, "deactivate"),
        }
    }
}

/// Outcome of `stop_all`.
#[derive(Debug, Default)]
pub struct StopReport {
    pub stopped: Vec<String>,
    pub failures: Vec<(String, anyhow::Error)>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Default)]
pub struct StreamManager {
    controllers: BTreeMap<String, StreamController>,
}

impl StreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// One controller per configured stream, sharing the factory and the services.
    pub fn from_config(
        config: &WatchConfig,
        factory: Arc<dyn CaptureFactory>,
        services: Services,
    ) -> Result<Self> {
        let settings = config.pipeline_settings();
        let mut manager = Self::new();
        for identity in config.stream_identities() {
            manager.add_stream(identity, settings.clone(), factory.clone(), services.clone())?;
        }
        Ok(manager)
    }

    /// Build the services and one controller per configured stream. A failure is
    /// logged and leaves the manager empty, so the daemon keeps running.
    pub fn from_config_or_empty(
        config: &WatchConfig,
        factory: Arc<dyn CaptureFactory>,
        mqtt: Option<&Client>,
    ) -> Self {
        let built = Services::from_config(config, mqtt)
            .and_then(|services| Self::from_config(config, factory, services));
        match built {
            Ok(manager) => manager,
            Err(e) => {
                log::error!("StreamManager: {:#}; running without streams", e);
                Self::new()
            }
        }
    }

    pub fn add_stream(
        &mut self,
        identity: StreamIdentity,
        settings: PipelineSettings,
        factory: Arc<dyn CaptureFactory>,
        services: Services,
    ) -> Result<()> {
        self.insert(StreamController::new(identity, settings, factory, services))
    }

    pub fn insert(&mut self, controller: StreamController) -> Result<()> {
        let name = controller.identity().name.clone();
        if self.controllers.contains_key(&name) {
            return Err(anyhow!("stream '{}' is already registered", name));
        }
        self.controllers.insert(name, controller);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&StreamController> {
        self.controllers.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.controllers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Start every stream. A stream that fails to start is logged and skipped;
    /// the error lists all of them.
    pub fn start_all(&self) -> Result<()> {
        let mut failed = Vec::new();
        for (name, controller) in &self.controllers {
            if let Err(e) = controller.start() {
                log::error!("StreamManager: failed to start {}: {:#}", name, e);
                failed.push(name.as_str());
            }
        }
        if failed.is_empty() {
            log::info!("StreamManager: {} streams running", self.controllers.len());
            Ok(())
        } else {
            Err(anyhow!("failed to start streams: {}", failed.join(", ")))
        }
    }

    /// Route a command to the stream named `name`. Returns false for unknown streams
    /// and streams that are not running.
    pub fn dispatch(&self, name: &str, command: StreamCommand) -> bool {
        let Some(controller) = self.controllers.get(name) else {
            log::warn!("StreamManager: {} for unknown stream '{}'", command, name);
            return false;
        };
        match command {
            StreamCommand::Activate => controller.activate(),
            StreamCommand::Deactivate => controller.deactivate(),
        }
    }

    /// Stop every stream, continuing past failures.
    ///
    /// All running flags are cleared first so the streams wind down in parallel.
    pub fn stop_all(&self) -> StopReport {
        for controller in self.controllers.values() {
            controller.signal_stop();
        }
        let mut report = StopReport::default();
        for (name, controller) in &self.controllers {
            match controller.stop() {
                Ok(()) => report.stopped.push(name.clone()),
                Err(e) => {
                    log::error!("StreamManager: failed to stop {}: {:#}", name, e);
                    report.failures.push((name.clone(), e));
                }
            }
        }
        report
    }

    pub fn stats(&self) -> Vec<(String, StreamStats)> {
        self.controllers
            .iter()
            .map(|(name, controller)| (name.clone(), controller.stats()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerState;
    use crate::detect::{MatchRule, StubClassifier};
    use crate::ingest::UriCaptureFactory;
    use crate::publish::{FilesystemObjectStore, LogNotifier};
    use std::time::Duration;

    fn services(dir: &std::path::Path) -> Result<Services> {
        Ok(Services {
            classifier: Arc::new(StubClassifier::new()),
            store: Arc::new(FilesystemObjectStore::new(dir)?),
            notifier: Arc::new(LogNotifier),
            rule: MatchRule::default(),
            attachment_name: "person.jpg".to_string(),
        })
    }

    fn manager(dir: &std::path::Path, names: &[&str]) -> Result<StreamManager> {
        let factory: Arc<dyn CaptureFactory> = Arc::new(UriCaptureFactory {
            target_fps: 50,
            stub_width: 8,
            stub_height: 8,
        });
        let settings = PipelineSettings {
            idle_poll: Duration::from_millis(2),
            ..PipelineSettings::default()
        };
        let mut manager = StreamManager::new();
        for name in names {
            manager.add_stream(
                StreamIdentity::new(*name, format!("stub://{}", name)),
                settings.clone(),
                factory.clone(),
                services(dir)?,
            )?;
        }
        Ok(manager)
    }

    #[test]
    fn duplicate_stream_names_are_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut manager = manager(dir.path(), &["cam1"])?;
        let err = manager
            .add_stream(
                StreamIdentity::new("cam1", "stub://other"),
                PipelineSettings::default(),
                Arc::new(UriCaptureFactory::default()),
                services(dir.path())?,
            )
            .err()
            .expect("error");
        assert!(err.to_string().contains("already registered"));
        Ok(())
    }

    #[test]
    fn dispatch_routes_by_name_and_ignores_unknown() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let manager = manager(dir.path(), &["cam1", "cam2"])?;
        manager.start_all()?;

        assert!(!manager.dispatch("unknown", StreamCommand::Activate));
        assert!(manager.dispatch("cam1", StreamCommand::Activate));
        assert!(manager.get("cam1").is_some_and(StreamController::is_active));
        assert!(!manager.get("cam2").is_some_and(StreamController::is_active));

        let report = manager.stop_all();
        assert!(report.is_clean());
        assert_eq!(report.stopped, vec!["cam1", "cam2"]);
        assert!(!manager.dispatch("cam1", StreamCommand::Deactivate));
        Ok(())
    }

    #[test]
    fn stop_all_is_repeatable() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let manager = manager(dir.path(), &["a", "b", "c"])?;
        manager.start_all()?;
        assert!(manager.stop_all().is_clean());
        assert!(manager.stop_all().is_clean());
        for name in ["a", "b", "c"] {
            assert_eq!(
                manager.get(name).map(StreamController::state),
                Some(ControllerState::Stopped)
            );
        }
        Ok(())
    }

    #[test]
    fn setup_failures_leave_an_empty_manager() -> Result<()> {
        let blocker = tempfile::NamedTempFile::new()?;
        let mut config = WatchConfig::default();
        config.streams.insert("cam1".to_string(), "stub://cam1".to_string());
        config.storage.root = blocker.path().join("snapshots");
        let factory: Arc<dyn CaptureFactory> = Arc::new(UriCaptureFactory::default());

        let manager = StreamManager::from_config_or_empty(&config, factory.clone(), None);
        assert!(manager.is_empty());

        let dir = tempfile::tempdir()?;
        config.storage.root = dir.path().to_path_buf();
        let manager = StreamManager::from_config_or_empty(&config, factory, None);
        assert_eq!(manager.names().collect::<Vec<_>>(), vec!["cam1"]);
        Ok(())
    }

    #[test]
    fn command_names() {
        assert_eq!(StreamCommand::Activate.to_string(), "activate");
        assert_eq!(StreamCommand::Deactivate.to_string(), "deactivate");
    }
}
