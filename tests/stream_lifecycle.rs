use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use stream_watch::detect::{Classifier, LabelScore, MatchRule};
use stream_watch::publish::{Notification, Notifier, ObjectStore, StoreRequest};
use stream_watch::{
    CaptureDevice, CaptureFactory, ControllerState, PipelineSettings, RawImage, Services,
    StreamCommand, StreamController, StreamIdentity, StreamManager, StreamStats,
};

const FRAME_SIDE: u32 = 8;
const MAX_FRAMES: usize = 60;

/// Emits uniformly coloured frames whose value encodes a global sequence number
/// (`seq * 4`), then empty reads once `MAX_FRAMES` have been produced.
struct SequenceDevice {
    produced: Arc<AtomicUsize>,
    fail_every: Option<usize>,
    reads: usize,
}

impl CaptureDevice for SequenceDevice {
    fn read(&mut self) -> Result<Option<RawImage>> {
        std::thread::sleep(Duration::from_millis(5));
        self.reads += 1;
        if let Some(every) = self.fail_every {
            if self.reads % every == 0 {
                return Err(anyhow!("camera hiccup"));
            }
        }
        let seq = self.produced.fetch_add(1, Ordering::SeqCst);
        if seq >= MAX_FRAMES {
            return Ok(None);
        }
        let value = (seq * 4) as u8;
        let side = FRAME_SIDE as usize;
        Ok(Some(RawImage::new(
            vec![value; side * side * 3],
            FRAME_SIDE,
            FRAME_SIDE,
        )))
    }
}

#[derive(Default)]
struct SequenceFactory {
    produced: Arc<AtomicUsize>,
    opens: AtomicUsize,
    fail_every: Option<usize>,
}

impl CaptureFactory for SequenceFactory {
    fn open(&self, _uri: &str) -> Result<Box<dyn CaptureDevice>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SequenceDevice {
            produced: self.produced.clone(),
            fail_every: self.fail_every,
            reads: 0,
        }))
    }
}

/// Records the sequence number of every scored frame and returns a fixed confidence.
struct RecordingClassifier {
    confidence: f32,
    delay: Duration,
    seen: Mutex<Vec<usize>>,
}

impl RecordingClassifier {
    fn new(confidence: f32, delay: Duration) -> Self {
        Self {
            confidence,
            delay,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<usize> {
        self.seen.lock().unwrap().clone()
    }
}

impl Classifier for RecordingClassifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn score(&self, jpeg: &[u8]) -> Result<Vec<LabelScore>> {
        std::thread::sleep(self.delay);
        let image = image::load_from_memory(jpeg)?.into_rgb8();
        let seq = ((image.get_pixel(0, 0)[0] as f32) / 4.0).round() as usize;
        self.seen.lock().unwrap().push(seq);
        Ok(vec![LabelScore::new("person", self.confidence)])
    }
}

#[derive(Default)]
struct RecordingStore {
    keys: Mutex<Vec<String>>,
}

impl ObjectStore for RecordingStore {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn store(&self, request: &StoreRequest<'_>) -> Result<String> {
        let key = request.storage_key();
        self.keys.lock().unwrap().push(key.clone());
        Ok(key)
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String, usize)>>,
    offline: bool,
}

impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn notify(&self, notification: &Notification<'_>) -> Result<()> {
        if self.offline {
            return Err(anyhow!("notification channel offline"));
        }
        self.sent.lock().unwrap().push((
            notification.storage_key.to_string(),
            notification.body.clone(),
            notification.attachment.len(),
        ));
        Ok(())
    }
}

struct Rig {
    controller: StreamController,
    factory: Arc<SequenceFactory>,
    classifier: Arc<RecordingClassifier>,
    store: Arc<RecordingStore>,
    notifier: Arc<RecordingNotifier>,
}

fn rig(buffer_limit: usize, classifier: RecordingClassifier, fail_every: Option<usize>) -> Rig {
    rig_with(buffer_limit, classifier, fail_every, RecordingNotifier::default())
}

fn rig_with(
    buffer_limit: usize,
    classifier: RecordingClassifier,
    fail_every: Option<usize>,
    notifier: RecordingNotifier,
) -> Rig {
    let factory = Arc::new(SequenceFactory {
        fail_every,
        ..SequenceFactory::default()
    });
    let classifier = Arc::new(classifier);
    let store = Arc::new(RecordingStore::default());
    let notifier = Arc::new(notifier);
    let services = Services {
        classifier: classifier.clone(),
        store: store.clone(),
        notifier: notifier.clone(),
        rule: MatchRule::default(),
        attachment_name: "person.jpg".to_string(),
    };
    let settings = PipelineSettings {
        buffer_limit,
        retry_pause: Duration::from_millis(5),
        idle_poll: Duration::from_millis(2),
        jpeg_quality: 100,
        ..PipelineSettings::default()
    };
    let controller = StreamController::new(
        StreamIdentity::new("site/door", "scripted://door"),
        settings,
        factory.clone(),
        services,
    );
    Rig {
        controller,
        factory,
        classifier,
        store,
        notifier,
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn stats(rig: &Rig) -> StreamStats {
    rig.controller.stats()
}

/// Runs one active window and waits until its batch has been queued.
fn run_window(rig: &Rig, frames: u64) {
    let flushed = stats(rig).batches_flushed;
    let buffered = stats(rig).frames_buffered;
    assert!(rig.controller.activate());
    wait_until(|| stats(rig).frames_buffered >= buffered + frames);
    assert!(rig.controller.deactivate());
    wait_until(|| stats(rig).batches_flushed > flushed);
}

#[test]
fn active_window_is_stored_and_notified_once() -> Result<()> {
    let rig = rig(5, RecordingClassifier::new(88.0, Duration::ZERO), None);
    rig.controller.start()?;
    run_window(&rig, 5);
    wait_until(|| stats(&rig).batches_processed >= 1);
    rig.controller.stop()?;

    let keys = rig.store.keys.lock().unwrap().clone();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("site_door/"));
    assert!(keys[0].ends_with("_88_1"));

    let sent = rig.notifier.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, keys[0]);
    assert!(sent[0].1.starts_with("Camera : site/door\n"));
    assert!(sent[0].2 > 0);

    // Five frames: positions 1, 2, 3 (5/2 == 2 is already included).
    assert_eq!(rig.classifier.seen().len(), 3);
    Ok(())
}

#[test]
fn batches_are_processed_in_push_order() -> Result<()> {
    let rig = rig(3, RecordingClassifier::new(0.0, Duration::from_millis(30)), None);
    rig.controller.start()?;
    for _ in 0..3 {
        run_window(&rig, 3);
    }
    wait_until(|| stats(&rig).batches_processed >= 3);
    rig.controller.stop()?;

    let seen = rig.classifier.seen();
    assert_eq!(seen.len(), 6);
    assert!(
        seen.windows(2).all(|w| w[0] < w[1]),
        "frames scored out of order: {:?}",
        seen
    );
    assert!(rig.store.keys.lock().unwrap().is_empty());
    assert!(rig.notifier.sent.lock().unwrap().is_empty());
    Ok(())
}

#[test]
fn stop_releases_every_buffered_frame_once() -> Result<()> {
    let rig = rig(4, RecordingClassifier::new(90.0, Duration::from_millis(200)), None);
    rig.controller.start()?;
    for _ in 0..3 {
        run_window(&rig, 2);
    }
    rig.controller.activate();
    wait_until(|| stats(&rig).frames_in_flight() > 0 && rig.controller.is_active());
    rig.controller.stop()?;
    rig.controller.stop()?;

    let after = stats(&rig);
    assert_eq!(rig.controller.state(), ControllerState::Stopped);
    assert_eq!(rig.controller.queued_batches(), 0);
    assert_eq!(after.frames_released, after.frames_buffered);
    assert_eq!(after.frames_in_flight(), 0);
    assert!(after.batches_flushed >= 3);

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(stats(&rig), after, "counters moved after stop returned");
    Ok(())
}

#[test]
fn failing_notifier_does_not_stall_later_windows() -> Result<()> {
    let offline = RecordingNotifier {
        offline: true,
        ..RecordingNotifier::default()
    };
    let rig = rig_with(3, RecordingClassifier::new(90.0, Duration::ZERO), None, offline);
    rig.controller.start()?;
    for _ in 0..3 {
        run_window(&rig, 3);
    }
    wait_until(|| stats(&rig).batches_processed >= 3);
    rig.controller.stop()?;

    let after = stats(&rig);
    assert_eq!(after.detections, 3);
    assert_eq!(after.collaborator_failures, 3);
    assert_eq!(rig.store.keys.lock().unwrap().len(), 3);
    assert!(rig.notifier.sent.lock().unwrap().is_empty());
    Ok(())
}

#[test]
fn capture_failures_reopen_the_source() -> Result<()> {
    let rig = rig(5, RecordingClassifier::new(0.0, Duration::ZERO), Some(3));
    rig.controller.start()?;
    wait_until(|| stats(&rig).read_failures >= 2);
    run_window(&rig, 2);
    rig.controller.stop()?;

    assert!(rig.factory.opens.load(Ordering::SeqCst) >= 3);
    assert!(stats(&rig).frames_buffered >= 2);
    Ok(())
}

#[test]
fn manager_ignores_unknown_streams() -> Result<()> {
    let rig = rig(5, RecordingClassifier::new(0.0, Duration::ZERO), None);
    let Rig { controller, .. } = rig;
    let mut manager = StreamManager::new();
    manager.insert(controller)?;
    manager.start_all()?;

    assert!(!manager.dispatch("unknown", StreamCommand::Activate));
    let door = manager.get("site/door").expect("registered");
    assert!(!door.is_active());

    assert!(manager.dispatch("site/door", StreamCommand::Activate));
    assert!(door.is_active());

    let report = manager.stop_all();
    assert!(report.is_clean());
    assert_eq!(report.stopped, vec!["site/door".to_string()]);
    assert!(manager.get("site/door").expect("registered").start().is_err());
    Ok(())
}
