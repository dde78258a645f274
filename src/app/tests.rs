use super::orchestrator::StageResult;
use super::*;
use crate::annotation::AnnotationClient;
use crate::camera::{CameraDriver, FrameSink, MockCameraDriver, MockCaptureMode};
use crate::config::DoorbellConfig;
use crate::error::{CaptureError, NetworkError};
use crate::events::SystemEvent;
use crate::frame::{AnnotationResult, DoorbellEvent, ImageBuffer, ImageEncoding};
use crate::gpio::{GpioOp, Level, MockPeripheralDriver};
use crate::publisher::EventPublisher;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

fn create_test_config() -> DoorbellConfig {
    let mut config = DoorbellConfig::default();
    config.gpio.button_poll_ms = 5;
    config.heartbeat.interval_ms = 50;
    config.camera.resolution = (64, 48);
    config.camera.capture_timeout_seconds = 2;
    config
}

fn labels() -> AnnotationResult {
    [("Person", 0.97f32), ("Package", 0.58)].into_iter().collect()
}

struct RecordingAnnotator {
    result: Result<AnnotationResult, NetworkError>,
    calls: AtomicUsize,
    // When set, each call waits for one permit before answering
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl AnnotationClient for RecordingAnnotator {
    fn name(&self) -> &str {
        "recording"
    }

    async fn annotate(&self, image: &ImageBuffer) -> Result<AnnotationResult, NetworkError> {
        assert_eq!(image.encoding(), ImageEncoding::Jpeg);
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.result.clone()
    }
}

#[derive(Default)]
struct RecordingPublisher {
    fail: bool,
    published: Mutex<Vec<DoorbellEvent>>,
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    fn name(&self) -> &str {
        "recording"
    }

    async fn publish(&self, event: &DoorbellEvent) -> Result<(), NetworkError> {
        self.published.lock().push(event.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(NetworkError::Status {
                code: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

struct Harness {
    orchestrator: DoorbellOrchestrator,
    peripheral: Arc<MockPeripheralDriver>,
    camera: Arc<MockCameraDriver>,
    annotator: Arc<RecordingAnnotator>,
    publisher: Arc<RecordingPublisher>,
}

#[derive(Default)]
struct Gates {
    annotate: Option<Arc<Notify>>,
    publish: Option<Arc<Notify>>,
}

fn harness(
    config: DoorbellConfig,
    mode: MockCaptureMode,
    annotation: Result<AnnotationResult, NetworkError>,
    publish_fails: bool,
) -> Harness {
    gated_harness(config, mode, annotation, publish_fails, Gates::default())
}

fn gated_harness(
    config: DoorbellConfig,
    mode: MockCaptureMode,
    annotation: Result<AnnotationResult, NetworkError>,
    publish_fails: bool,
    gates: Gates,
) -> Harness {
    let peripheral = mock_peripheral(&config);
    let camera = Arc::new(MockCameraDriver::with_mode(config.camera.resolution, mode));
    let annotator = Arc::new(RecordingAnnotator {
        result: annotation,
        calls: AtomicUsize::new(0),
        gate: gates.annotate,
    });
    let publisher = Arc::new(RecordingPublisher {
        fail: publish_fails,
        gate: gates.publish,
        ..RecordingPublisher::default()
    });

    let collaborators = Collaborators::new(
        peripheral.clone(),
        camera.clone(),
        annotator.clone(),
        publisher.clone(),
    );

    Harness {
        orchestrator: DoorbellOrchestrator::with_collaborators(config, collaborators),
        peripheral,
        camera,
        annotator,
        publisher,
    }
}

fn default_harness() -> Harness {
    harness(
        create_test_config(),
        MockCaptureMode::Deliver {
            delay: Duration::from_millis(10),
        },
        Ok(labels()),
        false,
    )
}

/// Apply the next stage result by hand, without the run loop
async fn step(orchestrator: &mut DoorbellOrchestrator) {
    let result = tokio::time::timeout(Duration::from_secs(5), orchestrator.stage_rx.recv())
        .await
        .expect("no stage result arrived")
        .expect("stage channel closed");
    orchestrator.handle_stage_result(result);
}

/// Step until the cycle reaches `target`
async fn step_until(orchestrator: &mut DoorbellOrchestrator, target: CycleState) {
    while orchestrator.cycle_state() != target {
        step(orchestrator).await;
    }
}

fn assert_press_rejected(h: &mut Harness, state: CycleState) {
    assert_eq!(h.orchestrator.request_capture(), Err(CaptureError::Busy));
    assert_eq!(h.orchestrator.cycle_state(), state);
    assert_eq!(h.orchestrator.cycle_stats().started, 1);
    assert_eq!(h.camera.trigger_count(), 1);
}

/// Record bus events and request shutdown once `cycles` cycles are back in Idle
fn stop_after_cycles(
    orchestrator: &DoorbellOrchestrator,
    cycles: usize,
) -> JoinHandle<Vec<SystemEvent>> {
    let mut receiver = orchestrator.event_bus().subscribe();
    let handle = orchestrator.shutdown_handle();

    tokio::spawn(async move {
        let mut events = Vec::new();
        let mut finished = 0;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let idle = matches!(
                        event,
                        SystemEvent::CycleStateChanged {
                            to: CycleState::Idle,
                            ..
                        }
                    );
                    events.push(event);
                    if idle {
                        finished += 1;
                        if finished == cycles {
                            handle.request(ShutdownReason::UserRequest);
                            return events;
                        }
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return events,
            }
        }
    })
}

async fn run_until_shutdown(orchestrator: &mut DoorbellOrchestrator) -> ShutdownReason {
    tokio::time::timeout(Duration::from_secs(10), orchestrator.run_loop())
        .await
        .expect("run loop did not stop")
}

fn transitions(events: &[SystemEvent]) -> Vec<(CycleState, CycleState)> {
    events
        .iter()
        .filter_map(|event| match event {
            SystemEvent::CycleStateChanged { from, to, .. } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}

fn failed_stage(events: &[SystemEvent]) -> Option<(CycleStage, String)> {
    events.iter().find_map(|event| match event {
        SystemEvent::CycleFailed { stage, error, .. } => Some((*stage, error.clone())),
        _ => None,
    })
}

#[tokio::test]
async fn test_orchestrator_creation() {
    let orchestrator = DoorbellOrchestrator::new(create_test_config()).unwrap();

    let states = orchestrator.get_all_component_states();
    assert!(states.is_empty()); // No components started yet
    assert_eq!(orchestrator.cycle_state(), CycleState::Idle);
    assert_eq!(orchestrator.last_outcome(), None);
}

#[tokio::test]
async fn test_run_requires_start() {
    let mut h = default_harness();
    assert!(h.orchestrator.run().await.is_err());
}

#[tokio::test]
async fn test_start_twice_fails() {
    let mut h = default_harness();
    h.orchestrator.start().await.unwrap();
    assert!(h.orchestrator.start().await.is_err());
    h.orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_button_press_runs_full_cycle() {
    let mut h = default_harness();
    h.orchestrator.start().await.unwrap();
    assert_eq!(
        h.orchestrator.get_component_state("button"),
        Some(ComponentState::Running)
    );
    assert_eq!(
        h.orchestrator.get_component_state("camera"),
        Some(ComponentState::Running)
    );

    let watcher = stop_after_cycles(&h.orchestrator, 1);
    h.peripheral.set_level("BCM21", Level::Low);

    let reason = run_until_shutdown(&mut h.orchestrator).await;
    assert_eq!(reason, ShutdownReason::UserRequest);
    let events = watcher.await.unwrap();

    assert!(events
        .iter()
        .any(|e| matches!(e, SystemEvent::ButtonPressed { .. })));
    assert_eq!(
        transitions(&events),
        vec![
            (CycleState::Idle, CycleState::Triggering),
            (CycleState::Triggering, CycleState::AwaitingImage),
            (CycleState::AwaitingImage, CycleState::Encoding),
            (CycleState::Encoding, CycleState::Annotating),
            (CycleState::Annotating, CycleState::Publishing),
            (CycleState::Publishing, CycleState::Idle),
        ]
    );

    // The record carries exactly what the classifier returned
    let published = h.publisher.published.lock().clone();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].annotations(), &labels());
    assert_eq!(published[0].image().encoding(), ImageEncoding::Jpeg);
    assert!(events.iter().any(|e| matches!(
        e,
        SystemEvent::EventPublished { event_id, .. } if *event_id == published[0].id().to_string()
    )));

    assert_eq!(h.orchestrator.last_outcome(), Some(CycleOutcome::Success));
    assert_eq!(h.orchestrator.cycle_stats().succeeded, 1);
    assert_eq!(h.camera.trigger_count(), 1);

    assert_eq!(h.orchestrator.shutdown().await.unwrap(), 0);
}

#[tokio::test]
async fn test_annotation_failure_skips_publish() {
    let mut h = harness(
        create_test_config(),
        MockCaptureMode::default(),
        Err(NetworkError::Service {
            message: "quota exceeded".to_string(),
        }),
        false,
    );
    h.orchestrator.start().await.unwrap();
    let watcher = stop_after_cycles(&h.orchestrator, 1);

    assert_eq!(h.orchestrator.request_capture(), Ok(1));
    run_until_shutdown(&mut h.orchestrator).await;
    let events = watcher.await.unwrap();

    let (stage, error) = failed_stage(&events).unwrap();
    assert_eq!(stage, CycleStage::Annotation);
    assert!(error.contains("quota exceeded"));
    assert_eq!(
        transitions(&events).last(),
        Some(&(CycleState::Annotating, CycleState::Idle))
    );

    assert_eq!(h.annotator.calls.load(Ordering::SeqCst), 1);
    assert!(h.publisher.published.lock().is_empty());
    assert_eq!(h.orchestrator.last_outcome(), Some(CycleOutcome::Failed));

    h.orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_publish_failure_returns_to_idle() {
    let mut h = harness(
        create_test_config(),
        MockCaptureMode::default(),
        Ok(labels()),
        true,
    );
    h.orchestrator.start().await.unwrap();
    let watcher = stop_after_cycles(&h.orchestrator, 1);

    h.orchestrator.request_capture().unwrap();
    run_until_shutdown(&mut h.orchestrator).await;
    let events = watcher.await.unwrap();

    let (stage, error) = failed_stage(&events).unwrap();
    assert_eq!(stage, CycleStage::Publish);
    assert!(error.contains("503"));
    assert_eq!(h.publisher.published.lock().len(), 1);

    // The next press is admitted
    assert!(h.orchestrator.cycle_state().is_idle());
    assert_eq!(h.orchestrator.request_capture(), Ok(2));

    h.orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_capture_driver_failure_fails_cycle() {
    let mut h = harness(
        create_test_config(),
        MockCaptureMode::Fail {
            delay: Duration::from_millis(5),
            details: "sensor unplugged".to_string(),
        },
        Ok(labels()),
        false,
    );
    h.orchestrator.start().await.unwrap();
    let watcher = stop_after_cycles(&h.orchestrator, 1);

    h.orchestrator.request_capture().unwrap();
    run_until_shutdown(&mut h.orchestrator).await;
    let events = watcher.await.unwrap();

    let (stage, error) = failed_stage(&events).unwrap();
    assert_eq!(stage, CycleStage::Capture);
    assert!(error.contains("sensor unplugged"));
    assert_eq!(h.annotator.calls.load(Ordering::SeqCst), 0);

    h.orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_press_while_busy_is_ignored() {
    let mut h = harness(
        create_test_config(),
        MockCaptureMode::Hang,
        Ok(labels()),
        false,
    );
    h.orchestrator.start().await.unwrap();

    assert_eq!(h.orchestrator.request_capture(), Ok(1));
    assert_eq!(h.orchestrator.cycle_state(), CycleState::AwaitingImage);

    assert_eq!(h.orchestrator.request_capture(), Err(CaptureError::Busy));
    assert_eq!(h.orchestrator.cycle_state(), CycleState::AwaitingImage);
    assert_eq!(h.orchestrator.cycle_stats().presses_ignored, 1);
    assert_eq!(h.orchestrator.cycle_stats().started, 1);
    assert_eq!(h.camera.trigger_count(), 1);

    // The client refuses a second trigger on its own as well
    assert_eq!(
        h.orchestrator.collaborators.capture.trigger(99),
        Err(CaptureError::Busy)
    );

    h.orchestrator.shutdown().await.unwrap();
    assert_eq!(h.camera.held_count(), 0);
}

#[tokio::test]
async fn test_stale_stage_result_is_ignored() {
    let mut h = harness(
        create_test_config(),
        MockCaptureMode::Hang,
        Ok(labels()),
        false,
    );
    h.orchestrator.start().await.unwrap();
    let cycle_id = h.orchestrator.request_capture().unwrap();

    h.orchestrator.handle_stage_result(StageResult::Encoded {
        cycle_id,
        result: Ok(ImageBuffer::jpeg(vec![0xFF, 0xD8])),
    });
    h.orchestrator.handle_stage_result(StageResult::Published {
        cycle_id: cycle_id + 7,
        event_id: uuid::Uuid::new_v4(),
        result: Ok(()),
    });

    assert_eq!(h.orchestrator.cycle_state(), CycleState::AwaitingImage);
    assert_eq!(h.orchestrator.last_outcome(), None);

    h.orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_capture_timeout_abandons_cycle() {
    let mut config = create_test_config();
    config.camera.capture_timeout_seconds = 1;
    let mut h = harness(config, MockCaptureMode::Hang, Ok(labels()), false);
    h.orchestrator.start().await.unwrap();
    let watcher = stop_after_cycles(&h.orchestrator, 1);

    h.orchestrator.request_capture().unwrap();
    run_until_shutdown(&mut h.orchestrator).await;
    let events = watcher.await.unwrap();

    let (stage, error) = failed_stage(&events).unwrap();
    assert_eq!(stage, CycleStage::Capture);
    assert_eq!(error, CaptureError::Timeout { seconds: 1 }.to_string());
    assert!(!h.orchestrator.collaborators.capture.is_busy());
    assert_eq!(h.orchestrator.last_outcome(), Some(CycleOutcome::Failed));

    h.orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_led_before_button() {
    let mut config = create_test_config();
    config.heartbeat.interval_ms = 10;
    let mut h = harness(config, MockCaptureMode::default(), Ok(labels()), false);
    h.orchestrator.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(h.orchestrator.shutdown().await.unwrap(), 0);
    // Idempotent
    assert_eq!(h.orchestrator.shutdown().await.unwrap(), 0);

    let journal = h.peripheral.journal();
    let close_of = |line: &str| {
        journal
            .iter()
            .enumerate()
            .filter(|(_, op)| matches!(op, GpioOp::Close { line: l } if l == line))
            .map(|(i, _)| i)
            .collect::<Vec<_>>()
    };

    let led_closes = close_of("BCM6");
    let button_closes = close_of("BCM21");
    assert_eq!(led_closes.len(), 1);
    assert_eq!(button_closes.len(), 1);
    assert!(led_closes[0] < button_closes[0]);

    assert!(!h.peripheral.writes_to("BCM6").is_empty());
    assert!(!journal[led_closes[0]..]
        .iter()
        .any(|op| matches!(op, GpioOp::Write { line, .. } if line == "BCM6")));

    assert!(!h.peripheral.is_line_open("BCM6"));
    assert!(!h.peripheral.is_line_open("BCM21"));
    assert_eq!(
        h.orchestrator.get_component_state("led"),
        Some(ComponentState::Stopped)
    );
}

#[tokio::test]
async fn test_led_failure_is_not_fatal() {
    let mut h = default_harness();
    h.peripheral.fail_opens_on("BCM6");

    h.orchestrator.start().await.unwrap();
    assert_eq!(
        h.orchestrator.get_component_state("led"),
        Some(ComponentState::Failed)
    );
    assert_eq!(h.orchestrator.get_component_state("heartbeat"), None);

    // Doorbell still rings
    let watcher = stop_after_cycles(&h.orchestrator, 1);
    h.orchestrator.request_capture().unwrap();
    run_until_shutdown(&mut h.orchestrator).await;
    watcher.await.unwrap();
    assert_eq!(h.orchestrator.last_outcome(), Some(CycleOutcome::Success));

    assert_eq!(h.orchestrator.shutdown().await.unwrap(), 0);
}

#[tokio::test]
async fn test_button_failure_aborts_start() {
    let mut h = default_harness();
    h.peripheral.fail_opens_on("BCM21");

    assert!(h.orchestrator.start().await.is_err());
    assert_eq!(
        h.orchestrator.get_component_state("button"),
        Some(ComponentState::Failed)
    );
    assert!(!h.camera.is_initialized());

    h.orchestrator.shutdown().await.unwrap();
    assert!(!h.peripheral.is_line_open("BCM6"));
}

#[tokio::test]
async fn test_camera_failure_aborts_start() {
    let mut h = default_harness();
    h.camera.fail_initialize();

    assert!(h.orchestrator.start().await.is_err());
    assert_eq!(
        h.orchestrator.get_component_state("camera"),
        Some(ComponentState::Failed)
    );

    h.orchestrator.shutdown().await.unwrap();
    assert!(!h.peripheral.is_line_open("BCM21"));
}

#[tokio::test]
async fn test_press_while_encoding_is_ignored() {
    let mut h = default_harness();
    h.orchestrator.start().await.unwrap();

    assert_eq!(h.orchestrator.request_capture(), Ok(1));
    // The encode result sits in the channel until stepped
    step_until(&mut h.orchestrator, CycleState::Encoding).await;
    assert_press_rejected(&mut h, CycleState::Encoding);

    step_until(&mut h.orchestrator, CycleState::Idle).await;
    assert_eq!(h.orchestrator.last_outcome(), Some(CycleOutcome::Success));
    assert_eq!(h.orchestrator.shutdown().await.unwrap(), 0);
}

#[tokio::test]
async fn test_press_while_annotating_is_ignored() {
    let gate = Arc::new(Notify::new());
    let mut h = gated_harness(
        create_test_config(),
        MockCaptureMode::default(),
        Ok(labels()),
        false,
        Gates {
            annotate: Some(gate.clone()),
            ..Gates::default()
        },
    );
    h.orchestrator.start().await.unwrap();

    assert_eq!(h.orchestrator.request_capture(), Ok(1));
    step_until(&mut h.orchestrator, CycleState::Annotating).await;

    assert_press_rejected(&mut h, CycleState::Annotating);
    assert_press_rejected(&mut h, CycleState::Annotating);
    assert_eq!(h.orchestrator.cycle_stats().presses_ignored, 2);
    assert!(h.publisher.published.lock().is_empty());

    gate.notify_one();
    step_until(&mut h.orchestrator, CycleState::Idle).await;

    assert_eq!(h.orchestrator.last_outcome(), Some(CycleOutcome::Success));
    assert_eq!(h.annotator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.publisher.published.lock().len(), 1);
    assert_eq!(h.camera.trigger_count(), 1);

    // Idle again, so the next press starts cycle 2
    assert_eq!(h.orchestrator.request_capture(), Ok(2));
    h.orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_press_while_publishing_is_ignored() {
    let gate = Arc::new(Notify::new());
    let mut h = gated_harness(
        create_test_config(),
        MockCaptureMode::default(),
        Ok(labels()),
        false,
        Gates {
            publish: Some(gate.clone()),
            ..Gates::default()
        },
    );
    h.orchestrator.start().await.unwrap();

    assert_eq!(h.orchestrator.request_capture(), Ok(1));
    step_until(&mut h.orchestrator, CycleState::Publishing).await;

    assert_press_rejected(&mut h, CycleState::Publishing);
    assert_eq!(h.orchestrator.cycle_stats().presses_ignored, 1);
    assert_eq!(h.orchestrator.last_outcome(), None);

    gate.notify_one();
    step_until(&mut h.orchestrator, CycleState::Idle).await;

    assert_eq!(h.orchestrator.last_outcome(), Some(CycleOutcome::Success));
    assert_eq!(h.orchestrator.cycle_stats().succeeded, 1);
    assert_eq!(h.publisher.published.lock().len(), 1);
    assert_eq!(h.camera.trigger_count(), 1);

    h.orchestrator.shutdown().await.unwrap();
}

/// Camera double that notes whether the button line was still held on close
struct CloseOrderCamera {
    inner: MockCameraDriver,
    peripheral: Arc<MockPeripheralDriver>,
    button_open_at_close: Mutex<Option<bool>>,
}

#[async_trait]
impl CameraDriver for CloseOrderCamera {
    fn name(&self) -> &str {
        "close-order"
    }

    async fn initialize(&self) -> Result<(), CaptureError> {
        self.inner.initialize().await
    }

    fn trigger(&self, sink: FrameSink) -> Result<(), CaptureError> {
        self.inner.trigger(sink)
    }

    async fn close(&self) {
        *self.button_open_at_close.lock() = Some(self.peripheral.is_line_open("BCM21"));
        self.inner.close().await;
    }
}

#[tokio::test]
async fn test_shutdown_closes_camera_before_button() {
    let config = create_test_config();
    let peripheral = mock_peripheral(&config);
    let camera = Arc::new(CloseOrderCamera {
        inner: MockCameraDriver::new(config.camera.resolution),
        peripheral: peripheral.clone(),
        button_open_at_close: Mutex::new(None),
    });
    let collaborators = Collaborators::new(
        peripheral.clone(),
        camera.clone(),
        Arc::new(RecordingAnnotator {
            result: Ok(labels()),
            calls: AtomicUsize::new(0),
            gate: None,
        }),
        Arc::new(RecordingPublisher::default()),
    );
    let mut orchestrator = DoorbellOrchestrator::with_collaborators(config, collaborators);
    orchestrator.start().await.unwrap();
    assert!(camera.inner.is_initialized());

    assert_eq!(orchestrator.shutdown().await.unwrap(), 0);

    assert_eq!(*camera.button_open_at_close.lock(), Some(true));
    assert!(!camera.inner.is_initialized());
    assert!(!peripheral.is_line_open("BCM21"));
    assert_eq!(
        orchestrator.get_component_state("camera"),
        Some(ComponentState::Stopped)
    );
}
