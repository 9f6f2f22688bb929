//! Functional tests for the workflow controller

use adversarial_workflow::backend::{
    CorruptionRequest, CorruptionResult, CorruptionService, DetectionService, IterationBudget,
};
use adversarial_workflow::config::Settings;
use adversarial_workflow::media::file::FileDownloader;
use adversarial_workflow::media::{DataUrl, ImagePayload};
use adversarial_workflow::workflow::{
    Notification, NotificationLevel, Notifier, Outcome, Phase, WorkflowParams,
};
use adversarial_workflow::{AppError, ErrorKind, Result, WorkflowController};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use wiremock::matchers::{method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

fn source_image() -> ImagePayload {
    ImagePayload::new(PNG_MAGIC.to_vec(), "street.png")
}

fn corruption_result(adv: &[u8], noise: &[u8]) -> CorruptionResult {
    CorruptionResult {
        adversarial: DataUrl::from_bytes(adv, "image/jpeg"),
        noise: DataUrl::from_bytes(noise, "image/jpeg"),
    }
}

/// Corruption service replaying scripted responses
#[derive(Default)]
struct StubCorruption {
    responses: Mutex<VecDeque<Result<CorruptionResult>>>,
    requests: Mutex<Vec<CorruptionRequest>>,
    calls: AtomicUsize,
}

impl StubCorruption {
    fn with(responses: Vec<Result<CorruptionResult>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CorruptionService for StubCorruption {
    async fn submit_corruption(
        &self,
        _image: &ImagePayload,
        request: &CorruptionRequest,
    ) -> Result<CorruptionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::Service("no scripted response".to_string())))
    }
}

/// Detection service answering by file name, optionally held behind a gate
struct StubDetection {
    original: Mutex<std::result::Result<String, String>>,
    corrupted: Mutex<std::result::Result<String, String>>,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<ImagePayload>>,
}

impl StubDetection {
    fn new(original: &str, corrupted: &str) -> Self {
        Self {
            original: Mutex::new(Ok(original.to_string())),
            corrupted: Mutex::new(Ok(corrupted.to_string())),
            gate: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn wait_for_calls(&self, n: usize) {
        while self.calls() < n {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl DetectionService for StubDetection {
    async fn submit_detection(&self, image: &ImagePayload, _model: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(image.clone());
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.expect("gate closed");
        }
        let scripted = if image.file_name.starts_with("adversarial") {
            self.corrupted.lock().clone()
        } else {
            self.original.lock().clone()
        };
        scripted.map_err(AppError::Service)
    }
}

type Recorded = Arc<Mutex<Vec<Notification>>>;

fn recording_notifier() -> (Arc<dyn Notifier>, Recorded) {
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = recorded.clone();
    let notifier = move |n: Notification| sink.lock().push(n);
    (Arc::new(notifier), recorded)
}

fn controller(
    corruption: Arc<StubCorruption>,
    detection: Arc<StubDetection>,
) -> (WorkflowController, Recorded) {
    let (notifier, recorded) = recording_notifier();
    let controller =
        WorkflowController::new(corruption, detection, notifier, WorkflowParams::default());
    (controller, recorded)
}

fn last_level(recorded: &Recorded) -> Option<NotificationLevel> {
    recorded.lock().last().map(|n| n.level)
}

// Scenario A
#[tokio::test]
async fn test_generate_stores_decoded_result() {
    let corruption = StubCorruption::with(vec![Ok(corruption_result(b"AAA", b"BBB"))]);
    let detection = Arc::new(StubDetection::new("person: 1", "person: 0"));
    let (controller, recorded) = controller(corruption.clone(), detection);

    controller.capture_image(source_image()).unwrap();
    controller.set_model("yolov8n");
    controller.set_iterations("-1");
    controller.set_strategy("vanishing");

    assert_eq!(controller.generate().await.unwrap(), Outcome::Applied);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.phase, Phase::Ready);
    let result = snapshot.corruption.unwrap();
    assert_eq!(result.adversarial.decode().unwrap(), b"AAA");
    assert_eq!(result.noise.decode().unwrap(), b"BBB");
    assert!(snapshot.detection.is_none());

    let sent = corruption.requests.lock()[0].clone();
    assert_eq!(sent.iterations, IterationBudget::UseDefault);
    assert_eq!(last_level(&recorded), Some(NotificationLevel::Success));
}

// Scenario B
#[tokio::test]
async fn test_compare_publishes_both_summaries() {
    let corruption = StubCorruption::with(vec![Ok(corruption_result(b"AAA", b"BBB"))]);
    let detection = Arc::new(StubDetection::new("person: 1", "person: 0"));
    let (controller, _) = controller(corruption, detection.clone());

    controller.capture_image(source_image()).unwrap();
    controller.generate().await.unwrap();
    assert_eq!(controller.compare().await.unwrap(), Outcome::Applied);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.phase, Phase::Ready);
    let result = snapshot.detection.unwrap();
    assert_eq!(result.original, "person: 1");
    assert_eq!(result.corrupted, "person: 0");

    assert_eq!(detection.calls(), 2);
    let seen = detection.seen.lock();
    let corrupted = seen.iter().find(|p| p.file_name.starts_with("adversarial")).unwrap();
    assert_eq!(corrupted.bytes, b"AAA");
    assert_eq!(corrupted.content_type, "image/jpeg");
}

// Scenario C
#[tokio::test]
async fn test_generate_without_image_is_precondition() {
    let corruption = StubCorruption::with(vec![Ok(corruption_result(b"AAA", b"BBB"))]);
    let detection = Arc::new(StubDetection::new("", ""));
    let (controller, recorded) = controller(corruption.clone(), detection);

    let err = controller.generate().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(corruption.calls(), 0);
    assert_eq!(controller.snapshot().phase, Phase::Idle);
    assert_eq!(last_level(&recorded), Some(NotificationLevel::Error));
}

// Scenario D, end to end over HTTP
#[tokio::test]
async fn test_generate_service_failure_stays_idle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = Settings::default();
    settings.service.base_url = server.uri();
    let (notifier, recorded) = recording_notifier();
    let controller = WorkflowController::from_settings(&settings, notifier).unwrap();

    controller.capture_image(source_image()).unwrap();
    let err = controller.generate().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Service);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.phase, Phase::Idle);
    assert!(snapshot.corruption.is_none());
    assert!(snapshot.has_image());
    assert_eq!(last_level(&recorded), Some(NotificationLevel::Error));
}

// Scenario E
#[tokio::test]
async fn test_compare_before_generate_is_precondition() {
    let corruption = StubCorruption::with(vec![]);
    let detection = Arc::new(StubDetection::new("person: 1", "person: 0"));
    let (controller, _) = controller(corruption, detection.clone());

    controller.capture_image(source_image()).unwrap();
    let err = controller.compare().await.unwrap_err();
    assert!(err.is_precondition());
    assert_eq!(detection.calls(), 0);
    assert_eq!(controller.snapshot().phase, Phase::Idle);
}

#[tokio::test]
async fn test_invalid_iterations_fail_before_network() {
    let corruption = StubCorruption::with(vec![Ok(corruption_result(b"AAA", b"BBB"))]);
    let detection = Arc::new(StubDetection::new("", ""));
    let (controller, _) = controller(corruption.clone(), detection);

    controller.capture_image(source_image()).unwrap();
    controller.generate().await.unwrap();

    for bad in ["0", "-2", "abc", "", "1.5"] {
        controller.set_iterations(bad);
        let err = controller.generate().await.unwrap_err();
        assert!(err.is_precondition(), "{bad:?}");
    }
    assert_eq!(corruption.calls(), 1);

    // A rejected generate leaves the previous result alone
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.phase, Phase::Ready);
    assert!(snapshot.corruption.is_some());
}

#[tokio::test]
async fn test_regenerate_clears_detection() {
    let corruption = StubCorruption::with(vec![
        Ok(corruption_result(b"AAA", b"BBB")),
        Ok(corruption_result(b"CCC", b"DDD")),
    ]);
    let detection = Arc::new(StubDetection::new("person: 1", "person: 0"));
    let (controller, _) = controller(corruption, detection);

    controller.capture_image(source_image()).unwrap();
    controller.generate().await.unwrap();
    controller.compare().await.unwrap();
    assert!(controller.snapshot().detection.is_some());

    controller.generate().await.unwrap();
    let snapshot = controller.snapshot();
    assert!(snapshot.detection.is_none());
    assert_eq!(snapshot.corruption.unwrap().adversarial.decode().unwrap(), b"CCC");
}

#[tokio::test]
async fn test_failed_compare_publishes_nothing() {
    let corruption = StubCorruption::with(vec![Ok(corruption_result(b"AAA", b"BBB"))]);
    let detection = Arc::new(StubDetection::new("person: 1", "person: 0"));
    *detection.corrupted.lock() = Err("Service returned 500".to_string());
    let (controller, recorded) = controller(corruption, detection.clone());

    controller.capture_image(source_image()).unwrap();
    controller.generate().await.unwrap();
    let err = controller.compare().await.unwrap_err();
    assert!(err.is_service());

    // Both calls ran to completion even though one failed
    assert_eq!(detection.calls(), 2);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.phase, Phase::Ready);
    assert!(snapshot.detection.is_none());
    assert!(snapshot.corruption.is_some());
    assert_eq!(last_level(&recorded), Some(NotificationLevel::Error));
}

#[tokio::test]
async fn test_generate_during_compare_discards_stale_detection() {
    let corruption = StubCorruption::with(vec![
        Ok(corruption_result(b"AAA", b"BBB")),
        Ok(corruption_result(b"CCC", b"DDD")),
    ]);
    let gate = Arc::new(Semaphore::new(0));
    let detection = Arc::new(StubDetection::new("person: 1", "person: 0").gated(gate.clone()));
    let (controller, _) = controller(corruption, detection.clone());

    controller.capture_image(source_image()).unwrap();
    controller.generate().await.unwrap();

    let interrupt = async {
        detection.wait_for_calls(2).await;
        assert_eq!(controller.snapshot().phase, Phase::Comparing);
        let outcome = controller.generate().await;
        gate.add_permits(2);
        outcome
    };
    let (compared, regenerated) = tokio::join!(controller.compare(), interrupt);

    assert_eq!(compared.unwrap(), Outcome::Superseded);
    assert_eq!(regenerated.unwrap(), Outcome::Applied);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.phase, Phase::Ready);
    assert!(snapshot.detection.is_none());
    assert_eq!(snapshot.corruption.unwrap().adversarial.decode().unwrap(), b"CCC");
}

#[tokio::test]
async fn test_new_upload_discards_in_flight_compare() {
    let corruption = StubCorruption::with(vec![Ok(corruption_result(b"AAA", b"BBB"))]);
    let gate = Arc::new(Semaphore::new(0));
    let detection = Arc::new(StubDetection::new("person: 1", "person: 0").gated(gate.clone()));
    let (controller, _) = controller(corruption, detection.clone());

    controller.capture_image(source_image()).unwrap();
    controller.generate().await.unwrap();

    let upload = async {
        detection.wait_for_calls(2).await;
        controller
            .capture_image(ImagePayload::new(PNG_MAGIC.to_vec(), "other.png"))
            .unwrap();
        gate.add_permits(2);
    };
    let (compared, _) = tokio::join!(controller.compare(), upload);

    assert_eq!(compared.unwrap(), Outcome::Superseded);
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.phase, Phase::Idle);
    assert!(snapshot.corruption.is_none());
    assert!(snapshot.detection.is_none());
}

#[tokio::test]
async fn test_capture_rejects_non_image() {
    let corruption = StubCorruption::with(vec![]);
    let detection = Arc::new(StubDetection::new("", ""));
    let (controller, recorded) = controller(corruption, detection);

    let err = controller
        .capture_image(ImagePayload::new(b"hello".to_vec(), "notes.txt"))
        .unwrap_err();
    assert!(err.is_precondition());
    assert!(!controller.snapshot().has_image());
    assert_eq!(recorded.lock()[0].message, "Please upload an image file");
}

#[tokio::test]
async fn test_subscribers_see_transitions() {
    let corruption = StubCorruption::with(vec![Ok(corruption_result(b"AAA", b"BBB"))]);
    let detection = Arc::new(StubDetection::new("person: 1", "person: 0"));
    let (controller, _) = controller(corruption, detection);
    let mut updates = controller.subscribe();

    controller.capture_image(source_image()).unwrap();
    assert!(updates.has_changed().unwrap());
    assert!(updates.borrow_and_update().has_image());

    controller.generate().await.unwrap();
    let latest = updates.borrow_and_update().clone();
    assert_eq!(latest.phase, Phase::Ready);
    assert!(latest.corruption.is_some());

    controller.clear_image();
    assert!(!updates.borrow_and_update().has_image());
}

#[tokio::test]
async fn test_export_writes_both_images() {
    let corruption = StubCorruption::with(vec![Ok(corruption_result(b"AAA", b"BBB"))]);
    let detection = Arc::new(StubDetection::new("", ""));
    let (controller, _) = controller(corruption, detection);
    let dir = tempfile::tempdir().unwrap();
    let downloader = FileDownloader::new(dir.path());

    controller.capture_image(source_image()).unwrap();
    let err = controller.export_adversarial(&downloader).await.unwrap_err();
    assert!(err.is_precondition());

    controller.generate().await.unwrap();
    let adversarial = controller.export_adversarial(&downloader).await.unwrap();
    let noise = controller.export_noise(&downloader).await.unwrap();

    assert_eq!(adversarial, dir.path().join("corrupted-image.png"));
    assert_eq!(noise, dir.path().join("noise-pattern.png"));
    assert_eq!(std::fs::read(adversarial).unwrap(), b"AAA");
    assert_eq!(std::fs::read(noise).unwrap(), b"BBB");
}

/// Matches multipart bodies by the uploaded file name
struct UploadedFile(&'static str, bool);

impl Match for UploadedFile {
    fn matches(&self, request: &Request) -> bool {
        let needle = format!("filename=\"{}\"", self.0);
        String::from_utf8_lossy(&request.body).contains(&needle) == self.1
    }
}

#[tokio::test]
async fn test_full_workflow_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "adv_image_base64": "QUFB",
            "noise": "QkJC"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/detect"))
        .and(UploadedFile("adversarial.jpg", true))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "person: 0" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/detect"))
        .and(UploadedFile("adversarial.jpg", false))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "person: 1" })))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = Settings::default();
    settings.service.base_url = server.uri();
    let (notifier, _) = recording_notifier();
    let controller = WorkflowController::from_settings(&settings, notifier).unwrap();

    controller.capture_image(source_image()).unwrap();
    controller.generate().await.unwrap();
    controller.compare().await.unwrap();

    let snapshot = controller.snapshot();
    let corruption = snapshot.corruption.unwrap();
    assert_eq!(corruption.adversarial.decode().unwrap(), b"AAA");
    assert_eq!(corruption.noise.decode().unwrap(), b"BBB");
    let detection = snapshot.detection.unwrap();
    assert_eq!(detection.original, "person: 1");
    assert_eq!(detection.corrupted, "person: 0");
}
