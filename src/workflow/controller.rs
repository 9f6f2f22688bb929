//! Workflow controller sequencing corruption and detection calls
//!
//! Every entry point mutates state synchronously, releases the lock, awaits
//! the remote call and then re-acquires the lock to apply the outcome. An
//! outcome is applied only if the epoch captured at call time still matches:
//! generating or capturing a new image bumps the epoch, so anything that was
//! in flight against the previous corruption result is dropped on arrival.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::traits::{
    CorruptionRequest, CorruptionResult, CorruptionService, DetectionService,
};
use crate::backend::HttpServiceClient;
use crate::config::Settings;
use crate::error::{AppError, Result};
use crate::media::file::DownloadSink;
use crate::media::{DataUrl, ImagePayload};
use crate::workflow::notify::{Notification, Notifier};
use crate::workflow::state::{
    DetectionResult, Phase, SourceImage, WorkflowParams, WorkflowSnapshot, WorkflowState,
};

/// Suggested file name for the adversarial image download
pub const ADVERSARIAL_DOWNLOAD_NAME: &str = "corrupted-image.png";
/// Suggested file name for the noise pattern download
pub const NOISE_DOWNLOAD_NAME: &str = "noise-pattern.png";

/// What happened to the result of an asynchronous call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The result was written to state
    Applied,
    /// State moved on while the call was in flight; the result was dropped
    Superseded,
}

/// Owns the workflow state and sequences calls across both services
pub struct WorkflowController {
    id: Uuid,
    corruption: Arc<dyn CorruptionService>,
    detection: Arc<dyn DetectionService>,
    notifier: Arc<dyn Notifier>,
    state: Mutex<WorkflowState>,
    updates: watch::Sender<WorkflowSnapshot>,
}

/// Inputs captured when a compare starts
struct CompareJob {
    epoch: u64,
    ticket: u64,
    original: ImagePayload,
    corrupted: DataUrl,
    model: String,
}

impl WorkflowController {
    /// Create a controller over arbitrary service implementations
    pub fn new(
        corruption: Arc<dyn CorruptionService>,
        detection: Arc<dyn DetectionService>,
        notifier: Arc<dyn Notifier>,
        params: WorkflowParams,
    ) -> Self {
        let state = WorkflowState::new(params);
        let (updates, _) = watch::channel(state.snapshot());
        Self {
            id: Uuid::new_v4(),
            corruption,
            detection,
            notifier,
            state: Mutex::new(state),
            updates,
        }
    }

    /// Create a controller talking HTTP to the configured endpoint
    pub fn from_settings(settings: &Settings, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let client = Arc::new(HttpServiceClient::new(&settings.service)?);
        Ok(Self::new(
            client.clone(),
            client,
            notifier,
            WorkflowParams::from(&settings.defaults),
        ))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state as seen by the rendering surface
    pub fn snapshot(&self) -> WorkflowSnapshot {
        self.state.lock().snapshot()
    }

    /// Receive a snapshot after every state transition
    pub fn subscribe(&self) -> watch::Receiver<WorkflowSnapshot> {
        self.updates.subscribe()
    }

    fn publish(&self, state: &WorkflowState) {
        self.updates.send_replace(state.snapshot());
    }

    fn report(&self, err: &AppError) {
        self.notifier.notify(Notification::from_error(err));
    }

    /// Surface `err` to the user and hand it back
    fn reject<T>(&self, err: AppError) -> Result<T> {
        warn!(workflow = %self.id, error = %err, "Workflow action rejected");
        self.report(&err);
        Err(err)
    }

    /// Replace the source image, discarding all results
    pub fn capture_image(&self, payload: ImagePayload) -> Result<()> {
        match SourceImage::capture(payload) {
            Ok(source) => {
                self.install_source(Some(source));
                Ok(())
            }
            Err(e) => self.reject(e),
        }
    }

    /// Replace the source image using the handle the file picker already built
    pub fn capture_image_with_handle(&self, payload: ImagePayload, display: DataUrl) -> Result<()> {
        match SourceImage::from_parts(payload, display) {
            Ok(source) => {
                self.install_source(Some(source));
                Ok(())
            }
            Err(e) => self.reject(e),
        }
    }

    /// Remove the source image, discarding all results
    pub fn clear_image(&self) {
        self.install_source(None);
    }

    fn install_source(&self, source: Option<SourceImage>) {
        let mut state = self.state.lock();
        state.epoch += 1;
        state.clear_results();
        state.phase = Phase::Idle;
        if let Some(source) = &source {
            info!(
                workflow = %self.id,
                file = %source.payload().file_name,
                size = source.payload().len(),
                "Captured source image"
            );
        }
        state.source = source;
        self.publish(&state);
    }

    pub fn set_model(&self, model: impl Into<String>) {
        let mut state = self.state.lock();
        state.params.model = model.into();
        self.publish(&state);
    }

    pub fn set_iterations(&self, iterations: impl Into<String>) {
        let mut state = self.state.lock();
        state.params.iterations = iterations.into();
        self.publish(&state);
    }

    pub fn set_strategy(&self, strategy: impl Into<String>) {
        let mut state = self.state.lock();
        state.params.strategy = strategy.into();
        self.publish(&state);
    }

    /// Produce a new corruption result for the current image
    ///
    /// Clears any previous corruption and detection result before the call
    /// starts. Fails with `Precondition` without touching the network if no
    /// image is loaded or the parameters do not parse.
    pub async fn generate(&self) -> Result<Outcome> {
        let (epoch, image, request) = match self.begin_generate() {
            Ok(job) => job,
            Err(e) => return self.reject(e),
        };

        info!(
            workflow = %self.id,
            epoch,
            model = %request.model,
            n_iters = %request.iterations,
            ctype = %request.strategy,
            "Generating corrupted image"
        );

        let result = self.corruption.submit_corruption(&image, &request).await;

        let mut state = self.state.lock();
        if state.epoch != epoch {
            warn!(workflow = %self.id, epoch, current = state.epoch, "Discarding stale corruption result");
            return Ok(Outcome::Superseded);
        }

        match result {
            Ok(corruption) => {
                state.corruption = Some(corruption);
                state.phase = Phase::Ready;
                self.publish(&state);
                drop(state);
                info!(workflow = %self.id, epoch, "Corrupted image ready");
                self.notifier.notify(Notification::success("Image processed successfully"));
                Ok(Outcome::Applied)
            }
            Err(e) => {
                state.phase = Phase::Idle;
                self.publish(&state);
                drop(state);
                self.reject(e)
            }
        }
    }

    /// Run detection on the original and the corrupted image
    ///
    /// Both calls are issued together and both must succeed; nothing is
    /// published otherwise.
    pub async fn compare(&self) -> Result<Outcome> {
        let job = match self.begin_compare() {
            Ok(job) => job,
            Err(e) => return self.reject(e),
        };

        info!(workflow = %self.id, epoch = job.epoch, model = %job.model, "Running detection comparison");

        let (original, corrupted) = futures::join!(
            self.detection.submit_detection(&job.original, &job.model),
            self.detection
                .submit_detection_from_displayable(&job.corrupted, &job.model),
        );
        let joined = join_detections(original, corrupted);

        let mut state = self.state.lock();
        if state.epoch != job.epoch || state.compare_ticket != job.ticket {
            warn!(
                workflow = %self.id,
                epoch = job.epoch,
                current = state.epoch,
                "Discarding stale detection result"
            );
            return Ok(Outcome::Superseded);
        }

        state.phase = Phase::Ready;
        match joined {
            Ok(detection) => {
                debug!(
                    workflow = %self.id,
                    original = %detection.original,
                    corrupted = %detection.corrupted,
                    "Detection comparison finished"
                );
                state.detection = Some(detection);
                self.publish(&state);
                drop(state);
                self.notifier.notify(Notification::success("Detection comparison completed"));
                Ok(Outcome::Applied)
            }
            Err(e) => {
                self.publish(&state);
                drop(state);
                self.reject(e)
            }
        }
    }

    fn begin_generate(&self) -> Result<(u64, ImagePayload, CorruptionRequest)> {
        let mut state = self.state.lock();
        let image = state
            .source
            .as_ref()
            .map(|source| source.payload().clone())
            .ok_or_else(|| AppError::Precondition("Please upload an image first".to_string()))?;
        let request = state.params.to_request()?;

        state.epoch += 1;
        state.clear_results();
        state.phase = Phase::Generating;
        self.publish(&state);

        Ok((state.epoch, image, request))
    }

    fn begin_compare(&self) -> Result<CompareJob> {
        let mut state = self.state.lock();
        let (original, corrupted) = match (&state.source, &state.corruption) {
            (Some(source), Some(corruption)) => {
                (source.payload().clone(), corruption.adversarial.clone())
            }
            _ => {
                return Err(AppError::Precondition(
                    "Please generate a corrupted image first".to_string(),
                ))
            }
        };
        let model = state.params.model.trim().to_string();
        if model.is_empty() {
            return Err(AppError::Precondition("Please select a model".to_string()));
        }

        state.compare_ticket += 1;
        state.detection = None;
        state.phase = Phase::Comparing;
        self.publish(&state);

        Ok(CompareJob {
            epoch: state.epoch,
            ticket: state.compare_ticket,
            original,
            corrupted,
            model,
        })
    }

    /// Hand the adversarial image to `sink`
    pub async fn export_adversarial(&self, sink: &dyn DownloadSink) -> Result<PathBuf> {
        let handle = self.current_result(|r| r.adversarial.clone());
        self.export(handle, sink, ADVERSARIAL_DOWNLOAD_NAME).await
    }

    /// Hand the noise pattern to `sink`
    pub async fn export_noise(&self, sink: &dyn DownloadSink) -> Result<PathBuf> {
        let handle = self.current_result(|r| r.noise.clone());
        self.export(handle, sink, NOISE_DOWNLOAD_NAME).await
    }

    fn current_result<F>(&self, pick: F) -> Option<DataUrl>
    where
        F: FnOnce(&CorruptionResult) -> DataUrl,
    {
        self.state.lock().corruption.as_ref().map(pick)
    }

    async fn export(
        &self,
        handle: Option<DataUrl>,
        sink: &dyn DownloadSink,
        name: &str,
    ) -> Result<PathBuf> {
        let handle = match handle {
            Some(handle) => handle,
            None => {
                return self.reject(AppError::Precondition(
                    "Please generate a corrupted image first".to_string(),
                ))
            }
        };
        match sink.save(&handle, name).await {
            Ok(path) => {
                self.notifier.notify(Notification::success(format!("Saved {}", path.display())));
                Ok(path)
            }
            Err(e) => self.reject(e),
        }
    }
}

/// Combine both detection outcomes; any failure means no result
fn join_detections(
    original: Result<String>,
    corrupted: Result<String>,
) -> Result<DetectionResult> {
    match (original, corrupted) {
        (Ok(original), Ok(corrupted)) => Ok(DetectionResult { original, corrupted }),
        (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
        (Err(first), Err(second)) => {
            let message = format!("original image: {}; corrupted image: {}", first, second);
            Err(match first {
                AppError::Decode(_) => AppError::Decode(message),
                AppError::InvalidRequest(_) => AppError::InvalidRequest(message),
                _ => AppError::Service(message),
            })
        }
    }
}
