use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::api::{Backend, ImportProgress, ImportStage, UploadObserver};
use crate::errors::{AppError, AppResult};

/// Receives a state snapshot after every observable change. A terminal
/// snapshot doubles as the signal to hide the progress indicator and reset
/// the file picker.
pub type ImportObserver = Arc<dyn Fn(ImportJob) + Send + Sync>;

type JobSlot = Arc<Mutex<Option<ImportJob>>>;
type ObserverSlot = Arc<Mutex<Option<ImportObserver>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportPhase {
    Created,
    Uploading,
    Importing,
    Finalizing,
    Done,
    Error,
}

impl ImportPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ImportPhase::Done | ImportPhase::Error)
    }
}

/// One import attempt. No job in the slot means the dashboard is idle.
#[derive(Debug, Clone, Serialize)]
pub struct ImportJob {
    pub job_id: Option<String>,
    pub phase: ImportPhase,
    /// Share of the payload handed to the transport; `None` while the size
    /// is unknown (indeterminate indicator).
    pub upload_pct: Option<u8>,
    /// Server-side processing percentage from the status polls.
    pub server_pct: Option<u8>,
    pub notice: Option<String>,
}

impl ImportJob {
    fn new() -> Self {
        Self {
            job_id: None,
            phase: ImportPhase::Created,
            upload_pct: None,
            server_pct: None,
            notice: None,
        }
    }
}

/// Drives one CSV import end to end: job creation, the upload, and a
/// concurrent status-poll loop. The upload response decides the terminal
/// state; polls only animate progress in between.
pub struct ImportController {
    backend: Arc<dyn Backend>,
    poll_interval: Duration,
    job: JobSlot,
    observer: ObserverSlot,
}

impl ImportController {
    pub fn new(backend: Arc<dyn Backend>, poll_interval: Duration) -> Self {
        Self {
            backend,
            poll_interval,
            job: Arc::new(Mutex::new(None)),
            observer: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_observer(&self, observer: ImportObserver) {
        *self.observer.lock() = Some(observer);
    }

    pub fn snapshot(&self) -> Option<ImportJob> {
        self.job.lock().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.job
            .lock()
            .as_ref()
            .is_some_and(|job| !job.phase.is_terminal())
    }

    /// Runs one import and returns the terminal job state. A second call
    /// while a job is still running is rejected without touching it.
    pub async fn run_import(&self, file_name: &str, payload: Vec<u8>) -> AppResult<ImportJob> {
        if !self.try_claim() {
            return Err(AppError::Import("An import is already running.".into()));
        }
        info!(file = file_name, bytes = payload.len(), "starting import");

        let cancel = Arc::new(AtomicBool::new(false));
        let outcome = self.drive(file_name, payload, &cancel).await;

        // Single cleanup step shared by every path: the poller is stopped
        // before the outcome is interpreted.
        cancel.store(true, Ordering::SeqCst);
        Ok(self.finalize(outcome))
    }

    fn try_claim(&self) -> bool {
        let snapshot = {
            let mut slot = self.job.lock();
            if slot.as_ref().is_some_and(|job| !job.phase.is_terminal()) {
                return false;
            }
            let job = ImportJob::new();
            *slot = Some(job.clone());
            job
        };
        notify(&self.observer, snapshot);
        true
    }

    async fn drive(
        &self,
        file_name: &str,
        payload: Vec<u8>,
        cancel: &Arc<AtomicBool>,
    ) -> AppResult<String> {
        let job_id = self.backend.import_start().await?;
        debug!(%job_id, "import job issued");
        update_job(&self.job, &self.observer, |job| {
            job.job_id = Some(job_id.clone());
        });

        self.spawn_poller(job_id.clone(), cancel.clone());
        update_job(&self.job, &self.observer, |job| {
            job.phase = ImportPhase::Uploading;
        });

        let progress = self.upload_observer();
        self.backend
            .import_upload(&job_id, file_name, payload, progress)
            .await
    }

    fn upload_observer(&self) -> UploadObserver {
        let slot = self.job.clone();
        let observer = self.observer.clone();
        Arc::new(move |sent, total| {
            update_job(&slot, &observer, |job| {
                job.upload_pct = match total {
                    Some(total) if total > 0 => Some(((sent.min(total) * 100) / total) as u8),
                    _ => None,
                };
            });
        })
    }

    fn spawn_poller(&self, job_id: String, cancel: Arc<AtomicBool>) {
        let backend = self.backend.clone();
        let slot = self.job.clone();
        let observer = self.observer.clone();
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                ticker.tick().await;
                if cancel.load(Ordering::SeqCst) {
                    break;
                }
                let report = backend.import_progress(&job_id).await;
                if cancel.load(Ordering::SeqCst) {
                    // The job resolved while this report was in flight; it
                    // must not reanimate the indicator.
                    break;
                }
                match report {
                    Ok(progress) => {
                        let failed = progress.stage == ImportStage::Error;
                        update_job(&slot, &observer, |job| apply_stage(job, &progress));
                        if failed {
                            cancel.store(true, Ordering::SeqCst);
                            break;
                        }
                    }
                    Err(err) => {
                        debug!(?err, "progress poll failed; retrying on next tick");
                    }
                }
            }
        });
    }

    /// Writes the terminal state decided by the upload response, unless a
    /// poll already ended the job.
    fn finalize(&self, outcome: AppResult<String>) -> ImportJob {
        let (snapshot, changed) = {
            let mut slot = self.job.lock();
            let job = slot.get_or_insert_with(ImportJob::new);
            let mut changed = false;
            if !job.phase.is_terminal() {
                match &outcome {
                    Ok(message) => {
                        job.phase = ImportPhase::Done;
                        job.upload_pct = Some(100);
                        job.server_pct = Some(100);
                        job.notice = Some(message.clone());
                    }
                    Err(err) => {
                        job.phase = ImportPhase::Error;
                        job.notice = Some(import_message(err));
                    }
                }
                changed = true;
            }
            (job.clone(), changed)
        };
        if changed {
            notify(&self.observer, snapshot.clone());
        }
        snapshot
    }
}

fn apply_stage(job: &mut ImportJob, progress: &ImportProgress) {
    match progress.stage {
        ImportStage::Importing => {
            job.phase = ImportPhase::Importing;
            job.server_pct = progress.pct.map(clamp_pct);
        }
        ImportStage::Finalizing => {
            job.phase = ImportPhase::Finalizing;
            job.server_pct = Some(100);
        }
        ImportStage::Done => {
            // The upload response, not the poll, declares success.
            job.phase = ImportPhase::Finalizing;
            job.server_pct = Some(100);
        }
        ImportStage::Error => {
            job.phase = ImportPhase::Error;
            job.notice = Some("Import failed on the server.".to_string());
        }
    }
}

fn clamp_pct(pct: f64) -> u8 {
    pct.clamp(0.0, 100.0) as u8
}

/// Mutates the current job and publishes the new snapshot. Terminal jobs
/// are left alone.
fn update_job(slot: &JobSlot, observer: &ObserverSlot, mutate: impl FnOnce(&mut ImportJob)) {
    let snapshot = {
        let mut guard = slot.lock();
        let Some(job) = guard.as_mut() else {
            return;
        };
        if job.phase.is_terminal() {
            return;
        }
        mutate(job);
        job.clone()
    };
    notify(observer, snapshot);
}

fn notify(observer: &ObserverSlot, job: ImportJob) {
    let callback = observer.lock().clone();
    if let Some(callback) = callback {
        callback(job);
    }
}

fn import_message(err: &AppError) -> String {
    match err {
        AppError::Import(message) => message.clone(),
        err if err.is_network() => "Import failed: no response from the server.".to_string(),
        err => format!("Import failed: {err}"),
    }
}
