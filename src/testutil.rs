use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::api::{
    Backend, CompareRequest, CompareResponse, DataPage, DateBounds, ImportProgress, ImportStage,
    SessionUser, UploadObserver,
};
use crate::errors::{AppError, AppResult};

/// Scripted backend for controller tests. Responses are consumed from
/// queues; a queued gate holds the response back until the test fires it,
/// which pins down resolution order in race tests.
#[derive(Default)]
pub(crate) struct FakeBackend {
    pub data: Mutex<VecDeque<Scripted<DataPage>>>,
    pub data_calls: Mutex<Vec<Vec<(String, String)>>>,
    pub import_starts: Mutex<VecDeque<AppResult<String>>>,
    pub uploads: Mutex<VecDeque<UploadScript>>,
    pub upload_calls: Mutex<Vec<UploadCall>>,
    pub polls: Mutex<VecDeque<Scripted<ImportProgress>>>,
    pub poll_calls: Mutex<usize>,
    pub option_values: Mutex<VecDeque<Scripted<Vec<String>>>>,
    pub option_calls: Mutex<Vec<(String, String, usize)>>,
    pub compares: Mutex<VecDeque<AppResult<CompareResponse>>>,
    pub compare_calls: Mutex<Vec<CompareRequest>>,
    pub users: Mutex<VecDeque<AppResult<SessionUser>>>,
    pub session_user: Mutex<Option<SessionUser>>,
    pub bounds: Mutex<DateBounds>,
    pub bounds_calls: Mutex<usize>,
    pub logouts: Mutex<usize>,
}

pub(crate) struct Scripted<T> {
    pub result: AppResult<T>,
    pub gate: Option<oneshot::Receiver<()>>,
}

pub(crate) struct UploadScript {
    pub result: AppResult<String>,
    pub gate: Option<oneshot::Receiver<()>>,
    /// (bytes_sent, total) pairs replayed through the progress observer
    /// before the upload resolves.
    pub events: Vec<(u64, Option<u64>)>,
}

#[derive(Debug, Clone)]
pub(crate) struct UploadCall {
    pub job_id: String,
    pub file_name: String,
    pub payload_len: usize,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_data(&self, rows: Value, total: usize) {
        self.data.lock().push_back(Scripted {
            result: Ok(page_from(rows, total)),
            gate: None,
        });
    }

    /// Queues a data page that resolves only after the returned sender
    /// fires.
    pub fn push_gated_data(&self, rows: Value, total: usize) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.data.lock().push_back(Scripted {
            result: Ok(page_from(rows, total)),
            gate: Some(rx),
        });
        tx
    }

    pub fn push_data_error(&self, status: u16, message: &str) {
        self.data.lock().push_back(Scripted {
            result: Err(AppError::Fetch {
                status,
                message: message.to_string(),
            }),
            gate: None,
        });
    }

    pub fn push_upload_ok(&self, message: &str, events: Vec<(u64, Option<u64>)>) {
        self.uploads.lock().push_back(UploadScript {
            result: Ok(message.to_string()),
            gate: None,
            events,
        });
    }

    /// Queues an upload held open until the returned sender fires.
    pub fn push_gated_upload(&self, result: AppResult<String>) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.uploads.lock().push_back(UploadScript {
            result,
            gate: Some(rx),
            events: Vec::new(),
        });
        tx
    }

    pub fn push_upload_err(&self, err: AppError) {
        self.uploads.lock().push_back(UploadScript {
            result: Err(err),
            gate: None,
            events: Vec::new(),
        });
    }

    pub fn push_poll(&self, stage: ImportStage, pct: Option<f64>) {
        self.polls.lock().push_back(Scripted {
            result: Ok(ImportProgress { stage, pct }),
            gate: None,
        });
    }

    pub fn push_gated_poll(&self, stage: ImportStage, pct: Option<f64>) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.polls.lock().push_back(Scripted {
            result: Ok(ImportProgress { stage, pct }),
            gate: Some(rx),
        });
        tx
    }

    pub fn push_options(&self, values: &[&str]) {
        self.option_values.lock().push_back(Scripted {
            result: Ok(values.iter().map(|v| v.to_string()).collect()),
            gate: None,
        });
    }

    pub fn push_gated_options(&self, values: &[&str]) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.option_values.lock().push_back(Scripted {
            result: Ok(values.iter().map(|v| v.to_string()).collect()),
            gate: Some(rx),
        });
        tx
    }

    pub fn data_call_count(&self) -> usize {
        self.data_calls.lock().len()
    }

    pub fn last_data_params(&self) -> Vec<(String, String)> {
        self.data_calls.lock().last().cloned().unwrap_or_default()
    }

    pub fn poll_count(&self) -> usize {
        *self.poll_calls.lock()
    }
}

pub(crate) fn page_from(rows: Value, total: usize) -> DataPage {
    let rows = match rows {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => map,
                other => panic!("expected row object, got {other}"),
            })
            .collect(),
        other => panic!("expected row array, got {other}"),
    };
    DataPage {
        rows,
        total,
        page: 0,
        totals: serde_json::Map::new(),
    }
}

/// Polls `ready` until it holds, giving queued tasks time to run.
pub(crate) async fn wait_until(ready: impl Fn() -> bool) {
    for _ in 0..200 {
        if ready() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[async_trait]
impl Backend for FakeBackend {
    async fn session_info(&self) -> AppResult<Option<SessionUser>> {
        Ok(self.session_user.lock().clone())
    }

    async fn login(&self, _email: &str, _password: &str) -> AppResult<SessionUser> {
        self.users
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::Auth("Invalid credentials".into())))
    }

    async fn logout(&self) -> AppResult<()> {
        *self.logouts.lock() += 1;
        Ok(())
    }

    async fn date_range(&self) -> AppResult<DateBounds> {
        *self.bounds_calls.lock() += 1;
        Ok(*self.bounds.lock())
    }

    async fn options(&self, field: &str, query: &str, limit: usize) -> AppResult<Vec<String>> {
        self.option_calls
            .lock()
            .push((field.to_string(), query.to_string(), limit));
        let scripted = self.option_values.lock().pop_front();
        match scripted {
            Some(Scripted { result, gate }) => {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                result
            }
            None => Ok(Vec::new()),
        }
    }

    async fn fetch_data(&self, params: &[(String, String)]) -> AppResult<DataPage> {
        self.data_calls.lock().push(params.to_vec());
        let scripted = self.data.lock().pop_front();
        match scripted {
            Some(Scripted { result, gate }) => {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                result
            }
            None => Ok(DataPage::default()),
        }
    }

    fn export_url(&self, params: &[(String, String)]) -> AppResult<String> {
        let query: Vec<String> = params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        Ok(format!("fake://export?{}", query.join("&")))
    }

    async fn import_start(&self) -> AppResult<String> {
        self.import_starts
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok("job-1".to_string()))
    }

    async fn import_upload(
        &self,
        job_id: &str,
        file_name: &str,
        payload: Vec<u8>,
        progress: UploadObserver,
    ) -> AppResult<String> {
        self.upload_calls.lock().push(UploadCall {
            job_id: job_id.to_string(),
            file_name: file_name.to_string(),
            payload_len: payload.len(),
        });
        let scripted = self.uploads.lock().pop_front();
        match scripted {
            Some(UploadScript {
                result,
                gate,
                events,
            }) => {
                for (sent, total) in events {
                    progress(sent, total);
                }
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                result
            }
            None => Ok("Import finished.".to_string()),
        }
    }

    async fn import_progress(&self, _job_id: &str) -> AppResult<ImportProgress> {
        *self.poll_calls.lock() += 1;
        let scripted = self.polls.lock().pop_front();
        match scripted {
            Some(Scripted { result, gate }) => {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                result
            }
            None => Ok(ImportProgress {
                stage: ImportStage::Importing,
                pct: None,
            }),
        }
    }

    async fn compare(&self, request: &CompareRequest) -> AppResult<CompareResponse> {
        self.compare_calls.lock().push(request.clone());
        self.compares
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(CompareResponse::default()))
    }
}
