use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::multipart;
use reqwest::{Body, Client, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::compare::Window;
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Cumulative bytes handed to the transport plus the payload size when it
/// is known; `None` drives the indeterminate progress indicator.
pub type UploadObserver = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUser {
    #[serde(alias = "email")]
    pub username: String,
    pub role: String,
}

/// Dataset date bounds, fetched once per session and again after a
/// successful import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DateBounds {
    pub min: Option<NaiveDate>,
    pub max: Option<NaiveDate>,
}

impl DateBounds {
    pub fn known(&self) -> Option<(NaiveDate, NaiveDate)> {
        match (self.min, self.max) {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        }
    }
}

/// One page of the filtered dataset. Row objects keep whatever columns the
/// server decided to include, in server order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataPage {
    pub rows: Vec<Map<String, Value>>,
    pub total: usize,
    #[serde(default)]
    pub page: usize,
    #[serde(default)]
    pub totals: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStage {
    Importing,
    Finalizing,
    Done,
    Error,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportProgress {
    pub stage: ImportStage,
    #[serde(default)]
    pub pct: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct CompareRequest {
    pub window_a: Window,
    pub window_b: Window,
    pub account_id: Option<String>,
    pub campaign_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompareResponse {
    #[serde(default)]
    pub total_a: Map<String, Value>,
    #[serde(default)]
    pub total_b: Map<String, Value>,
    #[serde(default)]
    pub diff_abs: Map<String, Value>,
    #[serde(default)]
    pub diff_pct: Map<String, Value>,
}

/// The backend contract the controllers consume. `ApiClient` is the wire
/// implementation; unit tests drive the controllers with local fakes.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn session_info(&self) -> AppResult<Option<SessionUser>>;
    async fn login(&self, email: &str, password: &str) -> AppResult<SessionUser>;
    async fn logout(&self) -> AppResult<()>;
    async fn date_range(&self) -> AppResult<DateBounds>;
    async fn options(&self, field: &str, query: &str, limit: usize) -> AppResult<Vec<String>>;
    async fn fetch_data(&self, params: &[(String, String)]) -> AppResult<DataPage>;
    fn export_url(&self, params: &[(String, String)]) -> AppResult<String>;
    async fn import_start(&self) -> AppResult<String>;
    async fn import_upload(
        &self,
        job_id: &str,
        file_name: &str,
        payload: Vec<u8>,
        progress: UploadObserver,
    ) -> AppResult<String>;
    async fn import_progress(&self, job_id: &str) -> AppResult<ImportProgress>;
    async fn compare(&self, request: &CompareRequest) -> AppResult<CompareResponse>;
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base: String,
    request_timeout: Duration,
}

impl ApiClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http = Client::builder()
            .user_agent(concat!(
                "metrics-dashboard-client/",
                env!("CARGO_PKG_VERSION")
            ))
            .cookie_store(true)
            .build()?;
        Ok(Self {
            http,
            base: config.api_base_url.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
        })
    }

    fn endpoint(&self, path: &str) -> AppResult<Url> {
        Url::parse(&format!("{}{path}", self.base))
            .map_err(|err| AppError::Config(format!("invalid API base URL: {err}")))
    }

    fn get(&self, path: &str) -> AppResult<RequestBuilder> {
        Ok(self
            .http
            .get(self.endpoint(path)?)
            .timeout(self.request_timeout))
    }

    fn post(&self, path: &str) -> AppResult<RequestBuilder> {
        Ok(self
            .http
            .post(self.endpoint(path)?)
            .timeout(self.request_timeout))
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn session_info(&self) -> AppResult<Option<SessionUser>> {
        #[derive(Deserialize)]
        struct SessionInfoBody {
            #[serde(default)]
            user: Option<SessionUser>,
        }

        let response = self.get("/api/me")?.send().await?.error_for_status()?;
        let body: SessionInfoBody = response.json().await?;
        Ok(body.user)
    }

    async fn login(&self, email: &str, password: &str) -> AppResult<SessionUser> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            email: &'a str,
            password: &'a str,
        }

        #[derive(Deserialize)]
        struct LoginBody {
            #[serde(default)]
            user: Option<SessionUser>,
        }

        let response = self
            .post("/api/login")?
            .json(&LoginPayload { email, password })
            .send()
            .await?;

        if response.status().is_success() {
            let body: LoginBody = response.json().await?;
            body.user
                .ok_or_else(|| AppError::Auth("login response missing user".into()))
        } else {
            Err(AppError::Auth(
                error_message(response, "Invalid credentials").await,
            ))
        }
    }

    async fn logout(&self) -> AppResult<()> {
        self.post("/api/logout")?.send().await?.error_for_status()?;
        Ok(())
    }

    async fn date_range(&self) -> AppResult<DateBounds> {
        let response = self
            .get("/api/date-range")?
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn options(&self, field: &str, query: &str, limit: usize) -> AppResult<Vec<String>> {
        #[derive(Deserialize)]
        struct OptionsBody {
            #[serde(default)]
            values: Vec<String>,
        }

        let mut url = self.endpoint("/api/options")?;
        url.query_pairs_mut()
            .append_pair("field", field)
            .append_pair("q", query)
            .append_pair("limit", &limit.to_string());

        let response = self
            .http
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = error_message(response, "Failed to load suggestions").await;
            return Err(AppError::Fetch { status, message });
        }
        let body: OptionsBody = response.json().await?;
        Ok(body.values)
    }

    async fn fetch_data(&self, params: &[(String, String)]) -> AppResult<DataPage> {
        let response = self.get("/api/data")?.query(params).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = error_message(response, "Failed to load data").await;
            return Err(AppError::Fetch { status, message });
        }
        Ok(response.json().await?)
    }

    /// The export is opened by the shell as a navigation target; the client
    /// only builds the address.
    fn export_url(&self, params: &[(String, String)]) -> AppResult<String> {
        let mut url = self.endpoint("/api/export")?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url.to_string())
    }

    async fn import_start(&self) -> AppResult<String> {
        #[derive(Deserialize)]
        struct ImportStartBody {
            #[serde(default)]
            job_id: Option<String>,
        }

        let response = self.post("/api/import-start")?.send().await?;
        if !response.status().is_success() {
            return Err(AppError::Import(
                error_message(response, "Import could not be started").await,
            ));
        }
        let body: ImportStartBody = response.json().await?;
        body.job_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AppError::Import("Import could not be started: no job id issued".into()))
    }

    async fn import_upload(
        &self,
        job_id: &str,
        file_name: &str,
        payload: Vec<u8>,
        progress: UploadObserver,
    ) -> AppResult<String> {
        #[derive(Deserialize)]
        struct ImportDoneBody {
            #[serde(default)]
            message: Option<String>,
        }

        let mut url = self.endpoint("/api/import")?;
        url.query_pairs_mut().append_pair("job_id", job_id);

        let total = payload.len() as u64;
        progress(0, Some(total));
        let part = multipart::Part::stream_with_length(counted_body(payload, progress), total)
            .file_name(file_name.to_string())
            .mime_str("text/csv")?;
        let form = multipart::Form::new().part("file", part);

        // No timeout here: large uploads run as long as they need to.
        let response = self.http.post(url).multipart(form).send().await?;
        if response.status().is_success() {
            let body = response
                .json::<ImportDoneBody>()
                .await
                .unwrap_or(ImportDoneBody { message: None });
            Ok(body
                .message
                .unwrap_or_else(|| "Import finished.".to_string()))
        } else {
            Err(AppError::Import(
                error_message(response, "Import failed").await,
            ))
        }
    }

    async fn import_progress(&self, job_id: &str) -> AppResult<ImportProgress> {
        let mut url = self.endpoint("/api/import-progress")?;
        url.query_pairs_mut().append_pair("job_id", job_id);

        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = error_message(response, "Progress unavailable").await;
            return Err(AppError::Fetch { status, message });
        }
        Ok(response.json().await?)
    }

    async fn compare(&self, request: &CompareRequest) -> AppResult<CompareResponse> {
        let mut url = self.endpoint("/api/compare")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("date_from_a", &request.window_a.from.to_string())
                .append_pair("date_to_a", &request.window_a.to.to_string())
                .append_pair("date_from_b", &request.window_b.from.to_string())
                .append_pair("date_to_b", &request.window_b.to.to_string());
            if let Some(account) = non_blank(&request.account_id) {
                pairs.append_pair("account_id", account);
            }
            if let Some(campaign) = non_blank(&request.campaign_id) {
                pairs.append_pair("campaign_id", campaign);
            }
        }

        let response = self
            .http
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = error_message(response, "Comparison failed").await;
            return Err(AppError::Fetch { status, message });
        }
        Ok(response.json().await?)
    }
}

/// Wraps the payload in a chunked stream that reports cumulative progress
/// as the transport pulls each chunk.
fn counted_body(payload: Vec<u8>, progress: UploadObserver) -> Body {
    let total = payload.len() as u64;
    let chunks: Vec<Vec<u8>> = payload.chunks(UPLOAD_CHUNK_BYTES).map(<[u8]>::to_vec).collect();
    let mut sent = 0_u64;
    Body::wrap_stream(futures_util::stream::iter(chunks.into_iter().map(
        move |chunk| {
            sent += chunk.len() as u64;
            progress(sent, Some(total));
            Ok::<Vec<u8>, std::io::Error>(chunk)
        },
    )))
}

/// Pulls the server's `{"error": ...}` copy out of a failed response,
/// falling back to generic text when the body is absent or malformed.
async fn error_message(response: Response, fallback: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
    }

    response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.error)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_url_carries_encoded_params() {
        let config = AppConfig::with_api_base("http://127.0.0.1:8000");
        let client = ApiClient::new(&config).unwrap();
        let params = vec![
            ("date_from".to_string(), "2024-03-04".to_string()),
            ("page".to_string(), "1".to_string()),
        ];
        let url = client.export_url(&params).unwrap();
        assert!(url.starts_with("http://127.0.0.1:8000/api/export?"));
        assert!(url.contains("date_from=2024-03-04"));
        assert!(url.contains("page=1"));
    }

    #[test]
    fn session_user_accepts_email_alias() {
        let user: SessionUser =
            serde_json::from_str(r#"{"email": "ops@example.com", "role": "admin"}"#).unwrap();
        assert_eq!(user.username, "ops@example.com");
    }

    #[test]
    fn import_stage_parses_wire_names() {
        let progress: ImportProgress =
            serde_json::from_str(r#"{"stage": "importing", "pct": 42.5}"#).unwrap();
        assert_eq!(progress.stage, ImportStage::Importing);
        assert_eq!(progress.pct, Some(42.5));

        let progress: ImportProgress = serde_json::from_str(r#"{"stage": "done"}"#).unwrap();
        assert_eq!(progress.stage, ImportStage::Done);
        assert!(progress.pct.is_none());
    }
}
