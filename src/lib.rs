mod api;
mod compare;
mod config;
mod errors;
mod import;
mod options;
mod params;
mod query;
mod session;
mod table;
#[cfg(test)]
mod testutil;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::api::{
    ApiClient, Backend, CompareRequest, CompareResponse, DataPage, DateBounds, ImportProgress,
    ImportStage, SessionUser, UploadObserver,
};
pub use crate::compare::{
    resolve_windows, CompareSnapshot, ComparisonEngine, ComparisonView, DeltaRow, Window,
};
pub use crate::config::AppConfig;
pub use crate::errors::{AppError, AppResult};
pub use crate::import::{ImportController, ImportJob, ImportObserver, ImportPhase};
pub use crate::options::{AutocompleteProvider, SuggestionList};
pub use crate::params::{
    clamp_page_size, decode, encode, FilterState, Pagination, SortDir, SortState,
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use crate::query::{DateShortcut, PageMove, QueryController, QuerySnapshot};
pub use crate::session::{SessionController, SessionSnapshot};
pub use crate::table::{Column, TableSnapshot};

/// Wires the controllers to one shared backend. The embedding shell holds
/// on to this and renders the snapshots the controllers expose.
pub struct DashboardApp {
    config: AppConfig,
    backend: Arc<dyn Backend>,
    pub session: Arc<SessionController>,
    pub query: Arc<QueryController>,
    pub import: Arc<ImportController>,
    pub compare: Arc<ComparisonEngine>,
    pub options: Arc<AutocompleteProvider>,
}

impl DashboardApp {
    pub fn from_env() -> AppResult<Self> {
        Self::new(AppConfig::from_env())
    }

    pub fn new(config: AppConfig) -> AppResult<Self> {
        init_tracing();
        let backend: Arc<dyn Backend> = Arc::new(ApiClient::new(&config)?);
        Ok(Self::with_backend(config, backend))
    }

    pub fn with_backend(config: AppConfig, backend: Arc<dyn Backend>) -> Self {
        let session = Arc::new(SessionController::new(backend.clone()));
        let query = Arc::new(QueryController::new(backend.clone()));
        let import = Arc::new(ImportController::new(
            backend.clone(),
            Duration::from_millis(config.import_poll_interval_ms),
        ));
        let compare = Arc::new(ComparisonEngine::new(backend.clone()));
        let options = Arc::new(AutocompleteProvider::new(
            backend.clone(),
            Duration::from_millis(config.autocomplete_debounce_ms),
            config.options_limit,
        ));
        Self {
            config,
            backend,
            session,
            query,
            import,
            compare,
            options,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Restores an existing session and, when signed in, loads the first
    /// data page.
    pub async fn start(&self) -> bool {
        let signed_in = self.session.restore().await;
        if signed_in {
            self.query.refresh().await;
        }
        signed_in
    }

    pub async fn login(&self, email: &str, password: &str) -> bool {
        let signed_in = self.session.login(email, password).await;
        if signed_in {
            self.query.refresh().await;
        }
        signed_in
    }

    pub async fn logout(&self) {
        self.session.logout().await;
    }

    /// Runs an import to completion; a successful one refreshes both the
    /// dataset bounds and the visible page.
    pub async fn import_file(&self, file_name: &str, payload: Vec<u8>) -> AppResult<ImportJob> {
        let job = self.import.run_import(file_name, payload).await?;
        if job.phase == ImportPhase::Done {
            self.session.refresh_bounds().await;
            self.query.refresh().await;
        }
        Ok(job)
    }

    pub async fn import_path(&self, path: &Path) -> AppResult<ImportJob> {
        let payload = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload.csv");
        self.import_file(file_name, payload).await
    }

    pub async fn set_date_shortcut(&self, shortcut: DateShortcut) {
        self.query
            .set_date_shortcut(shortcut, Local::now().date_naive(), self.session.bounds())
            .await;
    }

    /// Comparison over the active filters; explicit windows override the
    /// derived defaults.
    pub async fn compare_windows(
        &self,
        window_a: Option<Window>,
        window_b: Option<Window>,
    ) -> CompareSnapshot {
        self.compare
            .compare(
                &self.query.filter_state(),
                self.session.bounds(),
                window_a,
                window_b,
            )
            .await
    }

    pub async fn suggest(&self, field: &str, query: &str) -> Option<SuggestionList> {
        self.options.suggest(field, query).await
    }

    /// Address for the CSV export of the current view, opened by the shell.
    pub fn export_url(&self) -> AppResult<String> {
        self.backend.export_url(&self.query.request_params())
    }
}

fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,metrics_dashboard_client=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}
