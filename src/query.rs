use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::api::{Backend, DateBounds};
use crate::errors::AppError;
use crate::params::{
    clamp_page_size, encode, FilterState, Pagination, SortState, DEFAULT_PAGE_SIZE,
};
use crate::table::TableSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMove {
    Prev,
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateShortcut {
    All,
    Today,
    Last7Days,
    Last30Days,
    ThisMonth,
    LastMonth,
}

#[derive(Default)]
struct QueryState {
    filter: FilterState,
    sort: SortState,
    pagination: Pagination,
    rows: Vec<Map<String, Value>>,
    totals: Map<String, Value>,
    loading: bool,
    error: Option<String>,
    /// Monotonic fetch counter; a response is applied only while it still
    /// carries the latest issued value.
    seq: u64,
}

/// Render-ready view of the query area.
#[derive(Debug, Clone, Serialize)]
pub struct QuerySnapshot {
    pub filter: FilterState,
    pub sort: SortState,
    pub pagination: Pagination,
    pub loading: bool,
    pub table: TableSnapshot,
}

/// Owns filter, sort and pagination state for the main data table and
/// keeps it consistent with what the server last confirmed.
pub struct QueryController {
    backend: Arc<dyn Backend>,
    state: Mutex<QueryState>,
}

impl QueryController {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            state: Mutex::new(QueryState::default()),
        }
    }

    pub fn filter_state(&self) -> FilterState {
        self.state.lock().filter.clone()
    }

    /// Current request parameters, also used for the export address.
    pub fn request_params(&self) -> Vec<(String, String)> {
        let state = self.state.lock();
        encode(&state.filter, &state.sort, &state.pagination)
    }

    pub async fn apply_filters(&self, filter: FilterState) {
        {
            let mut state = self.state.lock();
            state.filter = filter;
            state.pagination.page = 1;
        }
        self.fetch().await;
    }

    pub async fn clear_filters(&self) {
        {
            let mut state = self.state.lock();
            state.filter = FilterState::default();
            state.sort = SortState::default();
            state.pagination.page = 1;
            state.pagination.page_size = DEFAULT_PAGE_SIZE;
        }
        self.fetch().await;
    }

    /// Applies one of the date-range shortcut buttons. `today` comes from
    /// the caller. `All` needs known dataset bounds and otherwise does
    /// nothing.
    pub async fn set_date_shortcut(
        &self,
        shortcut: DateShortcut,
        today: NaiveDate,
        bounds: DateBounds,
    ) {
        let Some((from, to)) = shortcut_range(shortcut, today, bounds) else {
            debug!(?shortcut, "date shortcut skipped, no dataset bounds");
            return;
        };
        {
            let mut state = self.state.lock();
            state.filter.date_from = Some(from);
            state.filter.date_to = Some(to);
            state.pagination.page = 1;
        }
        self.fetch().await;
    }

    /// Header click. Same column toggles direction, a new column starts
    /// ascending; the current page is kept.
    pub async fn sort_by(&self, column: &str) {
        {
            let mut state = self.state.lock();
            state.sort.select(column);
        }
        self.fetch().await;
    }

    pub async fn set_page_size(&self, raw: &str) {
        {
            let mut state = self.state.lock();
            state.pagination.page_size = clamp_page_size(Some(raw));
            state.pagination = state.pagination.clamped();
        }
        self.fetch().await;
    }

    /// Prev/Next navigation. Moves that would leave the valid page range
    /// are ignored without a fetch.
    pub async fn go_to_page(&self, direction: PageMove) {
        let moved = {
            let mut state = self.state.lock();
            let pages = state.pagination.total_pages();
            match direction {
                PageMove::Prev if state.pagination.page > 1 => {
                    state.pagination.page -= 1;
                    true
                }
                PageMove::Next if state.pagination.page < pages => {
                    state.pagination.page += 1;
                    true
                }
                _ => false,
            }
        };
        if moved {
            self.fetch().await;
        }
    }

    /// Re-fetches with unchanged parameters; used after an import lands.
    pub async fn refresh(&self) {
        self.fetch().await;
    }

    async fn fetch(&self) {
        let (params, seq) = {
            let mut state = self.state.lock();
            state.seq += 1;
            state.loading = true;
            state.error = None;
            (
                encode(&state.filter, &state.sort, &state.pagination),
                state.seq,
            )
        };
        debug!(seq, "fetching data page");

        let outcome = self.backend.fetch_data(&params).await;

        let mut state = self.state.lock();
        if state.seq != seq {
            debug!(seq, latest = state.seq, "dropping stale data response");
            return;
        }
        state.loading = false;
        match outcome {
            Ok(page) => {
                state.pagination = state.pagination.with_total(page.total);
                state.rows = page.rows;
                state.totals = page.totals;
                state.error = None;
            }
            Err(err) => {
                warn!(?err, "data fetch failed");
                state.rows = Vec::new();
                state.totals = Map::new();
                state.error = Some(fetch_message(&err));
            }
        }
    }

    pub fn snapshot(&self) -> QuerySnapshot {
        let state = self.state.lock();
        QuerySnapshot {
            filter: state.filter.clone(),
            sort: state.sort.clone(),
            pagination: state.pagination,
            loading: state.loading,
            table: TableSnapshot::from_state(
                &state.rows,
                &state.totals,
                &state.pagination,
                &state.sort,
                state.error.as_deref(),
            ),
        }
    }
}

fn shortcut_range(
    shortcut: DateShortcut,
    today: NaiveDate,
    bounds: DateBounds,
) -> Option<(NaiveDate, NaiveDate)> {
    match shortcut {
        DateShortcut::All => bounds.known(),
        DateShortcut::Today => Some((today, today)),
        DateShortcut::Last7Days => Some((today - Duration::days(6), today)),
        DateShortcut::Last30Days => Some((today - Duration::days(29), today)),
        DateShortcut::ThisMonth => Some((today.with_day(1)?, today)),
        DateShortcut::LastMonth => {
            let last_prev = today.with_day(1)? - Duration::days(1);
            Some((last_prev.with_day(1)?, last_prev))
        }
    }
}

fn fetch_message(err: &AppError) -> String {
    match err {
        AppError::Fetch { message, .. } => message.clone(),
        err if err.is_network() => "Failed to load data.".to_string(),
        err => err.to_string(),
    }
}
