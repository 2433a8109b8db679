use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{Backend, CompareRequest, CompareResponse, DateBounds};
use crate::params::FilterState;
use crate::table::{column_label, format_money, render_cell, COST_MICROS};

const PCT_PLACEHOLDER: &str = "n/a";

/// Closed date interval, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl Window {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }
}

/// Fills in whichever windows the user left unset. B falls back to the
/// active filter range, then to the dataset bounds; A to the period
/// immediately preceding B. `None` when no usable B window exists.
pub fn resolve_windows(
    window_a: Option<Window>,
    window_b: Option<Window>,
    filter: &FilterState,
    bounds: DateBounds,
) -> Option<(Window, Window)> {
    let window_b = window_b
        .or_else(|| filter.date_range().map(|(from, to)| Window::new(from, to)))
        .or_else(|| bounds.known().map(|(min, max)| Window::new(min, max)))?;
    let window_a = window_a.unwrap_or_else(|| preceding_window(window_b));
    Some((window_a, window_b))
}

/// Window ending the day before `window` starts, reaching back over its
/// inclusive day count.
fn preceding_window(window: Window) -> Window {
    let span = (window.to - window.from).num_days() + 1;
    let to = window.from - Duration::days(1);
    Window::new(to - Duration::days(span), to)
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonView {
    pub window_a: Window,
    pub window_b: Window,
    pub rows: Vec<DeltaRow>,
}

/// One metric line of the comparison table, already formatted for display.
#[derive(Debug, Clone, Serialize)]
pub struct DeltaRow {
    pub metric: String,
    pub label: String,
    pub value_a: String,
    pub value_b: String,
    pub delta_abs: String,
    pub delta_pct: String,
}

impl ComparisonView {
    /// Rows follow `total_b`'s key order. Metrics the server withheld from
    /// the response (entitlement-gated ones) simply never show up here.
    fn from_response(window_a: Window, window_b: Window, response: &CompareResponse) -> Self {
        let rows = response
            .total_b
            .keys()
            .map(|metric| DeltaRow {
                metric: metric.clone(),
                label: column_label(metric),
                value_a: render_cell(metric, response.total_a.get(metric)),
                value_b: render_cell(metric, response.total_b.get(metric)),
                delta_abs: format_signed(metric, response.diff_abs.get(metric)),
                delta_pct: format_pct(response.diff_pct.get(metric)),
            })
            .collect();
        Self {
            window_a,
            window_b,
            rows,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompareSnapshot {
    pub view: Option<ComparisonView>,
    pub error: Option<String>,
    pub running: bool,
}

pub struct ComparisonEngine {
    backend: Arc<dyn Backend>,
    state: Mutex<CompareSnapshot>,
}

impl ComparisonEngine {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            state: Mutex::new(CompareSnapshot::default()),
        }
    }

    /// Runs one comparison and publishes the outcome. Failures stay inside
    /// the snapshot's `error` field so the rest of the dashboard is
    /// unaffected.
    pub async fn compare(
        &self,
        filter: &FilterState,
        bounds: DateBounds,
        window_a: Option<Window>,
        window_b: Option<Window>,
    ) -> CompareSnapshot {
        let Some((window_a, window_b)) = resolve_windows(window_a, window_b, filter, bounds)
        else {
            let mut state = self.state.lock();
            state.view = None;
            state.error = Some("No data available to compare yet.".to_string());
            state.running = false;
            return state.clone();
        };

        {
            let mut state = self.state.lock();
            state.running = true;
            state.error = None;
        }
        debug!(
            from_a = %window_a.from,
            to_a = %window_a.to,
            from_b = %window_b.from,
            to_b = %window_b.to,
            "requesting comparison"
        );

        let request = CompareRequest {
            window_a,
            window_b,
            account_id: filter.account_id.clone(),
            campaign_id: filter.campaign_id.clone(),
        };
        let outcome = self.backend.compare(&request).await;

        let mut state = self.state.lock();
        state.running = false;
        match outcome {
            Ok(response) => {
                state.view = Some(ComparisonView::from_response(window_a, window_b, &response));
                state.error = None;
            }
            Err(err) => {
                warn!(?err, "comparison request failed");
                state.view = None;
                state.error = Some(err.to_string());
            }
        }
        state.clone()
    }

    pub fn snapshot(&self) -> CompareSnapshot {
        self.state.lock().clone()
    }
}

fn format_signed(metric: &str, value: Option<&Value>) -> String {
    let Some(number) = value.and_then(Value::as_f64) else {
        return PCT_PLACEHOLDER.to_string();
    };
    if metric == COST_MICROS {
        let money = format_money(number.abs());
        if number >= 0.0 {
            format!("+{money}")
        } else {
            format!("-{money}")
        }
    } else if number.fract() == 0.0 && number.abs() < 9_007_199_254_740_992.0 {
        format!("{:+}", number as i64)
    } else {
        format!("{number:+.2}")
    }
}

fn format_pct(value: Option<&Value>) -> String {
    match value.and_then(Value::as_f64) {
        Some(pct) if pct.is_finite() => format!("{pct:+.1}%"),
        _ => PCT_PLACEHOLDER.to_string(),
    }
}
