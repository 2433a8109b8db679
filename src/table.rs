use serde::Serialize;
use serde_json::{Map, Value};

use crate::params::{Pagination, SortDir, SortState};

/// Metric whose raw value is micro-units of currency.
pub const COST_MICROS: &str = "cost_micros";
const MICROS_PER_UNIT: f64 = 1_000_000.0;

/// Render-ready table state handed to the shell. Columns follow whatever
/// the server put in the first row, in server order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TableSnapshot {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<String>>,
    /// Footer cells aligned with `columns`; empty when the server sent no
    /// totals.
    pub totals: Vec<String>,
    pub pagination_label: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Column {
    pub key: String,
    pub label: String,
    /// Present on the column the table is currently sorted by.
    pub sort: Option<SortDir>,
}

impl TableSnapshot {
    pub fn from_state(
        rows: &[Map<String, Value>],
        totals: &Map<String, Value>,
        pagination: &Pagination,
        sort: &SortState,
        error: Option<&str>,
    ) -> Self {
        if let Some(message) = error {
            return Self {
                error: Some(message.to_string()),
                ..Self::default()
            };
        }

        let columns: Vec<Column> = rows
            .first()
            .map(|row| {
                row.keys()
                    .map(|key| Column {
                        key: key.clone(),
                        label: column_label(key),
                        sort: sort.by.as_deref().filter(|by| *by == key).map(|_| sort.dir),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let body = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|column| render_cell(&column.key, row.get(&column.key)))
                    .collect()
            })
            .collect();

        let footer = if totals.is_empty() || columns.is_empty() {
            Vec::new()
        } else {
            columns
                .iter()
                .map(|column| match totals.get(&column.key) {
                    Some(value) => render_cell(&column.key, Some(value)),
                    None => String::new(),
                })
                .collect()
        };

        Self {
            columns,
            rows: body,
            totals: footer,
            pagination_label: format!(
                "Page {} of {} ({} rows)",
                pagination.page,
                pagination.total_pages(),
                pagination.total
            ),
            error: None,
        }
    }
}

/// `cost_micros` renders as currency; everything else as plain text with
/// whole numbers losing their decimal tail.
pub fn render_cell(key: &str, value: Option<&Value>) -> String {
    let Some(value) = value else {
        return String::new();
    };
    if key == COST_MICROS {
        if let Some(micros) = value.as_f64() {
            return format_money(micros);
        }
    }
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Number(number) => {
            if let Some(whole) = number.as_i64() {
                whole.to_string()
            } else if let Some(whole) = number.as_u64() {
                whole.to_string()
            } else {
                number.to_string()
            }
        }
        Value::Bool(flag) => flag.to_string(),
        other => other.to_string(),
    }
}

pub fn format_money(micros: f64) -> String {
    let units = micros / MICROS_PER_UNIT;
    if units < 0.0 {
        format!("-${:.2}", units.abs())
    } else {
        format!("${units:.2}")
    }
}

pub(crate) fn column_label(key: &str) -> String {
    if key == COST_MICROS {
        return "Cost".to_string();
    }
    key.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
