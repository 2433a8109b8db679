use chrono::NaiveDate;
use serde::Serialize;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Active dataset filter. Unset fields are omitted from requests entirely;
/// the server never sees empty strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterState {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub account_id: Option<String>,
    pub campaign_id: Option<String>,
}

impl FilterState {
    pub fn is_empty(&self) -> bool {
        self.date_from.is_none()
            && self.date_to.is_none()
            && trimmed(&self.account_id).is_none()
            && trimmed(&self.campaign_id).is_none()
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        match (self.date_from, self.date_to) {
            (Some(from), Some(to)) => Some((from, to)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

impl SortDir {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDir::Asc => "asc",
            SortDir::Desc => "desc",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            SortDir::Asc => SortDir::Desc,
            SortDir::Desc => SortDir::Asc,
        }
    }

    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("desc") {
            SortDir::Desc
        } else {
            SortDir::Asc
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SortState {
    pub by: Option<String>,
    pub dir: SortDir,
}

impl SortState {
    /// Header-click semantics: re-selecting the active column flips the
    /// direction, switching columns starts ascending again.
    pub fn select(&mut self, column: &str) {
        match self.by.as_deref() {
            Some(current) if current == column => self.dir = self.dir.toggled(),
            _ => {
                self.by = Some(column.to_string());
                self.dir = SortDir::Asc;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
    /// Row count of the current filter, authoritative only from the most
    /// recent successful fetch.
    pub total: usize,
}

impl Pagination {
    pub fn total_pages(&self) -> usize {
        let size = self.page_size.max(1);
        ((self.total + size - 1) / size).max(1)
    }

    /// Re-clamp `page` into `[1, total_pages]`; required whenever `total`
    /// or `page_size` changes.
    pub fn clamped(mut self) -> Self {
        self.page_size = self.page_size.clamp(1, MAX_PAGE_SIZE);
        self.page = self.page.clamp(1, self.total_pages());
        self
    }

    pub fn with_total(mut self, total: usize) -> Self {
        self.total = total;
        self.clamped()
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            total: 0,
        }
    }
}

/// Numeric input clamps to the nearest bound; non-numeric input degrades
/// to the default instead of failing. The page-size control accepts free
/// text.
pub fn clamp_page_size(raw: Option<&str>) -> usize {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .map(|n| n.clamp(1, MAX_PAGE_SIZE as i64) as usize)
        .unwrap_or(DEFAULT_PAGE_SIZE)
}

/// Canonical request-parameter set for the data and export endpoints.
/// Ordering is stable: filters, then sort, then pagination.
pub fn encode(
    filter: &FilterState,
    sort: &SortState,
    pagination: &Pagination,
) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(8);
    if let Some(from) = filter.date_from {
        pairs.push(("date_from".into(), from.format(DATE_FORMAT).to_string()));
    }
    if let Some(to) = filter.date_to {
        pairs.push(("date_to".into(), to.format(DATE_FORMAT).to_string()));
    }
    if let Some(account) = trimmed(&filter.account_id) {
        pairs.push(("account_id".into(), account));
    }
    if let Some(campaign) = trimmed(&filter.campaign_id) {
        pairs.push(("campaign_id".into(), campaign));
    }
    if let Some(by) = sort.by.as_deref().map(str::trim).filter(|by| !by.is_empty()) {
        pairs.push(("sort_by".into(), by.to_string()));
        pairs.push(("sort_dir".into(), sort.dir.as_str().to_string()));
    }
    pairs.push(("page".into(), pagination.page.max(1).to_string()));
    pairs.push((
        "page_size".into(),
        pagination.page_size.clamp(1, MAX_PAGE_SIZE).to_string(),
    ));
    pairs
}

/// Inverse of [`encode`] up to equivalence: unknown keys are ignored and
/// malformed values degrade to defaults. `total` is server-owned and comes
/// back as zero.
pub fn decode(pairs: &[(String, String)]) -> (FilterState, SortState, Pagination) {
    let mut filter = FilterState::default();
    let mut sort = SortState::default();
    let mut pagination = Pagination::default();

    for (key, value) in pairs {
        match key.as_str() {
            "date_from" => filter.date_from = parse_date(value),
            "date_to" => filter.date_to = parse_date(value),
            "account_id" => filter.account_id = trimmed(&Some(value.clone())),
            "campaign_id" => filter.campaign_id = trimmed(&Some(value.clone())),
            "sort_by" => sort.by = Some(value.trim().to_string()).filter(|v| !v.is_empty()),
            "sort_dir" => sort.dir = SortDir::parse(value),
            "page" => pagination.page = value.trim().parse().unwrap_or(1).max(1),
            "page_size" => pagination.page_size = clamp_page_size(Some(value)),
            _ => {}
        }
    }

    if sort.by.is_none() {
        sort.dir = SortDir::Asc;
    }
    (filter, sort, pagination)
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
