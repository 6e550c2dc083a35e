//! Listing parameters: validation, paging, and page links.

use crate::model::query::DEFAULT_PAGE_LIMIT;
use crate::model::{QueryFilter, QueryRecord};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::response::{FieldError, TIMESTAMP_FORMAT};

/// Raw query-string parameters. Parsed by hand so every bad field is reported.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub from: Option<String>,
    pub to: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

/// A validated listing request.
#[derive(Debug, Clone, PartialEq)]
pub struct ListFilter {
    pub query: QueryFilter,
    from_raw: Option<String>,
    to_raw: Option<String>,
}

/// One page of results plus navigation links.
#[derive(Debug, Serialize)]
pub struct Paginated {
    pub base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
    pub current: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    pub limit: u32,
    pub size: usize,
    pub results: Vec<QueryRecord>,
}

impl ListFilter {
    pub fn parse(params: &ListParams) -> Result<Self, Vec<FieldError>> {
        let mut errors = Vec::new();

        let page = parse_int(&mut errors, "page", params.page.as_deref());
        let limit = parse_int(&mut errors, "limit", params.limit.as_deref());

        let from_raw = non_blank(params.from.as_deref());
        let to_raw = non_blank(params.to.as_deref());
        let from = parse_time(&mut errors, "from", from_raw.as_deref());
        let to = parse_time(&mut errors, "to", to_raw.as_deref());

        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                errors.push(FieldError::field("from, to", "invalid values[to < from]"));
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Self {
            query: QueryFilter {
                from,
                to,
                page: clamp(page, 1),
                limit: clamp(limit, DEFAULT_PAGE_LIMIT),
            },
            from_raw,
            to_raw,
        })
    }

    /// Link to `page` with the same window and limit.
    pub fn page_link(&self, page: u32) -> String {
        let mut link = format!("/api/queries?page={page}&limit={}", self.query.limit);
        if let Some(ref from) = self.from_raw {
            link.push_str("&from=");
            link.push_str(from);
        }
        if let Some(ref to) = self.to_raw {
            link.push_str("&to=");
            link.push_str(to);
        }
        link
    }

    /// Shape a `limit + 1` row fetch into a page.
    pub fn into_page(self, mut rows: Vec<QueryRecord>, base: &str) -> Paginated {
        let page = self.query.page;
        let limit = self.query.limit;

        let next = if rows.len() > limit as usize {
            rows.truncate(limit as usize);
            page.checked_add(1).map(|next| self.page_link(next))
        } else {
            None
        };
        let prev = (page > 1).then(|| self.page_link(page - 1));

        Paginated {
            base: base.to_string(),
            prev,
            current: self.page_link(page),
            next,
            limit,
            size: rows.len(),
            results: rows,
        }
    }
}

fn non_blank(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn parse_int(errors: &mut Vec<FieldError>, field: &str, raw: Option<&str>) -> i64 {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => 0,
        Some(s) => s.parse().unwrap_or_else(|_| {
            errors.push(FieldError::field(field, "must be int"));
            0
        }),
    }
}

/// Non-positive values fall back to the default.
fn clamp(value: i64, default: u32) -> u32 {
    if value <= 0 {
        default
    } else {
        u32::try_from(value).unwrap_or(u32::MAX)
    }
}

/// Timestamps are given in server-local time.
fn parse_time(errors: &mut Vec<FieldError>, field: &str, raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    let parsed = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc));
    if parsed.is_none() {
        errors.push(FieldError::field(
            field,
            "invalid date format[YYYY-MM-DDTHH:MM:SS]",
        ));
    }
    parsed
}
