//! List-query parameters: pagination, sorting and date ranges
//!
//! Query-string values arrive as raw strings so that malformed input produces
//! our own 400 messages instead of extractor rejections.

use chrono::{Days, NaiveDate};
use serde::Serialize;
use std::str::FromStr;

use crate::{Error, Result};

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

/// Validated page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-indexed page number
    pub page: i64,
    /// Rows per page, at most [`MAX_LIMIT`]
    pub limit: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl PageRequest {
    /// Parse `page` and `limit` query values
    ///
    /// Absent values take the defaults. Anything that is not a positive
    /// integer is rejected; limits above [`MAX_LIMIT`] are clamped. A page
    /// so large that its row offset does not fit in an `i64` is rejected too.
    ///
    /// ```
    /// use qms_common::query::PageRequest;
    ///
    /// let p = PageRequest::parse(Some("3"), Some("10")).unwrap();
    /// assert_eq!(p.offset(), 20);
    ///
    /// assert!(PageRequest::parse(Some("0"), None).is_err());
    /// assert_eq!(PageRequest::parse(None, Some("500")).unwrap().limit, 100);
    /// ```
    pub fn parse(page: Option<&str>, limit: Option<&str>) -> Result<Self> {
        let page = parse_positive(page, DEFAULT_PAGE);
        let limit = parse_positive(limit, DEFAULT_LIMIT);

        let request = match (page, limit) {
            (Some(page), Some(limit)) => Self {
                page,
                limit: limit.min(MAX_LIMIT),
            },
            _ => {
                return Err(Error::InvalidInput(
                    "Invalid pagination parameters: page and limit must be positive integers"
                        .to_string(),
                ))
            }
        };

        if (request.page - 1).checked_mul(request.limit).is_none() {
            return Err(Error::InvalidInput(format!(
                "Invalid pagination parameters: page {} is out of range",
                request.page
            )));
        }
        Ok(request)
    }

    /// Row offset for `LIMIT ? OFFSET ?`
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

fn parse_positive(value: Option<&str>, default: i64) -> Option<i64> {
    match value {
        None => Some(default),
        Some(raw) => raw.trim().parse::<i64>().ok().filter(|n| *n > 0),
    }
}

/// One page of results as returned by list endpoints
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, total: i64, request: PageRequest) -> Self {
        Self {
            data,
            total,
            page: request.page,
            limit: request.limit,
        }
    }
}

crate::string_enum! {
    pub enum SortDirection("sort direction") {
        Asc => "asc",
        Desc => "desc",
    }
}

impl SortDirection {
    pub fn sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Typed sort key for one table
///
/// `column()` is the only text from a list request that is ever
/// interpolated into SQL.
pub trait SortField: FromStr<Err = Error> + Copy {
    fn column(&self) -> &'static str;
}

/// Validated `ORDER BY` request
#[derive(Debug, Clone, Copy)]
pub struct Sort<F> {
    pub field: F,
    pub direction: SortDirection,
}

impl<F: SortField> Sort<F> {
    /// Parse `sortBy` / `sortOrder` query values
    ///
    /// Unknown fields are rejected at this boundary rather than passed on to
    /// the query builder.
    pub fn parse(
        sort_by: Option<&str>,
        sort_order: Option<&str>,
        default_field: F,
        default_direction: SortDirection,
    ) -> Result<Self> {
        let field = match sort_by {
            Some(raw) if !raw.trim().is_empty() => raw.trim().parse::<F>()?,
            _ => default_field,
        };
        let direction = match sort_order {
            Some(raw) if !raw.trim().is_empty() => raw.trim().to_lowercase().parse()?,
            _ => default_direction,
        };
        Ok(Self { field, direction })
    }

    /// ` ORDER BY <column> <ASC|DESC>` with a stable tiebreak on `id`
    pub fn order_by_clause(&self) -> String {
        format!(
            " ORDER BY {} {}, id {}",
            self.field.column(),
            self.direction.sql(),
            self.direction.sql()
        )
    }
}

/// Parse an ISO `YYYY-MM-DD` date from a request
pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| Error::InvalidInput(format!("Invalid date for {}: '{}'", field, value)))
}

/// Inclusive date range filter
///
/// Timestamps are stored as RFC 3339 text, so comparing against
/// `YYYY-MM-DD` strings orders correctly. The end bound is turned into an
/// exclusive next-day bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        let start = start
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_date("startDate", s))
            .transpose()?;
        let end = end
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_date("endDate", s))
            .transpose()?;

        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(Error::InvalidInput(
                    "startDate must not be after endDate".to_string(),
                ));
            }
        }

        Ok(Self { start, end })
    }

    /// Inclusive lower bound as text
    pub fn start_bound(&self) -> Option<String> {
        self.start.map(|d| d.format("%Y-%m-%d").to_string())
    }

    /// Exclusive upper bound (day after `end`) as text
    pub fn end_bound_exclusive(&self) -> Option<String> {
        self.end
            .and_then(|d| d.checked_add_days(Days::new(1)))
            .map(|d| d.format("%Y-%m-%d").to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}
