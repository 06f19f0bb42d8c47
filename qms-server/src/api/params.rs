//! Query-string access for list endpoints
//!
//! Query values are taken as raw strings and validated here so malformed
//! input yields the same `{"error": ...}` body as every other 400.

use qms_common::query::{DateRange, PageRequest, Sort, SortDirection, SortField};
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::ApiError;

/// Raw query parameters of a list request
#[derive(Debug, Default, Clone)]
pub struct ListParams(HashMap<String, String>);

impl From<HashMap<String, String>> for ListParams {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

impl ListParams {
    /// Non-empty trimmed value of `key`
    pub fn text(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Parse an id-like integer parameter
    pub fn id(&self, key: &str) -> Result<Option<i64>, ApiError> {
        self.text(key)
            .map(|raw| {
                raw.parse::<i64>()
                    .map_err(|_| ApiError::BadRequest(format!("Invalid {}: '{}'", key, raw)))
            })
            .transpose()
    }

    /// Parse a text-backed enum parameter (`status`, `severity`, ...)
    pub fn parsed<T>(&self, key: &str) -> Result<Option<T>, ApiError>
    where
        T: FromStr<Err = qms_common::Error>,
    {
        Ok(self.text(key).map(|raw| raw.parse::<T>()).transpose()?)
    }

    /// `true`/`1` style flag, absent means `false`
    pub fn flag(&self, key: &str) -> Result<bool, ApiError> {
        match self.text(key).as_deref() {
            None => Ok(false),
            Some("true") | Some("1") => Ok(true),
            Some("false") | Some("0") => Ok(false),
            Some(other) => Err(ApiError::BadRequest(format!(
                "Invalid {}: '{}'",
                key, other
            ))),
        }
    }

    pub fn page(&self) -> Result<PageRequest, ApiError> {
        Ok(PageRequest::parse(
            self.0.get("page").map(String::as_str),
            self.0.get("limit").map(String::as_str),
        )?)
    }

    pub fn sort<F: SortField>(
        &self,
        default_field: F,
        default_direction: SortDirection,
    ) -> Result<Sort<F>, ApiError> {
        Ok(Sort::parse(
            self.0.get("sortBy").map(String::as_str),
            self.0.get("sortOrder").map(String::as_str),
            default_field,
            default_direction,
        )?)
    }

    /// `startDate` / `endDate`
    pub fn date_range(&self) -> Result<DateRange, ApiError> {
        Ok(DateRange::parse(
            self.0.get("startDate").map(String::as_str),
            self.0.get("endDate").map(String::as_str),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qms_common::status::NcrStatus;

    fn params(pairs: &[(&str, &str)]) -> ListParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>()
            .into()
    }

    #[test]
    fn test_blank_values_are_absent() {
        let p = params(&[("search", "  "), ("status", "")]);
        assert_eq!(p.text("search"), None);
        assert_eq!(p.parsed::<NcrStatus>("status").unwrap(), None);
    }

    #[test]
    fn test_invalid_id_rejected() {
        let p = params(&[("departmentId", "abc")]);
        assert!(matches!(p.id("departmentId"), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_invalid_enum_rejected() {
        let p = params(&[("status", "pending")]);
        match p.parsed::<NcrStatus>("status") {
            Err(ApiError::BadRequest(msg)) => assert_eq!(msg, "Invalid NCR status 'pending'"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bad_page_rejected() {
        let p = params(&[("page", "0")]);
        match p.page() {
            Err(ApiError::BadRequest(msg)) => assert!(msg.contains("Invalid pagination parameters")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
