//! # Window Filter Builder
//!
//! Builds the "modified since" range filter sent with every search request.
//!
//! ```text
//!   start = Some(t0), end = t1
//!     → [{ propertyName: p, operator: GTE, value: "t0 ms" },
//!        { propertyName: p, operator: LTE, value: "t1 ms" }]
//!
//!   start = None
//!     → []    (matches every record)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::to_millis;

/// Comparison operator understood by the search endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOperator {
    Gte,
    Lte,
}

/// One property comparison. Values travel as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub property_name: String,
    pub operator: FilterOperator,
    pub value: String,
}

/// Filters combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterGroup {
    pub filters: Vec<Filter>,
}

impl FilterGroup {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Sort direction of a search request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sort {
    pub property_name: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn ascending(property: impl Into<String>) -> Self {
        Sort {
            property_name: property.into(),
            direction: SortDirection::Ascending,
        }
    }
}

/// Builds `property >= start AND property <= end`.
///
/// Returns an empty group when `start` is absent.
pub fn build_filter(
    start: Option<DateTime<Utc>>,
    end: DateTime<Utc>,
    property: &str,
) -> FilterGroup {
    let Some(start) = start else {
        return FilterGroup::default();
    };

    FilterGroup {
        filters: vec![
            Filter {
                property_name: property.to_string(),
                operator: FilterOperator::Gte,
                value: to_millis(start).to_string(),
            },
            Filter {
                property_name: property.to_string(),
                operator: FilterOperator::Lte,
                value: to_millis(end).to_string(),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::from_millis;

    #[test]
    fn test_bounded_filter() {
        let group = build_filter(
            Some(from_millis(1_000).unwrap()),
            from_millis(2_000).unwrap(),
            "hs_lastmodifieddate",
        );

        assert_eq!(group.filters.len(), 2);
        assert_eq!(group.filters[0].operator, FilterOperator::Gte);
        assert_eq!(group.filters[0].value, "1000");
        assert_eq!(group.filters[1].operator, FilterOperator::Lte);
        assert_eq!(group.filters[1].value, "2000");
    }

    #[test]
    fn test_missing_start_yields_empty_filter() {
        let group = build_filter(None, from_millis(2_000).unwrap(), "hs_lastmodifieddate");
        assert!(group.is_empty());
    }

    #[test]
    fn test_wire_shape() {
        let group = build_filter(
            Some(from_millis(5).unwrap()),
            from_millis(9).unwrap(),
            "hs_lastmodifieddate",
        );
        let json = serde_json::to_value(&group).unwrap();
        assert_eq!(
            json["filters"][0],
            serde_json::json!({
                "propertyName": "hs_lastmodifieddate",
                "operator": "GTE",
                "value": "5"
            })
        );
        assert_eq!(
            serde_json::to_value(Sort::ascending("x")).unwrap()["direction"],
            "ASCENDING"
        );
    }
}
