//! Read-request parameters → normalized filter and sort intent.

use std::collections::BTreeMap;

/// Parameters that never become filters: sort field, sort direction, cache buster.
pub const RESERVED_PARAMS: [&str; 3] = ["sort", "dir", "_dc"];

fn reserved(name: &str) -> bool {
    RESERVED_PARAMS.iter().any(|r| r.eq_ignore_ascii_case(name))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuerySpec {
    /// Equality filters, field name → query-string term.
    pub filters: BTreeMap<String, String>,
    pub sort: Option<SortSpec>,
}

impl QuerySpec {
    /// Build from query parameters in request order. Repeated names keep their last value.
    /// Sorting applies only when both `sort` and `dir` are present.
    pub fn from_params(params: &[(String, String)]) -> Self {
        let mut filters = BTreeMap::new();
        let mut sort_field: Option<&str> = None;
        let mut dir: Option<&str> = None;
        for (name, value) in params {
            if !reserved(name) {
                filters.insert(name.clone(), value.clone());
            } else if name.eq_ignore_ascii_case("sort") {
                sort_field = Some(value);
            } else if name.eq_ignore_ascii_case("dir") {
                dir = Some(value);
            }
        }
        let sort = match (sort_field, dir) {
            (Some(field), Some(dir)) if !field.is_empty() => Some(SortSpec {
                field: field.to_string(),
                descending: dir.eq_ignore_ascii_case("desc"),
            }),
            _ => None,
        };
        Self { filters, sort }
    }

    /// Add or override an equality filter (used for caller scoping).
    pub fn with_filter(mut self, field: impl Into<String>, term: impl Into<String>) -> Self {
        self.filters.insert(field.into(), term.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn reserved_names_never_become_filters() {
        let spec = QuerySpec::from_params(&params(&[
            ("_dc", "1290000000"),
            ("title", "Dune"),
            ("SORT", "title"),
            ("Dir", "DESC"),
            ("_DC", "again"),
        ]));
        assert_eq!(spec.filters.len(), 1);
        assert_eq!(spec.filters.get("title").map(String::as_str), Some("Dune"));
        assert_eq!(
            spec.sort,
            Some(SortSpec {
                field: "title".into(),
                descending: true
            })
        );
    }

    #[test]
    fn sort_requires_direction() {
        let spec = QuerySpec::from_params(&params(&[("sort", "title")]));
        assert_eq!(spec.sort, None);
        assert!(spec.filters.is_empty());
    }

    #[test]
    fn ascending_unless_desc() {
        let spec = QuerySpec::from_params(&params(&[("sort", "pages"), ("dir", "ASC")]));
        assert_eq!(spec.sort.as_ref().map(|s| s.descending), Some(false));
        let spec = QuerySpec::from_params(&params(&[("sort", "pages"), ("dir", "sideways")]));
        assert_eq!(spec.sort.as_ref().map(|s| s.descending), Some(false));
    }

    #[test]
    fn repeated_parameters_keep_last_value() {
        let spec = QuerySpec::from_params(&params(&[("pages", "1"), ("sort", "a"), ("pages", "2"), ("sort", "b"), ("dir", "asc")]));
        assert_eq!(spec.filters.get("pages").map(String::as_str), Some("2"));
        assert_eq!(spec.sort.map(|s| s.field).as_deref(), Some("b"));
    }

    #[test]
    fn scope_filter_overrides_client_value() {
        let spec = QuerySpec::from_params(&params(&[("owner", "mallory")])).with_filter("owner", "alice");
        assert_eq!(spec.filters.get("owner").map(String::as_str), Some("alice"));
    }
}
