//! Typed access to raw query-string pairs.
//!
//! Handlers take `Query<Vec<(String, String)>>` so repeated keys such as
//! `label=cat&label=dog` survive extraction.

use std::collections::HashSet;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }

    /// First value for `name`, trimmed; blank values count as absent.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn has(&self, name: &str) -> bool {
        self.0.iter().any(|(key, _)| key == name)
    }

    /// Every non-blank `label` value, trimmed, in request order.
    pub fn labels(&self) -> Vec<String> {
        self.0
            .iter()
            .filter(|(key, _)| key == "label")
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// `None` when no `label` key was sent, otherwise the set of labels to show.
    pub fn label_filter(&self) -> Option<HashSet<String>> {
        if self.has("label") {
            Some(self.labels().into_iter().collect())
        } else {
            None
        }
    }

    pub fn float(&self, name: &'static str, default: f64) -> Result<f64> {
        match self.first(name) {
            None => Ok(default),
            Some(raw) => raw
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| Error::InvalidParameter { name, value: raw.to_string() }),
        }
    }

    pub fn int(&self, name: &'static str, default: i64) -> Result<i64> {
        match self.first(name) {
            None => Ok(default),
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| Error::InvalidParameter { name, value: raw.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> QueryParams {
        QueryParams::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_numbers_default_and_reject() {
        let p = params(&[("limit", "20"), ("offset", " "), ("min_conf", "abc")]);
        assert_eq!(p.int("limit", 50).unwrap(), 20);
        assert_eq!(p.int("offset", 0).unwrap(), 0);
        assert!(matches!(
            p.float("min_conf", 0.4),
            Err(Error::InvalidParameter { name: "min_conf", .. })
        ));
        assert!(params(&[("min_conf", "NaN")]).float("min_conf", 0.4).is_err());
        assert!((params(&[]).float("min_conf", 0.4).unwrap() - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn test_repeated_labels() {
        let p = params(&[("label", "cat"), ("label", " "), ("label", " dog ")]);
        assert_eq!(p.labels(), vec!["cat", "dog"]);
        assert_eq!(p.label_filter().map(|s| s.len()), Some(2));
        assert!(params(&[]).label_filter().is_none());
        assert_eq!(params(&[("label", "")]).label_filter(), Some(HashSet::new()));
    }
}
