//! Shared query parameter types for API handlers.

use catchpy_core::document;
use catchpy_db::models::annotation::SearchFilters;
use serde::Deserialize;

use crate::error::AppError;

/// Output dialect requested by the caller (`?format=`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Catcha,
    Annotatorjs,
}

/// Query parameter carrying only the output format.
#[derive(Debug, Default, Deserialize)]
pub struct FormatParams {
    #[serde(default)]
    pub format: OutputFormat,
}

/// Query parameters for the annotation search endpoint.
///
/// List parameters (`userid`, `username`, `tag`) accept comma-separated
/// values.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub context_id: Option<String>,
    pub collection_id: Option<String>,
    pub platform: Option<String>,
    pub userid: Option<String>,
    pub username: Option<String>,
    pub tag: Option<String>,
    pub source: Option<String>,
    pub media: Option<String>,
    pub text: Option<String>,
    /// Lower bound on creation time (RFC 3339).
    pub since: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    #[serde(default)]
    pub format: OutputFormat,
}

impl SearchParams {
    /// Translate wire parameters into repository filters.
    pub fn into_filters(self, default_limit: i64) -> Result<SearchFilters, AppError> {
        let since = match self.since.as_deref() {
            Some(s) => Some(document::parse_timestamp(s).map_err(AppError::Core)?),
            None => None,
        };
        Ok(SearchFilters {
            context_id: self.context_id,
            collection_id: self.collection_id,
            platform_name: self.platform,
            userid_list: split_list(self.userid),
            username_list: split_list(self.username),
            tag_list: split_list(self.tag),
            target_source: self.source,
            media: self.media,
            text: self.text,
            since,
            include_deleted_and_replies: false,
            read_principal: None,
            limit: Some(self.limit.unwrap_or(default_limit)),
            offset: Some(self.offset.unwrap_or(0)),
        })
    }
}

fn split_list(param: Option<String>) -> Vec<String> {
    param
        .map(|s| {
            s.split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_params_split_on_commas() {
        assert_eq!(
            split_list(Some("a, b ,,c".into())),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(split_list(None).is_empty());
    }

    #[test]
    fn filters_default_pagination() {
        let filters = SearchParams::default().into_filters(50).unwrap();
        assert_eq!(filters.limit, Some(50));
        assert_eq!(filters.offset, Some(0));
        assert!(!filters.include_deleted_and_replies);
    }

    #[test]
    fn bad_since_rejected() {
        let params = SearchParams {
            since: Some("yesterday".into()),
            ..Default::default()
        };
        assert!(params.into_filters(50).is_err());
    }
}
