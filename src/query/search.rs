use std::sync::Arc;

use super::filter::Filter;

/// Builds a filter from one search token (or the whole typeahead prefix).
pub type TextPredicate<E> = Arc<dyn Fn(&str) -> Filter<E> + Send + Sync>;

/// Splits free-text search input on whitespace. Tokens keep their case.
pub fn tokenize_search(input: &str) -> Vec<String> {
    input.split_whitespace().map(str::to_string).collect()
}

pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

pub fn starts_with_ignore_case(haystack: &str, prefix: &str) -> bool {
    haystack.to_lowercase().starts_with(&prefix.to_lowercase())
}
