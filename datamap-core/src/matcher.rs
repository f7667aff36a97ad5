//! Field-mapping suggestions based on name similarity.
//!
//! Used by the interactive mapping builder: given one sample source record
//! and the target table structure, propose source-path -> target-column
//! pairs ranked by confidence. Suggestions are advisory only.

use crate::models::{MappingSuggestion, MatchKind, TableDescriptor};
use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::OnceLock;

/// Minimum confidence for a suggestion to surface.
const SUGGESTION_THRESHOLD: u8 = 70;

/// Curated synonym groups: field names that mean the same thing across
/// common API and database naming conventions.
const SYNONYM_GROUPS: &[&[&str]] = &[
    &["email", "email_address", "emailaddress", "mail", "user_email"],
    &["name", "full_name", "fullname", "display_name", "username"],
    &["first_name", "firstname", "fname", "given_name"],
    &["last_name", "lastname", "lname", "surname", "family_name"],
    &["phone", "phone_number", "phonenumber", "telephone", "mobile"],
    &["address", "street_address", "street", "location"],
    &["city", "town", "locality"],
    &["state", "province", "region"],
    &["country", "country_code", "nation"],
    &["zip", "zipcode", "zip_code", "postal_code", "postcode"],
    &["created", "created_at", "createdat", "date_created", "created_date"],
    &["updated", "updated_at", "updatedat", "date_updated", "modified"],
    &["id", "identifier", "key", "uuid", "guid"],
];

fn camel_boundary_patterns() -> &'static (Regex, Regex) {
    static RE: OnceLock<(Regex, Regex)> = OnceLock::new();
    RE.get_or_init(|| {
        (
            Regex::new(r"(.)([A-Z][a-z]+)").unwrap_or_else(|_| unreachable!()),
            Regex::new(r"([a-z0-9])([A-Z])").unwrap_or_else(|_| unreachable!()),
        )
    })
}

fn affix_patterns() -> &'static (Regex, Regex) {
    static RE: OnceLock<(Regex, Regex)> = OnceLock::new();
    RE.get_or_init(|| {
        (
            Regex::new(r"^(get_|set_|is_|has_)").unwrap_or_else(|_| unreachable!()),
            Regex::new(r"(_id|_at|_by)$").unwrap_or_else(|_| unreachable!()),
        )
    })
}

/// Normalizes a field name for comparison: camelCase is split into words,
/// accessor prefixes (`get_`, `is_`, ...) and bookkeeping suffixes (`_id`,
/// `_at`, `_by`) are removed, then everything but lowercase alphanumerics
/// is dropped.
pub fn normalize_field_name(field: &str) -> String {
    let (camel_a, camel_b) = camel_boundary_patterns();
    let snaked = camel_a.replace_all(field, "${1}_${2}");
    let snaked = camel_b.replace_all(&snaked, "${1}_${2}");

    let (prefix, suffix) = affix_patterns();
    let trimmed = prefix.replace(&snaked, "");
    let trimmed = suffix.replace(&trimmed, "");

    trimmed
        .to_lowercase()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// Recursively extracts `(path, leaf name)` pairs from a sample record.
///
/// Nested objects contribute both their own path and their children's; for
/// arrays of objects only the first element is descended, with an `[0]`
/// path segment.
pub fn extract_field_paths(data: &JsonValue) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    collect_paths(data, "", &mut fields);
    fields
}

fn collect_paths(data: &JsonValue, prefix: &str, out: &mut Vec<(String, String)>) {
    match data {
        JsonValue::Object(map) => {
            for (key, value) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                out.push((path.clone(), key.clone()));

                match value {
                    JsonValue::Object(_) => collect_paths(value, &path, out),
                    JsonValue::Array(items) => {
                        if let Some(first @ JsonValue::Object(_)) = items.first() {
                            collect_paths(first, &format!("{path}[0]"), out);
                        }
                    }
                    _ => {}
                }
            }
        }
        JsonValue::Array(items) if prefix.is_empty() => {
            if let Some(first @ JsonValue::Object(_)) = items.first() {
                collect_paths(first, "[0]", out);
            }
        }
        _ => {}
    }
}

/// Suggests mappings from a sample source record to the columns of a target
/// table, sorted by descending confidence (stable for equal scores).
pub fn suggest_mappings(sample: &JsonValue, table: &TableDescriptor) -> Vec<MappingSuggestion> {
    let columns: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
    let mut suggestions: Vec<MappingSuggestion> = extract_field_paths(sample)
        .into_iter()
        .filter_map(|(path, name)| {
            best_match(&name, &columns).and_then(|(column, confidence, kind)| {
                (confidence > SUGGESTION_THRESHOLD).then(|| MappingSuggestion {
                    source_path: path,
                    source_name: name,
                    target_column: column.to_string(),
                    confidence,
                    match_kind: kind,
                })
            })
        })
        .collect();

    suggestions.sort_by(|a, b| b.confidence.cmp(&a.confidence));
    suggestions
}

/// Best-matching column for one source field name, or `None` when there are
/// no columns.
fn best_match<'a>(field: &str, columns: &[&'a str]) -> Option<(&'a str, u8, MatchKind)> {
    let normalized = normalize_field_name(field);

    // Exact match after normalization wins outright
    for column in columns {
        if normalized == normalize_field_name(column) {
            return Some((column, 100, MatchKind::Exact));
        }
    }

    // Both names in the same synonym group
    for group in SYNONYM_GROUPS {
        if group.iter().any(|v| normalize_field_name(v) == normalized) {
            for column in columns {
                let normalized_col = normalize_field_name(column);
                if group.iter().any(|v| normalize_field_name(v) == normalized_col) {
                    return Some((column, 95, MatchKind::Synonym));
                }
            }
        }
    }

    // Fuzzy fallback: best of plain similarity on normalized names and
    // token-sorted similarity on the raw lowercase names
    let mut best: Option<(&str, u8)> = None;
    for column in columns {
        let simple = similarity_ratio(&normalized, &normalize_field_name(column));
        let token = token_sort_ratio(&field.to_lowercase(), &column.to_lowercase());
        let score = simple.max(token);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((column, score));
        }
    }
    best.map(|(column, score)| (column, score, MatchKind::Fuzzy))
}

/// Normalized Levenshtein similarity on a 0-100 scale.
fn similarity_ratio(a: &str, b: &str) -> u8 {
    if a.is_empty() && b.is_empty() {
        return 100;
    }
    let ratio = strsim::normalized_levenshtein(a, b);
    (ratio * 100.0).round() as u8
}

/// Similarity after splitting on non-alphanumerics and sorting the tokens,
/// so word order does not matter.
fn token_sort_ratio(a: &str, b: &str) -> u8 {
    similarity_ratio(&sorted_tokens(a), &sorted_tokens(b))
}

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnDescriptor, TableKind};
    use serde_json::json;

    fn table(columns: &[&str]) -> TableDescriptor {
        TableDescriptor {
            kind: TableKind::Table,
            inferred: false,
            columns: columns
                .iter()
                .map(|name| ColumnDescriptor::new(*name, "text"))
                .collect(),
        }
    }

    #[test]
    fn test_normalize_field_name() {
        assert_eq!(normalize_field_name("firstName"), "firstname");
        assert_eq!(normalize_field_name("First Name"), "firstname");
        assert_eq!(normalize_field_name("get_email"), "email");
        assert_eq!(normalize_field_name("created_at"), "created");
        assert_eq!(normalize_field_name("user_id"), "user");
        assert_eq!(normalize_field_name("XMLHttpRequest"), "xmlhttprequest");
    }

    #[test]
    fn test_extract_field_paths_nested() {
        let sample = json!({
            "id": 1,
            "profile": {"email": "a@b.com"},
            "tags": [{"label": "x"}],
            "scores": [1, 2],
        });
        let paths = extract_field_paths(&sample);
        assert!(paths.contains(&("id".to_string(), "id".to_string())));
        assert!(paths.contains(&("profile".to_string(), "profile".to_string())));
        assert!(paths.contains(&("profile.email".to_string(), "email".to_string())));
        assert!(paths.contains(&("tags[0].label".to_string(), "label".to_string())));
        // Scalar arrays contribute only their own key
        assert!(!paths.iter().any(|(p, _)| p.starts_with("scores[0]")));
    }

    #[test]
    fn test_extract_field_paths_array_root() {
        let sample = json!([{"name": "Ada"}]);
        let paths = extract_field_paths(&sample);
        assert!(paths.contains(&("[0].name".to_string(), "name".to_string())));
    }

    #[test]
    fn test_exact_match_wins() {
        let table = table(&["email_address", "full_name"]);
        let sample = json!({"emailAddress": "a@b.com"});
        let suggestions = suggest_mappings(&sample, &table);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].target_column, "email_address");
        assert_eq!(suggestions[0].confidence, 100);
        assert_eq!(suggestions[0].match_kind, MatchKind::Exact);
    }

    #[test]
    fn test_synonym_match() {
        let table = table(&["surname"]);
        let sample = json!({"last_name": "Lovelace"});
        let suggestions = suggest_mappings(&sample, &table);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].target_column, "surname");
        assert_eq!(suggestions[0].confidence, 95);
        assert_eq!(suggestions[0].match_kind, MatchKind::Synonym);
    }

    #[test]
    fn test_fuzzy_match_above_threshold() {
        let table = table(&["customer_name"]);
        let sample = json!({"customer_nam": "Ada"});
        let suggestions = suggest_mappings(&sample, &table);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].match_kind, MatchKind::Fuzzy);
        assert!(suggestions[0].confidence > SUGGESTION_THRESHOLD);
    }

    #[test]
    fn test_low_similarity_is_dropped() {
        let table = table(&["warehouse_zone"]);
        let sample = json!({"email": "a@b.com"});
        assert!(suggest_mappings(&sample, &table).is_empty());
    }

    #[test]
    fn test_suggestions_sorted_by_confidence() {
        let table = table(&["email", "last_name"]);
        let sample = json!({"lastname2": "Ada", "email": "a@b.com"});
        let suggestions = suggest_mappings(&sample, &table);
        assert!(suggestions.len() >= 2);
        for pair in suggestions.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        assert_eq!(suggestions[0].target_column, "email");
    }

    #[test]
    fn test_token_sort_handles_word_order() {
        assert_eq!(token_sort_ratio("name first", "first name"), 100);
    }
}
