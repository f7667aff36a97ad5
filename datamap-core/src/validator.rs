//! Advisory type-compatibility checks between inferred source field types
//! and target column types.
//!
//! Verdicts never block execution: a mapping flagged incompatible still runs,
//! the validator only tells the caller which transform would make it sound.

use crate::models::{FieldMapping, TableDescriptor, TypeValidationEntry};
use crate::path::extract_path;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Sample values are truncated to this many characters in the verdict.
const SAMPLE_PREVIEW_CHARS: usize = 50;

/// Directly compatible source-type -> target-type fragments. A pair matches
/// when the source name matches the left side and the target type string
/// contains one of the right-side fragments.
const DIRECT_COMPATIBLE: &[(&str, &[&str])] = &[
    (
        "string",
        &[
            "varchar",
            "text",
            "char",
            "character varying",
            "nvarchar",
            "ntext",
            "longtext",
            "mediumtext",
            "tinytext",
            "string",
        ],
    ),
    (
        "integer",
        &[
            "int",
            "integer",
            "bigint",
            "smallint",
            "tinyint",
            "int2",
            "int4",
            "int8",
            "serial",
            "bigserial",
            "smallserial",
        ],
    ),
    (
        "float",
        &[
            "float",
            "double",
            "decimal",
            "numeric",
            "real",
            "double precision",
            "float4",
            "float8",
            "money",
        ],
    ),
    ("boolean", &["bool", "boolean", "bit", "tinyint(1)"]),
    (
        "date",
        &[
            "date",
            "datetime",
            "timestamp",
            "timestamptz",
            "timestamp with time zone",
            "timestamp without time zone",
        ],
    ),
    (
        "datetime",
        &[
            "datetime",
            "timestamp",
            "timestamptz",
            "timestamp with time zone",
            "timestamp without time zone",
        ],
    ),
    ("json", &["json", "jsonb", "text", "longtext"]),
    ("array", &["json", "jsonb", "text", "longtext"]),
    ("email", &["varchar", "text", "char", "nvarchar"]),
    ("url", &["varchar", "text", "nvarchar"]),
];

/// BSON type names reported by document-store schema inference, mapped onto
/// relational target fragments.
const BSON_COMPATIBLE: &[(&str, &[&str])] = &[
    ("objectid", &["varchar", "text", "char"]),
    ("string", &["varchar", "text", "char"]),
    ("int32", &["int", "integer"]),
    ("int64", &["bigint", "int8"]),
    ("double", &["double", "float", "decimal"]),
    ("decimal128", &["decimal", "numeric"]),
    ("bool", &["boolean", "bool", "bit"]),
    ("date", &["timestamp", "datetime"]),
    ("object", &["json", "jsonb", "text"]),
    ("array", &["json", "jsonb", "text"]),
];

/// (source names, target fragments, recommended transform) triples that are
/// compatible with conversion.
const CONVERSION_NEEDED: &[(&[&str], &[&str], &str)] = &[
    (
        &["string", "email", "url"],
        &["int", "integer", "bigint", "smallint"],
        "string to integer conversion: use the parse_int transform",
    ),
    (
        &["string"],
        &["float", "double", "decimal", "numeric"],
        "string to float conversion: use the parse_float transform",
    ),
    (
        &["string"],
        &["bool", "boolean", "bit"],
        "string to boolean conversion: use the parse_bool transform",
    ),
    (
        &["string"],
        &["date"],
        "string to date conversion: use the parse_date transform",
    ),
    (
        &["string"],
        &["datetime", "timestamp"],
        "string to datetime conversion: use the parse_datetime transform",
    ),
    (
        &["integer", "float"],
        &["varchar", "text", "char"],
        "number to string conversion: use the to_string transform",
    ),
    (
        &["boolean"],
        &["varchar", "text"],
        "boolean to string conversion: use the to_string transform",
    ),
    (
        &["json", "object"],
        &["varchar", "text", "nvarchar"],
        "object to string conversion: use the json_stringify transform",
    ),
    (
        &["float"],
        &["int", "integer"],
        "float to integer conversion: use parse_int (precision loss)",
    ),
];

fn date_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2}|\d{2}/\d{2}/\d{4}|\d{2}-\d{2}-\d{4})$")
            .unwrap_or_else(|_| unreachable!())
    })
}

fn datetime_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}|\d{2}/\d{2}/\d{4} \d{2}:\d{2}:\d{2})")
            .unwrap_or_else(|_| unreachable!())
    })
}

fn email_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .unwrap_or_else(|_| unreachable!())
    })
}

/// Infers a source type name for the value at `path` inside a sample record.
///
/// Strings are refined into `date`, `datetime`, `email` or `url` when they
/// match the corresponding shape; an unresolvable path reports `null`.
pub fn infer_source_type<'a>(sample: &'a JsonValue, path: &str) -> (&'static str, Option<&'a JsonValue>) {
    let Some(value) = extract_path(sample, path) else {
        return ("null", None);
    };
    let name = match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "integer"
            } else {
                "float"
            }
        }
        JsonValue::String(s) => classify_string(s),
        JsonValue::Object(_) => "json",
        JsonValue::Array(_) => "array",
    };
    (name, Some(value))
}

fn classify_string(s: &str) -> &'static str {
    if date_pattern().is_match(s) {
        "date"
    } else if datetime_pattern().is_match(s) {
        "datetime"
    } else if email_pattern().is_match(s) {
        "email"
    } else if s.starts_with("http://") || s.starts_with("https://") {
        "url"
    } else {
        "string"
    }
}

/// Compatibility verdict between a source type name and a raw target column
/// type string. Case-insensitive on both sides.
pub fn check_compatibility(source_type: &str, target_type: &str) -> TypeValidationEntry {
    let source = source_type.to_lowercase();
    let target = target_type.to_lowercase();

    let mut entry = TypeValidationEntry {
        source_type: source_type.to_string(),
        target_type: target_type.to_string(),
        compatible: false,
        conversion_needed: false,
        warning: None,
        sample_value: None,
    };

    for (src, fragments) in DIRECT_COMPATIBLE {
        if source == *src && fragments.iter().any(|f| target.contains(f)) {
            entry.compatible = true;
            return entry;
        }
    }

    for (bson, fragments) in BSON_COMPATIBLE {
        if source == *bson && fragments.iter().any(|f| target.contains(f)) {
            entry.compatible = true;
            return entry;
        }
    }

    for (sources, fragments, advice) in CONVERSION_NEEDED {
        if sources.contains(&source.as_str()) && fragments.iter().any(|f| target.contains(f)) {
            entry.compatible = true;
            entry.conversion_needed = true;
            entry.warning = Some((*advice).to_string());
            return entry;
        }
    }

    if source == "null" {
        entry.compatible = true;
        entry.warning = Some("source field is null in the sample record".to_string());
        return entry;
    }

    entry.conversion_needed = true;
    entry.warning = Some(format!("incompatible types: {source_type} -> {target_type}"));
    entry
}

/// Validates every field mapping against a sample record and the target
/// table structure. Keys are `source_path->target_column`.
pub fn validate_mappings(
    mappings: &[FieldMapping],
    sample: &JsonValue,
    table: &TableDescriptor,
) -> BTreeMap<String, TypeValidationEntry> {
    let mut verdicts = BTreeMap::new();
    for mapping in mappings {
        let (source_type, value) = infer_source_type(sample, &mapping.source_path);
        let target_type = table
            .column(&mapping.target_column)
            .map_or("unknown", |c| c.data_type.as_str());

        let mut entry = check_compatibility(source_type, target_type);
        entry.sample_value = value.filter(|v| !v.is_null()).map(preview);

        let key = format!("{}->{}", mapping.source_path, mapping.target_column);
        verdicts.insert(key, entry);
    }
    verdicts
}

fn preview(value: &JsonValue) -> String {
    let text = match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    };
    text.chars().take(SAMPLE_PREVIEW_CHARS).collect()
}
