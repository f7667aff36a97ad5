//! Dot-path extraction over JSON records.
//!
//! Paths use dot notation with optional `[n]` index segments, e.g.
//! `data.items[0].price`. A leading `$.` (JSONPath spelling) is accepted and
//! stripped. Missing segments resolve to absent, never an error.

use serde_json::Value as JsonValue;

/// Extracts the value at `path` within `record`.
///
/// Returns `None` for an empty path or any missing segment.
pub fn extract_path<'a>(record: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    let path = path.strip_prefix('$').unwrap_or(path);
    if path.is_empty() {
        return None;
    }

    let mut current = record;
    for segment in split_segments(path) {
        current = match segment {
            Segment::Key(key) => current.as_object()?.get(key)?,
            Segment::Index(idx) => current.as_array()?.get(idx)?,
        };
    }
    Some(current)
}

enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Splits `a.b[0].c` into key and index segments.
fn split_segments(path: &str) -> impl Iterator<Item = Segment<'_>> {
    path.split('.').flat_map(|part| {
        let mut segments = Vec::new();
        match part.find('[') {
            Some(bracket) => {
                let key = &part[..bracket];
                if !key.is_empty() {
                    segments.push(Segment::Key(key));
                }
                let mut rest = &part[bracket..];
                while let Some(stripped) = rest.strip_prefix('[') {
                    match stripped.find(']') {
                        Some(end) => {
                            if let Ok(idx) = stripped[..end].parse::<usize>() {
                                segments.push(Segment::Index(idx));
                            } else {
                                // Non-numeric index: treat the raw text as a key
                                segments.push(Segment::Key(&stripped[..end]));
                            }
                            rest = &stripped[end + 1..];
                        }
                        None => {
                            segments.push(Segment::Key(rest));
                            break;
                        }
                    }
                }
            }
            None => segments.push(Segment::Key(part)),
        }
        segments
    })
}
