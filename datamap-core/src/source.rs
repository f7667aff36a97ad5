//! HTTP source fetching.
//!
//! The engine treats the source endpoint as an opaque JSON producer: one
//! request per execution, a 30 second timeout, and no pagination. Auth
//! credentials live only in memory; they are injected into the outgoing
//! request and never serialized or logged.

use crate::error::{DataMapError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Request timeout for source fetches.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Envelope keys probed, in order, when the response root is an object.
const RECORD_CONTAINER_KEYS: &[&str] = &["data", "results", "items", "records"];

/// Where an API-key credential is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyLocation {
    #[default]
    Header,
    Query,
}

/// Authentication applied to the outgoing request.
#[derive(Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthScheme {
    #[default]
    None,
    ApiKey {
        key: String,
        /// Header or query-parameter name, e.g. `X-API-Key`
        #[serde(default = "default_key_name")]
        name: String,
        #[serde(default)]
        location: KeyLocation,
    },
    Bearer {
        token: String,
    },
}

fn default_key_name() -> String {
    "X-API-Key".to_string()
}

// Credentials stay out of logs and error output.
impl std::fmt::Debug for AuthScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::ApiKey { name, location, .. } => f
                .debug_struct("ApiKey")
                .field("name", name)
                .field("location", location)
                .finish_non_exhaustive(),
            Self::Bearer { .. } => f.debug_struct("Bearer").finish_non_exhaustive(),
        }
    }
}

/// One fully-described source request.
///
/// The auth field deserializes from configuration but is never serialized
/// back out, so persisted request descriptions carry no credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRequest {
    pub url: String,
    /// HTTP method name; defaults to GET
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// JSON body, sent only for POST/PUT/PATCH
    #[serde(default)]
    pub body: Option<JsonValue>,
    #[serde(default, skip_serializing)]
    pub auth: AuthScheme,
}

fn default_method() -> String {
    "GET".to_string()
}

impl SourceRequest {
    /// True when the method carries a request body.
    fn sends_body(&self) -> bool {
        matches!(self.method.to_uppercase().as_str(), "POST" | "PUT" | "PATCH")
    }
}

/// Merges the auth scheme into headers and query parameters.
fn apply_auth(
    auth: &AuthScheme,
    headers: &mut BTreeMap<String, String>,
    query: &mut BTreeMap<String, String>,
) {
    match auth {
        AuthScheme::None => {}
        AuthScheme::ApiKey { key, name, location } => match location {
            KeyLocation::Header => {
                headers.insert(name.clone(), key.clone());
            }
            KeyLocation::Query => {
                query.insert(name.clone(), key.clone());
            }
        },
        AuthScheme::Bearer { token } => {
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
    }
}

/// Performs the source request and returns the decoded JSON payload.
///
/// Non-2xx responses and transport failures map to fetch errors; the caller
/// decides whether the whole execution fails.
pub async fn fetch(request: &SourceRequest) -> Result<JsonValue> {
    let method: reqwest::Method = request
        .method
        .to_uppercase()
        .parse()
        .map_err(|_| DataMapError::configuration(format!("invalid HTTP method: {}", request.method)))?;

    let mut headers = request.headers.clone();
    let mut query = request.query.clone();
    apply_auth(&request.auth, &mut headers, &mut query);

    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| DataMapError::fetch(format!("failed to build HTTP client: {e}")))?;

    debug!(method = %method, url = %request.url, "fetching source data");

    let mut builder = client.request(method, &request.url).query(&query);
    for (name, value) in &headers {
        builder = builder.header(name, value);
    }
    if request.sends_body() {
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
    }

    let response = builder
        .send()
        .await
        .map_err(|e| DataMapError::fetch(format!("request to source failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DataMapError::fetch(format!(
            "source returned HTTP {status} for {}",
            request.url
        )));
    }

    response
        .json()
        .await
        .map_err(|e| DataMapError::fetch(format!("source response is not valid JSON: {e}")))
}

/// Extracts the record list from a response payload.
///
/// An array root is the record list itself; an object root is probed for a
/// conventional envelope key holding an array; anything else is treated as a
/// single record.
pub fn extract_records(payload: JsonValue) -> Vec<JsonValue> {
    match payload {
        JsonValue::Array(records) => records,
        JsonValue::Object(mut map) => {
            for key in RECORD_CONTAINER_KEYS {
                if matches!(map.get(*key), Some(JsonValue::Array(_))) {
                    if let Some(JsonValue::Array(records)) = map.remove(*key) {
                        return records;
                    }
                }
            }
            vec![JsonValue::Object(map)]
        }
        other => vec![other],
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_records_array_root() {
        let records = extract_records(json!([{"a": 1}, {"a": 2}]));
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_extract_records_envelope_keys() {
        for key in ["data", "results", "items", "records"] {
            let payload = json!({key: [{"a": 1}], "meta": {"total": 1}});
            let records = extract_records(payload);
            assert_eq!(records, vec![json!({"a": 1})]);
        }
    }

    #[test]
    fn test_extract_records_prefers_first_envelope_key() {
        let payload = json!({"results": [{"b": 2}], "data": [{"a": 1}]});
        assert_eq!(extract_records(payload), vec![json!({"a": 1})]);
    }

    #[test]
    fn test_extract_records_ignores_non_array_envelope_value() {
        let payload = json!({"data": {"a": 1}});
        assert_eq!(extract_records(payload.clone()), vec![payload]);
    }

    #[test]
    fn test_extract_records_single_object() {
        let payload = json!({"id": 7});
        assert_eq!(extract_records(payload.clone()), vec![payload]);
    }

    #[test]
    fn test_apply_auth_api_key_header() {
        let auth = AuthScheme::ApiKey {
            key: "secret".to_string(),
            name: "X-API-Key".to_string(),
            location: KeyLocation::Header,
        };
        let mut headers = BTreeMap::new();
        let mut query = BTreeMap::new();
        apply_auth(&auth, &mut headers, &mut query);
        assert_eq!(headers.get("X-API-Key").map(String::as_str), Some("secret"));
        assert!(query.is_empty());
    }

    #[test]
    fn test_apply_auth_api_key_query() {
        let auth = AuthScheme::ApiKey {
            key: "secret".to_string(),
            name: "api_key".to_string(),
            location: KeyLocation::Query,
        };
        let mut headers = BTreeMap::new();
        let mut query = BTreeMap::new();
        apply_auth(&auth, &mut headers, &mut query);
        assert_eq!(query.get("api_key").map(String::as_str), Some("secret"));
        assert!(headers.is_empty());
    }

    #[test]
    fn test_apply_auth_bearer() {
        let auth = AuthScheme::Bearer {
            token: "tok".to_string(),
        };
        let mut headers = BTreeMap::new();
        let mut query = BTreeMap::new();
        apply_auth(&auth, &mut headers, &mut query);
        assert_eq!(
            headers.get("Authorization").map(String::as_str),
            Some("Bearer tok")
        );
    }

    #[test]
    fn test_request_serialization_drops_credentials() {
        let request = SourceRequest {
            url: "https://api.example.org/users".to_string(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: None,
            auth: AuthScheme::Bearer {
                token: "tok".to_string(),
            },
        };
        let serialized = serde_json::to_string(&request).unwrap();
        assert!(!serialized.contains("tok"));
        assert!(!serialized.contains("auth"));
    }

    #[test]
    fn test_request_deserializes_auth_with_defaults() {
        let request: SourceRequest = serde_json::from_str(
            r#"{
                "url": "https://api.example.org/users",
                "auth": {"type": "api_key", "key": "secret"}
            }"#,
        )
        .unwrap();
        assert_eq!(request.method, "GET");
        match request.auth {
            AuthScheme::ApiKey { name, location, .. } => {
                assert_eq!(name, "X-API-Key");
                assert_eq!(location, KeyLocation::Header);
            }
            _ => panic!("expected api_key auth"),
        }
    }

    #[test]
    fn test_body_only_for_mutating_methods() {
        let mut request = SourceRequest {
            url: "https://api.example.org".to_string(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: Some(json!({"q": 1})),
            auth: AuthScheme::None,
        };
        assert!(!request.sends_body());
        request.method = "post".to_string();
        assert!(request.sends_body());
        request.method = "PATCH".to_string();
        assert!(request.sends_body());
    }
}
