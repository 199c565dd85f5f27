//! Request fingerprints for the mutation cache.

use std::fmt;

use serde_json::{Map, Value as JsonValue};

use crate::serialize::{BodyEncoding, SerializedRequest};

/// Canonical identity of a mutation request.
///
/// Two requests share a fingerprint exactly when every serialized field is
/// equal; the string is the request's canonical JSON, not a digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RequestFingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the fingerprint of a serialized request.
pub fn fingerprint(request: &SerializedRequest) -> RequestFingerprint {
    // Keys go in sorted order so the text is canonical even when serde_json
    // is built with `preserve_order`.
    let headers: Map<String, JsonValue> = request
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), JsonValue::String(value.clone())))
        .collect();

    let mut object = Map::new();
    if let Some(ref body) = request.body {
        object.insert("body".into(), JsonValue::String(body.clone()));
    }
    if let Some(encoding) = request.body_encoding {
        object.insert("bodyEncoding".into(), JsonValue::String(encoding.as_str().into()));
    }
    object.insert("cache".into(), JsonValue::String(request.cache.clone()));
    object.insert("credentials".into(), JsonValue::String(request.credentials.clone()));
    object.insert("headers".into(), JsonValue::Object(headers));
    object.insert("method".into(), JsonValue::String(request.method.clone()));
    object.insert("mode".into(), JsonValue::String(request.mode.clone()));
    object.insert("redirect".into(), JsonValue::String(request.redirect.clone()));
    object.insert("referrer".into(), JsonValue::String(request.referrer.clone()));
    object.insert("url".into(), JsonValue::String(request.url.clone()));

    RequestFingerprint(JsonValue::Object(object).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample() -> SerializedRequest {
        SerializedRequest {
            url: "https://ex.com/api/items".to_string(),
            headers: BTreeMap::from([
                ("content-type".to_string(), "application/json".to_string()),
                ("x-custom-header".to_string(), "cache".to_string()),
            ]),
            method: "POST".to_string(),
            mode: "cors".to_string(),
            credentials: "same-origin".to_string(),
            cache: "default".to_string(),
            redirect: "follow".to_string(),
            referrer: "about:client".to_string(),
            body: Some(r#"{"n":1}"#.to_string()),
            body_encoding: None,
        }
    }

    #[test]
    fn test_identical_requests_share_fingerprint() {
        assert_eq!(fingerprint(&sample()), fingerprint(&sample()));
    }

    #[test]
    fn test_every_field_distinguishes() {
        let base = fingerprint(&sample());
        let variants: Vec<fn(&mut SerializedRequest)> = vec![
            |r: &mut SerializedRequest| r.url.push('2'),
            |r: &mut SerializedRequest| {
                r.headers.insert("accept".into(), "*/*".into());
            },
            |r: &mut SerializedRequest| r.method = "PUT".into(),
            |r: &mut SerializedRequest| r.mode = "same-origin".into(),
            |r: &mut SerializedRequest| r.credentials = "include".into(),
            |r: &mut SerializedRequest| r.cache = "no-store".into(),
            |r: &mut SerializedRequest| r.redirect = "manual".into(),
            |r: &mut SerializedRequest| r.referrer = "https://ex.com/".into(),
            |r: &mut SerializedRequest| r.body = Some(r#"{"n":2}"#.into()),
            |r: &mut SerializedRequest| r.body = None,
            |r: &mut SerializedRequest| r.body_encoding = Some(BodyEncoding::Base64),
        ];

        for change in variants {
            let mut request = sample();
            change(&mut request);
            assert_ne!(fingerprint(&request), base);
        }
    }

    #[test]
    fn test_header_insertion_order_is_irrelevant() {
        let mut reordered = sample();
        reordered.headers = BTreeMap::new();
        reordered.headers.insert("x-custom-header".into(), "cache".into());
        reordered.headers.insert("content-type".into(), "application/json".into());

        assert_eq!(fingerprint(&reordered), fingerprint(&sample()));
    }

    #[test]
    fn test_fingerprint_text_is_stable() {
        let mut request = sample();
        request.headers.clear();
        request.body = None;

        assert_eq!(
            fingerprint(&request).as_str(),
            r#"{"cache":"default","credentials":"same-origin","headers":{},"method":"POST","mode":"cors","redirect":"follow","referrer":"about:client","url":"https://ex.com/api/items"}"#
        );
    }

    #[test]
    fn test_empty_body_differs_from_absent_body() {
        let mut empty = sample();
        empty.body = Some(String::new());
        let mut absent = sample();
        absent.body = None;

        assert_ne!(fingerprint(&empty), fingerprint(&absent));
    }
}
