//! Conversion between live requests/responses and storable records.
//!
//! Serializing never consumes the caller's body: each function reads a
//! duplicate obtained through `try_clone`. Bodies that are valid UTF-8 are
//! stored as text; anything else is stored as base64 and flagged with a
//! body encoding, so distinct byte sequences never collapse.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use swcache_net::{Body, Request, Response};

use crate::WorkerError;

/// Plain form of a request, as used for fingerprinting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub method: String,
    pub mode: String,
    pub credentials: String,
    pub cache: String,
    pub redirect: String,
    pub referrer: String,
    /// Present only for methods that allow a body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, rename = "bodyEncoding", skip_serializing_if = "Option::is_none")]
    pub body_encoding: Option<BodyEncoding>,
}

/// Plain form of a response, as stored in the mutation cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedResponse {
    pub headers: BTreeMap<String, String>,
    pub status: u16,
    pub status_text: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_encoding: Option<BodyEncoding>,
}

/// How a non-text body is written into its string field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    Base64,
}

impl BodyEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyEncoding::Base64 => "base64",
        }
    }
}

fn encode_body(bytes: Bytes) -> (String, Option<BodyEncoding>) {
    match String::from_utf8(bytes.to_vec()) {
        Ok(text) => (text, None),
        Err(_) => (STANDARD.encode(&bytes), Some(BodyEncoding::Base64)),
    }
}

fn decode_body(body: String, encoding: Option<BodyEncoding>) -> Result<Bytes, WorkerError> {
    match encoding {
        None => Ok(Bytes::from(body)),
        Some(BodyEncoding::Base64) => STANDARD
            .decode(body.as_bytes())
            .map(Bytes::from)
            .map_err(|e| WorkerError::CacheError(format!("stored body: {}", e))),
    }
}

/// Flatten headers into a name → value map.
///
/// Names are lower-case; repeated headers are joined with `", "` in the
/// order they were added.
pub fn serialize_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .keys()
        .map(|name| {
            let joined = headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(", ");
            (name.as_str().to_string(), joined)
        })
        .collect()
}

/// Serialize a request, reading its body from a duplicate.
pub async fn serialize_request(request: &mut Request) -> Result<SerializedRequest, WorkerError> {
    let (body, body_encoding) = if request.allows_body() {
        let (text, encoding) = encode_body(request.body.try_clone()?.bytes().await?);
        (Some(text), encoding)
    } else {
        (None, None)
    };

    Ok(SerializedRequest {
        url: request.url.to_string(),
        headers: serialize_headers(&request.headers),
        method: request.method.to_string(),
        mode: request.mode.to_string(),
        credentials: request.credentials.to_string(),
        cache: request.cache.to_string(),
        redirect: request.redirect.to_string(),
        referrer: request.referrer.clone(),
        body,
        body_encoding,
    })
}

/// Serialize a response, reading its body from a duplicate.
pub async fn serialize_response(response: &mut Response) -> Result<SerializedResponse, WorkerError> {
    let (body, body_encoding) = encode_body(response.body.try_clone()?.bytes().await?);

    Ok(SerializedResponse {
        headers: serialize_headers(&response.headers),
        status: response.status.as_u16(),
        status_text: response.status_text.clone(),
        body,
        body_encoding,
    })
}

/// Rebuild a live response from its serialized form.
pub fn deserialize_response(data: SerializedResponse) -> Result<Response, WorkerError> {
    let status = StatusCode::from_u16(data.status)
        .map_err(|e| WorkerError::CacheError(format!("stored status {}: {}", data.status, e)))?;

    let mut headers = HeaderMap::with_capacity(data.headers.len());
    for (name, value) in &data.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| WorkerError::CacheError(format!("stored header {:?}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| WorkerError::CacheError(format!("stored header value {:?}: {}", value, e)))?;
        headers.insert(name, value);
    }

    Ok(Response {
        url: None,
        status,
        status_text: data.status_text,
        headers,
        body: Body::from(decode_body(data.body, data.body_encoding)?),
    })
}
