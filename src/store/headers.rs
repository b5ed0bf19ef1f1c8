//! Header codec for artifact metadata.
//!
//! The blob service keeps no typed side-channel, so headers are the only
//! durable copy of content type, expiry, checksum and custom metadata.
//! Every header name used by the crate lives here.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::types::{FileMetadata, PutFileOptions};
use crate::backend::{Headers, ObjectInfo};

pub const CONTENT_TYPE: &str = "Content-Type";
pub const EXPIRES_AT: &str = "X-Expires-At";
pub const CHECKSUM: &str = "X-Checksum";
pub const META_PREFIX: &str = "X-Meta-";

/// `SHA-256=<hex digest>`
pub fn checksum(body: &[u8]) -> String {
    format!("SHA-256={}", hex::encode(Sha256::digest(body)))
}

/// Absolute expiry for a TTL, truncated to whole seconds so it survives the
/// RFC 3339 header encoding unchanged.
pub fn expiry_for(ttl: Option<Duration>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl?).ok()?;
    now.checked_add_signed(ttl).map(|t| t.trunc_subsecs(0))
}

pub fn encode_headers(
    options: &PutFileOptions,
    checksum: Option<&str>,
    expires_at: Option<DateTime<Utc>>,
) -> Headers {
    let mut headers = Headers::new();
    if let Some(content_type) = options.content_type.as_deref().filter(|c| !c.is_empty()) {
        headers.insert(CONTENT_TYPE.to_string(), content_type.to_string());
    }
    if let Some(expires_at) = expires_at {
        headers.insert(
            EXPIRES_AT.to_string(),
            expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    }
    if let Some(checksum) = checksum {
        headers.insert(CHECKSUM.to_string(), checksum.to_string());
    }
    for (key, value) in &options.metadata {
        headers.insert(format!("{META_PREFIX}{key}"), value.clone());
    }
    headers
}

/// Header lookup ignoring ASCII case.
pub fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Parsed `X-Expires-At`. Malformed values are ignored.
pub fn expires_at(headers: &Headers) -> Option<DateTime<Utc>> {
    header(headers, EXPIRES_AT)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|t| t.with_timezone(&Utc))
}

pub fn decode_metadata(info: &ObjectInfo) -> FileMetadata {
    let metadata = info
        .headers
        .iter()
        .filter_map(|(k, v)| {
            let prefix = k.get(..META_PREFIX.len())?;
            prefix
                .eq_ignore_ascii_case(META_PREFIX)
                .then(|| (k[META_PREFIX.len()..].to_string(), v.clone()))
        })
        .collect();

    FileMetadata {
        key: info.name.clone(),
        size: info.size,
        content_type: header(&info.headers, CONTENT_TYPE).map(str::to_string),
        checksum: header(&info.headers, CHECKSUM).map(str::to_string),
        created_at: info.modified,
        expires_at: expires_at(&info.headers),
        metadata,
    }
}
