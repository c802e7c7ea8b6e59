//! URL construction for the upload session and single-shot put calls.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;

/// Encodes an object key for use as a path segment.
///
/// A missing key is sent as `~`, which asks the service to assign one.
pub fn encode_key(key: Option<&str>) -> String {
    match key {
        Some(key) => URL_SAFE.encode(key.as_bytes()),
        None => "~".to_string(),
    }
}

/// `{host}/buckets/{bucket}/objects/{key}/uploads`
pub fn uploads_url(host: &str, bucket: &str, key: Option<&str>) -> String {
    format!(
        "{}/buckets/{bucket}/objects/{}/uploads",
        host.trim_end_matches('/'),
        encode_key(key)
    )
}

/// `{host}/buckets/{bucket}/objects/{key}/uploads/{uploadId}`
pub fn session_url(host: &str, bucket: &str, key: Option<&str>, upload_id: &str) -> String {
    format!("{}/{upload_id}", uploads_url(host, bucket, key))
}

/// `{host}/buckets/{bucket}/objects/{key}/uploads/{uploadId}/{partNumber}`
pub fn part_url(
    host: &str,
    bucket: &str,
    key: Option<&str>,
    upload_id: &str,
    part_number: u32,
) -> String {
    format!("{}/{part_number}", session_url(host, bucket, key, upload_id))
}

/// `{host}/put/{size}[/mimeType/{b64}][/x:{name}/{b64}...][/key/{b64key}]`
///
/// Only custom variables named `x:...` with a non-empty value are sent.
pub fn put_url(
    host: &str,
    size: u64,
    key: Option<&str>,
    mime_type: &str,
    custom_vars: &HashMap<String, String>,
) -> String {
    let mut url = format!("{}/put/{size}", host.trim_end_matches('/'));
    if !mime_type.is_empty() {
        url.push_str("/mimeType/");
        url.push_str(&URL_SAFE.encode(mime_type.as_bytes()));
    }

    let mut vars: Vec<_> = custom_vars
        .iter()
        .filter(|(k, v)| k.starts_with("x:") && !v.is_empty())
        .collect();
    vars.sort();
    for (k, v) in vars {
        url.push('/');
        url.push_str(k);
        url.push('/');
        url.push_str(&URL_SAFE.encode(v.as_bytes()));
    }

    if let Some(key) = key.filter(|k| !k.is_empty()) {
        url.push_str("/key/");
        url.push_str(&URL_SAFE.encode(key.as_bytes()));
    }
    url
}
