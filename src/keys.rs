use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::path::Path;
use url::Url;

/// Everything except the RFC 3986 unreserved characters gets percent-encoded.
/// Matches what S3 expects for canonical URIs, with '/' kept as a separator
/// by encoding per segment.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Build an object key for an upload: `<prefix><epoch-millis>.<ext>`, or just
/// `<prefix><epoch-millis>` when the source filename carries no extension.
/// The prefix is expected to be normalized already (see
/// [`crate::settings::normalize_prefix`]).
pub fn object_key(prefix: &str, epoch_millis: i64, filename: Option<&str>) -> String {
    let ext = filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext {
        Some(ext) if !ext.is_empty() => format!("{}{}.{}", prefix, epoch_millis, ext),
        _ => format!("{}{}", prefix, epoch_millis),
    }
}

/// Percent-encode a key into an absolute URI path, one segment at a time so
/// that slashes stay separators.
pub fn encoded_key_path(key: &str) -> String {
    let segments: Vec<String> = key
        .split('/')
        .map(|segment| utf8_percent_encode(segment, UNRESERVED).to_string())
        .collect();
    format!("/{}", segments.join("/"))
}

/// Stable public-read URL for an object: `https://<host><encoded path>`.
pub fn public_url(host: &str, key: &str) -> String {
    format!("https://{}{}", host, encoded_key_path(key))
}

/// Recover a storage key from either a full URL or a bare key string. URLs
/// lose scheme, host and query, and the path is percent-decoded; bare keys
/// only have leading slashes stripped. Both shapes occur in documents because
/// the reference format depends on the public-vs-presigned setting.
pub fn parse_key(url_or_key: &str) -> String {
    if let Ok(url) = Url::parse(url_or_key) {
        if url.has_host() {
            let path = url.path().trim_start_matches('/');
            return percent_decode_str(path).decode_utf8_lossy().into_owned();
        }
    }
    url_or_key.trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_with_extension() {
        assert_eq!(object_key("img/", 1700000000000, Some("shot.PNG")), "img/1700000000000.png");
        assert_eq!(object_key("", 42, Some("photo.jpeg")), "42.jpeg");
    }

    #[test]
    fn test_object_key_without_extension() {
        assert_eq!(object_key("img/", 42, Some("clipboard")), "img/42");
        assert_eq!(object_key("img/", 42, None), "img/42");
        assert_eq!(object_key("", 42, Some("dotfile.")), "42");
    }

    #[test]
    fn test_encoded_key_path_keeps_slashes() {
        assert_eq!(encoded_key_path("img/1700.png"), "/img/1700.png");
        assert_eq!(encoded_key_path("my notes/a b.png"), "/my%20notes/a%20b.png");
    }

    #[test]
    fn test_public_url_round_trip() {
        for key in ["1700.png", "img/1700.png", "deep/nested/key.webp"] {
            let url = public_url("notes.s3.us-east-1.amazonaws.com", key);
            assert_eq!(parse_key(&url), key);
        }
    }

    #[test]
    fn test_parse_key_decodes_url_path() {
        let url = "https://bucket.s3.amazonaws.com/my%20notes/shot%201.png?X-Amz-Expires=3600";
        assert_eq!(parse_key(url), "my notes/shot 1.png");
    }

    #[test]
    fn test_parse_key_bare_key_strips_leading_slashes() {
        assert_eq!(parse_key("/img/1700.png"), "img/1700.png");
        assert_eq!(parse_key("img/1700.png"), "img/1700.png");
    }
}
