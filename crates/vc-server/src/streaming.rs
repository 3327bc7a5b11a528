//! Range parsing, content types and chunked file serving via `ReaderStream`.

use std::path::Path;
use std::time::SystemTime;

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use vc_core::{Error, Result};

use crate::assets::ServedAsset;

const CHUNK_SIZE: usize = 64 * 1024;

/// A single byte range from a `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=a-b`
    Bounded { start: u64, end: u64 },
    /// `bytes=a-`
    From(u64),
    /// `bytes=-n`: the last `n` bytes.
    Last(u64),
}

impl ByteRange {
    /// Clamp to a resource of `size` bytes, giving inclusive `(start, end)`,
    /// or `None` when the range cannot be satisfied.
    pub fn resolve(self, size: u64) -> Option<(u64, u64)> {
        if size == 0 {
            return None;
        }
        let last = size - 1;
        match self {
            ByteRange::Bounded { start, end } if start <= last => Some((start, end.min(last))),
            ByteRange::From(start) if start <= last => Some((start, last)),
            ByteRange::Last(n) if n > 0 => Some((size.saturating_sub(n), last)),
            _ => None,
        }
    }
}

/// Parse a `Range` header value.
///
/// Only single ranges in bytes are understood; anything else (including
/// multi-range requests) yields `None` and the caller serves the whole file.
pub fn parse_range_header(value: &str) -> Option<ByteRange> {
    let set = value.trim().strip_prefix("bytes=")?.trim();
    if set.contains(',') {
        return None;
    }
    let (start, end) = set.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    match (start.is_empty(), end.is_empty()) {
        (true, true) => None,
        (true, false) => Some(ByteRange::Last(end.parse().ok()?)),
        (false, true) => Some(ByteRange::From(start.parse().ok()?)),
        (false, false) => {
            let start: u64 = start.parse().ok()?;
            let end: u64 = end.parse().ok()?;
            (start <= end).then_some(ByteRange::Bounded { start, end })
        }
    }
}

/// Guess the MIME type from the file extension.
pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "m3u8" => "application/vnd.apple.mpegurl",
        "ts" => "video/mp2t",
        "m4s" => "video/iso.segment",
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "vtt" => "text/vtt",
        "html" | "htm" => "text/html; charset=utf-8",
        "js" => "text/javascript",
        "css" => "text/css",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// Format a timestamp as an HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Whether an `If-None-Match` header matches `etag`.
fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    let Some(value) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    value.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
    })
}

/// Serve `asset` honoring `If-None-Match` and, except for manifests, `Range`.
///
/// Reads are done in 64KB chunks so memory stays bounded regardless of file
/// size.
pub async fn serve_asset(asset: &ServedAsset, headers: &HeaderMap) -> Result<Response> {
    let manifest = asset.is_manifest();
    let builder = Response::builder()
        .header(header::ETAG, &asset.etag)
        .header(header::LAST_MODIFIED, http_date(asset.modified))
        .header(
            header::ACCEPT_RANGES,
            if manifest { "none" } else { "bytes" },
        );
    let builder = if manifest {
        builder.header(header::CACHE_CONTROL, "no-cache")
    } else {
        builder
    };

    if etag_matches(headers, &asset.etag) {
        return finish(builder.status(StatusCode::NOT_MODIFIED), Body::empty());
    }

    let range = if manifest {
        None
    } else {
        headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range_header)
    };

    let mut file = tokio::fs::File::open(&asset.path)
        .await
        .map_err(|_| Error::not_found("file", asset.path.display()))?;
    let size = asset.len;
    let builder = builder.header(header::CONTENT_TYPE, asset.content_type);

    let Some(range) = range else {
        let body = Body::from_stream(ReaderStream::with_capacity(file.take(size), CHUNK_SIZE));
        return finish(
            builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, size),
            body,
        );
    };

    let Some((start, end)) = range.resolve(size) else {
        tracing::debug!(path = %asset.path.display(), ?range, size, "range not satisfiable");
        return finish(
            builder
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{size}")),
            Body::empty(),
        );
    };

    let length = end - start + 1;
    file.seek(std::io::SeekFrom::Start(start)).await?;
    let body = Body::from_stream(ReaderStream::with_capacity(file.take(length), CHUNK_SIZE));

    finish(
        builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{size}"))
            .header(header::CONTENT_LENGTH, length),
        body,
    )
}

fn finish(builder: axum::http::response::Builder, body: Body) -> Result<Response> {
    builder
        .body(body)
        .map_err(|e| Error::Internal(format!("building response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_range_bounded() {
        assert_eq!(
            parse_range_header("bytes=100-199"),
            Some(ByteRange::Bounded {
                start: 100,
                end: 199
            })
        );
    }

    #[test]
    fn parse_range_open_end() {
        assert_eq!(parse_range_header("bytes=500-"), Some(ByteRange::From(500)));
    }

    #[test]
    fn parse_range_suffix() {
        assert_eq!(parse_range_header("bytes=-64"), Some(ByteRange::Last(64)));
    }

    #[test]
    fn parse_range_invalid() {
        assert!(parse_range_header("invalid").is_none());
        assert!(parse_range_header("bytes=abc-def").is_none());
        assert!(parse_range_header("bytes=-").is_none());
        assert!(parse_range_header("bytes=9-3").is_none());
        assert!(parse_range_header("bytes=0-1,5-9").is_none());
        assert!(parse_range_header("items=0-5").is_none());
    }

    #[test]
    fn resolve_clamps_to_size() {
        let size = 1000;
        assert_eq!(
            ByteRange::Bounded { start: 100, end: 199 }.resolve(size),
            Some((100, 199))
        );
        assert_eq!(
            ByteRange::Bounded { start: 900, end: 5000 }.resolve(size),
            Some((900, 999))
        );
        assert_eq!(ByteRange::From(10).resolve(size), Some((10, 999)));
        assert_eq!(ByteRange::Last(100).resolve(size), Some((900, 999)));
        assert_eq!(ByteRange::Last(5000).resolve(size), Some((0, 999)));
    }

    #[test]
    fn resolve_unsatisfiable() {
        assert_eq!(ByteRange::From(1000).resolve(1000), None);
        assert_eq!(ByteRange::Last(0).resolve(1000), None);
        assert_eq!(ByteRange::From(0).resolve(0), None);
    }

    #[test]
    fn content_types() {
        assert_eq!(
            guess_content_type(Path::new("index.m3u8")),
            "application/vnd.apple.mpegurl"
        );
        assert_eq!(guess_content_type(Path::new("segment_00000.ts")), "video/mp2t");
        assert_eq!(guess_content_type(Path::new("clip.MP4")), "video/mp4");
        assert_eq!(guess_content_type(Path::new("shot.jpg")), "image/jpeg");
        assert_eq!(
            guess_content_type(Path::new("player.html")),
            "text/html; charset=utf-8"
        );
        assert_eq!(
            guess_content_type(Path::new("noext")),
            "application/octet-stream"
        );
    }

    #[test]
    fn http_date_format() {
        let t = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(784_111_777);
        assert_eq!(http_date(t), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn if_none_match_variants() {
        let mut headers = HeaderMap::new();
        assert!(!etag_matches(&headers, "\"a\""));
        headers.insert(header::IF_NONE_MATCH, "\"b\", W/\"a\"".parse().unwrap());
        assert!(etag_matches(&headers, "\"a\""));
        headers.insert(header::IF_NONE_MATCH, "*".parse().unwrap());
        assert!(etag_matches(&headers, "\"z\""));
    }
}
