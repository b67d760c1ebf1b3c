//! `Range` and `Digest` request headers.

use std::ops::Range;

use axum::http::HeaderMap;
use axum::http::header::RANGE;

use crate::ApiError;

/// Digest header name.
pub const DIGEST: &str = "digest";

/// Parse a single `Range: bytes=start-end` header into a half-open range.
///
/// `end` is inclusive on the wire. `bytes=start-` reads to the end of the
/// object.
pub fn parse_range(headers: &HeaderMap) -> Result<Option<Range<u64>>, ApiError> {
  let Some(value) = headers.get(RANGE) else {
    return Ok(None);
  };
  let malformed = || ApiError::BadRequest("malformed Range header".to_string());

  let value = value.to_str().map_err(|_| malformed())?.trim();
  let spec = value.strip_prefix("bytes=").ok_or_else(malformed)?;
  if spec.contains(',') {
    return Err(ApiError::BadRequest(
      "multiple byte ranges are not supported".to_string(),
    ));
  }
  let (start, end) = spec.split_once('-').ok_or_else(malformed)?;
  let start: u64 = start.trim().parse().map_err(|_| malformed())?;
  let end = match end.trim() {
    "" => u64::MAX,
    end => {
      let end: u64 = end.parse().map_err(|_| malformed())?;
      if end < start {
        return Err(ApiError::BadRequest(format!(
          "invalid byte range {start}-{end}"
        )));
      }
      end.saturating_add(1)
    }
  };
  Ok(Some(start..end))
}

/// Parse `Digest: sha1=<hex>` into a lowercase hex digest.
pub fn parse_digest(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
  let Some(value) = headers.get(DIGEST) else {
    return Ok(None);
  };
  let malformed = || ApiError::BadRequest("malformed Digest header".to_string());

  let value = value.to_str().map_err(|_| malformed())?.trim();
  let (algorithm, digest) = value.split_once('=').ok_or_else(malformed)?;
  if !matches!(algorithm.to_ascii_lowercase().as_str(), "sha" | "sha1" | "sha-1") {
    return Err(ApiError::BadRequest(format!(
      "unsupported digest algorithm: {algorithm}"
    )));
  }
  let bytes = hex::decode(digest.trim()).map_err(|_| malformed())?;
  if bytes.len() != 20 {
    return Err(malformed());
  }
  Ok(Some(hex::encode(bytes)))
}

#[cfg(test)]
mod tests {
  use axum::http::HeaderValue;

  use super::*;

  fn headers(name: &'static str, value: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(name, HeaderValue::from_static(value));
    headers
  }

  #[test]
  fn test_range_is_inclusive_on_the_wire() {
    assert_eq!(parse_range(&headers("range", "bytes=0-9")).unwrap(), Some(0..10));
    assert_eq!(
      parse_range(&headers("range", "bytes=5-")).unwrap(),
      Some(5..u64::MAX)
    );
    assert_eq!(parse_range(&HeaderMap::new()).unwrap(), None);
  }

  #[test]
  fn test_bad_ranges_are_rejected() {
    for value in ["bytes=9-5", "items=0-1", "bytes=a-b", "bytes=0-1,4-5", "bytes=-5"] {
      assert!(
        matches!(parse_range(&headers("range", value)), Err(ApiError::BadRequest(_))),
        "{value} was accepted"
      );
    }
  }

  #[test]
  fn test_digest_header() {
    assert_eq!(
      parse_digest(&headers(
        "digest",
        "sha=AAF4C61DDCC5E8A2DABEDE0F3B482CD9AEA9434D"
      ))
      .unwrap()
      .as_deref(),
      Some("aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d")
    );
    assert!(parse_digest(&headers("digest", "md5=abcd")).is_err());
    assert!(parse_digest(&headers("digest", "sha1=xyz")).is_err());
    assert!(parse_digest(&headers("digest", "sha1=abcd")).is_err());
    assert_eq!(parse_digest(&HeaderMap::new()).unwrap(), None);
  }
}
