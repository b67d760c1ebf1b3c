//! Asset upload and download.
//!
//! The same handlers serve dispatch, lattice and node assets; the route
//! only decides which [`AssetLocator`] is addressed.

use std::str::FromStr;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use electra_asset::{Asset, AssetError, ByteStream};
use electra_dispatcher::{AssetRead, Representation};
use electra_graph::{NodeAssetKey, NodeId};
use electra_manifest::{AssetLocator, DispatchAssetKey, LatticeAssetKey};
use futures::StreamExt;
use serde::Deserialize;

use crate::headers::{parse_digest, parse_range};
use crate::{ApiError, ApiResult, AppState};

pub fn routes() -> Router<AppState> {
  Router::new()
    .route(
      "/dispatch/:dispatch_id/assets/:key",
      get(get_dispatch_asset)
        .put(put_dispatch_asset)
        .post(put_dispatch_asset),
    )
    .route(
      "/dispatch/:dispatch_id/lattice/assets/:key",
      get(get_lattice_asset)
        .put(put_lattice_asset)
        .post(put_lattice_asset),
    )
    .route(
      "/dispatch/:dispatch_id/electrons/:node_id/assets/:key",
      get(get_node_asset).put(put_node_asset).post(put_node_asset),
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct AssetQuery {
  /// `string` or `object`: read one section of an archive-encoded asset.
  pub representation: Option<String>,
}

fn parse_key<K: FromStr<Err = String>>(key: &str) -> ApiResult<K> {
  key.parse().map_err(ApiError::BadRequest)
}

fn dispatch_locator(key: &str) -> ApiResult<AssetLocator> {
  Ok(AssetLocator::Dispatch(parse_key::<DispatchAssetKey>(key)?))
}

fn lattice_locator(key: &str) -> ApiResult<AssetLocator> {
  Ok(AssetLocator::Lattice(parse_key::<LatticeAssetKey>(key)?))
}

fn node_locator(node_id: usize, key: &str) -> ApiResult<AssetLocator> {
  Ok(AssetLocator::Node(NodeId(node_id), parse_key::<NodeAssetKey>(key)?))
}

async fn get_dispatch_asset(
  State(state): State<AppState>,
  Path((dispatch_id, key)): Path<(String, String)>,
  Query(query): Query<AssetQuery>,
  headers: HeaderMap,
) -> ApiResult<Response> {
  download(&state, &dispatch_id, dispatch_locator(&key)?, &query, &headers).await
}

async fn get_lattice_asset(
  State(state): State<AppState>,
  Path((dispatch_id, key)): Path<(String, String)>,
  Query(query): Query<AssetQuery>,
  headers: HeaderMap,
) -> ApiResult<Response> {
  download(&state, &dispatch_id, lattice_locator(&key)?, &query, &headers).await
}

async fn get_node_asset(
  State(state): State<AppState>,
  Path((dispatch_id, node_id, key)): Path<(String, usize, String)>,
  Query(query): Query<AssetQuery>,
  headers: HeaderMap,
) -> ApiResult<Response> {
  download(&state, &dispatch_id, node_locator(node_id, &key)?, &query, &headers).await
}

async fn put_dispatch_asset(
  State(state): State<AppState>,
  Path((dispatch_id, key)): Path<(String, String)>,
  headers: HeaderMap,
  body: Body,
) -> ApiResult<Json<Asset>> {
  upload(&state, &dispatch_id, dispatch_locator(&key)?, &headers, body).await
}

async fn put_lattice_asset(
  State(state): State<AppState>,
  Path((dispatch_id, key)): Path<(String, String)>,
  headers: HeaderMap,
  body: Body,
) -> ApiResult<Json<Asset>> {
  upload(&state, &dispatch_id, lattice_locator(&key)?, &headers, body).await
}

async fn put_node_asset(
  State(state): State<AppState>,
  Path((dispatch_id, node_id, key)): Path<(String, usize, String)>,
  headers: HeaderMap,
  body: Body,
) -> ApiResult<Json<Asset>> {
  upload(&state, &dispatch_id, node_locator(node_id, &key)?, &headers, body).await
}

/// Serve an asset. A `representation` query parameter takes precedence over
/// a `Range` header.
async fn download(
  state: &AppState,
  dispatch_id: &str,
  locator: AssetLocator,
  query: &AssetQuery,
  headers: &HeaderMap,
) -> ApiResult<Response> {
  let read = match query.representation.as_deref() {
    Some(representation) => {
      let representation = match representation {
        "string" => Representation::String,
        "object" => Representation::Object,
        other => {
          return Err(ApiError::BadRequest(format!(
            "unknown representation: {other}"
          )));
        }
      };
      state
        .dispatcher
        .read_representation(dispatch_id, locator, representation)
        .await?
    }
    None => {
      let range = parse_range(headers)?;
      state
        .dispatcher
        .read_asset(dispatch_id, locator, range)
        .await?
    }
  };
  Ok(stream_response(read))
}

fn stream_response(read: AssetRead) -> Response {
  let status = if read.is_partial() {
    StatusCode::PARTIAL_CONTENT
  } else {
    StatusCode::OK
  };
  let content_range = (read.is_partial() && !read.is_empty()).then(|| {
    format!(
      "bytes {}-{}/{}",
      read.range.start,
      read.range.end - 1,
      read.total_size
    )
  });
  let length = read.len();

  let mut response = (status, Body::from_stream(read.stream)).into_response();
  let response_headers = response.headers_mut();
  response_headers.insert(
    header::CONTENT_TYPE,
    HeaderValue::from_static("application/octet-stream"),
  );
  response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
  response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
  if let Some(value) = content_range.and_then(|value| HeaderValue::from_str(&value).ok()) {
    response_headers.insert(header::CONTENT_RANGE, value);
  }
  response
}

async fn upload(
  state: &AppState,
  dispatch_id: &str,
  locator: AssetLocator,
  headers: &HeaderMap,
  body: Body,
) -> ApiResult<Json<Asset>> {
  let digest = parse_digest(headers)?;
  let stream: ByteStream = Box::pin(
    body
      .into_data_stream()
      .map(|chunk| chunk.map_err(|err| AssetError::Io(std::io::Error::other(err)))),
  );
  let asset = state
    .dispatcher
    .write_asset(dispatch_id, locator, stream, digest)
    .await?;
  Ok(Json(asset))
}
