//! HTTP client for the electra server.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use electra_asset::{Asset, local_path};
use electra_graph::NodeId;
use electra_manifest::wire::{
  DispatchIdResponse, DispatchStatusView, JobReport, ResubmitRequest, TaskJob,
};
use electra_manifest::{
  AssetLocator, Dispatch, LatticeManifest, ResultManifest, merge_response_manifest,
  strip_lattice_uris, strip_local_uris,
};
use electra_status::Status;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{ClientError, ClientResult};

/// Default interval between status polls in [`ElectraClient::wait_for_completion`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Client for one electra server.
#[derive(Debug, Clone)]
pub struct ElectraClient {
  client: Client,
  base_url: String,
  poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
  error: ErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
  code: String,
  message: String,
}

#[derive(Debug, Deserialize)]
struct JobReportResponse {
  applied: bool,
}

impl ElectraClient {
  pub fn new(base_url: &str) -> ClientResult<Self> {
    let client = Client::builder()
      .connect_timeout(Duration::from_secs(10))
      .build()?;
    Ok(Self {
      client,
      base_url: base_url.trim_end_matches('/').to_string(),
      poll_interval: DEFAULT_POLL_INTERVAL,
    })
  }

  pub fn with_poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval = interval;
    self
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  // ========== Registration ==========

  /// Serialize `dispatch` under `storage_path`, register it and upload every
  /// asset. Returns the local manifest with `remote_uri`s merged in.
  pub async fn register(
    &self,
    dispatch: &Dispatch,
    storage_path: &Path,
  ) -> ClientResult<ResultManifest> {
    let mut manifest = electra_manifest::serialize(dispatch, storage_path).await?;
    self.register_manifest(&mut manifest).await?;
    Ok(manifest)
  }

  /// Register an already serialized manifest whose assets have local
  /// `file://` URIs, then upload them. The manifest gains the server's
  /// dispatch id and `remote_uri`s.
  pub async fn register_manifest(&self, manifest: &mut ResultManifest) -> ClientResult<String> {
    let response: ResultManifest = self
      .send(
        self
          .client
          .post(self.url("/dispatch/register"))
          .json(&strip_local_uris(manifest)),
      )
      .await?;
    merge_response_manifest(manifest, &response)?;
    let dispatch_id = manifest.metadata.dispatch_id.clone();
    info!(dispatch_id = %dispatch_id, "dispatch_registered");

    self.upload_assets(manifest).await?;
    Ok(dispatch_id)
  }

  /// Upload every asset of `manifest` that has both a local file and a
  /// `remote_uri`.
  pub async fn upload_assets(&self, manifest: &ResultManifest) -> ClientResult<()> {
    for (locator, asset) in manifest.assets() {
      let Some(path) = asset.uri.as_deref().and_then(local_path) else {
        continue;
      };
      if asset.remote_uri.is_none() {
        continue;
      }
      self.upload_asset(locator, asset, &path).await?;
    }
    Ok(())
  }

  /// Stream the file at `path` to `asset.remote_uri`, announcing its digest.
  pub async fn upload_asset(
    &self,
    locator: AssetLocator,
    asset: &Asset,
    path: &Path,
  ) -> ClientResult<Asset> {
    let upload_error = |reason: String| ClientError::Upload {
      locator: locator.to_string(),
      reason,
    };
    let remote = asset
      .remote_uri
      .as_deref()
      .ok_or_else(|| upload_error("asset has no remote_uri".to_string()))?;

    let file = tokio::fs::File::open(path)
      .await
      .map_err(|err| upload_error(format!("{}: {err}", path.display())))?;
    let length = file.metadata().await?.len();

    let mut request = self
      .client
      .put(self.resolve(remote))
      .header(header::CONTENT_LENGTH, length)
      .body(reqwest::Body::wrap_stream(ReaderStream::new(file)));
    if let Some(digest) = &asset.digest {
      request = request.header("digest", format!("sha={digest}"));
    }

    let stored: Asset = self.send(request).await.map_err(|err| match err {
      ClientError::Api { message, .. } => upload_error(message),
      ClientError::Http(err) => upload_error(err.to_string()),
      other => other,
    })?;
    debug!(%locator, size = stored.size, "asset_uploaded");
    Ok(stored)
  }

  // ========== Lifecycle ==========

  /// Register `dispatch` and start it.
  pub async fn submit(&self, dispatch: &Dispatch, storage_path: &Path) -> ClientResult<String> {
    let manifest = self.register(dispatch, storage_path).await?;
    let dispatch_id = manifest.metadata.dispatch_id;
    self.start(&dispatch_id).await?;
    Ok(dispatch_id)
  }

  pub async fn start(&self, dispatch_id: &str) -> ClientResult<()> {
    let _: DispatchIdResponse = self
      .send(self.client.put(self.url(&format!("/dispatch/{dispatch_id}/start"))))
      .await?;
    Ok(())
  }

  pub async fn cancel(&self, dispatch_id: &str) -> ClientResult<()> {
    let _: DispatchIdResponse = self
      .send(self.client.put(self.url(&format!("/dispatch/{dispatch_id}/cancel"))))
      .await?;
    Ok(())
  }

  /// Remove a finished dispatch and its assets from the server.
  pub async fn purge(&self, dispatch_id: &str) -> ClientResult<()> {
    let response = self
      .client
      .delete(self.url(&format!("/dispatch/{dispatch_id}")))
      .send()
      .await?;
    check(response).await.map(|_| ())
  }

  /// Register a redispatch of `dispatch_id`. `electron_updates` maps task
  /// names to replacement callables. The new dispatch is not started.
  ///
  /// A replacement `lattice` is the lattice of a locally serialized manifest.
  /// It is sent without its local paths, and its files are then uploaded to
  /// every slot of the new dispatch that still expects their content.
  pub async fn redispatch(
    &self,
    dispatch_id: &str,
    lattice: Option<LatticeManifest>,
    electron_updates: &BTreeMap<String, Bytes>,
    reuse_previous_results: bool,
  ) -> ClientResult<String> {
    let request = ResubmitRequest {
      dispatch_id: dispatch_id.to_string(),
      json_lattice: lattice.as_ref().map(strip_lattice_uris),
      electron_updates: electron_updates
        .iter()
        .map(|(name, callable)| (name.clone(), ResubmitRequest::encode_update(callable)))
        .collect(),
      reuse_previous_results,
    };
    let response: DispatchIdResponse = self
      .send(self.client.post(self.url("/dispatch/resubmit")).json(&request))
      .await?;
    info!(parent_id = %dispatch_id, dispatch_id = %response.dispatch_id, "dispatch_resubmitted");

    if let Some(local) = &lattice {
      self.upload_lattice(&response.dispatch_id, local).await?;
    }
    Ok(response.dispatch_id)
  }

  /// Upload the local files of `local` into the registered dispatch.
  ///
  /// Slots whose registered digest differs from the local asset were filled
  /// by the server (replaced callables, reused results) and are skipped.
  async fn upload_lattice(&self, dispatch_id: &str, local: &LatticeManifest) -> ClientResult<()> {
    let registered = self.manifest(dispatch_id).await?;
    let mut uploaded = 0usize;
    for (locator, asset) in local.assets() {
      let Some(path) = asset.uri.as_deref().and_then(local_path) else {
        continue;
      };
      let Some(slot) = registered.asset(locator) else {
        continue;
      };
      if slot.digest != asset.digest || slot.remote_uri.is_none() {
        continue;
      }
      let target = Asset {
        remote_uri: slot.remote_uri.clone(),
        ..asset.clone()
      };
      self.upload_asset(locator, &target, &path).await?;
      uploaded += 1;
    }
    debug!(dispatch_id = %dispatch_id, uploaded, "lattice_uploaded");
    Ok(())
  }

  // ========== Queries ==========

  pub async fn status(&self, dispatch_id: &str) -> ClientResult<DispatchStatusView> {
    self
      .send(self.client.get(self.url(&format!("/dispatch/{dispatch_id}/status"))))
      .await
  }

  pub async fn manifest(&self, dispatch_id: &str) -> ClientResult<ResultManifest> {
    self
      .send(self.client.get(self.url(&format!("/dispatch/{dispatch_id}/manifest"))))
      .await
  }

  /// Poll the dispatch status until it is terminal.
  ///
  /// Returns [`ClientError::Timeout`] once `timeout` elapses and
  /// [`ClientError::Cancelled`] as soon as `cancel` fires.
  pub async fn wait_for_completion(
    &self,
    dispatch_id: &str,
    timeout: Option<Duration>,
    cancel: CancellationToken,
  ) -> ClientResult<Status> {
    let poll = async {
      loop {
        let view = self.status(dispatch_id).await?;
        if view.status.is_terminal() {
          return Ok::<_, ClientError>(view.status);
        }
        tokio::time::sleep(self.poll_interval).await;
      }
    };
    let bounded = async {
      match timeout {
        Some(limit) => match tokio::time::timeout(limit, poll).await {
          Ok(result) => result,
          Err(_) => Err(ClientError::Timeout(dispatch_id.to_string())),
        },
        None => poll.await,
      }
    };

    tokio::select! {
      biased;
      _ = cancel.cancelled() => Err(ClientError::Cancelled(dispatch_id.to_string())),
      result = bounded => result,
    }
  }

  // ========== Assets ==========

  /// Read an asset, or the `[start, end)` slice of it, into memory.
  pub async fn fetch_asset(
    &self,
    dispatch_id: &str,
    locator: AssetLocator,
    range: Option<Range<u64>>,
  ) -> ClientResult<Bytes> {
    let mut request = self.client.get(self.url(&locator.route(dispatch_id)));
    if let Some(range) = range {
      if range.is_empty() {
        return Ok(Bytes::new());
      }
      request = request.header(
        header::RANGE,
        format!("bytes={}-{}", range.start, range.end - 1),
      );
    }
    let response = check(request.send().await?).await?;
    Ok(response.bytes().await?)
  }

  /// Stream an asset to `dest`. Returns the number of bytes written.
  pub async fn download_asset(
    &self,
    dispatch_id: &str,
    locator: AssetLocator,
    dest: &Path,
  ) -> ClientResult<u64> {
    let download_error = |reason: String| ClientError::Download {
      locator: locator.to_string(),
      reason,
    };
    let response = self
      .client
      .get(self.url(&locator.route(dispatch_id)))
      .send()
      .await?;
    let response = check(response).await?;

    if let Some(parent) = dest.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(dest).await?;
    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
      let chunk = chunk.map_err(|err| download_error(err.to_string()))?;
      file.write_all(&chunk).await?;
      written += chunk.len() as u64;
    }
    file.flush().await?;
    debug!(%locator, written, "asset_downloaded");
    Ok(written)
  }

  // ========== Executor ==========

  /// Pull the next queued job, waiting up to `wait` on the server.
  pub async fn next_job(&self, wait: Duration) -> ClientResult<Option<TaskJob>> {
    let response = self
      .client
      .get(self.url("/executor/jobs/next"))
      .query(&[("wait_ms", wait.as_millis() as u64)])
      .send()
      .await?;
    if response.status() == StatusCode::NO_CONTENT {
      return Ok(None);
    }
    Ok(Some(check(response).await?.json().await?))
  }

  /// Report a node status. Returns false when the report repeated the
  /// node's current status.
  pub async fn report_job(
    &self,
    dispatch_id: &str,
    node_id: NodeId,
    report: &JobReport,
  ) -> ClientResult<bool> {
    let response: JobReportResponse = self
      .send(
        self
          .client
          .put(self.url(&format!("/dispatch/{dispatch_id}/electrons/{node_id}/job")))
          .json(report),
      )
      .await?;
    Ok(response.applied)
  }

  // ========== Internal ==========

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.base_url, path)
  }

  /// `remote_uri`s are absolute when the server knows its public URL and
  /// bare routes otherwise.
  fn resolve(&self, uri: &str) -> String {
    if uri.starts_with("http://") || uri.starts_with("https://") {
      uri.to_string()
    } else {
      self.url(uri)
    }
  }

  async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<T> {
    let response = check(request.send().await?).await?;
    Ok(response.json().await?)
  }
}

/// Turn a non-success response into [`ClientError::Api`].
async fn check(response: Response) -> ClientResult<Response> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  let body = response.text().await.unwrap_or_default();
  let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
    Ok(envelope) => (envelope.error.code, envelope.error.message),
    Err(_) => (status.as_str().to_string(), body),
  };
  Err(ClientError::Api {
    status: status.as_u16(),
    code,
    message,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_resolve_relative_and_absolute_uris() {
    let client = ElectraClient::new("http://localhost:48008/").expect("client");
    assert_eq!(client.base_url(), "http://localhost:48008");
    assert_eq!(
      client.resolve("/dispatch/a/assets/inputs"),
      "http://localhost:48008/dispatch/a/assets/inputs"
    );
    assert_eq!(
      client.resolve("http://public.example/dispatch/a/assets/inputs"),
      "http://public.example/dispatch/a/assets/inputs"
    );
  }
}
