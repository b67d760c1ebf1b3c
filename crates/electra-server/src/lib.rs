//! Electra Server
//!
//! HTTP surface of the dispatcher:
//!
//! | Route | Purpose |
//! |---|---|
//! | `POST /dispatch/register` | register a manifest, answer with `remote_uri`s |
//! | `POST /dispatch/submit` | register a server-readable manifest and start it |
//! | `PUT /dispatch/{id}/start` | start a registered dispatch |
//! | `POST /dispatch/resubmit` | redispatch with optional new lattice and callables |
//! | `PUT /dispatch/{id}/cancel` | cancel a dispatch |
//! | `GET /dispatch/{id}/status` | dispatch and node statuses |
//! | `GET /dispatch/{id}/manifest` | current manifest |
//! | `DELETE /dispatch/{id}` | remove a finished dispatch |
//! | `PUT /dispatch/{id}/electrons/{node}/job` | executor status report |
//! | `GET/PUT/POST .../assets/{key}` | asset transfer with `Range` and `Digest` |
//! | `GET /executor/jobs/next` | pull the next queued job |

mod config;
mod error;
pub mod headers;
mod router;
pub mod routes;
mod state;

pub use config::{DEFAULT_BIND, ServerConfig};
pub use error::{ApiError, ApiResult, ErrorBody, ErrorDetail, ServerError};
pub use router::router;
pub use state::{AppState, DEFAULT_EXECUTOR};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Run the server until `shutdown` is cancelled.
pub async fn serve(config: ServerConfig, shutdown: CancellationToken) -> Result<(), ServerError> {
  let state = AppState::open(&config).await?;
  let listener = TcpListener::bind(config.bind).await?;
  info!(data_dir = %config.data_dir.display(), "server_opened");
  serve_on(listener, state, shutdown).await
}

/// Serve `state` on an already bound listener until `shutdown` is cancelled.
pub async fn serve_on(
  listener: TcpListener,
  state: AppState,
  shutdown: CancellationToken,
) -> Result<(), ServerError> {
  let dispatcher = state.dispatcher.clone();
  info!(addr = %listener.local_addr()?, "server_listening");

  axum::serve(listener, router(state))
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

  dispatcher.shutdown();
  info!("server_stopped");
  Ok(())
}
