use axum::Router;
use axum::extract::OriginalUri;
use tower_http::trace::TraceLayer;

use crate::routes;
use crate::{ApiError, AppState};

/// Build the electra HTTP router.
pub fn router(state: AppState) -> Router {
  Router::new()
    .merge(routes::dispatch::routes())
    .merge(routes::assets::routes())
    .merge(routes::jobs::routes())
    .fallback(not_found)
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

async fn not_found(uri: OriginalUri) -> ApiError {
  ApiError::NotFound(format!("not found: {}", uri.0.path()))
}
