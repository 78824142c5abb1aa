//! API endpoints.

mod campaigns;
mod health;
mod webhooks;

use axum::Router;

use crate::middleware::AppState;

/// Create the router: provider webhooks plus the `/api` control surface.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/webhooks", webhooks::router())
        .nest(
            "/api",
            Router::new()
                .merge(health::router())
                .nest("/campaigns", campaigns::router()),
        )
}
