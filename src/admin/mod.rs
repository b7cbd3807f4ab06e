//! Admin API: breaker inspection and reset, hub statistics.
//!
//! Every route sits behind bearer-token auth and is only mounted when
//! `admin.enabled` is set.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/breakers/reset", post(reset_all))
        .route("/admin/breakers/{name}/reset", post(reset_one))
        .route("/admin/hub", get(get_hub))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
