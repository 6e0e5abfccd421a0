use axum::{
    extract::{ConnectInfo, State},
    http::{header::HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::client_ip::{client_ip, user_agent};
use super::render::render_index;
use crate::masking::mask_ip;
use crate::models::NewVisit;
use crate::storage::{Storage, StorageError};

/// Number of visits shown on the page
pub const RECENT_VISITS_LIMIT: i64 = 100;

pub struct VisitState {
    pub storage: Arc<dyn Storage>,
}

/// Record the current visit and render the visit log
pub async fn index(
    State(state): State<Arc<VisitState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let visit = NewVisit {
        ip: mask_ip(&client_ip(&headers, addr.ip())),
        user_agent: user_agent(&headers),
        at: Utc::now(),
    };

    let log = match state.storage.log_visit(&visit, RECENT_VISITS_LIMIT).await {
        Ok(log) => log,
        Err(StorageError::PoolExhausted) => {
            warn!(ip = %visit.ip, "no database connection available, rejecting visit");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
        Err(err) => {
            error!(ip = %visit.ip, error = %err, "failed to record visit");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
    };

    debug!(
        ip = %visit.ip,
        shown = log.visits.len(),
        ipv4_count = log.ipv4_count,
        "recorded visit"
    );

    match render_index(&log) {
        Ok(page) => Html(page).into_response(),
        Err(err) => {
            error!(error = %err, "failed to render visit log");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}
