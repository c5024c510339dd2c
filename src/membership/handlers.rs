//! HTTP status endpoint exposing the local membership view.

use super::service::MembershipService;
use super::types::{MemberView, PeerAddress};

use axum::routing::get;
use axum::{extract::Extension, Json, Router};
use serde::Serialize;
use std::sync::Arc;

pub const ENDPOINT_MEMBERS: &str = "/members";
pub const ENDPOINT_HEALTH: &str = "/health";

#[derive(Debug, Serialize)]
pub struct MembersResponse {
    pub local: PeerAddress,
    pub size: usize,
    pub members: Vec<MemberView>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub local: PeerAddress,
    pub running: bool,
}

pub fn router(service: Arc<MembershipService>) -> Router {
    Router::new()
        .route(ENDPOINT_MEMBERS, get(handle_get_members))
        .route(ENDPOINT_HEALTH, get(handle_health))
        .layer(Extension(service))
}

pub async fn handle_get_members(
    Extension(service): Extension<Arc<MembershipService>>,
) -> Json<MembersResponse> {
    let members = service.members();

    Json(MembersResponse {
        local: *service.local(),
        size: members.len(),
        members,
    })
}

pub async fn handle_health(
    Extension(service): Extension<Arc<MembershipService>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        local: *service.local(),
        running: !service.is_stopped(),
    })
}
