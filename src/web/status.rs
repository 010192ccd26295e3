//! Service description endpoint, doubling as the health check.

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use tracing::trace;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ServiceDescription {
    description: String,
    contact: String,
}

/// `GET /`
pub(super) async fn index(State(state): State<AppState>) -> Json<ServiceDescription> {
    trace!("service description requested");
    Json(ServiceDescription {
        description: state.service_info.description.clone(),
        contact: state.service_info.contact.clone(),
    })
}
