//! HTTP surface: signed trigger endpoint, live event stream and
//! notification inbox

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error};

use crate::error::{CrosspostError, TriggerError};
use crate::notify::LiveEvent;
use crate::service::CrosspostService;
use crate::trigger::SIGNATURE_HEADER;

const KEEP_ALIVE_SECS: u64 = 30;

#[derive(Clone)]
pub struct ApiState {
    pub service: CrosspostService,
}

impl ApiState {
    pub fn new(service: CrosspostService) -> Self {
        Self { service }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/triggers", post(handle_trigger))
        .route("/api/events/{user_id}", get(event_stream))
        .route("/api/notifications/{user_id}", get(list_notifications))
        .route(
            "/api/notifications/{user_id}/{notification_id}/read",
            post(mark_read),
        )
        .with_state(state)
}

/// Error body returned by every endpoint
struct ApiError(CrosspostError);

impl From<CrosspostError> for ApiError {
    fn from(err: CrosspostError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CrosspostError::Trigger(TriggerError::SignatureInvalid) => StatusCode::UNAUTHORIZED,
            CrosspostError::Trigger(TriggerError::MalformedPayload(_))
            | CrosspostError::InvalidInput(_)
            | CrosspostError::Validation(_) => StatusCode::BAD_REQUEST,
            CrosspostError::QuotaExceeded(_) => StatusCode::FORBIDDEN,
            CrosspostError::NotFound(_) => StatusCode::NOT_FOUND,
            CrosspostError::InvalidState(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
        }
        // signature failures reveal nothing about the payload
        let message = match status {
            StatusCode::UNAUTHORIZED => "invalid signature".to_string(),
            _ => self.0.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// POST /api/triggers
///
/// The signature covers the raw body, so it is read as bytes and only
/// parsed after verification.
async fn handle_trigger(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let report = state.service.triggers().handle(&body, signature).await?;
    Ok(Json(report).into_response())
}

/// GET /api/events/{user_id}
async fn event_stream(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (guard, rx) = state.service.connections().register(&user_id);
    debug!(user_id = %user_id, "Live stream opened");

    let connected = stream::once(async move {
        Ok::<_, Infallible>(
            Event::default()
                .event(LiveEvent::Connected.event_name())
                .data(json!({ "userId": user_id }).to_string()),
        )
    });

    // the guard moves into the stream and deregisters when the client goes away
    let updates = BroadcastStream::new(rx).filter_map(move |result| {
        let _connection = &guard;
        let event = match result {
            Ok(event) => Event::default()
                .event(event.event_name())
                .json_data(&event)
                .ok(),
            Err(e) => {
                debug!(error = %e, "Live stream lagged");
                None
            }
        };
        async move { event.map(Ok) }
    });

    Sse::new(connected.chain(updates)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(KEEP_ALIVE_SECS))
            .text("ping"),
    )
}

#[derive(Debug, Default, Deserialize)]
struct InboxQuery {
    #[serde(default)]
    unread: bool,
}

/// GET /api/notifications/{user_id}?unread=true
async fn list_notifications(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Query(query): Query<InboxQuery>,
) -> Result<Response, ApiError> {
    let notifications = state
        .service
        .notifications()
        .list(&user_id, query.unread)
        .await?;
    Ok(Json(notifications).into_response())
}

/// POST /api/notifications/{user_id}/{notification_id}/read
async fn mark_read(
    State(state): State<ApiState>,
    Path((user_id, notification_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    if state
        .service
        .notifications()
        .mark_read(&user_id, &notification_id)
        .await?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(CrosspostError::NotFound(format!("notification {}", notification_id)).into())
    }
}
