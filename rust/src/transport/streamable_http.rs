use std::convert::Infallible;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::http::{finish_router, json_error, jsonrpc_response, serve, HttpOptions, SESSION_HEADER};
use super::Gateway;
use crate::error::{error_response, SessionError};
use crate::protocol::{is_initialize_request, parse_error};
use crate::session::{SessionHandle, TransportKind};
use crate::support::signals::shutdown_signal;

const STREAM_BUFFER: usize = 64;
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// POST/GET/DELETE on a single MCP endpoint.
pub fn router(gateway: Gateway, path: &str) -> Router {
    Router::new()
        .route(
            path,
            post(handle_post).get(handle_stream).delete(handle_delete),
        )
        .with_state(gateway)
}

pub async fn run(gateway: Gateway, options: HttpOptions, path: String) -> Result<(), String> {
    tracing::info!("Serving MCP over streamable HTTP at {path}");
    let stop = CancellationToken::new();
    let sweeper = gateway.sessions.spawn_idle_sweeper(stop.clone());

    let app = finish_router(router(gateway.clone(), &path), "streamable-http", &options);
    let sessions = gateway.sessions.clone();
    let result = serve(app, &options, async move {
        shutdown_signal().await;
        // Open GET streams end when their sessions close.
        sessions.close_all("shutdown");
    })
    .await;

    stop.cancel();
    let _ = sweeper.await;
    result
}

fn session_id(headers: &HeaderMap, query: &SessionQuery) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| query.session_id.clone())
        .filter(|id| !id.trim().is_empty())
}

fn resolve_session(
    gateway: &Gateway,
    headers: &HeaderMap,
    query: &SessionQuery,
) -> Result<SessionHandle, SessionError> {
    let id = session_id(headers, query).ok_or(SessionError::Missing)?;
    let handle = gateway.sessions.touch(&id)?;
    if handle.kind != TransportKind::Correlated {
        return Err(SessionError::Unknown(id));
    }
    Ok(handle)
}

fn session_error(err: SessionError) -> Response {
    tracing::debug!("Rejecting request: {err}");
    jsonrpc_response(
        StatusCode::BAD_REQUEST,
        error_response(Value::Null, err.to_jsonrpc_error()),
    )
}

fn with_session_header(mut response: Response, id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_HEADER), value);
    }
    response
}

async fn handle_post(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> Response {
    let message = match serde_json::from_slice::<Value>(&body) {
        Ok(message) => message,
        Err(err) => {
            tracing::debug!("Unparseable POST body: {err}");
            return jsonrpc_response(StatusCode::BAD_REQUEST, parse_error());
        }
    };

    let session = if is_initialize_request(&message) {
        gateway.sessions.create(TransportKind::Correlated, None)
    } else {
        match resolve_session(&gateway, &headers, &query) {
            Ok(session) => session,
            Err(err) => return session_error(err),
        }
    };

    // Waiting for the turn is cancellable; once dispatched, the call runs to
    // completion even if the client goes away.
    let turn = session.call_lock.clone().lock_owned().await;
    let handler = gateway.handler.clone();
    let outbound = session.outbound.clone();
    let session_id = session.id.clone();
    let dispatched = tokio::spawn(async move {
        let _turn = turn;
        let response = handler.handle_value(message, outbound.as_ref()).await;
        if response.is_some() {
            tracing::debug!(session_id = %session_id, "Call finished");
        }
        response
    });

    let response = match dispatched.await {
        Ok(Some(body)) => Json(body).into_response(),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(err) => {
            tracing::error!("Dispatch task failed: {err}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    };
    with_session_header(response, &session.id)
}

async fn handle_stream(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
) -> Response {
    let accepts_events = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(|accept| accept.contains("text/event-stream"))
        .unwrap_or(false);
    if !accepts_events {
        return json_error(
            StatusCode::NOT_ACCEPTABLE,
            "Not Acceptable: client must accept text/event-stream",
        );
    }

    let session = match resolve_session(&gateway, &headers, &query) {
        Ok(session) => session,
        Err(err) => return session_error(err),
    };
    let (tx, rx) = mpsc::channel::<Value>(STREAM_BUFFER);
    if let Err(err) = gateway.sessions.attach_outbound(&session.id, tx) {
        return session_error(err);
    }
    tracing::info!(session_id = %session.id, "Push stream opened");

    let events = ReceiverStream::new(rx)
        .map(|message| Ok::<_, Infallible>(Event::default().event("message").data(message.to_string())))
        .take_until(session.closed.clone().cancelled_owned());
    let response = Sse::new(events)
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
        .into_response();
    with_session_header(response, &session.id)
}

async fn handle_delete(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
) -> Response {
    let session = match resolve_session(&gateway, &headers, &query) {
        Ok(session) => session,
        Err(err) => return session_error(err),
    };
    if gateway.sessions.close(&session.id, "client request") {
        StatusCode::NO_CONTENT.into_response()
    } else {
        session_error(SessionError::Unknown(session.id))
    }
}
