use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::http::{finish_router, jsonrpc_response, serve, unauthorized, HttpOptions};
use super::streamable_http::SessionQuery;
use super::Gateway;
use crate::auth::{BearerVerifier, Principal};
use crate::error::{error_response, SessionError};
use crate::protocol::{parse_error, Outbound};
use crate::session::{SessionHandle, SessionManager, TransportKind};
use crate::support::signals::shutdown_signal;

const CHANNEL_BUFFER: usize = 64;
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Clone)]
struct PushState {
    gateway: Gateway,
    verifier: Arc<BearerVerifier>,
    message_path: String,
}

pub fn router(
    gateway: Gateway,
    verifier: Arc<BearerVerifier>,
    sse_path: &str,
    message_path: &str,
) -> Router {
    let state = PushState {
        gateway,
        verifier,
        message_path: message_path.to_string(),
    };
    Router::new()
        .route(sse_path, get(handle_connect))
        .route(message_path, axum::routing::post(handle_message).delete(handle_close))
        .with_state(state)
}

pub async fn run(
    gateway: Gateway,
    verifier: Arc<BearerVerifier>,
    options: HttpOptions,
    sse_path: String,
    message_path: String,
) -> Result<(), String> {
    tracing::info!("Serving MCP over SSE at {sse_path} (messages at {message_path})");
    tracing::info!("  - key set: {}", verifier.jwks_url());
    let sessions = gateway.sessions.clone();
    let stop = CancellationToken::new();
    let sweeper = sessions.spawn_idle_sweeper(stop.clone());
    let app = finish_router(
        router(gateway, verifier, &sse_path, &message_path),
        "sse",
        &options,
    );
    let result = serve(app, &options, async move {
        shutdown_signal().await;
        sessions.close_all("shutdown");
    })
    .await;

    stop.cancel();
    let _ = sweeper.await;
    result
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
}

/// Closes the session when the event stream is dropped.
struct StreamGuard {
    sessions: SessionManager,
    id: String,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.sessions.close(&self.id, "stream closed");
    }
}

async fn handle_connect(State(state): State<PushState>, headers: HeaderMap) -> Response {
    let principal = match state.verifier.verify(authorization(&headers)).await {
        Ok(principal) => principal,
        Err(_) => return unauthorized(),
    };

    let sessions = &state.gateway.sessions;
    let session = sessions.create(TransportKind::Push, Some(principal));
    let (outbound, outbound_rx) = mpsc::channel::<Value>(CHANNEL_BUFFER);
    let (inbound, inbound_rx) = mpsc::channel::<Value>(CHANNEL_BUFFER);
    let attached = sessions
        .attach_outbound(&session.id, outbound.clone())
        .and_then(|_| sessions.attach_inbound(&session.id, inbound));
    if let Err(err) = attached {
        return session_error(err);
    }
    tokio::spawn(drain_inbox(
        state.gateway.clone(),
        session.clone(),
        inbound_rx,
        outbound,
    ));
    tracing::info!(
        session_id = %session.id,
        subject = session.principal.as_ref().map(|p| p.subject.as_str()).unwrap_or("-"),
        "Push stream connected"
    );

    let endpoint = format!("{}?sessionId={}", state.message_path, session.id);
    let guard = StreamGuard {
        sessions: sessions.clone(),
        id: session.id.clone(),
    };
    let messages = ReceiverStream::new(outbound_rx).map(move |message| {
        let _held = &guard;
        Ok::<_, Infallible>(Event::default().event("message").data(message.to_string()))
    });
    let events = stream::once(async move {
        Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint))
    })
    .chain(messages)
    .take_until(session.closed.clone().cancelled_owned());

    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
        .into_response()
}

/// Processes one session's messages strictly in arrival order. A call
/// already running finishes even if the session closes meanwhile.
async fn drain_inbox(
    gateway: Gateway,
    session: SessionHandle,
    mut inbox: mpsc::Receiver<Value>,
    outbound: Outbound,
) {
    let closed: CancellationToken = session.closed.clone();
    loop {
        let message = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            message = inbox.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        if let Some(response) = gateway.handler.handle_value(message, Some(&outbound)).await {
            gateway.sessions.notify(&session.id, response).await;
        }
    }
    tracing::debug!(session_id = %session.id, "Inbox worker stopped");
}

fn session_error(err: SessionError) -> Response {
    tracing::debug!("Rejecting push request: {err}");
    let status = match err {
        SessionError::PrincipalMismatch(_) => StatusCode::FORBIDDEN,
        SessionError::Missing | SessionError::Unknown(_) => StatusCode::BAD_REQUEST,
    };
    jsonrpc_response(status, error_response(Value::Null, err.to_jsonrpc_error()))
}

/// Verify the caller, then resolve a push session they own.
async fn authorized_session(
    state: &PushState,
    headers: &HeaderMap,
    query: &SessionQuery,
) -> Result<SessionHandle, Response> {
    let principal = state
        .verifier
        .verify(authorization(headers))
        .await
        .map_err(|_| unauthorized())?;
    let id = query
        .session_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| session_error(SessionError::Missing))?;
    let session = state
        .gateway
        .sessions
        .touch(&id)
        .map_err(session_error)?;
    if session.kind != TransportKind::Push {
        return Err(session_error(SessionError::Unknown(id)));
    }
    if !same_subject(session.principal.as_ref(), &principal) {
        return Err(session_error(SessionError::PrincipalMismatch(id)));
    }
    Ok(session)
}

fn same_subject(owner: Option<&Principal>, caller: &Principal) -> bool {
    owner
        .map(|owner| owner.subject == caller.subject && owner.issuer == caller.issuer)
        .unwrap_or(false)
}

async fn handle_message(
    State(state): State<PushState>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> Response {
    let session = match authorized_session(&state, &headers, &query).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let message = match serde_json::from_slice::<Value>(&body) {
        Ok(message) => message,
        Err(err) => {
            tracing::debug!("Unparseable message body: {err}");
            return jsonrpc_response(StatusCode::BAD_REQUEST, parse_error());
        }
    };
    let Some(inbox) = session.inbound else {
        return session_error(SessionError::Unknown(session.id));
    };
    match inbox.send(message).await {
        Ok(()) => (StatusCode::ACCEPTED, "Accepted").into_response(),
        Err(_) => session_error(SessionError::Unknown(session.id)),
    }
}

async fn handle_close(
    State(state): State<PushState>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
) -> Response {
    match authorized_session(&state, &headers, &query).await {
        Ok(session) => {
            state.gateway.sessions.close(&session.id, "client request");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(response) => response,
    }
}
