//! Connection entry point
//!
//! Serves HTTP/1.1 on each accepted socket. A `GET /room?pid=...&r=...`
//! request is validated and authorized before the WebSocket upgrade, and
//! rejections are answered with a plain status. `GET /ping` is a health
//! check.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::{AppError, ChatError, RequestError};
use crate::manager::Manager;

/// What the request asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `GET /room?pid=...&r=...`
    Room(RoomRequest),
    /// `GET /ping`
    Ping,
    NotFound,
    MethodNotAllowed,
}

/// Validated parameters of a room connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRequest {
    pub participant_id: String,
    pub conversation: Uuid,
}

impl RoomRequest {
    /// Parse `pid` and `r` from a query string
    pub fn from_query(query: &str) -> Result<Self, RequestError> {
        let mut participant_id = None;
        let mut room = None;
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match name.as_ref() {
                "pid" => participant_id = Some(value.into_owned()),
                "r" => room = Some(value.into_owned()),
                _ => {}
            }
        }

        let participant_id = participant_id
            .filter(|p| !p.is_empty())
            .ok_or(RequestError::MissingParticipant)?;
        let room = room
            .filter(|r| !r.is_empty())
            .ok_or(RequestError::MissingRoom)?;
        let conversation = Uuid::parse_str(&room).map_err(|_| RequestError::InvalidRoom)?;

        Ok(Self {
            participant_id,
            conversation,
        })
    }
}

/// Route a request by method and path
pub fn route(method: &Method, uri: &Uri) -> Result<Route, RequestError> {
    if method != Method::GET {
        return Ok(Route::MethodNotAllowed);
    }
    match uri.path() {
        "/room" => RoomRequest::from_query(uri.query().unwrap_or("")).map(Route::Room),
        "/ping" => Ok(Route::Ping),
        _ => Ok(Route::NotFound),
    }
}

/// Handle a new TCP connection
///
/// Returns once the HTTP connection is done. Upgraded WebSocket sessions
/// keep running on their own tasks.
pub async fn handle_connection(
    stream: TcpStream,
    manager: Manager,
    config: Arc<ServerConfig>,
) -> Result<(), AppError> {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req: Request<Incoming>| {
        handle_request(req, manager.clone(), config.clone())
    });

    http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades()
        .await?;
    Ok(())
}

async fn handle_request<B>(
    mut req: Request<B>,
    manager: Manager,
    config: Arc<ServerConfig>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Send + 'static,
{
    let request = match route(req.method(), req.uri()) {
        Ok(Route::Room(request)) => request,
        Ok(Route::Ping) => return Ok(text(StatusCode::OK, "pong")),
        Ok(Route::NotFound) => return Ok(text(StatusCode::NOT_FOUND, "Not Found")),
        Ok(Route::MethodNotAllowed) => {
            return Ok(text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"));
        }
        Err(e) => {
            debug!("Rejecting {}: {}", req.uri(), e);
            return Ok(text(StatusCode::BAD_REQUEST, e.to_string()));
        }
    };

    let room = match manager
        .get_or_create_room(request.conversation, &request.participant_id)
        .await
    {
        Ok(room) => room,
        Err(ChatError::Unauthorized) => return Ok(text(StatusCode::UNAUTHORIZED, "Unauthorized")),
        Err(e) => {
            error!("Room lookup failed for {}: {}", request.conversation, e);
            return Ok(text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    let Some(accept) = accept_key(req.headers()) else {
        return Ok(text(
            StatusCode::BAD_REQUEST,
            RequestError::NotWebSocket.to_string(),
        ));
    };

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);
    ws_config.max_frame_size = Some(config.max_message_size);

    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!("Upgrade for {} failed: {}", request.participant_id, e);
                return;
            }
        };
        let socket =
            WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, Some(ws_config))
                .await;

        info!(
            "Participant {} connected to {}",
            request.participant_id,
            room.key()
        );
        if let Err(e) = room.serve_connection(socket, &request.participant_id).await {
            warn!(
                "Connection for {} ended early: {}",
                request.participant_id, e
            );
        }
    });

    let mut response = Response::new(Full::default());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
    Ok(response)
}

/// `Sec-WebSocket-Accept` for a valid upgrade request
fn accept_key(headers: &HeaderMap) -> Option<HeaderValue> {
    let upgrade = headers.get(header::UPGRADE)?.to_str().ok()?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return None;
    }
    let key = headers.get(header::SEC_WEBSOCKET_KEY)?;
    HeaderValue::from_str(&derive_accept_key(key.as_bytes())).ok()
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
