//! JSON Server
//!
//! Small HTTP server used both by test agents and by the record listener.
//! GET on any path is a liveness probe; any other method must carry a JSON
//! body, which is decoded (malformed JSON becomes `{}`) and handed to a
//! [`JsonHandler`].

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{Html, IntoResponse, Json},
    Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

use super::types::Response;

const MIME_JSON: &str = "application/json";

/// One decoded inbound request
#[derive(Debug, Clone)]
pub struct JsonRequest {
    pub uri: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub json: Value,
}

/// Answers decoded JSON requests.
#[async_trait]
pub trait JsonHandler: Send + Sync + 'static {
    async fn serve(&self, request: JsonRequest) -> Response;
}

/// Replies OK with the request echoed back as the message.
pub struct EchoHandler;

#[async_trait]
impl JsonHandler for EchoHandler {
    async fn serve(&self, request: JsonRequest) -> Response {
        Response::ok(None::<String>).with_body(json!({
            "result": "OK",
            "message": {
                "method": request.method.as_str(),
                "uri": request.uri,
                "body": request.json,
            }
        }))
    }
}

struct ServerState {
    handler: Arc<dyn JsonHandler>,
    port: u16,
}

/// Build the router for a handler. `port` only appears in the liveness page.
pub fn router(handler: Arc<dyn JsonHandler>, port: u16) -> Router {
    let state = Arc::new(ServerState { handler, port });
    Router::new()
        .fallback(dispatch)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn dispatch(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> axum::response::Response {
    if method == Method::GET {
        return Html(liveness_page(state.port)).into_response();
    }

    if method == Method::POST {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_lowercase);
        match content_type {
            None => return server_error("Content-Type header is missing"),
            Some(ct) if !ct.starts_with(MIME_JSON) => {
                return server_error(&format!("post data must be {}", MIME_JSON))
            }
            Some(_) => {}
        }
    }

    let json = serde_json::from_str::<Value>(&body)
        .ok()
        .filter(Value::is_object)
        .unwrap_or_else(|| json!({}));

    let request = JsonRequest {
        uri: uri.path().to_string(),
        method,
        headers,
        json,
    };
    let response = state.handler.serve(request).await;
    (StatusCode::OK, Json(response.to_json())).into_response()
}

fn server_error(message: &str) -> axum::response::Response {
    log::warn!("rejected request: {}", message);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "result": "ERROR", "message": message })),
    )
        .into_response()
}

fn liveness_page(port: u16) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<title>MonkeyTalk</title>\n</head>\n<body>\n<h1>OK</h1>\n<p>server running on port {}</p>\n<p>{} {}</p>\n</body>\n</html>",
        port,
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}

/// A running server bound to a local port
pub struct JsonServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl JsonServer {
    /// Bind on all interfaces. Port 0 picks a free port.
    pub async fn start(port: u16, handler: Arc<dyn JsonHandler>) -> Result<Self> {
        Self::bind(SocketAddr::from(([0, 0, 0, 0], port)), handler).await
    }

    pub async fn bind(addr: SocketAddr, handler: Arc<dyn JsonHandler>) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let app = router(handler, addr.port());

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await;
            if let Err(e) = served {
                log::error!("json server stopped: {}", e);
            }
        });

        log::info!("json server listening on {}", addr);
        Ok(Self {
            addr,
            shutdown: Some(tx),
            task: Some(task),
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Stop accepting connections and wait for the server task to end.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for JsonServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_get_is_liveness() {
        let app = router(Arc::new(EchoHandler), 4242);
        let resp = app
            .oneshot(Request::get("/anything").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("server running on port 4242"));
    }

    #[tokio::test]
    async fn test_post_json_is_dispatched() {
        let app = router(Arc::new(EchoHandler), 0);
        let req = Request::post("/fonemonkey")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"mtcommand":"PING"}"#))
            .unwrap();
        let json = body_json(app.oneshot(req).await.unwrap()).await;
        assert_eq!(json["result"], "OK");
        assert_eq!(json["message"]["method"], "POST");
        assert_eq!(json["message"]["uri"], "/fonemonkey");
        assert_eq!(json["message"]["body"]["mtcommand"], "PING");
    }

    #[tokio::test]
    async fn test_malformed_json_becomes_empty_object() {
        let app = router(Arc::new(EchoHandler), 0);
        let req = Request::post("/")
            .header("content-type", "application/json; charset=utf-8")
            .body(Body::from("{not json"))
            .unwrap();
        let json = body_json(app.oneshot(req).await.unwrap()).await;
        assert_eq!(json["message"]["body"], json!({}));
    }

    #[tokio::test]
    async fn test_post_requires_json_content_type() {
        let app = router(Arc::new(EchoHandler), 0);
        let missing = Request::post("/").body(Body::from("{}")).unwrap();
        let resp = app.clone().oneshot(missing).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let wrong = Request::post("/")
            .header("content-type", "text/plain")
            .body(Body::from("{}"))
            .unwrap();
        let resp = app.oneshot(wrong).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(resp).await["result"], "ERROR");
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut server = JsonServer::bind("127.0.0.1:0".parse().unwrap(), Arc::new(EchoHandler))
            .await
            .unwrap();
        assert!(server.port() > 0);
        assert!(server.is_running());
        server.stop().await;
        assert!(!server.is_running());
    }
}
