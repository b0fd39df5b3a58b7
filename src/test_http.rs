//! Throwaway HTTP servers for exercising the REST clients.

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// JSON bodies received by a route, in arrival order.
pub type Recorded = Arc<Mutex<Vec<Value>>>;

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// `POST path` answering `status` with `reply`, recording each request body.
pub fn post_json(router: Router, path: &str, status: u16, reply: Value, seen: &Recorded) -> Router {
    let seen = seen.clone();
    router.route(
        path,
        post(move |Json(body): Json<Value>| {
            let seen = seen.clone();
            let reply = reply.clone();
            async move {
                seen.lock().unwrap().push(body);
                (status_code(status), Json(reply))
            }
        }),
    )
}

/// `GET path` answering `status` with `reply`.
pub fn get_json(router: Router, path: &str, status: u16, reply: Value) -> Router {
    router.route(
        path,
        get(move || {
            let reply = reply.clone();
            async move { (status_code(status), Json(reply)) }
        }),
    )
}

pub fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap()
}
