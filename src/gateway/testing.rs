//! In-process stand-in for the generation daemon

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

#[derive(Clone)]
pub enum FakeReply {
    Json(Value),
    Status(u16, &'static str),
}

#[derive(Clone)]
struct FakeState {
    reply: FakeReply,
    bodies: Arc<Mutex<Vec<Value>>>,
}

pub struct FakeDaemon {
    pub url: String,
    bodies: Arc<Mutex<Vec<Value>>>,
}

impl FakeDaemon {
    pub fn last_body(&self) -> Option<Value> {
        self.bodies.lock().unwrap().last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.bodies.lock().unwrap().len()
    }
}

async fn generate(State(state): State<FakeState>, Json(body): Json<Value>) -> Response {
    state.bodies.lock().unwrap().push(body);
    match state.reply {
        FakeReply::Json(value) => Json(value).into_response(),
        FakeReply::Status(code, text) => (StatusCode::from_u16(code).unwrap(), text).into_response(),
    }
}

pub async fn spawn_fake_daemon(reply: FakeReply) -> FakeDaemon {
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/api/generate", post(generate))
        .with_state(FakeState {
            reply,
            bodies: bodies.clone(),
        });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeDaemon {
        url: format!("http://{}", addr),
        bodies,
    }
}
