use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt; // for `oneshot`
use vocab_tutor::inference::task::ask::AskHandler;
use vocab_tutor::language::{Detection, LanguageDetector, LanguageGate};
use vocab_tutor::server::{router, AppState};
use whatlang::Lang;

pub enum Behaviour {
    Answer(String),
    Fail,
    Panic,
}

/// Stands in for the model and counts how often it ran.
pub struct MockAskHandler {
    behaviour: Behaviour,
    pub calls: AtomicUsize,
    pub prompts: std::sync::Mutex<Vec<String>>,
}

impl MockAskHandler {
    pub fn answering(answer: &str) -> Arc<Self> {
        Self::with(Behaviour::Answer(answer.to_string()))
    }

    pub fn with(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
            prompts: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AskHandler for MockAskHandler {
    fn run_ask(&self, prompt: &str) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.behaviour {
            Behaviour::Answer(answer) => Ok(answer.clone()),
            // Only the first call fails, later requests must still be served
            Behaviour::Fail if call == 0 => Err(anyhow!("device lost")),
            Behaviour::Panic if call == 0 => panic!("kernel launch failed"),
            _ => Ok("Recovered.".to_string()),
        }
    }
}

/// Reports the same language for every text.
pub struct FixedDetector(pub Option<Lang>);

impl LanguageDetector for FixedDetector {
    fn detect(&self, _text: &str) -> Option<Detection> {
        self.0.map(|lang| Detection {
            lang,
            confidence: 1.0,
        })
    }
}

pub fn app(handler: Arc<MockAskHandler>, gate: Option<LanguageGate>) -> Router {
    router(AppState {
        handler,
        language_gate: gate.map(Arc::new),
    })
}

pub fn ask_request(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/ask")
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&body)
        .unwrap_or_else(|_| panic!("body is not JSON: {}", String::from_utf8_lossy(&body)));
    (status, json)
}
