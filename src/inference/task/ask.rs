use anyhow::Error;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Debug)]
pub struct AskRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct AskResponse {
    pub response: String,
}

/// Answers a single vocabulary question.
///
/// Implementations are shared across request threads and must serialize
/// access to anything the model mutates while running.
pub trait AskHandler: Send + Sync {
    fn run_ask(&self, prompt: &str) -> Result<String, Error>;
}
