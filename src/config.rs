use std::path::PathBuf;

use anyhow::{Context, Result};
use clap_serde_derive::ClapSerde;
use serde::Deserialize;

use crate::inference::models::model::ModelSource;

#[derive(ClapSerde, Deserialize, Debug, Clone)]
pub struct Config {
    /// The address the listener binds to
    #[default("0.0.0.0".to_string())]
    #[arg(short, long, env)]
    pub address: String,

    /// The port the listener binds to
    #[default(5000)]
    #[arg(short, long, env)]
    pub port: u16,

    /// Directory holding tokenizer.json, config.json and model.safetensors
    #[default(PathBuf::from("flan-t5-base-vocab"))]
    #[arg(short, long, env)]
    pub model_path: PathBuf,

    /// Hugging Face repository to fetch the model from instead of model_path
    #[default(None)]
    #[arg(long, env)]
    pub model_repo: Option<String>,

    /// Revision of the Hugging Face repository
    #[default("main".to_string())]
    #[arg(long, env)]
    pub model_revision: String,

    /// Run the model on the CPU even if an accelerator is available
    #[default(false)]
    #[arg(long, env)]
    pub cpu: bool,

    /// Answer non-English prompts with a redirect message instead of running the model
    #[default(false)]
    #[arg(long, env)]
    pub language_gate: bool,

    /// Minimum detector confidence for a prompt to count as English
    #[default(0.0)]
    #[arg(long, env)]
    pub language_min_confidence: f64,

    /// OTLP collector endpoint, enables trace and metric export
    #[default(None)]
    #[arg(long, env)]
    pub otlp_endpoint: Option<String>,

    /// Keep logging to the console while exporting to OTLP
    #[default(false)]
    #[arg(long, env)]
    pub console: bool,

    /// PEM certificate, HTTPS is served when both TLS paths are set
    #[default(None)]
    #[arg(long, env)]
    pub tls_cert_path: Option<PathBuf>,

    /// PEM private key matching tls_cert_path
    #[default(None)]
    #[arg(long, env)]
    pub tls_key_path: Option<PathBuf>,
}

impl Config {
    pub fn from_toml(path: &str) -> Result<<Config as ClapSerde>::Opt> {
        let str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {path}"))?;
        let config = toml::from_str(&str)
            .with_context(|| format!("Failed to parse configuration file {path}"))?;
        Ok(config)
    }

    pub fn model_source(&self) -> ModelSource {
        match &self.model_repo {
            Some(repo_id) => ModelSource::Hub {
                repo_id: repo_id.clone(),
                revision: self.model_revision.clone(),
            },
            None => ModelSource::Local(self.model_path.clone()),
        }
    }

    pub fn tls_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }
}
