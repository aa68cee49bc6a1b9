pub mod cleanup;
pub mod config;
pub mod error;
pub mod extractors;
pub mod inference;
pub mod language;
pub mod server;
pub mod telemetry;
pub mod tls;

pub use error::{HttpErrorResponse, VocabTutorError, VocabTutorResult};
