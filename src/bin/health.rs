use std::env;
use std::error;
use std::process::ExitCode;

use reqwest::Url;

/// Container health check, e.g. `vocab_tutor_health http://localhost:5000/health`
fn main() -> Result<ExitCode, Box<dyn error::Error>> {
    let Some(url) = env::args().nth(1) else {
        eprintln!("Missing URL argument");
        return Ok(ExitCode::from(2));
    };
    let url = Url::parse(&url)?;

    let response = reqwest::blocking::get(url)?;
    if !response.status().is_success() {
        eprintln!("Health check failed with status {}", response.status());
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}
