use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum_server::Handle;
use clap::Parser;
use clap_serde_derive::ClapSerde;
use tokio::net::TcpListener;
use tracing::{error, info};

use vocab_tutor::config::Config;
use vocab_tutor::exit_err;
use vocab_tutor::inference::model_config::GenerationConfig;
use vocab_tutor::inference::models::flan_t5::FlanT5Model;
use vocab_tutor::inference::models::model::ModelBase;
use vocab_tutor::language::LanguageGate;
use vocab_tutor::server::{router, AppState};
use vocab_tutor::telemetry::{init_telemetry, shutdown_telemetry};
use vocab_tutor::tls::load_rustls_config;

#[cfg(unix)]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const DEFAULT_CONFIG_FILE: &str = "VocabTutor.toml";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env, default_value = DEFAULT_CONFIG_FILE)]
    config_file: String,

    /// Configuration options
    #[command(flatten)]
    pub opt_config: <Config as ClapSerde>::Opt,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = Args::parse();
    let config = match Config::from_toml(&args.config_file) {
        Ok(file_config) => Config::from(file_config).merge(&mut args.opt_config),
        Err(_)
            if args.config_file == DEFAULT_CONFIG_FILE
                && !Path::new(DEFAULT_CONFIG_FILE).exists() =>
        {
            Config::from(&mut args.opt_config)
        }
        Err(err) => {
            // Telemetry settings live in that file, so there is no logger yet
            eprintln!("{err:#}");
            std::process::exit(1);
        }
    };

    if let Err(err) = init_telemetry(config.otlp_endpoint.as_deref(), config.console) {
        eprintln!("Failed to initialize telemetry: {err:#}");
        std::process::exit(1);
    }

    let base = ModelBase {
        name: "FLAN-T5 vocabulary tutor".into(),
        license: "Apache-2.0".into(),
        source: config.model_source(),
    };
    info!("Loading {} from {}", base.name, base.source);
    let cpu = config.cpu;
    let model = match tokio::task::spawn_blocking(move || {
        FlanT5Model::new(base, cpu, GenerationConfig::default())
    })
    .await
    {
        Ok(Ok(model)) => model,
        Ok(Err(err)) => exit_err!(1, "Failed to load model snapshot: {:#}", err),
        Err(err) => exit_err!(1, "Model loading crashed: {}", err),
    };
    info!("Serving {} ({})", model.base().name, model.base().license);
    info!(
        "Supported features: avx: {}, neon: {}, simd128: {}, f16c: {}",
        candle_core::utils::with_avx(),
        candle_core::utils::with_neon(),
        candle_core::utils::with_simd128(),
        candle_core::utils::with_f16c()
    );

    let language_gate = config.language_gate.then(|| {
        info!(
            "Language gate enabled, minimum confidence {}",
            config.language_min_confidence
        );
        Arc::new(LanguageGate::whatlang(config.language_min_confidence))
    });
    let app = router(AppState {
        handler: Arc::new(model),
        language_gate,
    });

    let addr = SocketAddr::new(config.address.parse()?, config.port);
    match config.tls_paths() {
        Some((cert, key)) => {
            let tls = load_rustls_config(cert, key).await?;
            let handle = Handle::new();
            tokio::spawn(shutdown_tls(handle.clone()));
            info!("Listening on https://{}", addr);
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = TcpListener::bind(addr).await?;
            info!("Listening on http://{}", listener.local_addr()?);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    shutdown_telemetry();
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down..."),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}

async fn shutdown_tls(handle: Handle) {
    shutdown_signal().await;
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
