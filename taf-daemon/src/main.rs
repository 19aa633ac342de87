//! Entry point for the `taf-daemon` stdio server.

use std::path::Path;
use std::sync::Arc;

use taf_core::TemplateRegistry;
use taf_daemon::{logging, stdio};
use taf_engine::{ChannelTransport, EngineConfig, EngineHandle};
use tokio::io::BufReader;
use tracing::info;

#[tokio::main]
async fn main() {
    let loaded = match std::env::var_os("TAF_CONFIG") {
        Some(path) => EngineConfig::load_json(Path::new(&path)),
        None => Ok(EngineConfig::default()),
    };
    let config = match loaded {
        Ok(config) => {
            logging::init(&config.logging);
            config
        }
        Err(e) => {
            logging::init(&EngineConfig::default().logging);
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let mut registry = TemplateRegistry::new();
    taf_models::register_builtin(&mut registry);
    let (transport, outbound) = ChannelTransport::new(config.chan_buf_size);
    let identifier = config.identifier.clone();
    let engine = match EngineHandle::start(config, registry, Arc::new(transport)) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "failed to start engine");
            std::process::exit(1);
        }
    };
    info!(%identifier, "taf-daemon running");

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        stdio::write_outbound(outbound, &mut stdout).await
    });
    let reader = stdio::read_envelopes(BufReader::new(tokio::io::stdin()), engine.sender());

    let mut code = 0;
    tokio::select! {
        read = reader => match read {
            Ok(n) => info!(envelopes = n, "input closed"),
            Err(e) => {
                tracing::error!(error = %e, "reading input failed");
                code = 1;
            }
        },
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    engine.shutdown().await;
    match writer.await {
        Ok(Ok(n)) => info!(lines = n, "output drained"),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "writing output failed");
            code = 1;
        }
        Err(e) => {
            tracing::error!(error = %e, "output task failed");
            code = 1;
        }
    }
    // A blocking stdin read may still be pending.
    std::process::exit(code);
}
