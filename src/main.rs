use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rxbridge_certificates::MachineCertificate;
use rxbridge_core::{CoreConfig, Engine, GatewayLink, LOG_TARGETS};
use rxbridge_transport::{Framing, Listener};

/// Main entry point for the rxbridge listener
///
/// Accepts MLLP-framed HL7 messages one connection at a time, forwards each message's
/// records to the downstream gateway and answers with an ACK or NAK.
///
/// # Environment Variables
/// - `RXBRIDGE_LISTEN_ADDR`: inbound address (default: "0.0.0.0:6661")
/// - `RXBRIDGE_LISTEN_TLS`: serve TLS using `RXBRIDGE_CERT_PEM`/`RXBRIDGE_KEY_PEM` or a
///   self-signed certificate
/// - `RXBRIDGE_GATEWAY_HOST` / `RXBRIDGE_GATEWAY_PORT`: downstream gateway
/// - `RXBRIDGE_CONFIG`: optional YAML file overriding any of the above
///
/// # Returns
/// * `Ok(())` - After a clean shutdown on Ctrl-C
/// * `Err(anyhow::Error)` - If configuration, certificates or binding fail
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(log_filter()?)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(CoreConfig::from_env()?);

    let tls = if config.listen_tls {
        let certificate = MachineCertificate::resolve(
            config.cert_pem.as_deref(),
            config.key_pem.as_deref(),
            &certificate_host(&config.listen_addr),
        )?;
        Some(certificate.server_config()?)
    } else {
        None
    };

    let link = GatewayLink::new(&config)?;
    let engine = Arc::new(Engine::new(config.clone(), Arc::new(link)));

    tracing::info!("++ Starting rxbridge on {}", config.listen_addr);
    tracing::info!("++ Forwarding to gateway at {}", config.gateway_addr());

    let listener = Listener::bind(&config.listen_addr, tls, Framing::Mllp).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received Ctrl-C");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                tracing::error!(error = %e, "could not install Ctrl-C handler");
                // Keep the sender alive so the listener is not stopped.
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    listener.serve_text(engine.text_callback(), shutdown_rx).await?;
    Ok(())
}

/// Host name for a self-signed listener certificate.
fn certificate_host(listen_addr: &str) -> String {
    let host = listen_addr
        .rsplit_once(':')
        .map_or(listen_addr, |(host, _)| host)
        .trim_matches(['[', ']']);
    match host {
        "" | "0.0.0.0" | "::" => "localhost".to_string(),
        other => other.to_string(),
    }
}

/// `RUST_LOG` plus `info` for every workspace crate.
fn log_filter() -> anyhow::Result<tracing_subscriber::EnvFilter> {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for target in LOG_TARGETS {
        filter = filter.add_directive(format!("{target}=info").parse()?);
    }
    Ok(filter)
}
