//! Reconnecting gateway transport.

use crate::config::CoreConfig;
use crate::EngineResult;
use rxbridge_transport::tls::{self, ClientConfig};
use rxbridge_transport::{
    Connection, ConnectionOptions, Encoding, Response, Transport, TransportError, TransportResult,
};
use std::sync::{Arc, Mutex};

/// A [`Transport`] that connects on first use and drops the connection after any failure.
///
/// A failed round is never retried here; the next message simply opens a fresh connection.
pub struct GatewayLink {
    host: String,
    port: u16,
    tls: Option<Arc<ClientConfig>>,
    options: ConnectionOptions,
    current: Mutex<Option<Connection>>,
}

impl GatewayLink {
    pub fn new(config: &CoreConfig) -> EngineResult<Self> {
        let tls = if config.gateway_tls {
            Some(tls::client_config(config.gateway_ca_pem.as_deref())?)
        } else {
            None
        };
        let options = ConnectionOptions {
            encoding: if config.gateway_utf8 {
                Encoding::Utf8
            } else {
                Encoding::Ascii
            },
            read_timeout: config.ack_timeout,
            ..ConnectionOptions::default()
        };
        Ok(Self {
            host: config.gateway_host.clone(),
            port: config.gateway_port,
            tls,
            options,
            current: Mutex::new(None),
        })
    }

    fn connect(&self) -> TransportResult<Connection> {
        match &self.tls {
            Some(config) => {
                Connection::connect_tls(&self.host, self.port, config.clone(), self.options.clone())
            }
            None => Connection::connect(&format!("{}:{}", self.host, self.port), self.options.clone()),
        }
    }
}

impl Transport for GatewayLink {
    fn write(&self, payload: &str) -> TransportResult<Response> {
        let mut current = self.current.lock().map_err(|_| TransportError::Poisoned)?;
        if current.is_none() {
            *current = Some(self.connect()?);
        }
        let result = match current.as_ref() {
            Some(connection) => connection.write(payload),
            None => return Err(TransportError::Poisoned),
        };
        // An empty read means the peer closed its end.
        let broken = match &result {
            Ok(response) => response.bytes.is_empty(),
            Err(_) => true,
        };
        if broken {
            tracing::warn!(host = %self.host, port = self.port, "dropping gateway connection");
            *current = None;
        }
        result
    }
}
