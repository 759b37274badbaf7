//! Server configuration and startup.
//!
//! Every configuration error is raised here, before the listener starts
//! accepting connections. A [`Server`] can only be built from a complete
//! [`RouteTable`] and [`Dispatcher`], so "no router" is a compile-time
//! impossibility rather than a runtime check.

use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use super::http_server::{HttpServer, ServerHandle};
use super::service::AppService;
use crate::dispatcher::Dispatcher;
use crate::router::RouteTable;

/// Startup parameter failures. Fatal: they abort server construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("a port number is required")]
    MissingPort,
}

/// The parameters a server listens with.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub hostname: String,
}

impl ServerConfig {
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            hostname: "0.0.0.0".to_string(),
        }
    }

    #[must_use]
    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostname = hostname.to_string();
        self
    }

    /// Validate the startup parameters.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingPort`] when no port was given.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::MissingPort);
        }
        Ok(())
    }
}

type ListeningCallback = Box<dyn FnOnce(&ServerConfig) + Send>;

/// A fully configured server, ready to start listening.
pub struct Server {
    config: ServerConfig,
    service: AppService,
    on_listening: Option<ListeningCallback>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("on_listening", &self.on_listening.is_some())
            .finish()
    }
}

impl Server {
    /// Assemble a server from its configuration, route table and dispatcher.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] when the configuration is invalid; nothing is bound in
    /// that case.
    pub fn new(
        config: ServerConfig,
        table: RouteTable,
        dispatcher: Dispatcher,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            service: AppService::new(Arc::new(table), Arc::new(dispatcher)),
            on_listening: None,
        })
    }

    /// Register a callback invoked once the listener accepts connections.
    #[must_use]
    pub fn on_listening(mut self, callback: impl FnOnce(&ServerConfig) + Send + 'static) -> Self {
        self.on_listening = Some(Box::new(callback));
        self
    }

    /// Bind the listener and start serving.
    ///
    /// # Errors
    ///
    /// Propagates bind/listen failures from the runtime.
    pub fn start(self) -> io::Result<ServerHandle> {
        let addr = format!("{}:{}", self.config.hostname, self.config.port);
        let handle = HttpServer(self.service).start(addr.as_str())?;
        handle.wait_ready()?;
        info!(
            hostname = %self.config.hostname,
            port = self.config.port,
            "Server listening"
        );
        if let Some(callback) = self.on_listening {
            callback(&self.config);
        }
        Ok(handle)
    }
}
