//! Accepting connections and owning their stream managers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use uuid::Uuid;

use crate::config::{validate_server_config, ServerConfig};
use crate::error::{CepticError, Result};
use crate::lifecycle::shutdown::Shutdown;
use crate::net::handshake::server_handshake;
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::net::tls;
use crate::routing::{CommandSettings, EndpointHandler, EndpointManager};
use crate::server::dispatch::serve_stream;
use crate::stream::handler::StreamHandler;
use crate::stream::manager::{ConnectionOwner, Role, StreamManager};

struct ServerInner {
    config: ServerConfig,
    endpoints: EndpointManager,
    managers: DashMap<Uuid, Arc<StreamManager>>,
    acceptor: Option<TlsAcceptor>,
    shutdown: Shutdown,
    stopped: AtomicBool,
}

/// A ceptic server: route registry plus the managers for every live connection.
#[derive(Clone)]
pub struct CepticServer {
    inner: Arc<ServerInner>,
}

impl CepticServer {
    /// Create a server. The configuration is validated and TLS material is
    /// loaded here, so bad settings fail before anything is bound.
    pub fn new(config: ServerConfig) -> Result<Self> {
        validate_server_config(&config)?;
        let acceptor = tls::server_acceptor(&config.security)?;
        let endpoints = EndpointManager::new(config.body_max);
        Ok(Self {
            inner: Arc::new(ServerInner {
                config,
                endpoints,
                managers: DashMap::new(),
                acceptor,
                shutdown: Shutdown::new(),
                stopped: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn endpoints(&self) -> &EndpointManager {
        &self.inner.endpoints
    }

    pub fn add_command(&self, command: &str, settings: Option<CommandSettings>) {
        self.inner.endpoints.add_command(command, settings);
    }

    /// Register a route; the command must already exist.
    pub fn add_route(&self, command: &str, template: &str, handler: EndpointHandler) -> Result<()> {
        self.inner.endpoints.add_endpoint(command, template, handler, None)
    }

    pub fn add_route_with_settings(
        &self,
        command: &str,
        template: &str,
        handler: EndpointHandler,
        settings: CommandSettings,
    ) -> Result<()> {
        self.inner
            .endpoints
            .add_endpoint(command, template, handler, Some(settings))
    }

    pub fn manager_count(&self) -> usize {
        self.inner.managers.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Bind the configured address and serve in the background.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 was requested.
    pub async fn start(&self) -> Result<SocketAddr> {
        let listener = Listener::bind(&self.inner.config).await.map_err(|e| match e {
            ListenerError::Bind(io) | ListenerError::Accept(io) => CepticError::Io(io),
            ListenerError::Closed => CepticError::Config("listener closed".to_string()),
        })?;
        let addr = listener.local_addr()?;
        let server = self.clone();
        tokio::spawn(async move {
            if let Err(e) = server.run(listener).await {
                tracing::error!(error = %e, "Server stopped with error");
            }
        });
        Ok(addr)
    }

    /// Accept connections until [`CepticServer::stop`] is called.
    pub async fn run(&self, listener: Listener) -> Result<()> {
        if self.is_stopped() {
            return Ok(());
        }
        tracing::info!(
            address = %listener.local_addr()?,
            secure = self.inner.acceptor.is_some(),
            "Ceptic server started"
        );

        loop {
            tokio::select! {
                _ = self.inner.shutdown.wait() => break,
                accepted = listener.accept() => match accepted {
                    Ok((tcp, peer, permit)) => {
                        let inner = self.inner.clone();
                        tokio::spawn(async move {
                            inner.serve_connection(tcp, peer, permit).await;
                        });
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                    }
                },
            }
        }

        tracing::info!("Ceptic server stopped accepting");
        Ok(())
    }

    /// Stop accepting and tear down every connection.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.trigger();
        // Managers call back into remove_manager while stopping, so the map
        // must not be borrowed across stop().
        let managers: Vec<Arc<StreamManager>> = self
            .inner
            .managers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for manager in managers {
            manager.stop("server stopped");
        }
        self.inner.managers.clear();
    }

    /// Stop and forget one manager.
    pub fn remove_manager(&self, manager_id: Uuid) {
        if let Some((_, manager)) = self.inner.managers.remove(&manager_id) {
            manager.stop("removed by server");
        }
    }
}

impl ServerInner {
    async fn serve_connection(self: Arc<Self>, tcp: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        let _ = tcp.set_nodelay(true);
        let limit = Duration::from_secs(self.config.handshake_timeout_secs);
        let established = tokio::time::timeout(limit, async {
            let mut socket = tls::accept(self.acceptor.as_ref(), tcp).await?;
            let settings = server_handshake(&mut socket, &self.config).await?;
            Ok::<_, CepticError>((socket, settings))
        })
        .await;

        let (socket, settings) = match established {
            Ok(Ok(established)) => established,
            Ok(Err(e)) => {
                tracing::debug!(peer = %peer, error = %e, "Connection setup failed");
                return;
            }
            Err(_) => {
                tracing::debug!(peer = %peer, "Connection setup timed out");
                return;
            }
        };

        let owner = Arc::downgrade(&self);
        let owner: Weak<dyn ConnectionOwner> = owner;
        let manager = StreamManager::new(peer.to_string(), Role::Server, settings, Some(owner));
        self.managers.insert(manager.manager_id(), manager.clone());
        if self.stopped.load(Ordering::Acquire) {
            manager.stop("server stopped");
            return;
        }

        if let Err(e) = manager.start(socket) {
            tracing::warn!(peer = %peer, error = %e, "Stream manager failed to start");
            manager.stop("start failed");
            return;
        }
        tracing::debug!(peer = %peer, manager_id = %manager.manager_id(), "Connection established");

        manager.stopped().await;
        drop(permit);
    }
}

impl ConnectionOwner for ServerInner {
    fn handle_new_connection(self: Arc<Self>, handler: Arc<StreamHandler>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            serve_stream(handler, &self.endpoints, &self.config).await;
        })
    }

    fn remove_manager(&self, manager_id: Uuid) {
        if self.managers.remove(&manager_id).is_some() {
            tracing::debug!(manager_id = %manager_id, "Manager removed");
        }
    }
}
