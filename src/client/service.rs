//! Sending requests over pooled or dedicated connections.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use uuid::Uuid;

use crate::config::{validate_client_config, ClientConfig};
use crate::error::{CepticError, Result};
use crate::message::{Request, Response};
use crate::net::handshake::client_handshake;
use crate::net::tls;
use crate::stream::handler::StreamHandler;
use crate::stream::manager::{ConnectionOwner, Role, StreamManager};

struct ClientInner {
    config: ClientConfig,
    connector: Option<TlsConnector>,
    managers: DashMap<Uuid, Arc<StreamManager>>,
    /// Pooled managers per `host:port`.
    destinations: DashMap<String, Vec<Uuid>>,
}

/// A ceptic client.
///
/// [`CepticClient::connect`] reuses a live connection to the same destination
/// when one has room for another stream; [`CepticClient::connect_standalone`]
/// always dials a connection of its own.
#[derive(Clone)]
pub struct CepticClient {
    inner: Arc<ClientInner>,
}

impl CepticClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        validate_client_config(&config)?;
        let connector = tls::client_connector(&config.security)?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                connector,
                managers: DashMap::new(),
                destinations: DashMap::new(),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn is_secure(&self) -> bool {
        self.inner.connector.is_some()
    }

    pub fn manager_count(&self) -> usize {
        self.inner.managers.len()
    }

    /// Send `request` over a pooled connection.
    pub async fn connect(&self, request: Request) -> Result<Response> {
        self.send(request, false).await
    }

    /// Send `request` over a connection that is never shared.
    pub async fn connect_standalone(&self, request: Request) -> Result<Response> {
        self.send(request, true).await
    }

    async fn send(&self, mut request: Request, standalone: bool) -> Result<Response> {
        request.verify_and_prepare()?;
        let destination = format!("{}:{}", request.host(), request.port());

        let pooled = if standalone {
            None
        } else {
            self.inner.pooled_handler(&destination)
        };
        let stream = match pooled {
            Some(stream) => stream,
            None => {
                let manager = self.inner.clone().open_manager(&request, &destination, standalone).await?;
                manager.create_handler(None).ok_or(CepticError::HandlerStopped)?
            }
        };

        let result = self.inner.request(&stream, &request).await;
        if let Err(e) = &result {
            tracing::debug!(stream_id = %stream.stream_id(), error = %e, "Request failed");
            stream.send_close("client request failed").await;
        }
        result
    }

    /// Stop every connection this client owns.
    pub fn stop(&self) {
        let managers: Vec<Arc<StreamManager>> = self
            .inner
            .managers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for manager in managers {
            manager.stop("client stopped");
        }
        self.inner.managers.clear();
        self.inner.destinations.clear();
    }

    /// Stop and forget one manager.
    pub fn remove_manager(&self, manager_id: Uuid) {
        if let Some((_, manager)) = self.inner.managers.remove(&manager_id) {
            manager.stop("removed by client");
        }
        self.inner.forget_destination(manager_id);
    }
}

impl ClientInner {
    fn pooled_handler(&self, destination: &str) -> Option<Arc<StreamHandler>> {
        let ids = self.destinations.get(destination)?.value().clone();
        ids.iter()
            .filter_map(|id| self.managers.get(id).map(|entry| entry.value().clone()))
            .filter(|manager| !manager.is_stopped() && !manager.is_handler_limit_reached())
            .find_map(|manager| manager.create_handler(None))
    }

    async fn open_manager(
        self: Arc<Self>,
        request: &Request,
        destination: &str,
        standalone: bool,
    ) -> Result<Arc<StreamManager>> {
        let limit = Duration::from_secs(self.config.connect_timeout_secs);
        let tcp = tokio::time::timeout(limit, TcpStream::connect((request.host(), request.port())))
            .await
            .map_err(|_| {
                CepticError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connecting to {} timed out", destination),
                ))
            })??;
        let _ = tcp.set_nodelay(true);

        let limit = Duration::from_secs(self.config.handshake_timeout_secs);
        let (socket, settings) = tokio::time::timeout(limit, async {
            let mut socket = tls::connect(self.connector.as_ref(), request.host(), tcp).await?;
            let settings = client_handshake(&mut socket, &self.config).await?;
            Ok::<_, CepticError>((socket, settings))
        })
        .await
        .map_err(|_| {
            CepticError::Handshake(format!(
                "no handshake reply from {} within {}s",
                destination, self.config.handshake_timeout_secs
            ))
        })??;

        let owner = Arc::downgrade(&self);
        let owner: Weak<dyn ConnectionOwner> = owner;
        let manager = StreamManager::new(destination, Role::Client, settings, Some(owner));
        manager.start(socket)?;

        self.managers.insert(manager.manager_id(), manager.clone());
        if !standalone {
            self.destinations
                .entry(destination.to_string())
                .or_default()
                .push(manager.manager_id());
        }
        tracing::debug!(
            manager_id = %manager.manager_id(),
            destination,
            standalone,
            "Connection established"
        );
        Ok(manager)
    }

    async fn request(&self, stream: &Arc<StreamHandler>, request: &Request) -> Result<Response> {
        let timeout = stream.settings().timeout();

        stream.send_request(request).await?;
        let mut response = stream.receive_response(timeout).await?;
        if !response.status().is_success() {
            stream.send_close("request not accepted").await;
            response.set_stream(stream.clone());
            return Ok(response);
        }

        stream.set_encode(request.headers().encoding.as_deref())?;
        if request.headers().body_length().is_some() {
            stream.send(request.body().to_vec()).await?;
        }

        let mut response = stream.receive_response(timeout).await?;
        if let Some(length) = response.headers().body_length() {
            if length > self.config.body_max as u64 {
                return Err(CepticError::TotalSizeExceeded {
                    max: self.config.body_max,
                });
            }
            let body = stream.receive_body(timeout, length as usize).await?;
            response.fill_body(body);
        }

        response.set_stream(stream.clone());
        if !(response.exchange() && request.exchange()) {
            stream.send_close("client request complete").await;
        }
        Ok(response)
    }

    fn forget_destination(&self, manager_id: Uuid) {
        self.destinations.retain(|_, ids| {
            ids.retain(|id| *id != manager_id);
            !ids.is_empty()
        });
    }
}

impl ConnectionOwner for ClientInner {
    fn handle_new_connection(self: Arc<Self>, handler: Arc<StreamHandler>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            handler.send_close("client does not accept streams").await;
        })
    }

    fn remove_manager(&self, manager_id: Uuid) {
        self.managers.remove(&manager_id);
        self.forget_destination(manager_id);
    }
}
