//! Per-connection multiplexer.
//!
//! # Responsibilities
//! - Own the socket; the send loop is its only writer and the receive loop its only reader
//! - Keep the registry of stream handlers for the connection
//! - Route inbound frames to handlers, creating handlers for new inbound streams
//!   on server connections
//! - Enforce connection and stream idle timeouts on every send-loop tick
//! - Tear everything down exactly once and tell the owner to forget the manager

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::error::{CepticError, Result};
use crate::net::socket::BoxedSocket;
use crate::observability::metrics;
use crate::stream::budget::BUFFER_WAIT;
use crate::stream::frame::{FrameType, StreamFrame};
use crate::stream::handler::{wait_stopped, StreamHandler};
use crate::stream::settings::StreamSettings;

/// Frames that may wait in the shared outbound queue.
const OUTBOUND_QUEUE_CAPACITY: usize = 1024;

/// Which end of the connection a manager serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// The client or server that owns a set of managers.
pub trait ConnectionOwner: Send + Sync {
    /// Serve a stream opened by the remote peer.
    fn handle_new_connection(self: Arc<Self>, handler: Arc<StreamHandler>) -> BoxFuture<'static, ()>;

    /// Forget a manager that has stopped.
    fn remove_manager(&self, manager_id: Uuid);
}

pub struct StreamManager {
    manager_id: Uuid,
    destination: String,
    role: Role,
    settings: StreamSettings,
    handlers: DashMap<Uuid, Arc<StreamHandler>>,
    outbound_tx: mpsc::Sender<StreamFrame>,
    outbound_rx: Mutex<Option<mpsc::Receiver<StreamFrame>>>,
    owner: Option<Weak<dyn ConnectionOwner>>,
    created: Instant,
    deadline_ms: AtomicU64,
    stopped: AtomicBool,
    stop_tx: watch::Sender<bool>,
    stop_reason: OnceLock<String>,
    timed_out: AtomicBool,
}

impl StreamManager {
    pub fn new(
        destination: impl Into<String>,
        role: Role,
        settings: StreamSettings,
        owner: Option<Weak<dyn ConnectionOwner>>,
    ) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (stop_tx, _) = watch::channel(false);
        let manager = Arc::new(Self {
            manager_id: Uuid::new_v4(),
            destination: destination.into(),
            role,
            settings,
            handlers: DashMap::new(),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            owner,
            created: Instant::now(),
            deadline_ms: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            stop_tx,
            stop_reason: OnceLock::new(),
            timed_out: AtomicBool::new(false),
        });
        manager.update_keep_alive();
        manager
    }

    pub fn manager_id(&self) -> Uuid {
        self.manager_id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.get().map(String::as_str)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_handler_limit_reached(&self) -> bool {
        self.settings.is_handler_limit_reached(self.handlers.len())
    }

    pub fn get_handler(&self, stream_id: &Uuid) -> Option<Arc<StreamHandler>> {
        self.handlers.get(stream_id).map(|entry| entry.value().clone())
    }

    /// Resolve once the manager has stopped.
    pub async fn stopped(&self) {
        let mut rx = self.stop_tx.subscribe();
        wait_stopped(&mut rx).await;
    }

    fn update_keep_alive(&self) {
        let deadline = self.created.elapsed() + self.settings.timeout();
        self.deadline_ms.store(deadline.as_millis() as u64, Ordering::Release);
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.created + Duration::from_millis(self.deadline_ms.load(Ordering::Acquire))
    }

    /// Register a new handler. Returns `None` if the id is taken or the manager is stopped.
    pub fn create_handler(&self, stream_id: Option<Uuid>) -> Option<Arc<StreamHandler>> {
        if self.is_stopped() {
            return None;
        }
        let stream_id = stream_id.unwrap_or_else(Uuid::new_v4);
        match self.handlers.entry(stream_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let handler = Arc::new(StreamHandler::new(
                    stream_id,
                    self.settings.clone(),
                    self.outbound_tx.clone(),
                ));
                slot.insert(handler.clone());
                metrics::record_stream_opened();
                Some(handler)
            }
        }
    }

    /// Stop a handler and drop it from the registry.
    pub fn remove_handler(&self, stream_id: &Uuid) {
        if let Some((_, handler)) = self.handlers.remove(stream_id) {
            handler.stop();
        }
    }

    /// Launch the send and receive loops over `socket`.
    pub fn start(self: &Arc<Self>, socket: BoxedSocket) -> Result<()> {
        let outbound = self
            .outbound_rx
            .lock()
            .map_err(|_| CepticError::Protocol("manager state poisoned".to_string()))?
            .take()
            .ok_or_else(|| CepticError::Protocol("manager already started".to_string()))?;

        let (reader, writer) = tokio::io::split(socket);
        metrics::record_connection_opened();
        tracing::debug!(
            manager_id = %self.manager_id,
            destination = %self.destination,
            role = ?self.role,
            "Stream manager started"
        );

        tokio::spawn(self.clone().send_loop(writer, outbound));
        tokio::spawn(self.clone().receive_loop(reader));
        Ok(())
    }

    /// Queue a connection-wide close; the manager stops once it is written.
    pub async fn send_close_all(&self) {
        if self.is_stopped() {
            return;
        }
        if self
            .outbound_tx
            .send_timeout(StreamFrame::close_all(), BUFFER_WAIT)
            .await
            .is_err()
        {
            self.stop("close all could not be queued");
        }
    }

    /// Tear the connection down. Only the first call has any effect.
    pub fn stop(&self, reason: impl Into<String>) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let reason = reason.into();
        tracing::debug!(
            manager_id = %self.manager_id,
            destination = %self.destination,
            reason = %reason,
            "Stream manager stopped"
        );
        let _ = self.stop_reason.set(reason);

        for entry in self.handlers.iter() {
            entry.value().stop();
        }
        self.handlers.clear();
        self.stop_tx.send_replace(true);
        metrics::record_connection_closed();

        if let Some(owner) = self.owner.as_ref().and_then(Weak::upgrade) {
            owner.remove_manager(self.manager_id);
        }
    }

    async fn send_loop(
        self: Arc<Self>,
        mut writer: WriteHalf<BoxedSocket>,
        mut outbound: mpsc::Receiver<StreamFrame>,
    ) {
        let mut stop_rx = self.stop_tx.subscribe();
        while !self.is_stopped() {
            let next = tokio::select! {
                _ = wait_stopped(&mut stop_rx) => break,
                next = tokio::time::timeout(BUFFER_WAIT, outbound.recv()) => next,
            };

            match next {
                Ok(Some(frame)) => {
                    if let Err(e) = self.write_frame(&mut writer, frame).await {
                        self.stop(format!("send failed: {}", e));
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {}
            }

            if let Err(e) = self.check_timeouts(&mut writer).await {
                self.stop(format!("send failed: {}", e));
                break;
            }
        }
        let _ = writer.shutdown().await;
    }

    async fn write_frame(&self, writer: &mut WriteHalf<BoxedSocket>, frame: StreamFrame) -> Result<()> {
        let frame_type = frame.frame_type();
        if frame_type == FrameType::CloseAll {
            frame.write_to(writer).await?;
            metrics::record_frame_sent(frame_type);
            self.stop("close all sent");
            return Ok(());
        }

        let stream_id = frame.stream_id();
        let handler = self.get_handler(&stream_id);
        if handler.is_none() && frame_type != FrameType::Close {
            tracing::trace!(stream_id = %stream_id, "Dropping frame for unknown stream");
            return Ok(());
        }

        frame.write_to(writer).await?;
        metrics::record_frame_sent(frame_type);
        self.update_keep_alive();

        if let Some(handler) = handler {
            handler.release_send(&frame);
        }
        if frame_type == FrameType::Close {
            self.handlers.remove(&stream_id);
        }
        Ok(())
    }

    async fn check_timeouts(&self, writer: &mut WriteHalf<BoxedSocket>) -> Result<()> {
        let now = Instant::now();
        if self.is_expired(now) {
            self.timed_out.store(true, Ordering::Release);
            self.stop("connection timed out");
            return Ok(());
        }

        let expired: Vec<Uuid> = self
            .handlers
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| *entry.key())
            .collect();

        for stream_id in expired {
            if let Some((_, handler)) = self.handlers.remove(&stream_id) {
                tracing::debug!(stream_id = %stream_id, "Stream timed out");
                handler.stop_timed_out();
                StreamFrame::close(stream_id, "stream timed out")
                    .write_to(writer)
                    .await?;
                metrics::record_frame_sent(FrameType::Close);
            }
        }
        Ok(())
    }

    async fn receive_loop(self: Arc<Self>, mut reader: ReadHalf<BoxedSocket>) {
        let mut stop_rx = self.stop_tx.subscribe();
        while !self.is_stopped() {
            let result = tokio::select! {
                _ = wait_stopped(&mut stop_rx) => break,
                result = StreamFrame::read_from(&mut reader, self.settings.frame_max_size) => result,
            };

            let frame = match result {
                Ok(frame) => frame,
                Err(e) => {
                    self.stop(format!("receive failed: {}", e));
                    break;
                }
            };

            self.update_keep_alive();
            metrics::record_frame_received(frame.frame_type());

            if let Err(e) = self.dispatch(frame).await {
                self.stop(e.to_string());
                break;
            }
        }
    }

    async fn dispatch(&self, frame: StreamFrame) -> Result<()> {
        let stream_id = frame.stream_id();
        match frame.frame_type() {
            FrameType::KeepAlive => {
                if let Some(handler) = self.get_handler(&stream_id) {
                    handler.update_keep_alive();
                }
            }
            FrameType::Close => {
                if let Some((_, handler)) = self.handlers.remove(&stream_id) {
                    let _ = handler.deliver(frame).await;
                }
            }
            FrameType::CloseAll => {
                self.stop("close all received");
            }
            FrameType::Header if self.role == Role::Server => {
                let handler = self.create_handler(Some(stream_id)).ok_or_else(|| {
                    CepticError::Protocol(format!("duplicate stream id {}", stream_id))
                })?;

                if self.settings.handler_max_count > 0
                    && self.handlers.len() > self.settings.handler_max_count
                {
                    tracing::debug!(stream_id = %stream_id, "Handler limit reached");
                    handler.send_close("Handler limit reached").await;
                    return Ok(());
                }

                if handler.deliver(frame).await.is_err() {
                    return Ok(());
                }
                if let Some(owner) = self.owner.as_ref().and_then(Weak::upgrade) {
                    tokio::spawn(owner.handle_new_connection(handler));
                }
            }
            _ => match self.get_handler(&stream_id) {
                Some(handler) => {
                    if let Err(e) = handler.deliver(frame).await {
                        tracing::trace!(stream_id = %stream_id, error = %e, "Frame for stopped stream");
                    }
                }
                None => {
                    tracing::trace!(stream_id = %stream_id, "Dropping frame for unknown stream");
                }
            },
        }
        Ok(())
    }
}

impl fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamManager")
            .field("manager_id", &self.manager_id)
            .field("destination", &self.destination)
            .field("role", &self.role)
            .field("handlers", &self.handlers.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Request, Response, StatusCode};
    use std::sync::atomic::AtomicUsize;

    fn settings() -> StreamSettings {
        StreamSettings {
            send_buffer_size: 4096,
            read_buffer_size: 4096,
            frame_max_size: 64,
            headers_max_size: 4096,
            stream_timeout: 2,
            handler_max_count: 0,
        }
    }

    /// Answers every inbound stream with OK, optionally holding it open first.
    #[derive(Default)]
    struct TestOwner {
        removed: AtomicUsize,
        hold: Duration,
    }

    impl ConnectionOwner for TestOwner {
        fn handle_new_connection(self: Arc<Self>, handler: Arc<StreamHandler>) -> BoxFuture<'static, ()> {
            Box::pin(async move {
                let timeout = handler.settings().timeout();
                if handler.receive_data(timeout, 0).await.is_err() {
                    return;
                }
                tokio::time::sleep(self.hold).await;
                let response = Response::new(StatusCode::OK);
                let _ = handler.send_response(&response).await;
                handler.send_close("done").await;
            })
        }

        fn remove_manager(&self, _manager_id: Uuid) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn connect(
        server_settings: StreamSettings,
        owner: &Arc<TestOwner>,
    ) -> (Arc<StreamManager>, Arc<StreamManager>) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let client = StreamManager::new("test", Role::Client, settings(), None);
        let weak = Arc::downgrade(owner);
        let weak: Weak<dyn ConnectionOwner> = weak;
        let server = StreamManager::new("peer", Role::Server, server_settings, Some(weak));
        client.start(Box::new(client_io)).unwrap();
        server.start(Box::new(server_io)).unwrap();
        (client, server)
    }

    fn request() -> Request {
        let mut request = Request::new("get", "localhost/");
        request.verify_and_prepare().unwrap();
        request
    }

    #[tokio::test]
    async fn test_request_response_over_pipe() {
        let owner = Arc::new(TestOwner::default());
        let (client, server) = connect(settings(), &owner);

        let handler = client.create_handler(None).unwrap();
        handler.send_request(&request()).await.unwrap();
        let response = handler.receive_response(Duration::from_secs(2)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let err = handler.receive(Duration::from_secs(2), 0).await.unwrap_err();
        assert!(matches!(err, CepticError::StreamClosed(reason) if reason == "done"));
        assert_eq!(client.handler_count(), 0);

        client.stop("test over");
        server.stopped().await;
    }

    /// Keeps inbound streams registered without ever reading them.
    #[derive(Default)]
    struct ParkingOwner {
        parked: std::sync::Mutex<Vec<Arc<StreamHandler>>>,
    }

    impl ParkingOwner {
        fn parked(&self, stream_id: Uuid) -> Option<Arc<StreamHandler>> {
            let parked = self.parked.lock().unwrap();
            parked.iter().find(|h| h.stream_id() == stream_id).cloned()
        }
    }

    impl ConnectionOwner for ParkingOwner {
        fn handle_new_connection(self: Arc<Self>, handler: Arc<StreamHandler>) -> BoxFuture<'static, ()> {
            Box::pin(async move {
                self.parked.lock().unwrap().push(handler);
            })
        }

        fn remove_manager(&self, _manager_id: Uuid) {}
    }

    #[tokio::test]
    async fn test_idle_stream_times_out_while_kept_alive_stream_survives() {
        let owner = Arc::new(ParkingOwner::default());
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let client = StreamManager::new("test", Role::Client, settings(), None);
        let weak = Arc::downgrade(&owner);
        let weak: Weak<dyn ConnectionOwner> = weak;
        let server_settings = StreamSettings {
            stream_timeout: 1,
            ..settings()
        };
        let server = StreamManager::new("peer", Role::Server, server_settings, Some(weak));
        client.start(Box::new(client_io)).unwrap();
        server.start(Box::new(server_io)).unwrap();

        let idle = client.create_handler(None).unwrap();
        let busy = client.create_handler(None).unwrap();
        idle.send_request(&request()).await.unwrap();
        busy.send_request(&request()).await.unwrap();

        for _ in 0..8 {
            tokio::time::sleep(Duration::from_millis(200)).await;
            busy.send_keep_alive().await.unwrap();
        }

        let idle_peer = owner.parked(idle.stream_id()).unwrap();
        let busy_peer = owner.parked(busy.stream_id()).unwrap();
        assert!(idle_peer.is_stopped());
        assert!(idle_peer.is_timed_out());
        assert!(!busy_peer.is_stopped());
        assert!(!busy_peer.is_timed_out());
        assert_eq!(server.handler_count(), 1);

        let err = idle.receive(Duration::from_millis(200), 0).await.unwrap_err();
        assert!(matches!(err, CepticError::StreamClosed(reason) if reason == "stream timed out"));
        assert!(!busy.is_stopped());
        assert!(!client.is_stopped());
        assert!(!server.is_stopped());

        client.stop("test over");
        server.stopped().await;
    }

    #[tokio::test]
    async fn test_duplicate_handler_rejected() {
        let manager = StreamManager::new("test", Role::Client, settings(), None);
        let id = Uuid::new_v4();
        assert!(manager.create_handler(Some(id)).is_some());
        assert!(manager.create_handler(Some(id)).is_none());
    }

    #[tokio::test]
    async fn test_concurrent_stop_runs_once() {
        let owner = Arc::new(TestOwner::default());
        let (_client, server) = connect(settings(), &owner);
        let handler = server.create_handler(None).unwrap();

        let stops: Vec<_> = (0..8)
            .map(|i| {
                let server = server.clone();
                tokio::spawn(async move { server.stop(format!("stop {}", i)) })
            })
            .collect();
        for stop in stops {
            stop.await.unwrap();
        }

        assert_eq!(owner.removed.load(Ordering::SeqCst), 1);
        assert!(handler.is_stopped());
        assert!(server.stop_reason().unwrap().starts_with("stop "));
        assert!(server.create_handler(None).is_none());
    }

    #[tokio::test]
    async fn test_close_all_stops_both_sides() {
        let owner = Arc::new(TestOwner::default());
        let (client, server) = connect(settings(), &owner);

        client.send_close_all().await;
        tokio::time::timeout(Duration::from_secs(2), server.stopped()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), client.stopped()).await.unwrap();
        assert_eq!(server.stop_reason(), Some("close all received"));
    }

    #[tokio::test]
    async fn test_handler_limit_closes_extra_stream() {
        let owner = Arc::new(TestOwner {
            hold: Duration::from_millis(500),
            ..Default::default()
        });
        let mut limited = settings();
        limited.handler_max_count = 1;
        let (client, _server) = connect(limited, &owner);

        let first = client.create_handler(None).unwrap();
        first.send_request(&request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = client.create_handler(None).unwrap();
        second.send_request(&request()).await.unwrap();
        let err = second.receive(Duration::from_secs(2), 0).await.unwrap_err();
        assert!(matches!(err, CepticError::StreamClosed(reason) if reason == "Handler limit reached"));

        let response = first.receive_response(Duration::from_secs(2)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_idle_connection_times_out() {
        let owner = Arc::new(TestOwner::default());
        let mut short = settings();
        short.stream_timeout = 1;
        let (_client, server) = connect(short, &owner);

        tokio::time::timeout(Duration::from_secs(3), server.stopped()).await.unwrap();
        assert!(server.is_timed_out());
    }

    #[tokio::test]
    async fn test_peer_disconnect_stops_manager() {
        let (client_io, server_io) = tokio::io::duplex(1024);
        let manager = StreamManager::new("test", Role::Client, settings(), None);
        manager.start(Box::new(client_io)).unwrap();
        let handler = manager.create_handler(None).unwrap();

        drop(server_io);
        tokio::time::timeout(Duration::from_secs(2), manager.stopped()).await.unwrap();
        assert!(manager.stop_reason().unwrap().starts_with("receive failed"));
        assert!(matches!(
            handler.receive(Duration::from_secs(1), 0).await,
            Err(CepticError::HandlerStopped)
        ));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (a, _b) = tokio::io::duplex(1024);
        let (c, _d) = tokio::io::duplex(1024);
        let manager = StreamManager::new("test", Role::Client, settings(), None);
        manager.start(Box::new(a)).unwrap();
        assert!(manager.start(Box::new(c)).is_err());
        manager.stop("done");
    }
}
