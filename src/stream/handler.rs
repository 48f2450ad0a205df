//! One logical stream inside a connection.
//!
//! # Responsibilities
//! - Fragment outbound messages and queue them on the connection's shared
//!   outbound queue, under the outbound byte budget
//! - Buffer inbound frames delivered by the manager's receive loop, under the
//!   inbound byte budget, and reassemble them into messages
//! - Track the idle deadline, refreshed by any send, receive or keep-alive
//! - Track the exchange state of the stream
//!
//! # State
//! ```text
//! Active ──(close sent | close received | idle timeout | manager stopped)──▶ Stopped
//! ```
//! No transition leaves `Stopped`.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch, Mutex};
use uuid::Uuid;

use crate::encode::EncodeHandler;
use crate::error::{CepticError, Result};
use crate::message::{Request, Response, StatusCode};
use crate::stream::budget::{ByteBudget, BUFFER_WAIT};
use crate::stream::frame::{FrameType, StreamFrame};
use crate::stream::generator::FrameGenerator;
use crate::stream::settings::StreamSettings;

/// Exchange progress of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    AwaitingExchangeRequest,
    Exchanging,
    Ended,
}

impl ExchangeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ExchangeState::AwaitingExchangeRequest,
            1 => ExchangeState::Exchanging,
            _ => ExchangeState::Ended,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ExchangeState::AwaitingExchangeRequest => 0,
            ExchangeState::Exchanging => 1,
            ExchangeState::Ended => 2,
        }
    }
}

/// A reassembled inbound message.
#[derive(Debug)]
pub enum StreamData {
    Data(Vec<u8>),
    Response(Response),
}

pub struct StreamHandler {
    stream_id: Uuid,
    settings: StreamSettings,
    outbound: mpsc::Sender<StreamFrame>,
    inbound_tx: mpsc::UnboundedSender<StreamFrame>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<StreamFrame>>,
    send_budget: ByteBudget,
    read_budget: ByteBudget,
    created: Instant,
    /// Idle deadline in milliseconds since `created`.
    deadline_ms: AtomicU64,
    stop_tx: watch::Sender<bool>,
    close_sent: AtomicBool,
    closed_reason: OnceLock<String>,
    timed_out: AtomicBool,
    encoder: ArcSwap<EncodeHandler>,
    exchange: AtomicU8,
}

impl StreamHandler {
    pub(crate) fn new(
        stream_id: Uuid,
        settings: StreamSettings,
        outbound: mpsc::Sender<StreamFrame>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (stop_tx, _) = watch::channel(false);
        let handler = Self {
            stream_id,
            send_budget: ByteBudget::new(settings.send_buffer_size),
            read_budget: ByteBudget::new(settings.read_buffer_size),
            settings,
            outbound,
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            created: Instant::now(),
            deadline_ms: AtomicU64::new(0),
            stop_tx,
            close_sent: AtomicBool::new(false),
            closed_reason: OnceLock::new(),
            timed_out: AtomicBool::new(false),
            encoder: ArcSwap::from_pointee(EncodeHandler::default()),
            exchange: AtomicU8::new(ExchangeState::AwaitingExchangeRequest.as_u8()),
        };
        handler.update_keep_alive();
        handler
    }

    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    /// Reason given by whichever side closed the stream.
    pub fn closed_reason(&self) -> Option<&str> {
        self.closed_reason.get().map(String::as_str)
    }

    pub fn exchange_state(&self) -> ExchangeState {
        ExchangeState::from_u8(self.exchange.load(Ordering::Acquire))
    }

    pub fn send_buffered(&self) -> usize {
        self.send_budget.used()
    }

    pub fn read_buffered(&self) -> usize {
        self.read_budget.used()
    }

    /// Apply the encoders named in an Encoding header to later sends and receives.
    pub fn set_encode(&self, encoding: Option<&str>) -> Result<()> {
        let encoder = EncodeHandler::from_header(encoding)?;
        self.encoder.store(Arc::new(encoder));
        Ok(())
    }

    /// Push the idle deadline one timeout into the future.
    pub fn update_keep_alive(&self) {
        let deadline = self.created.elapsed() + self.settings.timeout();
        self.deadline_ms.store(deadline.as_millis() as u64, Ordering::Release);
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        let deadline = self.created + Duration::from_millis(self.deadline_ms.load(Ordering::Acquire));
        now >= deadline
    }

    /// Stop the handler. Blocked senders and receivers wake and fail.
    pub fn stop(&self) {
        let was_stopped = self.stop_tx.send_replace(true);
        if !was_stopped {
            self.send_budget.wake_all();
            self.read_budget.wake_all();
            crate::observability::metrics::record_stream_closed();
            tracing::trace!(stream_id = %self.stream_id, "Stream handler stopped");
        }
    }

    pub(crate) fn stop_timed_out(&self) {
        self.timed_out.store(true, Ordering::Release);
        self.stop();
    }

    fn mark_closed(&self, reason: String) {
        let _ = self.closed_reason.set(reason);
    }

    fn stopped_error(&self) -> CepticError {
        match self.closed_reason.get() {
            Some(reason) => CepticError::StreamClosed(reason.clone()),
            None => CepticError::HandlerStopped,
        }
    }

    /// Send raw bytes as DATA frames.
    pub async fn send(&self, data: Vec<u8>) -> Result<()> {
        self.send_frames(data, FrameType::Data).await
    }

    /// Send a request; its first frame is marked HEADER.
    pub async fn send_request(&self, request: &Request) -> Result<()> {
        self.send_frames(request.to_bytes()?, FrameType::Header).await
    }

    /// Send a response; its first frame is marked RESPONSE.
    pub async fn send_response(&self, response: &Response) -> Result<()> {
        self.send_frames(response.to_bytes()?, FrameType::Response).await?;
        if response.status() != StatusCode::EXCHANGE_START {
            self.end_exchange();
        }
        Ok(())
    }

    async fn send_frames(&self, data: Vec<u8>, first_type: FrameType) -> Result<()> {
        if self.is_stopped() {
            return Err(self.stopped_error());
        }

        let data = self.encoder.load().encode(data)?;
        let frames = FrameGenerator::new(self.stream_id, data, self.settings.frame_max_size, first_type);
        for frame in frames {
            let size = frame.wire_size();
            if !self.send_budget.reserve(size, || self.is_stopped()).await {
                return Err(self.stopped_error());
            }
            if let Err(e) = self.enqueue(frame).await {
                self.send_budget.release(size);
                return Err(e);
            }
            self.update_keep_alive();
        }
        Ok(())
    }

    async fn enqueue(&self, mut frame: StreamFrame) -> Result<()> {
        loop {
            match self.outbound.send_timeout(frame, BUFFER_WAIT).await {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => {
                    if self.is_stopped() {
                        return Err(self.stopped_error());
                    }
                    frame = returned;
                }
                Err(SendTimeoutError::Closed(_)) => return Err(CepticError::HandlerStopped),
            }
        }
    }

    /// Called by the send loop once a frame has left the outbound queue.
    pub(crate) fn release_send(&self, frame: &StreamFrame) {
        if frame.is_budgeted() {
            self.send_budget.release(frame.wire_size());
        }
    }

    /// Queue a CLOSE frame and stop. Safe to call more than once; only the
    /// first call has any effect and send failures are ignored.
    pub async fn send_close(&self, reason: &str) {
        if self.close_sent.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.is_stopped() {
            let frame = StreamFrame::close(self.stream_id, reason);
            if let Err(e) = self.outbound.send_timeout(frame, BUFFER_WAIT).await {
                tracing::debug!(stream_id = %self.stream_id, error = %e, "Failed to queue close frame");
            }
        }
        self.mark_closed(reason.to_string());
        self.stop();
    }

    /// Tell the peer this stream is still in use, waiting while the
    /// outbound queue is full.
    pub async fn send_keep_alive(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(self.stopped_error());
        }
        self.enqueue(StreamFrame::keep_alive(self.stream_id)).await?;
        self.update_keep_alive();
        Ok(())
    }

    /// Hand an inbound frame to this handler, waiting while the inbound budget is full.
    pub(crate) async fn deliver(&self, frame: StreamFrame) -> Result<()> {
        self.update_keep_alive();
        if frame.frame_type() == FrameType::Close {
            self.mark_closed(frame.close_reason());
            let _ = self.inbound_tx.send(frame);
            self.stop();
            return Ok(());
        }
        if self.is_stopped() {
            return Err(CepticError::HandlerStopped);
        }
        if frame.is_budgeted() && !self.read_budget.reserve(frame.wire_size(), || self.is_stopped()).await {
            return Err(CepticError::HandlerStopped);
        }
        self.inbound_tx.send(frame).map_err(|_| CepticError::HandlerStopped)
    }

    /// Read one complete message.
    ///
    /// Waits at most `timeout` for each frame. A `max_length` of 0 means no limit.
    pub async fn receive(&self, timeout: Duration, max_length: usize) -> Result<StreamData> {
        self.receive_limited(timeout, max_length, max_length).await
    }

    /// `max_wire` bounds the reassembled frames, `max_decoded` the payload
    /// after the stream's encoding is undone. 0 means no limit for either.
    async fn receive_limited(
        &self,
        timeout: Duration,
        max_wire: usize,
        max_decoded: usize,
    ) -> Result<StreamData> {
        let mut inbound = self.inbound_rx.lock().await;
        let mut stop_rx = self.stop_tx.subscribe();
        let mut data = Vec::new();
        let mut is_response = None;

        loop {
            let frame = match inbound.try_recv() {
                Ok(frame) => frame,
                Err(_) => {
                    if self.is_stopped() {
                        return Err(self.stopped_error());
                    }
                    tokio::select! {
                        frame = inbound.recv() => match frame {
                            Some(frame) => frame,
                            None => return Err(self.stopped_error()),
                        },
                        _ = wait_stopped(&mut stop_rx) => continue,
                        _ = tokio::time::sleep(timeout) => return Err(CepticError::StreamTimeout),
                    }
                }
            };

            if frame.is_budgeted() {
                self.read_budget.release(frame.wire_size());
            }
            self.update_keep_alive();

            match frame.frame_type() {
                FrameType::Close => {
                    self.mark_closed(frame.close_reason());
                    self.stop();
                    return Err(self.stopped_error());
                }
                FrameType::KeepAlive | FrameType::CloseAll => continue,
                _ => {}
            }

            let first_is_response = *is_response.get_or_insert(frame.frame_type() == FrameType::Response);
            let last = frame.is_last();
            data.extend_from_slice(frame.data());

            if max_wire > 0 && data.len() > max_wire {
                drop(inbound);
                self.send_close("total data size exceeded").await;
                return Err(CepticError::TotalSizeExceeded { max: max_wire });
            }

            if last {
                drop(inbound);
                let limit = if max_decoded == 0 { usize::MAX } else { max_decoded };
                let decoded = self.encoder.load().decode(data, limit);
                let data = match decoded {
                    Ok(data) => data,
                    Err(e @ CepticError::TotalSizeExceeded { .. }) => {
                        self.send_close("total data size exceeded").await;
                        return Err(e);
                    }
                    Err(e) => return Err(e),
                };
                if first_is_response {
                    let response = Response::from_bytes(&data)?;
                    self.observe_response(&response);
                    return Ok(StreamData::Response(response));
                }
                return Ok(StreamData::Data(data));
            }
        }
    }

    /// Read a message that must be plain data.
    pub async fn receive_data(&self, timeout: Duration, max_length: usize) -> Result<Vec<u8>> {
        match self.receive(timeout, max_length).await? {
            StreamData::Data(data) => Ok(data),
            StreamData::Response(response) => Err(CepticError::Protocol(format!(
                "expected data but received response {}",
                response.status()
            ))),
        }
    }

    /// Read a body of `length` decoded bytes or fewer.
    ///
    /// The wire limit accounts for the active encoding and decoding stops as
    /// soon as the output passes `length`; either overrun closes the stream.
    pub async fn receive_body(&self, timeout: Duration, length: usize) -> Result<Vec<u8>> {
        let length = length.max(1);
        let limit = self.encoder.load().wire_limit(length);
        match self.receive_limited(timeout, limit, length).await? {
            StreamData::Data(data) => Ok(data),
            StreamData::Response(response) => Err(CepticError::Protocol(format!(
                "expected body but received response {}",
                response.status()
            ))),
        }
    }

    /// Read a message that must be a response.
    pub async fn receive_response(&self, timeout: Duration) -> Result<Response> {
        match self.receive(timeout, self.settings.headers_max_size).await? {
            StreamData::Response(response) => Ok(response),
            StreamData::Data(_) => Err(CepticError::Protocol(
                "expected response but received data".to_string(),
            )),
        }
    }

    /// Enter exchange mode. Fails if the stream already started one.
    pub(crate) fn begin_exchange(&self) -> Result<()> {
        self.exchange
            .compare_exchange(
                ExchangeState::AwaitingExchangeRequest.as_u8(),
                ExchangeState::Exchanging.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|state| {
                CepticError::Protocol(format!(
                    "cannot begin exchange in state {:?}",
                    ExchangeState::from_u8(state)
                ))
            })
    }

    fn end_exchange(&self) {
        let _ = self.exchange.compare_exchange(
            ExchangeState::Exchanging.as_u8(),
            ExchangeState::Ended.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn observe_response(&self, response: &Response) {
        if response.status() == StatusCode::EXCHANGE_START && response.exchange() {
            let _ = self.begin_exchange();
        } else {
            self.end_exchange();
        }
    }
}

impl fmt::Debug for StreamHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandler")
            .field("stream_id", &self.stream_id)
            .field("stopped", &self.is_stopped())
            .field("timed_out", &self.is_timed_out())
            .field("exchange", &self.exchange_state())
            .finish()
    }
}

/// Resolve once the watched stop flag turns true or its sender is dropped.
pub(crate) async fn wait_stopped(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::frame::HEADER_SIZE;

    fn settings() -> StreamSettings {
        StreamSettings {
            send_buffer_size: 1024,
            read_buffer_size: 1024,
            frame_max_size: 16,
            headers_max_size: 1024,
            stream_timeout: 1,
            handler_max_count: 0,
        }
    }

    fn handler_with(settings: StreamSettings) -> (Arc<StreamHandler>, mpsc::Receiver<StreamFrame>) {
        let (tx, rx) = mpsc::channel(64);
        (Arc::new(StreamHandler::new(Uuid::new_v4(), settings, tx)), rx)
    }

    async fn loop_back(handler: &StreamHandler, outbound: &mut mpsc::Receiver<StreamFrame>) {
        while let Ok(frame) = outbound.try_recv() {
            handler.release_send(&frame);
            handler.deliver(frame).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_send_then_receive_reassembles() {
        let (handler, mut outbound) = handler_with(settings());
        let payload: Vec<u8> = (0..40u8).collect();

        handler.send(payload.clone()).await.unwrap();
        loop_back(&handler, &mut outbound).await;

        let data = handler.receive_data(Duration::from_secs(1), 0).await.unwrap();
        assert_eq!(data, payload);
        assert_eq!(handler.send_buffered(), 0);
        assert_eq!(handler.read_buffered(), 0);
    }

    #[tokio::test]
    async fn test_response_detected_by_frame_type() {
        let (handler, mut outbound) = handler_with(settings());
        handler
            .send_response(&Response::new(StatusCode::EXCHANGE_END))
            .await
            .unwrap();
        loop_back(&handler, &mut outbound).await;

        match handler.receive(Duration::from_secs(1), 0).await.unwrap() {
            StreamData::Response(response) => assert_eq!(response.status(), StatusCode::EXCHANGE_END),
            StreamData::Data(_) => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn test_encoding_applies_to_whole_message() {
        let (handler, mut outbound) = handler_with(settings());
        handler.set_encode(Some("gzip,base64")).unwrap();
        let payload = vec![b'a'; 200];

        handler.send(payload.clone()).await.unwrap();
        loop_back(&handler, &mut outbound).await;

        assert_eq!(handler.receive_data(Duration::from_secs(1), 0).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_send_close_is_idempotent() {
        let (handler, mut outbound) = handler_with(settings());
        handler.send_close("first").await;
        handler.send_close("second").await;

        let frame = outbound.try_recv().unwrap();
        assert_eq!(frame.frame_type(), FrameType::Close);
        assert_eq!(frame.close_reason(), "first");
        assert!(outbound.try_recv().is_err());
        assert!(handler.is_stopped());
        assert_eq!(handler.closed_reason(), Some("first"));
    }

    #[tokio::test]
    async fn test_operations_after_stop() {
        let (handler, _outbound) = handler_with(settings());
        handler.stop();

        assert!(matches!(handler.send(b"x".to_vec()).await, Err(CepticError::HandlerStopped)));
        assert!(matches!(
            handler.receive(Duration::from_secs(1), 0).await,
            Err(CepticError::HandlerStopped)
        ));
    }

    #[tokio::test]
    async fn test_remote_close_surfaces_reason() {
        let (handler, _outbound) = handler_with(settings());
        handler
            .deliver(StreamFrame::close(handler.stream_id(), "bye"))
            .await
            .unwrap();

        let err = handler.receive(Duration::from_secs(1), 0).await.unwrap_err();
        assert!(matches!(err, CepticError::StreamClosed(reason) if reason == "bye"));
        let err = handler.receive(Duration::from_secs(1), 0).await.unwrap_err();
        assert!(matches!(err, CepticError::StreamClosed(_)));
    }

    #[tokio::test]
    async fn test_total_size_exceeded_stops_handler() {
        let (handler, mut outbound) = handler_with(settings());
        handler.send(vec![1u8; 48]).await.unwrap();
        loop_back(&handler, &mut outbound).await;

        let err = handler.receive(Duration::from_secs(1), 20).await.unwrap_err();
        assert!(matches!(err, CepticError::TotalSizeExceeded { max: 20 }));
        assert!(handler.is_stopped());
    }

    #[tokio::test]
    async fn test_compressed_body_cannot_outgrow_content_length() {
        let (handler, mut outbound) = handler_with(StreamSettings {
            send_buffer_size: 1 << 20,
            read_buffer_size: 1 << 20,
            frame_max_size: 64 * 1024,
            ..settings()
        });
        handler.set_encode(Some("gzip")).unwrap();

        let gzip = EncodeHandler::from_header(Some("gzip")).unwrap();
        let bomb = gzip.encode(vec![0u8; 2 * 1024 * 1024]).unwrap();
        assert!(bomb.len() <= gzip.wire_limit(4096));
        for frame in FrameGenerator::new(handler.stream_id(), bomb, 64 * 1024, FrameType::Data) {
            handler.deliver(frame).await.unwrap();
        }

        let err = handler.receive_body(Duration::from_secs(1), 4096).await.unwrap_err();
        assert!(matches!(err, CepticError::TotalSizeExceeded { max: 4096 }));
        assert!(handler.is_stopped());
        let close = outbound.try_recv().unwrap();
        assert_eq!(close.frame_type(), FrameType::Close);
        assert_eq!(close.close_reason(), "total data size exceeded");
    }

    #[tokio::test]
    async fn test_keep_alive_waits_for_queue_room() {
        let (tx, mut rx) = mpsc::channel(1);
        let handler = Arc::new(StreamHandler::new(Uuid::new_v4(), settings(), tx));
        handler.send_keep_alive().await.unwrap();

        let pending = {
            let handler = handler.clone();
            tokio::spawn(async move { handler.send_keep_alive().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        assert_eq!(rx.recv().await.unwrap().frame_type(), FrameType::KeepAlive);
        pending.await.unwrap().unwrap();
        assert_eq!(rx.recv().await.unwrap().frame_type(), FrameType::KeepAlive);

        drop(rx);
        assert!(matches!(handler.send_keep_alive().await, Err(CepticError::HandlerStopped)));
    }

    #[tokio::test]
    async fn test_receive_timeout() {
        let (handler, _outbound) = handler_with(settings());
        let err = handler.receive(Duration::from_millis(50), 0).await.unwrap_err();
        assert!(matches!(err, CepticError::StreamTimeout));
        assert!(!handler.is_stopped());
    }

    #[tokio::test]
    async fn test_stop_wakes_blocked_receiver() {
        let (handler, _outbound) = handler_with(settings());
        let reader = {
            let handler = handler.clone();
            tokio::spawn(async move { handler.receive(Duration::from_secs(5), 0).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        handler.stop();
        assert!(matches!(reader.await.unwrap(), Err(CepticError::HandlerStopped)));
    }

    #[tokio::test]
    async fn test_saturated_budget_blocks_sender() {
        let mut settings = settings();
        settings.send_buffer_size = HEADER_SIZE + 16 + 1;
        let (handler, mut outbound) = handler_with(settings);

        let sender = {
            let handler = handler.clone();
            tokio::spawn(async move { handler.send(vec![9u8; 48]).await })
        };

        tokio::time::sleep(Duration::from_millis(250)).await;
        let first = outbound.try_recv().unwrap();
        assert!(outbound.try_recv().is_err());
        assert!(!sender.is_finished());

        handler.release_send(&first);
        let mut received = 1;
        while received < 3 {
            let frame = tokio::time::timeout(Duration::from_secs(1), outbound.recv())
                .await
                .unwrap()
                .unwrap();
            handler.release_send(&frame);
            received += 1;
        }
        sender.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_exchange_state_transitions() {
        let (handler, _outbound) = handler_with(settings());
        assert_eq!(handler.exchange_state(), ExchangeState::AwaitingExchangeRequest);
        handler.begin_exchange().unwrap();
        assert_eq!(handler.exchange_state(), ExchangeState::Exchanging);
        assert!(handler.begin_exchange().is_err());

        handler.end_exchange();
        assert_eq!(handler.exchange_state(), ExchangeState::Ended);
    }

    #[tokio::test]
    async fn test_expiry_tracks_deadline() {
        let (handler, _outbound) = handler_with(settings());
        assert!(!handler.is_expired(Instant::now()));
        assert!(handler.is_expired(Instant::now() + Duration::from_secs(2)));
    }
}
