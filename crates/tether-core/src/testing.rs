//! Scripted transport for driving the connector and coordinator in tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tether_pty::{
    ConnectOptions, CreateSession, PtyTransport, SessionId, StreamEvent, StreamSink,
    Subscription, TransportError,
};
use tokio::sync::mpsc::{self, error::TryRecvError};

#[derive(Default)]
pub(crate) struct FakeTransport {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    issued: u32,
    queued: VecDeque<Result<SessionId, TransportError>>,
    creates: Vec<CreateSession>,
    connects: Vec<SessionId>,
    sinks: Vec<StreamSink>,
    stops: Vec<mpsc::Receiver<()>>,
    inputs: Vec<(SessionId, String)>,
    resizes: Vec<(SessionId, u16, u16)>,
    closes: Vec<SessionId>,
    /// Input, resize and close calls in the order they arrived.
    log: Vec<String>,
    fail_input: bool,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Make the next `create_session` return `result` instead of `p<n>`.
    pub(crate) fn queue_create(&self, result: Result<SessionId, TransportError>) {
        self.state().queued.push_back(result);
    }

    pub(crate) fn fail_input(&self) {
        self.state().fail_input = true;
    }

    /// Deliver `event` through the newest subscription for `terminal_id`.
    pub(crate) fn emit(&self, terminal_id: &str, event: StreamEvent) -> bool {
        let state = self.state();
        match state.sinks.iter().rev().find(|s| s.terminal_id() == terminal_id) {
            Some(sink) => sink.event(event),
            None => false,
        }
    }

    pub(crate) fn fail(&self, terminal_id: &str, message: &str, fatal: bool) -> bool {
        let state = self.state();
        match state.sinks.iter().rev().find(|s| s.terminal_id() == terminal_id) {
            Some(sink) => sink.error(message, fatal),
            None => false,
        }
    }

    pub(crate) fn creates(&self) -> Vec<CreateSession> {
        self.state().creates.clone()
    }

    pub(crate) fn connects(&self) -> Vec<SessionId> {
        self.state().connects.clone()
    }

    pub(crate) fn inputs(&self) -> Vec<(SessionId, String)> {
        self.state().inputs.clone()
    }

    pub(crate) fn resizes(&self) -> Vec<(SessionId, u16, u16)> {
        self.state().resizes.clone()
    }

    pub(crate) fn closes(&self) -> Vec<SessionId> {
        self.state().closes.clone()
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    /// Subscriptions handed out that have not been closed.
    pub(crate) fn open_subscriptions(&self) -> usize {
        let mut state = self.state();
        state
            .stops
            .iter_mut()
            .map(|rx| rx.try_recv())
            .filter(|result| matches!(result, Err(TryRecvError::Empty)))
            .count()
    }
}

#[async_trait]
impl PtyTransport for FakeTransport {
    async fn create_session(&self, request: CreateSession) -> Result<SessionId, TransportError> {
        let mut state = self.state();
        state.creates.push(request);
        if let Some(result) = state.queued.pop_front() {
            return result;
        }
        state.issued += 1;
        Ok(format!("p{}", state.issued))
    }

    fn connect(&self, session_id: &str, sink: StreamSink, _options: ConnectOptions) -> Subscription {
        let (subscription, stop) = Subscription::channel();
        let mut state = self.state();
        state.connects.push(session_id.to_string());
        state.sinks.push(sink);
        state.stops.push(stop);
        subscription
    }

    async fn send_input(&self, session_id: &str, data: &str) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.fail_input {
            return Err(TransportError::SessionNotFound(session_id.to_string()));
        }
        state.inputs.push((session_id.to_string(), data.to_string()));
        state.log.push(format!("input {session_id} {data}"));
        Ok(())
    }

    async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<(), TransportError> {
        let mut state = self.state();
        state.resizes.push((session_id.to_string(), cols, rows));
        state.log.push(format!("resize {session_id} {cols}x{rows}"));
        Ok(())
    }

    async fn close(&self, session_id: &str) -> Result<(), TransportError> {
        let mut state = self.state();
        state.closes.push(session_id.to_string());
        state.log.push(format!("close {session_id}"));
        Ok(())
    }
}

/// Let spawned transport calls run to completion.
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
