//! Connection engine.
//!
//! Owns everything a [`Connection`](crate::Connection) shares with its
//! background tasks:
//!
//! - the submit path: sequence allocation, encoding, size check, index
//!   insert and enqueue, serialized by `submit_lock`
//! - inbound dispatch by op code, serialized by `process_lock`
//! - the supervisor loop that opens transports, performs the LOGIN/WELCOME
//!   handshake, reads frames and decides between reconnect and teardown
//!
//! Lock order is `process_lock` then `submit_lock`. User callbacks are
//! never invoked with `submit_lock` held.

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;

use super::reconnect::ReconnectScheduler;
use super::transport::{Connector, FrameSink, InboundFrame};
use super::writer::{self, Outbound};
use super::{
    invoke_guarded, ConnectionState, CLOSE_CODE_ABNORMAL, CLOSE_CODE_NORMAL,
    CLOSE_CODE_SERVICE_RESTART,
};
use crate::{
    codec,
    error::{RelayLinkError, Result},
    event_handlers::{ConnectionError, DisconnectReason, EventHandlers},
    models::{
        op, AckMode, Completion, CompletionCallback, ConnectionOptions, Envelope, Message,
        SessionInfo, SubscriptionOptions,
    },
    seq_index::{PendingKind, PendingRequest, SequencedRequestIndex},
    subscription::{Delivery, SubscriptionListener, SubscriptionRegistry},
    timeouts::{within, RelayLinkTimeouts},
};

/// How a transport session ended.
#[derive(Debug)]
pub(crate) enum SessionEnd {
    /// Transport closed or lost.
    Closed { code: Option<u16>, reason: String },
    /// Connect or login failed.
    Failed(RelayLinkError),
    /// Server sent GOODBYE.
    Goodbye { code: Option<u16>, reason: String },
    /// Caller asked to disconnect.
    Shutdown,
}

/// One open transport.
pub(crate) struct Session {
    url: String,
    sink: tokio::sync::Mutex<Box<dyn FrameSink>>,
    kill: Notify,
    end: Mutex<Option<SessionEnd>>,
    welcomed: AtomicBool,
}

impl Session {
    fn new(url: &str, sink: Box<dyn FrameSink>) -> Arc<Self> {
        Arc::new(Self {
            url: url.to_string(),
            sink: tokio::sync::Mutex::new(sink),
            kill: Notify::new(),
            end: Mutex::new(None),
            welcomed: AtomicBool::new(false),
        })
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn sink(&self) -> &tokio::sync::Mutex<Box<dyn FrameSink>> {
        &self.sink
    }

    /// End the session. The first recorded reason wins.
    pub(crate) fn terminate(&self, end: SessionEnd) {
        {
            let mut slot = self.end.lock();
            if slot.is_none() {
                *slot = Some(end);
            }
        }
        self.kill.notify_one();
    }

    fn take_end(&self) -> Option<SessionEnd> {
        self.end.lock().take()
    }

    fn is_welcomed(&self) -> bool {
        self.welcomed.load(Ordering::SeqCst)
    }
}

/// Resolves once `shutdown` is set (or its sender is gone).
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

pub(crate) struct Inner {
    pub(crate) options: ConnectionOptions,
    pub(crate) timeouts: RelayLinkTimeouts,
    pub(crate) handlers: EventHandlers,
    connector: Arc<dyn Connector>,
    runtime: Handle,

    state: RwLock<ConnectionState>,
    session_info: RwLock<SessionInfo>,
    next_seq: AtomicU64,
    next_subscription_id: AtomicU64,

    submit_lock: Mutex<()>,
    process_lock: ReentrantMutex<()>,

    pub(crate) index: SequencedRequestIndex,
    pub(crate) registry: SubscriptionRegistry,

    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    session: Mutex<Option<Arc<Session>>>,
    scheduler: Mutex<ReconnectScheduler>,

    shutdown: watch::Sender<bool>,
    disconnect_requested: AtomicBool,
    grace_timer: Mutex<Option<JoinHandle<()>>>,
    welcomed_once: AtomicBool,
    /// Callers of `start`/`reconnect` waiting for the next WELCOME.
    ready: Mutex<Vec<oneshot::Sender<Result<()>>>>,
}

impl Inner {
    pub(crate) fn new(
        urls: Vec<String>,
        options: ConnectionOptions,
        timeouts: RelayLinkTimeouts,
        handlers: EventHandlers,
        connector: Arc<dyn Connector>,
        rng_seed: Option<u64>,
    ) -> Result<Arc<Self>> {
        if urls.is_empty() {
            return Err(RelayLinkError::ConfigurationError(
                "at least one server URL is required".to_string(),
            ));
        }
        let runtime = Handle::try_current().map_err(|_| {
            RelayLinkError::ConfigurationError("must be called within a tokio runtime".to_string())
        })?;

        let scheduler = ReconnectScheduler::new(
            urls,
            options.auto_reconnect_attempts,
            options.auto_reconnect_max_delay(),
            rng_seed,
        );
        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self {
            options,
            timeouts,
            handlers,
            connector,
            runtime,
            state: RwLock::new(ConnectionState::Init),
            session_info: RwLock::new(SessionInfo::default()),
            next_seq: AtomicU64::new(0),
            next_subscription_id: AtomicU64::new(0),
            submit_lock: Mutex::new(()),
            process_lock: ReentrantMutex::new(()),
            index: SequencedRequestIndex::new(),
            registry: SubscriptionRegistry::new(),
            outbound: Mutex::new(None),
            writer: Mutex::new(None),
            session: Mutex::new(None),
            scheduler: Mutex::new(scheduler),
            shutdown,
            disconnect_requested: AtomicBool::new(false),
            grace_timer: Mutex::new(None),
            welcomed_once: AtomicBool::new(false),
            ready: Mutex::new(Vec::new()),
        }))
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    // ── State ───────────────────────────────────────────────────────────

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub(crate) fn session_info(&self) -> SessionInfo {
        self.session_info.read().clone()
    }

    pub(crate) fn url_order(&self) -> Vec<String> {
        self.scheduler.lock().urls().to_vec()
    }

    /// Swap the state; the caller emits the returned transition once it
    /// holds no locks the callback could need.
    fn transition(&self, new: ConnectionState) -> Option<(ConnectionState, ConnectionState)> {
        let mut state = self.state.write();
        let old = *state;
        if old == new {
            return None;
        }
        *state = new;
        log::debug!("[relay-link] State {} -> {}", old, new);
        Some((old, new))
    }

    fn emit_transition(&self, transition: Option<(ConnectionState, ConnectionState)>) {
        if let Some((old, new)) = transition {
            self.handlers.emit_state_change(old, new);
        }
    }

    fn set_state(&self, new: ConnectionState) {
        let transition = self.transition(new);
        self.emit_transition(transition);
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.state() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(RelayLinkError::NotConnected)
        }
    }

    fn enqueue(&self, item: Outbound) -> Result<()> {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(item).map_err(|_| RelayLinkError::NotConnected),
            None => Err(RelayLinkError::NotConnected),
        }
    }

    fn enqueue_frame(&self, text: String, completes: Option<u64>) -> Result<()> {
        self.enqueue(Outbound::Frame { text, completes })
    }

    fn enqueue_envelope(&self, envelope: &Envelope) -> Result<()> {
        self.enqueue_frame(codec::encode(envelope)?, None)
    }

    /// Deliver a terminal outcome, escalating errors nobody listens for.
    fn finish(&self, entry: PendingRequest, outcome: Result<Completion>) {
        if let Some(err) = entry.finish(outcome) {
            self.handlers.emit_error(ConnectionError::from(&err));
        }
    }

    /// The writer handed a non-QoS frame to the transport.
    pub(crate) fn complete_written(&self, seq: u64) {
        if let Some(entry) = self.index.remove(seq) {
            let completion = entry.default_completion();
            self.finish(entry, Ok(completion));
        }
    }

    // ── Submit path ─────────────────────────────────────────────────────

    /// Sequence, encode, track and enqueue one operation.
    ///
    /// `build` receives the sequence number and the current session and
    /// returns the envelope plus the pending-entry payload. Nothing is
    /// tracked or written if any precondition fails.
    pub(crate) fn submit<F>(
        &self,
        feature: Option<&'static str>,
        callback: Option<CompletionCallback>,
        build: F,
    ) -> Result<u64>
    where
        F: FnOnce(u64, &SessionInfo) -> (Envelope, PendingKind),
    {
        let _submit = self.submit_lock.lock();
        self.ensure_connected()?;
        let session = self.session_info.read().clone();
        if let Some(feature) = feature {
            self.ensure_supported(feature, session.protocol)?;
        }

        let seq = self.next_seq.load(Ordering::SeqCst) + 1;
        let (envelope, kind) = build(seq, &session);
        let text = codec::encode(&envelope)?;
        if !session.fits(text.len()) {
            return Err(RelayLinkError::MessageTooLarge {
                size: text.len(),
                max_size: session.max_size,
            });
        }

        let entry = PendingRequest::new(seq, text.clone(), callback, kind);
        let completes = (entry.completes_on_write() && !session.qos).then_some(seq);
        self.index.put(seq, entry);
        if let Err(e) = self.enqueue_frame(text, completes) {
            self.index.remove(seq);
            return Err(e);
        }
        self.next_seq.store(seq, Ordering::SeqCst);
        Ok(seq)
    }

    pub(crate) fn ensure_supported(&self, feature: &'static str, protocol: u32) -> Result<()> {
        if self.options.extended_op_codes.supported_by(protocol) {
            Ok(())
        } else {
            Err(RelayLinkError::NotSupportedByServer { feature, protocol })
        }
    }

    /// Start the reply timer of a pending request.
    pub(crate) fn arm_request_timer(self: &Arc<Self>, seq: u64, timeout: Duration) {
        if RelayLinkTimeouts::is_no_timeout(timeout) {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if let Some(entry) = inner.index.remove(seq) {
                log::debug!("[relay-link] Request seq {} timed out after {:?}", seq, timeout);
                inner.finish(entry, Err(RelayLinkError::RequestTimeout(timeout)));
            }
        });
        if !self.index.attach_timer(seq, timer.abort_handle()) {
            timer.abort();
        }
    }

    pub(crate) fn subscribe(
        &self,
        matcher: Option<&str>,
        durable: Option<&str>,
        options: SubscriptionOptions,
        listener: Arc<dyn SubscriptionListener>,
    ) -> Result<u64> {
        let _submit = self.submit_lock.lock();
        self.ensure_connected()?;

        let id = self.next_subscription_id.load(Ordering::SeqCst) + 1;
        let from_seq = options.from_seq.unwrap_or(0);
        let text = codec::encode(&codec::subscribe(id, matcher, durable, options.ack_mode, from_seq))?;

        self.registry.insert(
            id,
            matcher.map(str::to_string),
            durable.map(str::to_string),
            options.ack_mode,
            from_seq,
            listener,
        );
        if let Err(e) = self.enqueue_frame(text, None) {
            self.registry.remove(id);
            return Err(e);
        }
        self.next_subscription_id.store(id, Ordering::SeqCst);
        log::debug!("[relay-link] Subscribing {} (matcher={:?}, durable={:?})", id, matcher, durable);
        Ok(id)
    }

    pub(crate) fn unsubscribe(&self, id: u64, delete: bool) -> Result<()> {
        let _submit = self.submit_lock.lock();
        self.ensure_connected()?;
        if self.registry.ack_mode(id).is_none() {
            return Err(RelayLinkError::SubscriptionNotFound(id));
        }
        // Local state changes only once the frame is queued.
        self.enqueue_envelope(&codec::unsubscribe(id, delete))?;
        self.registry.remove(id);
        Ok(())
    }

    /// Explicit acknowledgement for client-ack subscriptions.
    pub(crate) fn acknowledge(&self, message: &Message, all: bool) -> Result<()> {
        let _submit = self.submit_lock.lock();
        self.ensure_connected()?;

        let id = message
            .subscription_id()
            .ok_or(RelayLinkError::SubscriptionNotFound(0))?;
        let mode = self
            .registry
            .ack_mode(id)
            .ok_or(RelayLinkError::SubscriptionNotFound(id))?;
        if mode != AckMode::Client {
            return Err(RelayLinkError::InvalidAckMode {
                subscription_id: id,
                mode,
            });
        }
        let Some(seq) = message.seq() else {
            log::debug!("[relay-link] Nothing to acknowledge: delivery carries no seq");
            return Ok(());
        };

        self.enqueue_envelope(&codec::ack(seq, all.then_some(id)))?;
        self.registry.advance(id, seq);
        Ok(())
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Spawn the supervisor and wait for the first WELCOME or a fatal
    /// teardown.
    ///
    /// Only a connection in `Init` or `Disconnected` spawns a supervisor.
    /// The state check and the move to `Connecting` happen under
    /// `process_lock`, so concurrent callers share one attempt: while it is
    /// still waiting for its WELCOME they wait on it too, otherwise they
    /// return `Ok` at once.
    pub(crate) async fn start(self: &Arc<Self>) -> Result<()> {
        let ready_rx = {
            let _process = self.process_lock.lock();
            let (ready_tx, ready_rx) = oneshot::channel();
            match self.state() {
                ConnectionState::Init | ConnectionState::Disconnected => {
                    self.ready.lock().push(ready_tx);
                    self.disconnect_requested.store(false, Ordering::SeqCst);
                    self.shutdown.send_replace(false);
                    self.scheduler.lock().reset();
                    let transition = self.transition(ConnectionState::Connecting);
                    self.emit_transition(transition);

                    let inner = self.clone();
                    self.runtime.spawn(async move { inner.supervise().await });
                },
                ConnectionState::Connecting | ConnectionState::Reconnecting => {
                    let mut waiters = self.ready.lock();
                    if waiters.is_empty() {
                        return Ok(());
                    }
                    log::debug!("[relay-link] Joining connection attempt in progress");
                    waiters.push(ready_tx);
                },
                state => {
                    log::debug!("[relay-link] Connect ignored in state {}", state);
                    return Ok(());
                },
            }
            ready_rx
        };

        match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(RelayLinkError::closed(None, "connection task exited")),
        }
    }

    /// Restart a torn-down connection.
    pub(crate) async fn reconnect(self: &Arc<Self>) -> Result<()> {
        self.start().await
    }

    /// Resolve every caller waiting in `start`.
    fn resolve_ready(&self, result: Result<()>) {
        let waiters = std::mem::take(&mut *self.ready.lock());
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    /// Graceful disconnect: let the writer flush what is queued, send
    /// DISCONNECT and close. Force-closes after `disconnect_grace`.
    pub(crate) fn disconnect(self: &Arc<Self>) {
        let _process = self.process_lock.lock();
        let state = self.state();
        if matches!(state, ConnectionState::Disconnected | ConnectionState::Disconnecting) {
            return;
        }
        self.disconnect_requested.store(true, Ordering::SeqCst);

        let (queued, transition) = {
            let _submit = self.submit_lock.lock();
            let transition = self.transition(ConnectionState::Disconnecting);
            let queued = state == ConnectionState::Connected && self.enqueue(Outbound::Disconnect).is_ok();
            (queued, transition)
        };
        self.emit_transition(transition);

        if queued {
            log::info!("[relay-link] Disconnecting");
            self.arm_disconnect_grace();
        } else {
            self.shutdown.send_replace(true);
        }
    }

    fn arm_disconnect_grace(self: &Arc<Self>) {
        let grace = self.timeouts.disconnect_grace;
        if RelayLinkTimeouts::is_no_timeout(grace) {
            return;
        }
        let weak = Arc::downgrade(self);
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(inner) = weak.upgrade() {
                log::warn!("[relay-link] Graceful disconnect exceeded {:?}; forcing close", grace);
                inner.shutdown.send_replace(true);
            }
        });
        if let Some(previous) = self.grace_timer.lock().replace(timer) {
            previous.abort();
        }
    }

    /// Kill the transport without DISCONNECT. The reconnect algorithm runs
    /// as it would for any lost connection.
    pub(crate) fn force_disconnect(&self) {
        let session = self.session.lock().clone();
        match session {
            Some(session) => {
                log::info!("[relay-link] Forcing transport to {} closed", session.url());
                session.terminate(SessionEnd::Closed {
                    code: Some(CLOSE_CODE_ABNORMAL),
                    reason: "forced disconnect".to_string(),
                });
            },
            None => log::debug!("[relay-link] force_disconnect: no open transport"),
        }
    }

    /// Permanent teardown: fail every pending request, then notify.
    fn teardown(&self, code: Option<u16>, reason: &str) {
        if let Some(timer) = self.grace_timer.lock().take() {
            timer.abort();
        }
        // Taken together with the state change: once `Disconnected` is
        // visible a `reconnect` may start the next attempt, whose waiters
        // and requests are not ours to fail.
        let (transition, pending, waiters) = {
            let _process = self.process_lock.lock();
            let _submit = self.submit_lock.lock();
            *self.outbound.lock() = None;
            let transition = self.transition(ConnectionState::Disconnected);
            (transition, self.index.drain(), std::mem::take(&mut *self.ready.lock()))
        };
        self.emit_transition(transition);

        let err = RelayLinkError::closed(code, reason);
        if !pending.is_empty() {
            log::info!("[relay-link] Failing {} pending request(s): {}", pending.len(), reason);
        }
        for entry in pending {
            self.finish(entry, Err(err.clone()));
        }
        for waiter in waiters {
            let _ = waiter.send(Err(err.clone()));
        }

        log::info!("[relay-link] Disconnected: {}", reason);
        self.handlers.emit_disconnect(DisconnectReason {
            message: reason.to_string(),
            code,
        });
    }

    // ── Supervisor ──────────────────────────────────────────────────────

    async fn supervise(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            let step = self.scheduler.lock().next_target();
            let Some(step) = step else {
                self.teardown(None, "no server URLs configured");
                return;
            };

            if !step.delay.is_zero() {
                log::info!("[relay-link] Reconnecting to {} in {:?}", step.url, step.delay);
                tokio::select! {
                    biased;
                    _ = shutdown_signalled(&mut shutdown_rx) => {
                        self.teardown(Some(CLOSE_CODE_NORMAL), "client disconnect");
                        return;
                    }
                    _ = tokio::time::sleep(step.delay) => {}
                }
            }

            let end = self.run_session(&step.url, &mut shutdown_rx).await;
            let end = if self.disconnect_requested.load(Ordering::SeqCst) {
                SessionEnd::Shutdown
            } else {
                end
            };

            match end {
                SessionEnd::Shutdown => {
                    self.teardown(Some(CLOSE_CODE_NORMAL), "client disconnect");
                    return;
                },
                SessionEnd::Goodbye { code, reason } => {
                    log::info!("[relay-link] Server said goodbye: {} ({:?})", reason, code);
                    self.teardown(code, &reason);
                    return;
                },
                SessionEnd::Closed {
                    code: Some(CLOSE_CODE_SERVICE_RESTART),
                    reason,
                } => {
                    log::info!("[relay-link] Server restarting ({}); reconnecting", reason);
                    self.scheduler.lock().reset();
                },
                SessionEnd::Closed { code, reason } => {
                    log::warn!("[relay-link] Connection to {} lost: {} ({:?})", step.url, reason, code);
                    if !self.retry_allowed() {
                        self.teardown(code, &reason);
                        return;
                    }
                },
                SessionEnd::Failed(err) => {
                    log::warn!("[relay-link] Connection attempt to {} failed: {}", step.url, err);
                    self.handlers.emit_error(ConnectionError::from(&err));
                    if !self.retry_allowed() {
                        self.teardown(None, &err.to_string());
                        return;
                    }
                },
            }

            if self.welcomed_once.load(Ordering::SeqCst) {
                self.set_state(ConnectionState::Reconnecting);
            }
        }
    }

    fn retry_allowed(&self) -> bool {
        if self.scheduler.lock().record_failure() {
            return true;
        }
        let max = self.options.auto_reconnect_attempts;
        if max > 0 {
            log::warn!("[relay-link] Max reconnection attempts ({}) reached", max);
            self.handlers.emit_error(ConnectionError::new(
                format!("Max reconnection attempts ({}) reached", max),
                false,
            ));
        }
        false
    }

    /// Open one transport, log in and pump inbound frames until the
    /// session ends.
    async fn run_session(
        self: &Arc<Self>,
        url: &str,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        log::debug!("[relay-link] Connecting to {}", url);
        let connect_timeout = self.options.connect_timeout();
        let opened = tokio::select! {
            biased;
            _ = shutdown_signalled(shutdown_rx) => return SessionEnd::Shutdown,
            opened = within(connect_timeout, self.connector.connect(url, &self.options)) => opened,
        };
        let (sink, mut stream) = match opened {
            Some(Ok(halves)) => halves,
            Some(Err(e)) => return SessionEnd::Failed(e),
            None => {
                return SessionEnd::Failed(RelayLinkError::TimeoutError(format!(
                    "Connection timeout ({:?})",
                    connect_timeout
                )));
            },
        };

        let session = Session::new(url, sink);
        self.install_session(&session);

        let login = {
            let info = self.session_info.read().clone();
            let client_id = info.client_id.as_deref().or(self.options.client_id.as_deref());
            codec::encode(&codec::login(&self.options, client_id, info.reconnect_token.as_deref()))
        };
        if let Err(e) = login.and_then(|text| self.enqueue_frame(text, None)) {
            self.end_session(&session, false).await;
            return SessionEnd::Failed(e);
        }

        let login_timeout = self.timeouts.login_timeout;
        let login_bounded = !RelayLinkTimeouts::is_no_timeout(login_timeout);
        let login_deadline = tokio::time::sleep(login_timeout);
        tokio::pin!(login_deadline);

        let end = loop {
            tokio::select! {
                biased;
                _ = shutdown_signalled(shutdown_rx) => break SessionEnd::Shutdown,
                _ = session.kill.notified() => {
                    break session.take_end().unwrap_or(SessionEnd::Closed {
                        code: Some(CLOSE_CODE_ABNORMAL),
                        reason: "session terminated".to_string(),
                    });
                }
                _ = &mut login_deadline, if login_bounded && !session.is_welcomed() => {
                    break SessionEnd::Failed(RelayLinkError::TimeoutError(format!(
                        "No WELCOME within {:?}",
                        login_timeout
                    )));
                }
                frame = stream.next_frame() => match frame {
                    Some(Ok(InboundFrame::Text(text))) => self.process_frame(&session, &text),
                    Some(Ok(InboundFrame::Closed { code, reason })) => {
                        break SessionEnd::Closed { code, reason };
                    },
                    Some(Err(e)) => {
                        break SessionEnd::Closed {
                            code: Some(CLOSE_CODE_ABNORMAL),
                            reason: e.to_string(),
                        };
                    },
                    None => {
                        break SessionEnd::Closed {
                            code: Some(CLOSE_CODE_ABNORMAL),
                            reason: "transport ended".to_string(),
                        };
                    },
                },
            }
        };

        let lost = matches!(end, SessionEnd::Closed { .. } | SessionEnd::Failed(_));
        self.end_session(&session, lost).await;
        end
    }

    fn install_session(self: &Arc<Self>, session: &Arc<Session>) {
        let _submit = self.submit_lock.lock();
        *self.session.lock() = Some(session.clone());
        self.restart_writer(session);
    }

    /// Drop whatever is queued and start a fresh writer on `session`.
    fn restart_writer(self: &Arc<Self>, session: &Arc<Session>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = writer::spawn_writer(self.clone(), session.clone(), rx);
        if let Some(previous) = self.writer.lock().replace(writer) {
            previous.abort();
        }
        *self.outbound.lock() = Some(tx);
    }

    /// Detach `session`. A `lost` session leaves `Connected` for
    /// `Reconnecting` right away so callers stop submitting into it.
    async fn end_session(&self, session: &Arc<Session>, lost: bool) {
        let transition = {
            let _submit = self.submit_lock.lock();
            *self.outbound.lock() = None;
            self.session.lock().take();
            if lost && self.state() == ConnectionState::Connected {
                self.transition(ConnectionState::Reconnecting)
            } else {
                None
            }
        };
        self.emit_transition(transition);

        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            writer.abort();
        }
        let closed = within(Duration::from_secs(1), async {
            session.sink.lock().await.close(CLOSE_CODE_NORMAL, "").await
        })
        .await;
        if let Some(Err(e)) = closed {
            log::debug!("[relay-link] Closing transport to {} failed: {}", session.url(), e);
        }
    }

    // ── Inbound dispatch ────────────────────────────────────────────────

    fn process_frame(self: &Arc<Self>, session: &Arc<Session>, text: &str) {
        let _process = self.process_lock.lock();
        self.handlers.emit_receive(text);

        let envelope = match codec::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("[relay-link] Dropping undecodable frame: {}", e);
                return;
            },
        };

        match envelope.op {
            op::HEARTBEAT => {
                if self.enqueue_frame(text.to_string(), None).is_err() {
                    log::debug!("[relay-link] Heartbeat echo dropped: writer gone");
                }
            },
            op::WELCOME => self.on_welcome(session, envelope),
            op::SUBSCRIBED => self.on_subscribed(envelope),
            op::UNSUBSCRIBED => self.on_unsubscribed(envelope),
            op::EVENT => self.on_event(envelope),
            op::ERROR => {
                let (code, reason) = envelope
                    .error()
                    .unwrap_or_else(|| (0, envelope.reason.clone().unwrap_or_default()));
                log::warn!("[relay-link] Server error {}: {}", code, reason);
                self.handlers.emit_error(ConnectionError::server(code, reason));
            },
            op::GOODBYE => {
                let (code, reason) = envelope
                    .error()
                    .unwrap_or_else(|| (0, envelope.reason.clone().unwrap_or_default()));
                let mut reason = if reason.is_empty() { "server goodbye".to_string() } else { reason };
                let close_code = u16::try_from(code).ok();
                if close_code.is_none() {
                    log::warn!("[relay-link] GOODBYE code {} is not a close code", code);
                    reason = format!("{} (code {})", reason, code);
                }
                session.terminate(SessionEnd::Goodbye {
                    code: close_code.filter(|c| *c != 0),
                    reason,
                });
            },
            op::ACK | op::MAP_RESPONSE => self.on_response(envelope),
            code if code == self.options.extended_op_codes.request_reply => self.on_response(envelope),
            other => log::debug!("[relay-link] Ignoring envelope with op {}", other),
        }
    }

    fn on_welcome(self: &Arc<Self>, session: &Arc<Session>, envelope: Envelope) {
        let resumed = envelope.resume.unwrap_or(false);
        let first = !self.welcomed_once.swap(true, Ordering::SeqCst);

        let (failed, transition) = {
            let _submit = self.submit_lock.lock();

            let info = {
                let mut info = self.session_info.write();
                let previous_client_id = info.client_id.take();
                *info = SessionInfo {
                    client_id: envelope
                        .client_id
                        .clone()
                        .or(previous_client_id)
                        .or_else(|| self.options.client_id.clone()),
                    reconnect_token: envelope.id_token.clone(),
                    protocol: envelope.protocol.unwrap_or(0),
                    qos: envelope.qos.unwrap_or(false),
                    max_size: envelope.max_size.unwrap_or(0),
                    resumed,
                };
                info.clone()
            };
            session.welcomed.store(true, Ordering::SeqCst);
            self.scheduler.lock().reset();

            let resubscribe = self.registry.prepare_resubscribe(resumed);
            if !resubscribe.is_empty() {
                log::info!("[relay-link] Re-subscribing {} subscription(s)", resubscribe.len());
            }
            for request in resubscribe {
                let envelope = codec::subscribe(
                    request.id,
                    request.matcher.as_deref(),
                    request.durable.as_deref(),
                    request.ack_mode,
                    request.last_seq,
                );
                if let Err(e) = self.enqueue_envelope(&envelope) {
                    log::warn!("[relay-link] Failed to re-subscribe {}: {}", request.id, e);
                }
            }

            let failed = if resumed {
                let pending = self.index.snapshot();
                if !pending.is_empty() {
                    log::info!("[relay-link] Resending {} pending request(s)", pending.len());
                }
                for entry in pending {
                    let completes = (entry.completes_on_write() && !info.qos).then_some(entry.seq);
                    if let Err(e) = self.enqueue_frame(entry.envelope, completes) {
                        log::warn!("[relay-link] Failed to resend seq {}: {}", entry.seq, e);
                    }
                }
                Vec::new()
            } else {
                self.index.drain()
            };

            (failed, self.transition(ConnectionState::Connected))
        };

        log::info!(
            "[relay-link] Connected to {} (protocol={}, resumed={})",
            session.url(),
            envelope.protocol.unwrap_or(0),
            resumed
        );
        self.emit_transition(transition);

        if !failed.is_empty() {
            let err = RelayLinkError::closed(None, "session not resumed");
            for entry in failed {
                self.finish(entry, Err(err.clone()));
            }
        }

        self.resolve_ready(Ok(()));
        if first {
            self.handlers.emit_connect();
        } else {
            self.handlers.emit_reconnect();
        }
    }

    fn on_subscribed(&self, envelope: Envelope) {
        let Some(id) = envelope.subscription_id() else {
            log::warn!("[relay-link] SUBSCRIBED without subscription id");
            return;
        };
        match self.registry.confirm(id) {
            Some(listener) => {
                log::debug!("[relay-link] Subscription {} confirmed", id);
                invoke_guarded("on_subscribe", || listener.on_subscribe(id));
            },
            None => log::debug!("[relay-link] SUBSCRIBED for unknown subscription {}", id),
        }
    }

    fn on_unsubscribed(&self, envelope: Envelope) {
        let Some(id) = envelope.subscription_id() else {
            log::warn!("[relay-link] UNSUBSCRIBED without subscription id");
            return;
        };
        // Without an error code the server dropped the subscription on its
        // own; treat it as retryable so it is re-issued on the next WELCOME.
        let (code, reason) = envelope.error().unwrap_or_else(|| {
            let reason = envelope.reason.clone().unwrap_or_default();
            (0, if reason.is_empty() { "unsubscribed by server".to_string() } else { reason })
        });

        let retryable = !(400..500).contains(&code);
        log::warn!(
            "[relay-link] Subscription {} rejected ({}: {}); retryable={}",
            id,
            code,
            reason,
            retryable
        );
        let listener = if retryable {
            self.registry.mark_pending(id)
        } else {
            self.registry.remove(id)
        };
        if let Some(listener) = listener {
            let err = RelayLinkError::ServerError { code, reason };
            invoke_guarded("subscription on_error", || listener.on_error(id, &err));
        }
    }

    fn on_event(&self, envelope: Envelope) {
        let Some(id) = envelope.subscription_id() else {
            log::warn!("[relay-link] EVENT without destination");
            return;
        };
        let seq = envelope.seq;
        if self.state() == ConnectionState::Disconnecting {
            // Anything queued now lands behind DISCONNECT and is never written.
            log::debug!("[relay-link] Dropping EVENT seq {:?} on {} while disconnecting", seq, id);
            return;
        }

        match self.registry.offer(id, seq) {
            Delivery::Accept { listener, ack_mode } => {
                let message = Message::from_envelope(envelope);
                invoke_guarded("on_messages", || {
                    listener.on_messages(id, std::slice::from_ref(&message))
                });
                if let (AckMode::Auto, Some(seq)) = (ack_mode, seq) {
                    self.registry.advance(id, seq);
                    self.send_ack(seq);
                }
            },
            Delivery::Duplicate { last_seq, ack_mode } => {
                log::debug!(
                    "[relay-link] Dropping redelivery of seq {:?} on {} (last seen {})",
                    seq,
                    id,
                    last_seq
                );
                // Our earlier ACK may have been lost; repeat it.
                if let (AckMode::Auto, Some(seq)) = (ack_mode, seq) {
                    self.send_ack(seq);
                }
            },
            Delivery::Unknown => log::debug!("[relay-link] EVENT for unknown subscription {}", id),
        }
    }

    fn send_ack(&self, seq: u64) {
        if let Err(e) = self.enqueue_envelope(&codec::ack(seq, None)) {
            log::debug!("[relay-link] ACK for seq {} not queued: {}", seq, e);
        }
    }

    /// ACK, request reply and MAP_RESPONSE all resolve a pending entry.
    fn on_response(&self, envelope: Envelope) {
        let Some(seq) = envelope.seq else {
            log::debug!("[relay-link] Response op {} without seq", envelope.op);
            return;
        };
        let error = envelope.error();

        // A request is acknowledged on receipt; only its reply resolves it.
        if envelope.op == op::ACK && error.is_none() {
            if let Some(PendingKind::SendRequest { .. }) = self.index.get(seq).map(|e| e.kind) {
                log::debug!("[relay-link] Request seq {} accepted by server", seq);
                return;
            }
        }

        let Some(entry) = self.index.remove(seq) else {
            log::debug!("[relay-link] No pending request for seq {}", seq);
            return;
        };

        let outcome = match error {
            Some((code, reason)) => Err(RelayLinkError::ServerError { code, reason }),
            None => Ok(match &entry.kind {
                PendingKind::Publish { message } => Completion::Published(message.clone()),
                PendingKind::SendReply { reply } => Completion::ReplySent(reply.clone()),
                PendingKind::SendRequest { .. } => Completion::Reply(Message::from_envelope(envelope)),
                PendingKind::MapOperation { map, key } => Completion::Map {
                    map: map.clone(),
                    key: key.clone(),
                    value: envelope.value,
                },
            }),
        };
        self.finish(entry, outcome);
    }
}
