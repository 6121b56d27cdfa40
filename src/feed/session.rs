use crate::feed::backoff::BackoffPolicy;
use crate::feed::heartbeat::{ping_payload, HeartbeatScheduler};
use crate::feed::history::HistoryBuffer;
use crate::feed::parser::parse_trade_payload;
use crate::feed::transport::{
    ChannelEvent, ChannelId, ChannelSignal, ChannelSignals, FeedTransport, SignalSender,
};
use crate::feed::types::{
    ConnectionState, TradeFeedConfig, TradeFeedSnapshot, ABNORMAL_CLOSURE_CODE,
    NORMAL_CLOSURE_CODE,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

const SHUTDOWN_REASON: &str = "session shut down";
const PEER_CLOSED_REASON: &str = "closed by peer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedCommand {
    ClearHistory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReconnect {
    pub due: Instant,
    pub delay: Duration,
    pub attempt: u32,
}

#[derive(Debug, Clone)]
pub struct FeedPublisher {
    sender: Arc<watch::Sender<TradeFeedSnapshot>>,
}

impl FeedPublisher {
    pub fn new(initial: TradeFeedSnapshot) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TradeFeedSnapshot> {
        self.sender.subscribe()
    }

    pub fn publish(&self, snapshot: TradeFeedSnapshot) {
        self.sender.send_replace(snapshot);
    }

    pub fn latest(&self) -> TradeFeedSnapshot {
        self.sender.borrow().clone()
    }

    pub fn clear_trades(&self) {
        self.sender.send_modify(|snapshot| snapshot.trades.clear());
    }
}

pub struct FeedSession<T: FeedTransport> {
    config: TradeFeedConfig,
    backoff: BackoffPolicy,
    transport: T,
    signals: SignalSender,
    publisher: FeedPublisher,
    state: ConnectionState,
    started: bool,
    reconnect_attempts: u32,
    channel: Option<ChannelId>,
    last_channel_id: u64,
    heartbeat: Option<HeartbeatScheduler>,
    pending_reconnect: Option<PendingReconnect>,
    history: HistoryBuffer,
    reason: Option<String>,
}

impl<T: FeedTransport> FeedSession<T> {
    pub fn new(
        config: TradeFeedConfig,
        transport: T,
        signals: SignalSender,
        publisher: FeedPublisher,
    ) -> Self {
        Self {
            backoff: config.backoff_policy(),
            config,
            transport,
            signals,
            publisher,
            state: ConnectionState::Connecting,
            started: false,
            reconnect_attempts: 0,
            channel: None,
            last_channel_id: 0,
            heartbeat: None,
            pending_reconnect: None,
            history: HistoryBuffer::default(),
            reason: None,
        }
    }

    pub fn start(&mut self, now: Instant) {
        if self.started || self.state == ConnectionState::Closed {
            return;
        }
        self.started = true;
        info!(url = %self.config.url, "starting trade feed session");
        self.open_channel(now);
    }

    pub fn handle_signal(&mut self, signal: ChannelSignal, now: Instant) {
        if self.state == ConnectionState::Closed {
            trace!(channel = %signal.channel, "session closed, dropping signal");
            return;
        }
        if self.channel != Some(signal.channel) {
            debug!(channel = %signal.channel, "ignoring signal from stale channel");
            return;
        }

        match signal.event {
            ChannelEvent::Opened => self.on_open(signal.channel, now),
            ChannelEvent::Message(payload) => self.on_message(payload),
            ChannelEvent::Error(info) => self.on_error(signal.channel, info),
            ChannelEvent::Closed { code, reason } => {
                self.on_close(signal.channel, code, reason, now)
            }
        }
    }

    pub fn handle_command(&mut self, command: FeedCommand) {
        match command {
            FeedCommand::ClearHistory => self.clear_history(),
        }
    }

    pub fn fire_due_timers(&mut self, now: Instant) {
        if self.state == ConnectionState::Closed {
            return;
        }

        if self
            .pending_reconnect
            .is_some_and(|pending| pending.due <= now)
        {
            if let Some(pending) = self.pending_reconnect.take() {
                info!(attempt = pending.attempt, "reconnecting trade feed");
            }
            self.open_channel(now);
        }

        if self
            .heartbeat
            .as_ref()
            .is_some_and(|heartbeat| heartbeat.is_due(now))
        {
            self.send_heartbeat(now);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let heartbeat = self.heartbeat.as_ref().map(HeartbeatScheduler::next_due);
        let reconnect = self.pending_reconnect.map(|pending| pending.due);
        match (heartbeat, reconnect) {
            (Some(heartbeat), Some(reconnect)) => Some(heartbeat.min(reconnect)),
            (heartbeat, reconnect) => heartbeat.or(reconnect),
        }
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        self.publish();
    }

    pub fn shutdown(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }

        self.heartbeat = None;
        self.pending_reconnect = None;
        if let Some(channel) = self.channel.take() {
            self.transport
                .close(channel, NORMAL_CLOSURE_CODE, SHUTDOWN_REASON);
        }
        self.history.clear();
        info!(url = %self.config.url, "trade feed session shut down");
        self.transition(ConnectionState::Closed, Some(SHUTDOWN_REASON.to_string()));
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn status(&self) -> String {
        self.state.status_label()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn current_channel(&self) -> Option<ChannelId> {
        self.channel
    }

    pub fn heartbeat(&self) -> Option<&HeartbeatScheduler> {
        self.heartbeat.as_ref()
    }

    pub fn pending_reconnect(&self) -> Option<PendingReconnect> {
        self.pending_reconnect
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn config(&self) -> &TradeFeedConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn snapshot(&self) -> TradeFeedSnapshot {
        TradeFeedSnapshot {
            state: self.state,
            status: self.state.status_label(),
            url: self.config.url.clone(),
            reconnect_attempts: self.reconnect_attempts,
            reason: self.reason.clone(),
            trades: self.history.to_vec(),
        }
    }

    fn open_channel(&mut self, now: Instant) {
        debug_assert!(self.channel.is_none(), "previous channel still attached");
        self.last_channel_id = self.last_channel_id.saturating_add(1);
        let channel = ChannelId(self.last_channel_id);
        self.channel = Some(channel);
        self.transition(ConnectionState::Connecting, None);

        debug!(%channel, url = %self.config.url, "opening channel");
        let signals = ChannelSignals::new(channel, self.signals.clone());
        if let Err(error) = self.transport.open(channel, &self.config.url, signals) {
            warn!(%channel, error = %error, "channel could not be opened");
            self.on_error(channel, error.to_string());
            self.on_close(channel, ABNORMAL_CLOSURE_CODE, "open failed".to_string(), now);
        }
    }

    fn on_open(&mut self, channel: ChannelId, now: Instant) {
        if self.state == ConnectionState::Connected {
            return;
        }

        self.reconnect_attempts = 0;
        self.heartbeat = Some(HeartbeatScheduler::start(
            self.config.heartbeat_interval(),
            now,
        ));
        info!(%channel, url = %self.config.url, "trade feed connected");
        self.transition(ConnectionState::Connected, None);
    }

    fn on_message(&mut self, mut payload: Vec<u8>) {
        match parse_trade_payload(&mut payload, Utc::now()) {
            Ok(Some(event)) => {
                self.history.push(event);
                self.publish();
            }
            Ok(None) => trace!("discarding non-trade frame"),
            Err(error) => debug!(error = %error, "discarding malformed payload"),
        }
    }

    fn on_error(&mut self, channel: ChannelId, info: String) {
        self.heartbeat = None;
        warn!(%channel, error = %info, "trade feed channel error");
        self.transition(ConnectionState::Errored, Some(info));
    }

    fn on_close(&mut self, channel: ChannelId, code: u16, reason: String, now: Instant) {
        self.heartbeat = None;
        self.channel = None;

        // 1000 is a deliberate closure; only abnormal codes reconnect.
        if code == NORMAL_CLOSURE_CODE {
            self.pending_reconnect = None;
            info!(%channel, code, reason = %reason, "trade feed closed by peer");
            self.transition(ConnectionState::Closed, Some(PEER_CLOSED_REASON.to_string()));
            return;
        }

        let delay = self.backoff.delay_for(self.reconnect_attempts);
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        let attempt = self.reconnect_attempts;
        self.pending_reconnect = Some(PendingReconnect {
            due: now + delay,
            delay,
            attempt,
        });

        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        warn!(%channel, code, reason = %reason, "trade feed closed abnormally");
        info!(attempt, delay_ms, "reconnect scheduled");

        let reason = if reason.is_empty() {
            format!("closed with code {code}")
        } else {
            format!("closed with code {code}: {reason}")
        };
        self.transition(ConnectionState::Reconnecting { attempt, delay_ms }, Some(reason));
    }

    fn send_heartbeat(&mut self, now: Instant) {
        let Some(channel) = self.channel else {
            self.heartbeat = None;
            return;
        };
        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.advance(now);
        }

        let payload = match ping_payload(&self.config.heartbeat_key, Utc::now().timestamp_millis())
        {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%channel, error = %error, "failed to build heartbeat payload");
                return;
            }
        };

        match self.transport.send(channel, payload) {
            Ok(()) => debug!(%channel, "heartbeat sent"),
            Err(error) => {
                warn!(%channel, error = %error, "heartbeat send failed");
                self.on_error(channel, error.to_string());
            }
        }
    }

    fn transition(&mut self, state: ConnectionState, reason: Option<String>) {
        self.state = state;
        self.reason = reason;
        self.publish();
    }

    fn publish(&self) {
        self.publisher.publish(self.snapshot());
    }
}

impl<T: FeedTransport> Drop for FeedSession<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
