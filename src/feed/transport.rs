use crate::error::AppError;
use std::fmt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Message(Vec<u8>),
    Error(String),
    Closed { code: u16, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSignal {
    pub channel: ChannelId,
    pub event: ChannelEvent,
}

pub type SignalSender = mpsc::UnboundedSender<ChannelSignal>;
pub type SignalReceiver = mpsc::UnboundedReceiver<ChannelSignal>;

pub fn signal_channel() -> (SignalSender, SignalReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone)]
pub struct ChannelSignals {
    channel: ChannelId,
    sender: SignalSender,
}

impl ChannelSignals {
    pub fn new(channel: ChannelId, sender: SignalSender) -> Self {
        Self { channel, sender }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn opened(&self) {
        self.emit(ChannelEvent::Opened);
    }

    pub fn message(&self, payload: Vec<u8>) {
        self.emit(ChannelEvent::Message(payload));
    }

    pub fn error(&self, info: impl Into<String>) {
        self.emit(ChannelEvent::Error(info.into()));
    }

    pub fn closed(&self, code: u16, reason: impl Into<String>) {
        self.emit(ChannelEvent::Closed {
            code,
            reason: reason.into(),
        });
    }

    fn emit(&self, event: ChannelEvent) {
        // Fails only once the session loop is gone.
        let _ = self.sender.send(ChannelSignal {
            channel: self.channel,
            event,
        });
    }
}

pub trait FeedTransport {
    fn open(&mut self, channel: ChannelId, url: &str, signals: ChannelSignals)
        -> Result<(), AppError>;

    fn send(&mut self, channel: ChannelId, payload: String) -> Result<(), AppError>;

    fn close(&mut self, channel: ChannelId, code: u16, reason: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_are_tagged_with_their_channel() {
        let (sender, mut receiver) = signal_channel();
        let signals = ChannelSignals::new(ChannelId(7), sender);

        signals.opened();
        signals.message(b"{}".to_vec());
        signals.closed(1006, "gone");

        let received: Vec<ChannelSignal> = std::iter::from_fn(|| receiver.try_recv().ok()).collect();
        assert_eq!(received.len(), 3);
        assert!(received.iter().all(|signal| signal.channel == ChannelId(7)));
        assert_eq!(received[0].event, ChannelEvent::Opened);
        assert_eq!(
            received[2].event,
            ChannelEvent::Closed {
                code: 1006,
                reason: "gone".to_string()
            }
        );
    }

    #[test]
    fn emitting_after_receiver_drop_is_silent() {
        let (sender, receiver) = signal_channel();
        drop(receiver);
        let signals = ChannelSignals::new(ChannelId(1), sender);
        signals.error("late");
    }
}
