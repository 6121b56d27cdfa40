use crate::error::AppError;
use crate::feed::transport::{ChannelId, ChannelSignals, FeedTransport};
use crate::feed::types::ABNORMAL_CLOSURE_CODE;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

const BINANCE_STREAM_BASE_URL: &str = "wss://stream.binance.com:9443/ws";
pub const DEFAULT_TRADE_STREAM_URL: &str = "wss://stream.binance.com:9443/ws/bnbusdt@trade";
const NO_STATUS_RECEIVED_CODE: u16 = 1005;

pub type BinanceWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn trade_stream_endpoint(symbol: &str) -> String {
    format!(
        "{BINANCE_STREAM_BASE_URL}/{}@trade",
        symbol.to_ascii_lowercase()
    )
}

pub async fn connect_trade_stream(url: &str) -> Result<BinanceWsStream, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(64 << 20),
        max_frame_size: Some(16 << 20),
        ..Default::default()
    };

    let (stream, _) = connect_async_with_config(url, Some(ws_config), true).await?;
    Ok(stream)
}

#[derive(Debug)]
enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Debug)]
struct ChannelHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
}

#[derive(Debug, Default)]
pub struct WebSocketTransport {
    channels: HashMap<ChannelId, ChannelHandle>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_channels(&self) -> usize {
        self.channels
            .values()
            .filter(|handle| !handle.task.is_finished())
            .count()
    }

    fn prune_finished(&mut self) {
        self.channels.retain(|_, handle| !handle.task.is_finished());
    }
}

impl FeedTransport for WebSocketTransport {
    fn open(
        &mut self,
        channel: ChannelId,
        url: &str,
        signals: ChannelSignals,
    ) -> Result<(), AppError> {
        self.prune_finished();
        if self.channels.contains_key(&channel) {
            return Err(AppError::InvalidArgument(format!(
                "channel {channel} is already open"
            )));
        }

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(drive_channel(url.to_string(), outbound_rx, signals));
        self.channels.insert(channel, ChannelHandle { outbound, task });
        Ok(())
    }

    fn send(&mut self, channel: ChannelId, payload: String) -> Result<(), AppError> {
        let handle = self
            .channels
            .get(&channel)
            .ok_or(AppError::ChannelNotFound(channel))?;
        handle
            .outbound
            .send(Outbound::Text(payload))
            .map_err(|_| AppError::ChannelClosed(channel))
    }

    fn close(&mut self, channel: ChannelId, code: u16, reason: &str) {
        let Some(handle) = self.channels.remove(&channel) else {
            return;
        };
        let request = Outbound::Close {
            code,
            reason: reason.to_string(),
        };
        if handle.outbound.send(request).is_err() {
            handle.task.abort();
        }
    }
}

async fn drive_channel(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    signals: ChannelSignals,
) {
    let channel = signals.channel();
    let websocket = tokio::select! {
        connected = connect_trade_stream(&url) => match connected {
            Ok(websocket) => websocket,
            Err(error) => {
                warn!(%channel, url = %url, error = %error, "websocket connect failed");
                signals.error(error.to_string());
                signals.closed(ABNORMAL_CLOSURE_CODE, "connect failed");
                return;
            }
        },
        request = outbound.recv() => {
            if let Some(Outbound::Close { code, reason }) = request {
                signals.closed(code, reason);
            }
            return;
        }
    };

    signals.opened();
    let (mut sink, mut stream) = websocket.split();

    loop {
        tokio::select! {
            request = outbound.recv() => match request {
                Some(Outbound::Text(payload)) => {
                    if let Err(error) = sink.send(Message::Text(payload)).await {
                        warn!(%channel, error = %error, "websocket send failed");
                        signals.error(error.to_string());
                        signals.closed(ABNORMAL_CLOSURE_CODE, "send failed");
                        return;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if let Err(error) = sink.send(Message::Close(Some(frame))).await {
                        debug!(%channel, error = %error, "close frame not delivered");
                    }
                    signals.closed(code, reason);
                    return;
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => signals.message(text.into_bytes()),
                Some(Ok(Message::Binary(payload))) => signals.message(payload),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|frame| (u16::from(frame.code), frame.reason.into_owned()))
                        .unwrap_or((NO_STATUS_RECEIVED_CODE, String::new()));
                    signals.closed(code, reason);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    warn!(%channel, error = %error, "websocket read error");
                    signals.error(error.to_string());
                    signals.closed(ABNORMAL_CLOSURE_CODE, "read error");
                    return;
                }
                None => {
                    signals.closed(ABNORMAL_CLOSURE_CODE, "stream ended");
                    return;
                }
            }
        }
    }
}
