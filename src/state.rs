use crate::feed::binance::DEFAULT_TRADE_STREAM_URL;
use crate::feed::session::{FeedCommand, FeedPublisher};
use crate::feed::types::TradeFeedSnapshot;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct TradeFeedHandle {
    pub cancellation_token: CancellationToken,
    pub commands: mpsc::UnboundedSender<FeedCommand>,
    pub join_handle: JoinHandle<()>,
}

pub struct AppState {
    pub trade_feed: Mutex<Option<TradeFeedHandle>>,
    pub publisher: FeedPublisher,
}

impl AppState {
    pub fn new() -> Self {
        let snapshot = TradeFeedSnapshot::stopped(
            DEFAULT_TRADE_STREAM_URL.to_string(),
            Some("stream idle".to_string()),
        );

        Self {
            trade_feed: Mutex::new(None),
            publisher: FeedPublisher::new(snapshot),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
