use crate::error::AppError;
use crate::feed::binance::WebSocketTransport;
use crate::feed::pipeline::run_trade_feed;
use crate::feed::session::{FeedCommand, FeedSession};
use crate::feed::transport::{signal_channel, FeedTransport};
use crate::feed::types::{
    StartTradeFeedArgs, TradeFeedConfig, TradeFeedSession, TradeFeedSnapshot, TradeFeedStopResult,
};
use crate::state::{AppState, TradeFeedHandle};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

const STOPPED_BY_COMMAND_REASON: &str = "stream stopped by command";

pub async fn start_trade_feed(
    state: &AppState,
    args: Option<StartTradeFeedArgs>,
) -> Result<TradeFeedSession, AppError> {
    let config = args.unwrap_or_default().normalize()?;
    start_trade_feed_with(state, config, WebSocketTransport::new()).await
}

pub async fn start_trade_feed_with<T>(
    state: &AppState,
    config: TradeFeedConfig,
    transport: T,
) -> Result<TradeFeedSession, AppError>
where
    T: FeedTransport + Send + 'static,
{
    // The slot stays locked until the new handle is stored.
    let mut feed_slot = state.trade_feed.lock().await;
    if let Some(handle) = feed_slot.take() {
        info!("replacing running trade feed");
        handle.cancellation_token.cancel();
        let _ = handle.join_handle.await;
    }

    let cancellation_token = CancellationToken::new();
    let task_token = cancellation_token.clone();
    let (signal_tx, signal_rx) = signal_channel();
    let (commands, command_rx) = mpsc::unbounded_channel();
    let session = FeedSession::new(
        config.clone(),
        transport,
        signal_tx,
        state.publisher.clone(),
    );

    let join_handle = tokio::spawn(async move {
        run_trade_feed(session, signal_rx, command_rx, task_token).await;
    });

    *feed_slot = Some(TradeFeedHandle {
        cancellation_token,
        commands,
        join_handle,
    });

    Ok(TradeFeedSession::from_config(&config))
}

pub async fn stop_trade_feed(state: &AppState) -> Result<TradeFeedStopResult, AppError> {
    let mut feed_slot = state.trade_feed.lock().await;
    let stopped = if let Some(handle) = feed_slot.take() {
        handle.cancellation_token.cancel();
        let _ = handle.join_handle.await;
        true
    } else {
        false
    };

    let url = state.publisher.latest().url;
    state.publisher.publish(TradeFeedSnapshot::stopped(
        url,
        Some(STOPPED_BY_COMMAND_REASON.to_string()),
    ));

    Ok(TradeFeedStopResult { stopped })
}

pub async fn trade_feed_status(state: &AppState) -> Result<TradeFeedSnapshot, AppError> {
    Ok(state.publisher.latest())
}

pub fn subscribe_trade_feed(state: &AppState) -> watch::Receiver<TradeFeedSnapshot> {
    state.publisher.subscribe()
}

pub async fn clear_trade_history(state: &AppState) -> Result<(), AppError> {
    let feed_slot = state.trade_feed.lock().await;
    let routed = feed_slot
        .as_ref()
        .is_some_and(|handle| handle.commands.send(FeedCommand::ClearHistory).is_ok());
    if !routed {
        state.publisher.clear_trades();
    }
    Ok(())
}
