pub mod commands;
pub mod error;
pub mod feed;
pub mod logging;
pub mod state;

use commands::trade_feed::{start_trade_feed, stop_trade_feed, subscribe_trade_feed};
use error::AppError;
use feed::types::{StartTradeFeedArgs, TradeEvent, TradeFeedSnapshot};
use state::AppState;
use tracing::{info, warn};

pub async fn run() -> Result<(), AppError> {
    let state = AppState::new();
    let args = StartTradeFeedArgs::from_env()?;
    let session = start_trade_feed(&state, Some(args)).await?;
    info!(
        url = %session.url,
        heartbeat_interval_ms = session.heartbeat_interval_ms,
        "trade feed started"
    );

    let mut updates = subscribe_trade_feed(&state);
    let mut last_status = String::new();
    let mut last_trade: Option<TradeEvent> = None;

    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);

    let outcome = loop {
        tokio::select! {
            signal = &mut shutdown_signal => {
                if let Err(error) = &signal {
                    warn!(error = %error, "failed to listen for ctrl-c");
                }
                break signal.map_err(AppError::from);
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let snapshot = updates.borrow_and_update().clone();
                log_snapshot(&snapshot, &mut last_status, &mut last_trade);
            }
        }
    };

    let result = stop_trade_feed(&state).await?;
    info!(stopped = result.stopped, "trade feed stopped");
    outcome
}

fn log_snapshot(
    snapshot: &TradeFeedSnapshot,
    last_status: &mut String,
    last_trade: &mut Option<TradeEvent>,
) {
    if snapshot.status != *last_status {
        info!(
            status = %snapshot.status,
            reason = snapshot.reason.as_deref().unwrap_or(""),
            attempts = snapshot.reconnect_attempts,
            "trade feed status"
        );
        last_status.clone_from(&snapshot.status);
    }

    let latest = snapshot.trades.first();
    if latest.is_some() && latest != last_trade.as_ref() {
        if let Some(trade) = latest {
            info!(
                trade = trade.display_text(),
                buffered = snapshot.trade_count(),
                "trade"
            );
        }
        *last_trade = latest.cloned();
    }
}
