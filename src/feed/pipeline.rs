use crate::feed::session::{FeedCommand, FeedSession};
use crate::feed::transport::{FeedTransport, SignalReceiver};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub async fn run_trade_feed<T: FeedTransport>(
    mut session: FeedSession<T>,
    mut signals: SignalReceiver,
    mut commands: mpsc::UnboundedReceiver<FeedCommand>,
    cancel_token: CancellationToken,
) {
    session.start(Instant::now());

    loop {
        let deadline = session.next_deadline();
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            Some(command) = commands.recv() => {
                debug!(?command, "trade feed command");
                session.handle_command(command);
            }
            Some(signal) = signals.recv() => {
                session.handle_signal(signal, Instant::now());
            }
            _ = sleep_until_deadline(deadline) => {
                session.fire_due_timers(Instant::now());
            }
        }
    }

    session.shutdown();
    info!(url = %session.config().url, "trade feed task finished");
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
