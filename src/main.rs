use trade_feed_lib::logging::{init_tracing, json_logs_from_env};

#[tokio::main]
async fn main() {
    init_tracing(json_logs_from_env());

    if let Err(error) = trade_feed_lib::run().await {
        tracing::error!(error = %error, "trade feed exited with an error");
        std::process::exit(1);
    }
}
