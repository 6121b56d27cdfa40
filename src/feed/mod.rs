pub mod backoff;
pub mod binance;
pub mod heartbeat;
pub mod history;
pub mod parser;
pub mod pipeline;
pub mod session;
pub mod transport;
pub mod types;
