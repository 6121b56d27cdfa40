pub mod trade_feed;
