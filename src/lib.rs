pub mod types;
pub mod error;
pub mod score;
pub mod aggregator;
pub mod topology;
pub mod store;
pub mod events;
pub mod bracket;
pub mod tournament;
pub mod config;
pub mod server;
