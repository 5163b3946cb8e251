pub mod types;
pub mod config;
pub mod data;
pub mod storage;
pub mod source;
pub mod store;
pub mod render;
pub mod series;
pub mod export;
pub mod session;
pub mod server;
