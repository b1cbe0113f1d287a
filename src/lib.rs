//! Cosmos Hub adapter for workflow automation: chain queries over LCD and
//! consensus RPC, signed transactions, and a live event subscription.

pub mod address;
pub mod amount;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod filter;
pub mod ibc;
pub mod metrics;
pub mod msg;
pub mod network;
pub mod subscription;

pub use error::{Error, Result};
