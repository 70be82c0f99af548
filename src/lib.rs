pub mod account;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod events;
pub mod storage;
