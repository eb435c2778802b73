// Platform-agnostic pieces live in deskcore and are re-exported here
pub use deskcore::{buffer_json, channel, creds, crypto, jid, keys, media, poll};

pub mod auth;
pub mod config;
pub mod connection;
pub mod poller;
pub mod realtime;
pub mod send;
pub mod settings;
pub mod store;
pub mod sweeper;
pub mod upload;
