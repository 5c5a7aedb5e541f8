//! WebSocket gateway binary, split into a library so integration tests
//! can drive the connection pump without a real TCP listener.

pub mod commands;
pub mod config;
pub mod connection;
pub mod messages;
pub mod state;
pub mod streaming;
