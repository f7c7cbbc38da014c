//! `WebSocket` gateway.

pub mod connection;
pub mod gateway;
pub mod handler;
pub mod session;
