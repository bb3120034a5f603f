//! Real-time team notification hub.
//!
//! Clients hold a WebSocket per (team, user). Backends push notifications
//! over `POST /send`, which fan out through the [`websocket::ConnectionRegistry`].

pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod websocket;
