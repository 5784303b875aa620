//! Forgewatch - Real-Time Machine Telemetry Pipeline
//!
//! Library surface of the server binary: the CLI, the HTTP/WebSocket
//! gateway, and the wiring that runs the whole pipeline.

#![forbid(unsafe_code)]

pub mod cli;
pub mod server;
pub mod websocket;
