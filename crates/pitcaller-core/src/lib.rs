//! Hardware-independent core library for pitcaller
//!
//! This crate contains all platform-agnostic logic for the pitcaller lane
//! signaling device: lane state and countdowns, switch polling, the push
//! channel protocol and its HTTP/WebSocket framing, client fan-out, and the
//! Wi-Fi bootstrap state machine.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32-S3) and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod app_state;
pub mod broadcaster;
pub mod config;
pub mod http;
pub mod lanes;
pub mod network;
pub mod protocol;
pub mod switches;
pub mod websocket;
