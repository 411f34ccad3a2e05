//! ESP32-S3 firmware-specific modules for pitcaller
//!
//! This crate contains hardware-specific code that cannot compile on desktop
//! targets: GPIO lane inputs, the esp-radio Wi-Fi adapter, embassy-net
//! connection tasks, DHCP and mDNS services, and build-time Wi-Fi credential
//! management.

#![no_std]

extern crate alloc;

pub mod app_state;
pub mod discovery;
pub mod radio;
pub mod server;
pub mod wifi_secrets;
