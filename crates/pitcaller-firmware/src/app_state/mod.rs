//! Firmware-specific application state extensions
//!
//! Re-exports the hardware-independent app state from `pitcaller_core` and
//! adds ESP32-specific lane input setup.

mod hardware;

pub use hardware::*;

// Re-export all shared app state types from pitcaller-core
pub use pitcaller_core::app_state::*;
