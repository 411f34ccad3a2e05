//! Application-wide state and error types for pitcaller

mod pit_stop;

pub use pit_stop::*;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::String;
use thiserror_no_std::Error;

use crate::broadcaster::{BroadcastError, ClientId};
use crate::config::ConfigError;
use crate::protocol::EncodeError;
use crate::websocket::MAX_INBOUND_PAYLOAD;

/// Depth of the transport → event loop queue
pub const BUS_CAPACITY: usize = 8;

/// Text of one inbound push-channel frame
pub type InboundText = String<MAX_INBOUND_PAYLOAD>;

/// Transport events delivered to the event loop
#[derive(Debug)]
pub enum BusEvent<C> {
    /// A client finished the push-channel handshake
    Connected(C),
    /// A client's connection closed
    Disconnected(ClientId),
    /// A client sent a text frame
    Message(ClientId, InboundText),
}

/// Queue carrying [`BusEvent`]s from the transport tasks to the single event loop task
pub type BusChannel<C> = Channel<CriticalSectionRawMutex, BusEvent<C>, BUS_CAPACITY>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppRunState {
    Booting,
    /// Scan, join or fallback; the bootstrap logs its own steps
    Bootstrapping,
    /// Network is up, waiting for the interface address
    AwaitingAddress,
    Running,
    Halted,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Network bootstrap failed: {0}")]
    Bootstrap(String<64>),
    #[error("Invalid configuration: {0}")]
    Config(ConfigError),
    #[error("Failed to encode message: {0}")]
    Encode(EncodeError),
    #[error("Client rejected: {0}")]
    Client(BroadcastError),
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<EncodeError> for AppError {
    fn from(e: EncodeError) -> Self {
        Self::Encode(e)
    }
}

impl From<BroadcastError> for AppError {
    fn from(e: BroadcastError) -> Self {
        Self::Client(e)
    }
}

/// Build a bounded error message, truncating what does not fit
pub fn error_message<const N: usize>(args: core::fmt::Arguments<'_>) -> String<N> {
    struct Truncating<'a, const N: usize>(&'a mut String<N>);

    impl<const N: usize> core::fmt::Write for Truncating<'_, N> {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            for c in s.chars() {
                if self.0.push(c).is_err() {
                    break;
                }
            }
            Ok(())
        }
    }

    let mut message = String::new();
    let _ = core::fmt::write(&mut Truncating(&mut message), args);
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_truncates() {
        let message: String<8> = error_message(format_args!("scan failed: {}", 42));
        assert_eq!(message.as_str(), "scan fai");

        let message: String<64> = error_message(format_args!("scan failed: {}", 42));
        assert_eq!(message.as_str(), "scan failed: 42");
    }

    #[test]
    fn test_app_error_display() {
        let error = AppError::from(ConfigError::ZeroCountdown);
        assert_eq!(
            alloc::format!("{}", error),
            "Invalid configuration: countdown length must be at least one second"
        );
    }
}
