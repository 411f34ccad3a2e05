//! Device configuration
//!
//! Everything here is fixed at build time. Wi-Fi secrets come from the
//! environment of the firmware build (see the firmware's `build.rs`) and are
//! parsed with [`parse_known_networks`].

use core::str::FromStr;

use heapless::{String, Vec};
use thiserror_no_std::Error;

use crate::switches::ActiveLevel;

/// Maximum SSID length defined by 802.11
pub const SSID_CAPACITY: usize = 32;
/// Maximum WPA2 passphrase length
pub const PASSWORD_CAPACITY: usize = 64;
/// Minimum WPA2 passphrase length
pub const MIN_AP_PASSWORD_LEN: usize = 8;
/// Maximum number of known networks
pub const MAX_KNOWN_NETWORKS: usize = 8;

pub const DEFAULT_HOSTNAME: &str = "pitcaller";
pub const DEFAULT_AP_SSID: &str = "pitcaller";
pub const DEFAULT_AP_PASSWORD: &str = "pitstop1234";
pub const DEFAULT_COUNTDOWN_SECS: u16 = 3;

pub type Ssid = String<SSID_CAPACITY>;
pub type Password = String<PASSWORD_CAPACITY>;
pub type KnownNetworks = Vec<NetworkCredential, MAX_KNOWN_NETWORKS>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("too many known networks")]
    TooManyNetworks,
    #[error("SSID is empty or longer than 32 bytes")]
    InvalidSsid,
    #[error("password is longer than 64 bytes")]
    PasswordTooLong,
    #[error("network entry is missing the ':' separator")]
    MissingSeparator,
    #[error("access point password must be at least 8 bytes")]
    WeakApPassword,
    #[error("countdown length must be at least one second")]
    ZeroCountdown,
}

/// SSID and password of a network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkCredential {
    pub ssid: Ssid,
    pub password: Password,
}

impl NetworkCredential {
    pub fn new(ssid: &str, password: &str) -> Result<Self, ConfigError> {
        if ssid.is_empty() {
            return Err(ConfigError::InvalidSsid);
        }
        Ok(Self {
            ssid: Ssid::from_str(ssid).map_err(|_| ConfigError::InvalidSsid)?,
            password: Password::from_str(password).map_err(|_| ConfigError::PasswordTooLong)?,
        })
    }
}

/// Bounded retry policy for joining a known network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinPolicy {
    /// Join attempts before falling back to the access point
    pub max_attempts: u8,
    /// Association checks per attempt
    pub polls_per_attempt: u32,
    /// Wait between association checks, also used as the retry backoff
    pub poll_interval_ms: u32,
}

impl Default for JoinPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            polls_per_attempt: 10,
            poll_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Name advertised on the local network
    pub hostname: &'static str,
    /// Networks to join, in order of preference
    pub known_networks: KnownNetworks,
    /// Access point created when no known network can be joined
    pub fallback_ap: NetworkCredential,
    /// Countdown length armed by each pit trigger
    pub countdown_secs: u16,
    /// Level the lane inputs read while a switch is triggered
    pub active_level: ActiveLevel,
    pub join_policy: JoinPolicy,
}

impl DeviceConfig {
    /// Check invariants that the rest of the firmware relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.countdown_secs == 0 {
            return Err(ConfigError::ZeroCountdown);
        }
        if self.fallback_ap.ssid.is_empty() {
            return Err(ConfigError::InvalidSsid);
        }
        if self.fallback_ap.password.len() < MIN_AP_PASSWORD_LEN {
            return Err(ConfigError::WeakApPassword);
        }
        Ok(())
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME,
            known_networks: KnownNetworks::new(),
            fallback_ap: NetworkCredential {
                ssid: Ssid::from_str(DEFAULT_AP_SSID).unwrap_or_default(),
                password: Password::from_str(DEFAULT_AP_PASSWORD).unwrap_or_default(),
            },
            countdown_secs: DEFAULT_COUNTDOWN_SECS,
            // Inputs are pulled up and the switch opens to high
            active_level: ActiveLevel::High,
            join_policy: JoinPolicy::default(),
        }
    }
}

/// Parse `ssid:password` entries separated by `;`.
///
/// The first `:` of each entry separates the SSID from the password, so
/// passwords may contain `:` but SSIDs may not. Empty entries are skipped and
/// order is preserved.
pub fn parse_known_networks(input: &str) -> Result<KnownNetworks, ConfigError> {
    let mut networks = KnownNetworks::new();
    for entry in input.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (ssid, password) = entry.split_once(':').ok_or(ConfigError::MissingSeparator)?;
        networks
            .push(NetworkCredential::new(ssid, password)?)
            .map_err(|_| ConfigError::TooManyNetworks)?;
    }
    Ok(networks)
}
