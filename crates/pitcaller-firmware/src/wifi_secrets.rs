//! Wi-Fi settings baked in at build time
//!
//! `build.rs` exports the variables below from `.env`. Anything unset falls
//! back to the defaults of [`DeviceConfig`].

use pitcaller_core::config::{
    ConfigError, DEFAULT_AP_PASSWORD, DEFAULT_AP_SSID, DeviceConfig, NetworkCredential,
    parse_known_networks,
};

const KNOWN_NETWORKS: Option<&str> = option_env!("PITCALLER_KNOWN_NETWORKS");
const AP_SSID: Option<&str> = option_env!("PITCALLER_AP_SSID");
const AP_PASSWORD: Option<&str> = option_env!("PITCALLER_AP_PASSWORD");

/// Build and validate the device configuration
pub fn device_config() -> Result<DeviceConfig, ConfigError> {
    let mut config = DeviceConfig::default();
    config.known_networks = parse_known_networks(KNOWN_NETWORKS.unwrap_or(""))?;

    if AP_SSID.is_some() || AP_PASSWORD.is_some() {
        config.fallback_ap = NetworkCredential::new(
            AP_SSID.unwrap_or(DEFAULT_AP_SSID),
            AP_PASSWORD.unwrap_or(DEFAULT_AP_PASSWORD),
        )?;
    }

    config.validate()?;
    Ok(config)
}
