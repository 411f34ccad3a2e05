//! esp-radio adapter for the network bootstrap

use core::str::FromStr;

use esp_radio::wifi::{
    AccessPointConfig, AuthMethod, ClientConfig, ModeConfig, ScanConfig, WifiController,
    WifiError,
};
use log::{debug, info};
use pitcaller_core::config::{NetworkCredential, Ssid};
use pitcaller_core::network::{MAX_VISIBLE_NETWORKS, ScanResults, WifiRadio};

/// [`WifiRadio`] over the ESP32 Wi-Fi controller
pub struct EspRadio<'d> {
    controller: WifiController<'d>,
}

impl<'d> EspRadio<'d> {
    pub fn new(controller: WifiController<'d>) -> Self {
        Self { controller }
    }

    /// Apply `config` and make sure the controller is running
    async fn apply(&mut self, config: ModeConfig) -> Result<(), WifiError> {
        if matches!(self.controller.is_started(), Ok(true)) {
            self.controller.stop_async().await?;
        }
        self.controller.set_config(&config)?;
        self.controller.start_async().await
    }
}

impl WifiRadio for EspRadio<'_> {
    type Error = WifiError;

    async fn scan(&mut self) -> Result<ScanResults, WifiError> {
        self.apply(ModeConfig::Client(ClientConfig::default())).await?;

        let found = self
            .controller
            .scan_with_config_async(ScanConfig::default().with_max(MAX_VISIBLE_NETWORKS))
            .await?;

        let mut results = ScanResults::new();
        for ap in found {
            match Ssid::from_str(&ap.ssid) {
                Ok(ssid) if !ssid.is_empty() => {
                    if results.push(ssid).is_err() {
                        break;
                    }
                }
                // Hidden or oversized SSIDs can never match a known network
                _ => debug!("Skipping network {:?}", ap.ssid.as_str()),
            }
        }
        Ok(results)
    }

    async fn begin_join(&mut self, credential: &NetworkCredential) -> Result<(), WifiError> {
        let config = ClientConfig::default()
            .with_ssid(credential.ssid.as_str().into())
            .with_password(credential.password.as_str().into());
        self.apply(ModeConfig::Client(config)).await?;
        self.controller.connect()
    }

    async fn is_joined(&mut self) -> bool {
        self.controller.is_connected().unwrap_or(false)
    }

    async fn start_access_point(&mut self, credential: &NetworkCredential) -> Result<(), WifiError> {
        info!("Starting access point {}", credential.ssid);
        let config = AccessPointConfig::default()
            .with_ssid(credential.ssid.as_str().into())
            .with_password(credential.password.as_str().into())
            .with_auth_method(AuthMethod::Wpa2Personal);
        self.apply(ModeConfig::AccessPoint(config)).await
    }
}
