//! Network bootstrap
//!
//! Runs once at boot, before the event loop:
//!
//! ```text
//! Scanning ──► Joining ──► Joined
//!     │           │
//!     │           └──(attempts exhausted)──┐
//!     └──(no known network visible)────────┴──► CreatingFallbackAp ──► ApActive
//! ```
//!
//! An empty scan is fatal: the device must be reachable to be useful, so it
//! refuses to continue without seeing any network at all. `Joining` never goes
//! back to `Scanning`.

use core::fmt::Debug;
use core::future::Future;

use embedded_hal_async::delay::DelayNs;
use heapless::Vec;
use log::{debug, error, info, warn};
use thiserror_no_std::Error;

use crate::config::{JoinPolicy, NetworkCredential, Ssid};

/// Maximum number of scan results considered
pub const MAX_VISIBLE_NETWORKS: usize = 32;

pub type ScanResults = Vec<Ssid, MAX_VISIBLE_NETWORKS>;

/// Radio operations needed by the bootstrap
pub trait WifiRadio {
    type Error: Debug;

    /// Scan the area and return the SSIDs of every visible network
    fn scan(&mut self) -> impl Future<Output = Result<ScanResults, Self::Error>>;

    /// Start associating with a network. Completion is observed through [`WifiRadio::is_joined`].
    fn begin_join(
        &mut self,
        credential: &NetworkCredential,
    ) -> impl Future<Output = Result<(), Self::Error>>;

    /// Whether the station is associated
    fn is_joined(&mut self) -> impl Future<Output = bool>;

    /// Bring up a self-hosted access point
    fn start_access_point(
        &mut self,
        credential: &NetworkCredential,
    ) -> impl Future<Output = Result<(), Self::Error>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Scanning,
    Joining { attempt: u8 },
    Joined,
    CreatingFallbackAp,
    ApActive,
}

/// Network the device ended up on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMode {
    /// Joined a known network as a station
    Station { ssid: Ssid },
    /// Hosting the fallback access point
    AccessPoint { ssid: Ssid },
}

impl NetworkMode {
    pub fn ssid(&self) -> &str {
        match self {
            Self::Station { ssid } | Self::AccessPoint { ssid } => ssid,
        }
    }
}

#[derive(Error, Debug)]
pub enum BootstrapError<E: Debug> {
    #[error("no networks visible")]
    NoVisibleNetworks,
    #[error("scan failed: {0:?}")]
    Scan(E),
    #[error("failed to start access point: {0:?}")]
    AccessPoint(E),
}

/// Pick the network to join.
///
/// Visible networks are checked in scan order; for each one the known list is
/// walked in configured order. The first exact SSID match wins.
pub fn select_known_network<'a>(
    visible: &[Ssid],
    known: &'a [NetworkCredential],
) -> Option<&'a NetworkCredential> {
    for ssid in visible {
        info!("Checking: {}", ssid);
        for credential in known {
            if credential.ssid.as_bytes() == ssid.as_bytes() {
                return Some(credential);
            }
            debug!("\tNot matching {}", credential.ssid);
        }
    }
    None
}

/// Scan / join / fallback state machine
pub struct NetworkBootstrap<'a> {
    known: &'a [NetworkCredential],
    fallback: &'a NetworkCredential,
    policy: JoinPolicy,
    state: BootstrapState,
}

impl<'a> NetworkBootstrap<'a> {
    pub fn new(
        known: &'a [NetworkCredential],
        fallback: &'a NetworkCredential,
        policy: JoinPolicy,
    ) -> Self {
        Self {
            known,
            fallback,
            policy,
            state: BootstrapState::Scanning,
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Run the bootstrap to completion
    pub async fn run<R, D>(
        &mut self,
        radio: &mut R,
        delay: &mut D,
    ) -> Result<NetworkMode, BootstrapError<R::Error>>
    where
        R: WifiRadio,
        D: DelayNs,
    {
        self.transition(BootstrapState::Scanning);
        info!("WiFi scan start");
        let visible = radio.scan().await.map_err(BootstrapError::Scan)?;
        info!("WiFi scan done, {} networks found", visible.len());

        if visible.is_empty() {
            error!("No networks found. Reset to try again");
            return Err(BootstrapError::NoVisibleNetworks);
        }
        for ssid in &visible {
            debug!("Visible: {}", ssid);
        }

        if let Some(credential) = select_known_network(&visible, self.known) {
            info!("Connecting to {}", credential.ssid);
            if self.join(radio, delay, credential).await {
                self.transition(BootstrapState::Joined);
                info!("Connected to {}", credential.ssid);
                return Ok(NetworkMode::Station {
                    ssid: credential.ssid.clone(),
                });
            }
            warn!(
                "Giving up on {} after {} attempts",
                credential.ssid, self.policy.max_attempts
            );
        } else {
            info!("No known network visible");
        }

        self.transition(BootstrapState::CreatingFallbackAp);
        radio
            .start_access_point(self.fallback)
            .await
            .map_err(BootstrapError::AccessPoint)?;
        self.transition(BootstrapState::ApActive);
        info!("Created access point {}", self.fallback.ssid);

        Ok(NetworkMode::AccessPoint {
            ssid: self.fallback.ssid.clone(),
        })
    }

    /// Bounded join: up to `max_attempts`, each polling association
    /// `polls_per_attempt` times. Returns whether the station associated.
    async fn join<R, D>(&mut self, radio: &mut R, delay: &mut D, credential: &NetworkCredential) -> bool
    where
        R: WifiRadio,
        D: DelayNs,
    {
        for attempt in 1..=self.policy.max_attempts {
            self.transition(BootstrapState::Joining { attempt });

            if let Err(e) = radio.begin_join(credential).await {
                warn!("Join attempt {} failed to start: {:?}", attempt, e);
                delay.delay_ms(self.policy.poll_interval_ms).await;
                continue;
            }

            for _ in 0..self.policy.polls_per_attempt {
                if radio.is_joined().await {
                    return true;
                }
                debug!("Connecting to WiFi...");
                delay.delay_ms(self.policy.poll_interval_ms).await;
            }
            // A late association is still an association
            if radio.is_joined().await {
                return true;
            }
        }
        false
    }

    fn transition(&mut self, next: BootstrapState) {
        info!("Bootstrap state: {:?}", next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfig, parse_known_networks};
    use core::str::FromStr;
    use embassy_futures::block_on;

    #[derive(Debug, PartialEq, Eq)]
    struct RadioError;

    /// Scripted radio: associates after `joins_after` polls, or never
    struct FakeRadio {
        visible: &'static [&'static str],
        joins_after: Option<u32>,
        fail_scan: bool,
        polls: u32,
        join_requests: Vec<Ssid, 16>,
        access_point: Option<Ssid>,
    }

    impl FakeRadio {
        fn new(visible: &'static [&'static str]) -> Self {
            Self {
                visible,
                joins_after: Some(0),
                fail_scan: false,
                polls: 0,
                join_requests: Vec::new(),
                access_point: None,
            }
        }
    }

    impl WifiRadio for FakeRadio {
        type Error = RadioError;

        async fn scan(&mut self) -> Result<ScanResults, RadioError> {
            if self.fail_scan {
                return Err(RadioError);
            }
            Ok(self
                .visible
                .iter()
                .map(|s| Ssid::from_str(s).unwrap())
                .collect())
        }

        async fn begin_join(&mut self, credential: &NetworkCredential) -> Result<(), RadioError> {
            self.join_requests.push(credential.ssid.clone()).unwrap();
            Ok(())
        }

        async fn is_joined(&mut self) -> bool {
            self.polls += 1;
            matches!(self.joins_after, Some(n) if self.polls > n)
        }

        async fn start_access_point(
            &mut self,
            credential: &NetworkCredential,
        ) -> Result<(), RadioError> {
            self.access_point = Some(credential.ssid.clone());
            Ok(())
        }
    }

    struct NoDelay {
        total_ms: u64,
    }

    impl DelayNs for NoDelay {
        async fn delay_ns(&mut self, ns: u32) {
            self.total_ms += u64::from(ns) / 1_000_000;
        }

        async fn delay_ms(&mut self, ms: u32) {
            self.total_ms += u64::from(ms);
        }
    }

    fn ssids(names: &[&str]) -> alloc::vec::Vec<Ssid> {
        names.iter().map(|s| Ssid::from_str(s).unwrap()).collect()
    }

    fn run(radio: &mut FakeRadio, known: &str) -> Result<NetworkMode, BootstrapError<RadioError>> {
        let config = DeviceConfig::default();
        let known = parse_known_networks(known).unwrap();
        let mut bootstrap = NetworkBootstrap::new(&known, &config.fallback_ap, config.join_policy);
        let mut delay = NoDelay { total_ms: 0 };
        block_on(bootstrap.run(radio, &mut delay))
    }

    #[test]
    fn test_select_first_visible_match() {
        let known = parse_known_networks("KnownNet:secret").unwrap();
        let visible = ssids(&["unknown1", "KnownNet", "unknown2"]);
        let selected = select_known_network(&visible, &known).unwrap();
        assert_eq!(selected.ssid.as_str(), "KnownNet");
        assert_eq!(selected.password.as_str(), "secret");
    }

    #[test]
    fn test_select_follows_scan_order() {
        let known = parse_known_networks("Second:b;First:a").unwrap();
        let visible = ssids(&["First", "Second"]);
        assert_eq!(
            select_known_network(&visible, &known).unwrap().ssid.as_str(),
            "First"
        );
    }

    #[test]
    fn test_select_is_exact_match() {
        let known = parse_known_networks("KnownNet:secret").unwrap();
        let visible = ssids(&["knownnet", "KnownNet ", "KnownNe"]);
        assert!(select_known_network(&visible, &known).is_none());
    }

    #[test]
    fn test_joins_known_network() {
        let mut radio = FakeRadio::new(&["unknown1", "KnownNet", "unknown2"]);
        radio.joins_after = Some(3);

        let mode = run(&mut radio, "KnownNet:secret").unwrap();
        assert_eq!(
            mode,
            NetworkMode::Station {
                ssid: Ssid::from_str("KnownNet").unwrap()
            }
        );
        assert_eq!(radio.join_requests.len(), 1);
        assert!(radio.access_point.is_none());
    }

    #[test]
    fn test_falls_back_without_known_network() {
        let mut radio = FakeRadio::new(&["Cafe", "Neighbour"]);
        let mode = run(&mut radio, "KnownNet:secret").unwrap();

        assert!(matches!(mode, NetworkMode::AccessPoint { .. }));
        assert_eq!(mode.ssid(), DeviceConfig::default().fallback_ap.ssid.as_str());
        assert!(radio.join_requests.is_empty());
        assert!(radio.access_point.is_some());
    }

    #[test]
    fn test_empty_scan_is_fatal() {
        let mut radio = FakeRadio::new(&[]);
        assert!(matches!(
            run(&mut radio, "KnownNet:secret"),
            Err(BootstrapError::NoVisibleNetworks)
        ));
        assert!(radio.access_point.is_none());
    }

    #[test]
    fn test_scan_error_is_reported() {
        let mut radio = FakeRadio::new(&["KnownNet"]);
        radio.fail_scan = true;
        assert!(matches!(
            run(&mut radio, "KnownNet:secret"),
            Err(BootstrapError::Scan(RadioError))
        ));
    }

    #[test]
    fn test_join_is_bounded_then_falls_back() {
        let mut radio = FakeRadio::new(&["KnownNet"]);
        radio.joins_after = None;

        let mode = run(&mut radio, "KnownNet:secret").unwrap();
        let policy = DeviceConfig::default().join_policy;

        assert!(matches!(mode, NetworkMode::AccessPoint { .. }));
        assert_eq!(radio.join_requests.len(), policy.max_attempts as usize);
        assert!(radio.access_point.is_some());
    }

    #[test]
    fn test_join_succeeds_on_later_attempt() {
        let mut radio = FakeRadio::new(&["KnownNet"]);
        let policy = DeviceConfig::default().join_policy;
        // Associates during the second attempt
        radio.joins_after = Some(policy.polls_per_attempt + 3);

        let mode = run(&mut radio, "KnownNet:secret").unwrap();
        assert!(matches!(mode, NetworkMode::Station { .. }));
        assert_eq!(radio.join_requests.len(), 2);
    }

    #[test]
    fn test_state_after_run() {
        let config = DeviceConfig::default();
        let known = parse_known_networks("KnownNet:secret").unwrap();
        let mut delay = NoDelay { total_ms: 0 };

        let mut bootstrap = NetworkBootstrap::new(&known, &config.fallback_ap, config.join_policy);
        let mut radio = FakeRadio::new(&["KnownNet"]);
        block_on(bootstrap.run(&mut radio, &mut delay)).unwrap();
        assert_eq!(bootstrap.state(), BootstrapState::Joined);

        let mut bootstrap = NetworkBootstrap::new(&known, &config.fallback_ap, config.join_policy);
        let mut radio = FakeRadio::new(&["Other"]);
        block_on(bootstrap.run(&mut radio, &mut delay)).unwrap();
        assert_eq!(bootstrap.state(), BootstrapState::ApActive);
    }
}
