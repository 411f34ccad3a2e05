//! Desktop simulator for the pitcaller lane signaling device.
//!
//! Runs the pitcaller-core event loop on the host. Lane switches are driven
//! from stdin and push-channel clients print every frame they receive to
//! stdout, so the lane logic can be exercised without hardware or a browser.
//!
//! # Commands
//!
//! | Command            | Action                                         |
//! |--------------------|------------------------------------------------|
//! | `press N`          | Hold the switch of lane N (1-4)                |
//! | `release N`        | Release the switch of lane N                   |
//! | `tap N`            | Press lane N and release it shortly after      |
//! | `connect`          | Connect a new client                           |
//! | `disconnect ID`    | Close client ID cleanly                        |
//! | `drop ID`          | Make client ID vanish without a close          |
//! | `send ID TEXT`     | Deliver TEXT from client ID, e.g. `send 0 start1` |
//! | `status`           | Print every lane                               |
//! | `quit`             | Exit                                           |
//!
//! The Wi-Fi bootstrap runs first against a simulated radio. Visible networks
//! come from `PITCALLER_SIM_VISIBLE` (comma separated) and known networks from
//! `PITCALLER_KNOWN_NETWORKS`, in the same format the firmware uses. Set
//! `PITCALLER_SIM_JOIN_FAILS` to watch the access point fallback.

use std::cell::Cell;
use std::io::BufRead;
use std::rc::Rc;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Duration as StdDuration;

use embassy_time::{Duration, Instant};
use embedded_hal::digital::{ErrorType, InputPin};
use embedded_hal_async::delay::DelayNs;
use log::{error, info, warn};

use pitcaller_core::app_state::{AppRunState, BusEvent, InboundText, PitStop};
use pitcaller_core::broadcaster::{ClientId, ClientSink, SendError};
use pitcaller_core::config::{
    DeviceConfig, JoinPolicy, NetworkCredential, Ssid, parse_known_networks,
};
use pitcaller_core::lanes::{LANE_COUNT, LaneIndex};
use pitcaller_core::network::{NetworkBootstrap, ScanResults, WifiRadio};
use pitcaller_core::switches::{ActiveLevel, SwitchPoller};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Wait between two passes of the event loop.
const PASS_INTERVAL: StdDuration = StdDuration::from_millis(10);

/// How long `tap` holds a switch down.
const TAP_DURATION: Duration = Duration::from_millis(120);

/// Visible networks when `PITCALLER_SIM_VISIBLE` is unset.
const DEFAULT_VISIBLE: &str = "TrackWifi,Paddock";

/// Known networks when `PITCALLER_KNOWN_NETWORKS` is unset.
const DEFAULT_KNOWN: &str = "TrackWifi:changeme";

// ---------------------------------------------------------------------------
// Simulated hardware
// ---------------------------------------------------------------------------

/// Switch levels shared between the command handler and the pins.
type Levels = Arc<[AtomicBool; LANE_COUNT]>;

/// A lane input whose level is set from the command line.
struct SimPin {
    levels: Levels,
    lane: usize,
}

impl ErrorType for SimPin {
    type Error = core::convert::Infallible;
}

impl InputPin for SimPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.levels[self.lane].load(Ordering::Relaxed))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

/// A radio that sees a fixed list of networks.
struct SimRadio {
    visible: Vec<Ssid>,
    join_fails: bool,
    joined: bool,
}

impl WifiRadio for SimRadio {
    type Error = &'static str;

    async fn scan(&mut self) -> Result<ScanResults, Self::Error> {
        let mut results = ScanResults::new();
        for ssid in &self.visible {
            results.push(ssid.clone()).map_err(|_| "too many networks")?;
        }
        Ok(results)
    }

    async fn begin_join(&mut self, credential: &NetworkCredential) -> Result<(), Self::Error> {
        info!("Associating with {}", credential.ssid);
        self.joined = !self.join_fails;
        Ok(())
    }

    async fn is_joined(&mut self) -> bool {
        self.joined
    }

    async fn start_access_point(
        &mut self,
        credential: &NetworkCredential,
    ) -> Result<(), Self::Error> {
        info!("Hosting {} / {}", credential.ssid, credential.password);
        Ok(())
    }
}

struct SimDelay;

impl DelayNs for SimDelay {
    async fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(StdDuration::from_nanos(u64::from(ns)));
    }
}

/// A push-channel client that prints its frames.
struct ConsoleClient {
    id: ClientId,
    alive: Rc<Cell<bool>>,
}

impl ClientSink for ConsoleClient {
    fn id(&self) -> ClientId {
        self.id
    }

    fn send_text(&mut self, frame: &str) -> Result<(), SendError> {
        if !self.is_alive() {
            return Err(SendError::Closed);
        }
        println!("[client {}] {}", self.id, frame);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.get()
    }
}

/// Liveness flags of every client the simulator has connected.
#[derive(Default)]
struct ClientRoster {
    next_id: ClientId,
    alive: Vec<(ClientId, Rc<Cell<bool>>)>,
}

impl ClientRoster {
    fn connect(&mut self, pit: &mut PitStop<SimPin, ConsoleClient>) {
        let alive = Rc::new(Cell::new(true));
        let client = ConsoleClient {
            id: self.next_id,
            alive: alive.clone(),
        };
        self.alive.push((self.next_id, alive));
        self.next_id = self.next_id.wrapping_add(1);
        pit.handle_event(BusEvent::Connected(client), Instant::now());
    }

    fn forget(&mut self, id: ClientId) {
        self.alive.retain(|(client, _)| *client != id);
    }

    /// Make a client's connection vanish without telling the event loop
    fn drop_connection(&mut self, id: ClientId) {
        for (_, alive) in self.alive.iter().filter(|(client, _)| *client == id) {
            alive.set(false);
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum SimCommand {
    Press(LaneIndex),
    Release(LaneIndex),
    Tap(LaneIndex),
    Connect,
    Disconnect(ClientId),
    Drop(ClientId),
    Send(ClientId, String),
    Status,
    Quit,
}

/// Parse one line of input. Lanes are numbered 1-4 as printed on the device.
fn parse_command(line: &str) -> Option<SimCommand> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    let lane = || {
        rest.parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(LaneIndex::new)
    };
    let client = || rest.parse::<ClientId>().ok();

    match word {
        "press" => lane().map(SimCommand::Press),
        "release" => lane().map(SimCommand::Release),
        "tap" => lane().map(SimCommand::Tap),
        "connect" => Some(SimCommand::Connect),
        "disconnect" => client().map(SimCommand::Disconnect),
        "drop" => client().map(SimCommand::Drop),
        "send" => {
            let (id, text) = rest.split_once(' ')?;
            Some(SimCommand::Send(id.parse().ok()?, text.to_string()))
        }
        "status" => Some(SimCommand::Status),
        "quit" | "exit" => Some(SimCommand::Quit),
        _ => None,
    }
}

/// Forward stdin lines to the event loop from a background thread.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

fn simulated_config() -> DeviceConfig {
    let mut config = DeviceConfig {
        // Keep the bounded join short on the desktop
        join_policy: JoinPolicy {
            max_attempts: 3,
            polls_per_attempt: 5,
            poll_interval_ms: 100,
        },
        ..DeviceConfig::default()
    };

    let known =
        std::env::var("PITCALLER_KNOWN_NETWORKS").unwrap_or_else(|_| DEFAULT_KNOWN.into());
    match parse_known_networks(&known) {
        Ok(networks) => config.known_networks = networks,
        Err(e) => warn!("Ignoring PITCALLER_KNOWN_NETWORKS: {}", e),
    }
    config
}

fn simulated_radio() -> SimRadio {
    let visible =
        std::env::var("PITCALLER_SIM_VISIBLE").unwrap_or_else(|_| DEFAULT_VISIBLE.into());
    SimRadio {
        visible: visible
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| Ssid::from_str(s).ok())
            .collect(),
        join_fails: std::env::var_os("PITCALLER_SIM_JOIN_FAILS").is_some(),
        joined: false,
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn print_status(pit: &PitStop<SimPin, ConsoleClient>) {
    for lane in pit.store().lanes() {
        println!(
            "{:<24} countdown={} pitting={} switch={}",
            lane.label(),
            lane.countdown_remaining(),
            lane.is_pitting(),
            if lane.is_idle() { "armed" } else { "gated" },
        );
    }
    println!("{} client(s) connected", pit.broadcaster().len());
}

fn main() {
    env_logger::init();
    info!("Starting pitcaller simulator");
    info!("Run state: {:?}", AppRunState::Booting);

    let config = simulated_config();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return;
    }

    info!("Run state: {:?}", AppRunState::Bootstrapping);
    let mut radio = simulated_radio();
    let mut bootstrap = NetworkBootstrap::new(
        &config.known_networks,
        &config.fallback_ap,
        config.join_policy,
    );
    match embassy_futures::block_on(bootstrap.run(&mut radio, &mut SimDelay)) {
        Ok(mode) => info!("Network up on {} as {:?}", mode.ssid(), mode),
        Err(e) => {
            error!("{}", e);
            info!("Run state: {:?}", AppRunState::Halted);
            return;
        }
    }

    let levels: Levels = Arc::new(Default::default());
    let pins = std::array::from_fn(|lane| SimPin {
        levels: levels.clone(),
        lane,
    });
    let mut pit = PitStop::new(
        config.countdown_secs,
        SwitchPoller::new(pins, ActiveLevel::High),
    );

    let commands = spawn_stdin_reader();
    let mut clients = ClientRoster::default();
    let mut pending_release: Vec<(LaneIndex, Instant)> = Vec::new();

    // One client from the start so frames are visible right away
    clients.connect(&mut pit);

    info!("Run state: {:?}", AppRunState::Running);
    info!(
        "Commands: press N, release N, tap N, connect, disconnect ID, drop ID, send ID TEXT, \
         status, quit"
    );

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------
    'running: loop {
        loop {
            let line = match commands.try_recv() {
                Ok(line) => line,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'running,
            };
            if line.trim().is_empty() {
                continue;
            }
            let Some(command) = parse_command(&line) else {
                warn!("Unknown command {:?}", line.trim());
                continue;
            };

            let now = Instant::now();
            match command {
                SimCommand::Press(lane) => levels[lane.get()].store(true, Ordering::Relaxed),
                SimCommand::Release(lane) => levels[lane.get()].store(false, Ordering::Relaxed),
                SimCommand::Tap(lane) => {
                    levels[lane.get()].store(true, Ordering::Relaxed);
                    pending_release.push((lane, now + TAP_DURATION));
                }
                SimCommand::Connect => clients.connect(&mut pit),
                SimCommand::Disconnect(id) => {
                    clients.forget(id);
                    pit.handle_event(BusEvent::Disconnected(id), now);
                }
                SimCommand::Drop(id) => clients.drop_connection(id),
                SimCommand::Send(id, text) => match InboundText::from_str(&text) {
                    Ok(text) => pit.handle_event(BusEvent::Message(id, text), now),
                    Err(_) => warn!("Message is longer than a client frame"),
                },
                SimCommand::Status => print_status(&pit),
                SimCommand::Quit => break 'running,
            }
        }

        let now = Instant::now();
        pending_release.retain(|(lane, at)| {
            if now >= *at {
                levels[lane.get()].store(false, Ordering::Relaxed);
                false
            } else {
                true
            }
        });

        pit.run_pass(now);
        std::thread::sleep(PASS_INTERVAL);
    }

    info!("Simulator exiting");
}
