//! The pit stop controller driven by the event loop
//!
//! `PitStop` is owned by exactly one task. The loop calls
//! [`PitStop::handle_event`] for every transport event and
//! [`PitStop::run_pass`] once per pass; each state change is encoded from a
//! full snapshot and broadcast before the call returns.

use embassy_time::Instant;
use embedded_hal::digital::InputPin;
use log::{debug, error, info};

use super::{AppError, BusEvent};
use crate::broadcaster::{Broadcaster, ClientId, ClientSink};
use crate::lanes::{LaneStore, PitAnnouncement};
use crate::protocol::{Command, CommandError, encode_announcement, encode_full_update};
use crate::switches::{PollCadence, SwitchPoller};

pub struct PitStop<P, C>
where
    P: InputPin,
    C: ClientSink,
{
    store: LaneStore,
    poller: SwitchPoller<P>,
    cadence: PollCadence,
    broadcaster: Broadcaster<C>,
}

impl<P, C> PitStop<P, C>
where
    P: InputPin,
    C: ClientSink,
{
    pub fn new(countdown_secs: u16, poller: SwitchPoller<P>) -> Self {
        Self {
            store: LaneStore::new(countdown_secs),
            poller,
            cadence: PollCadence::default(),
            broadcaster: Broadcaster::new(),
        }
    }

    pub fn store(&self) -> &LaneStore {
        &self.store
    }

    pub fn broadcaster(&self) -> &Broadcaster<C> {
        &self.broadcaster
    }

    /// Dispatch one transport event
    pub fn handle_event(&mut self, event: BusEvent<C>, now: Instant) {
        match event {
            BusEvent::Connected(client) => {
                let id = client.id();
                if let Err(e) = self.handle_connect(client) {
                    error!("Refusing client {}: {}", id, e);
                }
            }
            BusEvent::Disconnected(id) => {
                self.broadcaster.disconnect(id);
            }
            BusEvent::Message(id, text) => {
                if let Err(e) = self.handle_message(id, &text, now) {
                    debug!("Ignoring {:?} from client {}: {}", text.as_str(), id, e);
                }
            }
        }
    }

    /// Greet a new client and send it the current state of every lane
    pub fn handle_connect(&mut self, client: C) -> Result<(), AppError> {
        let snapshot = encode_full_update(&self.store)?;
        self.broadcaster.connect(client, &snapshot)?;
        Ok(())
    }

    /// Decode and apply one client command.
    ///
    /// Rejected commands change nothing and are not answered.
    pub fn handle_message(
        &mut self,
        id: ClientId,
        text: &str,
        now: Instant,
    ) -> Result<(), CommandError> {
        match text.parse::<Command>()? {
            Command::Start { lane } => {
                info!("Client {} started {}", id, lane);
                let announcement = self.store.start(lane, now);
                self.publish_announcement(&announcement);
            }
            Command::UpdatePilot { lane, name } => {
                info!("Client {} named {} pilot {:?}", id, lane, name.as_str());
                self.store.set_pilot(lane, name);
            }
        }
        self.publish_full_update();
        Ok(())
    }

    /// One pass of the event loop: prune dead clients, poll the switches,
    /// advance countdowns, then poll again if the debounce cadence is due.
    pub fn run_pass(&mut self, now: Instant) {
        self.broadcaster.cleanup();
        self.poll_switches(now);

        if self.store.tick(now) {
            self.publish_full_update();
        }

        if self.cadence.is_due(now) {
            self.poll_switches(now);
        }
    }

    /// Turn active switch levels into lane triggers, honoring the idle gate
    pub fn poll_switches(&mut self, now: Instant) {
        for lane in self.poller.triggered_lanes() {
            if let Some(announcement) = self.store.trigger_switch(lane, now) {
                info!("Switch triggered {}", lane);
                self.publish_announcement(&announcement);
                self.publish_full_update();
            }
        }
    }

    fn publish_announcement(&mut self, announcement: &PitAnnouncement) {
        match encode_announcement(announcement) {
            Ok(frame) => {
                self.broadcaster.broadcast(&frame);
            }
            Err(e) => error!("Failed to encode announcement: {}", e),
        }
    }

    fn publish_full_update(&mut self) {
        match encode_full_update(&self.store) {
            Ok(frame) => {
                self.broadcaster.broadcast(&frame);
            }
            Err(e) => error!("Failed to encode full update: {}", e),
        }
    }
}
