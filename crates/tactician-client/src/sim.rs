//! In-memory stand-in for the external game.
//!
//! Used by tests and the demo CLI. Every clone shares one [`SimWorld`], so a
//! test can keep a handle to mutate the world while the synchronizer owns
//! another.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::game::{
    DisplayMessage, GameCommandError, GameLocator, GameReadError, LiveGame, MessageType,
    PlayerId, RawPlayer, RawUnit, UpdateBatch,
};

#[derive(Debug, Clone)]
pub struct SimWorld {
    /// Whether the locator can find the game
    pub present: bool,
    /// Make every read fail, as if the game object went away
    pub fail_reads: bool,
    pub tick: u64,
    pub self_id: Option<PlayerId>,
    pub players: Vec<RawPlayer>,
    pub units: Vec<RawUnit>,
    pub alliance_duration_ticks: u64,
    /// Messages queued for the next batch
    pub pending_messages: Vec<DisplayMessage>,
    pub batch: Option<UpdateBatch>,
    /// `(target, stopped)` for every embargo command received
    pub embargo_log: Vec<(PlayerId, bool)>,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self {
            present: true,
            fail_reads: false,
            tick: 0,
            self_id: None,
            players: Vec::new(),
            units: Vec::new(),
            alliance_duration_ticks: 3000,
            pending_messages: Vec::new(),
            batch: None,
            embargo_log: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedGame {
    world: Arc<Mutex<SimWorld>>,
}

impl SimulatedGame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Four players in two teams; the local player is `p1`
    pub fn demo() -> Self {
        let sim = Self::new();
        sim.with_world(|w| {
            w.self_id = Some("p1".into());
            w.players = vec![
                RawPlayer::new("p1", 1, "[NAV] Admiral")
                    .with_team("Alpha")
                    .with_resources(1200, 50_000, 30_000),
                RawPlayer::new("p2", 2, "Corsair")
                    .with_team("Beta")
                    .with_resources(800, 20_000, 12_000),
                RawPlayer::new("p3", 3, "[NAV] Bosun")
                    .with_team("Alpha")
                    .with_resources(600, 9_000, 7_000),
                RawPlayer::new("p4", 4, "Drifter")
                    .with_team("Beta")
                    .with_resources(300, 2_000, 1_500),
            ];
        });
        sim
    }

    fn lock(&self) -> MutexGuard<'_, SimWorld> {
        self.world
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_world<R>(&self, f: impl FnOnce(&mut SimWorld) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn set_present(&self, present: bool) {
        self.lock().present = present;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Queue a display message for the next tick's batch
    pub fn push_message(&self, message_type: MessageType, text: impl Into<String>, player_id: u32) {
        self.lock()
            .pending_messages
            .push(DisplayMessage::new(message_type, text, player_id));
    }

    /// Advance one game tick and publish the queued messages as its batch
    pub fn advance(&self) -> u64 {
        let mut world = self.lock();
        world.tick += 1;
        let messages = std::mem::take(&mut world.pending_messages);
        world.batch = Some(UpdateBatch {
            tick: world.tick,
            messages,
        });
        world.tick
    }

    pub fn tick(&self) -> u64 {
        self.lock().tick
    }

    pub fn embargo_log(&self) -> Vec<(PlayerId, bool)> {
        self.lock().embargo_log.clone()
    }

    fn read<T>(&self, f: impl FnOnce(&SimWorld) -> T) -> Result<T, GameReadError> {
        let world = self.lock();
        if world.fail_reads || !world.present {
            return Err(GameReadError::Gone);
        }
        Ok(f(&world))
    }
}

impl LiveGame for SimulatedGame {
    fn ticks(&self) -> Result<u64, GameReadError> {
        self.read(|w| w.tick)
    }

    fn my_player_id(&self) -> Result<Option<PlayerId>, GameReadError> {
        self.read(|w| w.self_id.clone())
    }

    fn players(&self) -> Result<Vec<RawPlayer>, GameReadError> {
        self.read(|w| w.players.clone())
    }

    fn units(&self) -> Result<Vec<RawUnit>, GameReadError> {
        self.read(|w| w.units.clone())
    }

    fn alliance_duration_ticks(&self) -> Result<u64, GameReadError> {
        self.read(|w| w.alliance_duration_ticks)
    }

    fn update_batch(&self) -> Result<Option<UpdateBatch>, GameReadError> {
        self.read(|w| w.batch.clone())
    }

    fn set_embargo(&mut self, target: &str, stopped: bool) -> Result<(), GameCommandError> {
        let mut world = self.lock();
        let self_id = world.self_id.clone().ok_or(GameCommandError::NoLocalPlayer)?;
        if !world.players.iter().any(|p| p.id == target) {
            return Err(GameCommandError::UnknownPlayer(target.to_string()));
        }
        let me = world
            .players
            .iter_mut()
            .find(|p| p.id == self_id)
            .ok_or(GameCommandError::NoLocalPlayer)?;
        me.embargoes.retain(|id| id != target);
        if stopped {
            me.embargoes.push(target.to_string());
        }
        world.embargo_log.push((target.to_string(), stopped));
        Ok(())
    }
}

impl GameLocator for SimulatedGame {
    fn locate(&mut self) -> Option<Box<dyn LiveGame>> {
        if self.lock().present {
            Some(Box::new(self.clone()))
        } else {
            None
        }
    }
}
