//! Narrow view of the external game object.
//!
//! The engine never sees the game's internals: it discovers a [`LiveGame`]
//! through a [`GameLocator`], reads plain records from it each tick and issues
//! the two trade commands. Any read error means the object is no longer valid.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type PlayerId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
}

impl Tile {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAlliance {
    pub partner_id: PlayerId,
    pub expires_at_tick: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttack {
    pub attacker_id: PlayerId,
    /// `None` when attacking unclaimed land
    pub target_id: Option<PlayerId>,
    pub troops: u64,
    pub retreating: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPlayer {
    pub id: PlayerId,
    /// Compact numeric id used by the game's message feed
    pub small_id: u32,
    pub name: String,
    pub team: Option<String>,
    pub alive: bool,
    pub tiles: u64,
    pub gold: u64,
    pub troops: u64,
    pub is_traitor: bool,
    pub alliances: Vec<RawAlliance>,
    /// Players this player has stopped trading with
    pub embargoes: Vec<PlayerId>,
    pub outgoing_attacks: Vec<RawAttack>,
    pub incoming_attacks: Vec<RawAttack>,
}

impl RawPlayer {
    pub fn new(id: impl Into<PlayerId>, small_id: u32, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            small_id,
            name: name.into(),
            team: None,
            alive: true,
            tiles: 0,
            gold: 0,
            troops: 0,
            is_traitor: false,
            alliances: Vec::new(),
            embargoes: Vec::new(),
            outgoing_attacks: Vec::new(),
            incoming_attacks: Vec::new(),
        }
    }

    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    pub fn with_resources(mut self, tiles: u64, gold: u64, troops: u64) -> Self {
        self.tiles = tiles;
        self.gold = gold;
        self.troops = troops;
        self
    }

    pub fn allied_with(mut self, partner_id: impl Into<PlayerId>, expires_at_tick: u64) -> Self {
        self.alliances.push(RawAlliance {
            partner_id: partner_id.into(),
            expires_at_tick,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    TransportShip,
    TradeShip,
    Warship,
    City,
    Port,
    DefensePost,
    MissileSilo,
    SamLauncher,
    Factory,
    Other(String),
}

impl UnitKind {
    pub fn is_ship(&self) -> bool {
        matches!(
            self,
            UnitKind::TransportShip | UnitKind::TradeShip | UnitKind::Warship
        )
    }

    pub fn is_structure(&self) -> bool {
        matches!(
            self,
            UnitKind::City
                | UnitKind::Port
                | UnitKind::DefensePost
                | UnitKind::MissileSilo
                | UnitKind::SamLauncher
                | UnitKind::Factory
        )
    }

    pub fn name(&self) -> &str {
        match self {
            UnitKind::TransportShip => "Transport",
            UnitKind::TradeShip => "Trade Ship",
            UnitKind::Warship => "Warship",
            UnitKind::City => "City",
            UnitKind::Port => "Port",
            UnitKind::DefensePost => "Defense Post",
            UnitKind::MissileSilo => "Missile Silo",
            UnitKind::SamLauncher => "SAM Launcher",
            UnitKind::Factory => "Factory",
            UnitKind::Other(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawUnit {
    pub id: u64,
    pub owner_id: PlayerId,
    pub kind: UnitKind,
    pub troops: u64,
    pub tile: Tile,
    pub target_tile: Option<Tile>,
    pub active: bool,
    pub retreating: bool,
}

impl RawUnit {
    pub fn new(id: u64, owner_id: impl Into<PlayerId>, kind: UnitKind, tile: Tile) -> Self {
        Self {
            id,
            owner_id: owner_id.into(),
            kind,
            troops: 0,
            tile,
            target_tile: None,
            active: true,
            retreating: false,
        }
    }
}

/// Message codes of the game's display feed that carry donation telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    SentGoldToPlayer,
    ReceivedGoldFromPlayer,
    SentTroopsToPlayer,
    ReceivedTroopsFromPlayer,
    Other(u32),
}

/// One free-text line of the game's display feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    pub message_type: MessageType,
    pub message: String,
    /// Small id of the player the line was shown to
    pub player_id: Option<u32>,
}

impl DisplayMessage {
    pub fn new(message_type: MessageType, message: impl Into<String>, player_id: u32) -> Self {
        Self {
            message_type,
            message: message.into(),
            player_id: Some(player_id),
        }
    }
}

/// Everything the game produced during one tick
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateBatch {
    pub tick: u64,
    pub messages: Vec<DisplayMessage>,
}

#[derive(Debug, Error)]
pub enum GameReadError {
    #[error("game object is no longer available")]
    Gone,
    #[error("failed to read {what}: {reason}")]
    Read { what: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum GameCommandError {
    #[error("no local player to issue commands for")]
    NoLocalPlayer,
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),
    #[error("game is not attached")]
    NotAttached,
    #[error(transparent)]
    Read(#[from] GameReadError),
}

/// Accessors and commands of an attached game object
pub trait LiveGame: Send {
    fn ticks(&self) -> Result<u64, GameReadError>;

    /// The locally controlled player, if spawned
    fn my_player_id(&self) -> Result<Option<PlayerId>, GameReadError>;

    fn players(&self) -> Result<Vec<RawPlayer>, GameReadError>;

    fn units(&self) -> Result<Vec<RawUnit>, GameReadError>;

    fn alliance_duration_ticks(&self) -> Result<u64, GameReadError>;

    /// Display messages produced since the previous tick
    fn update_batch(&self) -> Result<Option<UpdateBatch>, GameReadError>;

    /// Stop (`stopped = true`) or resume trade between the local player and `target`
    fn set_embargo(&mut self, target: &str, stopped: bool) -> Result<(), GameCommandError>;
}

/// Finds the external game object; returns `None` until it exists
pub trait GameLocator: Send {
    fn locate(&mut self) -> Option<Box<dyn LiveGame>>;
}
