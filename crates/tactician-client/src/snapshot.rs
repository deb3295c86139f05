use serde::Serialize;
use tactician_events::{ActorRef, Value};

use crate::game::{PlayerId, Tile, UnitKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttackRecord {
    pub attacker_id: PlayerId,
    pub target_id: Option<PlayerId>,
    pub troops: u64,
    pub retreating: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllianceRecord {
    pub partner_id: PlayerId,
    pub partner_name: String,
    pub expires_at_tick: u64,
    pub remaining_ms: u64,
}

/// One player as seen during a single sync cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub small_id: u32,
    pub name: String,
    pub clan_tag: Option<String>,
    pub team: Option<String>,
    pub tiles: u64,
    pub gold: u64,
    pub troops: u64,
    pub incoming_attacks: Vec<AttackRecord>,
    pub outgoing_attacks: Vec<AttackRecord>,
    pub alliances: Vec<AllianceRecord>,
    /// The local player stopped trading with this player
    pub trade_stopped_by_self: bool,
    /// This player stopped trading with the local player
    pub trade_stopped_by_other: bool,
    pub is_traitor: bool,
    /// Players this one broke an alliance with while flagged traitor, this session
    pub betrayed: Vec<PlayerId>,
    pub is_self: bool,
}

impl PlayerRecord {
    pub fn is_allied_with(&self, other: &str) -> bool {
        self.alliances.iter().any(|a| a.partner_id == other)
    }

    pub fn actor_ref(&self) -> ActorRef {
        ActorRef {
            id: self.id.clone(),
            name: self.name.clone(),
            team: self.team.clone(),
            clan: self.clan_tag.clone(),
            is_self: self.is_self,
            synthetic: false,
        }
    }

    /// Read-only summary handed to scripts
    pub fn to_value(&self) -> Value {
        let alliances: Vec<Value> = self
            .alliances
            .iter()
            .map(|a| Value::from(a.partner_id.as_str()))
            .collect();
        let betrayed: Vec<Value> = self
            .betrayed
            .iter()
            .map(|id| Value::from(id.as_str()))
            .collect();
        Value::map()
            .with("id", self.id.as_str())
            .with("name", self.name.as_str())
            .with("clan", self.clan_tag.clone())
            .with("team", self.team.clone())
            .with("tiles", self.tiles)
            .with("gold", self.gold)
            .with("troops", self.troops)
            .with("incomingAttacks", self.incoming_attacks.len() as u64)
            .with("outgoingAttacks", self.outgoing_attacks.len() as u64)
            .with("alliances", Value::List(alliances))
            .with("tradeStoppedBySelf", self.trade_stopped_by_self)
            .with("tradeStoppedByOther", self.trade_stopped_by_other)
            .with("isTraitor", self.is_traitor)
            .with("betrayed", Value::List(betrayed))
            .with("isSelf", self.is_self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShipRecord {
    pub id: u64,
    pub owner_id: PlayerId,
    pub kind: UnitKind,
    pub troops: u64,
    pub tile: Tile,
    pub target_tile: Option<Tile>,
    /// Where the ship was first seen this session
    pub origin_tile: Tile,
    pub first_seen_tick: u64,
    pub retreating: bool,
}

/// Point-in-time view of the game. Rebuilt wholesale every cycle and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Snapshot {
    pub tick: u64,
    pub players: Vec<PlayerRecord>,
    pub ships: Vec<ShipRecord>,
    pub current_time_ms: u64,
    pub alliance_duration_ms: u64,
    pub self_id: Option<PlayerId>,
}

impl Snapshot {
    pub fn player(&self, id: &str) -> Option<&PlayerRecord> {
        self.players.iter().find(|p| p.id == id)
    }

    /// Exact display-name match
    pub fn player_by_name(&self, name: &str) -> Option<&PlayerRecord> {
        self.players.iter().find(|p| p.name == name)
    }

    pub fn player_by_small_id(&self, small_id: u32) -> Option<&PlayerRecord> {
        self.players.iter().find(|p| p.small_id == small_id)
    }

    pub fn me(&self) -> Option<&PlayerRecord> {
        self.players.iter().find(|p| p.is_self)
    }
}
