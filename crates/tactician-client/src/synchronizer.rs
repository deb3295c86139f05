//! Snapshot synchronizer.
//!
//! Discovers the external game object, polls it once per tick and converts the
//! raw state into an immutable [`Snapshot`]. Session-scoped memory (alliance
//! and traitor history, ship memory, the structure identity cache) is cleared
//! whenever player identities from before can no longer be trusted: on
//! discovery, on a session boundary, and on any read failure.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use tactician_events::{ActorRef, SessionEvent, StructureBuilt};

use crate::config::EngineConfig;
use crate::game::{
    GameCommandError, GameLocator, GameReadError, LiveGame, PlayerId, RawAttack, RawPlayer,
    RawUnit, Tile, UpdateBatch,
};
use crate::snapshot::{AllianceRecord, AttackRecord, PlayerRecord, ShipRecord, Snapshot};

#[derive(Debug, Clone, Copy)]
struct ShipMemory {
    origin: Tile,
    first_seen_tick: u64,
}

#[derive(Default)]
struct SessionMemory {
    /// Alliance partners per player as of the previous cycle
    alliances: HashMap<PlayerId, HashSet<PlayerId>>,
    /// Sticky betrayal targets per player
    betrayals: HashMap<PlayerId, BTreeSet<PlayerId>>,
    ships: HashMap<u64, ShipMemory>,
    structures: HashSet<u64>,
    structures_seeded: bool,
    /// `None` until the first roster of the session has been observed
    roster_was_empty: Option<bool>,
    last_self_id: Option<PlayerId>,
}

/// Output of one successful poll
#[derive(Debug, Clone)]
pub struct SyncCycle {
    pub snapshot: Arc<Snapshot>,
    pub structures_built: Vec<StructureBuilt>,
    pub update_batch: Option<UpdateBatch>,
}

/// What happened during one call to [`Synchronizer::poll`]
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Session lifecycle changes, in the order they happened
    pub session_events: Vec<SessionEvent>,
    pub cycle: Option<SyncCycle>,
}

impl SyncReport {
    /// True when derived memory downstream (e.g. de-dup windows) must be dropped
    pub fn invalidates_session(&self) -> bool {
        !self.session_events.is_empty()
    }
}

pub struct Synchronizer {
    locator: Box<dyn GameLocator>,
    game: Option<Box<dyn LiveGame>>,
    next_discovery_ms: u64,
    discovery_retry_ms: u64,
    tick_ms: u64,
    memory: SessionMemory,
    snapshot: Option<Arc<Snapshot>>,
}

impl Synchronizer {
    pub fn new(locator: Box<dyn GameLocator>, config: &EngineConfig) -> Self {
        Self {
            locator,
            game: None,
            next_discovery_ms: 0,
            discovery_retry_ms: config.discovery_retry_ms,
            tick_ms: config.tick_ms,
            memory: SessionMemory::default(),
            snapshot: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.game.is_some()
    }

    /// Latest snapshot; `None` while detached
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.clone()
    }

    /// Run one synchronization cycle. Never fails: read errors detach and
    /// schedule rediscovery.
    pub fn poll(&mut self, now_ms: u64) -> SyncReport {
        let mut report = SyncReport::default();

        if self.game.is_none() {
            if now_ms < self.next_discovery_ms {
                return report;
            }
            match self.locator.locate() {
                Some(game) => {
                    info!(target: "sync", "Game object discovered, attaching");
                    self.memory = SessionMemory::default();
                    self.game = Some(game);
                    report.session_events.push(SessionEvent::Attached);
                }
                None => {
                    debug!(target: "sync", "Game object not found, retrying in {}ms", self.discovery_retry_ms);
                    self.next_discovery_ms = now_ms + self.discovery_retry_ms;
                    return report;
                }
            }
        }

        let Some(game) = self.game.as_deref() else {
            return report;
        };

        match read_cycle(game, &mut self.memory, now_ms, self.tick_ms) {
            Ok((cycle, boundary)) => {
                if let Some(event) = boundary {
                    report.session_events.push(event);
                }
                self.snapshot = Some(cycle.snapshot.clone());
                report.cycle = Some(cycle);
            }
            Err(e) => {
                warn!(target: "sync", "Poll failed, dropping game reference: {}", e);
                self.detach();
                self.next_discovery_ms = now_ms + self.discovery_retry_ms;
                report.session_events.push(SessionEvent::Detached {
                    reason: e.to_string(),
                });
            }
        }

        report
    }

    /// Forward a trade command to the attached game
    pub fn set_embargo(&mut self, target: &str, stopped: bool) -> Result<(), GameCommandError> {
        let game = self.game.as_deref_mut().ok_or(GameCommandError::NotAttached)?;
        game.set_embargo(target, stopped)
    }

    fn detach(&mut self) {
        self.game = None;
        self.snapshot = None;
        self.memory = SessionMemory::default();
    }
}

fn read_cycle(
    game: &dyn LiveGame,
    memory: &mut SessionMemory,
    now_ms: u64,
    tick_ms: u64,
) -> Result<(SyncCycle, Option<SessionEvent>), GameReadError> {
    let tick = game.ticks()?;
    let self_id = game.my_player_id()?;
    let roster: Vec<RawPlayer> = game.players()?.into_iter().filter(|p| p.alive).collect();
    let units = game.units()?;
    let alliance_ticks = game.alliance_duration_ticks()?;
    let update_batch = game.update_batch()?;

    let boundary = detect_session_boundary(memory, roster.is_empty(), self_id.as_ref());
    if let Some(event) = &boundary {
        info!(target: "sync", "Session boundary detected ({:?}), clearing derived memory", event);
        *memory = SessionMemory::default();
    }
    memory.roster_was_empty = Some(roster.is_empty());
    memory.last_self_id = self_id.clone();

    let players = build_players(&roster, self_id.as_deref(), memory, tick, tick_ms);
    let ships = build_ships(&units, memory, tick);
    let structures_built = detect_structures(&units, &players, memory, tick);

    let snapshot = Arc::new(Snapshot {
        tick,
        players,
        ships,
        current_time_ms: now_ms,
        alliance_duration_ms: alliance_ticks.saturating_mul(tick_ms),
        self_id,
    });

    Ok((
        SyncCycle {
            snapshot,
            structures_built,
            update_batch,
        },
        boundary,
    ))
}

fn detect_session_boundary(
    memory: &SessionMemory,
    roster_empty: bool,
    self_id: Option<&PlayerId>,
) -> Option<SessionEvent> {
    if memory.roster_was_empty == Some(true) && !roster_empty {
        return Some(SessionEvent::RosterRepopulated);
    }
    match (memory.last_self_id.as_ref(), self_id) {
        (Some(prev), Some(cur)) if prev != cur => Some(SessionEvent::SelfChanged {
            from: prev.clone(),
            to: cur.clone(),
        }),
        _ => None,
    }
}

fn build_players(
    roster: &[RawPlayer],
    self_id: Option<&str>,
    memory: &mut SessionMemory,
    tick: u64,
    tick_ms: u64,
) -> Vec<PlayerRecord> {
    let me = self_id.and_then(|id| roster.iter().find(|p| p.id == id));
    let name_of = |id: &str| {
        roster
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| id.to_string())
    };

    roster
        .iter()
        .map(|raw| {
            let current: HashSet<PlayerId> =
                raw.alliances.iter().map(|a| a.partner_id.clone()).collect();
            let previous = memory.alliances.insert(raw.id.clone(), current.clone());

            if let Some(previous) = previous.filter(|_| raw.is_traitor) {
                for departed in previous.difference(&current) {
                    debug!(target: "sync", "{} betrayed {}", raw.name, departed);
                    memory
                        .betrayals
                        .entry(raw.id.clone())
                        .or_default()
                        .insert(departed.clone());
                }
            }

            let alliances = raw
                .alliances
                .iter()
                .map(|a| AllianceRecord {
                    partner_id: a.partner_id.clone(),
                    partner_name: name_of(&a.partner_id),
                    expires_at_tick: a.expires_at_tick,
                    remaining_ms: a.expires_at_tick.saturating_sub(tick).saturating_mul(tick_ms),
                })
                .collect();

            let is_self = self_id == Some(raw.id.as_str());
            PlayerRecord {
                id: raw.id.clone(),
                small_id: raw.small_id,
                name: raw.name.clone(),
                clan_tag: tactician_events::clan_tag_of(&raw.name),
                team: raw.team.clone(),
                tiles: raw.tiles,
                gold: raw.gold,
                troops: raw.troops,
                incoming_attacks: raw.incoming_attacks.iter().map(attack_record).collect(),
                outgoing_attacks: raw.outgoing_attacks.iter().map(attack_record).collect(),
                alliances,
                trade_stopped_by_self: !is_self
                    && me.is_some_and(|m| m.embargoes.contains(&raw.id)),
                trade_stopped_by_other: !is_self
                    && self_id.is_some_and(|id| raw.embargoes.iter().any(|e| e == id)),
                is_traitor: raw.is_traitor,
                betrayed: memory
                    .betrayals
                    .get(&raw.id)
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default(),
                is_self,
            }
        })
        .collect()
}

fn attack_record(raw: &RawAttack) -> AttackRecord {
    AttackRecord {
        attacker_id: raw.attacker_id.clone(),
        target_id: raw.target_id.clone(),
        troops: raw.troops,
        retreating: raw.retreating,
    }
}

fn build_ships(units: &[RawUnit], memory: &mut SessionMemory, tick: u64) -> Vec<ShipRecord> {
    let ships: Vec<ShipRecord> = units
        .iter()
        .filter(|u| u.active && u.kind.is_ship())
        .map(|u| {
            let seen = *memory.ships.entry(u.id).or_insert(ShipMemory {
                origin: u.tile,
                first_seen_tick: tick,
            });
            ShipRecord {
                id: u.id,
                owner_id: u.owner_id.clone(),
                kind: u.kind.clone(),
                troops: u.troops,
                tile: u.tile,
                target_tile: u.target_tile,
                origin_tile: seen.origin,
                first_seen_tick: seen.first_seen_tick,
                retreating: u.retreating,
            }
        })
        .collect();

    let live: HashSet<u64> = ships.iter().map(|s| s.id).collect();
    memory.ships.retain(|id, _| live.contains(id));
    ships
}

/// Structures not present last cycle. The first cycle of a session only seeds the cache.
fn detect_structures(
    units: &[RawUnit],
    players: &[PlayerRecord],
    memory: &mut SessionMemory,
    tick: u64,
) -> Vec<StructureBuilt> {
    let structures: Vec<&RawUnit> = units
        .iter()
        .filter(|u| u.active && u.kind.is_structure())
        .collect();
    let current: HashSet<u64> = structures.iter().map(|u| u.id).collect();

    let mut built = Vec::new();
    if memory.structures_seeded {
        for unit in structures.iter().filter(|u| !memory.structures.contains(&u.id)) {
            let owner = players
                .iter()
                .find(|p| p.id == unit.owner_id)
                .map(PlayerRecord::actor_ref)
                .unwrap_or_else(|| ActorRef {
                    id: unit.owner_id.clone(),
                    name: unit.owner_id.clone(),
                    team: None,
                    clan: None,
                    is_self: false,
                    synthetic: true,
                });
            built.push(StructureBuilt {
                tick,
                unit_id: unit.id,
                structure: unit.kind.name().to_string(),
                x: unit.tile.x,
                y: unit.tile.y,
                owner,
            });
        }
    }

    memory.structures = current;
    memory.structures_seeded = true;
    built
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{RawAlliance, UnitKind};
    use crate::sim::SimulatedGame;

    fn config() -> EngineConfig {
        EngineConfig {
            tick_ms: 100,
            discovery_retry_ms: 1000,
            ..EngineConfig::default()
        }
    }

    fn attached(sim: &SimulatedGame) -> Synchronizer {
        let mut sync = Synchronizer::new(Box::new(sim.clone()), &config());
        let report = sync.poll(0);
        assert_eq!(report.session_events.first(), Some(&SessionEvent::Attached));
        sync
    }

    #[test]
    fn test_discovery_retries_with_backoff() {
        let sim = SimulatedGame::new();
        sim.set_present(false);
        let mut sync = Synchronizer::new(Box::new(sim.clone()), &config());

        assert!(sync.poll(0).cycle.is_none());
        sim.set_present(true);
        // Still inside the retry window
        assert!(sync.poll(500).cycle.is_none());
        assert!(!sync.is_attached());

        let report = sync.poll(1000);
        assert!(sync.is_attached());
        assert!(report.cycle.is_some());
    }

    #[test]
    fn test_read_failure_detaches_and_clears() {
        let sim = SimulatedGame::demo();
        let mut sync = attached(&sim);
        assert!(sync.snapshot().is_some());

        sim.set_fail_reads(true);
        let report = sync.poll(100);
        assert!(matches!(
            report.session_events.as_slice(),
            [SessionEvent::Detached { .. }]
        ));
        assert!(!sync.is_attached());
        assert!(sync.snapshot().is_none());

        sim.set_fail_reads(false);
        assert!(sync.poll(200).cycle.is_none(), "rediscovery waits for backoff");
        assert!(sync.poll(1100).cycle.is_some());
    }

    #[test]
    fn test_traitor_history_is_sticky() {
        let sim = SimulatedGame::new();
        sim.with_world(|w| {
            w.self_id = Some("me".into());
            w.players = vec![
                RawPlayer::new("me", 1, "Me"),
                RawPlayer::new("tr", 2, "Turncoat").allied_with("ally", 500),
                RawPlayer::new("ally", 3, "Ally").allied_with("tr", 500),
            ];
        });
        let mut sync = attached(&sim);

        sim.with_world(|w| {
            let traitor = &mut w.players[1];
            traitor.alliances.clear();
            traitor.is_traitor = true;
            w.players[2].alliances.clear();
        });
        sync.poll(100);
        let snap = sync.snapshot().unwrap();
        assert_eq!(snap.player("tr").unwrap().betrayed, vec!["ally".to_string()]);

        // Traitor flag expires; the betrayal record stays for the session
        sim.with_world(|w| w.players[1].is_traitor = false);
        sync.poll(200);
        let snap = sync.snapshot().unwrap();
        assert_eq!(snap.player("tr").unwrap().betrayed, vec!["ally".to_string()]);
    }

    #[test]
    fn test_huge_tick_counts_saturate() {
        let sim = SimulatedGame::new();
        sim.with_world(|w| {
            w.alliance_duration_ticks = u64::MAX;
            w.players = vec![
                RawPlayer::new("a", 1, "A").allied_with("b", u64::MAX),
                RawPlayer::new("b", 2, "B").allied_with("a", u64::MAX),
            ];
        });
        let sync = attached(&sim);
        let snap = sync.snapshot().unwrap();
        assert_eq!(snap.alliance_duration_ms, u64::MAX);
        assert_eq!(snap.player("a").unwrap().alliances[0].remaining_ms, u64::MAX);
    }

    #[test]
    fn test_alliance_ending_without_traitor_flag_is_not_betrayal() {
        let sim = SimulatedGame::new();
        sim.with_world(|w| {
            w.players = vec![RawPlayer::new("a", 1, "A").allied_with("b", 10)];
        });
        let mut sync = attached(&sim);
        sim.with_world(|w| w.players[0].alliances.clear());
        sync.poll(100);
        assert!(sync.snapshot().unwrap().players[0].betrayed.is_empty());
    }

    #[test]
    fn test_self_change_resets_memory() {
        let sim = SimulatedGame::demo();
        let mut sync = attached(&sim);
        sim.with_world(|w| w.self_id = Some("p2".into()));
        let report = sync.poll(100);
        assert!(matches!(
            report.session_events.as_slice(),
            [SessionEvent::SelfChanged { .. }]
        ));
    }

    #[test]
    fn test_roster_repopulated_is_a_session_boundary() {
        let sim = SimulatedGame::new();
        let mut sync = attached(&sim);
        sim.with_world(|w| w.players.push(RawPlayer::new("a", 1, "A")));
        let report = sync.poll(100);
        assert_eq!(report.session_events, vec![SessionEvent::RosterRepopulated]);
    }

    #[test]
    fn test_structures_seed_then_detect() {
        let sim = SimulatedGame::demo();
        sim.with_world(|w| {
            w.units
                .push(RawUnit::new(900, "p1", UnitKind::City, Tile::new(1, 1)));
        });
        let mut sync = attached(&sim);

        sim.with_world(|w| {
            w.units
                .push(RawUnit::new(901, "p2", UnitKind::Port, Tile::new(4, 2)));
        });
        let cycle = sync.poll(100).cycle.unwrap();
        assert_eq!(cycle.structures_built.len(), 1);
        let built = &cycle.structures_built[0];
        assert_eq!(built.unit_id, 901);
        assert_eq!(built.structure, "Port");
        assert_eq!(built.owner.id, "p2");
    }

    #[test]
    fn test_ship_memory_keeps_origin() {
        let sim = SimulatedGame::demo();
        sim.with_world(|w| {
            w.units
                .push(RawUnit::new(5, "p1", UnitKind::TransportShip, Tile::new(0, 0)));
        });
        let mut sync = attached(&sim);
        sim.with_world(|w| w.units[0].tile = Tile::new(3, 3));
        sync.poll(100);
        let snap = sync.snapshot().unwrap();
        assert_eq!(snap.ships[0].origin_tile, Tile::new(0, 0));
        assert_eq!(snap.ships[0].tile, Tile::new(3, 3));
    }

    #[test]
    fn test_trade_flags_relative_to_self() {
        let sim = SimulatedGame::new();
        sim.with_world(|w| {
            w.self_id = Some("me".into());
            let mut me = RawPlayer::new("me", 1, "Me");
            me.embargoes.push("x".into());
            let mut y = RawPlayer::new("y", 3, "Y");
            y.embargoes.push("me".into());
            w.players = vec![me, RawPlayer::new("x", 2, "X"), y];
            w.players[1].alliances.push(RawAlliance {
                partner_id: "me".into(),
                expires_at_tick: 30,
            });
        });
        let sync = attached(&sim);
        let snap = sync.snapshot().unwrap();
        assert!(snap.player("x").unwrap().trade_stopped_by_self);
        assert!(snap.player("y").unwrap().trade_stopped_by_other);
        assert!(!snap.player("me").unwrap().trade_stopped_by_self);
        assert_eq!(snap.player("x").unwrap().alliances[0].remaining_ms, 3000);
    }
}
