use serde::{Deserialize, Serialize};

use crate::Value;

/// Bus name of [`DomainEvent::StructureBuilt`]
pub const STRUCTURE_BUILT: &str = "structureBuilt";
/// Bus name of [`DomainEvent::TroopsDonated`]
pub const TROOPS_DONATED: &str = "troopsDonated";
/// Bus name of [`DomainEvent::GoldDonated`]
pub const GOLD_DONATED: &str = "goldDonated";

/// A player as referenced by an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRef {
    pub id: String,
    pub name: String,
    pub team: Option<String>,
    pub clan: Option<String>,
    pub is_self: bool,
    /// True when the actor could not be resolved against the roster
    pub synthetic: bool,
}

impl ActorRef {
    /// Placeholder for a name that did not match anyone on the roster
    pub fn synthetic(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: format!("unresolved:{}", name),
            clan: clan_tag_of(&name),
            name,
            team: None,
            is_self: false,
            synthetic: true,
        }
    }

    /// Team and clan fields for a payload. Unresolved actors leave both
    /// fields out; resolved actors without a team carry an explicit null.
    fn write_affiliation(&self, payload: Value) -> Value {
        if self.synthetic {
            return payload;
        }
        let payload = payload.with("team", self.team.clone());
        match &self.clan {
            Some(clan) => payload.with("clan", clan.as_str()),
            None => payload,
        }
    }
}

/// Extracts the clan tag from a `[TAG] Name` display name
pub fn clan_tag_of(name: &str) -> Option<String> {
    let rest = name.trim_start().strip_prefix('[')?;
    let (tag, _) = rest.split_once(']')?;
    let tag = tag.trim();
    if tag.is_empty() {
        None
    } else {
        Some(tag.to_uppercase())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureBuilt {
    pub tick: u64,
    pub unit_id: u64,
    pub structure: String,
    pub x: u32,
    pub y: u32,
    pub owner: ActorRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DonationKind {
    Troops,
    Gold,
}

/// Direction as seen from the local player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DonationDirection {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    pub tick: u64,
    pub kind: DonationKind,
    pub direction: DonationDirection,
    pub sender: ActorRef,
    pub recipient: ActorRef,
    /// Amount exactly as the game displayed it
    pub amount_display: String,
    /// Approximate numeric amount, only used for de-duplication
    pub approx_amount: Option<u64>,
}

impl Donation {
    /// The non-local party of the donation
    pub fn counterpart(&self) -> &ActorRef {
        match self.direction {
            DonationDirection::Sent => &self.recipient,
            DonationDirection::Received => &self.sender,
        }
    }
}

/// Structured fact mined from the game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DomainEvent {
    StructureBuilt(StructureBuilt),
    TroopsDonated(Donation),
    GoldDonated(Donation),
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::StructureBuilt(_) => STRUCTURE_BUILT,
            DomainEvent::TroopsDonated(_) => TROOPS_DONATED,
            DomainEvent::GoldDonated(_) => GOLD_DONATED,
        }
    }

    pub fn tick(&self) -> u64 {
        match self {
            DomainEvent::StructureBuilt(s) => s.tick,
            DomainEvent::TroopsDonated(d) | DomainEvent::GoldDonated(d) => d.tick,
        }
    }

    /// Flatten into the payload scripts see on the event bus.
    ///
    /// Grouping fields (`team`, `clan`) come from the structure owner, or from
    /// the counterpart of a donation.
    pub fn to_bus_event(&self) -> BusEvent {
        let payload = match self {
            DomainEvent::StructureBuilt(s) => s.owner.write_affiliation(
                Value::map()
                    .with("tick", s.tick)
                    .with("unitId", s.unit_id)
                    .with("structureType", s.structure.as_str())
                    .with("x", s.x)
                    .with("y", s.y)
                    .with("ownerId", s.owner.id.as_str())
                    .with("ownerName", s.owner.name.as_str())
                    .with("isSelf", s.owner.is_self),
            ),
            DomainEvent::TroopsDonated(d) | DomainEvent::GoldDonated(d) => {
                let direction = match d.direction {
                    DonationDirection::Sent => "sent",
                    DonationDirection::Received => "received",
                };
                d.counterpart().write_affiliation(
                    Value::map()
                        .with("tick", d.tick)
                        .with("direction", direction)
                        .with("senderId", d.sender.id.as_str())
                        .with("senderName", d.sender.name.as_str())
                        .with("recipientId", d.recipient.id.as_str())
                        .with("recipientName", d.recipient.name.as_str())
                        .with("amount", d.amount_display.as_str())
                        .with("approxAmount", d.approx_amount),
                )
            }
        };
        BusEvent {
            name: self.name().to_string(),
            tick: self.tick(),
            payload,
        }
    }
}

/// Event as carried by the per-instance event bus
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub name: String,
    pub tick: u64,
    pub payload: Value,
}

impl BusEvent {
    pub fn new(name: impl Into<String>, tick: u64, payload: Value) -> Self {
        Self {
            name: name.into(),
            tick,
            payload,
        }
    }
}
