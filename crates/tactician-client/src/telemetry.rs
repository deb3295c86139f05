//! Telemetry extractor.
//!
//! Mines the per-tick batch of display messages for donation lines and turns
//! them into structured [`DomainEvent`]s. The same donation can be reported
//! more than once within a tick, so each kind keeps a tick-indexed
//! [`DedupWindow`].

use std::collections::HashMap;
use tracing::{debug, trace};

use tactician_events::{ActorRef, Donation, DonationDirection, DonationKind, DomainEvent};

use crate::game::{DisplayMessage, MessageType, UpdateBatch};
use crate::snapshot::Snapshot;

/// Default number of ticks a de-dup entry is remembered for
pub const DEFAULT_DEDUP_HORIZON: u64 = 5;

/// Map from composed event key to the tick it was last seen on
#[derive(Debug, Clone)]
pub struct DedupWindow {
    horizon: u64,
    seen: HashMap<String, u64>,
}

impl DedupWindow {
    pub fn new(horizon: u64) -> Self {
        Self {
            horizon,
            seen: HashMap::new(),
        }
    }

    /// Record `key` at `tick`. Returns false if the same key was already
    /// recorded at this very tick.
    pub fn admit(&mut self, key: String, tick: u64) -> bool {
        self.prune(tick);
        if self.seen.get(&key) == Some(&tick) {
            return false;
        }
        self.seen.insert(key, tick);
        true
    }

    /// Drop entries older than the horizon
    pub fn prune(&mut self, tick: u64) {
        let horizon = self.horizon;
        self.seen.retain(|_, seen| tick.saturating_sub(*seen) <= horizon);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

/// A donation line recovered from free text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDonation {
    pub kind: DonationKind,
    pub direction: DonationDirection,
    pub amount: String,
    pub counterpart: String,
}

/// Apply the fixed text pattern for a donation message code
pub fn parse_donation(message_type: MessageType, text: &str) -> Option<ParsedDonation> {
    const SENT: &[&str] = &["Sent "];
    // The game has shipped both spellings
    const RECEIVED: &[&str] = &["Received ", "Recieved "];

    let (kind, direction, prefixes, infix) = match message_type {
        MessageType::SentTroopsToPlayer => {
            (DonationKind::Troops, DonationDirection::Sent, SENT, " troops to ")
        }
        MessageType::ReceivedTroopsFromPlayer => (
            DonationKind::Troops,
            DonationDirection::Received,
            RECEIVED,
            " troops from ",
        ),
        MessageType::SentGoldToPlayer => {
            (DonationKind::Gold, DonationDirection::Sent, SENT, " gold to ")
        }
        MessageType::ReceivedGoldFromPlayer => (
            DonationKind::Gold,
            DonationDirection::Received,
            RECEIVED,
            " gold from ",
        ),
        MessageType::Other(_) => return None,
    };

    let text = text.trim();
    let rest = prefixes.iter().find_map(|p| text.strip_prefix(p))?;
    let (amount, counterpart) = rest.split_once(infix)?;
    let amount = amount.trim();
    let counterpart = counterpart.trim();
    if amount.is_empty() || counterpart.is_empty() {
        return None;
    }

    Some(ParsedDonation {
        kind,
        direction,
        amount: amount.to_string(),
        counterpart: counterpart.to_string(),
    })
}

/// Approximate numeric value of a displayed amount: `1234`, `1,234`, `1.2K`, `3M`
pub fn approx_amount(display: &str) -> Option<u64> {
    let cleaned: String = display
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    let (digits, scale) = match cleaned.chars().last()? {
        'k' | 'K' => (&cleaned[..cleaned.len() - 1], 1e3),
        'm' | 'M' => (&cleaned[..cleaned.len() - 1], 1e6),
        'b' | 'B' => (&cleaned[..cleaned.len() - 1], 1e9),
        _ => (cleaned.as_str(), 1.0),
    };
    let value: f64 = digits.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * scale).round() as u64)
}

fn normalize_amount_text(display: &str) -> String {
    display
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

pub struct TelemetryExtractor {
    last_batch_tick: Option<u64>,
    troops: DedupWindow,
    gold: DedupWindow,
}

impl TelemetryExtractor {
    pub fn new(horizon: u64) -> Self {
        Self {
            last_batch_tick: None,
            troops: DedupWindow::new(horizon),
            gold: DedupWindow::new(horizon),
        }
    }

    /// Forget everything learned this session
    pub fn reset(&mut self) {
        self.last_batch_tick = None;
        self.troops.clear();
        self.gold.clear();
    }

    pub fn window_len(&self, kind: DonationKind) -> usize {
        match kind {
            DonationKind::Troops => self.troops.len(),
            DonationKind::Gold => self.gold.len(),
        }
    }

    /// Extract donation events from a batch, resolving names against `snapshot`.
    /// A batch for a tick that was already processed yields nothing.
    pub fn extract(&mut self, batch: &UpdateBatch, snapshot: &Snapshot) -> Vec<DomainEvent> {
        if self.last_batch_tick == Some(batch.tick) {
            trace!(target: "telemetry", "Batch for tick {} already processed", batch.tick);
            return Vec::new();
        }
        self.last_batch_tick = Some(batch.tick);

        // Prune both windows every cycle so a kind that goes quiet does not keep stale keys
        self.troops.prune(batch.tick);
        self.gold.prune(batch.tick);

        let mut events = Vec::new();
        for message in &batch.messages {
            let Some(parsed) = parse_donation(message.message_type, &message.message) else {
                continue;
            };
            if let Some(event) = self.build_event(batch.tick, message, parsed, snapshot) {
                events.push(event);
            }
        }
        events
    }

    fn build_event(
        &mut self,
        tick: u64,
        message: &DisplayMessage,
        parsed: ParsedDonation,
        snapshot: &Snapshot,
    ) -> Option<DomainEvent> {
        let local = message
            .player_id
            .and_then(|small_id| snapshot.player_by_small_id(small_id))
            .map(|p| p.actor_ref())
            .unwrap_or_else(|| {
                let label = message
                    .player_id
                    .map(|id| format!("#{}", id))
                    .unwrap_or_else(|| "#unknown".to_string());
                ActorRef::synthetic(label)
            });
        let other = snapshot
            .player_by_name(&parsed.counterpart)
            .map(|p| p.actor_ref())
            .unwrap_or_else(|| ActorRef::synthetic(parsed.counterpart.clone()));

        let (sender, recipient) = match parsed.direction {
            DonationDirection::Sent => (local, other),
            DonationDirection::Received => (other, local),
        };

        let approx = approx_amount(&parsed.amount);
        let amount_key = approx
            .map(|n| n.to_string())
            .unwrap_or_else(|| normalize_amount_text(&parsed.amount));
        let key = format!("{}|{}|{}", sender.id, recipient.id, amount_key);

        let window = match parsed.kind {
            DonationKind::Troops => &mut self.troops,
            DonationKind::Gold => &mut self.gold,
        };
        if !window.admit(key.clone(), tick) {
            debug!(target: "telemetry", "Suppressed duplicate donation {} at tick {}", key, tick);
            return None;
        }

        let donation = Donation {
            tick,
            kind: parsed.kind,
            direction: parsed.direction,
            sender,
            recipient,
            amount_display: parsed.amount,
            approx_amount: approx,
        };
        Some(match parsed.kind {
            DonationKind::Troops => DomainEvent::TroopsDonated(donation),
            DonationKind::Gold => DomainEvent::GoldDonated(donation),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approx_amount_formats() {
        assert_eq!(approx_amount("1234"), Some(1234));
        assert_eq!(approx_amount("1,234"), Some(1234));
        assert_eq!(approx_amount("1.5K"), Some(1500));
        assert_eq!(approx_amount("2.25M"), Some(2_250_000));
        assert_eq!(approx_amount("12k"), Some(12_000));
        assert_eq!(approx_amount("lots"), None);
        assert_eq!(approx_amount(""), None);
    }

    #[test]
    fn test_parse_each_message_code() {
        let p = parse_donation(MessageType::SentTroopsToPlayer, "Sent 1.2K troops to Bob").unwrap();
        assert_eq!(p.kind, DonationKind::Troops);
        assert_eq!(p.direction, DonationDirection::Sent);
        assert_eq!(p.amount, "1.2K");
        assert_eq!(p.counterpart, "Bob");

        let p = parse_donation(
            MessageType::ReceivedTroopsFromPlayer,
            "Recieved 500 troops from [AB] Ann",
        )
        .unwrap();
        assert_eq!(p.direction, DonationDirection::Received);
        assert_eq!(p.counterpart, "[AB] Ann");

        let p = parse_donation(MessageType::SentGoldToPlayer, "Sent 10,000 gold to Zed").unwrap();
        assert_eq!(p.kind, DonationKind::Gold);
        assert_eq!(p.amount, "10,000");

        assert!(
            parse_donation(MessageType::ReceivedGoldFromPlayer, "Received 3M gold from Kim")
                .is_some()
        );
    }

    #[test]
    fn test_parse_rejects_mismatched_text() {
        assert!(parse_donation(MessageType::SentGoldToPlayer, "Sent 5 troops to Bob").is_none());
        assert!(parse_donation(MessageType::Other(7), "Sent 5 gold to Bob").is_none());
        assert!(parse_donation(MessageType::SentGoldToPlayer, "Sent  gold to Bob").is_none());
    }

    #[test]
    fn test_window_same_tick_suppressed() {
        let mut window = DedupWindow::new(DEFAULT_DEDUP_HORIZON);
        assert!(window.admit("a".into(), 10));
        assert!(!window.admit("a".into(), 10));
        assert!(window.admit("a".into(), 11));
    }

    #[test]
    fn test_window_evicts_past_horizon() {
        let mut window = DedupWindow::new(5);
        window.admit("old".into(), 1);
        window.admit("new".into(), 6);
        assert_eq!(window.len(), 2);
        window.admit("newer".into(), 7);
        assert_eq!(window.len(), 2, "entry from tick 1 is more than 5 ticks old");
    }
}
