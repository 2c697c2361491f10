//! Topic grammar, publisher cadence, and subscriber dispatch for the
//! pub/sub gossip channel edges use to announce themselves and their
//! capabilities.
//!
//! Topic grammar: `edge/<eui64-hex>/announce`, `edge/<eui64-hex>/unannounce`,
//! `edge/<eui64-hex>/capability/<name>/add`, `edge/<eui64-hex>/capability/<name>/remove`.

use std::net::Ipv6Addr;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::eui64::Eui64;

#[derive(Debug, Error)]
pub enum GossipError {
    #[error("malformed topic: {0}")]
    MalformedTopic(String),
    #[error("topic addresses this node's own identity, ignored")]
    SelfIdentity,
    #[error("channel closed")]
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GossipAction {
    Announce,
    Unannounce,
    CapabilityAdd { capability: String },
    CapabilityRemove { capability: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GossipMessage {
    pub eui64: Eui64,
    pub action: GossipAction,
}

/// Parses a topic of the form `edge/<eui64-hex>/...` into a typed action,
/// rejecting malformed segments and topics that name our own identity.
pub fn parse_topic(topic: &str, our_eui64: &Eui64) -> Result<GossipMessage, GossipError> {
    let mut segments = topic.split('/');

    match segments.next() {
        Some("edge") => {}
        _ => return Err(GossipError::MalformedTopic(topic.to_string())),
    }

    let eui_hex = segments
        .next()
        .ok_or_else(|| GossipError::MalformedTopic(topic.to_string()))?;
    let eui64 = Eui64::parse_hex(eui_hex).ok_or_else(|| GossipError::MalformedTopic(topic.to_string()))?;

    if &eui64 == our_eui64 {
        return Err(GossipError::SelfIdentity);
    }

    let action = match segments.next() {
        Some("announce") => GossipAction::Announce,
        Some("unannounce") => GossipAction::Unannounce,
        Some("capability") => {
            let name = segments
                .next()
                .ok_or_else(|| GossipError::MalformedTopic(topic.to_string()))?;
            match segments.next() {
                Some("add") => GossipAction::CapabilityAdd { capability: name.to_string() },
                Some("remove") => GossipAction::CapabilityRemove { capability: name.to_string() },
                _ => return Err(GossipError::MalformedTopic(topic.to_string())),
            }
        }
        _ => return Err(GossipError::MalformedTopic(topic.to_string())),
    };

    if segments.next().is_some() {
        return Err(GossipError::MalformedTopic(topic.to_string()));
    }

    Ok(GossipMessage { eui64, action })
}

pub fn announce_topic(eui64: &Eui64) -> String {
    format!("edge/{eui64}/announce")
}

pub fn unannounce_topic(eui64: &Eui64) -> String {
    format!("edge/{eui64}/unannounce")
}

pub fn capability_add_topic(eui64: &Eui64, capability: &str) -> String {
    format!("edge/{eui64}/capability/{capability}/add")
}

pub fn capability_remove_topic(eui64: &Eui64, capability: &str) -> String {
    format!("edge/{eui64}/capability/{capability}/remove")
}

const BASE_CADENCE: Duration = Duration::from_secs(30);
const DECAY_MULTIPLIER: u32 = 15;
const FAST_BROADCASTS: u8 = 3;

/// Publisher-side cadence state: fast for the first few broadcasts, then
/// settles permanently at `DECAY_MULTIPLIER` times the base period.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AnnounceCadence {
    Fast { remaining: u8 },
    Slow,
}

/// Publisher-side cadence: announces start at `BASE_CADENCE` for the first
/// few broadcasts, then decay to `DECAY_MULTIPLIER`x that period, with a
/// one-shot reset to the fast cadence on demand (e.g. after a capability
/// change needs to propagate quickly).
pub struct PublishSchedule {
    cadence: AnnounceCadence,
    last_fired: Option<Instant>,
}

impl PublishSchedule {
    pub fn new() -> Self {
        Self {
            cadence: AnnounceCadence::Fast { remaining: FAST_BROADCASTS },
            last_fired: None,
        }
    }

    pub fn current_interval(&self) -> Duration {
        match self.cadence {
            AnnounceCadence::Fast { .. } => BASE_CADENCE,
            AnnounceCadence::Slow => BASE_CADENCE.saturating_mul(DECAY_MULTIPLIER),
        }
    }

    pub fn due(&self, now: Instant) -> bool {
        match self.last_fired {
            None => true,
            Some(last) => now.duration_since(last) >= self.current_interval(),
        }
    }

    pub fn record_fired(&mut self, now: Instant) {
        self.last_fired = Some(now);
        self.cadence = match self.cadence {
            AnnounceCadence::Fast { remaining: 1 } | AnnounceCadence::Fast { remaining: 0 } => AnnounceCadence::Slow,
            AnnounceCadence::Fast { remaining } => AnnounceCadence::Fast { remaining: remaining - 1 },
            AnnounceCadence::Slow => AnnounceCadence::Slow,
        };
    }

    /// Forces the next cadence back to the fast, un-decayed interval.
    pub fn force_fast_cadence(&mut self) {
        self.cadence = AnnounceCadence::Fast { remaining: FAST_BROADCASTS };
        self.last_fired = None;
    }
}

impl Default for PublishSchedule {
    fn default() -> Self {
        Self::new()
    }
}

/// Round-robins which capability gets republished on each publisher tick,
/// so a large capability set doesn't need to fit in a single announcement.
pub struct CapabilityPublisher {
    capabilities: Vec<String>,
    cursor: usize,
}

impl CapabilityPublisher {
    pub fn new(capabilities: Vec<String>) -> Self {
        Self { capabilities, cursor: 0 }
    }

    pub fn next(&mut self) -> Option<&str> {
        if self.capabilities.is_empty() {
            return None;
        }
        let name = &self.capabilities[self.cursor];
        self.cursor = (self.cursor + 1) % self.capabilities.len();
        Some(name)
    }

    pub fn set_capabilities(&mut self, capabilities: Vec<String>) {
        self.capabilities = capabilities;
        self.cursor = 0;
    }
}

/// One gossip-driven event handed to whichever subsystem tracks a
/// capability's lifecycle (registry updates, trust-model bootstrap, etc).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapabilityEvent {
    pub eui64: Eui64,
    pub action: GossipAction,
}

/// Subscriber-side dispatch: parses inbound topics and forwards recognised
/// events on a bounded channel, dropping anything malformed or
/// self-addressed rather than propagating it further.
pub struct Subscriber {
    our_eui64: Eui64,
    sender: mpsc::Sender<CapabilityEvent>,
}

impl Subscriber {
    pub fn new(our_eui64: Eui64, capacity: usize) -> (Self, mpsc::Receiver<CapabilityEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { our_eui64, sender }, receiver)
    }

    pub async fn dispatch(&self, topic: &str, _peer_address: Ipv6Addr) -> Result<(), GossipError> {
        let message = parse_topic(topic, &self.our_eui64)?;
        self.sender
            .send(CapabilityEvent {
                eui64: message.eui64,
                action: message.action,
            })
            .await
            .map_err(|_| GossipError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eui(byte: u8) -> Eui64 {
        Eui64([byte; 8])
    }

    #[test]
    fn parses_announce_and_capability_topics() {
        let target = eui(1);
        let msg = parse_topic(&announce_topic(&target), &eui(0)).unwrap();
        assert_eq!(msg.eui64, target);
        assert_eq!(msg.action, GossipAction::Announce);

        let msg = parse_topic(&capability_add_topic(&target, "temperature"), &eui(0)).unwrap();
        assert_eq!(
            msg.action,
            GossipAction::CapabilityAdd {
                capability: "temperature".to_string()
            }
        );
    }

    #[test]
    fn rejects_self_identity_and_malformed_topics() {
        let me = eui(5);
        assert!(matches!(
            parse_topic(&announce_topic(&me), &me),
            Err(GossipError::SelfIdentity)
        ));
        assert!(parse_topic("edge/not-hex/announce", &me).is_err());
        assert!(parse_topic("edge/0101010101010101/capability/x", &me).is_err());
    }

    #[test]
    fn publish_schedule_decays_after_a_few_fast_broadcasts_then_holds() {
        let mut schedule = PublishSchedule::new();
        for _ in 0..FAST_BROADCASTS {
            assert_eq!(schedule.current_interval(), BASE_CADENCE);
            schedule.record_fired(Instant::now());
        }
        let decayed = schedule.current_interval();
        assert_eq!(decayed, BASE_CADENCE * DECAY_MULTIPLIER);

        schedule.record_fired(Instant::now());
        assert_eq!(schedule.current_interval(), decayed);
    }

    #[test]
    fn force_fast_cadence_resets_backoff() {
        let mut schedule = PublishSchedule::new();
        for _ in 0..5 {
            schedule.record_fired(Instant::now());
        }
        schedule.force_fast_cadence();
        assert_eq!(schedule.current_interval(), BASE_CADENCE);
    }

    #[test]
    fn capability_publisher_round_robins() {
        let mut publisher = CapabilityPublisher::new(vec!["a".into(), "b".into()]);
        assert_eq!(publisher.next(), Some("a"));
        assert_eq!(publisher.next(), Some("b"));
        assert_eq!(publisher.next(), Some("a"));
    }

    #[tokio::test]
    async fn subscriber_forwards_parsed_events_and_drops_self_topics() {
        let me = eui(9);
        let (subscriber, mut rx) = Subscriber::new(me, 4);
        let other = eui(10);

        subscriber
            .dispatch(&announce_topic(&other), "fe80::1".parse().unwrap())
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.eui64, other);

        assert!(subscriber
            .dispatch(&announce_topic(&me), "fe80::1".parse().unwrap())
            .await
            .is_err());
    }
}
