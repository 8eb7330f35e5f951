//! Forka IPC - Inter-Process Communication
//!
//! Message and group metadata types shared by the platform adapter and the
//! dispatcher, plus the event bus that connects them.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{debug, warn};

static NEXT_TRACE_COUNTER: AtomicU64 = AtomicU64::new(1);

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn generate_trace_id() -> String {
    let ts = now_unix_secs();
    let n = NEXT_TRACE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("trace-{}-{}", ts, n)
}

fn default_schema_version() -> u16 {
    1
}

fn default_trace_id() -> String {
    generate_trace_id()
}

fn default_envelope_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    #[serde(default = "default_trace_id")]
    pub trace_id: String,
    #[serde(default = "default_envelope_id")]
    pub id: String,
    pub channel: String,
    pub kind: MessageKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageKind {
    #[serde(rename = "message")]
    Message(InboundMessage),

    #[serde(rename = "membership")]
    Membership(MembershipChange),
}

/// A text message as delivered by the platform adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub conversation_id: String,
    /// Participant address in groups, the conversation address in direct chats.
    pub sender: String,
    pub text: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
    /// Sender of the message this one replies to.
    #[serde(default)]
    pub quoted_sender: Option<String>,
    #[serde(default)]
    pub from_agent: bool,
}

impl InboundMessage {
    pub fn new(conversation_id: &str, sender: &str, text: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            sender: sender.to_string(),
            text: text.to_string(),
            message_id: None,
            mentions: Vec::new(),
            quoted_sender: None,
            from_agent: false,
        }
    }

    pub fn with_mentions(mut self, mentions: Vec<String>) -> Self {
        self.mentions = mentions;
        self
    }

    pub fn with_quoted_sender(mut self, sender: &str) -> Self {
        self.quoted_sender = Some(sender.to_string());
        self
    }

    pub fn with_message_id(mut self, message_id: &str) -> Self {
        self.message_id = Some(message_id.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
}

impl ParticipantAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Promote => "promote",
            Self::Demote => "demote",
        }
    }
}

/// Platform notification that a group's membership or roles changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipChange {
    pub conversation_id: String,
    pub participants: Vec<String>,
    pub action: ParticipantAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminLevel {
    #[default]
    None,
    Admin,
    #[serde(alias = "superadmin")]
    SuperAdmin,
}

impl AdminLevel {
    pub fn is_admin(self) -> bool {
        matches!(self, Self::Admin | Self::SuperAdmin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupParticipant {
    pub address: String,
    /// The other encoding of the same participant when the platform reports it.
    #[serde(default)]
    pub alternate: Option<String>,
    #[serde(default)]
    pub admin: AdminLevel,
}

impl GroupParticipant {
    pub fn new(address: &str, admin: AdminLevel) -> Self {
        Self {
            address: address.to_string(),
            alternate: None,
            admin,
        }
    }

    pub fn with_alternate(mut self, alternate: &str) -> Self {
        self.alternate = Some(alternate.to_string());
        self
    }
}

/// Authoritative group metadata as returned by the platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub announce: bool,
    #[serde(default)]
    pub participants: Vec<GroupParticipant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "setting", content = "value", rename_all = "snake_case")]
pub enum GroupSetting {
    /// Only admins may post.
    Announcement,
    NotAnnouncement,
    Subject(String),
    Description(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub conversation_id: String,
    pub text: String,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
}

impl OutboundMessage {
    pub fn text(conversation_id: &str, text: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
            mentions: Vec::new(),
            reply_to: None,
        }
    }
}

impl Envelope {
    pub fn new(channel: &str, kind: MessageKind) -> Self {
        Self {
            schema_version: default_schema_version(),
            trace_id: generate_trace_id(),
            id: default_envelope_id(),
            channel: channel.to_string(),
            kind,
        }
    }

    pub fn message(channel: &str, message: InboundMessage) -> Self {
        Self::new(channel, MessageKind::Message(message))
    }

    pub fn membership(channel: &str, change: MembershipChange) -> Self {
        Self::new(channel, MessageKind::Membership(change))
    }

    pub fn with_trace_id(mut self, trace_id: String) -> Self {
        self.trace_id = trace_id;
        self
    }

    pub fn conversation_id(&self) -> &str {
        match &self.kind {
            MessageKind::Message(message) => &message.conversation_id,
            MessageKind::Membership(change) => &change.conversation_id,
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

pub const EVENT_BUS_CAPACITY: usize = 256;
pub const OUTBOUND_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    inbound: broadcast::Sender<Envelope>,
    outbound: broadcast::Sender<OutboundMessage>,
}

impl EventBus {
    pub fn new() -> Self {
        let (inbound_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let (outbound_tx, _) = broadcast::channel(OUTBOUND_CAPACITY);

        Self {
            inbound: inbound_tx,
            outbound: outbound_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inbound.subscribe()
    }

    /// Fails when nothing is subscribed; the envelope is dropped.
    pub fn publish(&self, envelope: Envelope) -> anyhow::Result<()> {
        match self.inbound.send(envelope) {
            Ok(receivers) => {
                debug!("Published envelope to {} subscriber(s)", receivers);
                Ok(())
            }
            Err(broadcast::error::SendError(envelope)) => {
                warn!(
                    "Dropped envelope {} (trace_id={}): no subscribers",
                    envelope.id, envelope.trace_id
                );
                anyhow::bail!("no subscribers for envelope {}", envelope.id)
            }
        }
    }

    pub fn outbound_sender(&self) -> broadcast::Sender<OutboundMessage> {
        self.outbound.clone()
    }

    pub fn outbound_subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.outbound.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> InboundMessage {
        InboundMessage::new("120363@g.us", "5551234@lid", ".ping")
    }

    #[test]
    fn envelope_has_schema_version_and_trace_id() {
        let env = Envelope::message("console", sample_message());
        assert_eq!(env.schema_version, 1);
        assert!(env.trace_id.starts_with("trace-"));
        assert_eq!(env.conversation_id(), "120363@g.us");
    }

    #[test]
    fn trace_id_different_for_each_envelope() {
        let env1 = Envelope::message("console", sample_message());
        let env2 = Envelope::message("console", sample_message());
        assert_ne!(env1.trace_id, env2.trace_id);
        assert_ne!(env1.id, env2.id);
    }

    #[test]
    fn legacy_json_with_missing_fields_gets_defaults() {
        let json = r#"{
            "channel": "console",
            "kind": {
                "type": "message",
                "conversation_id": "5551234@s.whatsapp.net",
                "sender": "5551234@s.whatsapp.net",
                "text": ".whoami"
            }
        }"#;
        let env = Envelope::from_json(json).expect("deserialize");
        assert_eq!(env.schema_version, 1);
        assert!(!env.trace_id.is_empty());
        assert!(!env.id.is_empty());
        match env.kind {
            MessageKind::Message(message) => {
                assert!(message.mentions.is_empty());
                assert!(!message.from_agent);
            }
            MessageKind::Membership(_) => panic!("expected message"),
        }
    }

    #[test]
    fn membership_change_parses_action() {
        let json = r#"{
            "channel": "console",
            "kind": {
                "type": "membership",
                "conversation_id": "120363@g.us",
                "participants": ["5551234@lid"],
                "action": "promote"
            }
        }"#;
        let env = Envelope::from_json(json).expect("deserialize");
        match env.kind {
            MessageKind::Membership(change) => {
                assert_eq!(change.action, ParticipantAction::Promote);
                assert_eq!(change.participants, vec!["5551234@lid".to_string()]);
            }
            MessageKind::Message(_) => panic!("expected membership change"),
        }
    }

    #[test]
    fn admin_level_accepts_platform_spelling() {
        let participant: GroupParticipant =
            serde_json::from_str(r#"{"address":"1@lid","admin":"superadmin"}"#).expect("parse");
        assert_eq!(participant.admin, AdminLevel::SuperAdmin);
        assert!(participant.admin.is_admin());
        assert!(!AdminLevel::default().is_admin());
    }

    #[tokio::test]
    async fn event_bus_delivers_to_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Envelope::message("console", sample_message()))
            .expect("publish");
        let received = rx.recv().await.expect("recv");
        assert_eq!(received.conversation_id(), "120363@g.us");
    }

    #[test]
    fn publish_without_subscribers_fails() {
        let bus = EventBus::new();
        let err = bus
            .publish(Envelope::message("console", sample_message()))
            .expect_err("no subscribers");
        assert!(err.to_string().contains("no subscribers"));
    }
}
