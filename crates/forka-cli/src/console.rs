//! Console platform
//!
//! Runs the dispatcher against stdin. Group metadata comes from a TOML
//! fixture and group changes are applied to it in memory; replies go out on
//! the event bus outbound channel and are printed by the caller.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use forka_core::Platform;
use forka_identity::{is_group_address, CanonicalId};
use forka_ipc::{
    AdminLevel, GroupMetadata, GroupParticipant, GroupSetting, InboundMessage, OutboundMessage,
    ParticipantAction,
};
use forka_policy::MetadataSource;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

pub const DEFAULT_AGENT: &str = "10000@s.whatsapp.net";

/// Console fixture file.
///
/// ```toml
/// agent = "10000@s.whatsapp.net"
///
/// [[groups]]
/// id = "120363000000000001@g.us"
/// subject = "Test group"
///
/// [[groups.participants]]
/// address = "10000@s.whatsapp.net"
/// admin = "admin"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct ConsoleFixture {
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub groups: Vec<GroupMetadata>,
}

impl ConsoleFixture {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read fixture {}", path.as_ref().display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let fixture: ConsoleFixture = toml::from_str(content)?;
        for group in &fixture.groups {
            if !is_group_address(&group.id) {
                bail!("Fixture group id '{}' is not a group address", group.id);
            }
        }
        Ok(fixture)
    }
}

pub struct ConsolePlatform {
    agent: String,
    groups: Mutex<HashMap<String, GroupMetadata>>,
    invite_codes: Mutex<HashMap<String, String>>,
    outbound: broadcast::Sender<OutboundMessage>,
}

impl ConsolePlatform {
    pub fn new(fixture: ConsoleFixture, outbound: broadcast::Sender<OutboundMessage>) -> Self {
        let groups = fixture
            .groups
            .into_iter()
            .map(|group| (group.id.clone(), group))
            .collect();
        Self {
            agent: fixture.agent.unwrap_or_else(|| DEFAULT_AGENT.to_string()),
            groups: Mutex::new(groups),
            invite_codes: Mutex::new(HashMap::new()),
            outbound,
        }
    }

    pub async fn group_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.groups.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl MetadataSource for ConsolePlatform {
    async fn fetch_group_metadata(&self, conversation_id: &str) -> Result<Option<GroupMetadata>> {
        debug!("Console metadata fetch for {}", conversation_id);
        Ok(self.groups.lock().await.get(conversation_id).cloned())
    }
}

#[async_trait]
impl Platform for ConsolePlatform {
    fn agent_address(&self) -> String {
        self.agent.clone()
    }

    async fn send(&self, message: OutboundMessage) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| anyhow!("No console output attached"))?;
        Ok(())
    }

    async fn update_participants(
        &self,
        conversation_id: &str,
        participants: &[String],
        action: ParticipantAction,
    ) -> Result<()> {
        let mut groups = self.groups.lock().await;
        let group = groups
            .get_mut(conversation_id)
            .ok_or_else(|| anyhow!("Unknown group {}", conversation_id))?;

        for address in participants {
            let position = group
                .participants
                .iter()
                .position(|p| &p.address == address || p.alternate.as_ref() == Some(address));
            match (action, position) {
                (ParticipantAction::Add, Some(_)) => bail!("{} is already in the group", address),
                (ParticipantAction::Add, None) => group
                    .participants
                    .push(GroupParticipant::new(address, AdminLevel::None)),
                (_, None) => bail!("{} is not in the group", address),
                (ParticipantAction::Remove, Some(i)) => {
                    group.participants.remove(i);
                }
                (ParticipantAction::Promote, Some(i)) => {
                    group.participants[i].admin = AdminLevel::Admin
                }
                (ParticipantAction::Demote, Some(i)) => {
                    group.participants[i].admin = AdminLevel::None
                }
            }
        }
        info!(
            "Console group {}: {} x{}",
            conversation_id,
            action.as_str(),
            participants.len()
        );
        Ok(())
    }

    async fn update_setting(&self, conversation_id: &str, setting: GroupSetting) -> Result<()> {
        let mut groups = self.groups.lock().await;
        let group = groups
            .get_mut(conversation_id)
            .ok_or_else(|| anyhow!("Unknown group {}", conversation_id))?;
        match setting {
            GroupSetting::Announcement => group.announce = true,
            GroupSetting::NotAnnouncement => group.announce = false,
            GroupSetting::Subject(subject) => group.subject = Some(subject),
            GroupSetting::Description(description) => group.description = Some(description),
        }
        Ok(())
    }

    async fn invite_code(&self, conversation_id: &str) -> Result<String> {
        if !self.groups.lock().await.contains_key(conversation_id) {
            bail!("Unknown group {}", conversation_id);
        }
        let mut codes = self.invite_codes.lock().await;
        let code = codes
            .entry(conversation_id.to_string())
            .or_insert_with(|| uuid::Uuid::new_v4().simple().to_string()[..22].to_string());
        Ok(code.clone())
    }
}

#[derive(Debug)]
pub enum ConsoleInput {
    Message(InboundMessage),
    Notice(String),
    Empty,
    Quit,
}

/// Who is typing and where, plus directive parsing for console lines.
#[derive(Debug)]
pub struct ConsoleSession {
    sender: String,
    group: Option<String>,
    quoted: Option<String>,
    next_id: u64,
}

const CONSOLE_HELP: &str = "/as <number>   type as another user\n\
/in <group id> talk in a group\n\
/dm            talk in a direct chat\n\
/quote <number> next message replies to that user\n\
/quit          leave";

/// A full address, or the primary address for a phone number.
pub fn address_for(value: &str) -> Option<String> {
    if value.contains('@') {
        return Some(value.to_string());
    }
    CanonicalId::from_number(value).map(|id| id.primary_address())
}

impl ConsoleSession {
    pub fn new(sender: String, group: Option<String>) -> Self {
        Self {
            sender,
            group,
            quoted: None,
            next_id: 1,
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn conversation_id(&self) -> &str {
        self.group.as_deref().unwrap_or(&self.sender)
    }

    pub fn interpret(&mut self, line: &str) -> ConsoleInput {
        let line = line.trim();
        if line.is_empty() {
            return ConsoleInput::Empty;
        }
        if let Some(directive) = line.strip_prefix('/') {
            return self.directive(directive);
        }

        let mentions = line
            .split_whitespace()
            .filter_map(|word| word.strip_prefix('@'))
            .map(|number| number.trim_end_matches(|c: char| !c.is_ascii_digit()))
            .filter_map(CanonicalId::parse)
            .map(|id| id.primary_address())
            .collect();

        let mut message = InboundMessage::new(self.conversation_id(), &self.sender, line)
            .with_mentions(mentions)
            .with_message_id(&format!("console-{}", self.next_id));
        self.next_id += 1;
        if let Some(quoted) = self.quoted.take() {
            message = message.with_quoted_sender(&quoted);
        }
        ConsoleInput::Message(message)
    }

    fn directive(&mut self, directive: &str) -> ConsoleInput {
        let (name, arg) = match directive.trim().split_once(char::is_whitespace) {
            Some((name, arg)) => (name, Some(arg.trim())),
            None => (directive.trim(), None),
        };

        match (name, arg) {
            ("quit" | "exit", _) => ConsoleInput::Quit,
            ("help", _) => ConsoleInput::Notice(CONSOLE_HELP.to_string()),
            ("dm", _) => {
                self.group = None;
                ConsoleInput::Notice(format!("Direct chat as {}", self.sender))
            }
            ("as", Some(value)) => match address_for(value) {
                Some(address) => {
                    self.sender = address;
                    ConsoleInput::Notice(format!("Now typing as {}", self.sender))
                }
                None => ConsoleInput::Notice(format!("Not a number or address: {}", value)),
            },
            ("in", Some(value)) if is_group_address(value) => {
                self.group = Some(value.to_string());
                ConsoleInput::Notice(format!("Now talking in {}", value))
            }
            ("in", Some(value)) => ConsoleInput::Notice(format!("Not a group id: {}", value)),
            ("quote", Some(value)) => match address_for(value) {
                Some(address) => {
                    let notice = format!("Next message quotes {}", address);
                    self.quoted = Some(address);
                    ConsoleInput::Notice(notice)
                }
                None => ConsoleInput::Notice(format!("Not a number or address: {}", value)),
            },
            _ => ConsoleInput::Notice(format!("Unknown directive /{}\n{}", directive, CONSOLE_HELP)),
        }
    }
}

/// One printed line block for a reply.
pub fn render_outbound(message: &OutboundMessage) -> String {
    let mut text = format!("[{}] {}", message.conversation_id, message.text);
    if !message.mentions.is_empty() {
        text.push_str(&format!("\n  (mentions: {})", message.mentions.join(", ")));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use forka_config::Config;
    use forka_core::{DispatchOutcome, Dispatcher};
    use forka_ipc::EventBus;
    use forka_storage::Storage;
    use std::sync::Arc;

    const FIXTURE: &str = r#"
agent = "10000@s.whatsapp.net"

[[groups]]
id = "120363000000000001@g.us"
subject = "Console group"

[[groups.participants]]
address = "10000@s.whatsapp.net"
admin = "admin"

[[groups.participants]]
address = "20000@s.whatsapp.net"
alternate = "777@lid"
admin = "superadmin"

[[groups.participants]]
address = "30000@s.whatsapp.net"
"#;

    const GROUP: &str = "120363000000000001@g.us";

    #[test]
    fn fixture_parses_participants_and_levels() {
        let fixture = ConsoleFixture::parse(FIXTURE).expect("fixture");
        assert_eq!(fixture.agent.as_deref(), Some("10000@s.whatsapp.net"));
        let group = &fixture.groups[0];
        assert_eq!(group.participants.len(), 3);
        assert_eq!(group.participants[1].admin, AdminLevel::SuperAdmin);
        assert_eq!(group.participants[1].alternate.as_deref(), Some("777@lid"));
        assert_eq!(group.participants[2].admin, AdminLevel::None);
    }

    #[test]
    fn fixture_rejects_non_group_ids() {
        let err = ConsoleFixture::parse("[[groups]]\nid = \"123@s.whatsapp.net\"\n")
            .expect_err("not a group");
        assert!(err.to_string().contains("not a group address"));
    }

    #[test]
    fn session_directives_switch_sender_and_chat() {
        let mut session = ConsoleSession::new("20000@s.whatsapp.net".to_string(), None);
        assert_eq!(session.conversation_id(), "20000@s.whatsapp.net");

        assert!(matches!(session.interpret("/in 120363000000000001@g.us"), ConsoleInput::Notice(_)));
        assert_eq!(session.conversation_id(), GROUP);

        session.interpret("/as +1 555 0100");
        assert_eq!(session.sender(), "15550100@s.whatsapp.net");

        session.interpret("/dm");
        assert_eq!(session.conversation_id(), "15550100@s.whatsapp.net");

        assert!(matches!(session.interpret("/quit"), ConsoleInput::Quit));
        assert!(matches!(session.interpret("   "), ConsoleInput::Empty));
    }

    #[test]
    fn session_builds_messages_with_mentions_and_quotes() {
        let mut session =
            ConsoleSession::new("20000@s.whatsapp.net".to_string(), Some(GROUP.to_string()));
        session.interpret("/quote 30000");

        let ConsoleInput::Message(message) = session.interpret(".kick @30000, please") else {
            panic!("expected message");
        };
        assert_eq!(message.conversation_id, GROUP);
        assert_eq!(message.mentions, vec!["30000@s.whatsapp.net".to_string()]);
        assert_eq!(message.quoted_sender.as_deref(), Some("30000@s.whatsapp.net"));
        assert_eq!(message.message_id.as_deref(), Some("console-1"));

        let ConsoleInput::Message(next) = session.interpret("hello") else {
            panic!("expected message");
        };
        assert!(next.quoted_sender.is_none());
        assert!(next.mentions.is_empty());
    }

    #[tokio::test]
    async fn platform_applies_participant_and_setting_changes() {
        let bus = EventBus::new();
        let fixture = ConsoleFixture::parse(FIXTURE).expect("fixture");
        let platform = ConsolePlatform::new(fixture, bus.outbound_sender());

        platform
            .update_participants(GROUP, &["777@lid".to_string()], ParticipantAction::Demote)
            .await
            .expect("demote");
        platform
            .update_setting(GROUP, GroupSetting::Subject("Renamed".to_string()))
            .await
            .expect("rename");
        let err = platform
            .update_participants(GROUP, &["30000@s.whatsapp.net".to_string()], ParticipantAction::Add)
            .await
            .expect_err("already present");
        assert!(err.to_string().contains("already in the group"));

        let group = platform
            .fetch_group_metadata(GROUP)
            .await
            .expect("fetch")
            .expect("known group");
        assert_eq!(group.subject.as_deref(), Some("Renamed"));
        assert_eq!(group.participants[1].admin, AdminLevel::None);

        let code = platform.invite_code(GROUP).await.expect("code");
        assert_eq!(code.len(), 22);
        assert_eq!(platform.invite_code(GROUP).await.expect("code"), code);
        assert!(platform.invite_code("1@g.us").await.is_err());
    }

    #[tokio::test]
    async fn dispatcher_replies_reach_the_outbound_channel() {
        let bus = EventBus::new();
        let mut output = bus.outbound_subscribe();
        let fixture = ConsoleFixture::parse(FIXTURE).expect("fixture");
        let platform = Arc::new(ConsolePlatform::new(fixture, bus.outbound_sender()));

        let mut config = Config::default();
        config.bot.owners = "20000".to_string();
        config.bot.cooldown_ms = 0;
        let storage = Storage::in_memory().expect("storage");
        let mut dispatcher =
            Dispatcher::new(&config, platform.clone(), Box::new(storage)).expect("dispatcher");

        let mut session =
            ConsoleSession::new("777@lid".to_string(), Some(GROUP.to_string()));
        let ConsoleInput::Message(message) = session.interpret(".kick @30000") else {
            panic!("expected message");
        };
        assert_eq!(
            dispatcher.handle(&message).await,
            DispatchOutcome::Executed("kick".to_string())
        );

        let reply = output.recv().await.expect("reply");
        assert_eq!(reply.conversation_id, GROUP);
        assert!(render_outbound(&reply).starts_with("[120363000000000001@g.us]"));

        let group = platform
            .fetch_group_metadata(GROUP)
            .await
            .expect("fetch")
            .expect("known group");
        assert_eq!(group.participants.len(), 2);
    }
}
