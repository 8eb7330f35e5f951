use crate::Platform;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use forka_config::Config;
use forka_identity::normalize;
use forka_ipc::{
    AdminLevel, GroupMetadata, GroupParticipant, GroupSetting, InboundMessage, OutboundMessage,
    ParticipantAction,
};
use forka_policy::MetadataSource;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub const GROUP: &str = "120363041234567890@g.us";
pub const AGENT: &str = "5550000:3@s.whatsapp.net";
pub const OWNER: &str = "100@s.whatsapp.net";
pub const ADMIN: &str = "200@s.whatsapp.net";
pub const MEMBER: &str = "300@s.whatsapp.net";

/// In-memory platform that applies group changes to its own metadata.
pub struct FakePlatform {
    agent: String,
    groups: Mutex<HashMap<String, GroupMetadata>>,
    sent: Mutex<Vec<OutboundMessage>>,
    participant_updates: Mutex<Vec<(Vec<String>, ParticipantAction)>>,
    settings: Mutex<Vec<GroupSetting>>,
    fetches: AtomicUsize,
    fail_fetch: AtomicBool,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            agent: AGENT.to_string(),
            groups: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            participant_updates: Mutex::new(Vec::new()),
            settings: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
            fail_fetch: AtomicBool::new(false),
        }
    }

    /// A group where the agent is admin, ADMIN is admin and MEMBER is not.
    pub fn with_default_group() -> Self {
        let platform = Self::new();
        platform.put_group(GroupMetadata {
            id: GROUP.to_string(),
            subject: Some("Forka testers".to_string()),
            description: Some("Where the bot gets tested".to_string()),
            announce: false,
            participants: vec![
                GroupParticipant::new("5550000@s.whatsapp.net", AdminLevel::Admin),
                GroupParticipant::new(ADMIN, AdminLevel::SuperAdmin),
                GroupParticipant::new(MEMBER, AdminLevel::None),
            ],
        });
        platform
    }

    pub fn put_group(&self, metadata: GroupMetadata) {
        self.groups
            .lock()
            .expect("groups lock")
            .insert(metadata.id.clone(), metadata);
    }

    pub fn set_agent_admin(&self, admin: bool) {
        let mut groups = self.groups.lock().expect("groups lock");
        for group in groups.values_mut() {
            for participant in &mut group.participants {
                if participant.address.starts_with("5550000@") {
                    participant.admin = if admin {
                        AdminLevel::Admin
                    } else {
                        AdminLevel::None
                    };
                }
            }
        }
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.text).collect()
    }

    pub fn last_text(&self) -> Option<String> {
        self.sent_texts().pop()
    }

    pub fn participant_updates(&self) -> Vec<(Vec<String>, ParticipantAction)> {
        self.participant_updates
            .lock()
            .expect("updates lock")
            .clone()
    }

    pub fn settings_updates(&self) -> Vec<GroupSetting> {
        self.settings.lock().expect("settings lock").clone()
    }
}

#[async_trait]
impl MetadataSource for FakePlatform {
    async fn fetch_group_metadata(&self, conversation_id: &str) -> Result<Option<GroupMetadata>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(anyhow!("metadata request timed out"));
        }
        Ok(self
            .groups
            .lock()
            .expect("groups lock")
            .get(conversation_id)
            .cloned())
    }
}

#[async_trait]
impl Platform for FakePlatform {
    fn agent_address(&self) -> String {
        self.agent.clone()
    }

    async fn send(&self, message: OutboundMessage) -> Result<()> {
        self.sent.lock().expect("sent lock").push(message);
        Ok(())
    }

    async fn update_participants(
        &self,
        conversation_id: &str,
        participants: &[String],
        action: ParticipantAction,
    ) -> Result<()> {
        self.participant_updates
            .lock()
            .expect("updates lock")
            .push((participants.to_vec(), action));

        let mut groups = self.groups.lock().expect("groups lock");
        let group = groups
            .get_mut(conversation_id)
            .ok_or_else(|| anyhow!("unknown group"))?;
        for address in participants {
            let id = normalize(address).into_identity();
            let position = group
                .participants
                .iter()
                .position(|p| normalize(&p.address).into_identity() == id);
            match (action, position) {
                (ParticipantAction::Add, None) => group
                    .participants
                    .push(GroupParticipant::new(address, AdminLevel::None)),
                (ParticipantAction::Add, Some(_)) => return Err(anyhow!("already in group")),
                (ParticipantAction::Remove, Some(i)) => {
                    group.participants.remove(i);
                }
                (ParticipantAction::Promote, Some(i)) => {
                    group.participants[i].admin = AdminLevel::Admin
                }
                (ParticipantAction::Demote, Some(i)) => {
                    group.participants[i].admin = AdminLevel::None
                }
                (_, None) => return Err(anyhow!("not a participant")),
            }
        }
        Ok(())
    }

    async fn update_setting(&self, conversation_id: &str, setting: GroupSetting) -> Result<()> {
        let mut groups = self.groups.lock().expect("groups lock");
        let group = groups
            .get_mut(conversation_id)
            .ok_or_else(|| anyhow!("unknown group"))?;
        match &setting {
            GroupSetting::Announcement => group.announce = true,
            GroupSetting::NotAnnouncement => group.announce = false,
            GroupSetting::Subject(subject) => group.subject = Some(subject.clone()),
            GroupSetting::Description(desc) => group.description = Some(desc.clone()),
        }
        self.settings.lock().expect("settings lock").push(setting);
        Ok(())
    }

    async fn invite_code(&self, _conversation_id: &str) -> Result<String> {
        Ok("AbCdEf123".to_string())
    }
}

/// Owner 100, no cooldown.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.bot.owners = "100".to_string();
    config.bot.cooldown_ms = 0;
    config
}

pub fn group_message(sender: &str, text: &str) -> InboundMessage {
    InboundMessage::new(GROUP, sender, text)
}

pub fn direct_message(sender: &str, text: &str) -> InboundMessage {
    InboundMessage::new(sender, sender, text)
}
