use crate::games::GameSessionStore;
use crate::registry::{CommandRegistry, CommandSpec, OwnerGate};
use crate::Platform;
use anyhow::Result;
use forka_config::BotConfig;
use forka_identity::{is_group_address, CanonicalId, Normalized};
use forka_ipc::{InboundMessage, OutboundMessage};
use forka_policy::{GroupAccess, PermissionEvaluator};
use forka_storage::SettingsStore;
use std::time::Instant;

/// Everything a command handler may read or change while it runs.
pub struct CommandContext<'a> {
    pub message: &'a InboundMessage,
    /// Canonical command name, even when invoked through an alias.
    pub command: &'a str,
    pub args: Vec<String>,
    pub sender: Normalized,
    pub platform: &'a dyn Platform,
    pub settings: &'a mut dyn SettingsStore,
    pub permissions: &'a mut PermissionEvaluator,
    pub games: &'a mut GameSessionStore,
    pub registry: &'a CommandRegistry,
    pub bot: &'a BotConfig,
    pub started_at: Instant,
    group: Option<GroupAccess>,
}

impl<'a> CommandContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        message: &'a InboundMessage,
        command: &'a str,
        args: Vec<String>,
        sender: Normalized,
        platform: &'a dyn Platform,
        settings: &'a mut dyn SettingsStore,
        permissions: &'a mut PermissionEvaluator,
        games: &'a mut GameSessionStore,
        registry: &'a CommandRegistry,
        bot: &'a BotConfig,
        started_at: Instant,
        group: Option<GroupAccess>,
    ) -> Self {
        Self {
            message,
            command,
            args,
            sender,
            platform,
            settings,
            permissions,
            games,
            registry,
            bot,
            started_at,
            group,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.message.conversation_id
    }

    pub fn is_group(&self) -> bool {
        is_group_address(&self.message.conversation_id)
    }

    /// Sender identity, exact or lossy.
    pub fn sender_id(&self) -> Option<&CanonicalId> {
        self.sender.identity()
    }

    pub fn is_owner(&self) -> bool {
        self.permissions.is_owner(&self.message.sender)
    }

    pub fn is_sudo_or_owner(&self) -> bool {
        self.permissions
            .is_sudo_or_owner(&self.message.sender, &*self.settings)
    }

    /// Arguments joined back into free text.
    pub fn rest(&self) -> String {
        self.args.join(" ")
    }

    pub fn prefixed(&self, command: &str) -> String {
        format!("{}{}", self.bot.prefix, command)
    }

    /// Group access for this conversation, fetched once per command.
    pub async fn group_access(&mut self) -> Option<GroupAccess> {
        if self.group.is_none() {
            self.group = self
                .permissions
                .group_access(
                    &self.message.conversation_id,
                    &self.message.sender,
                    self.platform,
                )
                .await;
        }
        self.group.clone()
    }

    /// Drops the cached snapshot after a change to the group.
    pub fn invalidate_group(&mut self) {
        self.group = None;
        self.permissions.invalidate(&self.message.conversation_id);
    }

    /// Whether the sender passes every gate of `spec` here, without replying.
    pub async fn may_run(&mut self, spec: &CommandSpec) -> bool {
        let caps = spec.capabilities;
        let allowed = match caps.owner {
            OwnerGate::Anyone => true,
            OwnerGate::SudoOrOwner => self.is_sudo_or_owner(),
            OwnerGate::OwnerOnly => self.is_owner(),
        };
        if !allowed || (caps.group_only && !self.is_group()) {
            return false;
        }
        if !self.is_group() || (!caps.admin_only && !caps.bot_admin) {
            return true;
        }

        let privileged = self.is_sudo_or_owner();
        match self.group_access().await {
            Some(access) => {
                (!caps.admin_only || access.sender_is_admin || privileged)
                    && (!caps.bot_admin || access.agent_is_admin())
            }
            None => !caps.admin_only || privileged,
        }
    }

    /// Targets of a participant command: mentions, else the quoted sender,
    /// else numbers given as arguments.
    pub fn targets(&self) -> Vec<String> {
        if !self.message.mentions.is_empty() {
            return self.message.mentions.clone();
        }
        if let Some(quoted) = &self.message.quoted_sender {
            return vec![quoted.clone()];
        }
        self.args
            .iter()
            .filter_map(|arg| CanonicalId::from_number(arg))
            .map(|id| self.permissions.identity().resolve_address(&id))
            .collect()
    }

    pub async fn reply(&mut self, text: impl Into<String>) -> Result<()> {
        self.reply_with_mentions(text, Vec::new()).await
    }

    pub async fn reply_with_mentions(
        &mut self,
        text: impl Into<String>,
        mentions: Vec<String>,
    ) -> Result<()> {
        let message = OutboundMessage {
            conversation_id: self.message.conversation_id.clone(),
            text: text.into(),
            mentions,
            reply_to: self.message.message_id.clone(),
        };
        self.platform.send(message).await
    }
}

/// `@<user>` tag for an address, as rendered in mention lists.
pub fn mention_tag(address: &str) -> String {
    let user = address
        .split('@')
        .next()
        .unwrap_or(address)
        .split(':')
        .next()
        .unwrap_or(address);
    format!("@{}", user)
}
