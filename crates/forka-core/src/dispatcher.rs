use crate::commands::{self, describe_move};
use crate::context::CommandContext;
use crate::games::{GameSessionStore, MoveError, MoveOutcome};
use crate::registry::{Capabilities, CommandRegistry, OwnerGate};
use crate::Platform;
use anyhow::Result;
use forka_config::{BotConfig, Config};
use forka_identity::{is_group_address, CanonicalId};
use forka_ipc::{
    Envelope, InboundMessage, MembershipChange, MessageKind, OutboundMessage, ParticipantAction,
};
use forka_policy::{
    remaining_secs, ConversationPolicy, CooldownTracker, GroupAccess, PermissionEvaluator,
};
use forka_storage::{BotMode, SettingsStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

const HANDLER_FAILURE_REPLY: &str = "❌ Error executing command";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    FromAgent,
    ConversationDenied,
    UnknownSender,
    NoPrefix,
    EmptyCommand,
    UnknownCommand,
}

/// Why a matched command was refused. Display is the reply sent to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("🔒 Bot is in private mode")]
    PrivateMode,
    #[error("⏳ Wait {secs}s")]
    Cooldown { secs: u64 },
    #[error("👑 Owner only")]
    OwnerOnly,
    #[error("🛡️ Owner or sudo only")]
    SudoOnly,
    #[error("Group only")]
    GroupOnly,
    #[error("Admin only")]
    AdminOnly,
    #[error("Make bot admin first")]
    BotAdminRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Ignored(IgnoreReason),
    Rejected(Rejection),
    /// Canonical name of the command that ran.
    Executed(String),
    GameMove(MoveOutcome),
    InvalidMove(MoveError),
    /// The handler returned an error; a generic reply was sent.
    Failed(String),
}

enum Parsed {
    NoPrefix,
    Empty,
    Command { name: String, args: Vec<String> },
}

fn parse_command(text: &str, prefix: &str) -> Parsed {
    let Some(body) = text.trim_start().strip_prefix(prefix) else {
        return Parsed::NoPrefix;
    };
    let mut words = body.split_whitespace();
    match words.next() {
        Some(name) => Parsed::Command {
            name: name.to_lowercase(),
            args: words.map(str::to_string).collect(),
        },
        None => Parsed::Empty,
    }
}

/// Routes inbound messages to commands after the permission gates.
pub struct Dispatcher {
    bot: BotConfig,
    registry: CommandRegistry,
    permissions: PermissionEvaluator,
    cooldowns: CooldownTracker,
    policy: ConversationPolicy,
    games: GameSessionStore,
    settings: Box<dyn SettingsStore>,
    platform: Arc<dyn Platform>,
    started_at: Instant,
}

impl Dispatcher {
    /// Dispatcher with the built-in command set.
    pub fn new(
        config: &Config,
        platform: Arc<dyn Platform>,
        settings: Box<dyn SettingsStore>,
    ) -> Result<Self> {
        let registry = commands::builtin_registry()?;
        Ok(Self::with_registry(config, platform, settings, registry))
    }

    pub fn with_registry(
        config: &Config,
        platform: Arc<dyn Platform>,
        settings: Box<dyn SettingsStore>,
        registry: CommandRegistry,
    ) -> Self {
        let permissions = PermissionEvaluator::from_config(config, &platform.agent_address());
        info!(
            "Dispatcher ready: {} commands, prefix '{}', {} owner(s)",
            registry.len(),
            config.bot.prefix,
            permissions.owners().len()
        );
        Self {
            bot: config.bot.clone(),
            registry,
            permissions,
            cooldowns: CooldownTracker::new(Duration::from_millis(config.bot.cooldown_ms)),
            policy: ConversationPolicy::new(config.policy.as_ref()),
            games: GameSessionStore::new(),
            settings,
            platform,
            started_at: Instant::now(),
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn permissions(&self) -> &PermissionEvaluator {
        &self.permissions
    }

    pub fn games(&self) -> &GameSessionStore {
        &self.games
    }

    pub fn settings(&self) -> &dyn SettingsStore {
        self.settings.as_ref()
    }

    pub async fn handle_envelope(&mut self, envelope: &Envelope) -> Option<DispatchOutcome> {
        match &envelope.kind {
            MessageKind::Message(message) => {
                let outcome = self.handle(message).await;
                debug!(
                    "Envelope {} (trace_id={}) -> {:?}",
                    envelope.id, envelope.trace_id, outcome
                );
                Some(outcome)
            }
            MessageKind::Membership(change) => {
                self.handle_membership_change(change);
                None
            }
        }
    }

    /// Invalidates the group snapshot; returns whether one was cached.
    pub fn handle_membership_change(&mut self, change: &MembershipChange) -> bool {
        let agent = self.permissions.agent_address().to_string();
        let agent_involved = change
            .participants
            .iter()
            .any(|p| self.permissions.identity().same_participant(p, &agent));
        if agent_involved && change.action == ParticipantAction::Add {
            info!("Agent added to {}", change.conversation_id);
        }
        debug!(
            "Membership change in {}: {} x{}",
            change.conversation_id,
            change.action.as_str(),
            change.participants.len()
        );
        self.permissions.invalidate(&change.conversation_id)
    }

    pub async fn handle(&mut self, message: &InboundMessage) -> DispatchOutcome {
        if message.from_agent {
            return DispatchOutcome::Ignored(IgnoreReason::FromAgent);
        }
        if !self.policy.is_allowed(&message.conversation_id) {
            debug!("Conversation {} refused by policy", message.conversation_id);
            return DispatchOutcome::Ignored(IgnoreReason::ConversationDenied);
        }

        let sender = self.permissions.observe(&message.sender);
        let Some(sender_id) = sender.identity().cloned() else {
            debug!("Unresolvable sender address {}", message.sender);
            return DispatchOutcome::Ignored(IgnoreReason::UnknownSender);
        };
        let agent_id = self
            .permissions
            .resolve(self.permissions.agent_address())
            .trusted()
            .cloned();
        if agent_id.as_ref() == sender.trusted() && agent_id.is_some() {
            return DispatchOutcome::Ignored(IgnoreReason::FromAgent);
        }

        let (name, args) = match parse_command(&message.text, &self.bot.prefix) {
            Parsed::NoPrefix => return DispatchOutcome::Ignored(IgnoreReason::NoPrefix),
            Parsed::Empty => return DispatchOutcome::Ignored(IgnoreReason::EmptyCommand),
            Parsed::Command { name, args } => (name, args),
        };

        let Some(spec) = self.registry.lookup(&name) else {
            return self.handle_game_move(message, &sender_id, &name).await;
        };
        let command = spec.name.clone();
        let capabilities = spec.capabilities;
        let cooldown = spec.cooldown;
        let handler = spec.handler();

        info!(
            "Command {} from {} in {}",
            command, sender_id, message.conversation_id
        );

        let group = match self
            .check(message, &sender_id, capabilities, cooldown)
            .await
        {
            Ok(group) => group,
            Err(rejection) => {
                self.reject(message, &command, &rejection).await;
                return DispatchOutcome::Rejected(rejection);
            }
        };

        let result = {
            let mut ctx = CommandContext::new(
                message,
                &command,
                args,
                sender,
                self.platform.as_ref(),
                self.settings.as_mut(),
                &mut self.permissions,
                &mut self.games,
                &self.registry,
                &self.bot,
                self.started_at,
                group,
            );
            handler.run(&mut ctx).await
        };

        match result {
            Ok(()) => DispatchOutcome::Executed(command),
            Err(e) => {
                error!(
                    "Command {} failed for {} in {}: {:#}",
                    command, sender_id, message.conversation_id, e
                );
                self.send_reply(message, HANDLER_FAILURE_REPLY.to_string(), Vec::new())
                    .await;
                DispatchOutcome::Failed(command)
            }
        }
    }

    fn current_mode(&self) -> BotMode {
        match self.settings.mode() {
            Ok(mode) => mode,
            Err(e) => {
                warn!("Could not read bot mode, assuming private: {}", e);
                BotMode::Private
            }
        }
    }

    /// Runs the gates in order; the group access fetched along the way is
    /// handed to the command.
    async fn check(
        &mut self,
        message: &InboundMessage,
        sender_id: &CanonicalId,
        capabilities: Capabilities,
        cooldown: Option<Duration>,
    ) -> Result<Option<GroupAccess>, Rejection> {
        let privileged = self
            .permissions
            .is_sudo_or_owner(&message.sender, self.settings.as_ref());

        if self.current_mode() == BotMode::Private && !privileged {
            return Err(Rejection::PrivateMode);
        }

        if let Err(remaining) = self.cooldowns.check(sender_id, cooldown) {
            return Err(Rejection::Cooldown {
                secs: remaining_secs(remaining),
            });
        }

        match capabilities.owner {
            OwnerGate::OwnerOnly if !self.permissions.is_owner(&message.sender) => {
                return Err(Rejection::OwnerOnly);
            }
            OwnerGate::SudoOrOwner if !privileged => return Err(Rejection::SudoOnly),
            _ => {}
        }

        let in_group = is_group_address(&message.conversation_id);
        if capabilities.group_only && !in_group {
            return Err(Rejection::GroupOnly);
        }

        let group = if in_group && (capabilities.admin_only || capabilities.bot_admin) {
            self.permissions
                .group_access(
                    &message.conversation_id,
                    &message.sender,
                    self.platform.as_ref(),
                )
                .await
        } else {
            None
        };

        if capabilities.admin_only && in_group {
            let sender_is_admin = group.as_ref().is_some_and(|access| access.sender_is_admin);
            if !sender_is_admin && !privileged {
                return Err(Rejection::AdminOnly);
            }
        }

        if capabilities.bot_admin && in_group {
            let agent_is_admin = group.as_ref().is_some_and(GroupAccess::agent_is_admin);
            if !agent_is_admin {
                return Err(Rejection::BotAdminRequired);
            }
        }

        Ok(group)
    }

    async fn reject(&mut self, message: &InboundMessage, command: &str, rejection: &Rejection) {
        info!(
            "Rejected {} from {} in {}: {:?}",
            command, message.sender, message.conversation_id, rejection
        );
        if *rejection == Rejection::PrivateMode && !self.bot.announce_private_mode {
            return;
        }
        self.send_reply(message, rejection.to_string(), Vec::new())
            .await;
    }

    async fn handle_game_move(
        &mut self,
        message: &InboundMessage,
        sender_id: &CanonicalId,
        token: &str,
    ) -> DispatchOutcome {
        let conversation_id = &message.conversation_id;
        let is_position = !token.is_empty() && token.chars().all(|c| c.is_ascii_digit());
        if !is_position || !self.games.has_session(conversation_id) {
            debug!("Unknown command '{}' from {}", token, sender_id);
            return DispatchOutcome::Ignored(IgnoreReason::UnknownCommand);
        }

        let privileged = self
            .permissions
            .is_sudo_or_owner(&message.sender, self.settings.as_ref());
        if self.current_mode() == BotMode::Private && !privileged {
            let rejection = Rejection::PrivateMode;
            self.reject(message, "move", &rejection).await;
            return DispatchOutcome::Rejected(rejection);
        }
        if let Err(remaining) = self.cooldowns.check(sender_id, None) {
            let rejection = Rejection::Cooldown {
                secs: remaining_secs(remaining),
            };
            self.reject(message, "move", &rejection).await;
            return DispatchOutcome::Rejected(rejection);
        }

        // Anything that does not fit in a u8 is out of range anyway.
        let position = token.parse::<u8>().unwrap_or(0);
        match self.games.play(conversation_id, sender_id, position) {
            Ok(report) => {
                let (text, mentions) =
                    describe_move(&report, self.permissions.identity(), &self.bot.prefix);
                self.send_reply(message, text, mentions).await;
                DispatchOutcome::GameMove(report.outcome)
            }
            Err(e) => {
                self.send_reply(message, format!("❌ {}", e), Vec::new())
                    .await;
                DispatchOutcome::InvalidMove(e)
            }
        }
    }

    async fn send_reply(&self, message: &InboundMessage, text: String, mentions: Vec<String>) {
        let reply = OutboundMessage {
            conversation_id: message.conversation_id.clone(),
            text,
            mentions,
            reply_to: message.message_id.clone(),
        };
        if let Err(e) = self.platform.send(reply).await {
            warn!("Failed to reply in {}: {}", message.conversation_id, e);
        }
    }
}
