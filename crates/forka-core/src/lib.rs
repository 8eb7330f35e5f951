//! Forka Core
//!
//! Command registry, permission-gated dispatcher, built-in commands,
//! conversation games and the runtime loop over the event bus.

pub mod commands;
mod context;
pub mod dispatcher;
pub mod games;
pub mod registry;
pub mod runtime;

pub use context::{mention_tag, CommandContext};
pub use dispatcher::{DispatchOutcome, Dispatcher, IgnoreReason, Rejection};
pub use games::{GameSessionStore, Mark, MoveError, MoveOutcome, TicTacToe};
pub use registry::{
    Capabilities, Category, CommandHandler, CommandRegistry, CommandSpec, OwnerGate,
    RegistryError,
};
pub use runtime::Runtime;

use anyhow::Result;
use async_trait::async_trait;
use forka_ipc::{GroupSetting, OutboundMessage, ParticipantAction};
use forka_policy::MetadataSource;

/// The messaging platform as seen by the dispatcher and command handlers.
#[async_trait]
pub trait Platform: MetadataSource {
    /// The bot's own address on the platform.
    fn agent_address(&self) -> String;

    async fn send(&self, message: OutboundMessage) -> Result<()>;

    async fn update_participants(
        &self,
        conversation_id: &str,
        participants: &[String],
        action: ParticipantAction,
    ) -> Result<()>;

    async fn update_setting(&self, conversation_id: &str, setting: GroupSetting) -> Result<()>;

    /// Invite code for the group; the link is built by the caller.
    async fn invite_code(&self, conversation_id: &str) -> Result<String>;
}

#[cfg(test)]
pub(crate) mod testing;
