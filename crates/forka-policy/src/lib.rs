//! Forka Policy Engine
//!
//! Conversation allow/deny lists, per-sender cooldowns, the group snapshot
//! cache and the permission predicates built on top of it.

mod cooldown;
mod permission;
mod snapshot;

pub use cooldown::{remaining_secs, CooldownTracker};
pub use permission::PermissionEvaluator;
pub use snapshot::{GroupAccess, GroupSnapshot, GroupSnapshotCache, SnapshotParticipant};

use forka_config::PolicyConfig;
use forka_ipc::GroupMetadata;
use std::collections::HashSet;

/// Source of authoritative group metadata.
#[async_trait::async_trait]
pub trait MetadataSource: Send + Sync {
    /// `Ok(None)` means the platform had nothing for this conversation.
    async fn fetch_group_metadata(&self, conversation_id: &str)
        -> anyhow::Result<Option<GroupMetadata>>;
}

#[derive(Clone)]
pub struct ConversationPolicy {
    allowlist: HashSet<String>,
    denylist: HashSet<String>,
}

impl ConversationPolicy {
    pub fn new(config: Option<&PolicyConfig>) -> Self {
        let allowlist = config
            .and_then(|c| c.allowlist.clone())
            .map(|list| list.into_iter().map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        let denylist = config
            .and_then(|c| c.denylist.clone())
            .map(|list| list.into_iter().map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        Self {
            allowlist,
            denylist,
        }
    }

    pub fn is_allowed(&self, conversation_id: &str) -> bool {
        if self.denylist.contains(conversation_id) {
            return false;
        }

        if self.allowlist.is_empty() {
            return true;
        }

        self.allowlist.contains(conversation_id)
    }
}
