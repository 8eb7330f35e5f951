use crate::snapshot::{GroupAccess, GroupSnapshotCache};
use crate::MetadataSource;
use forka_config::Config;
use forka_identity::{is_group_address, CanonicalId, IdentityCache, Normalized};
use forka_storage::SettingsStore;
use std::collections::HashSet;
use std::time::Duration;
use tracing::warn;

/// Answers the privilege questions asked by the dispatcher. Owns the identity
/// and group snapshot caches so both live as long as the bot.
#[derive(Debug)]
pub struct PermissionEvaluator {
    owners: HashSet<CanonicalId>,
    agent_address: String,
    identity: IdentityCache,
    snapshots: GroupSnapshotCache,
}

impl PermissionEvaluator {
    pub fn new<I>(owners: I, agent_address: &str, group_ttl: Duration) -> Self
    where
        I: IntoIterator<Item = CanonicalId>,
    {
        let mut identity = IdentityCache::new();
        identity.remember(agent_address);
        Self {
            owners: owners.into_iter().collect(),
            agent_address: agent_address.to_string(),
            identity,
            snapshots: GroupSnapshotCache::new(group_ttl),
        }
    }

    pub fn from_config(config: &Config, agent_address: &str) -> Self {
        let owners = config
            .bot
            .owner_numbers()
            .iter()
            .filter_map(|number| CanonicalId::from_number(number))
            .collect::<Vec<_>>();
        Self::new(
            owners,
            agent_address,
            Duration::from_millis(config.cache.group_ttl_ms),
        )
    }

    pub fn agent_address(&self) -> &str {
        &self.agent_address
    }

    pub fn identity(&self) -> &IdentityCache {
        &self.identity
    }

    pub fn identity_mut(&mut self) -> &mut IdentityCache {
        &mut self.identity
    }

    pub fn snapshots(&self) -> &GroupSnapshotCache {
        &self.snapshots
    }

    /// Records the sender's encoding and returns its normalization.
    pub fn observe(&mut self, raw: &str) -> Normalized {
        self.identity.remember(raw);
        self.identity.resolve(raw)
    }

    pub fn resolve(&self, raw: &str) -> Normalized {
        self.identity.resolve(raw)
    }

    /// Owners in a stable order.
    pub fn owners(&self) -> Vec<CanonicalId> {
        let mut owners: Vec<_> = self.owners.iter().cloned().collect();
        owners.sort();
        owners
    }

    pub fn is_owner(&self, sender: &str) -> bool {
        self.identity
            .resolve(sender)
            .trusted()
            .is_some_and(|id| self.owners.contains(id))
    }

    /// Sudo membership or ownership. Store errors count as "no".
    pub fn is_sudo_or_owner(&self, sender: &str, settings: &dyn SettingsStore) -> bool {
        let resolved = self.identity.resolve(sender);
        let Some(id) = resolved.trusted() else {
            return false;
        };
        if self.owners.contains(id) {
            return true;
        }
        match settings.is_sudo(id) {
            Ok(is_sudo) => is_sudo,
            Err(e) => {
                warn!("Sudo lookup failed for {}: {}", id, e);
                false
            }
        }
    }

    /// Snapshot access for a group conversation, `None` elsewhere.
    pub async fn group_access<S>(
        &mut self,
        conversation_id: &str,
        sender: &str,
        source: &S,
    ) -> Option<GroupAccess>
    where
        S: MetadataSource + ?Sized,
    {
        if !is_group_address(conversation_id) {
            return None;
        }
        Some(
            self.snapshots
                .access(
                    conversation_id,
                    sender,
                    &self.agent_address,
                    &mut self.identity,
                    source,
                )
                .await,
        )
    }

    pub async fn is_conversation_admin<S>(
        &mut self,
        conversation_id: &str,
        sender: &str,
        source: &S,
    ) -> bool
    where
        S: MetadataSource + ?Sized,
    {
        self.group_access(conversation_id, sender, source)
            .await
            .is_some_and(|access| access.sender_is_admin)
    }

    pub async fn is_agent_admin<S>(&mut self, conversation_id: &str, source: &S) -> bool
    where
        S: MetadataSource + ?Sized,
    {
        if !is_group_address(conversation_id) {
            return false;
        }
        self.snapshots
            .snapshot(
                conversation_id,
                &self.agent_address,
                &mut self.identity,
                source,
            )
            .await
            .agent_is_admin
    }

    pub fn invalidate(&mut self, conversation_id: &str) -> bool {
        self.snapshots.invalidate(conversation_id)
    }
}
