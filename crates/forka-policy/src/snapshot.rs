use crate::MetadataSource;
use forka_config::CacheConfig;
use forka_identity::{encoding_of, CanonicalId, Encoding, IdentityCache};
use forka_ipc::{AdminLevel, GroupMetadata, GroupParticipant};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotParticipant {
    pub address: String,
    pub alternate: Option<String>,
    pub identity: Option<CanonicalId>,
    pub admin: AdminLevel,
}

impl SnapshotParticipant {
    fn matches_raw(&self, raw: &str) -> bool {
        let raw = raw.trim();
        self.address == raw || self.alternate.as_deref() == Some(raw)
    }
}

/// Point-in-time view of a group's membership and roles.
#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    pub conversation_id: String,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub announce: bool,
    pub participants: Vec<SnapshotParticipant>,
    pub agent_is_admin: bool,
    /// The agent's own entry in the participant list, if it was found.
    pub agent_participant: Option<String>,
    pub fetched_at: Instant,
    /// False for the deny-by-default view built when metadata was unavailable.
    pub authoritative: bool,
}

impl GroupSnapshot {
    fn denied(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            subject: None,
            description: None,
            announce: false,
            participants: Vec::new(),
            agent_is_admin: false,
            agent_participant: None,
            fetched_at: Instant::now(),
            authoritative: false,
        }
    }

    /// Valid up to and including `fetched_at + ttl`.
    pub fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        self.authoritative && now.saturating_duration_since(self.fetched_at) <= ttl
    }

    /// Finds a participant by canonical identity, falling back to a literal
    /// address match against either encoding.
    pub fn find(&self, identity: Option<&CanonicalId>, raw: &str) -> Option<&SnapshotParticipant> {
        identity
            .and_then(|id| {
                self.participants
                    .iter()
                    .find(|p| p.identity.as_ref() == Some(id))
            })
            .or_else(|| self.participants.iter().find(|p| p.matches_raw(raw)))
    }

    pub fn admins(&self) -> impl Iterator<Item = &SnapshotParticipant> {
        self.participants.iter().filter(|p| p.admin.is_admin())
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

/// A snapshot together with the requester's role in it.
#[derive(Debug, Clone)]
pub struct GroupAccess {
    pub snapshot: Arc<GroupSnapshot>,
    pub sender_is_admin: bool,
}

impl GroupAccess {
    pub fn agent_is_admin(&self) -> bool {
        self.snapshot.agent_is_admin
    }
}

/// Per-conversation cache of group snapshots with a short TTL.
#[derive(Debug)]
pub struct GroupSnapshotCache {
    ttl: Duration,
    entries: HashMap<String, Arc<GroupSnapshot>>,
    fetches: u64,
}

impl GroupSnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            fetches: 0,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_millis(config.group_ttl_ms))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of external metadata fetches issued so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches
    }

    /// The cached snapshot, only while it is still fresh.
    pub fn cached(&self, conversation_id: &str) -> Option<Arc<GroupSnapshot>> {
        self.entries
            .get(conversation_id)
            .filter(|snapshot| snapshot.is_fresh(self.ttl, Instant::now()))
            .cloned()
    }

    /// Drops the cached snapshot so the next read refetches.
    pub fn invalidate(&mut self, conversation_id: &str) -> bool {
        let removed = self.entries.remove(conversation_id).is_some();
        if removed {
            info!("Invalidated group snapshot for {}", conversation_id);
        }
        removed
    }

    /// Returns a fresh snapshot, fetching from `source` on miss or expiry.
    /// Fetch failures yield a deny-by-default snapshot that is not cached.
    pub async fn snapshot<S>(
        &mut self,
        conversation_id: &str,
        agent_address: &str,
        identity: &mut IdentityCache,
        source: &S,
    ) -> Arc<GroupSnapshot>
    where
        S: MetadataSource + ?Sized,
    {
        if let Some(snapshot) = self.cached(conversation_id) {
            debug!(
                "Group snapshot cache hit for {} ({}ms old)",
                conversation_id,
                snapshot.fetched_at.elapsed().as_millis()
            );
            return snapshot;
        }

        self.fetches += 1;
        let metadata = match source.fetch_group_metadata(conversation_id).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                warn!("No group metadata available for {}", conversation_id);
                return Arc::new(GroupSnapshot::denied(conversation_id));
            }
            Err(e) => {
                warn!(
                    "Group metadata fetch failed for {}: {}",
                    conversation_id, e
                );
                return Arc::new(GroupSnapshot::denied(conversation_id));
            }
        };

        let snapshot = Arc::new(build_snapshot(
            conversation_id,
            metadata,
            agent_address,
            identity,
        ));
        self.entries
            .insert(conversation_id.to_string(), Arc::clone(&snapshot));
        snapshot
    }

    /// Snapshot plus the requester's admin flag.
    pub async fn access<S>(
        &mut self,
        conversation_id: &str,
        requester: &str,
        agent_address: &str,
        identity: &mut IdentityCache,
        source: &S,
    ) -> GroupAccess
    where
        S: MetadataSource + ?Sized,
    {
        let snapshot = self
            .snapshot(conversation_id, agent_address, identity, source)
            .await;
        let requester_id = identity.resolve(requester).trusted().cloned();
        let sender_is_admin = snapshot
            .find(requester_id.as_ref(), requester)
            .is_some_and(|p| p.admin.is_admin());
        GroupAccess {
            snapshot,
            sender_is_admin,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn learn_encodings(participant: &GroupParticipant, identity: &mut IdentityCache) {
    match participant.alternate.as_deref() {
        Some(alternate) if encoding_of(alternate) == Encoding::Alternate => {
            identity.link(&participant.address, alternate);
        }
        Some(alternate) if encoding_of(&participant.address) == Encoding::Alternate => {
            identity.link(alternate, &participant.address);
        }
        _ => {}
    }
    identity.remember(&participant.address);
}

fn build_snapshot(
    conversation_id: &str,
    metadata: GroupMetadata,
    agent_address: &str,
    identity: &mut IdentityCache,
) -> GroupSnapshot {
    let participants: Vec<SnapshotParticipant> = metadata
        .participants
        .into_iter()
        .map(|participant| {
            learn_encodings(&participant, identity);
            SnapshotParticipant {
                identity: identity.resolve(&participant.address).into_identity(),
                address: participant.address,
                alternate: participant.alternate,
                admin: participant.admin,
            }
        })
        .collect();

    let mut snapshot = GroupSnapshot {
        conversation_id: conversation_id.to_string(),
        subject: metadata.subject,
        description: metadata.description,
        announce: metadata.announce,
        participants,
        agent_is_admin: false,
        agent_participant: None,
        fetched_at: Instant::now(),
        authoritative: true,
    };

    let agent_id = identity.resolve(agent_address).trusted().cloned();
    let agent_alternate = agent_id
        .as_ref()
        .and_then(|id| identity.encodings(id))
        .and_then(|known| known.alternate.clone());

    let agent = snapshot.find(agent_id.as_ref(), agent_address).or_else(|| {
        agent_alternate
            .as_deref()
            .and_then(|alternate| snapshot.find(None, alternate))
    });

    match agent {
        Some(entry) => {
            let is_admin = entry.admin.is_admin();
            let address = entry.address.clone();
            snapshot.agent_is_admin = is_admin;
            snapshot.agent_participant = Some(address);
        }
        None => warn!(
            "Agent {} not found among {} participants of {}",
            agent_address,
            snapshot.participants.len(),
            conversation_id
        ),
    }

    info!(
        "Fetched group snapshot for {}: {} participants, agent admin: {}",
        conversation_id,
        snapshot.participants.len(),
        snapshot.agent_is_admin
    );
    snapshot
}
