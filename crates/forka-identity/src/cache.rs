use crate::{encoding_of, normalize, CanonicalId, Encoding, Normalized};
use std::collections::HashMap;
use tracing::debug;

/// Last-seen encodings for one participant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownEncodings {
    pub primary: Option<String>,
    pub alternate: Option<String>,
}

/// Process-lifetime map between canonical identities and the encodings seen
/// for them. Entries are only ever added or updated.
#[derive(Debug, Default)]
pub struct IdentityCache {
    entries: HashMap<CanonicalId, KnownEncodings>,
    // alternate local part -> canonical identity of the primary encoding
    alternates: HashMap<String, CanonicalId>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes `raw`, honouring alternate encodings already linked to a
    /// phone-derived identity.
    pub fn resolve(&self, raw: &str) -> Normalized {
        if encoding_of(raw) == Encoding::Alternate {
            if let Some(id) = alternate_key(raw).and_then(|key| self.alternates.get(key)) {
                return Normalized::Exact(id.clone());
            }
        }
        normalize(raw)
    }

    /// Resolves `raw` and records it as the latest encoding of its identity.
    pub fn remember(&mut self, raw: &str) -> Option<CanonicalId> {
        let id = self.resolve(raw).into_identity()?;
        let entry = self.entries.entry(id.clone()).or_default();
        match encoding_of(raw) {
            Encoding::Primary => entry.primary = Some(raw.trim().to_string()),
            Encoding::Alternate => entry.alternate = Some(raw.trim().to_string()),
            Encoding::Group | Encoding::Other => {}
        }
        Some(id)
    }

    /// Records that `primary` and `alternate` belong to the same participant,
    /// as observed in group metadata listing both.
    pub fn link(&mut self, primary: &str, alternate: &str) -> Option<CanonicalId> {
        if encoding_of(alternate) != Encoding::Alternate {
            return self.remember(primary);
        }
        let id = normalize(primary).trusted()?.clone();
        let key = alternate_key(alternate)?.to_string();

        if self.alternates.get(&key) != Some(&id) {
            debug!("Linked alternate encoding {} to identity {}", alternate, id);
            self.alternates.insert(key, id.clone());
        }

        let entry = self.entries.entry(id.clone()).or_default();
        if encoding_of(primary) == Encoding::Primary {
            entry.primary = Some(primary.trim().to_string());
        }
        entry.alternate = Some(alternate.trim().to_string());
        Some(id)
    }

    /// The address to use when talking about `id`: the remembered alternate
    /// encoding if any, then the remembered primary, else a synthesized
    /// phone-derived address.
    pub fn resolve_address(&self, id: &CanonicalId) -> String {
        self.entries
            .get(id)
            .and_then(|known| known.alternate.clone().or_else(|| known.primary.clone()))
            .unwrap_or_else(|| id.primary_address())
    }

    pub fn encodings(&self, id: &CanonicalId) -> Option<&KnownEncodings> {
        self.entries.get(id)
    }

    /// True when both addresses resolve to the same participant.
    pub fn same_participant(&self, left: &str, right: &str) -> bool {
        match (self.resolve(left).into_identity(), self.resolve(right).into_identity()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn alternate_key(raw: &str) -> Option<&str> {
    raw.trim()
        .rsplit_once('@')
        .map(|(local, _)| local)
        .filter(|local| !local.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> CanonicalId {
        CanonicalId::parse(value).expect("digits")
    }

    #[test]
    fn remember_stores_encoding_by_kind() {
        let mut cache = IdentityCache::new();
        assert_eq!(cache.remember("5551234:3@s.whatsapp.net"), Some(id("5551234")));
        assert_eq!(cache.remember("5551234@lid"), Some(id("5551234")));

        let known = cache.encodings(&id("5551234")).expect("entry");
        assert_eq!(known.primary.as_deref(), Some("5551234:3@s.whatsapp.net"));
        assert_eq!(known.alternate.as_deref(), Some("5551234@lid"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remember_rejects_unknown_addresses() {
        let mut cache = IdentityCache::new();
        assert_eq!(cache.remember("status@broadcast"), None);
        assert_eq!(cache.remember("120363@g.us"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn linked_alternate_resolves_to_phone_identity() {
        let mut cache = IdentityCache::new();
        assert_eq!(normalize("98765@lid").identity(), Some(&id("98765")));

        cache.link("5551234@s.whatsapp.net", "98765@lid");

        assert_eq!(cache.resolve("98765@lid"), Normalized::Exact(id("5551234")));
        assert!(cache.same_participant("98765@lid", "5551234:9@s.whatsapp.net"));
        assert_eq!(cache.remember("98765@lid"), Some(id("5551234")));
    }

    #[test]
    fn resolve_address_prefers_alternate_then_synthesizes() {
        let mut cache = IdentityCache::new();
        assert_eq!(
            cache.resolve_address(&id("111")),
            "111@s.whatsapp.net".to_string()
        );

        cache.remember("222:4@s.whatsapp.net");
        assert_eq!(cache.resolve_address(&id("222")), "222:4@s.whatsapp.net");

        cache.link("222@s.whatsapp.net", "777@lid");
        assert_eq!(cache.resolve_address(&id("222")), "777@lid");
    }

    #[test]
    fn link_without_alternate_falls_back_to_remember() {
        let mut cache = IdentityCache::new();
        assert_eq!(
            cache.link("333@s.whatsapp.net", "333@s.whatsapp.net"),
            Some(id("333"))
        );
        assert!(cache.encodings(&id("333")).is_some());
    }
}
