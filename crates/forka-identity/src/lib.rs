//! Forka Identity
//!
//! Address normalization and the learned primary/alternate encoding map.
//!
//! A participant can show up under two encodings: the phone-derived
//! `<number>[:<device>]@s.whatsapp.net` form and the opaque `<id>@lid` form the
//! platform substitutes inside privacy-enabled groups. Both reduce to a
//! digit-only [`CanonicalId`].

mod cache;

pub use cache::{IdentityCache, KnownEncodings};

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

pub const PRIMARY_SERVER: &str = "s.whatsapp.net";
pub const ALTERNATE_SERVER: &str = "lid";
pub const GROUP_SERVER: &str = "g.us";

/// Digit-only participant identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalId(String);

impl CanonicalId {
    /// Accepts only non-empty ASCII digit strings.
    pub fn parse(value: &str) -> Option<Self> {
        is_all_digits(value).then(|| Self(value.to_string()))
    }

    /// Builds an identity from free-form configuration input such as
    /// `+39 333 123 4567`, keeping only the digits.
    pub fn from_number(value: &str) -> Option<Self> {
        let digits: String = value.chars().filter(char::is_ascii_digit).collect();
        Self::parse(&digits)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The phone-derived address the platform would use for this identity.
    pub fn primary_address(&self) -> String {
        format!("{}@{}", self.0, PRIMARY_SERVER)
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// Structurally parsed participant identity.
    Exact(CanonicalId),
    /// Produced by concatenating digit runs of an unparseable address. Two
    /// different addresses can collide here, so it never grants privileges.
    Lossy(CanonicalId),
    /// A group conversation address, returned verbatim.
    Conversation(String),
    Unknown,
}

impl Normalized {
    /// Participant identity, exact or lossy.
    pub fn identity(&self) -> Option<&CanonicalId> {
        match self {
            Self::Exact(id) | Self::Lossy(id) => Some(id),
            Self::Conversation(_) | Self::Unknown => None,
        }
    }

    /// Participant identity only when it was parsed structurally.
    pub fn trusted(&self) -> Option<&CanonicalId> {
        match self {
            Self::Exact(id) => Some(id),
            _ => None,
        }
    }

    pub fn into_identity(self) -> Option<CanonicalId> {
        match self {
            Self::Exact(id) | Self::Lossy(id) => Some(id),
            Self::Conversation(_) | Self::Unknown => None,
        }
    }
}

/// Which encoding an address uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Primary,
    Alternate,
    Group,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAddress<'a> {
    pub user: &'a str,
    pub agent: Option<&'a str>,
    pub device: Option<&'a str>,
    pub server: &'a str,
}

/// Splits `user[_agent][:device]@server`. Returns `None` when there is no
/// server part or the user part is empty.
pub fn decode_address(raw: &str) -> Option<DecodedAddress<'_>> {
    let (local, server) = raw.trim().rsplit_once('@')?;
    if server.is_empty() {
        return None;
    }
    let (user_agent, device) = match local.split_once(':') {
        Some((head, device)) => (head, Some(device)),
        None => (local, None),
    };
    let (user, agent) = match user_agent.split_once('_') {
        Some((user, agent)) => (user, Some(agent)),
        None => (user_agent, None),
    };
    if user.is_empty() {
        return None;
    }
    Some(DecodedAddress {
        user,
        agent,
        device,
        server,
    })
}

pub fn encoding_of(raw: &str) -> Encoding {
    match raw.trim().rsplit_once('@').map(|(_, server)| server) {
        Some(PRIMARY_SERVER) => Encoding::Primary,
        Some(ALTERNATE_SERVER) => Encoding::Alternate,
        Some(GROUP_SERVER) => Encoding::Group,
        _ => Encoding::Other,
    }
}

pub fn is_group_address(raw: &str) -> bool {
    encoding_of(raw) == Encoding::Group
}

/// Reduces a raw participant address to its canonical identity.
///
/// Rules are tried in order:
/// 1. all digits: already canonical
/// 2. `<digits>@lid`
/// 3. `<digits>[:device]@s.whatsapp.net`
/// 4. `...@g.us`: a conversation, returned verbatim
/// 5. structured decode with a digit-only user part
/// 6. concatenated digit runs, reported as [`Normalized::Lossy`]
/// 7. [`Normalized::Unknown`]
pub fn normalize(raw: &str) -> Normalized {
    let raw = raw.trim();
    if raw.is_empty() {
        return Normalized::Unknown;
    }

    if let Some(id) = CanonicalId::parse(raw) {
        return Normalized::Exact(id);
    }

    if let Some((local, server)) = raw.rsplit_once('@') {
        match server {
            ALTERNATE_SERVER => {
                if let Some(id) = CanonicalId::parse(local) {
                    return Normalized::Exact(id);
                }
            }
            PRIMARY_SERVER => {
                let number = local.split(':').next().unwrap_or(local);
                if let Some(id) = CanonicalId::parse(number) {
                    return Normalized::Exact(id);
                }
            }
            GROUP_SERVER => return Normalized::Conversation(raw.to_string()),
            _ => {}
        }
    }

    if let Some(id) = decode_address(raw).and_then(|decoded| CanonicalId::parse(decoded.user)) {
        return Normalized::Exact(id);
    }

    let digits: String = digit_runs().find_iter(raw).map(|m| m.as_str()).collect();
    match CanonicalId::parse(&digits) {
        Some(id) => Normalized::Lossy(id),
        None => Normalized::Unknown,
    }
}

fn digit_runs() -> &'static Regex {
    static DIGIT_RUNS: OnceLock<Regex> = OnceLock::new();
    DIGIT_RUNS.get_or_init(|| Regex::new(r"\d+").expect("static digit pattern"))
}

fn is_all_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(value: &str) -> Normalized {
        Normalized::Exact(CanonicalId::parse(value).expect("digits"))
    }

    #[test]
    fn both_encodings_reduce_to_same_identity() {
        assert_eq!(normalize("5551234@lid"), exact("5551234"));
        assert_eq!(normalize("5551234:7@s.whatsapp.net"), exact("5551234"));
        assert_eq!(normalize("5551234@s.whatsapp.net"), exact("5551234"));
    }

    #[test]
    fn canonical_input_is_a_fixed_point() {
        for raw in ["5551234@lid", "5551234:7@s.whatsapp.net", "42"] {
            let first = normalize(raw);
            let id = first.identity().expect("identity").clone();
            assert_eq!(normalize(id.as_str()), first);
        }
    }

    #[test]
    fn group_addresses_are_conversations() {
        assert_eq!(
            normalize("120363041234567890@g.us"),
            Normalized::Conversation("120363041234567890@g.us".to_string())
        );
        assert!(is_group_address("120363041234567890@g.us"));
        assert!(!is_group_address("5551234@s.whatsapp.net"));
    }

    #[test]
    fn structured_decode_handles_agent_and_device() {
        assert_eq!(normalize("5551234_1:3@c.us"), exact("5551234"));
        let decoded = decode_address("5551234_1:3@c.us").expect("decoded");
        assert_eq!(decoded.user, "5551234");
        assert_eq!(decoded.agent, Some("1"));
        assert_eq!(decoded.device, Some("3"));
        assert_eq!(decoded.server, "c.us");
    }

    #[test]
    fn digit_fallback_is_reported_as_lossy() {
        let result = normalize("+39 333-123 4567");
        assert_eq!(
            result,
            Normalized::Lossy(CanonicalId::parse("393331234567").expect("digits"))
        );
        assert!(result.trusted().is_none());
        assert!(result.identity().is_some());
    }

    #[test]
    fn non_digit_user_is_not_an_identity() {
        assert_eq!(normalize("status@broadcast"), Normalized::Unknown);
        assert_eq!(normalize(""), Normalized::Unknown);
        assert_eq!(normalize("   "), Normalized::Unknown);
        assert_eq!(normalize("abc@lid"), Normalized::Unknown);
    }

    #[test]
    fn from_number_strips_formatting() {
        let id = CanonicalId::from_number("+39 (333) 123-4567").expect("digits");
        assert_eq!(id.as_str(), "393331234567");
        assert_eq!(id.primary_address(), "393331234567@s.whatsapp.net");
        assert!(CanonicalId::from_number("owner").is_none());
    }

    #[test]
    fn encoding_detection() {
        assert_eq!(encoding_of("1@lid"), Encoding::Alternate);
        assert_eq!(encoding_of("1:2@s.whatsapp.net"), Encoding::Primary);
        assert_eq!(encoding_of("1@g.us"), Encoding::Group);
        assert_eq!(encoding_of("1"), Encoding::Other);
    }
}
