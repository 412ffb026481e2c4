use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Identity of a conversation.
///
/// A private conversation has no stored row; it is the unordered pair of its
/// two participants. The pair is always kept sorted so that `(a, b)` and
/// `(b, a)` produce the same key, the same cache entry and the same ordering
/// scope. On the wire and in the store the key is a plain string:
/// `dm:{low}:{high}` or `group:{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConversationKey {
    Direct(Uuid, Uuid),
    Group(Uuid),
}

impl ConversationKey {
    pub fn direct(a: Uuid, b: Uuid) -> Self {
        if a <= b {
            Self::Direct(a, b)
        } else {
            Self::Direct(b, a)
        }
    }

    pub fn group(group_id: Uuid) -> Self {
        Self::Group(group_id)
    }

    /// For a direct conversation, the participant that is not `me`.
    pub fn partner_of(&self, me: Uuid) -> Option<Uuid> {
        match *self {
            Self::Direct(a, b) if a == me => Some(b),
            Self::Direct(a, b) if b == me => Some(a),
            _ => None,
        }
    }

    pub fn group_id(&self) -> Option<Uuid> {
        match *self {
            Self::Group(id) => Some(id),
            Self::Direct(..) => None,
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(a, b) => write!(f, "dm:{}:{}", a, b),
            Self::Group(id) => write!(f, "group:{}", id),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid conversation key: {0}")]
pub struct ParseConversationKeyError(String);

impl FromStr for ConversationKey {
    type Err = ParseConversationKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseConversationKeyError(s.to_string());

        if let Some(rest) = s.strip_prefix("dm:") {
            let (a, b) = rest.split_once(':').ok_or_else(err)?;
            let a: Uuid = a.parse().map_err(|_| err())?;
            let b: Uuid = b.parse().map_err(|_| err())?;
            if a == b {
                return Err(err());
            }
            return Ok(Self::direct(a, b));
        }

        if let Some(rest) = s.strip_prefix("group:") {
            return rest.parse().map(Self::Group).map_err(|_| err());
        }

        Err(err())
    }
}

impl Serialize for ConversationKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConversationKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Where a client action is aimed: another user, or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Direct(Uuid),
    Group(Uuid),
}

impl Target {
    /// Build a target from the two optional id fields a client frame carries.
    /// Exactly one of them must be set.
    pub fn from_parts(receiver_id: Option<Uuid>, group_id: Option<Uuid>) -> Option<Self> {
        match (receiver_id, group_id) {
            (Some(user), None) => Some(Self::Direct(user)),
            (None, Some(group)) => Some(Self::Group(group)),
            _ => None,
        }
    }

    pub fn conversation_for(&self, me: Uuid) -> ConversationKey {
        match *self {
            Self::Direct(other) => ConversationKey::direct(me, other),
            Self::Group(id) => ConversationKey::Group(id),
        }
    }
}
