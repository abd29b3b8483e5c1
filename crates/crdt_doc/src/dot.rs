//! Write identifiers for the replicated document.
//!
//! Every mutation of the document is stamped with a [`Dot`]: the pair of the
//! writing actor and a counter that is monotonic per actor. Dots are totally
//! ordered (counter first, actor as the tie-breaker), which is what makes
//! last-writer-wins and sibling ordering deterministic across replicas.

use crate::error::ClockError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Identifier of a writer/replica.
///
/// Actor ids are caller-chosen, stable, non-empty strings. They are used for:
/// - Attributing writes to a replica
/// - Breaking ties between concurrent writes (lexicographically greater wins)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(String);

impl ActorId {
    /// Create an actor id. Rejects the empty string.
    pub fn new(id: impl Into<String>) -> Result<Self, ClockError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ClockError::InvalidActor);
        }
        Ok(Self(id))
    }

    /// Create a fresh random actor id (UUID v4).
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ActorId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A single write event: `(actor, ctr)` with `ctr >= 1`.
///
/// Dots are totally ordered by counter, then by actor id. Two dots from
/// different actors can carry the same counter; the actor comparison keeps
/// the order total and deterministic.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dot {
    /// The actor that produced this write.
    pub actor: ActorId,
    /// Per-actor monotonic counter, starting at 1.
    pub ctr: u64,
}

impl Dot {
    /// Create a dot. The counter must be positive.
    pub fn new(actor: ActorId, ctr: u64) -> Result<Self, ClockError> {
        if ctr == 0 {
            return Err(ClockError::InvalidCtr);
        }
        Ok(Self { actor, ctr })
    }

    /// The sequence-element id this dot denotes (`"actor:ctr"`).
    pub fn elem_id(&self) -> ElemId {
        ElemId(self.clone())
    }
}

impl fmt::Display for Dot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.actor, self.ctr)
    }
}

impl PartialOrd for Dot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dot {
    fn cmp(&self, other: &Self) -> Ordering {
        // Counter first, actor id breaks ties.
        match self.ctr.cmp(&other.ctr) {
            Ordering::Equal => self.actor.cmp(&other.actor),
            ord => ord,
        }
    }
}

/// Identifier of a sequence element: the insertion dot rendered as
/// `"actor:ctr"`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElemId(pub Dot);

impl ElemId {
    /// The insertion dot this id was minted from.
    pub fn dot(&self) -> &Dot {
        &self.0
    }

    /// Parse an element id from its `"actor:ctr"` rendering.
    ///
    /// The counter is the suffix after the last `:`, so actor ids containing
    /// colons round-trip.
    pub fn parse(s: &str) -> Result<Self, ClockError> {
        let (actor, ctr) = s.rsplit_once(':').ok_or(ClockError::InvalidActor)?;
        let actor = ActorId::new(actor)?;
        let ctr: u64 = ctr.parse().map_err(|_| ClockError::InvalidCtr)?;
        Ok(ElemId(Dot::new(actor, ctr)?))
    }
}

impl fmt::Display for ElemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The sentinel rendering of the virtual sequence origin.
pub const HEAD: &str = "HEAD";

/// Insertion anchor of a sequence element: the virtual origin, or an
/// existing element.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Anchor {
    /// The virtual origin of the sequence.
    Head,
    /// A concrete predecessor element.
    Elem(ElemId),
}

impl Anchor {
    /// Parse an anchor from its wire rendering (`"HEAD"` or `"actor:ctr"`).
    pub fn parse(s: &str) -> Result<Self, ClockError> {
        if s == HEAD {
            Ok(Anchor::Head)
        } else {
            Ok(Anchor::Elem(ElemId::parse(s)?))
        }
    }

    /// True for the virtual origin.
    pub fn is_head(&self) -> bool {
        matches!(self, Anchor::Head)
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anchor::Head => write!(f, "{}", HEAD),
            Anchor::Elem(id) => write!(f, "{}", id),
        }
    }
}

impl From<ElemId> for Anchor {
    fn from(id: ElemId) -> Self {
        Anchor::Elem(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(actor: &str, ctr: u64) -> Dot {
        Dot::new(ActorId::new(actor).unwrap(), ctr).unwrap()
    }

    #[test]
    fn test_actor_id_rejects_empty() {
        assert_eq!(ActorId::new(""), Err(ClockError::InvalidActor));
        assert!(ActorId::new("a").is_ok());
    }

    #[test]
    fn test_dot_rejects_zero_ctr() {
        let actor = ActorId::new("a").unwrap();
        assert_eq!(Dot::new(actor, 0), Err(ClockError::InvalidCtr));
    }

    #[test]
    fn test_dot_ordering_ctr_first() {
        assert!(dot("b", 1) < dot("a", 2));
        assert!(dot("a", 2) < dot("a", 3));
    }

    #[test]
    fn test_dot_ordering_actor_tiebreak() {
        // Same counter: lexicographically greater actor wins.
        assert!(dot("A", 2) < dot("B", 2));
    }

    #[test]
    fn test_elem_id_round_trip() {
        let id = dot("peer-1", 42).elem_id();
        assert_eq!(id.to_string(), "peer-1:42");
        assert_eq!(ElemId::parse("peer-1:42").unwrap(), id);
    }

    #[test]
    fn test_elem_id_parse_actor_with_colon() {
        let id = ElemId::parse("a:b:7").unwrap();
        assert_eq!(id.dot().actor.as_str(), "a:b");
        assert_eq!(id.dot().ctr, 7);
    }

    #[test]
    fn test_elem_id_parse_rejects_garbage() {
        assert!(ElemId::parse("noctr").is_err());
        assert!(ElemId::parse(":1").is_err());
        assert!(ElemId::parse("a:").is_err());
        assert!(ElemId::parse("a:0").is_err());
    }

    #[test]
    fn test_anchor_parse() {
        assert_eq!(Anchor::parse("HEAD").unwrap(), Anchor::Head);
        assert_eq!(
            Anchor::parse("a:1").unwrap(),
            Anchor::Elem(dot("a", 1).elem_id())
        );
    }

    #[test]
    fn test_random_actor_ids_differ() {
        assert_ne!(ActorId::random(), ActorId::random());
    }
}
