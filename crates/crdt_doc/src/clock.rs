//! Per-actor clocks and version vectors.
//!
//! A [`Clock`] mints fresh [`Dot`]s for one actor; a [`VersionVector`] records
//! the highest counter observed from every actor and forms a join-semilattice
//! (pointwise max). Causal ordering across replicas is carried entirely by
//! dots and version vectors; wall-clock time is never consulted.

use crate::dot::{ActorId, Dot};
use crate::error::ClockError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dot generator for a single actor.
///
/// The counter is monotonic and must stay at or above the highest counter
/// observed from the same actor in any attached document; [`Clock::observe`]
/// and [`Clock::fast_forward`] keep that invariant when remote writes or
/// skewed sibling dots are encountered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clock {
    actor: ActorId,
    ctr: u64,
}

impl Clock {
    /// Create a clock for `actor`, starting at `start` (the next dot will
    /// carry `start + 1`).
    pub fn new(actor: ActorId, start: u64) -> Self {
        Self { actor, ctr: start }
    }

    /// Create a clock from a raw actor string. Rejects empty actors.
    pub fn parse(actor: &str, start: u64) -> Result<Self, ClockError> {
        Ok(Self::new(ActorId::new(actor)?, start))
    }

    /// The actor this clock mints dots for.
    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    /// The highest counter this clock has handed out or observed.
    pub fn ctr(&self) -> u64 {
        self.ctr
    }

    /// Mint the next dot.
    pub fn next(&mut self) -> Dot {
        self.ctr += 1;
        Dot {
            actor: self.actor.clone(),
            ctr: self.ctr,
        }
    }

    /// Raise the counter to at least `ctr` without minting a dot.
    pub fn fast_forward(&mut self, ctr: u64) {
        if ctr > self.ctr {
            self.ctr = ctr;
        }
    }

    /// Absorb an observed dot: if it belongs to this clock's actor, the
    /// counter is raised so future dots do not collide with it.
    pub fn observe(&mut self, dot: &Dot) {
        if dot.actor == self.actor {
            self.fast_forward(dot.ctr);
        }
    }
}

/// Highest observed counter per actor.
///
/// Partial order is pointwise `<=`; [`VersionVector::merge`] is the lattice
/// join (pointwise max). Entries are kept sorted so iteration is
/// deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector {
    entries: BTreeMap<ActorId, u64>,
}

impl VersionVector {
    /// Create an empty version vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest counter observed from `actor` (0 if never seen).
    pub fn get(&self, actor: &ActorId) -> u64 {
        self.entries.get(actor).copied().unwrap_or(0)
    }

    /// Record `actor` at `ctr`, keeping the maximum.
    pub fn set_max(&mut self, actor: ActorId, ctr: u64) {
        let entry = self.entries.entry(actor).or_insert(0);
        if ctr > *entry {
            *entry = ctr;
        }
    }

    /// Absorb an observed dot.
    pub fn observe_dot(&mut self, dot: &Dot) {
        self.set_max(dot.actor.clone(), dot.ctr);
    }

    /// Lattice join: pointwise maximum of both vectors.
    pub fn merge(&mut self, other: &VersionVector) {
        for (actor, &ctr) in &other.entries {
            self.set_max(actor.clone(), ctr);
        }
    }

    /// True when this vector has observed `dot`.
    pub fn contains_dot(&self, dot: &Dot) -> bool {
        self.get(&dot.actor) >= dot.ctr
    }

    /// Mint the next dot for `actor` directly against this vector,
    /// recording it as observed.
    pub fn next_dot_for_actor(&mut self, actor: &ActorId) -> Dot {
        let ctr = self.get(actor) + 1;
        self.entries.insert(actor.clone(), ctr);
        Dot {
            actor: actor.clone(),
            ctr,
        }
    }

    /// True when every entry of `other` is covered by this vector.
    pub fn dominates(&self, other: &VersionVector) -> bool {
        other
            .entries
            .iter()
            .all(|(actor, &ctr)| self.get(actor) >= ctr)
    }

    /// Iterate entries in sorted actor order.
    pub fn iter(&self) -> impl Iterator<Item = (&ActorId, u64)> + '_ {
        self.entries.iter().map(|(a, &c)| (a, c))
    }

    /// True when no actor has been observed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(ActorId, u64)> for VersionVector {
    fn from_iter<I: IntoIterator<Item = (ActorId, u64)>>(iter: I) -> Self {
        let mut vv = VersionVector::new();
        for (actor, ctr) in iter {
            vv.set_max(actor, ctr);
        }
        vv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(s: &str) -> ActorId {
        ActorId::new(s).unwrap()
    }

    fn dot(s: &str, ctr: u64) -> Dot {
        Dot::new(actor(s), ctr).unwrap()
    }

    #[test]
    fn test_clock_next_is_monotonic() {
        let mut clock = Clock::parse("a", 0).unwrap();
        assert_eq!(clock.next().ctr, 1);
        assert_eq!(clock.next().ctr, 2);
        assert_eq!(clock.ctr(), 2);
    }

    #[test]
    fn test_clock_starts_above_start() {
        let mut clock = Clock::parse("a", 10).unwrap();
        assert_eq!(clock.next().ctr, 11);
    }

    #[test]
    fn test_clock_rejects_empty_actor() {
        assert_eq!(Clock::parse("", 0), Err(ClockError::InvalidActor));
    }

    #[test]
    fn test_clock_observe_same_actor_only() {
        let mut clock = Clock::parse("a", 0).unwrap();
        clock.observe(&dot("b", 99));
        assert_eq!(clock.ctr(), 0);
        clock.observe(&dot("a", 5));
        assert_eq!(clock.ctr(), 5);
        // Observing an older dot never rewinds.
        clock.observe(&dot("a", 2));
        assert_eq!(clock.ctr(), 5);
    }

    #[test]
    fn test_clock_fast_forward() {
        let mut clock = Clock::parse("a", 3).unwrap();
        clock.fast_forward(7);
        assert_eq!(clock.next().ctr, 8);
        clock.fast_forward(2);
        assert_eq!(clock.ctr(), 8);
    }

    #[test]
    fn test_vv_observe_and_contains() {
        let mut vv = VersionVector::new();
        vv.observe_dot(&dot("a", 3));
        assert!(vv.contains_dot(&dot("a", 3)));
        assert!(vv.contains_dot(&dot("a", 1)));
        assert!(!vv.contains_dot(&dot("a", 4)));
        assert!(!vv.contains_dot(&dot("b", 1)));
    }

    #[test]
    fn test_vv_merge_is_pointwise_max() {
        let mut a = VersionVector::new();
        a.set_max(actor("a"), 3);
        a.set_max(actor("b"), 5);

        let mut b = VersionVector::new();
        b.set_max(actor("a"), 7);
        b.set_max(actor("c"), 1);

        a.merge(&b);
        assert_eq!(a.get(&actor("a")), 7);
        assert_eq!(a.get(&actor("b")), 5);
        assert_eq!(a.get(&actor("c")), 1);
    }

    #[test]
    fn test_vv_next_dot_for_actor() {
        let mut vv = VersionVector::new();
        let d1 = vv.next_dot_for_actor(&actor("a"));
        assert_eq!(d1.ctr, 1);
        let d2 = vv.next_dot_for_actor(&actor("a"));
        assert_eq!(d2.ctr, 2);
        assert!(vv.contains_dot(&d2));
    }

    #[test]
    fn test_vv_dominates() {
        let mut big = VersionVector::new();
        big.set_max(actor("a"), 5);
        big.set_max(actor("b"), 2);

        let mut small = VersionVector::new();
        small.set_max(actor("a"), 4);

        assert!(big.dominates(&small));
        assert!(!small.dominates(&big));
        assert!(big.dominates(&VersionVector::new()));
    }

    #[test]
    fn test_vv_set_max_never_lowers() {
        let mut vv = VersionVector::new();
        vv.set_max(actor("a"), 5);
        vv.set_max(actor("a"), 2);
        assert_eq!(vv.get(&actor("a")), 5);
    }
}
