//! One-to-one map kept consistent in both directions.

use std::collections::HashMap;
use std::hash::Hash;

/// Bidirectional, at-most-one-to-one association.
///
/// Invariant: `forward[l] == r` iff `backward[r] == l`. Every mutation goes
/// through [`insert`](Self::insert) or the `remove_*` methods, which touch
/// both sides together.
#[derive(Debug, Clone)]
pub struct BiMap<L, R> {
    forward: HashMap<L, R>,
    backward: HashMap<R, L>,
}

/// Why an insert was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict<L, R> {
    /// The left key is already paired with this other right value.
    Left(R),
    /// The right key is already paired with this other left value.
    Right(L),
}

impl<L, R> BiMap<L, R>
where
    L: Eq + Hash + Clone,
    R: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            forward: HashMap::new(),
            backward: HashMap::new(),
        }
    }

    /// Pairs `left` with `right`.
    ///
    /// Re-inserting an existing pair is accepted and changes nothing. If either
    /// side is already paired with a different counterpart the map is left
    /// untouched and the conflict is returned.
    pub fn insert(&mut self, left: L, right: R) -> Result<(), Conflict<L, R>> {
        if let Some(existing) = self.forward.get(&left) {
            if *existing == right {
                return Ok(());
            }
            return Err(Conflict::Left(existing.clone()));
        }
        if let Some(existing) = self.backward.get(&right) {
            return Err(Conflict::Right(existing.clone()));
        }
        self.forward.insert(left.clone(), right.clone());
        self.backward.insert(right, left);
        Ok(())
    }

    pub fn get_by_left(&self, left: &L) -> Option<&R> {
        self.forward.get(left)
    }

    pub fn get_by_right(&self, right: &R) -> Option<&L> {
        self.backward.get(right)
    }

    pub fn contains_left(&self, left: &L) -> bool {
        self.forward.contains_key(left)
    }

    pub fn contains_right(&self, right: &R) -> bool {
        self.backward.contains_key(right)
    }

    pub fn remove_by_left(&mut self, left: &L) -> Option<R> {
        let right = self.forward.remove(left)?;
        self.backward.remove(&right);
        Some(right)
    }

    pub fn remove_by_right(&mut self, right: &R) -> Option<L> {
        let left = self.backward.remove(right)?;
        self.forward.remove(&left);
        Some(left)
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.backward.clear();
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&L, &R)> {
        self.forward.iter()
    }

    /// Checks that both directions describe the same pairs.
    pub fn is_consistent(&self) -> bool {
        self.forward.len() == self.backward.len()
            && self
                .forward
                .iter()
                .all(|(l, r)| self.backward.get(r) == Some(l))
    }
}

impl<L, R> Default for BiMap<L, R>
where
    L: Eq + Hash + Clone,
    R: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup_both_ways() {
        let mut map = BiMap::new();
        map.insert("live-a", "cfg-a").unwrap();
        assert_eq!(map.get_by_left(&"live-a"), Some(&"cfg-a"));
        assert_eq!(map.get_by_right(&"cfg-a"), Some(&"live-a"));
        assert!(map.is_consistent());
    }

    #[test]
    fn conflicting_insert_is_rejected_without_change() {
        let mut map = BiMap::new();
        map.insert(1, 10).unwrap();
        assert_eq!(map.insert(1, 11), Err(Conflict::Left(10)));
        assert_eq!(map.insert(2, 10), Err(Conflict::Right(1)));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get_by_left(&1), Some(&10));
        assert!(map.get_by_right(&11).is_none());
        assert!(map.is_consistent());
    }

    #[test]
    fn reinsert_same_pair_is_noop() {
        let mut map = BiMap::new();
        map.insert(1, 10).unwrap();
        assert!(map.insert(1, 10).is_ok());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn remove_from_either_side_clears_both() {
        let mut map = BiMap::new();
        map.insert(1, 10).unwrap();
        map.insert(2, 20).unwrap();
        assert_eq!(map.remove_by_right(&10), Some(1));
        assert!(!map.contains_left(&1));
        assert_eq!(map.remove_by_left(&2), Some(20));
        assert!(!map.contains_right(&20));
        assert!(map.is_empty());
        assert_eq!(map.remove_by_left(&3), None);
    }

    #[test]
    fn arbitrary_sequences_stay_consistent() {
        // Deterministic pseudo-random walk over a small key space.
        let mut map = BiMap::new();
        let mut seed: u32 = 0x2545_f491;
        for _ in 0..5_000 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let l = seed % 7;
            let r = (seed >> 8) % 7;
            match (seed >> 16) % 3 {
                0 => {
                    let _ = map.insert(l, r);
                }
                1 => {
                    map.remove_by_left(&l);
                }
                _ => {
                    map.remove_by_right(&r);
                }
            }
            assert!(map.is_consistent());
            for (left, right) in map.iter() {
                assert_eq!(map.get_by_right(right), Some(left));
            }
        }
    }
}
