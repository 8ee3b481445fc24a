/// Consistent-hash ring over a fixed list of shards
use crate::utils::ring_hash;
use std::collections::BTreeMap;

/// Virtual node points, ordered as signed 64-bit hashes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ring {
    points: BTreeMap<i64, usize>,
    shards: usize,
}

impl Ring {
    /// Place `virtual_nodes` points per shard, named `SHARD-<i>-NODE-<n>`.
    ///
    /// A later point overwrites an earlier one on a hash collision.
    pub fn new(shards: usize, virtual_nodes: usize) -> Self {
        let mut points = BTreeMap::new();
        for shard in 0..shards {
            for node in 0..virtual_nodes {
                points.insert(ring_hash(&format!("SHARD-{}-NODE-{}", shard, node)), shard);
            }
        }
        Self { points, shards }
    }

    /// Shard owning `key`: the first point at or after its hash, wrapping.
    pub fn lookup(&self, key: &str) -> Option<usize> {
        let hash = ring_hash(key);
        self.points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, shard)| *shard)
    }

    pub fn shards(&self) -> usize {
        self.shards
    }

    /// Number of distinct points on the ring
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_stable_across_builds() {
        let first = Ring::new(2, 160).lookup("user:42");
        assert!(first.is_some());
        for _ in 0..1000 {
            assert_eq!(Ring::new(2, 160).lookup("user:42"), first);
        }
    }

    #[test]
    fn test_independent_builds_agree_on_every_key() {
        let a = Ring::new(4, 160);
        let b = Ring::new(4, 160);
        assert_eq!(a, b);
        for i in 0..2000 {
            let key = format!("key-{}", i);
            assert_eq!(a.lookup(&key), b.lookup(&key));
        }
    }

    #[test]
    fn test_lookup_takes_first_point_at_or_after_hash() {
        let ring = Ring::new(3, 10);
        let points: Vec<(i64, usize)> = ring.points.iter().map(|(h, s)| (*h, *s)).collect();
        for i in 0..500 {
            let key = format!("k{}", i);
            let hash = ring_hash(&key);
            let expected = points
                .iter()
                .find(|(point, _)| *point >= hash)
                .unwrap_or(&points[0])
                .1;
            assert_eq!(ring.lookup(&key), Some(expected));
        }
    }

    #[test]
    fn test_keys_spread_over_shards() {
        let ring = Ring::new(2, 160);
        assert_eq!(ring.shards(), 2);
        assert!(ring.len() > 300);
        let on_first = (0..1000)
            .filter(|i| ring.lookup(&format!("user:{}", i)) == Some(0))
            .count();
        assert!(on_first > 250 && on_first < 750, "{} of 1000 on shard 0", on_first);
    }

    #[test]
    fn test_empty_ring() {
        let ring = Ring::new(0, 160);
        assert!(ring.is_empty());
        assert_eq!(ring.lookup("k"), None);
    }
}
