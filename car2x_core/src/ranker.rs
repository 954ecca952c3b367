//! Nearest-peer ranking for V2V lists.

use std::iter::Take;
use std::vec;

use crate::geo_math::GeoPoint;
use crate::location::LocationFix;
use crate::messages::PeerEntry;

/// A peer together with its distance from self.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedPeer {
    /// Great-circle distance in meters
    pub distance_m: f64,
    pub peer: PeerEntry,
}

/// Ranks peers by distance and keeps the nearest `k`.
#[derive(Debug, Clone, Copy)]
pub struct ProximityRanker {
    k: usize,
}

impl ProximityRanker {
    pub fn new(k: usize) -> Self {
        Self { k }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Computes a fresh ranking of `peers` around `origin`.
    ///
    /// Equal distances keep their input order. Self never appears because
    /// only the supplied peers are ranked.
    pub fn rank<I>(&self, origin: &LocationFix, peers: I) -> Ranking
    where
        I: IntoIterator<Item = PeerEntry>,
    {
        let origin = origin.position();
        let mut ranked: Vec<RankedPeer> = peers
            .into_iter()
            .map(|peer| RankedPeer {
                distance_m: origin.distance_to(&GeoPoint::new(peer.lat, peer.lon)),
                peer,
            })
            .collect();

        // sort_by is stable
        ranked.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));

        Ranking {
            inner: ranked.into_iter().take(self.k),
        }
    }
}

impl Default for ProximityRanker {
    fn default() -> Self {
        Self::new(3)
    }
}

/// One-shot ranking result, nearest first.
///
/// Consumed by iteration; a new V2V message produces a new ranking.
#[derive(Debug)]
pub struct Ranking {
    inner: Take<vec::IntoIter<RankedPeer>>,
}

impl Iterator for Ranking {
    type Item = RankedPeer;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Ranking {}

/// Ranks `peers` around `origin`, keeping the nearest `k`.
pub fn rank<I>(origin: &LocationFix, peers: I, k: usize) -> Ranking
where
    I: IntoIterator<Item = PeerEntry>,
{
    ProximityRanker::new(k).rank(origin, peers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn origin() -> LocationFix {
        LocationFix::new(10.0, 20.0, 5.0, 0.0, 0)
    }

    fn ids(ranking: Ranking) -> Vec<String> {
        ranking.map(|r| r.peer.vehicle_id).collect()
    }

    #[test]
    fn test_nearest_three_in_order() {
        let peers = vec![
            PeerEntry::new("FAR", 10.01, 20.0, 0.0),
            PeerEntry::new("NEAR", 10.0001, 20.0, 0.0),
            PeerEntry::new("MID", 10.001, 20.0, 0.0),
            PeerEntry::new("FARTHEST", 10.1, 20.0, 0.0),
        ];
        assert_eq!(ids(rank(&origin(), peers, 3)), vec!["NEAR", "MID", "FAR"]);
    }

    #[test]
    fn test_distances_reported() {
        let peers = vec![PeerEntry::new("A", 10.0001, 20.0, 12.0)];
        let ranked: Vec<_> = rank(&origin(), peers, 3).collect();
        assert_eq!(ranked.len(), 1);
        assert_relative_eq!(ranked[0].distance_m, 11.12, epsilon = 0.01);
        assert_relative_eq!(ranked[0].peer.speed_kmh, 12.0);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let peers = vec![
            PeerEntry::new("SECOND", 10.001, 20.0, 0.0),
            PeerEntry::new("THIRD", 10.001, 20.0, 0.0),
            PeerEntry::new("FIRST", 10.0, 20.0, 0.0),
            PeerEntry::new("FOURTH", 10.001, 20.0, 0.0),
        ];
        assert_eq!(ids(rank(&origin(), peers, 3)), vec!["FIRST", "SECOND", "THIRD"]);
    }

    #[test]
    fn test_empty_and_zero_k() {
        assert_eq!(rank(&origin(), Vec::new(), 3).len(), 0);
        let peers = vec![PeerEntry::new("A", 10.0, 20.0, 0.0)];
        assert_eq!(rank(&origin(), peers, 0).len(), 0);
    }

    #[test]
    fn test_peer_with_own_id_is_still_ranked() {
        let peers = vec![PeerEntry::new("CAR0001", 10.0, 20.0, 0.0)];
        let ranker = ProximityRanker::default();
        assert_eq!(ranker.k(), 3);
        assert_eq!(ids(ranker.rank(&origin(), peers)), vec!["CAR0001"]);
    }

    fn peers_strategy() -> impl Strategy<Value = Vec<PeerEntry>> {
        // Distinct offsets guarantee distinct distances.
        prop::collection::btree_set(1u32..5000, 0..12).prop_map(|offsets| {
            offsets
                .into_iter()
                .map(|o| PeerEntry::new(format!("P{o}"), 10.0 + f64::from(o) * 1e-5, 20.0, 0.0))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_sorted_and_bounded(peers in peers_strategy()) {
            let n = peers.len();
            let ranked: Vec<_> = rank(&origin(), peers, 3).collect();
            prop_assert_eq!(ranked.len(), n.min(3));
            for pair in ranked.windows(2) {
                prop_assert!(pair[0].distance_m <= pair[1].distance_m);
            }
        }

        #[test]
        fn prop_order_invariant(
            (peers, shuffled) in peers_strategy()
                .prop_flat_map(|p| (Just(p.clone()), Just(p).prop_shuffle()))
        ) {
            prop_assert_eq!(ids(rank(&origin(), peers, 3)), ids(rank(&origin(), shuffled, 3)));
        }
    }
}
