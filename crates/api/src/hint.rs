//! The hint queue entry and its download priority ordering.

use crate::{DayStamp, IdentityId, Timestamp, WotError, WotResult};

/// Lowest capacity a hint source can carry.
pub const MIN_CAPACITY: u8 = 1;
/// Highest capacity a hint source can carry.
pub const MAX_CAPACITY: u8 = 100;

/// Whether a hint source is net-trusted or net-distrusted.
///
/// Collapsed to exactly two buckets so that this field cannot starve the
/// later tie-breaks of the priority order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum ScoreSign {
    /// Net-distrusted source.
    Negative,
    /// Net-trusted source.
    Positive,
}

impl ScoreSign {
    /// Collapse a raw score to its sign bucket.
    pub fn from_score(score: i32) -> Self {
        if score < 0 {
            Self::Negative
        } else {
            Self::Positive
        }
    }
}

/// The natural key of a hint: the claiming peer and the claimed-about peer.
/// At most one hint exists per key at any time.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct HintKey {
    /// The claiming peer.
    pub source: IdentityId,
    /// The claimed-about peer.
    pub target: IdentityId,
}

/// One peer's claim about the newest edition of another identity's data.
///
/// Immutable after construction. Carries identifiers only, never
/// references to identity records.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Hint {
    /// The claiming peer.
    pub source: IdentityId,
    /// The peer whose data the claim is about.
    pub target: IdentityId,
    /// When the claim was made, rounded to whole days.
    pub date: DayStamp,
    /// How structurally close the source is to the local trust roots,
    /// bounded to [MIN_CAPACITY]..=[MAX_CAPACITY].
    pub source_capacity: u8,
    /// Sign bucket of the source's score.
    pub score_sign: ScoreSign,
    /// The claimed edition of the target's data.
    pub edition: u64,
}

impl Hint {
    /// Construct a hint from an externally reported claim.
    ///
    /// Rejects self-claims and out-of-bounds capacities. The date is
    /// rounded to whole days and the raw score collapsed to its sign.
    pub fn new(
        source: IdentityId,
        target: IdentityId,
        date: Timestamp,
        source_capacity: u8,
        source_score: i32,
        edition: u64,
    ) -> WotResult<Self> {
        if source == target {
            return Err(WotError::other(format!(
                "identity {source} cannot hint about itself"
            )));
        }
        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&source_capacity) {
            return Err(WotError::other(format!(
                "source capacity {source_capacity} out of bounds"
            )));
        }
        Ok(Self {
            source,
            target,
            date: date.round_to_day(),
            source_capacity,
            score_sign: ScoreSign::from_score(source_score),
            edition,
        })
    }

    /// Construct the self-hint used when an own identity needs to be
    /// re-acquired from the network and no peer claim is available.
    ///
    /// This is the one sanctioned exception to the source != target rule
    /// and is only produced by the rebuild path, never by external claims.
    pub fn new_self(target: IdentityId, edition: u64) -> Self {
        Self {
            source: target.clone(),
            target,
            date: Timestamp::now().round_to_day(),
            source_capacity: MAX_CAPACITY,
            score_sign: ScoreSign::Positive,
            edition,
        }
    }

    /// The natural key of this hint.
    pub fn key(&self) -> HintKey {
        HintKey {
            source: self.source.clone(),
            target: self.target.clone(),
        }
    }

    /// The content key this hint points at.
    pub fn content_key(&self) -> crate::ContentKey {
        crate::ContentKey {
            identity: self.target.clone(),
            edition: self.edition,
        }
    }

    /// The reference download priority comparator, most-preferred first.
    ///
    /// Tie-break chain:
    /// 1. date descending - fresher claims are the most actionable.
    /// 2. source capacity descending - approximates "how close to my own
    ///    trust roots is this claim" and is stable against score inflation
    ///    of indirectly trusted identities.
    /// 3. score sign descending - positive before negative.
    /// 4. target ascending - editions of unrelated targets are not
    ///    comparable, so the target id is the stable secondary key that
    ///    keeps the order total and deterministic.
    /// 5. edition descending - within one target, the newest claim first.
    /// 6. source ascending - final tie-break; together with the target
    ///    this is the hint's natural key, so the order is unambiguous.
    ///
    /// Any persisted index over hints must iterate in exactly this order.
    pub fn cmp_priority(&self, other: &Self) -> std::cmp::Ordering {
        other
            .date
            .cmp(&self.date)
            .then_with(|| other.source_capacity.cmp(&self.source_capacity))
            .then_with(|| other.score_sign.cmp(&self.score_sign))
            .then_with(|| self.target.cmp(&other.target))
            .then_with(|| other.edition.cmp(&self.edition))
            .then_with(|| self.source.cmp(&other.source))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn id(b: &'static [u8]) -> IdentityId {
        IdentityId::from(bytes::Bytes::from_static(b))
    }

    fn hint(
        source: &'static [u8],
        target: &'static [u8],
        days: i64,
        capacity: u8,
        score: i32,
        edition: u64,
    ) -> Hint {
        Hint {
            source: id(source),
            target: id(target),
            date: DayStamp::from_days(days),
            source_capacity: capacity,
            score_sign: ScoreSign::from_score(score),
            edition,
        }
    }

    #[test]
    fn self_claims_are_rejected() {
        assert!(Hint::new(
            id(b"a"),
            id(b"a"),
            Timestamp::now(),
            50,
            1,
            0
        )
        .is_err());
    }

    #[test]
    fn capacity_bounds_are_enforced() {
        for capacity in [0, 101, u8::MAX] {
            assert!(Hint::new(
                id(b"a"),
                id(b"b"),
                Timestamp::now(),
                capacity,
                1,
                0
            )
            .is_err());
        }
        assert!(
            Hint::new(id(b"a"), id(b"b"), Timestamp::now(), 1, 1, 0).is_ok()
        );
        assert!(
            Hint::new(id(b"a"), id(b"b"), Timestamp::now(), 100, 1, 0)
                .is_ok()
        );
    }

    #[test]
    fn score_collapses_to_sign() {
        assert_eq!(ScoreSign::Negative, ScoreSign::from_score(i32::MIN));
        assert_eq!(ScoreSign::Negative, ScoreSign::from_score(-1));
        assert_eq!(ScoreSign::Positive, ScoreSign::from_score(0));
        assert_eq!(ScoreSign::Positive, ScoreSign::from_score(i32::MAX));
    }

    #[test]
    fn fresher_date_wins() {
        let old = hint(b"a", b"t", 10, 100, 1, 9);
        let fresh = hint(b"b", b"t", 11, 1, -1, 1);
        assert_eq!(
            std::cmp::Ordering::Less,
            fresh.cmp_priority(&old),
            "fresher date must beat capacity, sign and edition"
        );
    }

    #[test]
    fn capacity_breaks_date_ties() {
        // Same-day claims about the same target from two sources.
        let a = hint(b"a", b"t", 10, 40, 1, 5);
        let b = hint(b"b", b"t", 10, 60, 1, 3);
        assert_eq!(std::cmp::Ordering::Less, b.cmp_priority(&a));
    }

    #[test]
    fn positive_sign_breaks_capacity_ties() {
        let neg = hint(b"a", b"t", 10, 40, -1, 5);
        let pos = hint(b"b", b"t", 10, 40, 1, 3);
        assert_eq!(std::cmp::Ordering::Less, pos.cmp_priority(&neg));
    }

    #[test]
    fn newer_edition_wins_within_target() {
        let lo = hint(b"a", b"t", 10, 40, 1, 3);
        let hi = hint(b"b", b"t", 10, 40, 1, 7);
        assert_eq!(std::cmp::Ordering::Less, hi.cmp_priority(&lo));
    }

    #[test]
    fn cross_target_falls_back_to_target_id() {
        // Editions of unrelated targets are not compared; the target id
        // decides so the order stays total.
        let a = hint(b"s", b"t1", 10, 40, 1, 1);
        let b = hint(b"s", b"t2", 10, 40, 1, 99);
        assert_eq!(std::cmp::Ordering::Less, a.cmp_priority(&b));
        assert_eq!(std::cmp::Ordering::Greater, b.cmp_priority(&a));
    }

    #[test]
    fn order_is_total_and_antisymmetric() {
        let mut rng_hints = Vec::new();
        for s in 0..4u8 {
            for t in 4..8u8 {
                rng_hints.push(Hint {
                    source: IdentityId::from(bytes::Bytes::copy_from_slice(
                        &[s],
                    )),
                    target: IdentityId::from(bytes::Bytes::copy_from_slice(
                        &[t],
                    )),
                    date: DayStamp::from_days((s % 2) as i64),
                    source_capacity: 1 + t,
                    score_sign: ScoreSign::from_score(s as i32 - 2),
                    edition: (s + t) as u64,
                });
            }
        }
        for a in rng_hints.iter() {
            for b in rng_hints.iter() {
                let ab = a.cmp_priority(b);
                let ba = b.cmp_priority(a);
                assert_eq!(ab, ba.reverse());
                if a.key() == b.key() && a.edition == b.edition {
                    assert_eq!(std::cmp::Ordering::Equal, ab);
                } else {
                    assert_ne!(std::cmp::Ordering::Equal, ab);
                }
            }
        }
    }
}
