//! Sorted Set Container
//!
//! A score-ordered set of unique byte-string members. The representation is
//! the classic pairing of an unordered member map (O(1) score lookup) with
//! an ordered view (sorted enumeration):
//!
//! ```text
//! members:  HashMap<member, score>
//! ordered:  BTreeSet<(Score, member)>
//! ```
//!
//! Every mutation goes through `upsert`/`take` so the two views can never
//! disagree. Scores are 64-bit floats including ±∞; equal scores order
//! members lexicographically, and that tie-break is structural — the
//! ordered view's tuple ordering is (score, member) — so every enumerator
//! observes the same total order.

use bytes::Bytes;
use rand::seq::IteratorRandom;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Total-ordered wrapper for f64 scores.
///
/// `f64` itself is only partially ordered (NaN); scores are never NaN, so
/// `total_cmp` gives the ordering the ordered view needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score(pub f64);

impl Eq for Score {}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Per-call behavior flags for [`SortedSet::add`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AddFlags {
    /// Only add members that do not exist yet.
    pub nx: bool,
    /// Only update members that already exist.
    pub xx: bool,
    /// Only update when the new score is strictly greater.
    pub gt: bool,
    /// Only update when the new score is strictly less.
    pub lt: bool,
    /// Count updated members in the reply, not just insertions.
    pub ch: bool,
    /// Treat the score as a delta; requires exactly one member.
    pub incr: bool,
}

/// Outcome of [`SortedSet::add`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Added {
    /// Number of insertions (plus updates under CH).
    Count(i64),
    /// New score under INCR; `None` when NX/XX/GT/LT suppressed the update.
    Score(Option<f64>),
}

/// The INCR arithmetic produced NaN (inf + -inf).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NanScore;

/// How member scores combine across sources in set algebra.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Min,
    Max,
}

impl Aggregate {
    pub fn parse(raw: &[u8]) -> Option<Self> {
        match raw.to_ascii_uppercase().as_slice() {
            b"SUM" => Some(Aggregate::Sum),
            b"MIN" => Some(Aggregate::Min),
            b"MAX" => Some(Aggregate::Max),
            _ => None,
        }
    }

    fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            Aggregate::Sum => {
                // inf + -inf would be NaN; the additive identity wins.
                if a.is_infinite() && b.is_infinite() && a.is_sign_positive() != b.is_sign_positive()
                {
                    0.0
                } else {
                    a + b
                }
            }
            Aggregate::Min => a.min(b),
            Aggregate::Max => a.max(b),
        }
    }
}

/// Weight application; 0 × ∞ collapses to 0 instead of NaN.
fn weighted(score: f64, weight: f64) -> f64 {
    let w = score * weight;
    if w.is_nan() {
        0.0
    } else {
        w
    }
}

/// A lexicographic range endpoint: `-`, `+`, `[member`, or `(member`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexBound {
    Min,
    Max,
    Inclusive(Bytes),
    Exclusive(Bytes),
}

impl LexBound {
    pub fn parse(raw: &[u8]) -> Option<Self> {
        match raw {
            b"-" => Some(LexBound::Min),
            b"+" => Some(LexBound::Max),
            _ => match raw.first()? {
                b'[' => Some(LexBound::Inclusive(Bytes::copy_from_slice(&raw[1..]))),
                b'(' => Some(LexBound::Exclusive(Bytes::copy_from_slice(&raw[1..]))),
                _ => None,
            },
        }
    }

    fn admits_from_below(&self, member: &[u8]) -> bool {
        match self {
            LexBound::Min => true,
            LexBound::Max => false,
            LexBound::Inclusive(b) => member >= b.as_ref(),
            LexBound::Exclusive(b) => member > b.as_ref(),
        }
    }

    fn admits_from_above(&self, member: &[u8]) -> bool {
        match self {
            LexBound::Min => false,
            LexBound::Max => true,
            LexBound::Inclusive(b) => member <= b.as_ref(),
            LexBound::Exclusive(b) => member < b.as_ref(),
        }
    }
}

/// An offset/count window over a selected range. `count < 0` = unlimited.
#[derive(Debug, Clone, Copy)]
pub struct Limit {
    pub offset: usize,
    pub count: i64,
}

impl Limit {
    pub fn all() -> Self {
        Self {
            offset: 0,
            count: -1,
        }
    }

    fn apply<I: Iterator<Item = (Bytes, f64)>>(self, iter: I) -> Vec<(Bytes, f64)> {
        let iter = iter.skip(self.offset);
        if self.count < 0 {
            iter.collect()
        } else {
            iter.take(self.count as usize).collect()
        }
    }
}

/// A score-ordered set of unique byte-string members.
#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    members: HashMap<Bytes, f64>,
    ordered: BTreeSet<(Score, Bytes)>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.members.get(member).copied()
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.members.contains_key(member)
    }

    /// Inserts or updates one member, keeping both views consistent.
    /// Returns true when the member was newly inserted.
    pub fn upsert(&mut self, member: Bytes, score: f64) -> bool {
        match self.members.insert(member.clone(), score) {
            Some(old) => {
                self.ordered.remove(&(Score(old), member.clone()));
                self.ordered.insert((Score(score), member));
                false
            }
            None => {
                self.ordered.insert((Score(score), member));
                true
            }
        }
    }

    /// Removes one member, returning its score.
    pub fn take(&mut self, member: &[u8]) -> Option<f64> {
        let score = self.members.remove(member)?;
        self.ordered
            .remove(&(Score(score), Bytes::copy_from_slice(member)));
        Some(score)
    }

    /// Applies a batch of (member, score) pairs under the given flags.
    ///
    /// Under INCR the single pair's score is a delta and the new score is
    /// returned (`None` when a conditional flag suppressed the update).
    /// Otherwise the reply counts insertions, plus score changes when CH
    /// is set.
    pub fn add(&mut self, pairs: Vec<(Bytes, f64)>, flags: AddFlags) -> Result<Added, NanScore> {
        if flags.incr {
            // Caller validates arity; the first pair is the only one.
            let Some((member, delta)) = pairs.into_iter().next() else {
                return Ok(Added::Score(None));
            };
            let existing = self.score(&member);

            if flags.nx && existing.is_some() {
                return Ok(Added::Score(None));
            }
            if flags.xx && existing.is_none() {
                return Ok(Added::Score(None));
            }

            let new = existing.unwrap_or(0.0) + delta;
            if new.is_nan() {
                return Err(NanScore);
            }
            if let Some(old) = existing {
                if (flags.gt && new <= old) || (flags.lt && new >= old) {
                    return Ok(Added::Score(None));
                }
            }
            self.upsert(member, new);
            return Ok(Added::Score(Some(new)));
        }

        let mut added = 0i64;
        let mut changed = 0i64;
        for (member, score) in pairs {
            match self.score(&member) {
                Some(old) => {
                    if flags.nx
                        || (flags.gt && score <= old)
                        || (flags.lt && score >= old)
                        || score == old
                    {
                        continue;
                    }
                    self.upsert(member, score);
                    changed += 1;
                }
                None => {
                    if flags.xx {
                        continue;
                    }
                    self.upsert(member, score);
                    added += 1;
                }
            }
        }
        Ok(Added::Count(added + if flags.ch { changed } else { 0 }))
    }

    /// Ascending-score position of a member, with its score.
    /// `rev` counts from the highest score instead.
    pub fn rank(&self, member: &[u8], rev: bool) -> Option<(usize, f64)> {
        let score = self.score(member)?;
        let position = self
            .ordered
            .iter()
            .position(|(_, m)| m.as_ref() == member)?;
        let rank = if rev {
            self.len() - 1 - position
        } else {
            position
        };
        Some((rank, score))
    }

    pub fn iter_asc(&self) -> impl Iterator<Item = (Bytes, f64)> + '_ {
        self.ordered.iter().map(|(s, m)| (m.clone(), s.0))
    }

    pub fn iter_desc(&self) -> impl Iterator<Item = (Bytes, f64)> + '_ {
        self.ordered.iter().rev().map(|(s, m)| (m.clone(), s.0))
    }

    /// Rank-addressed range; negative indices address from the tail and
    /// the window is clamped. Empty when start > stop after normalization.
    pub fn range_by_rank(&self, start: i64, stop: i64, rev: bool) -> Vec<(Bytes, f64)> {
        let len = self.len() as i64;
        let mut start = if start < 0 { len + start } else { start };
        let mut stop = if stop < 0 { len + stop } else { stop };
        if start < 0 {
            start = 0;
        }
        if stop >= len {
            stop = len - 1;
        }
        if start > stop || start >= len || stop < 0 {
            return Vec::new();
        }

        let window = (stop - start + 1) as usize;
        if rev {
            self.iter_desc().skip(start as usize).take(window).collect()
        } else {
            self.iter_asc().skip(start as usize).take(window).collect()
        }
    }

    /// Inclusive score-bounded range in ascending order, or descending
    /// under `rev` (bounds are still min ≤ max).
    pub fn range_by_score(&self, min: f64, max: f64, rev: bool, limit: Limit) -> Vec<(Bytes, f64)> {
        if rev {
            limit.apply(self.iter_desc().skip_while(move |(_, s)| *s > max).take_while(move |(_, s)| *s >= min))
        } else {
            limit.apply(self.iter_asc().skip_while(move |(_, s)| *s < min).take_while(move |(_, s)| *s <= max))
        }
    }

    /// The common score when every member shares one, `None` otherwise.
    pub fn uniform_score(&self) -> Option<f64> {
        let mut scores = self.members.values();
        let first = *scores.next()?;
        scores.all(|s| *s == first).then_some(first)
    }

    /// Lexicographic range; defined only over uniform-score sets, empty
    /// otherwise.
    pub fn range_by_lex(
        &self,
        min: &LexBound,
        max: &LexBound,
        rev: bool,
        limit: Limit,
    ) -> Vec<(Bytes, f64)> {
        if !self.is_empty() && self.uniform_score().is_none() {
            return Vec::new();
        }

        let selected = self
            .iter_asc()
            .filter(|(m, _)| min.admits_from_below(m) && max.admits_from_above(m));
        if rev {
            let mut all: Vec<_> = selected.collect();
            all.reverse();
            limit.apply(all.into_iter())
        } else {
            limit.apply(selected)
        }
    }

    /// Removes and returns up to `count` members with the lowest scores.
    pub fn pop_min(&mut self, count: usize) -> Vec<(Bytes, f64)> {
        let victims: Vec<_> = self.iter_asc().take(count).collect();
        for (member, _) in &victims {
            self.take(member);
        }
        victims
    }

    /// Removes and returns up to `count` members with the highest scores.
    pub fn pop_max(&mut self, count: usize) -> Vec<(Bytes, f64)> {
        let victims: Vec<_> = self.iter_desc().take(count).collect();
        for (member, _) in &victims {
            self.take(member);
        }
        victims
    }

    /// Random members: positive count samples without replacement (capped
    /// at the cardinality), negative samples with replacement, zero yields
    /// nothing.
    pub fn random_members(&self, count: i64) -> Vec<(Bytes, f64)> {
        let mut rng = rand::thread_rng();
        match count.cmp(&0) {
            Ordering::Equal => Vec::new(),
            Ordering::Greater => self
                .members
                .iter()
                .choose_multiple(&mut rng, count as usize)
                .into_iter()
                .map(|(m, s)| (m.clone(), *s))
                .collect(),
            Ordering::Less => {
                if self.is_empty() {
                    return Vec::new();
                }
                let pool: Vec<_> = self.members.iter().collect();
                (0..count.unsigned_abs() as usize)
                    .map(|_| {
                        let (m, s) = pool[rng.gen_range(0..pool.len())];
                        (m.clone(), *s)
                    })
                    .collect()
            }
        }
    }

    /// Rank-addressed deletion. `None` when the normalized window falls
    /// outside the set (the caller reports indices out of bounds).
    pub fn remove_range_by_rank(&mut self, start: i64, stop: i64) -> Option<usize> {
        let len = self.len() as i64;
        let start = if start < 0 { len + start } else { start };
        let stop = if stop < 0 { len + stop } else { stop };
        if start < 0 || stop >= len || start > stop {
            return None;
        }

        let victims: Vec<_> = self
            .iter_asc()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .collect();
        for (member, _) in &victims {
            self.take(member);
        }
        Some(victims.len())
    }

    pub fn remove_range_by_score(&mut self, min: f64, max: f64) -> usize {
        let victims = self.range_by_score(min, max, false, Limit::all());
        for (member, _) in &victims {
            self.take(member);
        }
        victims.len()
    }

    /// Lex-addressed deletion; removes nothing unless scores are uniform.
    pub fn remove_range_by_lex(&mut self, min: &LexBound, max: &LexBound) -> usize {
        let victims = self.range_by_lex(min, max, false, Limit::all());
        for (member, _) in &victims {
            self.take(member);
        }
        victims.len()
    }

    /// Estimated retained bytes: member bytes counted twice (member map +
    /// ordered view), plus score and bookkeeping per member.
    pub fn mem_usage(&self) -> usize {
        self.members
            .keys()
            .map(|m| m.len() * 2 + 8 + 16)
            .sum()
    }
}

/// Union over weighted sources; a member's weighted scores combine under
/// the aggregator.
pub fn union_of(sources: &[(&SortedSet, f64)], agg: Aggregate) -> SortedSet {
    let mut out = SortedSet::new();
    for (set, weight) in sources {
        for (member, score) in set.iter_asc() {
            let w = weighted(score, *weight);
            let combined = match out.score(&member) {
                Some(existing) => agg.combine(existing, w),
                None => w,
            };
            out.upsert(member, combined);
        }
    }
    out
}

/// Intersection over weighted sources; members must appear in every source.
pub fn inter_of(sources: &[(&SortedSet, f64)], agg: Aggregate) -> SortedSet {
    let mut out = SortedSet::new();
    let Some(((first, first_weight), rest)) = sources.split_first() else {
        return out;
    };

    'members: for (member, score) in first.iter_asc() {
        let mut combined = weighted(score, *first_weight);
        for (other, weight) in rest {
            match other.score(&member) {
                Some(s) => combined = agg.combine(combined, weighted(s, *weight)),
                None => continue 'members,
            }
        }
        out.upsert(member, combined);
    }
    out
}

/// Asymmetric difference: members of the first source absent from all the
/// rest, carrying their weighted first-source scores.
pub fn diff_of(first: (&SortedSet, f64), rest: &[&SortedSet]) -> SortedSet {
    let mut out = SortedSet::new();
    let (set, weight) = first;
    for (member, score) in set.iter_asc() {
        if rest.iter().any(|other| other.contains(&member)) {
            continue;
        }
        out.upsert(member, weighted(score, weight));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zset(pairs: &[(&str, f64)]) -> SortedSet {
        let mut z = SortedSet::new();
        for (m, s) in pairs {
            z.upsert(Bytes::from(m.to_string()), *s);
        }
        z
    }

    fn names(range: &[(Bytes, f64)]) -> Vec<&str> {
        range
            .iter()
            .map(|(m, _)| std::str::from_utf8(m).unwrap())
            .collect()
    }

    #[test]
    fn test_views_stay_consistent() {
        let mut z = SortedSet::new();
        assert!(z.upsert(Bytes::from("a"), 1.0));
        assert!(!z.upsert(Bytes::from("a"), 5.0));
        assert_eq!(z.len(), 1);
        assert_eq!(z.score(b"a"), Some(5.0));
        assert_eq!(z.iter_asc().count(), 1);

        z.take(b"a");
        assert!(z.is_empty());
        assert_eq!(z.iter_asc().count(), 0);
    }

    #[test]
    fn test_lex_tie_break_is_total_order() {
        let z = zset(&[("delta", 1.0), ("alpha", 1.0), ("charlie", 1.0), ("bravo", 2.0)]);
        assert_eq!(
            names(&z.iter_asc().collect::<Vec<_>>()),
            vec!["alpha", "charlie", "delta", "bravo"]
        );
    }

    #[test]
    fn test_infinite_scores_order() {
        let z = zset(&[("low", f64::NEG_INFINITY), ("mid", 0.0), ("high", f64::INFINITY)]);
        assert_eq!(
            names(&z.iter_asc().collect::<Vec<_>>()),
            vec!["low", "mid", "high"]
        );
    }

    #[test]
    fn test_add_nx_xx() {
        let mut z = zset(&[("a", 1.0)]);

        let nx = AddFlags {
            nx: true,
            ..Default::default()
        };
        let out = z
            .add(vec![(Bytes::from("a"), 9.0), (Bytes::from("b"), 2.0)], nx)
            .unwrap();
        assert_eq!(out, Added::Count(1));
        assert_eq!(z.score(b"a"), Some(1.0));

        let xx = AddFlags {
            xx: true,
            ..Default::default()
        };
        let out = z
            .add(vec![(Bytes::from("a"), 9.0), (Bytes::from("c"), 3.0)], xx)
            .unwrap();
        assert_eq!(out, Added::Count(0));
        assert_eq!(z.score(b"a"), Some(9.0));
        assert!(!z.contains(b"c"));
    }

    #[test]
    fn test_add_gt_lt_and_ch() {
        let mut z = zset(&[("b", 2.0)]);

        let gt_ch = AddFlags {
            gt: true,
            ch: true,
            ..Default::default()
        };
        // Not greater: suppressed.
        let out = z.add(vec![(Bytes::from("b"), 0.0)], gt_ch).unwrap();
        assert_eq!(out, Added::Count(0));
        assert_eq!(z.score(b"b"), Some(2.0));

        // Greater: applied and counted as a change.
        let out = z.add(vec![(Bytes::from("b"), 5.0)], gt_ch).unwrap();
        assert_eq!(out, Added::Count(1));
        assert_eq!(z.score(b"b"), Some(5.0));

        let lt = AddFlags {
            lt: true,
            ..Default::default()
        };
        let out = z.add(vec![(Bytes::from("b"), 1.0)], lt).unwrap();
        // Applied, but without CH updates do not count.
        assert_eq!(out, Added::Count(0));
        assert_eq!(z.score(b"b"), Some(1.0));
    }

    #[test]
    fn test_add_incr() {
        let mut z = SortedSet::new();
        let incr = AddFlags {
            incr: true,
            ..Default::default()
        };
        let out = z.add(vec![(Bytes::from("a"), 2.5)], incr).unwrap();
        assert_eq!(out, Added::Score(Some(2.5)));
        let out = z.add(vec![(Bytes::from("a"), 1.5)], incr).unwrap();
        assert_eq!(out, Added::Score(Some(4.0)));

        let incr_xx = AddFlags {
            incr: true,
            xx: true,
            ..Default::default()
        };
        let out = z.add(vec![(Bytes::from("nope"), 1.0)], incr_xx).unwrap();
        assert_eq!(out, Added::Score(None));
    }

    #[test]
    fn test_add_incr_nan_rejected() {
        let mut z = zset(&[("a", f64::INFINITY)]);
        let incr = AddFlags {
            incr: true,
            ..Default::default()
        };
        assert_eq!(
            z.add(vec![(Bytes::from("a"), f64::NEG_INFINITY)], incr),
            Err(NanScore)
        );
    }

    #[test]
    fn test_rank_and_revrank() {
        let z = zset(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert_eq!(z.rank(b"a", false), Some((0, 1.0)));
        assert_eq!(z.rank(b"c", false), Some((2, 3.0)));
        assert_eq!(z.rank(b"a", true), Some((2, 1.0)));
        assert_eq!(z.rank(b"missing", false), None);
    }

    #[test]
    fn test_range_by_rank() {
        let z = zset(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert_eq!(names(&z.range_by_rank(0, -1, false)), vec!["a", "b", "c"]);
        assert_eq!(names(&z.range_by_rank(1, 2, false)), vec!["b", "c"]);
        assert_eq!(names(&z.range_by_rank(0, 0, true)), vec!["c"]);
        assert!(z.range_by_rank(2, 1, false).is_empty());
        assert!(z.range_by_rank(5, 9, false).is_empty());
    }

    #[test]
    fn test_range_by_score() {
        let z = zset(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert_eq!(
            names(&z.range_by_score(2.0, f64::INFINITY, false, Limit::all())),
            vec!["b", "c"]
        );
        assert_eq!(
            names(&z.range_by_score(f64::NEG_INFINITY, f64::INFINITY, true, Limit::all())),
            vec!["c", "b", "a"]
        );
        assert_eq!(
            names(&z.range_by_score(1.0, 3.0, false, Limit { offset: 1, count: 1 })),
            vec!["b"]
        );
    }

    #[test]
    fn test_range_by_lex() {
        let z = zset(&[("a", 0.0), ("b", 0.0), ("c", 0.0), ("d", 0.0)]);
        assert_eq!(
            names(&z.range_by_lex(&LexBound::Min, &LexBound::Max, false, Limit::all())),
            vec!["a", "b", "c", "d"]
        );
        assert_eq!(
            names(&z.range_by_lex(
                &LexBound::Inclusive(Bytes::from("b")),
                &LexBound::Exclusive(Bytes::from("d")),
                false,
                Limit::all()
            )),
            vec!["b", "c"]
        );
        assert_eq!(
            names(&z.range_by_lex(&LexBound::Min, &LexBound::Max, true, Limit::all())),
            vec!["d", "c", "b", "a"]
        );
    }

    #[test]
    fn test_lex_requires_uniform_score() {
        let z = zset(&[("a", 0.0), ("b", 1.0)]);
        assert!(z
            .range_by_lex(&LexBound::Min, &LexBound::Max, false, Limit::all())
            .is_empty());

        let mut z = zset(&[("a", 0.0), ("b", 1.0)]);
        assert_eq!(z.remove_range_by_lex(&LexBound::Min, &LexBound::Max), 0);
        assert_eq!(z.len(), 2);
    }

    #[test]
    fn test_pop_ties_by_lex() {
        let mut z = zset(&[("b", 1.0), ("a", 1.0), ("c", 2.0)]);
        let popped = z.pop_min(2);
        assert_eq!(names(&popped), vec!["a", "b"]);
        assert_eq!(z.len(), 1);

        let mut z = zset(&[("b", 1.0), ("a", 1.0)]);
        let popped = z.pop_max(1);
        assert_eq!(names(&popped), vec!["b"]);
    }

    #[test]
    fn test_random_members_counts() {
        let z = zset(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert!(z.random_members(0).is_empty());
        assert_eq!(z.random_members(2).len(), 2);
        // Without replacement: capped at cardinality, all distinct.
        let all = z.random_members(10);
        assert_eq!(all.len(), 3);
        // With replacement: exactly |count| picks.
        assert_eq!(z.random_members(-7).len(), 7);
    }

    #[test]
    fn test_remove_range_by_rank_bounds() {
        let mut z = zset(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert_eq!(z.remove_range_by_rank(0, 1), Some(2));
        assert_eq!(z.len(), 1);

        let mut z = zset(&[("a", 1.0)]);
        assert_eq!(z.remove_range_by_rank(5, 9), None);
        assert_eq!(z.remove_range_by_rank(0, 3), None);
        assert_eq!(z.len(), 1);
    }

    #[test]
    fn test_remove_range_by_score() {
        let mut z = zset(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert_eq!(z.remove_range_by_score(2.0, 3.0), 2);
        assert_eq!(names(&z.iter_asc().collect::<Vec<_>>()), vec!["a"]);
    }

    #[test]
    fn test_union_idempotence_doubles_scores() {
        let a = zset(&[("x", 1.0), ("y", 2.0)]);
        let u = union_of(&[(&a, 1.0), (&a, 1.0)], Aggregate::Sum);
        assert_eq!(u.score(b"x"), Some(2.0));
        assert_eq!(u.score(b"y"), Some(4.0));
    }

    #[test]
    fn test_inter_self_doubles_and_diff_self_empty() {
        let a = zset(&[("x", 1.0), ("y", 2.0)]);
        let i = inter_of(&[(&a, 1.0), (&a, 1.0)], Aggregate::Sum);
        assert_eq!(i.score(b"x"), Some(2.0));
        assert_eq!(i.len(), 2);

        let d = diff_of((&a, 1.0), &[&a]);
        assert!(d.is_empty());
    }

    #[test]
    fn test_algebra_weights_and_aggregates() {
        let a = zset(&[("x", 1.0), ("y", 4.0)]);
        let b = zset(&[("y", 10.0), ("z", 3.0)]);

        let u = union_of(&[(&a, 2.0), (&b, 1.0)], Aggregate::Min);
        assert_eq!(u.score(b"x"), Some(2.0));
        assert_eq!(u.score(b"y"), Some(8.0));
        assert_eq!(u.score(b"z"), Some(3.0));

        let i = inter_of(&[(&a, 1.0), (&b, 1.0)], Aggregate::Max);
        assert_eq!(i.len(), 1);
        assert_eq!(i.score(b"y"), Some(10.0));

        let d = diff_of((&a, 1.0), &[&b]);
        assert_eq!(d.len(), 1);
        assert_eq!(d.score(b"x"), Some(1.0));
    }

    #[test]
    fn test_cardinality_invariant_under_mutation() {
        let mut z = SortedSet::new();
        for i in 0..100 {
            z.upsert(Bytes::from(format!("m{}", i % 10)), i as f64);
        }
        assert_eq!(z.len(), 10);
        assert_eq!(z.iter_asc().count(), 10);

        for i in 0..5 {
            z.take(format!("m{}", i).as_bytes());
        }
        assert_eq!(z.len(), 5);
        assert_eq!(z.iter_asc().count(), 5);
    }
}
