//! Staffing vectors and staffing boxes.
//!
//! A staffing vector fixes one agent count per pool; a staffing box is the
//! Cartesian product of per-pool `[lower, upper]` ranges that one trajectory
//! still represents. Malformed caller input (length mismatch, inverted
//! bounds) is rejected at construction, never truncated or padded.

use crate::error::{SimError, SimResult};
use crate::types::PoolIndex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered staffing levels, one per agent pool. Doubles as the statistics
/// map key; equality and ordering are structural (lexicographic).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StaffingVector(Vec<u32>);

impl StaffingVector {
    pub fn new(levels: Vec<u32>) -> Self {
        Self(levels)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn level(&self, pool: PoolIndex) -> u32 {
        self.0[pool]
    }

    pub fn levels(&self) -> &[u32] {
        &self.0
    }

    pub fn set_level(&mut self, pool: PoolIndex, level: u32) {
        self.0[pool] = level;
    }

    /// Copy with one pool's level replaced.
    pub fn with_level(&self, pool: PoolIndex, level: u32) -> Self {
        let mut v = self.clone();
        v.0[pool] = level;
        v
    }

    pub fn into_levels(self) -> Vec<u32> {
        self.0
    }
}

impl fmt::Display for StaffingVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Per-pool `[lower, upper]` staffing ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffingBox {
    lower: StaffingVector,
    upper: StaffingVector,
}

impl StaffingBox {
    /// Build a box, rejecting mismatched lengths and inverted bounds.
    pub fn new(lower: StaffingVector, upper: StaffingVector) -> SimResult<Self> {
        if lower.len() != upper.len() {
            return Err(SimError::StaffingLengthMismatch {
                expected: lower.len(),
                actual: upper.len(),
            });
        }
        for pool in 0..lower.len() {
            if lower.level(pool) > upper.level(pool) {
                return Err(SimError::BoundsInverted {
                    pool,
                    lower: lower.level(pool),
                    upper: upper.level(pool),
                });
            }
        }
        Ok(Self { lower, upper })
    }

    /// A degenerate box pinning every pool to one vector.
    pub fn pinned(vector: StaffingVector) -> Self {
        Self {
            lower: vector.clone(),
            upper: vector,
        }
    }

    pub fn check_pools(&self, num_pools: usize) -> SimResult<()> {
        if self.lower.len() != num_pools {
            return Err(SimError::StaffingLengthMismatch {
                expected: num_pools,
                actual: self.lower.len(),
            });
        }
        Ok(())
    }

    pub fn num_pools(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> &StaffingVector {
        &self.lower
    }

    pub fn upper(&self) -> &StaffingVector {
        &self.upper
    }

    pub fn width(&self, pool: PoolIndex) -> u32 {
        self.upper.level(pool) - self.lower.level(pool)
    }

    /// Pools whose range is still open (`lower < upper`).
    pub fn num_open(&self) -> usize {
        (0..self.num_pools()).filter(|&p| self.width(p) > 0).count()
    }

    pub fn is_pinned(&self) -> bool {
        self.num_open() == 0
    }

    /// Raise `lower[pool]` to at least `level`. Callers guarantee the box
    /// stays well-formed.
    pub fn raise_lower(&mut self, pool: PoolIndex, level: u32) {
        if level > self.lower.level(pool) {
            debug_assert!(level <= self.upper.level(pool));
            self.lower.set_level(pool, level);
        }
    }

    /// Cut `upper[pool]` down to at most `level`.
    pub fn cut_upper(&mut self, pool: PoolIndex, level: u32) {
        if level < self.upper.level(pool) {
            debug_assert!(level >= self.lower.level(pool));
            self.upper.set_level(pool, level);
        }
    }

    /// Collapse one pool's range to its lower bound.
    pub fn pin_to_lower(&mut self, pool: PoolIndex) {
        let lo = self.lower.level(pool);
        self.upper.set_level(pool, lo);
    }

    pub fn contains(&self, v: &StaffingVector) -> bool {
        v.len() == self.num_pools()
            && (0..self.num_pools())
                .all(|p| self.lower.level(p) <= v.level(p) && v.level(p) <= self.upper.level(p))
    }

    /// Widest enclosing box of `self` and `other`.
    pub fn union(&self, other: &Self) -> Self {
        debug_assert_eq!(self.num_pools(), other.num_pools());
        let lower = StaffingVector::new(
            (0..self.num_pools())
                .map(|p| self.lower.level(p).min(other.lower.level(p)))
                .collect(),
        );
        let upper = StaffingVector::new(
            (0..self.num_pools())
                .map(|p| self.upper.level(p).max(other.upper.level(p)))
                .collect(),
        );
        Self { lower, upper }
    }

    /// Number of staffing vectors in the box lattice: ∏(widthᵢ + 1).
    pub fn num_vectors(&self) -> u64 {
        (0..self.num_pools())
            .map(|p| self.width(p) as u64 + 1)
            .product()
    }

    /// Enumerate every staffing vector in the box, lexicographically.
    pub fn vectors(&self) -> Vec<StaffingVector> {
        let np = self.num_pools();
        let mut out = Vec::with_capacity(self.num_vectors() as usize);
        let mut cur: Vec<u32> = self.lower.levels().to_vec();
        loop {
            out.push(StaffingVector::new(cur.clone()));
            // odometer increment from the last pool
            let mut p = np;
            loop {
                if p == 0 {
                    return out;
                }
                p -= 1;
                if cur[p] < self.upper.level(p) {
                    cur[p] += 1;
                    for q in p + 1..np {
                        cur[q] = self.lower.level(q);
                    }
                    break;
                }
            }
        }
    }
}

/// The one-sided finite-difference family inside `bounds`: the base vector
/// plus every vector differing from it in a single pool, restricted to what
/// the box actually covers.
pub fn axis_vectors(bounds: &StaffingBox, base: &StaffingVector) -> Vec<StaffingVector> {
    let mut out = Vec::new();
    if bounds.contains(base) {
        out.push(base.clone());
    }
    for pool in 0..bounds.num_pools() {
        for level in bounds.lower().level(pool)..=bounds.upper().level(pool) {
            if level == base.level(pool) {
                continue;
            }
            let v = base.with_level(pool, level);
            if bounds.contains(&v) {
                out.push(v);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(lower: Vec<u32>, upper: Vec<u32>) -> StaffingBox {
        StaffingBox::new(StaffingVector::new(lower), StaffingVector::new(upper)).unwrap()
    }

    #[test]
    fn rejects_length_mismatch() {
        let r = StaffingBox::new(
            StaffingVector::new(vec![1, 2]),
            StaffingVector::new(vec![1, 2, 3]),
        );
        assert!(matches!(r, Err(SimError::StaffingLengthMismatch { .. })));
    }

    #[test]
    fn rejects_inverted_bounds() {
        let r = StaffingBox::new(
            StaffingVector::new(vec![5, 2]),
            StaffingVector::new(vec![4, 2]),
        );
        assert!(matches!(r, Err(SimError::BoundsInverted { pool: 0, .. })));
    }

    #[test]
    fn lattice_enumeration_is_complete_and_lexicographic() {
        let b = boxed(vec![1, 0], vec![2, 1]);
        let vs = b.vectors();
        assert_eq!(vs.len() as u64, b.num_vectors());
        let expect: Vec<Vec<u32>> = vec![vec![1, 0], vec![1, 1], vec![2, 0], vec![2, 1]];
        let got: Vec<Vec<u32>> = vs.into_iter().map(StaffingVector::into_levels).collect();
        assert_eq!(got, expect);
    }

    #[test]
    fn union_is_the_enclosing_box() {
        let a = boxed(vec![2, 3], vec![4, 3]);
        let b = boxed(vec![3, 1], vec![3, 5]);
        let u = a.union(&b);
        assert_eq!(u.lower().levels(), &[2, 1]);
        assert_eq!(u.upper().levels(), &[4, 5]);
    }

    #[test]
    fn axis_vectors_stay_inside_the_box() {
        let b = boxed(vec![2, 3], vec![4, 5]);
        let base = StaffingVector::new(vec![2, 3]);
        let axis = axis_vectors(&b, &base);
        // base + 2 steps in pool 0 + 2 steps in pool 1
        assert_eq!(axis.len(), 5);
        assert!(axis.iter().all(|v| b.contains(v)));
        let multi = StaffingVector::new(vec![3, 4]);
        assert!(!axis.contains(&multi), "diagonal vectors are not axis moves");
    }
}
