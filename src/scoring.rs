//! Scoring functions over pairs of bag-of-words vectors.
//!
//! Every function expects its inputs pre-normalized with the norm reported by
//! [`ScoringType::norm`]; [`crate::Vocabulary::transform`] applies that norm
//! automatically. All scores read higher-is-more-similar except KL
//! divergence, which is a distance (see [`ScoringType::higher_is_better`]).

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::bow::{BowVector, LNorm};

/// Substitute for `ln(0)` in the KL divergence: the log of the smallest
/// representable positive spacing.
const LOG_EPS: f64 = -52.0 * std::f64::consts::LN_2;

/// How word occurrences accumulate into bag-of-words values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightingType {
    /// Term frequency times inverse document frequency.
    TfIdf,
    /// Term frequency alone.
    Tf,
    /// Inverse document frequency alone.
    Idf,
    /// 1 if the word occurs, absent otherwise.
    Binary,
}

/// Similarity measure used to compare two bag-of-words vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoringType {
    /// `1 - 0.5 * ||v - w||_1` on L1-normalized vectors.
    L1,
    /// `1 - sqrt(1 - v . w)` on L2-normalized vectors.
    L2,
    /// Chi-square statistic on L1-normalized vectors.
    ChiSquare,
    /// Kullback-Leibler divergence; lower is more similar.
    Kl,
    /// Bhattacharyya coefficient on L1-normalized vectors.
    Bhattacharyya,
    /// Plain dot product; no normalization is applied.
    DotProduct,
}

impl ScoringType {
    /// Norm each vector must carry before this score is meaningful, or
    /// `None` when the score works on raw values.
    pub fn norm(self) -> Option<LNorm> {
        match self {
            ScoringType::L2 => Some(LNorm::L2),
            ScoringType::DotProduct => None,
            _ => Some(LNorm::L1),
        }
    }

    /// Whether vectors must be normalized before scoring.
    pub fn must_normalize(self) -> bool {
        self.norm().is_some()
    }

    /// Polarity of the score. Only KL reads lower-is-more-similar.
    pub fn higher_is_better(self) -> bool {
        !matches!(self, ScoringType::Kl)
    }

    /// Compare `v` and `w`, both already normalized per [`norm`](Self::norm).
    pub fn score(self, v: &BowVector, w: &BowVector) -> f64 {
        match self {
            ScoringType::L1 => score_l1(v, w),
            ScoringType::L2 => score_l2(v, w),
            ScoringType::ChiSquare => score_chi_square(v, w),
            ScoringType::Kl => score_kl(v, w),
            ScoringType::Bhattacharyya => score_bhattacharyya(v, w),
            ScoringType::DotProduct => score_dot(v, w),
        }
    }
}

/// Fold `f` over the words common to both vectors. Two cursors over the
/// sorted pair lists, `O(|v| + |w|)`.
fn fold_common(v: &BowVector, w: &BowVector, mut f: impl FnMut(f64, f64)) {
    let (a, b) = (v.entries(), w.entries());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                f(a[i].1, b[j].1);
                i += 1;
                j += 1;
            }
        }
    }
}

/// `|a - b| - |a| - |b|` collapses to `-2 min(a, b)` when the signs agree,
/// so summing it over common words is enough to recover the full L1
/// distance of unit-L1 vectors.
fn score_l1(v: &BowVector, w: &BowVector) -> f64 {
    let mut acc = 0.0;
    fold_common(v, w, |vi, wi| {
        acc += (vi - wi).abs() - vi.abs() - wi.abs();
    });
    -acc / 2.0
}

fn score_l2(v: &BowVector, w: &BowVector) -> f64 {
    let mut dot = 0.0;
    fold_common(v, w, |vi, wi| dot += vi * wi);
    if dot >= 1.0 {
        1.0
    } else {
        1.0 - (1.0 - dot).sqrt()
    }
}

fn score_chi_square(v: &BowVector, w: &BowVector) -> f64 {
    let mut acc = 0.0;
    fold_common(v, w, |vi, wi| {
        if vi + wi != 0.0 {
            acc += vi * wi / (vi + wi);
        }
    });
    (2.0 * acc).clamp(0.0, 1.0)
}

/// Words absent from `w` contribute as if `w` held the smallest positive
/// value, keeping the divergence finite.
fn score_kl(v: &BowVector, w: &BowVector) -> f64 {
    let mut acc = 0.0;
    for (word, vi) in v.iter() {
        if vi <= 0.0 {
            continue;
        }
        match w.get(word) {
            Some(wi) if wi > 0.0 => acc += vi * (vi / wi).ln(),
            _ => acc += vi * (vi.ln() - LOG_EPS),
        }
    }
    acc
}

fn score_bhattacharyya(v: &BowVector, w: &BowVector) -> f64 {
    let mut acc = 0.0;
    fold_common(v, w, |vi, wi| acc += (vi * wi).sqrt());
    acc
}

fn score_dot(v: &BowVector, w: &BowVector) -> f64 {
    let mut acc = 0.0;
    fold_common(v, w, |vi, wi| acc += vi * wi);
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn normalized(entries: &[(u32, f64)], norm: LNorm) -> BowVector {
        let mut v = BowVector::new();
        for &(w, x) in entries {
            v.add_weight(w, x);
        }
        v.normalize(norm);
        v
    }

    #[test]
    fn self_score_is_one_for_similarity_scorings() {
        let cases = [
            (ScoringType::L1, LNorm::L1),
            (ScoringType::L2, LNorm::L2),
            (ScoringType::Bhattacharyya, LNorm::L1),
        ];
        for (scoring, norm) in cases {
            let v = normalized(&[(0, 0.2), (3, 0.5), (9, 0.1)], norm);
            let s = scoring.score(&v, &v);
            assert!((s - 1.0).abs() < 1e-9, "{scoring:?} self-score was {s}");
        }
    }

    #[test]
    fn kl_self_score_is_zero() {
        let v = normalized(&[(1, 0.4), (2, 0.6)], LNorm::L1);
        assert!(ScoringType::Kl.score(&v, &v).abs() < 1e-12);
    }

    #[test]
    fn disjoint_vectors_share_nothing() {
        let v = normalized(&[(0, 1.0), (1, 1.0)], LNorm::L1);
        let w = normalized(&[(2, 1.0), (3, 1.0)], LNorm::L1);

        assert!(ScoringType::L1.score(&v, &w).abs() < 1e-12);
        assert!(ScoringType::Bhattacharyya.score(&v, &w).abs() < 1e-12);
        assert!(ScoringType::DotProduct.score(&v, &w).abs() < 1e-12);
        // nothing in common pushes the divergence to its epsilon ceiling
        assert!(ScoringType::Kl.score(&v, &w) > 1.0);
    }

    #[test]
    fn l1_matches_dense_reference() {
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..20 {
            let v = random_vector(&mut rng, 100);
            let w = random_vector(&mut rng, 100);

            let sparse = ScoringType::L1.score(&v, &w);
            let dense = dense_l1(&v, &w);
            assert!(
                (sparse - dense).abs() < 1e-9,
                "sparse {sparse} vs dense {dense}"
            );
        }
    }

    fn random_vector(rng: &mut StdRng, len: usize) -> BowVector {
        let mut v = BowVector::new();
        for _ in 0..len {
            v.add_weight(rng.gen_range(0..500u32), rng.gen_range(0.0..1.0f64));
        }
        v.normalize(LNorm::L1);
        v
    }

    // Reference: 1 - 0.5 * sum over the union of words.
    fn dense_l1(v: &BowVector, w: &BowVector) -> f64 {
        let mut dense_v = vec![0.0; 500];
        let mut dense_w = vec![0.0; 500];
        for (word, x) in v.iter() {
            dense_v[word as usize] = x;
        }
        for (word, x) in w.iter() {
            dense_w[word as usize] = x;
        }
        let diff: f64 = dense_v
            .iter()
            .zip(&dense_w)
            .map(|(a, b)| (a - b).abs())
            .sum();
        1.0 - 0.5 * diff
    }

    #[test]
    fn chi_square_is_clamped_to_unit_interval() {
        let v = normalized(&[(0, 0.5), (1, 0.5)], LNorm::L1);
        let w = normalized(&[(0, 0.5), (1, 0.5)], LNorm::L1);
        let s = ScoringType::ChiSquare.score(&v, &w);
        assert!((0.0..=1.0).contains(&s));
    }

    #[test]
    fn required_norms() {
        assert_eq!(ScoringType::L1.norm(), Some(LNorm::L1));
        assert_eq!(ScoringType::L2.norm(), Some(LNorm::L2));
        assert_eq!(ScoringType::DotProduct.norm(), None);
        assert!(!ScoringType::DotProduct.must_normalize());
        assert!(!ScoringType::Kl.higher_is_better());
    }
}
