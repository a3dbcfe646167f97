//! Offline name match scoring
//!
//! Ordinal similarity tiers used for ranking candidate names when the
//! database's trigram/full-text ranking is not available (client-side
//! fallback and admin dedupe hints). Scores are rank ordering only, not
//! probabilities.

use std::collections::HashSet;

use crate::normalize::normalize;

/// Score a candidate name against a query on a fixed ordinal scale.
///
/// - normalized forms equal: 100
/// - candidate starts with query: 80
/// - candidate contains query: 65
/// - otherwise: Dice bigram overlap scaled into 0..=60
///
/// Either input normalizing to empty scores 0.
pub fn score_name_match(query: &str, candidate: &str) -> u32 {
    let q = normalize(query);
    let c = normalize(candidate);
    if q.is_empty() || c.is_empty() {
        return 0;
    }
    if q == c {
        return 100;
    }
    if c.starts_with(&q) {
        return 80;
    }
    if c.contains(&q) {
        return 65;
    }
    (dice_coefficient(&q, &c) * 60.0).round() as u32
}

/// 2-character windows of the padded string. The leading/trailing padding
/// space makes word boundaries count as shared context.
fn bigram_set(normalized: &str) -> HashSet<[u8; 2]> {
    let padded = format!(" {} ", normalized);
    let bytes = padded.as_bytes();
    let mut set = HashSet::new();
    for window in bytes.windows(2) {
        set.insert([window[0], window[1]]);
    }
    set
}

/// Dice coefficient over padded bigram sets: `2·|A∩B| / (|A|+|B|)`.
fn dice_coefficient(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let set_a = bigram_set(a);
    let set_b = bigram_set(b);
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    (2 * intersection) as f64 / (set_a.len() + set_b.len()) as f64
}

/// A candidate name for ranking. The normalized field is preferred when
/// present; rows straight from user input may only carry the original.
pub trait NamedCandidate {
    fn name_normalized(&self) -> Option<&str>;
    fn name_original(&self) -> Option<&str>;
}

/// Rank candidates descending by match score against `query`.
///
/// The sort is stable: candidates with equal scores keep their original
/// relative order, so identical inputs always rank identically.
pub fn rank_candidates<C: NamedCandidate>(query: &str, candidates: Vec<C>) -> Vec<(C, u32)> {
    let mut ranked: Vec<(C, u32)> = candidates
        .into_iter()
        .map(|candidate| {
            let name = candidate
                .name_normalized()
                .or_else(|| candidate.name_original())
                .unwrap_or("")
                .to_string();
            let score = score_name_match(query, &name);
            (candidate, score)
        })
        .collect();

    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
}
