//! Scoring and normalization behavior through the public API

use taxroll_common::matching::{rank_candidates, score_name_match, NamedCandidate};
use taxroll_common::normalize;

struct Candidate {
    original: &'static str,
    normalized: Option<&'static str>,
}

impl NamedCandidate for Candidate {
    fn name_normalized(&self) -> Option<&str> {
        self.normalized
    }
    fn name_original(&self) -> Option<&str> {
        Some(self.original)
    }
}

#[test]
fn test_normalize_is_idempotent_over_messy_inputs() {
    let inputs = [
        "Phillis",
        "  O'NEAL,   J.W. ",
        "—–—",
        "Žofia",
        "District №7",
        "",
        "a  b\tc\nd",
    ];
    for input in inputs {
        let once = normalize(input);
        assert_eq!(normalize(&once), once, "input: {:?}", input);
        assert!(
            once.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == ' '),
            "normalized form must stay in [a-z0-9 ]: {:?} -> {:?}",
            input,
            once
        );
    }
}

#[test]
fn test_score_tiers_are_ordered() {
    // Exact > prefix > substring > bigram band, for one fixed candidate.
    let candidate = "phillis ann";
    let exact = score_name_match("Phillis Ann", candidate);
    let prefix = score_name_match("phillis", candidate);
    let substring = score_name_match("lis an", candidate);
    let fuzzy = score_name_match("phyllis ann", candidate);

    assert_eq!(exact, 100);
    assert_eq!(prefix, 80);
    assert_eq!(substring, 65);
    assert!(fuzzy < 65);
    assert!(fuzzy > 0);
}

#[test]
fn test_self_score_is_always_100() {
    for name in ["Mary", "J. W. Smith", "PHILLIS", "lot 12"] {
        assert_eq!(score_name_match(name, name), 100);
    }
}

#[test]
fn test_ranking_prefers_normalized_field_when_present() {
    let ranked = rank_candidates(
        "phillis",
        vec![
            Candidate {
                original: "garbled transcription",
                normalized: Some("phillis"),
            },
            Candidate {
                original: "phillis",
                normalized: None,
            },
        ],
    );

    // Both score 100: the normalized field drives the first candidate.
    assert_eq!(ranked[0].1, 100);
    assert_eq!(ranked[1].1, 100);
    assert_eq!(ranked[0].0.original, "garbled transcription");
}

#[test]
fn test_ranking_orders_phillis_variants() {
    let ranked = rank_candidates(
        "Phillis",
        vec![
            Candidate { original: "felix", normalized: None },
            Candidate { original: "phylis", normalized: None },
            Candidate { original: "phillis", normalized: None },
        ],
    );

    let names: Vec<&str> = ranked.iter().map(|(c, _)| c.original).collect();
    assert_eq!(names, vec!["phillis", "phylis", "felix"]);
    assert!(ranked[0].1 > ranked[2].1);
    assert!(ranked[1].1 > ranked[2].1);
}
