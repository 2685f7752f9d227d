//! Two-pass merge: content fingerprint first, then canonical URL.

use std::collections::HashMap;

use jobsync_core::{CanonicalPosting, Fingerprint};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub input: usize,
    pub fingerprint_merges: usize,
    pub url_merges: usize,
    pub output: usize,
}

/// Collapses postings describing the same job.
///
/// Survivors keep the slot of the first posting in their group, so the output order is a
/// stable function of the input order. Applying it twice changes nothing.
pub fn dedup(postings: Vec<CanonicalPosting>) -> (Vec<CanonicalPosting>, DedupStats) {
    let input = postings.len();
    let (by_fingerprint, fingerprint_merges) =
        merge_by(postings, |p| p.fingerprint(), prefer_later_date);
    let (by_url, url_merges) = merge_by(by_fingerprint, |p| p.source_url.clone(), |_, _| true);
    let stats = DedupStats {
        input,
        fingerprint_merges,
        url_merges,
        output: by_url.len(),
    };
    (by_url, stats)
}

pub fn fingerprint_groups(postings: &[CanonicalPosting]) -> HashMap<Fingerprint, usize> {
    let mut groups = HashMap::new();
    for posting in postings {
        *groups.entry(posting.fingerprint()).or_insert(0) += 1;
    }
    groups
}

fn prefer_later_date(existing: &CanonicalPosting, incoming: &CanonicalPosting) -> bool {
    match (existing.posted_at_utc(), incoming.posted_at_utc()) {
        (Some(current), Some(candidate)) => candidate > current,
        (None, Some(_)) => true,
        _ => false,
    }
}

fn merge_by<K, KeyFn, ReplaceFn>(
    postings: Vec<CanonicalPosting>,
    key: KeyFn,
    replace: ReplaceFn,
) -> (Vec<CanonicalPosting>, usize)
where
    K: std::hash::Hash + Eq,
    KeyFn: Fn(&CanonicalPosting) -> K,
    ReplaceFn: Fn(&CanonicalPosting, &CanonicalPosting) -> bool,
{
    let mut slots: Vec<CanonicalPosting> = Vec::with_capacity(postings.len());
    let mut index: HashMap<K, usize> = HashMap::with_capacity(postings.len());
    let mut merges = 0usize;
    for posting in postings {
        let k = key(&posting);
        match index.get(&k).copied() {
            Some(slot) => {
                merges += 1;
                if replace(&slots[slot], &posting) {
                    slots[slot] = posting;
                }
            }
            None => {
                index.insert(k, slots.len());
                slots.push(posting);
            }
        }
    }
    (slots, merges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobsync_core::Translations;

    fn posting(title: &str, company: &str, url: &str, date: Option<&str>) -> CanonicalPosting {
        CanonicalPosting {
            title: title.to_string(),
            company: company.to_string(),
            location: "Luxembourg".to_string(),
            category: "Other".to_string(),
            source_name: "ADEM".to_string(),
            source_url: url.to_string(),
            posted_at: date.map(str::to_string),
            contact_info: "See details on the source site".to_string(),
            requires_driver: false,
            translations: Translations::new(),
        }
    }

    #[test]
    fn fingerprint_merge_keeps_the_later_date() {
        let (out, stats) = dedup(vec![
            posting("Infirmier", "Bionext", "https://a/1", Some("2024-01-01")),
            posting("infirmier", "bionext", "https://a/2", Some("2024-02-01")),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].posted_at.as_deref(), Some("2024-02-01"));
        assert_eq!(out[0].source_url, "https://a/2");
        assert_eq!(stats.fingerprint_merges, 1);
    }

    #[test]
    fn unparsable_or_equal_dates_keep_first_seen() {
        let (out, _) = dedup(vec![
            posting("Serveur", "Cactus", "https://a/1", Some("2024-03-01")),
            posting("Serveur", "Cactus", "https://a/2", Some("2024-03-01")),
            posting("Serveur", "Cactus", "https://a/3", Some("soon")),
            posting("Serveur", "Cactus", "https://a/4", None),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source_url, "https://a/1");

        let (out, _) = dedup(vec![
            posting("Serveur", "Cactus", "https://a/1", None),
            posting("Serveur", "Cactus", "https://a/2", Some("2024-03-01")),
        ]);
        assert_eq!(out[0].source_url, "https://a/2", "a parsable date beats none");
    }

    #[test]
    fn url_pass_is_last_seen_wins_in_first_seen_slot() {
        let (out, stats) = dedup(vec![
            posting("Comptable", "Fiduciaire A", "https://a/shared", None),
            posting("Vendeur", "Cactus", "https://a/other", None),
            posting("Comptable", "Fiduciaire A Sàrl", "https://a/shared", None),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].company, "Fiduciaire A Sàrl");
        assert_eq!(out[1].title, "Vendeur");
        assert_eq!(stats.url_merges, 1);
        assert_eq!(stats.output, 2);
    }

    #[test]
    fn dedup_is_idempotent() {
        let input = vec![
            posting("Infirmier", "Bionext", "https://a/1", Some("2024-01-01")),
            posting("Chauffeur", "Arthur Welter", "https://a/2", None),
            posting("INFIRMIER", "BIONEXT", "https://a/3", Some("2024-02-01")),
            posting("Chauffeur C", "Arthur Welter", "https://a/2", Some("2024-02-05")),
            posting("Data engineer", "POST", "https://a/4", Some("garbage")),
            posting("Data Engineer!", "post", "https://a/5", Some("2023-12-31")),
        ];
        let (once, _) = dedup(input);
        let (twice, stats) = dedup(once.clone());
        assert_eq!(once, twice);
        assert_eq!(stats.fingerprint_merges + stats.url_merges, 0);
    }

    #[test]
    fn survivors_have_unique_urls_and_fingerprints() {
        let (out, _) = dedup(vec![
            posting("A", "X", "https://a/1", None),
            posting("B", "X", "https://a/1", None),
            posting("a", "x", "https://a/2", Some("2024-05-01")),
        ]);
        let urls: std::collections::HashSet<_> = out.iter().map(|p| &p.source_url).collect();
        assert_eq!(urls.len(), out.len());
        assert!(fingerprint_groups(&out).values().all(|&n| n == 1));
    }
}
