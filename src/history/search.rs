//! Fuzzy reverse search over command history
//!
//! Entries are scored by the longest common case-insensitive substring
//! shared with the search term; containment short-circuits to a perfect
//! score. The scan runs most-recent-first, so recency breaks ties.

use super::History;

/// A scored history entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    pub entry: String,
    pub score: usize,
}

/// Incremental mode: the single best match for the term, if any
pub fn reverse_search(history: &History, term: &str) -> Option<String> {
    let mut best: Option<SearchMatch> = None;
    for entry in history.recent() {
        let score = score(entry, term);
        if score == 0 {
            continue;
        }
        // strictly-greater keeps the most recent of equally scored entries
        if best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(SearchMatch {
                entry: entry.to_string(),
                score,
            });
        }
    }
    best.map(|b| b.entry)
}

/// Show-all mode: up to `limit` matches, best score first; equal scores
/// stay in most-recent-first order
pub fn ranked_matches(history: &History, term: &str, limit: usize) -> Vec<SearchMatch> {
    let mut matches: Vec<SearchMatch> = history
        .recent()
        .filter_map(|entry| {
            let score = score(entry, term);
            (score > 0).then(|| SearchMatch {
                entry: entry.to_string(),
                score,
            })
        })
        .collect();
    matches.sort_by(|a, b| b.score.cmp(&a.score));
    matches.truncate(limit);
    matches
}

fn score(entry: &str, term: &str) -> usize {
    if term.is_empty() {
        return 0;
    }
    let entry = entry.to_lowercase();
    let term = term.to_lowercase();
    if entry.contains(&term) {
        return term.chars().count();
    }
    longest_common_substring(&entry, &term)
}

/// Length in characters of the longest contiguous shared run
fn longest_common_substring(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut best = 0;
    let mut prev = vec![0usize; b.len() + 1];
    for &ca in &a {
        let mut row = vec![0usize; b.len() + 1];
        for (j, &cb) in b.iter().enumerate() {
            if ca == cb {
                row[j + 1] = prev[j] + 1;
                best = best.max(row[j + 1]);
            }
        }
        prev = row;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(entries: &[&str]) -> History {
        let mut h = History::new(100);
        for e in entries {
            h.append(e);
        }
        h
    }

    #[test]
    fn test_recency_breaks_ties() {
        let h = history(&["ls -la", "pwd", "pwd -P"]);
        assert_eq!(reverse_search(&h, "pwd").as_deref(), Some("pwd -P"));
    }

    #[test]
    fn test_containment_beats_partial_overlap() {
        let h = history(&["grep -r main src", "git status"]);
        assert_eq!(
            reverse_search(&h, "grep").as_deref(),
            Some("grep -r main src")
        );
    }

    #[test]
    fn test_case_insensitive() {
        let h = history(&["MAKE clean"]);
        assert_eq!(reverse_search(&h, "make").as_deref(), Some("MAKE clean"));
    }

    #[test]
    fn test_no_match() {
        let h = history(&["ls", "pwd"]);
        assert_eq!(reverse_search(&h, "xyz"), None);
        assert_eq!(reverse_search(&h, ""), None);
    }

    #[test]
    fn test_substring_scoring() {
        // "makr" shares the run "mak" (3) with "make test"
        assert_eq!(longest_common_substring("make test", "makr"), 3);
        assert_eq!(longest_common_substring("abc", "xyz"), 0);
    }

    #[test]
    fn test_ranked_matches_ordered_and_capped() {
        let mut h = History::new(100);
        for i in 0..15 {
            h.append(&format!("echo {i}"));
        }
        let matches = ranked_matches(&h, "echo", 10);
        assert_eq!(matches.len(), 10);
        // all tie on score, so most recent first
        assert_eq!(matches[0].entry, "echo 14");
        assert!(matches.iter().all(|m| m.score == 4));
    }
}
