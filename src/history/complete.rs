//! Filename completion - literal prefix match over the working directory

use crate::error::Result;
use std::fs;
use std::path::Path;

/// Outcome of a completion request. For a single match the host splices
/// the full name in (plus a trailing space when the cursor sits at the end
/// of the command); for multiple matches it splices the common prefix if
/// that is longer than what the user typed, and shows the candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    None,
    Single(String),
    Multiple {
        common_prefix: String,
        matches: Vec<String>,
    },
}

/// Complete a partial word against the current directory
pub fn complete(word: &str) -> Result<Completion> {
    complete_in(Path::new("."), word)
}

pub(crate) fn complete_in(dir: &Path, word: &str) -> Result<Completion> {
    if word.is_empty() {
        return Ok(Completion::None);
    }
    let show_hidden = word.starts_with('.');

    let mut matches: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(word))
        .filter(|name| show_hidden || !name.starts_with('.'))
        .collect();
    matches.sort();

    if matches.is_empty() {
        return Ok(Completion::None);
    }
    if matches.len() == 1 {
        return Ok(Completion::Single(matches.remove(0)));
    }
    let common_prefix = longest_common_prefix(&matches);
    Ok(Completion::Multiple {
        common_prefix,
        matches,
    })
}

fn longest_common_prefix(names: &[String]) -> String {
    let mut prefix = names[0].clone();
    for name in &names[1..] {
        let shared = prefix
            .chars()
            .zip(name.chars())
            .take_while(|(a, b)| a == b)
            .count();
        prefix.truncate(
            prefix
                .char_indices()
                .nth(shared)
                .map(|(i, _)| i)
                .unwrap_or(prefix.len()),
        );
        if prefix.is_empty() {
            break;
        }
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in ["apple.txt", "apricot.txt", "banana.txt", ".apphidden"] {
            File::create(dir.path().join(name)).unwrap();
        }
        dir
    }

    #[test]
    fn test_single_match() {
        let dir = fixture();
        assert_eq!(
            complete_in(dir.path(), "ban").unwrap(),
            Completion::Single("banana.txt".into())
        );
    }

    #[test]
    fn test_multiple_matches_share_prefix() {
        let dir = fixture();
        match complete_in(dir.path(), "a").unwrap() {
            Completion::Multiple {
                common_prefix,
                matches,
            } => {
                assert_eq!(common_prefix, "ap");
                assert_eq!(matches, vec!["apple.txt", "apricot.txt"]);
            }
            other => panic!("expected multiple matches, got {other:?}"),
        }
    }

    #[test]
    fn test_no_match() {
        let dir = fixture();
        assert_eq!(complete_in(dir.path(), "zzz").unwrap(), Completion::None);
        assert_eq!(complete_in(dir.path(), "").unwrap(), Completion::None);
    }

    #[test]
    fn test_hidden_files_need_dot_prefix() {
        let dir = fixture();
        assert_eq!(
            complete_in(dir.path(), ".app").unwrap(),
            Completion::Single(".apphidden".into())
        );
    }
}
