//! Parsers for queue response text

use super::error::{CodecError, Result};
use crate::domain::{Integration, JobId, Snapshot};

const COMPILER_PREFIX: &str = "CakeML: ";
const CORE_PREFIX: &str = "HOL: ";
const BASE_PREFIX: &str = "Merging into: ";

/// Parses the space-separated body of `GET /waiting`
pub fn parse_waiting(body: &str) -> Result<Vec<JobId>> {
    body.split_whitespace().map(str::parse).collect()
}

/// Reads the commit snapshot out of a job description
///
/// Layout for a branch build:
///
/// ```text
/// CakeML: <sha>
/// <message>
/// HOL: <sha>
/// ```
///
/// A pull-request build has a `#` line in place of the `HOL:` line, two
/// more lines of detail, then `Merging into: <base>` and `HOL: <sha>`.
pub fn parse_snapshot(text: &str) -> Result<Snapshot> {
    let mut lines = text.lines();

    let compiler = expect_prefix(lines.next(), COMPILER_PREFIX)?;
    skip(&mut lines, 1)?;

    let next = lines
        .next()
        .ok_or_else(|| truncated("the proof-assistant line"))?;

    if next.starts_with('#') {
        skip(&mut lines, 2)?;
        let base = expect_prefix(lines.next(), BASE_PREFIX)?;
        let core = expect_prefix(lines.next(), CORE_PREFIX)?;
        Ok(Snapshot {
            integration: Integration::PullRequest {
                head: compiler,
                base,
            },
            core,
        })
    } else {
        let core = expect_prefix(Some(next), CORE_PREFIX)?;
        Ok(Snapshot {
            integration: Integration::Branch { commit: compiler },
            core,
        })
    }
}

fn expect_prefix(line: Option<&str>, prefix: &str) -> Result<String> {
    let line = line.ok_or_else(|| truncated(prefix.trim_end()))?;
    line.strip_prefix(prefix)
        .map(|rest| rest.trim_end().to_string())
        .ok_or_else(|| CodecError::Snapshot(format!("expected {:?}, found {:?}", prefix, line)))
}

fn skip<'a>(lines: &mut impl Iterator<Item = &'a str>, count: usize) -> Result<()> {
    for _ in 0..count {
        lines
            .next()
            .ok_or_else(|| truncated("a description line"))?;
    }
    Ok(())
}

fn truncated(wanted: &str) -> CodecError {
    CodecError::Snapshot(format!("description ended before {}", wanted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_branch_snapshot() {
        let snapshot = parse_snapshot("CakeML: abc\nmsg\nHOL: def\n").unwrap();
        assert_eq!(
            snapshot,
            Snapshot {
                integration: Integration::Branch {
                    commit: "abc".to_string()
                },
                core: "def".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_trims_trailing_whitespace() {
        let snapshot = parse_snapshot("CakeML: abc  \r\nmsg\nHOL: def\t\n").unwrap();
        assert_eq!(snapshot.core, "def");
        assert_eq!(
            snapshot.integration,
            Integration::Branch {
                commit: "abc".to_string()
            }
        );
    }

    #[test]
    fn test_parse_pull_request_snapshot() {
        let text = "CakeML: head1\n\
                    Fix the parser\n\
                    #123 (fix-parser)\n\
                    Some PR title\n\
                    Author line\n\
                    Merging into: base1\n\
                    HOL: holsha\n\
                    Claimed by worker\n";
        let snapshot = parse_snapshot(text).unwrap();
        assert_eq!(
            snapshot.integration,
            Integration::PullRequest {
                head: "head1".to_string(),
                base: "base1".to_string(),
            }
        );
        assert_eq!(snapshot.core, "holsha");
        assert!(!snapshot.integration.is_primary());
    }

    #[test]
    fn test_parse_rejects_missing_prefixes() {
        assert!(parse_snapshot("HOL: def\nmsg\nCakeML: abc\n").is_err());
        assert!(parse_snapshot("CakeML: abc\nmsg\nHOLD: def\n").is_err());
        assert!(parse_snapshot("CakeML: abc\nmsg\n#1\na\nb\nHOL: x\n").is_err());
        assert!(parse_snapshot("CakeML: abc\nmsg\n").is_err());
        assert!(parse_snapshot("").is_err());
    }

    #[test]
    fn test_parse_waiting() {
        assert_eq!(
            parse_waiting("3 4 10\n").unwrap(),
            vec![JobId::new(3), JobId::new(4), JobId::new(10)]
        );
        assert!(parse_waiting("").unwrap().is_empty());
        assert!(parse_waiting("3 04").is_err());
    }
}
