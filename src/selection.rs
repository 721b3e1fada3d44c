//! Job selection syntax used by `bkjobs run`.
//!
//! `all`, a single position (`2`), an inclusive range (`1-3`) or any mix
//! separated by `;` (`1-3;5`). Positions are 1-based.

use std::collections::BTreeSet;

use regex::Regex;

const TERM_PATTERN: &str = r"^\s*(\d+)\s*(?:-\s*(\d+)\s*)?$";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    /// Sorted, deduplicated 0-based indices
    Indices(Vec<usize>),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Selection is empty")]
    Empty,
    #[error("Cannot parse '{0}' (expected N, N-M or 'all')")]
    Malformed(String),
    #[error("Positions start at 1")]
    Zero,
    #[error("Range {0}-{1} is reversed")]
    Reversed(usize, usize),
}

impl std::str::FromStr for Selection {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SelectionError::Empty);
        }
        if s.eq_ignore_ascii_case("all") || s == "*" {
            return Ok(Selection::All);
        }

        let term_re =
            Regex::new(TERM_PATTERN).map_err(|e| SelectionError::Malformed(e.to_string()))?;

        let mut indices = BTreeSet::new();
        for term in s.split(';').filter(|t| !t.trim().is_empty()) {
            let caps = term_re
                .captures(term)
                .ok_or_else(|| SelectionError::Malformed(term.trim().to_string()))?;

            let parse = |m: regex::Match<'_>| {
                m.as_str()
                    .parse::<usize>()
                    .map_err(|_| SelectionError::Malformed(term.trim().to_string()))
            };

            let start = parse(caps.get(1).ok_or(SelectionError::Empty)?)?;
            let end = match caps.get(2) {
                Some(m) => parse(m)?,
                None => start,
            };

            if start == 0 || end == 0 {
                return Err(SelectionError::Zero);
            }
            if end < start {
                return Err(SelectionError::Reversed(start, end));
            }
            indices.extend((start - 1)..end);
        }

        if indices.is_empty() {
            return Err(SelectionError::Empty);
        }
        Ok(Selection::Indices(indices.into_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all() {
        assert_eq!("all".parse::<Selection>().unwrap(), Selection::All);
        assert_eq!(" ALL ".parse::<Selection>().unwrap(), Selection::All);
    }

    #[test]
    fn parses_ranges_and_singles() {
        assert_eq!(
            "1-3;5".parse::<Selection>().unwrap(),
            Selection::Indices(vec![0, 1, 2, 4])
        );
        assert_eq!(
            "2; 2 ;1".parse::<Selection>().unwrap(),
            Selection::Indices(vec![0, 1])
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!("".parse::<Selection>(), Err(SelectionError::Empty));
        assert_eq!("0".parse::<Selection>(), Err(SelectionError::Zero));
        assert_eq!("3-1".parse::<Selection>(), Err(SelectionError::Reversed(3, 1)));
        assert!(matches!(
            "1,2".parse::<Selection>(),
            Err(SelectionError::Malformed(_))
        ));
    }
}
