use std::collections::HashSet;
use std::fs;

use camino::Utf8Path;
use serde::Serialize;

use crate::error::GibError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingEntry {
    pub id: String,
    pub failures: u32,
}

/// Outcome of recording one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The entry stays pending and will be visited on the next pass.
    Retry { failures: u32 },
    /// The attempt ceiling was reached; the entry left the pending set.
    Abandoned { failures: u32 },
}

/// Mint identifiers still waiting for a fully successful pass.
///
/// Entries keep the order in which they first appeared in the list. The set
/// never grows after loading.
#[derive(Debug, Clone, Default)]
pub struct PendingSet {
    entries: Vec<PendingEntry>,
    abandoned: Vec<PendingEntry>,
}

impl PendingSet {
    /// Trims each line, skips blanks, and keeps the first copy of duplicates.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let entries = lines
            .into_iter()
            .filter_map(|line| {
                let id = line.as_ref().trim();
                (!id.is_empty() && seen.insert(id.to_string())).then(|| PendingEntry {
                    id: id.to_string(),
                    failures: 0,
                })
            })
            .collect();
        Self {
            entries,
            abandoned: Vec::new(),
        }
    }

    pub fn load(path: &Utf8Path) -> Result<Self, GibError> {
        let content = fs::read_to_string(path.as_std_path()).map_err(|err| GibError::ListRead {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        Ok(Self::from_lines(content.lines()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    /// Snapshot of the ids to visit in the next pass.
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.id.clone()).collect()
    }

    pub fn failures(&self, id: &str) -> Option<u32> {
        self.entries
            .iter()
            .chain(&self.abandoned)
            .find(|entry| entry.id == id)
            .map(|entry| entry.failures)
    }

    pub fn abandoned(&self) -> &[PendingEntry] {
        &self.abandoned
    }

    /// Removes `id` after a fully successful pass. Returns false if it was
    /// not pending.
    pub fn complete(&mut self, id: &str) -> bool {
        match self.position(id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Counts a failed attempt; with a ceiling, the entry is moved out of the
    /// pending set once it has failed `max_attempts` times.
    pub fn record_failure(&mut self, id: &str, max_attempts: Option<u32>) -> Option<AttemptOutcome> {
        let index = self.position(id)?;
        let entry = &mut self.entries[index];
        entry.failures += 1;
        let failures = entry.failures;
        match max_attempts {
            Some(ceiling) if failures >= ceiling => {
                let entry = self.entries.remove(index);
                self.abandoned.push(entry);
                Some(AttemptOutcome::Abandoned { failures })
            }
            _ => Some(AttemptOutcome::Retry { failures }),
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_lines_skips_blanks_and_duplicates() {
        let set = PendingSet::from_lines(["BBB", "", "AAA", "  BBB  ", "\t", "CCC"]);
        assert_eq!(set.ids(), vec!["BBB", "AAA", "CCC"]);
    }

    #[test]
    fn blank_list_is_empty() {
        let set = PendingSet::from_lines(["", "   "]);
        assert!(set.is_empty());
    }

    #[test]
    fn complete_only_removes_once() {
        let mut set = PendingSet::from_lines(["AAA", "BBB"]);
        assert!(set.complete("AAA"));
        assert!(!set.complete("AAA"));
        assert_eq!(set.ids(), vec!["BBB"]);
    }

    #[test]
    fn unbounded_failures_keep_entry_pending() {
        let mut set = PendingSet::from_lines(["AAA"]);
        for expected in 1..=50 {
            assert_eq!(
                set.record_failure("AAA", None),
                Some(AttemptOutcome::Retry { failures: expected })
            );
        }
        assert!(set.contains("AAA"));
    }

    #[test]
    fn ceiling_moves_entry_to_abandoned() {
        let mut set = PendingSet::from_lines(["AAA", "BBB"]);
        assert_eq!(
            set.record_failure("AAA", Some(2)),
            Some(AttemptOutcome::Retry { failures: 1 })
        );
        assert_eq!(
            set.record_failure("AAA", Some(2)),
            Some(AttemptOutcome::Abandoned { failures: 2 })
        );
        assert!(!set.contains("AAA"));
        assert_eq!(set.abandoned()[0].id, "AAA");
        assert_eq!(set.failures("AAA"), Some(2));
        assert_eq!(set.record_failure("AAA", Some(2)), None);
    }
}
