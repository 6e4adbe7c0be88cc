// 🗃️ Map Store - Create, move and remove run-items
// Provenance is unique within a data-format section, across all categories

use crate::bidsmap::{DataFormatSection, RunItem};
use crate::category::{Category, Scope};
use crate::matcher::matches;
use crate::template::{check_run, EntityTemplate};
use tracing::{debug, error, warn};

// ============================================================================
// UPDATE REPORT
// ============================================================================

/// Run-item totals of a section around an `update`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateReport {
    pub runs_before: usize,
    pub runs_after: usize,
}

impl UpdateReport {
    pub fn is_consistent(&self) -> bool {
        self.runs_before == self.runs_after
    }
}

// ============================================================================
// MAP STORE OPERATIONS
// ============================================================================

impl DataFormatSection {
    /// Total number of run-items over all categories
    pub fn count_runs(&self) -> usize {
        self.runs.values().map(|runs| runs.len()).sum()
    }

    /// Locate a run-item by provenance
    pub fn find_run(&self, provenance: &str) -> Option<(Category, usize, &RunItem)> {
        self.runs.iter().find_map(|(category, runs)| {
            runs.iter()
                .position(|run| run.provenance == provenance)
                .map(|index| (*category, index, &runs[index]))
        })
    }

    /// Check whether the map holds a run-item whose patterns match `query`.
    ///
    /// Query attribute values are matched against the stored patterns. A
    /// query without any attribute value only matches stored items whose own
    /// patterns are all empty, so a blank query does not match every entry.
    /// With `match_bids` every bids value must also be equal.
    pub fn exist(&self, scope: Scope, query: &RunItem, match_bids: bool) -> bool {
        match scope {
            Scope::All => Category::PRIORITY
                .iter()
                .any(|category| self.exist(Scope::Only(*category), query, match_bids)),
            Scope::Only(category) => self
                .runs(category)
                .iter()
                .any(|stored| run_matches(stored, query, match_bids)),
        }
    }

    /// Store a copy of `run` at the end of a category
    pub fn append(&mut self, category: Category, run: &RunItem) {
        debug!("Appending {} to {}", run.provenance, category);
        self.runs_mut(category).push(run.clone());
    }

    /// Remove every run-item of a category with the given provenance
    pub fn delete(&mut self, category: Category, provenance: &str) -> usize {
        let runs = self.runs_mut(category);
        let before = runs.len();
        runs.retain(|run| run.provenance != provenance);
        let removed = before - runs.len();
        if removed > 1 {
            warn!("Removed {} duplicate run-items of {} from {}", removed, provenance, category);
        }
        removed
    }

    /// Move or replace a run-item.
    ///
    /// Across categories this is a delete followed by an append, with the
    /// bids values reshaped to the target template. Within a category the
    /// item is replaced where it stands. A change of the total
    /// run count is logged but does not fail the call.
    pub fn update(&mut self, from: Category, provenance: &str, to: Category, run: &RunItem) -> UpdateReport {
        let runs_before = self.count_runs();

        if from != to {
            if self.exist(Scope::Only(to), run, false) {
                warn!("Run-item {} from {} already exists in {}", provenance, from, to);
            }
            let mut moved = run.clone();
            moved.bids = EntityTemplate::for_category(to).remap(&run.bids);
            self.delete(from, provenance);
            self.append(to, &moved);
        } else {
            match self.runs_mut(to).iter_mut().find(|stored| stored.provenance == provenance) {
                Some(stored) => *stored = run.clone(),
                None => debug!("No run-item {} in {} to replace", provenance, to),
            }
        }

        if let Some((_, _, stored)) = self.find_run(provenance) {
            if let Err(errors) = check_run(to, stored) {
                for error in errors {
                    warn!("{}", error);
                }
            }
        }

        let report = UpdateReport {
            runs_before,
            runs_after: self.count_runs(),
        };
        if !report.is_consistent() {
            error!(
                "Number of run-items changed from {} to {} while moving {} from {} to {}",
                report.runs_before, report.runs_after, provenance, from, to
            );
        }
        report
    }
}

fn run_matches(stored: &RunItem, query: &RunItem, match_bids: bool) -> bool {
    let mut matched = !query.has_empty_attributes() || stored.has_empty_attributes();

    for (key, value) in &query.attributes {
        if !matched {
            break;
        }
        let pattern = stored.attributes.get(key).map(String::as_str).unwrap_or("");
        matched = matches(value, pattern);
    }

    if matched && match_bids {
        matched = query
            .bids
            .iter()
            .all(|(key, value)| stored.bids.get(key) == Some(value));
    }

    matched
}

// ============================================================================
// TESTS
// ============================================================================
