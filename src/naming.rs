// 📝 Name Composition - Template-driven output filenames
// sub-<label>[_ses-<label>]_<key>-<value>..._<suffix>

use crate::bidsmap::RunItem;
use crate::category::Category;
use crate::error::{BidsmapError, Result};
use crate::expression::sanitize;
use crate::template::{EntityTemplate, ACQ, RUN, SUFFIX};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

// ============================================================================
// COMPOSE
// ============================================================================

/// Compose the output name of a run-item, without extension.
///
/// Optional entities with an empty value are left out. An empty mandatory
/// entity is kept as `key-`, except the keyless suffix. `run_index` replaces
/// the item's own `run` value. An undeclared category name is an error.
pub fn compose(
    subject: &str,
    session: &str,
    category: &str,
    run: &RunItem,
    run_index: Option<&str>,
) -> Result<String> {
    let category: Category = category.parse()?;
    Ok(compose_for(subject, session, category, run, run_index))
}

/// Same as [`compose`] for an already parsed category
pub fn compose_for(
    subject: &str,
    session: &str,
    category: Category,
    run: &RunItem,
    run_index: Option<&str>,
) -> String {
    let template = EntityTemplate::for_category(category);
    let mut parts = vec![with_prefix(subject, "sub-")];

    let session = with_prefix(session, "ses-");
    if session != "ses-" {
        parts.push(session);
    }

    for slot in template.slots {
        let mut value = match (slot.key, run_index) {
            (RUN, Some(index)) => sanitize(index),
            _ => sanitize(&run.bids_value(slot.key)),
        };

        if value.is_empty() && slot.key == ACQ && category.is_reserved() {
            value = template.default_acq();
        }

        if value.is_empty() {
            if !slot.mandatory {
                continue;
            }
            warn!("Mandatory {} entity of {} has no value", slot.key, run.provenance);
            if slot.key == SUFFIX {
                continue;
            }
        }

        if slot.key == SUFFIX {
            parts.push(value);
        } else {
            parts.push(format!("{}-{}", slot.key, value));
        }
    }

    parts.join("_")
}

/// `sub-`/`ses-` identifier with a sanitized label
fn with_prefix(id: &str, prefix: &str) -> String {
    let label = id.trim();
    let label = label.strip_prefix(prefix).unwrap_or(label);
    format!("{}{}", prefix, sanitize(label))
}

// ============================================================================
// RUN INDEX
// ============================================================================

/// Bump the run entity of `name` until no `name.*` file exists in `dir`.
///
/// A colliding name without a numeric run entity is an error.
pub fn increment_run_index(dir: &Path, name: &str) -> Result<String> {
    let mut candidate = name.to_string();
    while collides(dir, &candidate)? {
        let next = next_run(&candidate).ok_or_else(|| BidsmapError::MissingRunIndex(candidate.clone()))?;
        debug!("{} exists, trying {}", candidate, next);
        candidate = next;
    }
    Ok(candidate)
}

fn collides(dir: &Path, name: &str) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    let prefix = format!("{}.", name);
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Name with its run entity incremented, keeping zero padding
fn next_run(name: &str) -> Option<String> {
    let mut parts: Vec<String> = name.split('_').map(|part| part.to_string()).collect();
    let part = parts.iter_mut().find(|part| part.starts_with("run-"))?;

    let digits = &part["run-".len()..];
    let index: u64 = digits.parse().ok()?;
    *part = format!("run-{:0width$}", index + 1, width = digits.len());

    Some(parts.join("_"))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ValueExpression;
    use tempfile::TempDir;

    fn run(pairs: &[(&str, &str)]) -> RunItem {
        let mut run = RunItem::default();
        run.provenance = "/raw/001.dcm".to_string();
        for (key, value) in pairs {
            run.bids.insert(key.to_string(), ValueExpression::parse(value));
        }
        run
    }

    #[test]
    fn test_compose_anat_drops_empty_optionals() {
        let t1 = run(&[("acq", ""), ("ce", ""), ("rec", ""), ("run", "1"), ("mod", ""), ("suffix", "T1w")]);
        assert_eq!(compose("sub-01", "", "anat", &t1, None).unwrap(), "sub-01_run-1_T1w");
    }

    #[test]
    fn test_compose_func_with_session() {
        let bold = run(&[("task", "rest"), ("run", "1"), ("suffix", "bold")]);
        assert_eq!(
            compose("sub-01", "ses-01", "func", &bold, None).unwrap(),
            "sub-01_ses-01_task-rest_run-1_bold"
        );
    }

    #[test]
    fn test_compose_follows_template_order() {
        let bold = run(&[("suffix", "bold"), ("run", "2"), ("acq", "mb4"), ("task", "n-back")]);
        assert_eq!(compose_for("01", "", Category::Func, &bold, None), "sub-01_task-nback_acq-mb4_run-2_bold");
    }

    #[test]
    fn test_compose_run_index_override_and_deferred_run() {
        let t1 = run(&[("run", "<<1>>"), ("suffix", "T1w")]);
        assert_eq!(compose_for("sub-01", "", Category::Anat, &t1, None), "sub-01_run-1_T1w");
        assert_eq!(compose_for("sub-01", "", Category::Anat, &t1, Some("3")), "sub-01_run-3_T1w");
    }

    #[test]
    fn test_compose_reserved_category_defaults_acq() {
        let odd = run(&[("acq", ""), ("suffix", "")]);
        assert_eq!(compose_for("sub-01", "", Category::Unknown, &odd, None), "sub-01_acq-extradata");

        let named = run(&[("acq", "Survey_SHC"), ("suffix", "")]);
        assert_eq!(compose_for("sub-01", "", Category::Ignore, &named, None), "sub-01_acq-SurveySHC");
    }

    #[test]
    fn test_compose_keeps_empty_mandatory_slot() {
        let bold = run(&[("suffix", "bold")]);
        assert_eq!(compose_for("sub-01", "", Category::Func, &bold, None), "sub-01_task-_bold");
    }

    #[test]
    fn test_compose_without_suffix_has_no_trailing_separator() {
        let bold = run(&[("task", "rest"), ("suffix", "")]);
        assert_eq!(compose_for("sub-01", "", Category::Func, &bold, None), "sub-01_task-rest");
    }

    #[test]
    fn test_compose_undeclared_category() {
        let err = compose("sub-01", "", "meg", &run(&[]), None).unwrap_err();
        assert!(matches!(err, BidsmapError::InvalidCategory(_)));
    }

    #[test]
    fn test_increment_run_index() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("sub-01_run-1_T1w.nii"), b"").unwrap();

        assert_eq!(increment_run_index(tmp.path(), "sub-01_run-1_T1w").unwrap(), "sub-01_run-2_T1w");
        assert_eq!(increment_run_index(tmp.path(), "sub-01_run-3_T1w").unwrap(), "sub-01_run-3_T1w");
    }

    #[test]
    fn test_increment_skips_every_taken_index() {
        let tmp = TempDir::new().unwrap();
        for name in ["sub-01_run-01_T1w.nii.gz", "sub-01_run-01_T1w.json", "sub-01_run-02_T1w.nii.gz"] {
            fs::write(tmp.path().join(name), b"").unwrap();
        }
        assert_eq!(increment_run_index(tmp.path(), "sub-01_run-01_T1w").unwrap(), "sub-01_run-03_T1w");
    }

    #[test]
    fn test_increment_without_run_entity_fails() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("sub-01_T1w.nii"), b"").unwrap();

        let err = increment_run_index(tmp.path(), "sub-01_T1w").unwrap_err();
        assert!(matches!(err, BidsmapError::MissingRunIndex(ref name) if name == "sub-01_T1w"));
    }

    #[test]
    fn test_increment_in_missing_directory() {
        let name = increment_run_index(Path::new("/nonexistent/anat"), "sub-01_run-1_T1w").unwrap();
        assert_eq!(name, "sub-01_run-1_T1w");
    }
}
