// 📐 Entity Templates - The fixed filename shape of each category
// Validates run-items against the slots their category declares

use crate::bidsmap::RunItem;
use crate::category::Category;
use crate::expression::{sanitize, ValueExpression};
use indexmap::IndexMap;

// ============================================================================
// TEMPLATE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitySlot {
    pub key: &'static str,
    pub mandatory: bool,
}

const fn required(key: &'static str) -> EntitySlot {
    EntitySlot { key, mandatory: true }
}

const fn optional(key: &'static str) -> EntitySlot {
    EntitySlot { key, mandatory: false }
}

/// Ordered entity slots of one category.
///
/// The `suffix` slot is always last and is rendered without a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityTemplate {
    pub category: Category,
    pub slots: &'static [EntitySlot],
}

pub const SUFFIX: &str = "suffix";
pub const RUN: &str = "run";
pub const ACQ: &str = "acq";

const FMAP: &[EntitySlot] = &[optional("acq"), optional("ce"), optional("dir"), optional("run"), required("suffix")];
const ANAT: &[EntitySlot] = &[
    optional("acq"),
    optional("ce"),
    optional("rec"),
    optional("run"),
    optional("mod"),
    required("suffix"),
];
const FUNC: &[EntitySlot] = &[
    required("task"),
    optional("acq"),
    optional("ce"),
    optional("dir"),
    optional("rec"),
    optional("run"),
    optional("echo"),
    required("suffix"),
];
const PERF: &[EntitySlot] = &[optional("acq"), optional("rec"), optional("dir"), optional("run"), required("suffix")];
const DWI: &[EntitySlot] = &[optional("acq"), optional("dir"), optional("run"), optional("part"), required("suffix")];
const PET: &[EntitySlot] = &[optional("task"), optional("trc"), optional("rec"), optional("run"), required("suffix")];
const BEH: &[EntitySlot] = &[required("task"), optional("acq"), optional("run"), required("suffix")];
const RESERVED: &[EntitySlot] = &[
    required("acq"),
    optional("task"),
    optional("ce"),
    optional("rec"),
    optional("dir"),
    optional("run"),
    optional("echo"),
    optional("suffix"),
];

impl EntityTemplate {
    pub fn for_category(category: Category) -> Self {
        let slots = match category {
            Category::Fmap => FMAP,
            Category::Anat => ANAT,
            Category::Func => FUNC,
            Category::Perf => PERF,
            Category::Dwi => DWI,
            Category::Pet => PET,
            Category::Beh => BEH,
            Category::Unknown | Category::Ignore => RESERVED,
        };
        EntityTemplate { category, slots }
    }

    pub fn slot(&self, key: &str) -> Option<&EntitySlot> {
        self.slots.iter().find(|slot| slot.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.slots.iter().map(|slot| slot.key)
    }

    /// Empty bids mapping with exactly this template's keys
    pub fn empty_bids(&self) -> IndexMap<String, ValueExpression> {
        self.keys()
            .map(|key| (key.to_string(), ValueExpression::default()))
            .collect()
    }

    /// Bids mapping reshaped to this template's keys, keeping shared values
    pub fn remap(&self, bids: &IndexMap<String, ValueExpression>) -> IndexMap<String, ValueExpression> {
        self.keys()
            .map(|key| (key.to_string(), bids.get(key).cloned().unwrap_or_default()))
            .collect()
    }

    /// Value used for the reserved classes' `acq` slot when it is unset
    pub fn default_acq(&self) -> String {
        sanitize(self.category.as_str())
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub context: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.context, self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Check a run-item's bids values against its category template.
///
/// Reports mandatory entities without a value and entities the template does
/// not declare. The reserved classes default their `acq` slot, so an empty
/// `acq` is fine there.
pub fn check_run(category: Category, run: &RunItem) -> ValidationResult {
    let template = EntityTemplate::for_category(category);
    let context = format!("{}:{}", category, run.provenance);
    let mut errors = Vec::new();

    for slot in template.slots.iter().filter(|slot| slot.mandatory) {
        if category.is_reserved() && slot.key == ACQ {
            continue;
        }
        let empty = run.bids.get(slot.key).map(|value| value.is_empty()).unwrap_or(true);
        if empty {
            errors.push(ValidationError {
                field: slot.key.to_string(),
                message: "Mandatory entity has no value".to_string(),
                context: context.clone(),
            });
        }
    }

    for key in run.bids.keys() {
        if template.slot(key).is_none() {
            errors.push(ValidationError {
                field: key.clone(),
                message: format!("Not an entity of the {} template", category),
                context: context.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with(category: Category, pairs: &[(&str, &str)]) -> RunItem {
        let mut run = RunItem::from_template("/raw/001.dcm", category, &[]);
        for (key, value) in pairs {
            run.bids.insert(key.to_string(), ValueExpression::parse(value));
        }
        run
    }

    #[test]
    fn test_suffix_is_last_and_mandatory_outside_reserved() {
        for category in Category::PRIORITY {
            let template = EntityTemplate::for_category(category);
            let last = template.slots.last().unwrap();
            assert_eq!(last.key, SUFFIX);
            assert_eq!(last.mandatory, !category.is_reserved());
        }
    }

    #[test]
    fn test_reserved_template_requires_acq() {
        let template = EntityTemplate::for_category(Category::Unknown);
        assert!(template.slot(ACQ).unwrap().mandatory);
        assert_eq!(template.default_acq(), "extradata");
        assert_eq!(EntityTemplate::for_category(Category::Ignore).default_acq(), "exclude");
    }

    #[test]
    fn test_empty_bids_has_template_keys() {
        let bids = EntityTemplate::for_category(Category::Anat).empty_bids();
        let keys: Vec<&str> = bids.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["acq", "ce", "rec", "run", "mod", "suffix"]);
    }

    #[test]
    fn test_remap_keeps_shared_values_only() {
        let odd = run_with(Category::Unknown, &[("acq", "FLAIR"), ("task", "rest"), ("echo", "2"), ("suffix", "T2w")]);
        let bids = EntityTemplate::for_category(Category::Anat).remap(&odd.bids);

        let keys: Vec<&str> = bids.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["acq", "ce", "rec", "run", "mod", "suffix"]);
        assert_eq!(bids["acq"], ValueExpression::literal("FLAIR"));
        assert_eq!(bids["suffix"], ValueExpression::literal("T2w"));
        assert!(bids["mod"].is_empty());
    }

    #[test]
    fn test_check_run_accepts_complete_run() {
        let run = run_with(Category::Func, &[("task", "rest"), ("run", "<<1>>"), ("suffix", "bold")]);
        assert!(check_run(Category::Func, &run).is_ok());
    }

    #[test]
    fn test_check_run_reports_missing_and_foreign_entities() {
        let run = run_with(Category::Func, &[("suffix", "bold"), ("flip", "2")]);
        let errors = check_run(Category::Func, &run).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["task", "flip"]);
    }

    #[test]
    fn test_check_run_reserved_without_acq() {
        let run = run_with(Category::Unknown, &[]);
        assert!(check_run(Category::Unknown, &run).is_ok());
    }
}
