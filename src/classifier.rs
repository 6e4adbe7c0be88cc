// 🏷️ Run Classification - First matching run-item wins
// Categories are scanned in a fixed order, run-items in declaration order

use crate::bidsmap::{Bidsmap, DataFormatSection, RunItem};
use crate::category::{Category, Scope};
use crate::datasource::DataSource;
use crate::matcher::matches;
use crate::template::EntityTemplate;
use tracing::{debug, info};

// ============================================================================
// CLASSIFICATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Copy of the matching run-item, filled from the source
    pub run: RunItem,

    /// Category of the match, or the unknown class
    pub category: Category,

    /// Position of the matching run-item in its category list
    pub index: Option<usize>,
}

impl Classification {
    pub fn is_match(&self) -> bool {
        self.index.is_some()
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Classify a source item with the canonical category order
pub fn classify<S: DataSource + ?Sized>(source: &S, bidsmap: &Bidsmap) -> Classification {
    classify_in_order(source, bidsmap, &Category::PRIORITY)
}

/// Classify a source item, scanning categories in `order`.
///
/// Every candidate is resolved against the source: attributes take the
/// source values, bids values are resolved as labels and meta values as plain
/// values. The first candidate whose non-empty patterns all match is returned.
/// Map authors must put specific rules before general ones.
///
/// Without a match the result is built from the last unknown-class candidate,
/// or from the unknown template with the attribute keys of the last candidate.
pub fn classify_in_order<S: DataSource + ?Sized>(
    source: &S,
    bidsmap: &Bidsmap,
    order: &[Category],
) -> Classification {
    let Some(section) = bidsmap.section(source.dataformat()) else {
        info!("No {} section in the bidsmap for {}", source.dataformat(), source.provenance());
        return unknown(source, RunItem::from_template(source.provenance(), Category::Unknown, &[]));
    };

    let mut last_unknown = None;
    let mut attribute_keys: Vec<&str> = Vec::new();
    for category in order {
        for (index, candidate) in section.runs(*category).iter().enumerate() {
            let (matched, filled) = resolve_candidate(source, candidate);
            if matched {
                debug!("{} matches {} run-item {}", source.provenance(), category, index);
                return Classification {
                    run: filled,
                    category: *category,
                    index: Some(index),
                };
            }
            attribute_keys = candidate.attributes.keys().map(String::as_str).collect();
            if *category == Category::Unknown {
                last_unknown = Some(filled);
            }
        }
    }

    debug!("No matching run-item for {}", source.provenance());
    let fallback = last_unknown
        .unwrap_or_else(|| RunItem::from_template(source.provenance(), Category::Unknown, &attribute_keys));
    unknown(source, fallback)
}

/// Match one candidate against the source and fill a copy of it
fn resolve_candidate<S: DataSource + ?Sized>(source: &S, candidate: &RunItem) -> (bool, RunItem) {
    let mut filled = candidate.clone();
    filled.provenance = source.provenance().to_string();

    let mut matched = true;
    for (name, pattern) in &candidate.attributes {
        let value = source.attribute(name);
        if !pattern.is_empty() {
            matched = matched && matches(&value, pattern);
        }
        filled.attributes.insert(name.clone(), value);
    }

    for (key, expr) in candidate.bids.iter() {
        filled.bids.insert(key.clone(), expr.resolve_label(source).as_str().into());
    }
    for (key, expr) in candidate.meta.iter() {
        filled.meta.insert(key.clone(), expr.resolve(source).as_str().into());
    }

    (matched, filled)
}

fn unknown<S: DataSource + ?Sized>(source: &S, mut run: RunItem) -> Classification {
    run.provenance = source.provenance().to_string();
    for (name, value) in run.attributes.iter_mut() {
        *value = source.attribute(name);
    }
    Classification {
        run,
        category: Category::Unknown,
        index: None,
    }
}

// ============================================================================
// DISCOVERY
// ============================================================================

/// Classify a source item against a template map and record it in a study map.
///
/// The item is appended to the study section of its data format unless an
/// equivalent run-item is already there. Unmatched items go to the unknown
/// class with the unknown template's entity keys. Returns the category the
/// item was recorded under, or None if it was already known.
pub fn discover<S: DataSource + ?Sized>(study: &mut Bidsmap, template: &Bidsmap, source: &S) -> Option<Category> {
    let Classification { mut run, category, index } = classify(source, template);

    if index.is_none() {
        run.bids = EntityTemplate::for_category(Category::Unknown).remap(&run.bids);
    }

    if study.section(source.dataformat()).is_none() {
        if let Some(section) = template.section(source.dataformat()) {
            let fresh = study.section_mut(source.dataformat());
            fresh.subject = section.subject.clone();
            fresh.session = section.session.clone();
        }
    }

    let section: &mut DataFormatSection = study.section_mut(source.dataformat());
    if section.find_run(&run.provenance).is_some() || section.exist(Scope::All, &run, true) {
        debug!("{} is already in the study bidsmap", run.provenance);
        return None;
    }

    info!("Found {} run-item: {}", category, run.provenance);
    section.append(category, &run);
    Some(category)
}

// ============================================================================
// TESTS
// ============================================================================
