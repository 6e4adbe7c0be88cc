// 🏷️ Categories - The closed set of output classes
// Every run-item lives in exactly one category of its data-format section

use crate::error::{BidsmapError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// CATEGORY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    /// Field maps
    #[serde(rename = "fmap")]
    Fmap,

    /// Anatomical images
    #[serde(rename = "anat")]
    Anat,

    /// Functional (task / resting state) images
    #[serde(rename = "func")]
    Func,

    /// Perfusion images
    #[serde(rename = "perf")]
    Perf,

    /// Diffusion weighted images
    #[serde(rename = "dwi")]
    Dwi,

    /// Positron emission tomography
    #[serde(rename = "pet")]
    Pet,

    /// Behavioural data
    #[serde(rename = "beh")]
    Beh,

    /// Reserved: the source item is recognised but has no standard class
    #[serde(rename = "extra_data", alias = "unknown")]
    Unknown,

    /// Reserved: the source item is excluded from conversion
    #[serde(rename = "exclude", alias = "ignore")]
    Ignore,
}

impl Category {
    /// Canonical classification order. The ignore class goes first so that
    /// exclusion rules win, the unknown class goes last as the catch-all.
    pub const PRIORITY: [Category; 9] = [
        Category::Ignore,
        Category::Fmap,
        Category::Anat,
        Category::Func,
        Category::Perf,
        Category::Dwi,
        Category::Pet,
        Category::Beh,
        Category::Unknown,
    ];

    /// Label used in the map document
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Fmap => "fmap",
            Category::Anat => "anat",
            Category::Func => "func",
            Category::Perf => "perf",
            Category::Dwi => "dwi",
            Category::Pet => "pet",
            Category::Beh => "beh",
            Category::Unknown => "extra_data",
            Category::Ignore => "exclude",
        }
    }

    /// True for the two reserved classes
    pub fn is_reserved(&self) -> bool {
        matches!(self, Category::Unknown | Category::Ignore)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = BidsmapError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "fmap" => Ok(Category::Fmap),
            "anat" => Ok(Category::Anat),
            "func" => Ok(Category::Func),
            "perf" => Ok(Category::Perf),
            "dwi" => Ok(Category::Dwi),
            "pet" => Ok(Category::Pet),
            "beh" => Ok(Category::Beh),
            "extra_data" | "unknown" => Ok(Category::Unknown),
            "exclude" | "ignore" => Ok(Category::Ignore),
            other => Err(BidsmapError::InvalidCategory(other.to_string())),
        }
    }
}

// ============================================================================
// SCOPE
// ============================================================================

/// Which categories a map query looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    Only(Category),
}

impl From<Category> for Scope {
    fn from(category: Category) -> Self {
        Scope::Only(category)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_covers_every_category_once() {
        let mut seen = Category::PRIORITY.to_vec();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), Category::PRIORITY.len());
        assert_eq!(Category::PRIORITY[0], Category::Ignore);
        assert_eq!(Category::PRIORITY[8], Category::Unknown);
    }

    #[test]
    fn test_parse_labels_and_aliases() {
        assert_eq!("anat".parse::<Category>().unwrap(), Category::Anat);
        assert_eq!("extra_data".parse::<Category>().unwrap(), Category::Unknown);
        assert_eq!("unknown".parse::<Category>().unwrap(), Category::Unknown);
        assert_eq!("ignore".parse::<Category>().unwrap(), Category::Ignore);
    }

    #[test]
    fn test_undeclared_category_is_rejected() {
        let err = "meg".parse::<Category>().unwrap_err();
        assert!(matches!(err, BidsmapError::InvalidCategory(ref name) if name == "meg"));
    }

    #[test]
    fn test_label_roundtrip() {
        for category in Category::PRIORITY {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
    }
}
