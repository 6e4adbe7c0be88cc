// Bidsmap - Heuristics Engine Library
// Classifies source items with a pattern map and composes standard filenames

pub mod error;
pub mod category;
pub mod expression;   // Literal / <immediate> / <<deferred>> values
pub mod matcher;      // Wildcard and list patterns
pub mod bidsmap;      // The map document and its persistence
pub mod template;     // Per-category entity templates
pub mod datasource;   // Source items and providers
pub mod classifier;   // First-match classification
pub mod naming;       // Filename composition and run indices
pub mod mapstore;     // Append / delete / exist / update
pub mod scans;        // Scans tables

// Re-export commonly used types
pub use error::{BidsmapError, Result};
pub use category::{Category, Scope};
pub use expression::{sanitize, ValueExpression};
pub use matcher::matches;
pub use bidsmap::{Bidsmap, DataFormatSection, Options, ProviderOptions, RunItem};
pub use template::{check_run, EntitySlot, EntityTemplate, ValidationError, ValidationResult};
pub use datasource::{
    get_provider, AttributeTable, DataSource, ProviderRegistry, SidecarProvider, SourceFile,
    SourceProvider,
};
pub use classifier::{classify, classify_in_order, discover, Classification};
pub use naming::{compose, compose_for, increment_run_index};
pub use mapstore::UpdateReport;
pub use scans::{acquisition_time, ScansTable};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
