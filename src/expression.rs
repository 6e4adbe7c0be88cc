// 🧮 Value Expressions - Literal, immediate and deferred values
// `<name>` is looked up now, `<<name>>` is kept until the final source is known

use crate::datasource::DataSource;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ============================================================================
// EXPRESSION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueExpression {
    /// Plain text, used as is
    Literal(String),

    /// `<name>`: resolved from the source attributes during classification
    Immediate(String),

    /// `<<name>>`: left untouched by classification
    Deferred(String),
}

impl ValueExpression {
    /// Parse the textual form used in the map document
    pub fn parse(text: &str) -> Self {
        if text.len() > 4 && text.starts_with("<<") && text.ends_with(">>") {
            ValueExpression::Deferred(text[2..text.len() - 2].to_string())
        } else if text.len() > 2 && text.starts_with('<') && text.ends_with('>') {
            ValueExpression::Immediate(text[1..text.len() - 1].to_string())
        } else {
            ValueExpression::Literal(text.to_string())
        }
    }

    pub fn literal(text: impl Into<String>) -> Self {
        ValueExpression::Literal(text.into())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ValueExpression::Literal(text) if text.is_empty())
    }

    /// Resolve for free-form use (meta values). Literals stay as written.
    pub fn resolve<S: DataSource + ?Sized>(&self, source: &S) -> String {
        match self {
            ValueExpression::Literal(text) => text.clone(),
            ValueExpression::Immediate(name) => {
                let value = source.attribute(name);
                if value.is_empty() {
                    self.to_string()
                } else {
                    sanitize(&value)
                }
            }
            ValueExpression::Deferred(_) => self.to_string(),
        }
    }

    /// Resolve for use as a filename entity label. Literals are sanitized too.
    pub fn resolve_label<S: DataSource + ?Sized>(&self, source: &S) -> String {
        match self {
            ValueExpression::Literal(text) => sanitize(text),
            _ => self.resolve(source),
        }
    }

    /// Resolve a deferred lookup against the final source item.
    ///
    /// Immediate and literal expressions resolve as labels; a deferred lookup
    /// with no value on the source keeps its text.
    pub fn resolve_deferred<S: DataSource + ?Sized>(&self, source: &S) -> String {
        match self {
            ValueExpression::Deferred(name) => {
                let value = source.attribute(name);
                if value.is_empty() {
                    self.to_string()
                } else {
                    sanitize(&value)
                }
            }
            _ => self.resolve_label(source),
        }
    }
}

impl Default for ValueExpression {
    fn default() -> Self {
        ValueExpression::Literal(String::new())
    }
}

impl fmt::Display for ValueExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueExpression::Literal(text) => f.write_str(text),
            ValueExpression::Immediate(name) => write!(f, "<{}>", name),
            ValueExpression::Deferred(name) => write!(f, "<<{}>>", name),
        }
    }
}

impl From<&str> for ValueExpression {
    fn from(text: &str) -> Self {
        ValueExpression::parse(text)
    }
}

impl Serialize for ValueExpression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ValueExpression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        Ok(ValueExpression::parse(&coerce_to_string(&value)))
    }
}

// ============================================================================
// SANITIZER
// ============================================================================

/// Turn arbitrary text into a filename-safe label.
///
/// Whitespace is trimmed, separators (space, `_`, `-`, `.`) are dropped and
/// anything outside `[A-Za-z0-9_.-]` is stripped.
pub fn sanitize(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-' | '.'))
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect()
}

// ============================================================================
// STRING COERCION
// ============================================================================

/// Render a document value as the string the matcher compares against.
/// Sequences use the list-literal form the source headers produce.
pub fn coerce_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Null => String::new(),
        serde_yaml::Value::String(text) => text.clone(),
        serde_yaml::Value::Sequence(items) => {
            let rendered: Vec<String> = items.iter().map(coerce_list_element).collect();
            format!("[{}]", rendered.join(", "))
        }
        serde_yaml::Value::Tagged(tagged) => coerce_to_string(&tagged.value),
        other => scalar_text(other),
    }
}

fn coerce_list_element(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(text) => quote(text),
        serde_yaml::Value::Null => "None".to_string(),
        serde_yaml::Value::Sequence(_) => coerce_to_string(value),
        other => scalar_text(other),
    }
}

fn scalar_text(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Bool(true) => "True".to_string(),
        serde_yaml::Value::Bool(false) => "False".to_string(),
        serde_yaml::Value::Number(number) => number.to_string(),
        serde_yaml::Value::String(text) => text.clone(),
        other => serde_yaml::to_string(other)
            .map(|text| text.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Single-quote a string element, escaping quotes and backslashes
pub(crate) fn quote(text: &str) -> String {
    let escaped = text.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

// ============================================================================
// TESTS
// ============================================================================
