// 🔍 Attribute Matching - Wildcard and list patterns over string values
// A pattern is what the map declares, a value is what the source reports

use tracing::warn;

// ============================================================================
// MATCHING
// ============================================================================

/// Check whether a source value satisfies a declared pattern.
///
/// Rules, first hit wins:
/// - both empty is a "don't care" match
/// - exact string equality
/// - `*` and `**` match anything
/// - `*text*` matches values containing `text`
/// - a list literal matches if any of its elements matches
/// - a list value matches a list pattern only if both lists are equal
///
/// A malformed list literal is logged and does not match.
pub fn matches(value: &str, pattern: &str) -> bool {
    if value.is_empty() && pattern.is_empty() {
        return true;
    }

    if value == pattern {
        return true;
    }

    if pattern == "*" || pattern == "**" {
        return true;
    }

    if let Some(needle) = substring_pattern(pattern) {
        if value.contains(needle) {
            return true;
        }
    }

    if !looks_like_list(pattern) {
        return false;
    }

    let items = match parse_list(pattern) {
        Ok(items) => items,
        Err(reason) => {
            warn!("Malformed list pattern {:?}: {}", pattern, reason);
            return false;
        }
    };

    // Both sides are lists: structural equality only, no wildcards
    if looks_like_list(value) {
        if let Ok(value_items) = parse_list(value) {
            return value_items == items;
        }
    }

    items.iter().any(|item| matches(value, &item.to_string()))
}

/// `*text*` with a non-empty middle
fn substring_pattern(pattern: &str) -> Option<&str> {
    if pattern.len() > 2 && pattern.starts_with('*') && pattern.ends_with('*') {
        let needle = &pattern[1..pattern.len() - 1];
        if !needle.contains('*') {
            return Some(needle);
        }
    }
    None
}

fn looks_like_list(text: &str) -> bool {
    let text = text.trim();
    text.starts_with('[') && text.ends_with(']')
}

// ============================================================================
// LIST LITERALS
// ============================================================================

/// One element of a parsed list literal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListItem {
    Text(String),
    List(Vec<ListItem>),
}

impl std::fmt::Display for ListItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListItem::Text(text) => f.write_str(text),
            ListItem::List(items) => {
                let rendered: Vec<String> = items
                    .iter()
                    .map(|item| match item {
                        ListItem::Text(text) => crate::expression::quote(text),
                        nested => nested.to_string(),
                    })
                    .collect();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}

/// Parse a list literal such as `['ORIGINAL', 'PRIMARY', 2]`.
///
/// Strings may use single or double quotes. Bare tokens (numbers, `None`,
/// `True`) are kept as text, so `2` and `'2'` compare equal.
pub fn parse_list(text: &str) -> Result<Vec<ListItem>, String> {
    let chars: Vec<char> = text.trim().chars().collect();
    let mut pos = 0;
    let items = parse_items(&chars, &mut pos)?;
    skip_whitespace(&chars, &mut pos);
    if pos != chars.len() {
        return Err(format!("unexpected trailing text at offset {}", pos));
    }
    Ok(items)
}

fn parse_items(chars: &[char], pos: &mut usize) -> Result<Vec<ListItem>, String> {
    skip_whitespace(chars, pos);
    if chars.get(*pos) != Some(&'[') {
        return Err(format!("expected '[' at offset {}", pos));
    }
    *pos += 1;

    let mut items = Vec::new();
    loop {
        skip_whitespace(chars, pos);
        match chars.get(*pos) {
            None => return Err("unterminated list".to_string()),
            Some(']') => {
                *pos += 1;
                return Ok(items);
            }
            Some(_) => {}
        }

        items.push(parse_item(chars, pos)?);

        skip_whitespace(chars, pos);
        match chars.get(*pos) {
            Some(',') => *pos += 1,
            Some(']') => {}
            Some(other) => return Err(format!("unexpected '{}' at offset {}", other, pos)),
            None => return Err("unterminated list".to_string()),
        }
    }
}

fn parse_item(chars: &[char], pos: &mut usize) -> Result<ListItem, String> {
    match chars[*pos] {
        '[' => Ok(ListItem::List(parse_items(chars, pos)?)),
        quote @ ('\'' | '"') => {
            *pos += 1;
            let mut text = String::new();
            while let Some(&c) = chars.get(*pos) {
                *pos += 1;
                match c {
                    '\\' => match chars.get(*pos) {
                        Some(&escaped) => {
                            text.push(escaped);
                            *pos += 1;
                        }
                        None => break,
                    },
                    c if c == quote => return Ok(ListItem::Text(text)),
                    c => text.push(c),
                }
            }
            Err("unterminated string".to_string())
        }
        _ => {
            let start = *pos;
            while let Some(&c) = chars.get(*pos) {
                if c == ',' || c == ']' {
                    break;
                }
                if c == '[' || c == '\'' || c == '"' {
                    return Err(format!("unexpected '{}' at offset {}", c, pos));
                }
                *pos += 1;
            }
            let token: String = chars[start..*pos].iter().collect();
            Ok(ListItem::Text(token.trim().to_string()))
        }
    }
}

fn skip_whitespace(chars: &[char], pos: &mut usize) {
    while chars.get(*pos).is_some_and(|c| c.is_whitespace()) {
        *pos += 1;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_values_match() {
        for value in ["T1_MPRAGE", "0.0052", "ep2d bold", "['A', 'B']"] {
            assert!(matches(value, value));
        }
    }

    #[test]
    fn test_empty_values() {
        assert!(matches("", ""));
        assert!(!matches("x", ""));
        assert!(!matches("", "x"));
    }

    #[test]
    fn test_wildcards() {
        assert!(matches("T1_MPRAGE", "*"));
        assert!(matches("T1_MPRAGE", "**"));
        assert!(matches("", "*"));
        assert!(matches("T1_MPRAGE", "*MPRAGE*"));
        assert!(!matches("T1_MPRAGE", "*FLAIR*"));
        assert!(!matches("T1_MPRAGE", "name"));
    }

    #[test]
    fn test_list_pattern_any_element() {
        assert!(matches("T1_MPRAGE", "['*T1w*','*MPRAGE*']"));
        assert!(matches("T1_MPRAGE", "['T1w','T1_MPRAGE']"));
        assert!(matches("T1_MPRAGE", "[\"T1w\", \"T1_MPRAGE\"]"));
        assert!(!matches("T2_TSE", "['*T1w*','*MPRAGE*']"));
    }

    #[test]
    fn test_list_values_compare_structurally() {
        assert!(matches("['ORIGINAL', 'PRIMARY']", "['ORIGINAL','PRIMARY']"));
        assert!(matches("[1, 2]", "['1', '2']"));
        assert!(!matches("['ORIGINAL', 'PRIMARY']", "['ORIGINAL', 'SECONDARY']"));
        // No wildcard descent when both sides are lists
        assert!(!matches("['ORIGINAL', 'PRIMARY']", "['*ORIG*', '*PRIM*']"));
    }

    #[test]
    fn test_malformed_list_does_not_match() {
        assert!(!matches("T1_MPRAGE", "['T1_MPRAGE'"));
        assert!(!matches("T1_MPRAGE", "['T1_MPRAGE' 'x']"));
        assert!(!matches("T1_MPRAGE", "[a]b]"));
    }

    #[test]
    fn test_parse_nested_list() {
        let items = parse_list("[1, ['a', \"b\"], None]").unwrap();
        assert_eq!(
            items,
            vec![
                ListItem::Text("1".into()),
                ListItem::List(vec![ListItem::Text("a".into()), ListItem::Text("b".into())]),
                ListItem::Text("None".into()),
            ]
        );
    }

    #[test]
    fn test_parse_escaped_quotes() {
        let items = parse_list(r"['Joe\'s task']").unwrap();
        assert_eq!(items, vec![ListItem::Text("Joe's task".into())]);
        assert_eq!(parse_list("[]").unwrap(), Vec::<ListItem>::new());
    }
}
