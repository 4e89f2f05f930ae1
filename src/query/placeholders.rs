//! Bind placeholder detection.
//!
//! Finds `?` and `:name` placeholders in SQL text while skipping string
//! literals, quoted identifiers, dollar-quoted blocks and comments. `::`
//! casts and semi-structured path access (`col:field`) are not placeholders.

use std::ops::Range;

/// One placeholder occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// What kind of placeholder this is.
    pub kind: PlaceholderKind,
    /// Byte range in the SQL text, including the leading `?` or `:`.
    pub span: Range<usize>,
}

/// Placeholder flavour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderKind {
    Positional,
    Named(String),
}

/// Scans `sql` for bind placeholders.
pub fn scan(sql: &str) -> Vec<Placeholder> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => i = skip_quoted(bytes, i, b'\'', true),
            b'"' => i = skip_quoted(bytes, i, b'"', false),
            b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_line(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'/') => i = skip_line(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            b'$' if bytes.get(i + 1) == Some(&b'$') => i = skip_dollar_block(bytes, i),
            b'?' => {
                found.push(Placeholder {
                    kind: PlaceholderKind::Positional,
                    span: i..i + 1,
                });
                i += 1;
            }
            b':' => {
                if bytes.get(i + 1) == Some(&b':') {
                    // `::` cast
                    i += 2;
                    continue;
                }
                let attached = i > 0 && is_attaching(bytes[i - 1]);
                let name_len = bytes[i + 1..]
                    .iter()
                    .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
                    .count();
                let starts_ok = bytes
                    .get(i + 1)
                    .is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_');
                if !attached && starts_ok {
                    let end = i + 1 + name_len;
                    found.push(Placeholder {
                        kind: PlaceholderKind::Named(sql[i + 1..end].to_string()),
                        span: i..end,
                    });
                    i = end;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }

    found
}

/// Characters after which a `:` is path access rather than a placeholder.
fn is_attaching(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'"' | b')' | b']' | b'$')
}

fn skip_quoted(bytes: &[u8], start: usize, quote: u8, backslash_escapes: bool) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash_escapes && b == b'\\' {
            i += 2;
            continue;
        }
        if b == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_line(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|b| *b == b'\n')
        .map_or(bytes.len(), |p| start + p + 1)
}

fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start + 2..]
        .windows(2)
        .position(|w| w == b"*/")
        .map_or(bytes.len(), |p| start + 2 + p + 2)
}

fn skip_dollar_block(bytes: &[u8], start: usize) -> usize {
    bytes[start + 2..]
        .windows(2)
        .position(|w| w == b"$$")
        .map_or(bytes.len(), |p| start + 2 + p + 2)
}

/// Counts positional placeholders.
pub fn positional_count(placeholders: &[Placeholder]) -> usize {
    placeholders
        .iter()
        .filter(|p| p.kind == PlaceholderKind::Positional)
        .count()
}

/// Named placeholders in order of appearance, duplicates included.
pub fn named(placeholders: &[Placeholder]) -> Vec<&str> {
    placeholders
        .iter()
        .filter_map(|p| match &p.kind {
            PlaceholderKind::Named(name) => Some(name.as_str()),
            PlaceholderKind::Positional => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(sql: &str) -> Vec<PlaceholderKind> {
        scan(sql).into_iter().map(|p| p.kind).collect()
    }

    #[test]
    fn test_positional() {
        let found = scan("SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(positional_count(&found), 2);
        assert_eq!(found[0].span, 26..27);
    }

    #[test]
    fn test_named() {
        assert_eq!(
            kinds("SELECT * FROM t WHERE id = :id AND (x, y) IN ((:x_1, :y))"),
            vec![
                PlaceholderKind::Named("id".to_string()),
                PlaceholderKind::Named("x_1".to_string()),
                PlaceholderKind::Named("y".to_string()),
            ]
        );
    }

    #[test]
    fn test_ignores_literals_and_identifiers() {
        assert!(scan("SELECT 'what?', 'it''s :x', \"odd?col\" FROM t").is_empty());
        assert!(scan(r"SELECT 'back\'slash ?' FROM t").is_empty());
    }

    #[test]
    fn test_ignores_comments_and_dollar_blocks() {
        let sql = "SELECT 1 -- really?\n/* :nope */ // why?\nFROM t WHERE $$ ? $$ = ?";
        assert_eq!(kinds(sql), vec![PlaceholderKind::Positional]);
    }

    #[test]
    fn test_casts_and_paths_are_not_placeholders() {
        assert!(scan("SELECT v:customer.name::string, arr[0]:x FROM t").is_empty());
        assert!(scan("SELECT \"Col\":field FROM t").is_empty());
    }

    #[test]
    fn test_unterminated_literal_swallows_rest() {
        assert!(scan("SELECT 'oops ? FROM t").is_empty());
    }

    #[test]
    fn test_named_helper_keeps_duplicates() {
        let found = scan("SELECT :a, :b, :a");
        assert_eq!(named(&found), vec!["a", "b", "a"]);
    }
}
