//! Object Names: parsing and the canonical quoting rule
//!
//! A name is an object identifier optionally preceded by a schema
//! (`scenic.searches`). Each part is quoted independently, and only when it
//! falls outside `[a-zA-Z_][a-zA-Z0-9_]*`:
//!
//! ```text
//! searches                       -> searches
//! search in a haystack           -> "search in a haystack"
//! scenic + search in a haystack  -> scenic."search in a haystack"
//! ```
//!
//! Objects in `public` render without a schema prefix. DDL statements use
//! [`SchemaObjectName::to_sql`], which always quotes so the exact spelling
//! reaches the server.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::config::DEFAULT_NAMESPACE;
use crate::error::{SchemaDefError, SchemaDefResult};

static PLAIN_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("identifier pattern compiles"));

/// Quote `ident` unless it is a plain identifier
pub fn quote_identifier_if_needed(ident: &str) -> String {
    if PLAIN_IDENTIFIER.is_match(ident) {
        ident.to_string()
    } else {
        quote_identifier(ident)
    }
}

/// Always double-quote `ident`, doubling embedded quotes
pub fn quote_identifier(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Render `value` as a standard-conforming SQL string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Schema-qualified object name, stored unquoted
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SchemaObjectName {
    schema: Option<String>,
    object: String,
}

impl SchemaObjectName {
    pub fn new(schema: Option<&str>, object: &str) -> Self {
        Self {
            schema: schema.map(str::to_string),
            object: object.to_string(),
        }
    }

    /// Name for a catalog row; objects in `public` stay unqualified
    pub fn from_catalog(namespace: &str, object: &str) -> Self {
        if namespace == DEFAULT_NAMESPACE {
            Self::new(None, object)
        } else {
            Self::new(Some(namespace), object)
        }
    }

    /// Parse a user-supplied name such as `scenic."search in a haystack"`.
    ///
    /// Quoted parts may contain dots and `""` escapes; bare parts are taken
    /// literally (no case folding).
    pub fn parse(input: &str) -> SchemaDefResult<Self> {
        let parts = split_qualified(input)?;

        match parts.as_slice() {
            [object] => Ok(Self::new(None, object)),
            [schema, object] => Ok(Self::new(Some(schema), object)),
            _ => Err(SchemaDefError::InvalidObjectName {
                name: input.to_string(),
                reason: format!("expected 'object' or 'schema.object', found {} parts", parts.len()),
            }),
        }
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    /// Minimally-quoted, namespace-qualified rendering
    pub fn canonical(&self) -> String {
        match self.schema.as_deref() {
            Some(schema) if schema != DEFAULT_NAMESPACE => format!(
                "{}.{}",
                quote_identifier_if_needed(schema),
                quote_identifier_if_needed(&self.object)
            ),
            _ => quote_identifier_if_needed(&self.object),
        }
    }

    /// Unquoted `schema.object` as used for definition file names; `public`
    /// is left off
    pub fn logical_name(&self) -> String {
        match self.schema.as_deref() {
            Some(schema) if schema != DEFAULT_NAMESPACE => format!("{}.{}", schema, self.object),
            _ => self.object.clone(),
        }
    }

    /// Fully-quoted rendering for DDL
    pub fn to_sql(&self) -> String {
        match self.schema.as_deref() {
            Some(schema) => format!("{}.{}", quote_identifier(schema), quote_identifier(&self.object)),
            None => quote_identifier(&self.object),
        }
    }
}

impl PartialEq for SchemaObjectName {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Hash for SchemaObjectName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl fmt::Display for SchemaObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for SchemaObjectName {
    type Err = SchemaDefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<SchemaObjectName> for String {
    fn from(name: SchemaObjectName) -> Self {
        name.canonical()
    }
}

impl TryFrom<String> for SchemaObjectName {
    type Error = SchemaDefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

/// Split on dots outside double quotes, unquoting each part
fn split_qualified(input: &str) -> SchemaDefResult<Vec<String>> {
    let invalid = |reason: &str| SchemaDefError::InvalidObjectName {
        name: input.to_string(),
        reason: reason.to_string(),
    };

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = input.trim().chars().peekable();
    let mut quoted_part = false;

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if !current.is_empty() {
                    return Err(invalid("quote in the middle of an identifier"));
                }
                quoted_part = true;
                loop {
                    match chars.next() {
                        Some('"') if chars.peek() == Some(&'"') => {
                            chars.next();
                            current.push('"');
                        }
                        Some('"') => break,
                        Some(c) => current.push(c),
                        None => return Err(invalid("unterminated quoted identifier")),
                    }
                }
                if !matches!(chars.peek(), None | Some('.')) {
                    return Err(invalid("characters after closing quote"));
                }
            }
            '.' => {
                if current.is_empty() && !quoted_part {
                    return Err(invalid("empty name part"));
                }
                parts.push(std::mem::take(&mut current));
                quoted_part = false;
            }
            c => current.push(c),
        }
    }

    if current.is_empty() && !quoted_part {
        return Err(invalid("empty name part"));
    }
    parts.push(current);

    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::testing::{assert_error_contains, assert_error_sqlstate};

    #[test]
    fn test_plain_identifiers_are_never_quoted() {
        assert_eq!(quote_identifier_if_needed("searches"), "searches");
        assert_eq!(quote_identifier_if_needed("_private2"), "_private2");
        assert_eq!(quote_identifier_if_needed("MixedCase"), "MixedCase");
    }

    #[test]
    fn test_other_identifiers_are_fully_quoted() {
        assert_eq!(quote_identifier_if_needed("search in a haystack"), "\"search in a haystack\"");
        assert_eq!(quote_identifier_if_needed("2fast"), "\"2fast\"");
        assert_eq!(quote_identifier_if_needed("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_quote_literal_doubles_quotes() {
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_parse_bare_name() {
        let name = SchemaObjectName::parse("greetings").unwrap();
        assert_eq!(name.schema(), None);
        assert_eq!(name.object(), "greetings");
        assert_eq!(name.canonical(), "greetings");
        assert_eq!(name.to_sql(), "\"greetings\"");
    }

    #[test]
    fn test_parse_qualified_quoted_name() {
        let name = SchemaObjectName::parse("scenic.\"search in a haystack\"").unwrap();
        assert_eq!(name.schema(), Some("scenic"));
        assert_eq!(name.object(), "search in a haystack");
        assert_eq!(name.canonical(), "scenic.\"search in a haystack\"");
        assert_eq!(name.to_sql(), "\"scenic\".\"search in a haystack\"");
    }

    #[test]
    fn test_parse_quoted_part_with_dot_and_escape() {
        let name = SchemaObjectName::parse("\"a.b\".\"say \"\"hi\"\"\"").unwrap();
        assert_eq!(name.schema(), Some("a.b"));
        assert_eq!(name.object(), "say \"hi\"");
    }

    #[test]
    fn test_parse_rejects_malformed_names() {
        for bad in ["", "a..b", "a.b.c", "\"open", "\"x\"y", "ab\"c\"", "a."] {
            assert!(SchemaObjectName::parse(bad).is_err(), "{bad:?} should be rejected");
        }

        assert_error_sqlstate(SchemaObjectName::parse("a.b.c"), "42602");
        assert_error_contains(SchemaObjectName::parse("a.b.c"), "found 3 parts");
    }

    #[test]
    fn test_logical_name_is_unquoted() {
        assert_eq!(SchemaObjectName::parse("searches").unwrap().logical_name(), "searches");
        assert_eq!(SchemaObjectName::parse("public.searches").unwrap().logical_name(), "searches");
        assert_eq!(
            SchemaObjectName::parse("scenic.\"search in a haystack\"").unwrap().logical_name(),
            "scenic.search in a haystack"
        );
    }

    #[test]
    fn test_canonical_quoting_is_idempotent() {
        for input in [
            "greetings",
            "scenic.parents",
            "\"search in a haystack\"",
            "scenic.\"search in a haystack\"",
            "my view",
            "\"Weird\"\"Name\"",
        ] {
            let once = SchemaObjectName::parse(input).unwrap().canonical();
            let twice = SchemaObjectName::parse(&once).unwrap().canonical();
            assert_eq!(once, twice, "quoting {input:?} twice changed it");
        }
    }

    #[test]
    fn test_catalog_names_drop_public() {
        assert_eq!(SchemaObjectName::from_catalog("public", "parents").canonical(), "parents");
        assert_eq!(SchemaObjectName::from_catalog("scenic", "parents").canonical(), "scenic.parents");
        assert_eq!(
            SchemaObjectName::from_catalog("my schema", "kids").canonical(),
            "\"my schema\".kids"
        );
    }

    #[test]
    fn test_explicit_public_equals_bare_name() {
        let explicit = SchemaObjectName::parse("public.greetings").unwrap();
        let bare = SchemaObjectName::parse("greetings").unwrap();

        assert_eq!(explicit, bare);
        assert_eq!(explicit.to_sql(), "\"public\".\"greetings\"");
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let name = SchemaObjectName::parse("scenic.\"search in a haystack\"").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, r#""scenic.\"search in a haystack\"""#);

        let back: SchemaObjectName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }
}
