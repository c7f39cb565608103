// src/content_type.rs

//! MIME-like content types used to route payloads to executors.
//!
//! The textual form is `type/subtype[;key=value,...]`. Parameters carry
//! executor directives (`command`, `prompt`, `prompt-assign`, `disable-pty`)
//! and take part in compatibility checks via [`ContentType::is_ancestor_of`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use crate::errors::ContentTypeError;

/// Directive naming the interpreter binary to launch.
pub const PARAM_COMMAND: &str = "command";
/// Directive carrying the interpreter's prompt text.
pub const PARAM_PROMPT: &str = "prompt";
/// Directive carrying the statement that makes the interpreter show `prompt`.
pub const PARAM_PROMPT_ASSIGN: &str = "prompt-assign";
/// Directive suppressing pseudo-terminal allocation.
pub const PARAM_DISABLE_PTY: &str = "disable-pty";

/// Parsed content type. Immutable; specialise through [`ContentType::with_param`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentType {
    kind: String,
    subtype: String,
    params: BTreeMap<String, String>,
}

impl ContentType {
    pub fn new(kind: &str, subtype: &str) -> Self {
        Self {
            kind: kind.trim().to_lowercase(),
            subtype: subtype.trim().to_lowercase(),
            params: BTreeMap::new(),
        }
    }

    pub fn parse(s: &str) -> Result<Self, ContentTypeError> {
        s.parse()
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// `true` when the parameter is present and spelled like a true boolean.
    pub fn flag(&self, key: &str) -> bool {
        matches!(
            self.param(key).map(|v| v.to_ascii_lowercase()),
            Some(ref v) if v == "true" || v == "1" || v == "yes"
        )
    }

    /// `type/subtype` without parameters.
    pub fn essence(&self) -> String {
        format!("{}/{}", self.kind, self.subtype)
    }

    /// A copy of `self` with `key` set to `value`.
    pub fn with_param(&self, key: &str, value: &str) -> Self {
        let mut cloned = self.clone();
        cloned
            .params
            .insert(key.trim().to_lowercase(), value.trim().to_string());
        cloned
    }

    /// Whether `self` can serve `other`.
    ///
    /// Type and subtype must be equal, and every parameter of `self` must be
    /// present with the same value in `other.params` or, failing that, in
    /// `extra_params` (used when both sides were defaulted differently).
    pub fn is_ancestor_of(
        &self,
        other: &ContentType,
        extra_params: Option<&BTreeMap<String, String>>,
    ) -> bool {
        if self.kind != other.kind || self.subtype != other.subtype {
            return false;
        }

        self.params.iter().all(|(key, value)| {
            other
                .params
                .get(key)
                .or_else(|| extra_params.and_then(|extra| extra.get(key)))
                .is_some_and(|v| v == value)
        })
    }
}

impl FromStr for ContentType {
    type Err = ContentTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ContentTypeError::Empty);
        }

        let (essence, rest) = match s.split_once(';') {
            Some((essence, rest)) => (essence, Some(rest)),
            None => (s, None),
        };

        let (kind, subtype) = essence
            .split_once('/')
            .filter(|(k, st)| !k.trim().is_empty() && !st.trim().is_empty())
            .ok_or_else(|| ContentTypeError::MissingSubtype(s.to_string()))?;

        let mut ct = ContentType::new(kind, subtype);

        if let Some(rest) = rest {
            for (key, value) in parse_params(rest)? {
                ct.params.insert(key, value);
            }
        }

        Ok(ct)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.subtype)?;
        for (i, (key, value)) in self.params.iter().enumerate() {
            let sep = if i == 0 { ';' } else { ',' };
            if needs_quoting(value) {
                write!(f, "{sep}{key}=\"")?;
                for c in value.chars() {
                    if c == '"' || c == '\\' {
                        write!(f, "\\")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, "\"")?;
            } else {
                write!(f, "{sep}{key}={value}")?;
            }
        }
        Ok(())
    }
}

fn needs_quoting(value: &str) -> bool {
    value.contains([';', ',', '"', '\\']) || value.trim() != value
}

/// Split `key=value` pairs.
///
/// `;` always separates. `,` separates only when a `key=` follows it, so
/// unquoted values like `prompt-assign=SELECT 1, 2` survive. Values may be
/// double-quoted, with `\` escapes, to carry any separator.
fn parse_params(rest: &str) -> Result<Vec<(String, String)>, ContentTypeError> {
    let mut params = Vec::new();
    let mut pos = 0;

    while pos < rest.len() {
        let tail = &rest[pos..];
        let skipped = tail.len() - tail.trim_start_matches([';', ',', ' ', '\t']).len();
        pos += skipped;
        if pos >= rest.len() {
            break;
        }

        let tail = &rest[pos..];
        let key_end = tail.find(['=', ';', ',']).unwrap_or(tail.len());
        let key = tail[..key_end].trim();
        if !tail[key_end..].starts_with('=') || key.is_empty() {
            let raw_end = tail.find(';').unwrap_or(tail.len());
            return Err(ContentTypeError::MalformedParam(tail[..raw_end].to_string()));
        }
        pos += key_end + 1;

        let (value, consumed) = read_value(&rest[pos..])?;
        pos += consumed;
        params.push((key.to_lowercase(), value));
    }

    Ok(params)
}

/// Read one value; returns it and the number of bytes consumed.
fn read_value(tail: &str) -> Result<(String, usize), ContentTypeError> {
    let lead = tail.len() - tail.trim_start().len();
    let body = &tail[lead..];

    if let Some(quoted) = body.strip_prefix('"') {
        let mut value = String::new();
        let mut chars = quoted.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, escaped)) => value.push(escaped),
                    None => break,
                },
                '"' => {
                    let after = &quoted[i + 1..];
                    let trailing = after.len() - after.trim_start().len();
                    let next = &after[trailing..];
                    if !(next.is_empty() || next.starts_with([';', ','])) {
                        return Err(ContentTypeError::MalformedParam(body.to_string()));
                    }
                    return Ok((value, lead + 1 + i + 1 + trailing));
                }
                other => value.push(other),
            }
        }
        return Err(ContentTypeError::MalformedParam(body.to_string()));
    }

    let mut end = body.find(';').unwrap_or(body.len());
    let mut search = 0;
    while let Some(offset) = body[search..end].find(',') {
        let comma = search + offset;
        if starts_with_key(&body[comma + 1..]) {
            end = comma;
            break;
        }
        search = comma + 1;
    }

    Ok((body[..end].trim().to_string(), lead + end))
}

/// `true` when `s` begins with `key=` (after optional whitespace).
fn starts_with_key(s: &str) -> bool {
    let s = s.trim_start();
    let key_len = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(s.len());
    key_len > 0 && s[key_len..].trim_start().starts_with('=')
}

impl<'de> Deserialize<'de> for ContentType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_type_subtype_and_params() {
        let ct: ContentType = "Text/Bash;prompt=db>,Disable-Pty=true".parse().unwrap();
        assert_eq!(ct.kind(), "text");
        assert_eq!(ct.subtype(), "bash");
        assert_eq!(ct.param("prompt"), Some("db>"));
        assert!(ct.flag(PARAM_DISABLE_PTY));
        assert_eq!(ct.to_string(), "text/bash;disable-pty=true,prompt=db>");
    }

    #[test]
    fn commas_inside_values_are_kept() {
        let ct = ContentType::parse("text/sql;prompt=db>,prompt-assign=SELECT 1, 2;echo=SELECT")
            .unwrap();
        assert_eq!(ct.param("prompt"), Some("db>"));
        assert_eq!(ct.param(PARAM_PROMPT_ASSIGN), Some("SELECT 1, 2"));
        assert_eq!(ct.param("echo"), Some("SELECT"));
    }

    #[test]
    fn quoted_values_carry_separators() {
        let ct = ContentType::parse(r#"text/sql;echo="SELECT 'a;b', \"c\"" , prompt=> "#).unwrap();
        assert_eq!(ct.param("echo"), Some(r#"SELECT 'a;b', "c""#));
        assert_eq!(ct.param("prompt"), Some(">"));

        let shown = ct.to_string();
        assert_eq!(shown, r#"text/sql;echo="SELECT 'a;b', \"c\"",prompt=>"#);
        assert_eq!(ContentType::parse(&shown).unwrap(), ct);
    }

    #[test]
    fn unterminated_quote_is_malformed() {
        assert!(matches!(
            ContentType::parse(r#"text/sql;echo="SELECT"#),
            Err(ContentTypeError::MalformedParam(_))
        ));
        assert!(matches!(
            ContentType::parse(r#"text/sql;echo="a"b"#),
            Err(ContentTypeError::MalformedParam(_))
        ));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(ContentType::parse(""), Err(ContentTypeError::Empty));
        assert!(matches!(
            ContentType::parse("text"),
            Err(ContentTypeError::MissingSubtype(_))
        ));
        assert!(matches!(
            ContentType::parse("text/bash;oops"),
            Err(ContentTypeError::MalformedParam(_))
        ));
    }

    #[test]
    fn ancestor_requires_all_params() {
        let base = ContentType::parse("text/bash").unwrap();
        let with_prompt = ContentType::parse("text/bash;prompt=db>").unwrap();

        assert!(base.is_ancestor_of(&with_prompt, None));
        assert!(!with_prompt.is_ancestor_of(&base, None));
        assert!(!base.is_ancestor_of(&ContentType::parse("text/sh").unwrap(), None));
    }

    #[test]
    fn extra_params_fill_missing_values() {
        let ancestor = ContentType::parse("text/bash;command=bash").unwrap();
        let other = ContentType::parse("text/bash").unwrap();

        let mut extra = BTreeMap::new();
        extra.insert("command".to_string(), "bash".to_string());

        assert!(!ancestor.is_ancestor_of(&other, None));
        assert!(ancestor.is_ancestor_of(&other, Some(&extra)));
    }

    #[test]
    fn with_param_leaves_original_untouched() {
        let base = ContentType::parse("text/bash").unwrap();
        let specialised = base.with_param("prompt", "db>");
        assert!(base.params().is_empty());
        assert_eq!(specialised.param("prompt"), Some("db>"));
    }
}
