//! Credential records and the line-oriented file format
//!
//! A credential file holds one cost line (`$<cost>`) and one `username:hash`
//! line per user. Parsing is strict: anything that is neither a blank line,
//! the cost line, nor a well-formed record aborts with `CorruptFormat`.

use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::storage::validation::{
    COST_PREFIX, DEFAULT_COST, FIELD_SEPARATOR, cost_is_valid, username_is_valid,
};

/// A single `(username, bcrypt hash)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    username: String,
    hash: String,
}

impl CredentialRecord {
    /// Creates a record, rejecting usernames that cannot be stored.
    pub fn new(username: impl Into<String>, hash: impl Into<String>) -> Result<Self, StoreError> {
        let username = username.into();
        if !username_is_valid(&username) {
            return Err(StoreError::InvalidUsername(username));
        }
        Ok(Self {
            username,
            hash: hash.into(),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Renders the record as a newline-terminated file line.
    pub fn to_line(&self) -> String {
        format!("{}{}{}\n", self.username, FIELD_SEPARATOR, self.hash)
    }
}

/// Parsed content of a credential file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreContents {
    pub cost: u32,
    pub records: BTreeMap<String, String>,
}

impl Default for StoreContents {
    fn default() -> Self {
        Self {
            cost: DEFAULT_COST,
            records: BTreeMap::new(),
        }
    }
}

impl StoreContents {
    /// Parses the full text of a credential file.
    pub fn parse(text: &str) -> Result<Self, StoreError> {
        let mut contents = StoreContents::default();
        let mut seen_cost = false;

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(digits) = line.strip_prefix(COST_PREFIX) {
                if seen_cost {
                    return Err(corrupt(line_no, "more than one cost line"));
                }
                contents.cost = parse_cost(digits).ok_or_else(|| {
                    corrupt(line_no, format!("invalid cost line {line:?}"))
                })?;
                seen_cost = true;
                continue;
            }

            let (username, hash) = split_record(line)
                .ok_or_else(|| corrupt(line_no, "expected exactly one ':' separator"))?;
            if !username_is_valid(username) {
                return Err(corrupt(line_no, format!("invalid username {username:?}")));
            }
            if hash.is_empty() {
                return Err(corrupt(line_no, format!("empty hash for {username:?}")));
            }
            if contents
                .records
                .insert(username.to_string(), hash.to_string())
                .is_some()
            {
                return Err(StoreError::DuplicateUsername(username.to_string()));
            }
        }

        Ok(contents)
    }

    /// Renders a cost line followed by one line per record.
    pub fn render<'a>(
        cost: u32,
        records: impl IntoIterator<Item = &'a CredentialRecord>,
    ) -> String {
        let mut out = format!("{COST_PREFIX}{cost}\n");
        for record in records {
            out.push_str(&record.to_line());
        }
        out
    }

    /// Returns the records as owned `CredentialRecord`s in username order.
    pub fn to_records(&self) -> Vec<CredentialRecord> {
        self.records
            .iter()
            .map(|(username, hash)| CredentialRecord {
                username: username.clone(),
                hash: hash.clone(),
            })
            .collect()
    }
}

/// Parses the digits following `$`, returning `None` unless they form a valid cost.
pub(crate) fn parse_cost(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u32>().ok().filter(|cost| cost_is_valid(*cost))
}

/// Splits a record line into trimmed `(username, hash)`.
pub(crate) fn split_record(line: &str) -> Option<(&str, &str)> {
    let mut fields = line.split(FIELD_SEPARATOR);
    match (fields.next(), fields.next(), fields.next()) {
        (Some(username), Some(hash), None) => Some((username.trim(), hash.trim())),
        _ => None,
    }
}

fn corrupt(line: usize, reason: impl Into<String>) -> StoreError {
    StoreError::CorruptFormat {
        line,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH_A: &str = "$2b$04$abcdefghijklmnopqrstuuJ1k6bA0o0q3dJ6h2bqkz8a6b2wX9y1K";
    const HASH_B: &str = "$2b$04$zyxwvutsrqponmlkjihgfeO7yQ0PZ0yYhKXvYcVxVqvZHjH7g8G3a";

    #[test]
    fn test_parse_cost_and_records() {
        let text = format!("$12\nalice:{HASH_A}\nbob:{HASH_B}\n");
        let contents = StoreContents::parse(&text).unwrap();
        assert_eq!(contents.cost, 12);
        assert_eq!(contents.records.len(), 2);
        assert_eq!(contents.records["alice"], HASH_A);
    }

    #[test]
    fn test_cost_line_need_not_be_first() {
        let text = format!("alice:{HASH_A}\n\n$7\n");
        let contents = StoreContents::parse(&text).unwrap();
        assert_eq!(contents.cost, 7);
        assert!(contents.records.contains_key("alice"));
    }

    #[test]
    fn test_missing_cost_uses_default() {
        let contents = StoreContents::parse("").unwrap();
        assert_eq!(contents.cost, DEFAULT_COST);
        assert!(contents.records.is_empty());
    }

    #[test]
    fn test_malformed_line_is_corrupt() {
        let err = StoreContents::parse("$10\njust-a-name\n").unwrap_err();
        assert!(matches!(err, StoreError::CorruptFormat { line: 2, .. }));

        let err = StoreContents::parse("$10\na:b:c\n").unwrap_err();
        assert!(matches!(err, StoreError::CorruptFormat { line: 2, .. }));
    }

    #[test]
    fn test_bad_cost_lines_are_corrupt() {
        assert!(matches!(
            StoreContents::parse("$abc\n"),
            Err(StoreError::CorruptFormat { line: 1, .. })
        ));
        assert!(matches!(
            StoreContents::parse("$99\n"),
            Err(StoreError::CorruptFormat { line: 1, .. })
        ));
        assert!(matches!(
            StoreContents::parse("$10\n$11\n"),
            Err(StoreError::CorruptFormat { line: 2, .. })
        ));
    }

    #[test]
    fn test_duplicate_username_is_rejected() {
        let text = format!("$10\nalice:{HASH_A}\nalice:{HASH_B}\n");
        assert!(matches!(
            StoreContents::parse(&text),
            Err(StoreError::DuplicateUsername(name)) if name == "alice"
        ));
    }

    #[test]
    fn test_render_writes_cost_first() {
        let records = vec![
            CredentialRecord::new("alice", HASH_A).unwrap(),
            CredentialRecord::new("bob", HASH_B).unwrap(),
        ];
        let text = StoreContents::render(9, &records);
        assert_eq!(text, format!("$9\nalice:{HASH_A}\nbob:{HASH_B}\n"));
    }

    #[test]
    fn test_record_rejects_invalid_username() {
        assert!(matches!(
            CredentialRecord::new("bad name", HASH_A),
            Err(StoreError::InvalidUsername(_))
        ));
    }
}
