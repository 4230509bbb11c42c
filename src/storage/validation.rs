//! Username and cost validation
//!
//! Predicates shared by the store, the cache service and the offline editor.

/// Lowest bcrypt work factor accepted anywhere in the crate.
pub const MIN_COST: u32 = 4;

/// Highest bcrypt work factor accepted anywhere in the crate.
pub const MAX_COST: u32 = 31;

/// Cost used when a credential file carries no cost line.
pub const DEFAULT_COST: u32 = 10;

/// Separates the username from the hash on a record line.
pub const FIELD_SEPARATOR: char = ':';

/// Prefix marking the cost line.
pub const COST_PREFIX: char = '$';

/// Longest username accepted, in bytes.
pub const MAX_USERNAME_LENGTH: usize = 255;

/// Returns true if `name` can be stored as a username.
///
/// Rejects empty names, names containing whitespace, control characters or
/// the field separator, and names starting with the cost prefix (such a
/// line would be read back as a cost line).
pub fn username_is_valid(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_USERNAME_LENGTH
        && !name.starts_with(COST_PREFIX)
        && !name
            .chars()
            .any(|c| c == FIELD_SEPARATOR || c.is_whitespace() || c.is_control())
}

/// Returns true if `cost` is an acceptable bcrypt work factor.
pub fn cost_is_valid(cost: u32) -> bool {
    (MIN_COST..=MAX_COST).contains(&cost)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_names() {
        assert!(username_is_valid("alice"));
        assert!(username_is_valid("bob.smith@example.org"));
        assert!(username_is_valid("jörg"));
    }

    #[test]
    fn test_rejects_bad_names() {
        assert!(!username_is_valid(""));
        assert!(!username_is_valid("has space"));
        assert!(!username_is_valid("tab\tbed"));
        assert!(!username_is_valid("colon:name"));
        assert!(!username_is_valid("$10"));
        assert!(!username_is_valid("line\nbreak"));
        assert!(!username_is_valid(&"x".repeat(MAX_USERNAME_LENGTH + 1)));
    }

    #[test]
    fn test_cost_bounds() {
        assert!(!cost_is_valid(3));
        assert!(cost_is_valid(4));
        assert!(cost_is_valid(31));
        assert!(!cost_is_valid(32));
    }
}
