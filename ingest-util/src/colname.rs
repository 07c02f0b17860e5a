//! Validation for column names auto-created from line-protocol entities.
//!
//! Column names come directly off the wire (tag keys, field keys) and are
//! used as directory/file-name components on disk, so a small set of
//! characters is disallowed even though the line-protocol parser itself
//! would have accepted them.

const DISALLOWED: &[char] = &[
    '.', '?', ',', '\'', '"', '\\', '/', '\0', ':', ')', '(', '+', '-', '*', '%', '~', '\u{FEFF}',
];

/// Returns `true` if `name` is usable as a column name.
///
/// A name is valid if it is non-empty, contains no ASCII control characters,
/// and contains none of the characters reserved because they are unsafe in a
/// file path or ambiguous in the line-protocol grammar.
pub fn is_valid_column_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    name.chars()
        .all(|c| !c.is_control() && !DISALLOWED.contains(&c))
}
