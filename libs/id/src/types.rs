//! Identifier definitions for the fleet updater.
//!
//! All three types are validated wrappers over externally supplied strings:
//! node names and partition keys come from the cluster, version identifiers
//! from the update source.

use crate::string_id;
use crate::IdError;

string_id!(NodeName, "node name", validate_node_name);
string_id!(PartitionKey, "partition key", validate_partition_key);
string_id!(VersionId, "version identifier", validate_version_id);

impl PartitionKey {
    /// The partition used for nodes that carry no grouping label.
    pub fn unpartitioned() -> Self {
        Self("default".to_string())
    }
}

/// Maximum length of a node name (DNS subdomain limit).
const NODE_NAME_MAX: usize = 253;

/// Maximum length of a partition key (label value limit).
const PARTITION_KEY_MAX: usize = 63;

/// Maximum length of a version identifier.
const VERSION_ID_MAX: usize = 128;

/// Validates a DNS-subdomain-style node name: lowercase alphanumerics,
/// `-` and `.`, starting and ending alphanumeric.
fn validate_node_name(s: &str) -> Result<(), IdError> {
    validate(
        s,
        NodeName::KIND,
        NODE_NAME_MAX,
        |c| c.is_ascii_lowercase() || c.is_ascii_digit(),
        |c| c == '-' || c == '.',
    )
}

/// Validates a partition key: alphanumerics, `-`, `_` and `.`, starting and
/// ending alphanumeric. Matches the label-value rules of common cluster APIs.
fn validate_partition_key(s: &str) -> Result<(), IdError> {
    validate(
        s,
        PartitionKey::KIND,
        PARTITION_KEY_MAX,
        |c| c.is_ascii_alphanumeric(),
        |c| c == '-' || c == '_' || c == '.',
    )
}

/// Validates a version identifier: opaque, but bounded and restricted to
/// printable ASCII without whitespace so it is safe in logs and URLs.
fn validate_version_id(s: &str) -> Result<(), IdError> {
    validate(
        s,
        VersionId::KIND,
        VERSION_ID_MAX,
        |c| c.is_ascii_alphanumeric(),
        |c| matches!(c, '-' | '_' | '.' | '+' | ':'),
    )
}

fn validate(
    s: &str,
    kind: &'static str,
    max: usize,
    boundary: impl Fn(char) -> bool,
    interior: impl Fn(char) -> bool,
) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty { kind });
    }
    if s.len() > max {
        return Err(IdError::TooLong {
            kind,
            len: s.len(),
            max,
        });
    }
    for c in s.chars() {
        if !boundary(c) && !interior(c) {
            return Err(IdError::InvalidCharacter { kind, ch: c });
        }
    }
    // First and last character must be from the strict set.
    let first = s.chars().next().unwrap_or(' ');
    let last = s.chars().last().unwrap_or(' ');
    if !boundary(first) || !boundary(last) {
        return Err(IdError::InvalidBoundary { kind });
    }
    Ok(())
}
