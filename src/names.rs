//! Channel name validation.
//!
//! A valid name starts with an ASCII letter or underscore and continues with
//! ASCII letters, digits or underscores. Within a batch names must be
//! distinct, and a name may not collide with a stored channel under a
//! different key.

use std::collections::HashMap;

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::error::Result;
use crate::key::Key;

/// Check a single name's syntax.
pub fn validate_name(path: &str, name: &str) -> Result<()> {
    let invalid = |reason: &str| ChannelError::InvalidName {
        path: path.to_string(),
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(invalid("name is required"));
    };
    if first.is_ascii_digit() {
        return Err(invalid("must not start with a digit"));
    }
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(invalid("must start with a letter or underscore"));
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(invalid(&format!("contains invalid character '{bad}'")));
    }
    Ok(())
}

/// A name proposed for a channel, with the channel's current key.
///
/// New channels carry an unassigned key.
#[derive(Debug, Clone, Copy)]
pub struct ProposedName<'a> {
    pub key: Key,
    pub name: &'a str,
}

/// Validate a batch of names against each other and against stored channels.
///
/// `existing` holds the stored channels whose names appear in the batch.
/// With `skip_existing` set, collisions with stored channels are allowed;
/// the caller resolves them by retrieval or overwrite. `field` names the
/// request field used in error paths.
pub fn validate_batch_names(
    field: &str,
    proposed: &[ProposedName<'_>],
    existing: &[Channel],
    skip_existing: bool,
) -> Result<()> {
    let mut seen: HashMap<&str, usize> = HashMap::with_capacity(proposed.len());
    for (i, p) in proposed.iter().enumerate() {
        validate_name(&format!("{field}[{i}]"), p.name)?;
        if let Some(first) = seen.insert(p.name, i) {
            return Err(ChannelError::DuplicateName {
                name: p.name.to_string(),
                first,
                second: i,
            });
        }
    }

    if skip_existing {
        return Ok(());
    }
    for p in proposed {
        if let Some(other) = existing.iter().find(|c| c.name == p.name && c.key() != p.key) {
            return Err(ChannelError::NameConflict {
                name: p.name.to_string(),
                existing: other.key(),
            });
        }
    }
    Ok(())
}
