//! Validation functions for write commands.

use crate::constants::MAX_BATCH_KEYS;
use crate::constants::MAX_KEY_SIZE;
use crate::constants::MAX_VALUE_SIZE;
use crate::error::KeyValueStoreError;
use crate::write::BatchOperation;
use crate::write::WriteCommand;

fn check_key(key: &str) -> Result<(), KeyValueStoreError> {
    if key.is_empty() {
        return Err(KeyValueStoreError::EmptyKey);
    }
    let len = key.len();
    if len > MAX_KEY_SIZE as usize {
        return Err(KeyValueStoreError::KeyTooLarge {
            size: len as u32,
            max: MAX_KEY_SIZE,
        });
    }
    Ok(())
}

fn check_value(value: &str) -> Result<(), KeyValueStoreError> {
    let len = value.len();
    if len > MAX_VALUE_SIZE as usize {
        return Err(KeyValueStoreError::ValueTooLarge {
            size: len as u32,
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

fn check_batch_len(len: usize) -> Result<(), KeyValueStoreError> {
    if len > MAX_BATCH_KEYS as usize {
        return Err(KeyValueStoreError::BatchTooLarge {
            size: len as u32,
            max: MAX_BATCH_KEYS,
        });
    }
    Ok(())
}

/// Validate a write command against fixed size limits.
pub fn validate_write_command(command: &WriteCommand) -> Result<(), KeyValueStoreError> {
    match command {
        WriteCommand::Set { key, value } => {
            check_key(key)?;
            check_value(value)?;
        }
        WriteCommand::CompareAndSwap {
            key,
            expected,
            new_value,
        } => {
            check_key(key)?;
            if let Some(exp) = expected {
                check_value(exp)?;
            }
            check_value(new_value)?;
        }
        WriteCommand::Batch { operations } => {
            check_batch_len(operations.len())?;
            for op in operations {
                match op {
                    BatchOperation::Set { key, value } => {
                        check_key(key)?;
                        check_value(value)?;
                    }
                    BatchOperation::Delete { key } => check_key(key)?,
                }
            }
        }
    }
    Ok(())
}
