//! Storage key layout
//!
//! Byte layout of every namespace entry. Keys are fixed size per model and
//! references, index descriptors and index values are prefix-free, so plain
//! concatenation is unambiguous and prefix iteration selects exactly one
//! record, one reference subtree, or one index value.
//!
//! | Namespace | Key | Value |
//! |---|---|---|
//! | Existence | key | creation version |
//! | Table | key + qualifier | version + stored value |
//! | Historic table | key + qualifier + inverted version | stored value |
//! | Index | index ref + index value + key | version |
//! | Historic index | index ref + index value + key + inverted version | empty or `[0x00]` |
//! | Unique | field ref + value | version + key |
//! | Historic unique | field ref + value + inverted version | key, or empty when released |

use crate::error::{CoreError, Result};
use crate::version::{Version, VERSION_SIZE};

/// Historic index value marking membership
pub const INDEX_PRESENT: &[u8] = &[];
/// Historic index value marking removal
pub const INDEX_REMOVED: &[u8] = &[0x00];

fn concat(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

/// Latest-table key of a qualifier
pub fn table_key(key: &[u8], qualifier: &[u8]) -> Vec<u8> {
    concat(&[key, qualifier])
}

/// Historic-table key of a qualifier at a version
pub fn historic_table_key(key: &[u8], qualifier: &[u8], version: Version) -> Vec<u8> {
    concat(&[key, qualifier, &version.to_inverted_bytes()])
}

/// Split a historic-table key into qualifier and version
pub fn split_historic_table_key(key_size: usize, entry: &[u8]) -> Result<(&[u8], Version)> {
    if entry.len() < key_size + VERSION_SIZE {
        return Err(CoreError::codec("historic table key too short"));
    }
    let split = entry.len() - VERSION_SIZE;
    Ok((
        &entry[key_size..split],
        Version::from_inverted_bytes(&entry[split..])?,
    ))
}

/// Index entry key
pub fn index_key(index_ref: &[u8], value: &[u8], key: &[u8]) -> Vec<u8> {
    concat(&[index_ref, value, key])
}

/// Historic index entry key
pub fn historic_index_key(index_ref: &[u8], value: &[u8], key: &[u8], version: Version) -> Vec<u8> {
    concat(&[index_ref, value, key, &version.to_inverted_bytes()])
}

/// Split an index entry key into index value and record key
pub fn split_index_key<'a>(index_ref: &[u8], key_size: usize, entry: &'a [u8]) -> Result<(&'a [u8], &'a [u8])> {
    if entry.len() < index_ref.len() + key_size {
        return Err(CoreError::codec("index key too short"));
    }
    let split = entry.len() - key_size;
    Ok((&entry[index_ref.len()..split], &entry[split..]))
}

/// Unique entry key
pub fn unique_key(field_ref: &[u8], value: &[u8]) -> Vec<u8> {
    concat(&[field_ref, value])
}

/// Historic unique entry key
pub fn historic_unique_key(field_ref: &[u8], value: &[u8], version: Version) -> Vec<u8> {
    concat(&[field_ref, value, &version.to_inverted_bytes()])
}

/// Unique entry value
pub fn unique_value(version: Version, key: &[u8]) -> Vec<u8> {
    concat(&[&version.to_bytes(), key])
}

/// Split a unique entry value into binding version and key
pub fn split_unique_value(bytes: &[u8]) -> Result<(Version, &[u8])> {
    Ok((Version::from_bytes(bytes)?, &bytes[VERSION_SIZE..]))
}
