//! Scans
//!
//! A scan runs a [`ScanPlan`] against one snapshot and returns matching
//! record keys in plan order. Each candidate is checked in turn for
//! visibility at the read version, soft deletion and the filter. Filter
//! values are read lazily through the record's getter.
//!
//! A start key continues an earlier scan. Table scans resume at the key;
//! index scans resume at the start record's position in the index.

pub(crate) mod planner;

use std::cmp::Ordering;

use vellum_core::{Filter, RecordKey, Version};
use vellum_storage::{ColumnFamily, Direction, StoreSnapshot};

use crate::database::RegisteredModel;
use crate::error::Result;
use crate::index::{index_value, lookup_unique, lookup_unique_as_of, scan_index, scan_index_as_of, IndexHit};
use crate::reader::read_meta;
use crate::values_getter::{ReadGetter, ValuesGetter};

pub(crate) use planner::{plan_scan, ScanPlan};

/// Candidate checks and bounds of one scan
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScanOptions<'r> {
    pub filter: Option<&'r Filter>,
    pub as_of: Option<Version>,
    pub filter_soft_deleted: bool,
    /// Continuation key and whether it is returned itself
    pub start: Option<(&'r RecordKey, bool)>,
    pub limit: usize,
}

/// One matched record
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScanMatch {
    pub key: Vec<u8>,
    /// Index value, for index scans
    pub sort_key: Option<Vec<u8>>,
}

/// Check visibility, soft deletion and filter for one record
pub(crate) fn matches_record(
    snapshot: &StoreSnapshot,
    model: &RegisteredModel,
    key: &[u8],
    options: &ScanOptions<'_>,
) -> Result<bool> {
    let meta = match read_meta(snapshot, model, key, options.as_of)? {
        Some(meta) => meta,
        None => return Ok(false),
    };
    if meta.is_deleted && options.filter_soft_deleted {
        return Ok(false);
    }
    match options.filter {
        Some(filter) => {
            let mut getter = ReadGetter::new(model, snapshot, key, options.as_of);
            filter.matches(&mut |r| getter.value(r))
        }
        None => Ok(true),
    }
}

/// Whether `position` lies before the continuation point
fn before_start(ordering: Ordering, direction: Direction, include_start: bool) -> bool {
    match (ordering, direction) {
        (Ordering::Equal, _) => !include_start,
        (Ordering::Less, Direction::Forward) | (Ordering::Greater, Direction::Reverse) => true,
        _ => false,
    }
}

/// Run a plan, returning matches in plan order
pub(crate) fn execute(
    snapshot: &StoreSnapshot,
    model: &RegisteredModel,
    plan: &ScanPlan,
    options: &ScanOptions<'_>,
) -> Result<Vec<ScanMatch>> {
    let mut matches = Vec::new();
    if options.limit == 0 {
        return Ok(matches);
    }

    match plan {
        ScanPlan::Keys(keys) => {
            for key in keys {
                if !skip_key(key, Direction::Forward, options) {
                    collect(snapshot, model, key.clone(), None, options, &mut matches)?;
                }
                if matches.len() >= options.limit {
                    break;
                }
            }
        }
        ScanPlan::Unique { position, value } => {
            let def = &model.uniques[*position];
            let key = match options.as_of {
                Some(as_of) => lookup_unique_as_of(snapshot, model, def, value, as_of)?,
                None => lookup_unique(snapshot, model, def, value)?.map(|(_, key)| key),
            };
            if let Some(key) = key {
                if !skip_key(&key, Direction::Forward, options) {
                    collect(snapshot, model, key, None, options, &mut matches)?;
                }
            }
        }
        ScanPlan::Index {
            position,
            prefix,
            direction,
        } => {
            let def = &model.indexes[*position];
            let hits = match options.as_of {
                Some(as_of) => scan_index_as_of(snapshot, model, def, prefix, as_of, *direction)?,
                None => scan_index(snapshot, model, def, prefix, *direction)?,
            };
            let start = match options.start {
                Some((key, include)) => {
                    let mut getter = ReadGetter::new(model, snapshot, key.as_bytes(), options.as_of);
                    index_value(def, key.as_bytes(), &mut getter)?.map(|value| {
                        (
                            IndexHit {
                                value,
                                key: key.as_bytes().to_vec(),
                            },
                            include,
                        )
                    })
                }
                None => None,
            };
            for hit in hits {
                if let Some((start, include)) = &start {
                    let ordering = (&hit.value, &hit.key).cmp(&(&start.value, &start.key));
                    if before_start(ordering, *direction, *include) {
                        continue;
                    }
                }
                collect(snapshot, model, hit.key, Some(hit.value), options, &mut matches)?;
                if matches.len() >= options.limit {
                    break;
                }
            }
        }
        ScanPlan::Table { prefix, direction } => {
            for (key, _) in snapshot.scan_prefix(model.ns(ColumnFamily::Existence), prefix, *direction) {
                if skip_key(key, *direction, options) {
                    continue;
                }
                collect(snapshot, model, key.to_vec(), None, options, &mut matches)?;
                if matches.len() >= options.limit {
                    break;
                }
            }
        }
    }
    Ok(matches)
}

fn skip_key(key: &[u8], direction: Direction, options: &ScanOptions<'_>) -> bool {
    match options.start {
        Some((start, include)) => before_start(key.cmp(start.as_bytes()), direction, include),
        None => false,
    }
}

fn collect(
    snapshot: &StoreSnapshot,
    model: &RegisteredModel,
    key: Vec<u8>,
    sort_key: Option<Vec<u8>>,
    options: &ScanOptions<'_>,
    matches: &mut Vec<ScanMatch>,
) -> Result<()> {
    if matches_record(snapshot, model, &key, options)? {
        matches.push(ScanMatch { key, sort_key });
    }
    Ok(())
}
