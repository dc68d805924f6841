//! Scan planning
//!
//! Picks the cheapest access path for a filter and requested order:
//!
//! 1. Every derived-key property pinned by equality: fetch one key.
//! 2. A unique property pinned by equality: look the binding up.
//! 3. An order other than key order: the index whose components, after
//!    skipping equality-pinned leading ones, start with the order.
//! 4. No order, and equality pins a leading index prefix: scan that prefix.
//! 5. Otherwise walk the table, bounded by the pinned leading key prefix.
//!
//! Only scalar equality pins count; the filter still runs on every candidate.

use std::collections::BTreeMap;

use tracing::debug;

use vellum_core::schema::values_from_pins;
use vellum_core::{CoreError, Filter, IsIndexable, KeyDefinition, Reference, Value};
use vellum_storage::Direction;

use crate::database::RegisteredModel;
use crate::error::{Result, StoreError};

/// Access path of one scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScanPlan {
    /// Fetch these keys
    Keys(Vec<Vec<u8>>),
    /// Resolve a unique binding
    Unique {
        /// Position in the model's uniques
        position: usize,
        /// Pinned value
        value: Value,
    },
    /// Walk an index below a prefix
    Index {
        /// Position in the model's indexes
        position: usize,
        /// Encoded pinned leading components
        prefix: Vec<u8>,
        direction: Direction,
    },
    /// Walk record keys below a prefix
    Table { prefix: Vec<u8>, direction: Direction },
}

type Pins = BTreeMap<Reference, Value>;

fn scalar_pins(filter: Option<&Filter>) -> Pins {
    filter
        .map(Filter::equality_pins)
        .unwrap_or_default()
        .into_iter()
        .filter(|(_, v)| v.is_scalar())
        .collect()
}

/// Leading components resolvable from pins
fn pinned_leading(parts: &[IsIndexable], pins: &Pins) -> usize {
    parts
        .iter()
        .take_while(|p| p.single_reference().map_or(false, |r| pins.contains_key(r)))
        .count()
}

/// Encoded value of pinned leading components
fn pinned_prefix(parts: &[IsIndexable], pins: &Pins) -> Result<Vec<u8>> {
    if parts.is_empty() {
        return Ok(Vec::new());
    }
    let prefix = IsIndexable::multiple(parts.to_vec())
        .index_value::<CoreError, _>(&[], &mut |r| Ok(pins.get(r).cloned()))?;
    Ok(prefix.unwrap_or_default())
}

fn direction(descending: bool) -> Direction {
    if descending {
        Direction::Reverse
    } else {
        Direction::Forward
    }
}

fn is_key_order(order: &IsIndexable) -> bool {
    match order {
        IsIndexable::KeyBytes => true,
        IsIndexable::Multiple(parts) => parts.len() == 1 && is_key_order(&parts[0]),
        _ => false,
    }
}

/// Plan a scan over `model`
///
/// # Errors
///
/// Returns a request error when `order` names a property no index sorts by.
pub(crate) fn plan_scan(
    model: &RegisteredModel,
    filter: Option<&Filter>,
    order: Option<&IsIndexable>,
    descending: bool,
) -> Result<ScanPlan> {
    let pins = scalar_pins(filter);
    let plan = choose(model, &pins, order, descending)?;
    debug!(
        target: "vellum::scan",
        model = %model.name(),
        pins = pins.len(),
        plan = ?plan,
        "Scan planned"
    );
    Ok(plan)
}

fn choose(
    model: &RegisteredModel,
    pins: &Pins,
    order: Option<&IsIndexable>,
    descending: bool,
) -> Result<ScanPlan> {
    if let KeyDefinition::Derived(descriptor) = &model.model.key {
        let references = descriptor.references();
        if !references.is_empty() && references.iter().all(|r| pins.contains_key(*r)) {
            if let Some(key) = model.model.key.derive(&values_from_pins(pins.iter()))? {
                if key.len() == model.key_size {
                    return Ok(ScanPlan::Keys(vec![key.into_bytes()]));
                }
            }
        }
    }

    for (position, def) in model.uniques.iter().enumerate() {
        if let Some(value) = pins.get(&def.reference) {
            return Ok(ScanPlan::Unique {
                position,
                value: value.clone(),
            });
        }
    }

    match order {
        Some(order) if !is_key_order(order) => {
            let wanted = order.parts();
            for (position, def) in model.indexes.iter().enumerate() {
                let parts = def.descriptor.parts();
                let leading = pinned_leading(parts, pins);
                for skip in (0..=leading).rev() {
                    if parts[skip..].starts_with(wanted) {
                        return Ok(ScanPlan::Index {
                            position,
                            prefix: pinned_prefix(&parts[..skip], pins)?,
                            direction: direction(descending),
                        });
                    }
                }
            }
            Err(StoreError::request(format!(
                "no index of {} sorts by {:?}",
                model.name(),
                order
            )))
        }
        _ => {
            let order_by_key = order.is_some();
            if !order_by_key {
                let best = model
                    .indexes
                    .iter()
                    .enumerate()
                    .map(|(position, def)| (position, pinned_leading(def.descriptor.parts(), pins)))
                    .filter(|(_, leading)| *leading > 0)
                    .max_by_key(|(position, leading)| (*leading, std::cmp::Reverse(*position)));
                if let Some((position, leading)) = best {
                    let parts = model.indexes[position].descriptor.parts();
                    return Ok(ScanPlan::Index {
                        position,
                        prefix: pinned_prefix(&parts[..leading], pins)?,
                        direction: direction(descending),
                    });
                }
            }
            let prefix = match &model.model.key {
                KeyDefinition::Derived(descriptor) => {
                    let parts = descriptor.parts();
                    pinned_prefix(&parts[..pinned_leading(parts, pins)], pins)?
                }
                KeyDefinition::Uuid => Vec::new(),
            };
            Ok(ScanPlan::Table {
                prefix,
                direction: direction(descending),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ModelRegistry;
    use std::sync::Arc;
    use vellum_core::codec::encode_scalar;
    use vellum_core::{DataModel, PropertyDefinition, PropertyKind};

    fn model() -> Arc<RegisteredModel> {
        ModelRegistry::new()
            .register(
                DataModel::new(
                    "Event",
                    vec![
                        PropertyDefinition::new(1, "site", PropertyKind::uint()).required().final_value(),
                        PropertyDefinition::new(2, "code", PropertyKind::uint()).required().final_value(),
                        PropertyDefinition::new(3, "owner", PropertyKind::string()),
                        PropertyDefinition::new(4, "score", PropertyKind::int()),
                        PropertyDefinition::new(5, "handle", PropertyKind::string()).unique(),
                    ],
                )
                .with_key(KeyDefinition::Derived(IsIndexable::multiple(vec![
                    IsIndexable::property(Reference::property(1)),
                    IsIndexable::property(Reference::property(2)),
                ])))
                .with_index(IsIndexable::multiple(vec![
                    IsIndexable::property(Reference::property(3)),
                    IsIndexable::reversed(IsIndexable::property(Reference::property(4))),
                ]))
                .with_index(IsIndexable::property(Reference::property(4))),
            )
            .unwrap()
    }

    fn eq(index: u32, value: impl Into<Value>) -> Filter {
        Filter::equals(Reference::property(index), value)
    }

    #[test]
    fn test_full_key_pins_fetch_key() {
        let m = model();
        let filter = Filter::And(vec![eq(1, 7u64), eq(2, 9u64)]);
        match plan_scan(&m, Some(&filter), None, false).unwrap() {
            ScanPlan::Keys(keys) => assert_eq!(keys.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unique_pin() {
        let m = model();
        let plan = plan_scan(&m, Some(&eq(5, "h")), None, false).unwrap();
        assert_eq!(
            plan,
            ScanPlan::Unique {
                position: 0,
                value: Value::from("h")
            }
        );
    }

    #[test]
    fn test_order_skips_pinned_component() {
        let m = model();
        let order = IsIndexable::reversed(IsIndexable::property(Reference::property(4)));
        let plan = plan_scan(&m, Some(&eq(3, "ann")), Some(&order), true).unwrap();
        assert_eq!(
            plan,
            ScanPlan::Index {
                position: 0,
                prefix: encode_scalar(&Value::from("ann")).unwrap(),
                direction: Direction::Reverse,
            }
        );
    }

    #[test]
    fn test_order_without_index_rejected() {
        let m = model();
        let order = IsIndexable::property(Reference::property(3));
        // Index 0 sorts by owner, index 1 by score; a lone owner order matches index 0
        assert!(plan_scan(&m, None, Some(&order), false).is_ok());
        let unsorted = IsIndexable::property(Reference::property(5));
        assert!(plan_scan(&m, None, Some(&unsorted), false).unwrap_err().is_request());
    }

    #[test]
    fn test_equality_rewritten_to_index() {
        let m = model();
        match plan_scan(&m, Some(&eq(4, 3i64)), None, false).unwrap() {
            ScanPlan::Index { position, .. } => assert_eq!(position, 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_table_scan_with_key_prefix() {
        let m = model();
        let plan = plan_scan(&m, Some(&eq(1, 7u64)), Some(&IsIndexable::KeyBytes), false).unwrap();
        assert_eq!(
            plan,
            ScanPlan::Table {
                prefix: encode_scalar(&Value::UInt(7)).unwrap(),
                direction: Direction::Forward,
            }
        );
        assert_eq!(
            plan_scan(&m, None, None, true).unwrap(),
            ScanPlan::Table {
                prefix: Vec::new(),
                direction: Direction::Reverse,
            }
        );
    }
}
