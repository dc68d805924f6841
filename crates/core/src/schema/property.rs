//! Property definitions and value validation
//!
//! A [`PropertyKind`] describes the shape and bounds of one property. Value
//! validation walks a value against its kind and appends every violation it
//! finds; item failures inside a collection are grouped into one
//! [`ValidationError::Umbrella`] at the collection reference.

use serde::{Deserialize, Serialize};

use crate::reference::{Reference, Segment};
use crate::validation::ValidationError;
use crate::value::{Value, Values};

/// Shape and bounds of a property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyKind {
    /// Boolean
    Boolean,
    /// Signed integer
    Int {
        /// Inclusive minimum
        min: Option<i64>,
        /// Inclusive maximum
        max: Option<i64>,
    },
    /// Unsigned integer
    UInt {
        /// Inclusive minimum
        min: Option<u64>,
        /// Inclusive maximum
        max: Option<u64>,
    },
    /// Floating point number
    Float {
        /// Inclusive minimum
        min: Option<f64>,
        /// Inclusive maximum
        max: Option<f64>,
    },
    /// UTF-8 string, length in characters
    String {
        /// Minimum length
        min_len: Option<u32>,
        /// Maximum length
        max_len: Option<u32>,
    },
    /// Byte string
    Bytes {
        /// Minimum length
        min_len: Option<u32>,
        /// Maximum length
        max_len: Option<u32>,
    },
    /// Ordered list of scalar items
    List {
        /// Item kind
        item: Box<PropertyKind>,
        /// Minimum size
        min_size: Option<u32>,
        /// Maximum size
        max_size: Option<u32>,
    },
    /// Set of scalar items
    Set {
        /// Item kind
        item: Box<PropertyKind>,
        /// Minimum size
        min_size: Option<u32>,
        /// Maximum size
        max_size: Option<u32>,
    },
    /// Map from scalar keys to scalar or embedded values
    Map {
        /// Key kind
        key: Box<PropertyKind>,
        /// Value kind
        value: Box<PropertyKind>,
        /// Minimum size
        min_size: Option<u32>,
        /// Maximum size
        max_size: Option<u32>,
    },
    /// Map with server-assigned sequential `UInt` keys
    IncMap {
        /// Value kind
        value: Box<PropertyKind>,
        /// Maximum size
        max_size: Option<u32>,
    },
    /// Tagged union over several kinds
    MultiType {
        /// Allowed variants
        variants: Vec<TypeVariant>,
    },
    /// Embedded record
    Embed(EmbeddedModel),
}

/// One variant of a multi-type property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeVariant {
    /// Tag stored for this variant
    pub tag: u32,
    /// Variant name
    pub name: String,
    /// Kind of the variant value
    pub kind: PropertyKind,
}

/// Schema of an embedded record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedModel {
    /// Model name
    pub name: String,
    /// Fields of the embedded record
    pub properties: Vec<PropertyDefinition>,
}

impl EmbeddedModel {
    /// Create an embedded model
    pub fn new(name: impl Into<String>, properties: Vec<PropertyDefinition>) -> Self {
        EmbeddedModel {
            name: name.into(),
            properties,
        }
    }

    /// Field definition by index
    pub fn property(&self, index: u32) -> Option<&PropertyDefinition> {
        find_property(&self.properties, index)
    }
}

/// Definition of one property of a record or embedded record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    /// Property index, used as the reference segment
    pub index: u32,
    /// Property name
    pub name: String,
    /// Shape and bounds
    pub kind: PropertyKind,
    /// A value must always be present
    #[serde(default)]
    pub required: bool,
    /// The value cannot change once set
    #[serde(default)]
    pub is_final: bool,
    /// At most one record may hold a given value
    #[serde(default)]
    pub unique: bool,
}

impl PropertyDefinition {
    /// Create an optional, mutable, non-unique property
    pub fn new(index: u32, name: impl Into<String>, kind: PropertyKind) -> Self {
        PropertyDefinition {
            index,
            name: name.into(),
            kind,
            required: false,
            is_final: false,
            unique: false,
        }
    }

    /// Mark as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as final
    pub fn final_value(mut self) -> Self {
        self.is_final = true;
        self
    }

    /// Mark as unique
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

pub(crate) fn find_property(properties: &[PropertyDefinition], index: u32) -> Option<&PropertyDefinition> {
    properties.iter().find(|p| p.index == index)
}

// ============================================================================
// Kind constructors
// ============================================================================

impl PropertyKind {
    /// Unbounded signed integer
    pub fn int() -> Self {
        PropertyKind::Int { min: None, max: None }
    }

    /// Unbounded unsigned integer
    pub fn uint() -> Self {
        PropertyKind::UInt { min: None, max: None }
    }

    /// Unbounded float
    pub fn float() -> Self {
        PropertyKind::Float { min: None, max: None }
    }

    /// Unbounded string
    pub fn string() -> Self {
        PropertyKind::String {
            min_len: None,
            max_len: None,
        }
    }

    /// Unbounded byte string
    pub fn bytes() -> Self {
        PropertyKind::Bytes {
            min_len: None,
            max_len: None,
        }
    }

    /// Unbounded list
    pub fn list(item: PropertyKind) -> Self {
        PropertyKind::List {
            item: Box::new(item),
            min_size: None,
            max_size: None,
        }
    }

    /// Unbounded set
    pub fn set(item: PropertyKind) -> Self {
        PropertyKind::Set {
            item: Box::new(item),
            min_size: None,
            max_size: None,
        }
    }

    /// Unbounded map
    pub fn map(key: PropertyKind, value: PropertyKind) -> Self {
        PropertyKind::Map {
            key: Box::new(key),
            value: Box::new(value),
            min_size: None,
            max_size: None,
        }
    }

    /// Unbounded incrementing map
    pub fn inc_map(value: PropertyKind) -> Self {
        PropertyKind::IncMap {
            value: Box::new(value),
            max_size: None,
        }
    }

    /// Set collection size bounds; ignored for non-collections
    pub fn with_size(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        match &mut self {
            PropertyKind::List {
                min_size, max_size, ..
            }
            | PropertyKind::Set {
                min_size, max_size, ..
            }
            | PropertyKind::Map {
                min_size, max_size, ..
            } => {
                *min_size = min;
                *max_size = max;
            }
            PropertyKind::IncMap { max_size, .. } => *max_size = max,
            PropertyKind::String { min_len, max_len } | PropertyKind::Bytes { min_len, max_len } => {
                *min_len = min;
                *max_len = max;
            }
            _ => {}
        }
        self
    }

    /// Short name of the kind
    pub fn name(&self) -> &'static str {
        match self {
            PropertyKind::Boolean => "Boolean",
            PropertyKind::Int { .. } => "Int",
            PropertyKind::UInt { .. } => "UInt",
            PropertyKind::Float { .. } => "Float",
            PropertyKind::String { .. } => "String",
            PropertyKind::Bytes { .. } => "Bytes",
            PropertyKind::List { .. } => "List",
            PropertyKind::Set { .. } => "Set",
            PropertyKind::Map { .. } => "Map",
            PropertyKind::IncMap { .. } => "IncMap",
            PropertyKind::MultiType { .. } => "MultiType",
            PropertyKind::Embed(_) => "Embed",
        }
    }

    /// Check if values of this kind are stored as a single qualifier
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            PropertyKind::Boolean
                | PropertyKind::Int { .. }
                | PropertyKind::UInt { .. }
                | PropertyKind::Float { .. }
                | PropertyKind::String { .. }
                | PropertyKind::Bytes { .. }
        )
    }

    /// Check if this kind keeps a size counter
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            PropertyKind::List { .. }
                | PropertyKind::Set { .. }
                | PropertyKind::Map { .. }
                | PropertyKind::IncMap { .. }
        )
    }

    /// Encoded width when every value of the kind encodes to the same size
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            PropertyKind::Boolean => Some(2),
            PropertyKind::Int { .. } | PropertyKind::UInt { .. } | PropertyKind::Float { .. } => Some(9),
            _ => None,
        }
    }

    /// Collection size bounds
    pub fn size_bounds(&self) -> (Option<u32>, Option<u32>) {
        match self {
            PropertyKind::List {
                min_size, max_size, ..
            }
            | PropertyKind::Set {
                min_size, max_size, ..
            }
            | PropertyKind::Map {
                min_size, max_size, ..
            } => (*min_size, *max_size),
            PropertyKind::IncMap { max_size, .. } => (None, *max_size),
            _ => (None, None),
        }
    }

    /// Variant by tag
    pub fn variant(&self, tag: u32) -> Option<&TypeVariant> {
        match self {
            PropertyKind::MultiType { variants } => variants.iter().find(|v| v.tag == tag),
            _ => None,
        }
    }

    /// Kind found one segment below this kind
    ///
    /// Returns the field definition too when the segment selects a field of
    /// an embedded record.
    pub fn child(&self, segment: &Segment) -> Option<(&PropertyKind, Option<&PropertyDefinition>)> {
        match (self, segment) {
            (PropertyKind::Embed(model), Segment::Property(i)) => {
                model.property(*i).map(|p| (&p.kind, Some(p)))
            }
            (PropertyKind::List { item, .. }, Segment::ListItem(_)) => Some((item.as_ref(), None)),
            (PropertyKind::Set { item, .. }, Segment::SetItem(_)) => Some((item.as_ref(), None)),
            (PropertyKind::Map { value, .. }, Segment::MapKey(_))
            | (PropertyKind::IncMap { value, .. }, Segment::MapKey(_)) => Some((value.as_ref(), None)),
            (PropertyKind::MultiType { .. }, Segment::TypeTag(t)) => {
                self.variant(*t).map(|v| (&v.kind, None))
            }
            _ => None,
        }
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Validate a value against this kind, appending every violation
    pub fn validate(&self, reference: &Reference, value: &Value, errors: &mut Vec<ValidationError>) {
        match (self, value) {
            (PropertyKind::Boolean, Value::Bool(_)) => {}
            (PropertyKind::Int { min, max }, Value::Int(v)) => {
                if min.map_or(false, |m| *v < m) || max.map_or(false, |m| *v > m) {
                    errors.push(out_of_range(reference, value));
                }
            }
            (PropertyKind::UInt { min, max }, Value::UInt(v)) => {
                if min.map_or(false, |m| *v < m) || max.map_or(false, |m| *v > m) {
                    errors.push(out_of_range(reference, value));
                }
            }
            (PropertyKind::Float { min, max }, Value::Float(v)) => {
                if v.is_nan() {
                    errors.push(ValidationError::invalid(reference, "NaN is not allowed"));
                } else if min.map_or(false, |m| *v < m) || max.map_or(false, |m| *v > m) {
                    errors.push(out_of_range(reference, value));
                }
            }
            (PropertyKind::String { min_len, max_len }, Value::String(s)) => {
                check_bounds(reference, s.chars().count(), *min_len, *max_len, errors);
            }
            (PropertyKind::Bytes { min_len, max_len }, Value::Bytes(b)) => {
                check_bounds(reference, b.len(), *min_len, *max_len, errors);
            }
            (PropertyKind::List { item, .. }, Value::List(items)) => {
                let mut item_errors = Vec::new();
                for (i, v) in items.iter().enumerate() {
                    item.validate(&reference.list_item(i as u32), v, &mut item_errors);
                }
                push_umbrella(reference, item_errors, errors);
                self.check_size(reference, items.len(), errors);
            }
            (PropertyKind::Set { item, .. }, Value::Set(items)) => {
                let mut item_errors = Vec::new();
                for v in items {
                    item.validate(&reference.set_item(v.clone()), v, &mut item_errors);
                }
                push_umbrella(reference, item_errors, errors);
                self.check_size(reference, items.len(), errors);
            }
            (PropertyKind::Map { key, value: vk, .. }, Value::Map(entries)) => {
                let mut item_errors = Vec::new();
                for (k, v) in entries {
                    let entry = reference.map_key(k.clone());
                    key.validate(&entry, k, &mut item_errors);
                    vk.validate(&entry, v, &mut item_errors);
                }
                push_umbrella(reference, item_errors, errors);
                self.check_size(reference, entries.len(), errors);
            }
            (PropertyKind::IncMap { value: vk, .. }, Value::Map(entries)) => {
                let mut item_errors = Vec::new();
                for (k, v) in entries {
                    if !matches!(k, Value::UInt(_)) {
                        item_errors.push(ValidationError::InvalidType {
                            reference: reference.clone(),
                            expected: "UInt key".to_string(),
                            actual: k.type_name().to_string(),
                        });
                        continue;
                    }
                    vk.validate(&reference.map_key(k.clone()), v, &mut item_errors);
                }
                push_umbrella(reference, item_errors, errors);
                self.check_size(reference, entries.len(), errors);
            }
            (PropertyKind::MultiType { .. }, Value::Typed(typed)) => match self.variant(typed.tag) {
                Some(variant) => {
                    variant
                        .kind
                        .validate(&reference.type_tag(typed.tag), &typed.value, errors)
                }
                None => errors.push(ValidationError::invalid(
                    reference,
                    format!("unknown type tag {}", typed.tag),
                )),
            },
            (PropertyKind::Embed(model), Value::Embed(values)) => {
                validate_fields(&model.properties, Some(reference), values, errors);
            }
            (kind, value) => errors.push(ValidationError::InvalidType {
                reference: reference.clone(),
                expected: kind.name().to_string(),
                actual: value.type_name().to_string(),
            }),
        }
    }

    /// Check a resulting collection size against the bounds
    pub fn check_size(&self, reference: &Reference, size: usize, errors: &mut Vec<ValidationError>) {
        let (min, max) = self.size_bounds();
        check_bounds(reference, size, min, max, errors);
    }
}

/// Validate the fields of a record or embedded record
///
/// `parent` is `None` for top-level record properties.
pub fn validate_fields(
    properties: &[PropertyDefinition],
    parent: Option<&Reference>,
    values: &Values,
    errors: &mut Vec<ValidationError>,
) {
    let field_ref = |index: u32| match parent {
        Some(p) => p.field(index),
        None => Reference::property(index),
    };

    for def in properties {
        match values.get(def.index) {
            Some(value) => def.kind.validate(&field_ref(def.index), value, errors),
            None if def.required => errors.push(ValidationError::Required {
                reference: field_ref(def.index),
            }),
            None => {}
        }
    }

    for (index, _) in values.iter() {
        if find_property(properties, index).is_none() {
            errors.push(ValidationError::invalid(&field_ref(index), "unknown property"));
        }
    }
}

fn out_of_range(reference: &Reference, value: &Value) -> ValidationError {
    ValidationError::OutOfRange {
        reference: reference.clone(),
        value: value.clone(),
    }
}

fn check_bounds(
    reference: &Reference,
    size: usize,
    min: Option<u32>,
    max: Option<u32>,
    errors: &mut Vec<ValidationError>,
) {
    let size = u32::try_from(size).unwrap_or(u32::MAX);
    if min.map_or(false, |m| size < m) || max.map_or(false, |m| size > m) {
        errors.push(ValidationError::InvalidSize {
            reference: reference.clone(),
            size,
            min,
            max,
        });
    }
}

fn push_umbrella(reference: &Reference, item_errors: Vec<ValidationError>, errors: &mut Vec<ValidationError>) {
    if !item_errors.is_empty() {
        errors.push(ValidationError::Umbrella {
            reference: reference.clone(),
            errors: item_errors,
        });
    }
}
