//! Car domain model.
//!
//! # Responsibility
//! - Define the canonical `Car` record persisted in the `cars` table.
//! - Validate identity and attribute keys before any write.
//!
//! # Invariants
//! - `id` is stable and never nil.
//! - `version` is owned by the store: `0` before the first insert, then
//!   incremented by every successful update.
//! - Attribute keys are non-empty, at most `MAX_ATTRIBUTE_KEY_CHARS` long and
//!   free of `"` so they stay addressable by attribute filters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Primary key of a car record.
pub type CarId = Uuid;

/// Application-defined fields of a car.
pub type CarAttributes = Map<String, Value>;

pub const MAX_ATTRIBUTE_KEY_CHARS: usize = 128;

/// Validation failures for car records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CarValidationError {
    NilId,
    EmptyAttributeKey,
    QuotedAttributeKey(String),
    AttributeKeyTooLong { key: String, max_chars: usize },
}

impl Display for CarValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "car id must not be nil"),
            Self::EmptyAttributeKey => write!(f, "car attribute keys must not be empty"),
            Self::QuotedAttributeKey(key) => {
                write!(f, "car attribute key `{key}` must not contain `\"`")
            }
            Self::AttributeKeyTooLong { key, max_chars } => write!(
                f,
                "car attribute key `{key}` exceeds {max_chars} characters"
            ),
        }
    }
}

impl Error for CarValidationError {}

/// Canonical car record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CarRecord")]
pub struct Car {
    pub id: CarId,
    /// Opaque document; the store keeps it as JSON text.
    pub attributes: CarAttributes,
    /// Concurrency token maintained by the store.
    pub version: i64,
}

#[derive(Deserialize)]
struct CarRecord {
    id: CarId,
    #[serde(default)]
    attributes: CarAttributes,
    #[serde(default)]
    version: i64,
}

impl TryFrom<CarRecord> for Car {
    type Error = CarValidationError;

    fn try_from(record: CarRecord) -> Result<Self, Self::Error> {
        let car = Self {
            id: record.id,
            attributes: record.attributes,
            version: record.version,
        };
        car.validate()?;
        Ok(car)
    }
}

impl Car {
    /// Creates an unsaved car with a generated id.
    pub fn new(attributes: CarAttributes) -> Self {
        Self {
            id: Uuid::new_v4(),
            attributes,
            version: 0,
        }
    }

    /// Creates an unsaved car with a caller-provided id.
    ///
    /// Used by hosts that assign identity upstream (imports, fixtures).
    pub fn with_id(id: CarId, attributes: CarAttributes) -> Result<Self, CarValidationError> {
        let car = Self {
            id,
            attributes,
            version: 0,
        };
        car.validate()?;
        Ok(car)
    }

    /// Builds a car from a JSON object value.
    ///
    /// Returns `None` when `value` is not an object.
    pub fn from_json_object(value: Value) -> Option<Self> {
        match value {
            Value::Object(attributes) => Some(Self::new(attributes)),
            _ => None,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Sets one attribute and returns the previous value, if any.
    pub fn set_attribute(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Option<Value> {
        self.attributes.insert(key.into(), value.into())
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    /// Whether this car has been written to the store at least once.
    pub fn is_persisted(&self) -> bool {
        self.version > 0
    }

    /// Checks identity and attribute-key invariants.
    pub fn validate(&self) -> Result<(), CarValidationError> {
        if self.id.is_nil() {
            return Err(CarValidationError::NilId);
        }

        for key in self.attributes.keys() {
            if key.is_empty() {
                return Err(CarValidationError::EmptyAttributeKey);
            }
            if key.contains('"') {
                return Err(CarValidationError::QuotedAttributeKey(
                    key.chars().take(32).collect(),
                ));
            }
            if key.chars().count() > MAX_ATTRIBUTE_KEY_CHARS {
                return Err(CarValidationError::AttributeKeyTooLong {
                    key: key.chars().take(32).collect(),
                    max_chars: MAX_ATTRIBUTE_KEY_CHARS,
                });
            }
        }

        Ok(())
    }
}
