use carstore_core::{Car, CarValidationError};
use serde_json::{json, Map, Value};
use uuid::Uuid;

fn attributes(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[test]
fn car_new_sets_defaults() {
    let car = Car::new(attributes(json!({ "make": "Volvo" })));

    assert!(!car.id.is_nil());
    assert_eq!(car.version, 0);
    assert!(!car.is_persisted());
    assert_eq!(car.attribute("make"), Some(&json!("Volvo")));
}

#[test]
fn set_and_remove_attribute_return_previous_values() {
    let mut car = Car::new(Map::new());

    assert_eq!(car.set_attribute("year", 1999), None);
    assert_eq!(car.set_attribute("year", 2001), Some(json!(1999)));
    assert_eq!(car.remove_attribute("year"), Some(json!(2001)));
    assert!(car.attributes.is_empty());
}

#[test]
fn with_id_rejects_nil_id() {
    let err = Car::with_id(Uuid::nil(), Map::new()).unwrap_err();
    assert_eq!(err, CarValidationError::NilId);
}

#[test]
fn validate_rejects_bad_attribute_keys() {
    let mut car = Car::new(Map::new());
    car.set_attribute("", true);
    assert_eq!(car.validate().unwrap_err(), CarValidationError::EmptyAttributeKey);

    let mut car = Car::new(Map::new());
    car.set_attribute("say \"hi\"", true);
    assert_eq!(
        car.validate().unwrap_err(),
        CarValidationError::QuotedAttributeKey("say \"hi\"".to_string())
    );

    let mut car = Car::new(Map::new());
    car.set_attribute("k".repeat(129), true);
    assert!(matches!(
        car.validate().unwrap_err(),
        CarValidationError::AttributeKeyTooLong { max_chars: 128, .. }
    ));
}

#[test]
fn validate_accepts_whitespace_keys() {
    let mut car = Car::new(Map::new());
    car.set_attribute(" ", "space");
    car.set_attribute("trim level", "GL");
    assert_eq!(car.validate(), Ok(()));
}

#[test]
fn deserialize_rejects_quoted_attribute_key() {
    let value = json!({
        "id": "11111111-2222-4333-8444-555555555555",
        "attributes": { "a\"b": 1 },
        "version": 0
    });

    let err = serde_json::from_value::<Car>(value).unwrap_err();
    assert!(err.to_string().contains("must not contain"), "unexpected error: {err}");
}

#[test]
fn from_json_object_requires_an_object() {
    assert!(Car::from_json_object(json!(["not", "an", "object"])).is_none());
    let car = Car::from_json_object(json!({ "model": "240" })).unwrap();
    assert_eq!(car.attribute("model"), Some(&json!("240")));
}

#[test]
fn car_serialization_uses_expected_fields() {
    let id = Uuid::parse_str("11111111-2222-4333-8444-555555555555").unwrap();
    let mut car = Car::with_id(id, attributes(json!({ "make": "Saab", "doors": 3 }))).unwrap();
    car.version = 4;

    let value = serde_json::to_value(&car).unwrap();
    assert_eq!(value["id"], id.to_string());
    assert_eq!(value["attributes"]["make"], "Saab");
    assert_eq!(value["version"], 4);

    let decoded: Car = serde_json::from_value(value).unwrap();
    assert_eq!(decoded, car);
}

#[test]
fn deserialize_rejects_nil_id() {
    let value = json!({
        "id": "00000000-0000-0000-0000-000000000000",
        "attributes": {},
        "version": 1
    });

    let err = serde_json::from_value::<Car>(value).unwrap_err();
    assert!(
        err.to_string().contains("car id must not be nil"),
        "unexpected error: {err}"
    );
}
