//! Present-value normalization
//!
//! Converts raw present values into the representation the object type's
//! schema entry asks for, and prepares values for the write-value parser.

use serde_json::{json, Value};

use crate::registry::{ObjectTypeRegistry, SemanticType};
use crate::types::fold_name;

const TRUE_WORDS: &[&str] = &["active", "on", "1", "true", "enabled", "set", "yes"];
const FALSE_WORDS: &[&str] = &["inactive", "off", "0", "false", "disabled", "clear", "reset", "no"];

/// Object types whose present value is BACnetBinaryPV
const BINARY_OBJECT_TYPES: &[&str] = &["binaryoutput", "binaryvalue", "binarylightingoutput"];

/// Normalize `raw` according to the semantic type registered for `object_type`
///
/// Numbers that fail to parse fall back to the type's uninitialized default,
/// or null when it has none. Unknown object types are stringified.
pub fn normalize_present_value(registry: &ObjectTypeRegistry, object_type: &str, raw: &Value) -> Value {
    let fallback = || registry.uninitialized_default(object_type).cloned().unwrap_or(Value::Null);

    match registry.semantic_type(object_type) {
        SemanticType::Boolean => json!(truthy(raw)),
        SemanticType::Real => as_f64(raw).map(|f| json!(f)).unwrap_or_else(fallback),
        SemanticType::Integer | SemanticType::Unsigned | SemanticType::Enumerated => {
            as_integer(raw).map(|i| json!(i)).unwrap_or_else(fallback)
        }
        SemanticType::String | SemanticType::Unknown => json!(stringify(raw)),
    }
}

/// Prepare a value for writing to an object of `object_type`
///
/// Booleans bound for binary objects become `"active"` / `"inactive"`;
/// everything else passes through as its textual form.
pub fn encode_for_write(object_type: &str, value: &Value) -> String {
    match value {
        Value::Bool(b) if BINARY_OBJECT_TYPES.contains(&fold_name(object_type).as_str()) => {
            let word = if *b { "active" } else { "inactive" };
            word.to_string()
        }
        Value::Null => "null".to_string(),
        other => stringify(other),
    }
}

fn truthy(raw: &Value) -> bool {
    match raw {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => {
            let word = s.trim().to_lowercase();
            if TRUE_WORDS.contains(&word.as_str()) {
                true
            } else if FALSE_WORDS.contains(&word.as_str()) {
                false
            } else if let Ok(number) = word.parse::<f64>() {
                number != 0.0
            } else {
                !word.is_empty()
            }
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn as_f64(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok().filter(|f: &f64| f.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_integer(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => {
            let text = s.trim();
            text.parse::<i64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.round() as i64))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn stringify(raw: &Value) -> String {
    match raw {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::{Datatype, BINARY_PV};
    use crate::value::PropertyValue;
    use crate::write::parse_write_value;

    fn registry() -> ObjectTypeRegistry {
        ObjectTypeRegistry::builtin().unwrap()
    }

    #[test]
    fn test_normalize_examples() {
        let registry = registry();
        assert_eq!(normalize_present_value(&registry, "analogInput", &json!("23.5")), json!(23.5));
        assert_eq!(normalize_present_value(&registry, "binaryInput", &json!("inactive")), json!(false));
        assert_eq!(normalize_present_value(&registry, "multistateValue", &json!("3")), json!(3));
    }

    #[test]
    fn test_boolean_spellings() {
        let registry = registry();
        for word in ["Active", "ON", "1", "enabled", "set"] {
            assert_eq!(normalize_present_value(&registry, "binaryValue", &json!(word)), json!(true), "{}", word);
        }
        for word in ["inactive", "Off", "0", "disabled", "clear", "reset", ""] {
            assert_eq!(normalize_present_value(&registry, "binaryValue", &json!(word)), json!(false), "{}", word);
        }
        assert_eq!(normalize_present_value(&registry, "binaryValue", &json!("2.5")), json!(true));
        assert_eq!(normalize_present_value(&registry, "binaryValue", &json!("anything")), json!(true));
        assert_eq!(normalize_present_value(&registry, "binaryValue", &json!(0)), json!(false));
    }

    #[test]
    fn test_numbers_round_and_fall_back() {
        let registry = registry();
        assert_eq!(normalize_present_value(&registry, "multiStateInput", &json!(2.6)), json!(3));
        assert_eq!(normalize_present_value(&registry, "multiStateInput", &json!("4.4")), json!(4));
        assert_eq!(normalize_present_value(&registry, "analogValue", &json!(12)), json!(12.0));
        // Unparsable values take the uninitialized default
        assert_eq!(normalize_present_value(&registry, "analogValue", &json!("n/a")), json!(0.0));
        assert_eq!(normalize_present_value(&registry, "multiStateValue", &json!("n/a")), json!(1));
    }

    #[test]
    fn test_strings_and_unknown_types() {
        let registry = registry();
        assert_eq!(normalize_present_value(&registry, "characterstringValue", &json!(null)), json!(""));
        assert_eq!(normalize_present_value(&registry, "notAnObjectType", &json!(7)), json!("7"));
        assert_eq!(
            normalize_present_value(&registry, "schedule", &json!("occupied")),
            json!("occupied")
        );
    }

    #[test]
    fn test_encode_for_write() {
        assert_eq!(encode_for_write("binaryOutput", &json!(true)), "active");
        assert_eq!(encode_for_write("binary-value", &json!(false)), "inactive");
        assert_eq!(encode_for_write("analogValue", &json!(true)), "true");
        assert_eq!(encode_for_write("analogValue", &json!(21.5)), "21.5");
        assert_eq!(encode_for_write("analogValue", &json!("u:7")), "u:7");
        assert_eq!(encode_for_write("analogValue", &json!(null)), "null");
    }

    #[test]
    fn test_binary_output_round_trip() {
        let registry = registry();
        let text = encode_for_write("binaryOutput", &json!(true));
        let written = parse_write_value(&text, &Datatype::Enumerated(BINARY_PV), None).unwrap();
        assert_eq!(written, PropertyValue::Enumerated(1));

        // What a device would echo back on a read
        let read_back = written.to_json(&Datatype::Enumerated(BINARY_PV));
        assert_eq!(
            normalize_present_value(&registry, "binaryOutput", &read_back),
            normalize_present_value(&registry, "binaryOutput", &json!("active"))
        );
        assert_eq!(normalize_present_value(&registry, "binaryOutput", &read_back), json!(true));
    }
}
