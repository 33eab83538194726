//! Flat string-keyed maps carrying the type-specific fields of mechanisms
//! and notifications.
//!
//! The relational backend stores these maps in its `options` and `data`
//! columns as JSON objects whose values are all strings.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::TypeError;

/// Type-specific fields of a mechanism or notification.
pub type OptionMap = BTreeMap<String, String>;

/// Encode an option map as a JSON object.
pub fn encode(map: &OptionMap) -> Result<String, TypeError> {
    serde_json::to_string(map).map_err(|e| TypeError::Serialization(e.to_string()))
}

/// Decode a JSON object of string values into an option map.
pub fn decode(text: &str) -> Result<OptionMap, TypeError> {
    serde_json::from_str(text).map_err(|e| TypeError::Serialization(e.to_string()))
}

/// Fetch a required string field.
pub fn required<'a>(map: &'a OptionMap, field: &'static str) -> Result<&'a str, TypeError> {
    map.get(field)
        .map(String::as_str)
        .ok_or(TypeError::MissingField(field))
}

/// Fetch and parse a required field.
pub fn parsed<T: FromStr>(map: &OptionMap, field: &'static str) -> Result<T, TypeError> {
    let raw = required(map, field)?;
    raw.parse().map_err(|_| TypeError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn required_reports_missing_field() {
        let map = OptionMap::new();
        assert_eq!(required(&map, "digits"), Err(TypeError::MissingField("digits")));
    }

    #[test]
    fn parsed_reports_invalid_value() {
        let mut map = OptionMap::new();
        map.insert("digits".into(), "six".into());
        let err = parsed::<u32>(&map, "digits").unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidField {
                field: "digits",
                value: "six".into()
            }
        );
    }

    #[test]
    fn decode_rejects_non_string_values() {
        assert!(decode(r#"{"digits": 6}"#).is_err());
        assert!(decode("not json").is_err());
    }

    proptest! {
        #[test]
        fn encoded_maps_decode_unchanged(
            map in proptest::collection::btree_map("[a-zA-Z]{1,8}", ".{0,16}", 0..6)
        ) {
            let text = encode(&map).unwrap();
            prop_assert_eq!(decode(&text).unwrap(), map);
        }
    }
}
