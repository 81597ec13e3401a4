//! Deserializers tolerating string values, as produced by environment overrides.

use std::fmt::Display;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrString {
    Bool(bool),
    String(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntOrString {
    Unsigned(u64),
    Signed(i64),
    String(String),
}

/// Deserializes a boolean value from either a native boolean or a string
pub fn bool_from_anything<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(v) => Ok(v),
        BoolOrString::String(s) => match s.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(de::Error::custom(format!(
                "invalid boolean string: {other}"
            ))),
        },
    }
}

/// Deserializes an integer of type `T` from either a native integer or a string
pub fn int_from_anything<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64> + TryFrom<i64> + FromStr,
    <T as FromStr>::Err: Display,
{
    let out_of_range = |v: &dyn Display| {
        de::Error::custom(format!(
            "value {v} out of range for {}",
            std::any::type_name::<T>()
        ))
    };

    match IntOrString::deserialize(deserializer)? {
        IntOrString::Unsigned(v) => T::try_from(v).map_err(|_| out_of_range(&v)),
        IntOrString::Signed(v) => T::try_from(v).map_err(|_| out_of_range(&v)),
        IntOrString::String(s) => s
            .parse::<T>()
            .map_err(|e| de::Error::custom(format!("invalid integer string {s}: {e}"))),
    }
}
