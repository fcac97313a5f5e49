//! Declarative cookie schema for provider-specific token fields.

use serde_json::Value;
use std::fmt;

/// Turns a token value into the string written to the cookie.
pub type Serializer = fn(&Value) -> Option<String>;

/// Turns a cookie string back into a value.
pub type Parser = fn(&str) -> Value;

/// One persisted provider-specific field.
///
/// `key` is the logical name looked up in the token set. The cookie is
/// named after `storage_key` when set, otherwise after `key`.
#[derive(Clone)]
pub struct FieldDescriptor {
    /// Logical field name in the token set.
    pub key: String,
    /// Cookie field name override.
    pub storage_key: Option<String>,
    /// Value-to-cookie conversion.
    pub serialize: Serializer,
    /// Cookie-to-value conversion.
    pub parse: Parser,
}

impl FieldDescriptor {
    /// Field stored under its own name with the default conversions.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            storage_key: None,
            serialize: serialize_default,
            parse: coerce_stored,
        }
    }

    /// Store under a different cookie field name.
    pub fn stored_as(mut self, storage_key: impl Into<String>) -> Self {
        self.storage_key = Some(storage_key.into());
        self
    }

    /// Use a custom serializer.
    pub fn serializer(mut self, serialize: Serializer) -> Self {
        self.serialize = serialize;
        self
    }

    /// Use a custom parser.
    pub fn parser(mut self, parse: Parser) -> Self {
        self.parse = parse;
        self
    }

    /// Name used in the cookie.
    pub fn storage_name(&self) -> &str {
        self.storage_key.as_deref().unwrap_or(&self.key)
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("key", &self.key)
            .field("storage_key", &self.storage_key)
            .finish_non_exhaustive()
    }
}

/// Strings verbatim, `null` dropped, everything else as JSON text.
pub fn serialize_default(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Arrays joined with spaces, otherwise [`serialize_default`].
pub fn serialize_space_joined(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(serialize_default)
                .collect::<Vec<_>>()
                .join(" "),
        ),
        other => serialize_default(other),
    }
}

/// Read-side coercion of a stored value.
///
/// Only non-empty all-ASCII-digit strings become numbers (leading zeros are
/// read as decimal). Signs, decimal points and values beyond `u64` stay
/// strings.
pub fn coerce_stored(raw: &str) -> Value {
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = raw.parse::<u64>() {
            return Value::from(n);
        }
    }
    Value::String(raw.to_string())
}

/// Keep the stored string as is.
pub fn parse_verbatim(raw: &str) -> Value {
    Value::String(raw.to_string())
}

/// Render a coerced value back to text.
pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_coercion_is_narrow() {
        assert_eq!(coerce_stored("3600"), json!(3600));
        assert_eq!(coerce_stored("007"), json!(7));
        assert_eq!(coerce_stored("-5"), json!("-5"));
        assert_eq!(coerce_stored("1.5"), json!("1.5"));
        assert_eq!(coerce_stored(""), json!(""));
        assert_eq!(coerce_stored("12a"), json!("12a"));
        assert_eq!(
            coerce_stored("99999999999999999999999"),
            json!("99999999999999999999999")
        );
    }

    #[test]
    fn test_serializers() {
        assert_eq!(serialize_default(&json!("abc")).as_deref(), Some("abc"));
        assert_eq!(serialize_default(&json!(42)).as_deref(), Some("42"));
        assert_eq!(serialize_default(&Value::Null), None);
        assert_eq!(
            serialize_space_joined(&json!(["openid", "profile"])).as_deref(),
            Some("openid profile")
        );
    }

    #[test]
    fn test_storage_name() {
        let field = FieldDescriptor::new("x_refresh_token_expires_in").stored_as("rt_expires_in");
        assert_eq!(field.storage_name(), "rt_expires_in");
        assert_eq!(FieldDescriptor::new("scope").storage_name(), "scope");
    }

    proptest! {
        #[test]
        fn prop_digit_strings_become_numbers(n in 0u64..u64::MAX) {
            prop_assert_eq!(coerce_stored(&n.to_string()), Value::from(n));
        }

        #[test]
        fn prop_non_digit_strings_stay_strings(s in "[^0-9]+[0-9]*") {
            prop_assert_eq!(coerce_stored(&s), Value::String(s.clone()));
        }
    }
}
