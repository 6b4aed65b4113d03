//! Field value codec.
//!
//! Callers pass flat values (`"Critical"`, `"2h 30m"`, `"jane.doe"`); the
//! tracker wants typed fragments such as
//! `{"name":"Priority","$type":"SingleEnumIssueCustomField","value":{"name":"Critical"}}`.
//! [`encode`] builds the fragment from a [`FieldDescriptor`] and a
//! [`FieldValue`], rejecting values that cannot fit the field before anything
//! is sent. [`decode`] goes the other way for values read back from an issue.
//!
//! For any value `encode` accepts, `decode` of its wire value yields the
//! canonical form of the input: enum names take the project's spelling,
//! periods are normalized (`150` minutes reads back as `2h 30m`).

pub mod period;

use crate::classify::OperationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value, json};
use std::fmt;

/// Shape of a custom field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Single-line string; also dates and other simple values.
    String,
    /// Multi-line text.
    Text,
    /// One value from an enum bundle.
    EnumSingle,
    /// Several values from an enum bundle.
    EnumMulti,
    /// A user, by login.
    User,
    /// A workflow state.
    State,
    /// A duration, stored in minutes.
    Period,
    /// Integer or float.
    Number,
    /// True or false.
    Boolean,
}

impl FieldKind {
    /// Map the tracker's field type id (e.g. `enum[1]`, `state[1]`, `period`).
    #[must_use]
    pub fn from_value_type(value_type: &str) -> Self {
        let lower = value_type.to_ascii_lowercase();
        let multi = lower.ends_with("[*]");
        let base = lower.split('[').next().unwrap_or_default();
        match base {
            "enum" | "ownedfield" | "version" | "build" if multi => Self::EnumMulti,
            "enum" | "ownedfield" | "version" | "build" => Self::EnumSingle,
            "state" => Self::State,
            "user" => Self::User,
            "period" => Self::Period,
            "integer" | "float" => Self::Number,
            "boolean" | "bool" => Self::Boolean,
            "text" => Self::Text,
            _ => Self::String,
        }
    }

    /// The tracker's `$type` for an issue custom field of this kind.
    #[must_use]
    pub fn wire_type(self) -> &'static str {
        match self {
            Self::EnumSingle => "SingleEnumIssueCustomField",
            Self::EnumMulti => "MultiEnumIssueCustomField",
            Self::State => "StateIssueCustomField",
            Self::User => "SingleUserIssueCustomField",
            Self::Period => "PeriodIssueCustomField",
            Self::Text => "TextIssueCustomField",
            Self::String | Self::Number | Self::Boolean => "SimpleIssueCustomField",
        }
    }

    /// Whether values come from a fixed list.
    #[must_use]
    pub fn has_allowed_values(self) -> bool {
        matches!(self, Self::EnumSingle | Self::EnumMulti | Self::State)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Text => "text",
            Self::EnumSingle => "enum",
            Self::EnumMulti => "multi-enum",
            Self::User => "user",
            Self::State => "state",
            Self::Period => "period",
            Self::Number => "number",
            Self::Boolean => "boolean",
        };
        write!(f, "{name}")
    }
}

/// What the codec knows about one field of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name, as the project spells it.
    pub name: String,
    /// Value shape.
    pub kind: FieldKind,
    /// Allowed values for enum and state fields; `None` when unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
}

impl FieldDescriptor {
    /// Create a descriptor without an allowed-value list.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            allowed_values: None,
        }
    }

    /// Attach the allowed values.
    #[must_use]
    pub fn with_allowed<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// The canonical spelling of `candidate` among the allowed values.
    ///
    /// Matching ignores case. With no allowed-value list, the trimmed input
    /// is accepted as is.
    #[must_use]
    pub fn canonical<'a>(&'a self, candidate: &'a str) -> Option<&'a str> {
        let candidate = candidate.trim();
        match &self.allowed_values {
            None => Some(candidate),
            Some(values) => values
                .iter()
                .find(|v| v.eq_ignore_ascii_case(candidate))
                .map(String::as_str),
        }
    }
}

/// A flat value supplied by a caller or read back from the tracker.
///
/// Only scalars: objects and arrays are rejected at the boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Clear the field.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A number.
    Number(Number),
    /// Text; also enum names, logins, and period strings.
    Text(String),
}

impl FieldValue {
    /// Convert an arbitrary JSON value, rejecting objects and arrays.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming `field` for non-scalar input.
    pub fn from_json(field: &str, value: Value) -> Result<Self, OperationError> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Bool(b)),
            Value::Number(n) => Ok(Self::Number(n)),
            Value::String(s) => Ok(Self::Text(s)),
            Value::Array(_) | Value::Object(_) => Err(OperationError::validation(
                field,
                format!("Field '{field}' accepts simple scalars only"),
            )
            .with_suggestion(
                "Pass a string, number, boolean or null; join multiple enum values with commas",
            )),
        }
    }

    /// Whether this clears the field.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Encode `value` as a wire fragment for `descriptor`.
///
/// # Errors
///
/// Returns a `ValidationError` when the value does not fit the field: an enum
/// or state name outside the allowed list, an unparseable period or number,
/// or an empty string.
pub fn encode(descriptor: &FieldDescriptor, value: &FieldValue) -> Result<Value, OperationError> {
    let wire = encode_value(descriptor, value)?;
    Ok(json!({
        "name": descriptor.name,
        "$type": descriptor.kind.wire_type(),
        "value": wire,
    }))
}

/// Encode only the `value` part of the fragment.
///
/// # Errors
///
/// Same as [`encode`].
pub fn encode_value(
    descriptor: &FieldDescriptor,
    value: &FieldValue,
) -> Result<Value, OperationError> {
    let text = match value {
        FieldValue::Null if descriptor.kind == FieldKind::EnumMulti => return Ok(json!([])),
        FieldValue::Null => return Ok(Value::Null),
        FieldValue::Text(s) if s.trim().is_empty() => {
            return Err(invalid(descriptor, value, "value is empty; pass null to clear the field"));
        }
        FieldValue::Text(s) => s.trim().to_string(),
        other => other.to_string(),
    };

    match descriptor.kind {
        FieldKind::EnumSingle | FieldKind::State => {
            let name = lookup(descriptor, value, &text)?;
            Ok(json!({ "name": name }))
        }
        FieldKind::EnumMulti => {
            let names = text
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|item| lookup(descriptor, value, item).map(|name| json!({ "name": name })))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(names))
        }
        FieldKind::User => Ok(json!({ "login": text })),
        FieldKind::Period => {
            let minutes = period::parse(&text)
                .map_err(|e| invalid(descriptor, value, &e.reason))
                .map_err(|e| e.with_suggestion("Use units w, d, h, m, e.g. '2h 30m' or '1w 2d'"))?;
            Ok(json!({ "$type": "PeriodValue", "minutes": minutes }))
        }
        FieldKind::Number => match value {
            FieldValue::Number(n) => Ok(Value::Number(n.clone())),
            _ => parse_number(&text)
                .map(Value::Number)
                .ok_or_else(|| invalid(descriptor, value, "expected a number")),
        },
        FieldKind::Boolean => match value {
            FieldValue::Bool(b) => Ok(Value::Bool(*b)),
            _ => match text.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "0" => Ok(Value::Bool(false)),
                _ => Err(invalid(descriptor, value, "expected true or false")),
            },
        },
        FieldKind::Text => Ok(json!({ "$type": "TextFieldValue", "text": text })),
        FieldKind::String => Ok(Value::String(text)),
    }
}

/// Decode a wire value read from the tracker.
///
/// Unrecognized shapes fall back to the tracker's `presentation`, `name` or
/// `text` property rather than failing.
#[must_use]
pub fn decode(descriptor: &FieldDescriptor, wire: &Value) -> FieldValue {
    match (descriptor.kind, wire) {
        (_, Value::Null) => FieldValue::Null,
        (FieldKind::EnumMulti, Value::Array(items)) => {
            let names: Vec<String> = items.iter().filter_map(display_name).collect();
            if names.is_empty() {
                FieldValue::Null
            } else {
                FieldValue::Text(names.join(", "))
            }
        }
        (FieldKind::Period, Value::Object(map)) => map
            .get("minutes")
            .and_then(Value::as_u64)
            .map(|m| FieldValue::Text(period::format(m)))
            .unwrap_or_else(|| fallback(map)),
        (FieldKind::Period, Value::Number(n)) => n
            .as_u64()
            .map_or_else(|| FieldValue::Number(n.clone()), |m| FieldValue::Text(period::format(m))),
        (FieldKind::Text, Value::Object(map)) => map
            .get("text")
            .and_then(Value::as_str)
            .map_or_else(|| fallback(map), |s| FieldValue::Text(s.to_string())),
        (FieldKind::User, Value::Object(map)) => ["login", "name", "fullName"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map_or_else(|| fallback(map), |s| FieldValue::Text(s.to_string())),
        (FieldKind::Boolean, Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" => FieldValue::Bool(true),
            "false" => FieldValue::Bool(false),
            _ => FieldValue::Text(s.clone()),
        },
        (FieldKind::Number, Value::String(s)) => {
            parse_number(s).map_or_else(|| FieldValue::Text(s.clone()), FieldValue::Number)
        }
        (_, Value::Bool(b)) => FieldValue::Bool(*b),
        (_, Value::Number(n)) => FieldValue::Number(n.clone()),
        (_, Value::String(s)) => FieldValue::Text(s.clone()),
        (_, Value::Object(map)) => fallback(map),
        (_, Value::Array(items)) => {
            let names: Vec<String> = items.iter().filter_map(display_name).collect();
            FieldValue::Text(names.join(", "))
        }
    }
}

fn display_name(item: &Value) -> Option<String> {
    match item {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => ["name", "login", "presentation", "text"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

fn fallback(map: &Map<String, Value>) -> FieldValue {
    ["name", "presentation", "text", "login"]
        .iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .map_or_else(
            || FieldValue::Text(Value::Object(map.clone()).to_string()),
            |s| FieldValue::Text(s.to_string()),
        )
}

fn parse_number(text: &str) -> Option<Number> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(i.into());
    }
    text.parse::<f64>().ok().and_then(Number::from_f64)
}

fn lookup<'a>(
    descriptor: &'a FieldDescriptor,
    value: &FieldValue,
    candidate: &'a str,
) -> Result<&'a str, OperationError> {
    descriptor.canonical(candidate).ok_or_else(|| {
        let allowed = descriptor
            .allowed_values
            .as_deref()
            .unwrap_or_default()
            .join(", ");
        invalid(
            descriptor,
            value,
            &format!("'{candidate}' is not an allowed value"),
        )
        .with_suggestion(format!("Allowed values: {allowed}"))
    })
}

fn invalid(descriptor: &FieldDescriptor, value: &FieldValue, reason: &str) -> OperationError {
    OperationError::validation(
        &descriptor.name,
        format!(
            "Invalid value '{value}' for {} field '{}': {reason}",
            descriptor.kind, descriptor.name
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorKind;
    use rstest::rstest;

    fn priority() -> FieldDescriptor {
        FieldDescriptor::new("Priority", FieldKind::EnumSingle)
            .with_allowed(["Critical", "Major", "Normal", "Minor"])
    }

    #[test]
    fn test_enum_encodes_canonical_name() {
        let fragment = encode(&priority(), &"critical".into()).unwrap();
        assert_eq!(
            fragment,
            json!({
                "name": "Priority",
                "$type": "SingleEnumIssueCustomField",
                "value": {"name": "Critical"}
            })
        );
    }

    #[test]
    fn test_enum_rejects_unknown_value_with_allowed_list() {
        let err = encode(&priority(), &"Urgent".into()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationError);
        assert_eq!(err.field.as_deref(), Some("Priority"));
        assert!(err.suggestions[0].contains("Critical, Major, Normal, Minor"));
    }

    #[test]
    fn test_multi_enum_splits_on_commas() {
        let versions = FieldDescriptor::new("Fix versions", FieldKind::EnumMulti)
            .with_allowed(["1.0", "1.1", "2.0"]);
        let wire = encode_value(&versions, &"1.0, 2.0".into()).unwrap();
        assert_eq!(wire, json!([{"name": "1.0"}, {"name": "2.0"}]));
        assert_eq!(decode(&versions, &wire), FieldValue::from("1.0, 2.0"));
    }

    #[test]
    fn test_period_round_trips_normalized() {
        let estimation = FieldDescriptor::new("Estimation", FieldKind::Period);
        let wire = encode_value(&estimation, &"2h 30m".into()).unwrap();
        assert_eq!(wire, json!({"$type": "PeriodValue", "minutes": 150}));
        assert_eq!(decode(&estimation, &wire), FieldValue::from("2h 30m"));

        let wire = encode_value(&estimation, &"150m".into()).unwrap();
        assert_eq!(decode(&estimation, &wire), FieldValue::from("2h 30m"));
    }

    #[rstest]
    #[case::enum_single(priority(), FieldValue::from("Critical"))]
    #[case::state(
        FieldDescriptor::new("State", FieldKind::State).with_allowed(["Open", "In Progress"]),
        FieldValue::from("In Progress")
    )]
    #[case::enum_multi(
        FieldDescriptor::new("Fix versions", FieldKind::EnumMulti).with_allowed(["1.0", "2.0"]),
        FieldValue::from("1.0, 2.0")
    )]
    #[case::user(FieldDescriptor::new("Assignee", FieldKind::User), FieldValue::from("jane.doe"))]
    #[case::period(FieldDescriptor::new("Estimation", FieldKind::Period), FieldValue::from("3d 5h"))]
    #[case::integer(FieldDescriptor::new("Story points", FieldKind::Number), FieldValue::from(8_i64))]
    #[case::float(
        FieldDescriptor::new("Ratio", FieldKind::Number),
        FieldValue::Number(Number::from_f64(0.75).unwrap())
    )]
    #[case::boolean(FieldDescriptor::new("Regression", FieldKind::Boolean), FieldValue::from(true))]
    #[case::string(FieldDescriptor::new("Customer", FieldKind::String), FieldValue::from("Acme Ltd"))]
    #[case::text(
        FieldDescriptor::new("Notes", FieldKind::Text),
        FieldValue::from("First line\nSecond line")
    )]
    #[case::cleared(FieldDescriptor::new("Assignee", FieldKind::User), FieldValue::Null)]
    fn test_decode_inverts_encode(#[case] descriptor: FieldDescriptor, #[case] value: FieldValue) {
        let wire = encode_value(&descriptor, &value).unwrap();
        assert_eq!(decode(&descriptor, &wire), value);
    }

    #[test]
    fn test_period_three_days_five_hours() {
        let estimation = FieldDescriptor::new("Estimation", FieldKind::Period);
        let wire = encode_value(&estimation, &"3d 5h".into()).unwrap();
        assert_eq!(wire, json!({"$type": "PeriodValue", "minutes": 3 * 8 * 60 + 5 * 60}));
        assert_eq!(decode(&estimation, &wire), FieldValue::from("3d 5h"));
    }

    #[test]
    fn test_text_field_uses_text_wire_shape() {
        let notes = FieldDescriptor::new("Notes", FieldKind::from_value_type("text"));
        let fragment = encode(&notes, &"hello".into()).unwrap();
        assert_eq!(
            fragment,
            json!({
                "name": "Notes",
                "$type": "TextIssueCustomField",
                "value": {"$type": "TextFieldValue", "text": "hello"}
            })
        );
        assert_eq!(decode(&notes, &fragment["value"]), FieldValue::from("hello"));
    }

    #[test]
    fn test_period_rejects_garbage() {
        let estimation = FieldDescriptor::new("Estimation", FieldKind::Period);
        let err = encode_value(&estimation, &"soon".into()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationError);
    }

    #[test]
    fn test_user_encodes_login() {
        let assignee = FieldDescriptor::new("Assignee", FieldKind::User);
        let fragment = encode(&assignee, &"jane.doe".into()).unwrap();
        assert_eq!(fragment["$type"], "SingleUserIssueCustomField");
        assert_eq!(fragment["value"], json!({"login": "jane.doe"}));
        assert_eq!(
            decode(&assignee, &json!({"login": "jane.doe", "name": "Jane"})),
            FieldValue::from("jane.doe")
        );
    }

    #[rstest]
    #[case::null_clears(FieldKind::User, FieldValue::Null, Value::Null)]
    #[case::null_multi(FieldKind::EnumMulti, FieldValue::Null, json!([]))]
    #[case::number_from_text(FieldKind::Number, "42".into(), json!(42))]
    #[case::float_from_text(FieldKind::Number, "1.5".into(), json!(1.5))]
    #[case::bool_from_text(FieldKind::Boolean, "yes".into(), json!(true))]
    #[case::string_from_number(FieldKind::String, FieldValue::from(7_i64), json!("7"))]
    #[case::text_wraps_value(FieldKind::Text, "line one\nline two".into(), json!({"$type": "TextFieldValue", "text": "line one\nline two"}))]
    fn test_coercion(#[case] kind: FieldKind, #[case] value: FieldValue, #[case] expected: Value) {
        let descriptor = FieldDescriptor::new("Field", kind);
        assert_eq!(encode_value(&descriptor, &value).unwrap(), expected);
    }

    #[rstest]
    #[case::empty(FieldKind::String, "  ")]
    #[case::empty_text(FieldKind::Text, "")]
    #[case::not_a_number(FieldKind::Number, "many")]
    #[case::not_a_bool(FieldKind::Boolean, "maybe")]
    fn test_rejects(#[case] kind: FieldKind, #[case] input: &str) {
        let descriptor = FieldDescriptor::new("Field", kind);
        assert!(encode_value(&descriptor, &input.into()).is_err());
    }

    #[test]
    fn test_from_json_rejects_objects() {
        let err = FieldValue::from_json("Priority", json!({"name": "Critical"})).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationError);
        assert!(err.summary.contains("simple scalars"));
    }

    #[rstest]
    #[case("enum[1]", FieldKind::EnumSingle)]
    #[case("enum[*]", FieldKind::EnumMulti)]
    #[case("state[1]", FieldKind::State)]
    #[case("user[1]", FieldKind::User)]
    #[case("period", FieldKind::Period)]
    #[case("integer", FieldKind::Number)]
    #[case("version[*]", FieldKind::EnumMulti)]
    #[case("string", FieldKind::String)]
    #[case("text", FieldKind::Text)]
    #[case("date and time", FieldKind::String)]
    fn test_kind_from_value_type(#[case] value_type: &str, #[case] expected: FieldKind) {
        assert_eq!(FieldKind::from_value_type(value_type), expected);
    }

    #[test]
    fn test_decode_falls_back_to_presentation() {
        let descriptor = FieldDescriptor::new("Due Date", FieldKind::String);
        assert_eq!(
            decode(&descriptor, &json!({"presentation": "2026-01-01"})),
            FieldValue::from("2026-01-01")
        );
    }
}
