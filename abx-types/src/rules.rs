//! Targeting rules and the dynamically-typed attribute values they match.

use serde::{Deserialize, Serialize};

/// Comparison operator of one targeting rule.
///
/// The wire form is the SCREAMING_SNAKE_CASE name. Operators this build
/// does not know arrive as [`Operator::Other`] and always evaluate false,
/// so a newer control plane cannot accidentally widen an audience here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    VersionGreaterThan,
    VersionLessThan,
    VersionEquals,
    InList,
    NotInList,
    /// Any operator name this build does not recognize.
    #[serde(untagged)]
    Other(String),
}

/// A user attribute value or rule comparison value.
///
/// Attributes arrive as arbitrary JSON; the closed set of shapes the
/// operators understand is modeled explicitly so operator dispatch is a
/// pair-match instead of reflection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Number(f64),
    String(String),
    StringList(Vec<String>),
}

impl AttrValue {
    /// Printable form used by the string-equality operators.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            AttrValue::Bool(b) => b.to_string(),
            AttrValue::Number(n) => n.to_string(),
            AttrValue::String(s) => s.clone(),
            AttrValue::StringList(items) => items.join(","),
        }
    }

    /// Numeric coercion for the ordering operators.
    ///
    /// Numbers pass through; numeric strings parse; everything else is
    /// not a number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            AttrValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// The value as a plain string, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The value as a list of strings, if it is one.
    #[must_use]
    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            AttrValue::StringList(items) => Some(items),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<f64> for AttrValue {
    fn from(n: f64) -> Self {
        AttrValue::Number(n)
    }
}

/// One targeting rule. A user matches an experiment only if every rule of
/// the experiment evaluates true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetingRule {
    /// User attribute to inspect (for example "country", "app_version").
    pub attribute: String,
    /// Comparison to apply.
    pub operator: Operator,
    /// Right-hand side of the comparison.
    pub value: AttrValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_wire_names_round_trip() {
        let json = "\"GREATER_THAN_OR_EQUAL\"";
        let op: Operator = serde_json::from_str(json).unwrap();
        assert_eq!(op, Operator::GreaterThanOrEqual);
        assert_eq!(serde_json::to_string(&op).unwrap(), json);
    }

    #[test]
    fn unknown_operator_is_preserved() {
        let op: Operator = serde_json::from_str("\"REGEX_MATCH\"").unwrap();
        assert_eq!(op, Operator::Other("REGEX_MATCH".to_string()));
        assert_eq!(serde_json::to_string(&op).unwrap(), "\"REGEX_MATCH\"");
    }

    #[test]
    fn attr_value_shapes_from_json() {
        let value: AttrValue = serde_json::from_str("true").unwrap();
        assert_eq!(value, AttrValue::Bool(true));

        let value: AttrValue = serde_json::from_str("42.5").unwrap();
        assert_eq!(value, AttrValue::Number(42.5));

        let value: AttrValue = serde_json::from_str("\"ru\"").unwrap();
        assert_eq!(value, AttrValue::String("ru".to_string()));

        let value: AttrValue = serde_json::from_str("[\"ru\",\"kz\"]").unwrap();
        assert_eq!(
            value,
            AttrValue::StringList(vec!["ru".to_string(), "kz".to_string()])
        );
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(AttrValue::Number(3.0).as_f64(), Some(3.0));
        assert_eq!(AttrValue::from("3.5").as_f64(), Some(3.5));
        assert_eq!(AttrValue::from("abc").as_f64(), None);
        assert_eq!(AttrValue::Bool(true).as_f64(), None);
    }

    #[test]
    fn display_matches_printable_conversion() {
        assert_eq!(AttrValue::Number(1.0).display(), "1");
        assert_eq!(AttrValue::Number(2.5).display(), "2.5");
        assert_eq!(AttrValue::Bool(false).display(), "false");
        assert_eq!(AttrValue::from("x").display(), "x");
    }

    #[test]
    fn rule_round_trips() {
        let rule = TargetingRule {
            attribute: "country".to_string(),
            operator: Operator::InList,
            value: AttrValue::StringList(vec!["ru".to_string()]),
        };
        let json = serde_json::to_string(&rule).unwrap();
        let back: TargetingRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rule);
    }
}
