//! Condition validation and evaluation engine.
//!
//! Rules are flat conjunctions of structured conditions. This module
//! validates proposed condition lists at registration time and evaluates
//! them against caller-supplied action records at issuance time. There is
//! no nesting and no disjunction: a rule is met iff every condition holds.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum number of conditions a rule may carry.
pub const MAX_CONDITIONS: usize = 20;

/// Maximum number of entries in an action record.
pub const MAX_ACTION_FIELDS: usize = 50;

/// Maximum length of an action record field name.
pub const MAX_FIELD_NAME_LEN: usize = 100;

/// Comparison operator of a single condition.
///
/// The wire form matches the stored JSON representation; `value` typing
/// is operator-dependent and checked at registration where it can be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// Strict type-plus-value equality.
    #[serde(rename = "=")]
    Eq,
    /// Strict inequality.
    #[serde(rename = "!=")]
    Ne,
    /// Numeric less-than.
    #[serde(rename = "<")]
    Lt,
    /// Numeric less-than-or-equal.
    #[serde(rename = "<=")]
    Le,
    /// Numeric greater-than.
    #[serde(rename = ">")]
    Gt,
    /// Numeric greater-than-or-equal.
    #[serde(rename = ">=")]
    Ge,
    /// Membership in a list value.
    #[serde(rename = "IN")]
    In,
    /// Absence from a list value.
    #[serde(rename = "NOT IN")]
    NotIn,
    /// Substring match against a string actual.
    #[serde(rename = "CONTAINS")]
    Contains,
    /// Negated substring match against a string actual.
    #[serde(rename = "NOT CONTAINS")]
    NotContains,
}

impl Operator {
    /// Parses the wire form of an operator.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "=" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "IN" => Some(Self::In),
            "NOT IN" => Some(Self::NotIn),
            "CONTAINS" => Some(Self::Contains),
            "NOT CONTAINS" => Some(Self::NotContains),
            _ => None,
        }
    }

    /// Wire form of the operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::Contains => "CONTAINS",
            Self::NotContains => "NOT CONTAINS",
        }
    }

    /// Whether the expected value must be a list.
    pub const fn requires_list(self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }

    /// Whether the expected value must be a real number.
    pub const fn requires_number(self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single (field, operator, value) condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Action record field the condition reads.
    pub field: String,

    /// Comparison operator.
    pub operator: Operator,

    /// Expected value; typing is operator-dependent.
    pub value: Value,
}

impl Condition {
    /// Creates a condition from its parts.
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self { field: field.into(), operator, value }
    }
}

/// Outcome of evaluating one condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionResult {
    /// Field the condition read.
    pub field: String,

    /// Operator applied.
    pub operator: Operator,

    /// Expected value from the rule.
    pub expected: Value,

    /// Actual value found in the action record; `null` when absent.
    pub actual: Value,

    /// Whether the condition held.
    pub pass: bool,
}

/// Aggregate result of evaluating a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Per-condition results in rule order.
    pub results: Vec<ConditionResult>,

    /// True iff every condition passed.
    pub met: bool,

    /// Human-readable outcome summary.
    pub summary: String,
}

/// Parses a raw JSON condition list, reporting the first violation.
///
/// Used at rule registration where the input is untrusted JSON. Checks
/// run in input order and stop at the first failure, so the reported
/// violation is deterministic for a given input.
///
/// # Errors
///
/// Returns a single human-readable violation message.
pub fn parse_conditions(raw: &Value) -> Result<Vec<Condition>, String> {
    let list = raw.as_array().ok_or_else(|| "conditions must be a list".to_string())?;

    if list.is_empty() {
        return Err("rule must have at least one condition".to_string());
    }
    if list.len() > MAX_CONDITIONS {
        return Err(format!("rule cannot have more than {MAX_CONDITIONS} conditions"));
    }

    let mut conditions = Vec::with_capacity(list.len());
    for (i, entry) in list.iter().enumerate() {
        let n = i + 1;
        let obj =
            entry.as_object().ok_or_else(|| format!("condition {n} must be an object"))?;

        let field = match obj.get("field") {
            None => return Err(format!("condition {n} is missing 'field'")),
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(_) => {
                return Err(format!("condition {n}: 'field' must be a non-empty string"));
            },
        };

        let operator = match obj.get("operator").and_then(Value::as_str) {
            Some(op) => Operator::parse(op)
                .ok_or_else(|| format!("condition {n}: unknown operator '{op}'"))?,
            None => return Err(format!("condition {n}: unknown operator")),
        };

        let value = obj
            .get("value")
            .cloned()
            .ok_or_else(|| format!("condition {n} is missing 'value'"))?;

        check_value_type(n, operator, &value)?;
        conditions.push(Condition { field, operator, value });
    }

    Ok(conditions)
}

/// Validates an already-typed condition list.
///
/// Applied when re-checking stored rules before issuance: a stored rule
/// that no longer validates is corrupt and must not be attested against.
///
/// # Errors
///
/// Returns a single human-readable violation message, first failure wins.
pub fn validate_conditions(conditions: &[Condition]) -> Result<(), String> {
    if conditions.is_empty() {
        return Err("rule must have at least one condition".to_string());
    }
    if conditions.len() > MAX_CONDITIONS {
        return Err(format!("rule cannot have more than {MAX_CONDITIONS} conditions"));
    }

    for (i, condition) in conditions.iter().enumerate() {
        let n = i + 1;
        if condition.field.is_empty() {
            return Err(format!("condition {n}: 'field' must be a non-empty string"));
        }
        check_value_type(n, condition.operator, &condition.value)?;
    }

    Ok(())
}

/// Operator-dependent typing of the expected value.
///
/// Only list and numeric requirements are enforced at registration;
/// equality and substring operators accept any value and resolve typing
/// at evaluation time.
fn check_value_type(n: usize, operator: Operator, value: &Value) -> Result<(), String> {
    if operator.requires_list() && !value.is_array() {
        return Err(format!("condition {n}: operator {operator} requires a list value"));
    }
    if operator.requires_number() && value.as_f64().is_none() {
        return Err(format!("condition {n}: operator {operator} requires a numeric value"));
    }
    Ok(())
}

/// Validates a caller-supplied action record.
///
/// Records are finite maps of scalars or homogeneous scalar lists,
/// 1 to 50 entries, field names 1 to 100 characters.
///
/// # Errors
///
/// Returns a single human-readable violation message.
pub fn validate_action_record(record: &Map<String, Value>) -> Result<(), String> {
    if record.is_empty() {
        return Err("action_data must have at least one field".to_string());
    }
    if record.len() > MAX_ACTION_FIELDS {
        return Err(format!("action_data cannot have more than {MAX_ACTION_FIELDS} fields"));
    }

    for (key, value) in record {
        if key.is_empty() || key.len() > MAX_FIELD_NAME_LEN {
            return Err(format!(
                "action_data field names must be 1 to {MAX_FIELD_NAME_LEN} characters"
            ));
        }
        match value {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {},
            Value::Array(items) => {
                let mut kinds = items.iter().map(scalar_kind);
                match kinds.next() {
                    Some(Some(first)) => {
                        if kinds.any(|k| k != Some(first)) {
                            return Err(format!("action_data field '{key}' list is not homogeneous"));
                        }
                    },
                    Some(None) => {
                        return Err(format!(
                            "action_data field '{key}' list may only contain scalars"
                        ));
                    },
                    None => {},
                }
            },
            Value::Null | Value::Object(_) => {
                return Err(format!(
                    "action_data field '{key}' must be a scalar or a list of scalars"
                ));
            },
        }
    }

    Ok(())
}

fn scalar_kind(value: &Value) -> Option<&'static str> {
    match value {
        Value::String(_) => Some("string"),
        Value::Number(_) => Some("number"),
        Value::Bool(_) => Some("boolean"),
        _ => None,
    }
}

/// Evaluates a condition list against an action record.
///
/// Never fails: a missing or null field makes its condition fail with
/// `actual = null`, and an empty condition list (possible only through a
/// corrupt stored rule) yields `met = false`.
pub fn evaluate(conditions: &[Condition], record: &Map<String, Value>) -> Evaluation {
    let results: Vec<ConditionResult> =
        conditions.iter().map(|c| evaluate_condition(c, record)).collect();

    let total = results.len();
    let passed = results.iter().filter(|r| r.pass).count();
    let met = total > 0 && passed == total;

    let noun = if total == 1 { "condition" } else { "conditions" };
    let summary = if met {
        format!("All {total} {noun} passed")
    } else {
        format!("{} of {total} {noun} failed", total - passed)
    };

    Evaluation { results, met, summary }
}

fn evaluate_condition(condition: &Condition, record: &Map<String, Value>) -> ConditionResult {
    let actual = record.get(&condition.field).cloned().unwrap_or(Value::Null);

    let pass = if actual.is_null() {
        false
    } else {
        match condition.operator {
            Operator::Eq => actual == condition.value,
            Operator::Ne => actual != condition.value,
            Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
                compare_numeric(condition.operator, &actual, &condition.value)
            },
            Operator::In => {
                condition.value.as_array().is_some_and(|list| list.contains(&actual))
            },
            Operator::NotIn => {
                condition.value.as_array().is_some_and(|list| !list.contains(&actual))
            },
            Operator::Contains => substring_match(&actual, &condition.value).unwrap_or(false),
            Operator::NotContains => {
                substring_match(&actual, &condition.value).map(|found| !found).unwrap_or(false)
            },
        }
    };

    ConditionResult {
        field: condition.field.clone(),
        operator: condition.operator,
        expected: condition.value.clone(),
        actual,
        pass,
    }
}

/// Ordering comparison after coercing the actual to a real number.
///
/// Numbers compare directly; numeric strings are parsed. Anything else
/// fails the condition rather than erroring.
fn compare_numeric(operator: Operator, actual: &Value, expected: &Value) -> bool {
    let (Some(lhs), Some(rhs)) = (coerce_to_f64(actual), expected.as_f64()) else {
        return false;
    };

    match operator {
        Operator::Lt => lhs < rhs,
        Operator::Le => lhs <= rhs,
        Operator::Gt => lhs > rhs,
        Operator::Ge => lhs >= rhs,
        _ => false,
    }
}

fn coerce_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Substring semantics: the actual must be a string; the expected value
/// is matched by its string form. `None` means the actual was not a
/// string, which fails both CONTAINS and NOT CONTAINS.
fn substring_match(actual: &Value, expected: &Value) -> Option<bool> {
    let haystack = actual.as_str()?;
    let needle = match expected {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Some(haystack.contains(&needle))
}
