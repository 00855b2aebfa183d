//! Applicability and selection condition evaluator
//!
//! Evaluates a `ConditionSet` against typed matter attributes. Keys are
//! checked against a closed attribute schema so that a typo in a template
//! surfaces as an `ApplicabilityError` instead of a silent mismatch.

use std::collections::BTreeMap;
use std::fmt;

use shared_types::{AttributeKind, AttributeValue, ConditionExpr, ConditionSet, MatterAttributes};

/// Attribute keys every deployment understands.
const STANDARD_ATTRIBUTES: &[(&str, AttributeKind)] = &[
    ("practice_area", AttributeKind::Text),
    ("sub_type", AttributeKind::Text),
    ("jurisdiction", AttributeKind::Text),
    ("client_type", AttributeKind::Text),
    ("property_type", AttributeKind::Text),
    ("has_mortgage", AttributeKind::Bool),
    ("is_leasehold", AttributeKind::Bool),
    ("is_new_build", AttributeKind::Bool),
    ("has_lender", AttributeKind::Bool),
    ("requires_court_filing", AttributeKind::Bool),
    ("is_contested", AttributeKind::Bool),
    ("property_value", AttributeKind::Number),
    ("claim_value", AttributeKind::Number),
    ("party_count", AttributeKind::Number),
];

/// Why a condition could not be evaluated to a definite answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplicabilityError {
    /// The condition names a key outside the attribute schema.
    UnknownAttribute(String),
    /// The key is known but the matter collaborator did not supply it.
    MissingAttribute(String),
    /// The supplied or expected value does not match the schema type.
    TypeMismatch {
        key: String,
        expected: AttributeKind,
        found: AttributeKind,
    },
}

impl fmt::Display for ApplicabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicabilityError::UnknownAttribute(key) => {
                write!(f, "unknown matter attribute '{key}'")
            }
            ApplicabilityError::MissingAttribute(key) => {
                write!(f, "matter attribute '{key}' is not available")
            }
            ApplicabilityError::TypeMismatch {
                key,
                expected,
                found,
            } => write!(
                f,
                "matter attribute '{key}' expects {expected} but got {found}"
            ),
        }
    }
}

impl std::error::Error for ApplicabilityError {}

/// The closed set of matter attribute keys and their value types.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSchema {
    kinds: BTreeMap<String, AttributeKind>,
}

impl AttributeSchema {
    /// The standard legal-matter attributes.
    pub fn standard() -> Self {
        Self {
            kinds: STANDARD_ATTRIBUTES
                .iter()
                .map(|(k, kind)| (k.to_string(), *kind))
                .collect(),
        }
    }

    /// Standard attributes plus deployment-specific extras from config.
    pub fn with_extra(extra: &BTreeMap<String, AttributeKind>) -> Self {
        let mut schema = Self::standard();
        schema
            .kinds
            .extend(extra.iter().map(|(k, v)| (k.clone(), *v)));
        schema
    }

    pub fn kind_of(&self, key: &str) -> Option<AttributeKind> {
        self.kinds.get(key).copied()
    }
}

impl Default for AttributeSchema {
    fn default() -> Self {
        Self::standard()
    }
}

/// Evaluate every condition in the set (AND semantics). An empty set is true.
pub fn evaluate_conditions(
    conditions: &ConditionSet,
    attributes: &MatterAttributes,
    schema: &AttributeSchema,
) -> Result<bool, ApplicabilityError> {
    for (key, expr) in conditions {
        if !evaluate_expr(key, expr, attributes, schema)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Like `evaluate_conditions`, but an evaluation error counts as `false`
/// and is logged, so a bad condition never stalls a workflow.
pub fn is_applicable(
    conditions: &ConditionSet,
    attributes: &MatterAttributes,
    schema: &AttributeSchema,
    subject: &str,
) -> bool {
    match evaluate_conditions(conditions, attributes, schema) {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(subject, error = %err, "condition evaluation failed; treating as not applicable");
            false
        }
    }
}

fn evaluate_expr(
    key: &str,
    expr: &ConditionExpr,
    attributes: &MatterAttributes,
    schema: &AttributeSchema,
) -> Result<bool, ApplicabilityError> {
    let kind = schema
        .kind_of(key)
        .ok_or_else(|| ApplicabilityError::UnknownAttribute(key.to_string()))?;
    let actual = match (attributes.get(key), expr) {
        (value, ConditionExpr::Exists { exists }) => return Ok(value.is_some() == *exists),
        (Some(value), _) => value,
        (None, _) => return Err(ApplicabilityError::MissingAttribute(key.to_string())),
    };
    expect_kind(key, kind, actual)?;

    match expr {
        ConditionExpr::Equals(expected) => {
            expect_kind(key, kind, expected)?;
            Ok(actual == expected)
        }
        ConditionExpr::OneOf { one_of } => {
            for candidate in one_of {
                expect_kind(key, kind, candidate)?;
            }
            Ok(one_of.iter().any(|candidate| candidate == actual))
        }
        ConditionExpr::Not { not } => {
            expect_kind(key, kind, not)?;
            Ok(actual != not)
        }
        ConditionExpr::GreaterThan { gt } => Ok(as_number(key, actual)? > *gt),
        ConditionExpr::LessThan { lt } => Ok(as_number(key, actual)? < *lt),
        ConditionExpr::Exists { exists } => Ok(*exists),
    }
}

fn expect_kind(
    key: &str,
    expected: AttributeKind,
    value: &AttributeValue,
) -> Result<(), ApplicabilityError> {
    if value.kind() == expected {
        Ok(())
    } else {
        Err(ApplicabilityError::TypeMismatch {
            key: key.to_string(),
            expected,
            found: value.kind(),
        })
    }
}

fn as_number(key: &str, value: &AttributeValue) -> Result<f64, ApplicabilityError> {
    match value {
        AttributeValue::Number(n) => Ok(*n),
        other => Err(ApplicabilityError::TypeMismatch {
            key: key.to_string(),
            expected: AttributeKind::Number,
            found: other.kind(),
        }),
    }
}
