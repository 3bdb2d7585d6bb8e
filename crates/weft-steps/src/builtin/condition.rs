use std::cmp::Ordering;

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use weft_core::error::{Result, WeftError};

use crate::coerce::{number_value, parse_bool, parse_f64_text};
use crate::context::ExecutionContext;
use crate::handler::{output, StepHandler, StepOutput};

const STEP_TYPE: &str = "condition";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
}

impl Operator {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "equals" => Self::Equals,
            "not_equals" => Self::NotEquals,
            "greater_than" => Self::GreaterThan,
            "greater_than_or_equal" => Self::GreaterThanOrEqual,
            "less_than" => Self::LessThan,
            "less_than_or_equal" => Self::LessThanOrEqual,
            "contains" => Self::Contains,
            "not_contains" => Self::NotContains,
            "starts_with" => Self::StartsWith,
            "ends_with" => Self::EndsWith,
            "is_empty" => Self::IsEmpty,
            "is_not_empty" => Self::IsNotEmpty,
            _ => return None,
        })
    }

    fn is_ordering(self) -> bool {
        matches!(
            self,
            Self::GreaterThan | Self::GreaterThanOrEqual | Self::LessThan | Self::LessThanOrEqual
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Number,
    Boolean,
}

impl ValueType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

/// Compare two resolved operands. Text operators ignore `value_type`.
pub fn evaluate(left: &str, op: Operator, right: &str, value_type: ValueType) -> Result<bool> {
    match op {
        Operator::Contains => return Ok(left.contains(right)),
        Operator::NotContains => return Ok(!left.contains(right)),
        Operator::StartsWith => return Ok(left.starts_with(right)),
        Operator::EndsWith => return Ok(left.ends_with(right)),
        Operator::IsEmpty => return Ok(left.trim().is_empty()),
        Operator::IsNotEmpty => return Ok(!left.trim().is_empty()),
        _ => {}
    }

    let ordering = match value_type {
        ValueType::Number => {
            let l = number_operand(left)?;
            let r = number_operand(right)?;
            l.partial_cmp(&r).ok_or_else(|| {
                WeftError::handler(STEP_TYPE, format!("cannot compare {} and {}", l, r))
            })?
        }
        ValueType::Boolean => {
            if op.is_ordering() {
                return Err(WeftError::handler(
                    STEP_TYPE,
                    "ordering operators are not defined for boolean values",
                ));
            }
            parse_bool(left).cmp(&parse_bool(right))
        }
        ValueType::String => left.cmp(right),
    };

    Ok(match op {
        Operator::Equals => ordering == Ordering::Equal,
        Operator::NotEquals => ordering != Ordering::Equal,
        Operator::GreaterThan => ordering == Ordering::Greater,
        Operator::GreaterThanOrEqual => ordering != Ordering::Less,
        Operator::LessThan => ordering == Ordering::Less,
        Operator::LessThanOrEqual => ordering != Ordering::Greater,
        _ => false,
    })
}

fn number_operand(text: &str) -> Result<f64> {
    parse_f64_text(text).ok_or_else(|| {
        WeftError::handler(STEP_TYPE, format!("'{}' is not a number", text))
    })
}

fn typed_operand(text: &str, value_type: ValueType) -> Value {
    match value_type {
        ValueType::String => Value::String(text.to_string()),
        ValueType::Number => parse_f64_text(text)
            .map(number_value)
            .unwrap_or_else(|| Value::String(text.to_string())),
        ValueType::Boolean => Value::Bool(parse_bool(text)),
    }
}

/// Evaluates `leftValue <operator> rightValue`; the boolean result routes tagged edges.
pub struct ConditionStep;

impl StepHandler for ConditionStep {
    fn step_type(&self) -> &'static str {
        STEP_TYPE
    }

    fn display_name(&self) -> &'static str {
        "Condition"
    }

    fn description(&self) -> &'static str {
        "Compare two values and route along the matching true/false edges."
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "leftValue": { "type": "string" },
                "operator": {
                    "type": "string",
                    "enum": [
                        "equals", "not_equals", "greater_than", "greater_than_or_equal",
                        "less_than", "less_than_or_equal", "contains", "not_contains",
                        "starts_with", "ends_with", "is_empty", "is_not_empty"
                    ]
                },
                "rightValue": { "type": "string" },
                "valueType": { "type": "string", "enum": ["string", "number", "boolean"], "default": "string" }
            },
            "required": ["operator"]
        })
    }

    fn validate_config(&self, config: &Map<String, Value>) -> Result<()> {
        let op = config.get("operator").and_then(Value::as_str).ok_or_else(|| {
            WeftError::invalid_config(STEP_TYPE, "operator is required")
        })?;
        if Operator::parse(op).is_none() {
            return Err(WeftError::invalid_config(
                STEP_TYPE,
                format!("unknown operator '{}'", op),
            ));
        }
        if let Some(vt) = config.get("valueType").and_then(Value::as_str) {
            if ValueType::parse(vt).is_none() {
                return Err(WeftError::invalid_config(
                    STEP_TYPE,
                    format!("unknown valueType '{}'", vt),
                ));
            }
        }
        Ok(())
    }

    fn execute<'a>(&'a self, ctx: &'a mut ExecutionContext) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            let op_name = ctx.config_string("operator").unwrap_or_default();
            let op = Operator::parse(&op_name).ok_or_else(|| {
                WeftError::handler(STEP_TYPE, format!("unknown operator '{}'", op_name))
            })?;
            let type_name = ctx
                .config_string("valueType")
                .unwrap_or_else(|| "string".to_string());
            let value_type = ValueType::parse(&type_name).ok_or_else(|| {
                WeftError::handler(STEP_TYPE, format!("unknown valueType '{}'", type_name))
            })?;

            let left = ctx.resolved_config("leftValue").unwrap_or_default();
            let right = ctx.resolved_config("rightValue").unwrap_or_default();
            let result = evaluate(&left, op, &right, value_type)?;

            Ok(output(json!({
                "result": result,
                "leftValue": typed_operand(&left, value_type),
                "rightValue": typed_operand(&right, value_type),
                "operator": op_name,
                "valueType": value_type.as_str(),
            })))
        })
    }
}
