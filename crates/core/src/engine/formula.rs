use crate::domain::value::Value;
use crate::engine::expression::{BinaryOp, Expr, Expression};
use crate::engine::store::ValueStore;
use crate::errors::EngineError;

/// Parses and evaluates an arithmetic formula against the store.
pub fn evaluate(formula: &str, store: &ValueStore) -> Result<f64, EngineError> {
    evaluate_number(&Expression::formula(formula)?, store)
}

/// Parses and evaluates a condition predicate against the store.
pub fn evaluate_predicate(predicate: &str, store: &ValueStore) -> Result<bool, EngineError> {
    evaluate_bool(&Expression::predicate(predicate)?, store)
}

/// Evaluates a parsed expression to a number. Division by zero and overflow are errors, never
/// clamped, so callers can render a placeholder instead of a misleading figure.
pub fn evaluate_number(expression: &Expression, store: &ValueStore) -> Result<f64, EngineError> {
    number(expression.root(), store)
}

pub fn evaluate_bool(expression: &Expression, store: &ValueStore) -> Result<bool, EngineError> {
    match value(expression.root(), store)? {
        Value::Bool(flag) => Ok(flag),
        other => Err(EngineError::TypeMismatch(format!(
            "condition `{}` evaluated to {} instead of a boolean",
            expression.source(),
            other.type_name()
        ))),
    }
}

fn number(expr: &Expr, store: &ValueStore) -> Result<f64, EngineError> {
    match expr {
        Expr::Number(literal) => Ok(*literal),
        Expr::Variable(name) => store.number(name),
        Expr::Negate(inner) => Ok(-number(inner, store)?),
        Expr::Binary { op, left, right } => {
            let result = match op {
                BinaryOp::Add => number(left, store)? + number(right, store)?,
                BinaryOp::Subtract => number(left, store)? - number(right, store)?,
                BinaryOp::Multiply => number(left, store)? * number(right, store)?,
                BinaryOp::Divide => {
                    let dividend = number(left, store)?;
                    let divisor = number(right, store)?;
                    if divisor == 0.0 {
                        return Err(EngineError::DivisionByZero);
                    }
                    dividend / divisor
                }
                other => {
                    return Err(EngineError::TypeMismatch(format!(
                        "`{}` produces a boolean where a number is required",
                        other.symbol()
                    )))
                }
            };
            if result.is_finite() {
                Ok(result)
            } else {
                Err(EngineError::NonFiniteResult)
            }
        }
        Expr::Text(text) => {
            Err(EngineError::TypeMismatch(format!("text `{text}` used where a number is required")))
        }
        Expr::Bool(flag) => {
            Err(EngineError::TypeMismatch(format!("`{flag}` used where a number is required")))
        }
    }
}

fn value(expr: &Expr, store: &ValueStore) -> Result<Value, EngineError> {
    match expr {
        Expr::Text(text) => Ok(Value::Text(text.clone())),
        Expr::Bool(flag) => Ok(Value::Bool(*flag)),
        Expr::Variable(name) => match store.get(name) {
            Some(Value::NotANumber) => Err(EngineError::NotANumber(name.clone())),
            Some(found) => Ok(found.clone()),
            None => Err(EngineError::MissingVariable(name.clone())),
        },
        Expr::Binary { op: BinaryOp::And, left, right } => {
            Ok(Value::Bool(boolean(left, store)? && boolean(right, store)?))
        }
        Expr::Binary { op: BinaryOp::Or, left, right } => {
            Ok(Value::Bool(boolean(left, store)? || boolean(right, store)?))
        }
        Expr::Binary { op, left, right } if !op.is_arithmetic() => {
            compare(*op, &value(left, store)?, &value(right, store)?).map(Value::Bool)
        }
        Expr::Number(_) | Expr::Negate(_) | Expr::Binary { .. } => {
            number(expr, store).map(Value::Number)
        }
    }
}

fn boolean(expr: &Expr, store: &ValueStore) -> Result<bool, EngineError> {
    match value(expr, store)? {
        Value::Bool(flag) => Ok(flag),
        other => Err(EngineError::TypeMismatch(format!(
            "`&&`/`||` need boolean operands, found {}",
            other.type_name()
        ))),
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<bool, EngineError> {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => match op {
            BinaryOp::Less => Ok(left < right),
            BinaryOp::LessOrEqual => Ok(left <= right),
            BinaryOp::Greater => Ok(left > right),
            BinaryOp::GreaterOrEqual => Ok(left >= right),
            BinaryOp::Equal => Ok(left == right),
            BinaryOp::NotEqual => Ok(left != right),
            other => Err(EngineError::TypeMismatch(format!(
                "`{}` is not a comparison",
                other.symbol()
            ))),
        },
        (Value::Text(left), Value::Text(right)) => equality(op, left == right),
        (Value::Bool(left), Value::Bool(right)) => equality(op, left == right),
        (left, right) => Err(EngineError::TypeMismatch(format!(
            "cannot compare {} with {} using `{}`",
            left.type_name(),
            right.type_name(),
            op.symbol()
        ))),
    }
}

fn equality(op: BinaryOp, equal: bool) -> Result<bool, EngineError> {
    match op {
        BinaryOp::Equal => Ok(equal),
        BinaryOp::NotEqual => Ok(!equal),
        other => Err(EngineError::TypeMismatch(format!(
            "`{}` is only defined for numbers",
            other.symbol()
        ))),
    }
}
