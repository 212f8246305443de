//! Helpers shared by the reference processes.

use cellsim_core::error::ProcessFailure;
use cellsim_core::value::Value;
use serde::de::DeserializeOwned;

/// Parse a process configuration; a missing configuration means all defaults.
pub fn parse_config<T: DeserializeOwned + Default>(config: &serde_json::Value) -> Result<T, ProcessFailure> {
    if config.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(config.clone())?)
}

/// Encode `amount` with the same shape as `like`: counts are truncated
/// towards zero, everything else is written as a real.
pub fn amount_like(like: &Value, amount: f64) -> Value {
    match like {
        Value::Count(_) => Value::Count(amount.trunc() as i64),
        _ => Value::Real(amount),
    }
}

/// Round a claim so an integer pool accepts it.
pub fn claimable(like: &Value, amount: f64) -> f64 {
    match like {
        Value::Count(_) => amount.floor(),
        _ => amount,
    }
}

pub fn require(condition: bool, message: impl Into<String>) -> Result<(), ProcessFailure> {
    if condition {
        Ok(())
    } else {
        Err(ProcessFailure::new(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_follow_the_leaf_shape() {
        assert_eq!(amount_like(&Value::Count(3), -2.7), Value::Count(-2));
        assert_eq!(amount_like(&Value::Real(3.0), -2.7), Value::Real(-2.7));
        assert_eq!(claimable(&Value::Count(0), 4.9), 4.0);
    }
}
