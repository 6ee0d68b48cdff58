//! Named functions available to in-memory filter evaluation

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{FeatureStoreError, Result};
use crate::types::Value;

/// Callable filter function
pub type FilterFunction = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Registry of functions callable from post-filters
///
/// Names are case-insensitive. A fresh registry carries the built-in string
/// and math functions; callers register their own on top.
#[derive(Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, FilterFunction>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FunctionRegistry {
    /// An empty registry
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// A registry with the built-in functions
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("strLength", |args| {
            string_arg("strLength", args).map(|s| {
                s.map_or(Value::Null, |s| Value::Integer(s.chars().count() as i64))
            })
        });
        registry.register("strToUpperCase", |args| {
            string_arg("strToUpperCase", args)
                .map(|s| s.map_or(Value::Null, |s| Value::Text(s.to_uppercase())))
        });
        registry.register("strToLowerCase", |args| {
            string_arg("strToLowerCase", args)
                .map(|s| s.map_or(Value::Null, |s| Value::Text(s.to_lowercase())))
        });
        registry.register("strTrim", |args| {
            string_arg("strTrim", args)
                .map(|s| s.map_or(Value::Null, |s| Value::Text(s.trim().to_string())))
        });
        registry.register("abs", |args| {
            numeric_fn("abs", args, i64::checked_abs, f64::abs)
        });
        registry.register("floor", |args| {
            numeric_fn("floor", args, Some, f64::floor)
        });
        registry.register("ceil", |args| numeric_fn("ceil", args, Some, f64::ceil));
        registry
    }

    /// Register (or replace) a function
    pub fn register<F>(&mut self, name: &str, function: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.functions
            .insert(name.to_lowercase(), Arc::new(function));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_lowercase())
    }

    /// Call a function by name
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let function = self.functions.get(&name.to_lowercase()).ok_or_else(|| {
            FeatureStoreError::unsupported(format!("Unknown filter function '{}'", name))
        })?;
        function(args)
    }
}

fn single_arg<'a>(name: &str, args: &'a [Value]) -> Result<&'a Value> {
    match args {
        [value] => Ok(value),
        _ => Err(FeatureStoreError::invalid_filter(format!(
            "{} expects 1 argument, got {}",
            name,
            args.len()
        ))),
    }
}

fn string_arg(name: &str, args: &[Value]) -> Result<Option<String>> {
    match single_arg(name, args)? {
        Value::Null => Ok(None),
        value => Ok(Some(value.to_string())),
    }
}

fn numeric_fn(
    name: &str,
    args: &[Value],
    int_op: fn(i64) -> Option<i64>,
    float_op: fn(f64) -> f64,
) -> Result<Value> {
    match single_arg(name, args)? {
        Value::Null => Ok(Value::Null),
        Value::Integer(i) => int_op(*i).map(Value::Integer).ok_or_else(|| {
            FeatureStoreError::invalid_filter(format!("{} overflowed for {}", name, i))
        }),
        other => other
            .as_f64()
            .map(|f| Value::Double(float_op(f)))
            .ok_or_else(|| {
                FeatureStoreError::invalid_filter(format!(
                    "{} expects a number, got {}",
                    name,
                    other.type_name()
                ))
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_string_functions() {
        let registry = FunctionRegistry::default();
        assert_eq!(
            registry.call("strLength", &[Value::from("héllo")]).unwrap(),
            Value::Integer(5)
        );
        assert_eq!(
            registry.call("STRTOUPPERCASE", &[Value::from("ab")]).unwrap(),
            Value::from("AB")
        );
        assert_eq!(
            registry.call("strTrim", &[Value::Null]).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_builtin_math_functions() {
        let registry = FunctionRegistry::default();
        assert_eq!(registry.call("abs", &[Value::Integer(-3)]).unwrap(), Value::Integer(3));
        assert_eq!(registry.call("floor", &[Value::Double(2.7)]).unwrap(), Value::Double(2.0));
        assert!(registry.call("ceil", &[Value::Boolean(true)]).is_err());
    }

    #[test]
    fn test_unknown_function_is_unsupported() {
        let err = FunctionRegistry::default()
            .call("customFunc", &[Value::from("x")])
            .unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_register_custom_function() {
        let mut registry = FunctionRegistry::empty();
        registry.register("customFunc", |args| {
            Ok(Value::Integer(args.len() as i64 * 10))
        });
        assert!(registry.contains("customfunc"));
        assert_eq!(
            registry.call("customFunc", &[Value::Null]).unwrap(),
            Value::Integer(10)
        );
        assert!(!registry.contains("strLength"));
    }

    #[test]
    fn test_wrong_arity() {
        let err = FunctionRegistry::default().call("strLength", &[]).unwrap_err();
        assert!(matches!(err, FeatureStoreError::InvalidFilter(_)));
    }
}
