use crate::environment::Environment;
use crate::error::{CapabilityKind, Result, TemplateError};
use crate::value::Value;

/// 向环境注册所有内置测试（`x is odd` 等）
pub fn register_tests(env: &mut Environment) {
    env.add_test("empty", test_empty);
    env.add_test("odd", test_odd);
    env.add_test("even", test_even);
    env.add_test("divisibleby", test_divisibleby);
    env.add_test("defined", test_defined);
    env.add_test("none", test_none);
}

fn test_empty(value: &Value, _args: &[Value]) -> Result<bool> {
    Ok(match value {
        Value::Undefined | Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::List(items) => items.is_empty(),
        Value::Map(map) => map.is_empty(),
        Value::Number(_) | Value::Callable(_) => false,
    })
}

fn test_odd(value: &Value, _args: &[Value]) -> Result<bool> {
    Ok(value.to_number() % 2.0 == 1.0)
}

fn test_even(value: &Value, _args: &[Value]) -> Result<bool> {
    Ok(value.to_number() % 2.0 == 0.0)
}

fn test_divisibleby(value: &Value, args: &[Value]) -> Result<bool> {
    let Some(divisor) = args.first() else {
        return Err(TemplateError::InvalidArgument {
            kind: CapabilityKind::Test,
            name: "divisibleby".into(),
            message: "缺少除数".into(),
        });
    };
    Ok(value.to_number() % divisor.to_number() == 0.0)
}

fn test_defined(value: &Value, _args: &[Value]) -> Result<bool> {
    Ok(!matches!(value, Value::Undefined))
}

fn test_none(value: &Value, _args: &[Value]) -> Result<bool> {
    Ok(matches!(value, Value::Null))
}
