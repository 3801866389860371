//! RPN 栈机

use crate::context::Context;
use crate::environment::Environment;
use crate::error::{CapabilityKind, Result, TemplateError};
use crate::syntax::expression::{Expression, Instr};
use crate::syntax::operator::Operator;
use crate::value::{Map, Value};
use std::cmp::Ordering;

/// 栈上的槽位。三元 `:` 先把两个分支打包，留给 `?` 选择
#[derive(Debug)]
enum Slot {
    Value(Value),
    Branches(Value, Value),
}

pub fn evaluate(env: &Environment, expr: &Expression, ctx: &Context) -> Result<Value> {
    single(Machine { env, ctx }.run(&expr.instrs, Vec::new())?)
}

/// 以 `seed` 作为栈底初值求值（过滤器链）
pub fn evaluate_with(env: &Environment, expr: &Expression, ctx: &Context, seed: Value) -> Result<Value> {
    single(Machine { env, ctx }.run(&expr.instrs, vec![Slot::Value(seed)])?)
}

fn single(mut values: Vec<Value>) -> Result<Value> {
    match (values.pop(), values.is_empty()) {
        (Some(value), true) => Ok(value),
        _ => Err(TemplateError::MalformedExpression(
            "表达式求值后栈中应恰好剩下一个值".into(),
        )),
    }
}

struct Machine<'a> {
    env: &'a Environment,
    ctx: &'a Context,
}

impl Machine<'_> {
    /// 执行指令并返回栈中剩余的全部值（参数列表会剩下多个）
    fn run(&self, instrs: &[Instr], mut stack: Vec<Slot>) -> Result<Vec<Value>> {
        for instr in instrs {
            match instr {
                Instr::String(s) => stack.push(Slot::Value(Value::String(s.clone()))),
                Instr::Number(n) => stack.push(Slot::Value(Value::Number(*n))),
                Instr::Variable(name) => {
                    let value = match self.ctx.resolve(name) {
                        Some(value) => value,
                        None if self.env.strict_variables() => {
                            return Err(TemplateError::UndefinedVariable(name.clone()));
                        }
                        None => Value::Undefined,
                    };
                    stack.push(Slot::Value(value));
                }
                Instr::Operator(op) => self.apply(*op, &mut stack)?,
                Instr::Key(key) => {
                    let object = pop(&mut stack)?;
                    stack.push(Slot::Value(self.key(object, key)?));
                }
                Instr::Index(key_instrs) => {
                    let key = single(self.run(key_instrs, Vec::new())?)?;
                    let object = pop(&mut stack)?;
                    stack.push(Slot::Value(self.index(object, &key)?));
                }
                Instr::Filter { name, params } => {
                    let input = pop(&mut stack)?;
                    let args = self.params(params)?;
                    let filter = self.env.filter(name).ok_or_else(|| {
                        TemplateError::UnknownCapability {
                            kind: CapabilityKind::Filter,
                            name: name.clone(),
                        }
                    })?;
                    stack.push(Slot::Value(filter(input, &args)?));
                }
                Instr::Test {
                    name,
                    negated,
                    params,
                } => {
                    let input = pop(&mut stack)?;
                    let args = self.params(params)?;
                    let test = self.env.test(name).ok_or_else(|| TemplateError::UnknownCapability {
                        kind: CapabilityKind::Test,
                        name: name.clone(),
                    })?;
                    let passed = test(&input, &args)?;
                    stack.push(Slot::Value(Value::Bool(passed != *negated)));
                }
                Instr::List(len) => {
                    let items = pop_n(&mut stack, *len)?;
                    stack.push(Slot::Value(Value::List(items)));
                }
                Instr::Map(keys) => {
                    let values = pop_n(&mut stack, keys.len())?;
                    let map: Map = keys.iter().cloned().zip(values).collect();
                    stack.push(Slot::Value(Value::Map(map)));
                }
            }
        }

        stack
            .into_iter()
            .map(|slot| match slot {
                Slot::Value(value) => Ok(value),
                Slot::Branches(..) => Err(dangling_alternative()),
            })
            .collect()
    }

    fn params(&self, params: &Option<Vec<Instr>>) -> Result<Vec<Value>> {
        match params {
            Some(instrs) => self.run(instrs, Vec::new()),
            None => Ok(Vec::new()),
        }
    }

    /// `.name`：对象为空时报错，缺失的键得到 undefined
    fn key(&self, object: Value, key: &str) -> Result<Value> {
        let value = match object {
            Value::Undefined | Value::Null => {
                return Err(TemplateError::NullKeyAccess {
                    key: key.to_string(),
                });
            }
            Value::Map(mut map) => map.shift_remove(key).unwrap_or_default(),
            Value::List(mut items) => match key.parse::<usize>() {
                Ok(i) if i < items.len() => items.swap_remove(i),
                _ => Value::Undefined,
            },
            _ => Value::Undefined,
        };
        Ok(self.call_lazy(value))
    }

    /// `[expr]`：键必须存在
    fn index(&self, object: Value, key: &Value) -> Result<Value> {
        let missing = || TemplateError::MissingKey {
            key: key.to_string(),
        };
        let value = match object {
            Value::Undefined | Value::Null => {
                return Err(TemplateError::NullKeyAccess {
                    key: key.to_string(),
                });
            }
            Value::Map(mut map) => map.shift_remove(&key.to_string()).ok_or_else(missing)?,
            Value::List(mut items) => {
                let n = key.to_number();
                if n.fract() != 0.0 || n < 0.0 || n as usize >= items.len() {
                    return Err(missing());
                }
                items.swap_remove(n as usize)
            }
            _ => return Err(missing()),
        };
        Ok(self.call_lazy(value))
    }

    fn call_lazy(&self, value: Value) -> Value {
        match value {
            Value::Callable(f) => f.call(self.ctx),
            value => value,
        }
    }

    fn apply(&self, op: Operator, stack: &mut Vec<Slot>) -> Result<()> {
        let result = match op {
            Operator::Not => Value::Bool(!pop(stack)?.is_true()),
            Operator::Alternative => {
                let otherwise = pop(stack)?;
                let then = pop(stack)?;
                stack.push(Slot::Branches(then, otherwise));
                return Ok(());
            }
            Operator::Conditional => {
                let branches = stack.pop().ok_or_else(stack_underflow)?;
                let cond = pop(stack)?.is_true();
                match branches {
                    Slot::Branches(then, otherwise) => {
                        if cond {
                            then
                        } else {
                            otherwise
                        }
                    }
                    // 省略 `:` 的短形式
                    Slot::Value(then) => {
                        if cond {
                            then
                        } else {
                            Value::String(String::new())
                        }
                    }
                }
            }
            _ => {
                let b = pop(stack)?;
                let a = pop(stack)?;
                binary(op, a, b)
            }
        };
        stack.push(Slot::Value(result));
        Ok(())
    }
}

fn binary(op: Operator, a: Value, b: Value) -> Value {
    match op {
        Operator::Add => Value::Number(a.to_number() + b.to_number()),
        Operator::Sub => Value::Number(a.to_number() - b.to_number()),
        Operator::Mul => Value::Number(a.to_number() * b.to_number()),
        Operator::Div => Value::Number(a.to_number() / b.to_number()),
        Operator::Mod => Value::Number(a.to_number() % b.to_number()),
        Operator::Concat => Value::String(format!("{a}{b}")),
        Operator::Lt => Value::Bool(a.compare(&b).is_some_and(Ordering::is_lt)),
        Operator::Le => Value::Bool(a.compare(&b).is_some_and(Ordering::is_le)),
        Operator::Gt => Value::Bool(a.compare(&b).is_some_and(Ordering::is_gt)),
        Operator::Ge => Value::Bool(a.compare(&b).is_some_and(Ordering::is_ge)),
        Operator::Eq => Value::Bool(a.loose_eq(&b)),
        Operator::Ne => Value::Bool(!a.loose_eq(&b)),
        Operator::Or => {
            if a.is_true() {
                a
            } else {
                b
            }
        }
        Operator::And => {
            if a.is_true() {
                b
            } else {
                a
            }
        }
        Operator::Not | Operator::Conditional | Operator::Alternative => {
            unreachable!("一元与三元运算符在 apply 中处理: {}", op.symbol())
        }
    }
}

fn pop(stack: &mut Vec<Slot>) -> Result<Value> {
    match stack.pop() {
        Some(Slot::Value(value)) => Ok(value),
        Some(Slot::Branches(..)) => Err(dangling_alternative()),
        None => Err(stack_underflow()),
    }
}

fn pop_n(stack: &mut Vec<Slot>, n: usize) -> Result<Vec<Value>> {
    if stack.len() < n {
        return Err(stack_underflow());
    }
    stack
        .split_off(stack.len() - n)
        .into_iter()
        .map(|slot| match slot {
            Slot::Value(value) => Ok(value),
            Slot::Branches(..) => Err(dangling_alternative()),
        })
        .collect()
}

fn stack_underflow() -> TemplateError {
    TemplateError::MalformedExpression("运算数不足".into())
}

fn dangling_alternative() -> TemplateError {
    TemplateError::MalformedExpression("':' 缺少对应的 '?'".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::expression::compile;

    fn eval(src: &str, ctx: &Context) -> Result<Value> {
        evaluate(&Environment::new(), &compile(src).unwrap(), ctx)
    }

    fn show(src: &str) -> String {
        eval(src, &Context::new()).unwrap().to_string()
    }

    #[test]
    fn arithmetic_respects_precedence() {
        assert_eq!(show("1 + 2 * 3"), "7");
        assert_eq!(show("(1 + 2) * 3"), "9");
        assert_eq!(show("10 - 4 - 3"), "3");
        assert_eq!(show("7 % 4"), "3");
        assert_eq!(show("\"2\" + 3"), "5");
    }

    #[test]
    fn concat_and_comparisons() {
        assert_eq!(show("'a' ~ 1 ~ 'b'"), "a1b");
        assert_eq!(show("1 < 2 and 'b' > 'a'"), "true");
        assert_eq!(show("'1' == 1"), "true");
        assert_eq!(show("2 != 2"), "false");
    }

    #[test]
    fn logical_operators_return_operands() {
        assert_eq!(show("'' or 'fallback'"), "fallback");
        assert_eq!(show("'x' && 'y'"), "y");
        assert_eq!(show("not 0"), "true");
        assert_eq!(show("!'a'"), "false");
    }

    #[test]
    fn ternary_forms() {
        assert_eq!(show("1 ? 'yes' : 'no'"), "yes");
        assert_eq!(show("0 ? 'yes' : 'no'"), "no");
        assert_eq!(show("0 ? 'a' : 1 ? 'b' : 'c'"), "b");
        assert_eq!(show("0 ? 'only'"), "");
        assert_eq!(show("1 ? 'only'"), "only");
        assert_eq!(show("1 ? 0 ? 'a' : 'b' : 'c'"), "b");
        assert_eq!(show("0 ? 0 ? 'a' : 'b' : 'c'"), "c");
        assert_eq!(show("1 ? 1 ? 0 ? 'x' : 'y' : 'z' : 'w'"), "y");
        assert_eq!(show("1 ? 0 ? 'a' : 1 ? 'b' : 'c' : 'd'"), "b");
    }

    #[test]
    fn map_literal_keeps_order_through_keys() {
        let value = eval(r#"{"b": 1, "a": 2}|keys"#, &Context::new()).unwrap();
        let Value::List(keys) = value else {
            panic!("expected list");
        };
        let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(keys, ["b", "a"]);
    }

    #[test]
    fn key_access_on_null_fails() {
        let ctx = Context::new().with("user", Value::Null);
        assert!(matches!(
            eval("user.name", &ctx).unwrap_err(),
            TemplateError::NullKeyAccess { key } if key == "name"
        ));
        assert!(matches!(
            eval("missing.name", &ctx).unwrap_err(),
            TemplateError::NullKeyAccess { .. }
        ));
    }

    #[test]
    fn bracket_access_requires_existing_key() {
        let ctx = Context::from_json(serde_json::json!({"m": {"a": 1}, "xs": [10, 20]}));
        assert_eq!(eval("m['a']", &ctx).unwrap().to_string(), "1");
        assert_eq!(eval("xs[1]", &ctx).unwrap().to_string(), "20");
        assert_eq!(eval("xs.0", &ctx).unwrap().to_string(), "10");
        assert!(eval("m.b", &ctx).unwrap().is_none());
        assert!(matches!(
            eval("m['b']", &ctx).unwrap_err(),
            TemplateError::MissingKey { key } if key == "b"
        ));
        assert!(matches!(
            eval("xs[5]", &ctx).unwrap_err(),
            TemplateError::MissingKey { .. }
        ));
    }

    #[test]
    fn lazy_fields_are_called_on_access() {
        let mut ctx = Context::new().with("n", 2);
        ctx.insert_fn("double", |ctx| {
            Value::from(ctx.resolve("n").map_or(0.0, |v| v.to_number()) * 2.0)
        });
        assert_eq!(eval("double + 1", &ctx).unwrap().to_string(), "5");
    }

    #[test]
    fn unknown_filter_and_test_fail() {
        let ctx = Context::new();
        assert!(matches!(
            eval("1|nope", &ctx).unwrap_err(),
            TemplateError::UnknownCapability { kind: CapabilityKind::Filter, .. }
        ));
        assert!(matches!(
            eval("1 is nope", &ctx).unwrap_err(),
            TemplateError::UnknownCapability { kind: CapabilityKind::Test, .. }
        ));
    }

    #[test]
    fn negated_test() {
        assert_eq!(show("3 is not even"), "true");
        assert_eq!(show("4 is divisibleby(2)"), "true");
    }

    #[test]
    fn strict_mode_rejects_undefined_variables() {
        let mut env = Environment::new();
        env.set_strict_variables(true);
        let expr = compile("nobody").unwrap();
        assert!(matches!(
            evaluate(&env, &expr, &Context::new()).unwrap_err(),
            TemplateError::UndefinedVariable(name) if name == "nobody"
        ));
    }

    #[test]
    fn filter_chain_uses_seed() {
        let env = Environment::new();
        let chain = crate::syntax::expression::compile_filter_chain("upper").unwrap();
        let out = evaluate_with(&env, &chain, &Context::new(), Value::from("abc")).unwrap();
        assert_eq!(out.to_string(), "ABC");
    }
}
