use crate::value::{Callable, Map, Value};
use serde::Serialize;

/// 一次渲染独占的变量环境
///
/// `set` 指令和 `for` 循环直接修改它，修改对之后的兄弟节点可见。
#[derive(Debug, Clone, Default)]
pub struct Context {
    vars: Map,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 JSON 对象构造；非对象的 JSON 得到空上下文
    pub fn from_json(json: serde_json::Value) -> Self {
        match Value::from_json(json) {
            Value::Map(vars) => Self { vars },
            _ => Self::default(),
        }
    }

    pub fn from_serialize<T: Serialize>(data: &T) -> serde_json::Result<Self> {
        Ok(Self::from_json(serde_json::to_value(data)?))
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    /// 注册惰性字段，每次解析变量时调用
    pub fn insert_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&Context) -> Value + Send + Sync + 'static,
    {
        self.vars.insert(name.into(), Value::Callable(Callable::new(f)));
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// 解析变量：惰性字段在此处求值
    pub fn resolve(&self, name: &str) -> Option<Value> {
        match self.vars.get(name)? {
            Value::Callable(f) => Some(f.call(self)),
            value => Some(value.clone()),
        }
    }

    /// 绑定变量，覆盖同名的旧值。`for` 和 `set` 的绑定在之后的兄弟节点中仍然可见
    pub fn bind(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value);
    }
}

impl From<Map> for Context {
    fn from(vars: Map) -> Self {
        Self { vars }
    }
}
