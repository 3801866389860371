//! twine：Twig 风格的文本模板编译器与求值器
//!
//! ```
//! use twine::{Context, Environment};
//!
//! let env = Environment::new();
//! let ctx = Context::new().with("name", "world");
//! let out = env.render_str("Hello {{ name|capitalize }}!", &ctx).unwrap();
//! assert_eq!(out, "Hello World!");
//! ```
//!
//! 模板先被切分为 raw / output / logic / comment 片段，逻辑指令通过显式栈组装为
//! 节点树，表达式经调度场算法编译为 RPN，渲染时由栈机求值。

pub mod check;
pub mod config;
pub mod context;
pub mod environment;
pub mod error;
pub mod filters;
pub mod loader;
pub mod predicates;
pub mod render;
pub mod syntax;
pub mod template;
pub mod value;

pub use context::Context;
pub use environment::Environment;
pub use error::{Result, TemplateError};
pub use render::{Blocks, TagCall};
pub use syntax::tag::{TagDefinition, TagHandler, TagOutcome};
pub use template::Template;
pub use value::{Map, Value};

use std::sync::LazyLock;

static DEFAULT_ENV: LazyLock<Environment> = LazyLock::new(Environment::new);

/// 用默认环境编译的模板
#[derive(Debug, Clone)]
pub struct Compiled {
    template: Template,
}

impl Compiled {
    pub fn render(&self, ctx: &Context) -> Result<String> {
        self.template.render(&DEFAULT_ENV, ctx)
    }

    /// 以 block 名 → 内容的形式输出
    pub fn render_blocks(&self, ctx: &Context) -> Result<Blocks> {
        self.template.render_blocks(&DEFAULT_ENV, ctx)
    }

    pub fn template(&self) -> &Template {
        &self.template
    }
}

/// 使用内置过滤器、测试和指令编译模板
pub fn compile(markup: &str) -> Result<Compiled> {
    Ok(Compiled {
        template: DEFAULT_ENV.compile(markup)?,
    })
}
