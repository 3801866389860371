use crate::context::Context;
use crate::environment::Environment;
use crate::error::Result;
use crate::render::{Blocks, Renderer};
use crate::syntax::Node;

/// 编译后的模板，编译完成后不再修改，可在多个渲染间共享
#[derive(Debug, Clone)]
pub struct Template {
    name: Option<String>,
    nodes: Vec<Node>,
}

impl Template {
    pub fn new(name: Option<String>, nodes: Vec<Node>) -> Self {
        Self { name, nodes }
    }

    /// 模板名，`extends` / `use` 的相对路径以它为基准
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 渲染为字符串。上下文会被复制，`set` 不会影响调用方
    pub fn render(&self, env: &Environment, ctx: &Context) -> Result<String> {
        let mut ctx = ctx.clone();
        Ok(Renderer::new(env).render_template(self, &mut ctx)?.output)
    }

    /// 渲染并返回各 block 的内容（含继承链上父模板的 block）
    pub fn render_blocks(&self, env: &Environment, ctx: &Context) -> Result<Blocks> {
        let mut ctx = ctx.clone();
        Ok(Renderer::new(env).render_template(self, &mut ctx)?.blocks)
    }
}
