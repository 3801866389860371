//! 渲染：遍历节点树，求值表达式，处理模板继承

pub mod expression;
pub mod logic;

use crate::context::Context;
use crate::environment::Environment;
use crate::error::{Result, TemplateError};
use crate::syntax::Node;
use crate::template::Template;
use crate::value::Value;
use indexmap::IndexMap;

/// block 名 → 渲染结果，按首次捕获顺序排列
pub type Blocks = IndexMap<String, String>;

/// 某个模板在一次渲染中的可变状态，不与其他渲染共享
#[derive(Debug, Default)]
pub(crate) struct Pass {
    name: Option<String>,
    blocks: Blocks,
    extends: Option<String>,
}

impl Pass {
    fn new(name: Option<String>, blocks: Blocks) -> Self {
        Self {
            name,
            blocks,
            extends: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Rendered {
    pub output: String,
    pub blocks: Blocks,
}

pub(crate) struct Renderer<'env> {
    env: &'env Environment,
    /// 正在渲染的模板链，用于检测 extends / use 循环
    active: Vec<String>,
}

impl<'env> Renderer<'env> {
    pub fn new(env: &'env Environment) -> Self {
        Self {
            env,
            active: Vec::new(),
        }
    }

    pub fn environment(&self) -> &'env Environment {
        self.env
    }

    /// 渲染模板；若模板 extends 了父模板，继续以已捕获的 block 渲染父模板
    pub fn render_template(&mut self, template: &Template, ctx: &mut Context) -> Result<Rendered> {
        let depth = self.active.len();
        let result = self.render_chain(template, ctx);
        self.active.truncate(depth);
        result
    }

    fn render_chain(&mut self, template: &Template, ctx: &mut Context) -> Result<Rendered> {
        self.enter(template.name())?;
        let mut pass = Pass::new(template.name().map(str::to_string), Blocks::new());
        let mut output = self.render_nodes(template.nodes(), ctx, &mut pass)?;

        while let Some(path) = pass.extends.take() {
            let name = self.env.resolve_path(pass.name.as_deref(), &path);
            self.enter(Some(&name))?;
            let parent = self.env.get_template(&name)?;
            tracing::trace!("模板 {:?} 继承 {name}", pass.name);
            pass = Pass::new(Some(name), std::mem::take(&mut pass.blocks));
            output = self.render_nodes(parent.nodes(), ctx, &mut pass)?;
        }

        Ok(Rendered {
            output,
            blocks: pass.blocks,
        })
    }

    fn enter(&mut self, name: Option<&str>) -> Result<()> {
        let Some(name) = name else {
            return Ok(());
        };
        if self.active.iter().any(|n| n == name) {
            let mut cycle = self.active.clone();
            cycle.push(name.to_string());
            return Err(TemplateError::InheritanceCycle(cycle.join(" -> ")));
        }
        self.active.push(name.to_string());
        Ok(())
    }

    /// `use`：渲染被引入的模板，合并其中本模板尚未定义的 block
    fn import_blocks(&mut self, path: &str, ctx: &Context, pass: &mut Pass) -> Result<()> {
        let name = self.env.resolve_path(pass.name.as_deref(), path);
        let imported = self.env.get_template(&name)?;
        // 被引入模板中的 set 不影响当前模板
        let mut scope = ctx.clone();
        let rendered = self.render_template(&imported, &mut scope)?;
        for (block, content) in rendered.blocks {
            pass.blocks.entry(block).or_insert(content);
        }
        Ok(())
    }

    pub(crate) fn render_nodes(
        &mut self,
        nodes: &[Node],
        ctx: &mut Context,
        pass: &mut Pass,
    ) -> Result<String> {
        let mut out = String::new();
        // 链状态只在兄弟节点之间传递，每层指令体都从打开状态开始
        let mut chain = true;
        for node in nodes {
            match node {
                Node::Raw(text) => out.push_str(text),
                Node::Output(expr) => {
                    let value = expression::evaluate(self.env, expr, ctx)?;
                    out.push_str(&value.to_string());
                }
                Node::Directive(directive) => {
                    let step = self.render_directive(directive, ctx, pass, chain)?;
                    out.push_str(&step.output);
                    chain = step.chain;
                }
            }
        }
        Ok(out)
    }
}

/// 自定义指令渲染时可用的上下文
pub struct TagCall<'a, 'env> {
    renderer: &'a mut Renderer<'env>,
    ctx: &'a mut Context,
    pass: &'a mut Pass,
    body: &'a [Node],
    args: Vec<Value>,
    chain: bool,
}

impl TagCall<'_, '_> {
    /// 已求值的参数，顺序与正则捕获组一致
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// 前一个兄弟指令留下的链状态
    pub fn chain(&self) -> bool {
        self.chain
    }

    pub fn context(&self) -> &Context {
        self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        self.ctx
    }

    pub fn environment(&self) -> &Environment {
        self.renderer.environment()
    }

    /// 渲染指令体，可多次调用
    pub fn render_body(&mut self) -> Result<String> {
        self.renderer.render_nodes(self.body, self.ctx, self.pass)
    }
}
