//! 模板编译前端：模板分词 → 逻辑指令树 + 表达式 RPN

pub mod expression;
pub mod logic;
pub mod operator;
pub mod tag;
pub mod tokenizer;

use crate::error::Result;
use expression::Expression;
use tag::{Tag, TagRegistry};

/// 编译后的模板节点
#[derive(Debug, Clone)]
pub enum Node {
    /// 原样输出的文本
    Raw(String),
    /// {{ expr }}
    Output(Expression),
    /// {% ... %} 及其嵌套内容
    Directive(Directive),
}

#[derive(Debug, Clone)]
pub struct Directive {
    pub tag: Tag,
    pub body: Vec<Node>,
    /// 指令所在行（1 起始）
    pub line: usize,
}

/// 编译模板源码为顶层节点序列
pub fn parse(source: &str, tags: &TagRegistry) -> Result<Vec<Node>> {
    let spans = tokenizer::tokenize(source)?;
    logic::assemble(source, &spans, tags)
}
