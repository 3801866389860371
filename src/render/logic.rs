//! 逻辑指令求值

use super::expression::{evaluate, evaluate_with};
use super::{Pass, Renderer, TagCall};
use crate::context::Context;
use crate::error::Result;
use crate::syntax::expression::Expression;
use crate::syntax::{Directive, Node};
use crate::syntax::tag::{Tag, TagOutcome};
use crate::value::Value;

impl Renderer<'_> {
    /// 求值一条指令。`chain` 为真表示前面的 if / elseif / for 尚未产出内容
    pub(crate) fn render_directive(
        &mut self,
        directive: &Directive,
        ctx: &mut Context,
        pass: &mut Pass,
        chain: bool,
    ) -> Result<TagOutcome> {
        let body = directive.body.as_slice();
        let skip = |chain| TagOutcome {
            output: String::new(),
            chain,
        };

        match &directive.tag {
            Tag::If(cond) => self.branch(cond, body, ctx, pass),
            Tag::ElseIf(cond) => {
                if chain {
                    self.branch(cond, body, ctx, pass)
                } else {
                    Ok(skip(false))
                }
            }
            Tag::Else => {
                if chain {
                    Ok(TagOutcome {
                        output: self.render_nodes(body, ctx, pass)?,
                        chain: false,
                    })
                } else {
                    Ok(skip(false))
                }
            }
            Tag::For {
                key_var,
                value_var,
                source,
            } => {
                let items: Vec<(Value, Value)> = match evaluate(self.env, source, ctx)? {
                    Value::List(items) => items
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| (Value::from(i), v))
                        .collect(),
                    Value::Map(map) => map.into_iter().map(|(k, v)| (Value::String(k), v)).collect(),
                    _ => Vec::new(),
                };

                let mut output = String::new();
                for (key, value) in &items {
                    ctx.bind(value_var, value.clone());
                    if let Some(key_var) = key_var {
                        ctx.bind(key_var, key.clone());
                    }
                    output.push_str(&self.render_nodes(body, ctx, pass)?);
                }
                tracing::trace!("第 {} 行 for 循环 {} 次", directive.line, items.len());
                // 只有一次都没有执行时，后面的 else 才生效
                Ok(TagOutcome {
                    output,
                    chain: items.is_empty(),
                })
            }
            Tag::Set { target, value } => {
                let value = evaluate(self.env, value, ctx)?;
                ctx.bind(target, value);
                Ok(skip(chain))
            }
            Tag::Filter(filters) => {
                let content = self.render_nodes(body, ctx, pass)?;
                let output = evaluate_with(self.env, filters, ctx, Value::String(content))?;
                Ok(TagOutcome {
                    output: output.to_string(),
                    chain,
                })
            }
            Tag::Block(name) => {
                // 子模板已提供的 block 不再重新捕获
                if !pass.blocks.contains_key(name) {
                    let content = self.render_nodes(body, ctx, pass)?;
                    pass.blocks.insert(name.clone(), content);
                }
                // 继承中的模板输出会被父模板替换，嵌套 block 仍需输出到外层 block
                let output = pass.blocks.get(name).cloned().unwrap_or_default();
                Ok(TagOutcome { output, chain })
            }
            Tag::Extends(path) => {
                let parent = evaluate(self.env, path, ctx)?.to_string();
                pass.extends = Some(parent);
                Ok(skip(chain))
            }
            Tag::Use(path) => {
                let path = evaluate(self.env, path, ctx)?.to_string();
                self.import_blocks(&path, ctx, pass)?;
                Ok(skip(chain))
            }
            Tag::Extension(ext) => {
                let args = ext
                    .args
                    .iter()
                    .map(|arg| evaluate(self.env, arg, ctx))
                    .collect::<Result<Vec<_>>>()?;
                let handler = ext.handler.clone();
                let mut call = TagCall {
                    renderer: self,
                    ctx,
                    pass,
                    body,
                    args,
                    chain,
                };
                handler.render(&mut call)
            }
            // 结束标记只参与编译期装配，不会出现在节点树中
            Tag::EndIf | Tag::EndFor | Tag::EndFilter | Tag::EndBlock(_) => Ok(skip(chain)),
        }
    }

    fn branch(
        &mut self,
        cond: &Expression,
        body: &[Node],
        ctx: &mut Context,
        pass: &mut Pass,
    ) -> Result<TagOutcome> {
        if evaluate(self.env, cond, ctx)?.is_true() {
            Ok(TagOutcome {
                output: self.render_nodes(body, ctx, pass)?,
                chain: false,
            })
        } else {
            Ok(TagOutcome {
                output: String::new(),
                chain: true,
            })
        }
    }
}
