//! 逻辑指令装配：把平铺的 span 序列组装为嵌套的节点树
//!
//! 使用显式栈而不是递归下降：打开作用域的指令入栈，结束/延续指令出栈并校验
//! 栈顶指令的 next 集合，两者之间收集到的内容成为出栈指令的指令体。

use crate::error::{Result, TemplateError, line_col};
use crate::syntax::tag::{TagDefinition, TagRegistry};
use crate::syntax::tokenizer::{Span, SpanKind};
use crate::syntax::{Directive, Node, expression};
use std::sync::Arc;

struct Open {
    def: Arc<TagDefinition>,
    directive: Directive,
}

pub fn assemble(source: &str, spans: &[Span<'_>], tags: &TagRegistry) -> Result<Vec<Node>> {
    let mut output = Vec::new();
    let mut stack: Vec<Open> = Vec::new();
    // 当前栈顶之下尚未归属的内容
    let mut pending: Vec<Node> = Vec::new();

    for span in spans {
        let node = match span.kind {
            SpanKind::Comment => continue,
            SpanKind::Raw => Node::Raw(span.text.to_string()),
            SpanKind::Output => Node::Output(expression::compile(span.text)?),
            SpanKind::Logic => {
                let (line, _) = line_col(source, span.offset);
                let (def, tag) = tags.compile(span.text, line)?;
                let directive = Directive {
                    tag,
                    body: Vec::new(),
                    line,
                };

                if !def.is_open() {
                    let Some(mut prev) = stack.pop() else {
                        return Err(TemplateError::UnexpectedDirective {
                            found: def.name().to_string(),
                            open: "（无）".to_string(),
                            line,
                        });
                    };
                    if !prev.def.accepts(def.name()) {
                        return Err(TemplateError::UnexpectedDirective {
                            found: def.name().to_string(),
                            open: prev.def.name().to_string(),
                            line,
                        });
                    }
                    check_block_name(&prev.directive, &directive)?;
                    tracing::trace!("第 {line} 行 {} 结束 {}", def.name(), prev.def.name());
                    prev.directive.body.append(&mut pending);
                    emit(&stack, &mut output, &mut pending, Node::Directive(prev.directive));
                }

                if !def.next().is_empty() {
                    if let Some(top) = stack.last_mut() {
                        top.directive.body.append(&mut pending);
                    }
                    tracing::trace!("第 {line} 行 {} 入栈", def.name());
                    stack.push(Open { def, directive });
                } else if def.is_open() {
                    emit(&stack, &mut output, &mut pending, Node::Directive(directive));
                }
                continue;
            }
        };
        emit(&stack, &mut output, &mut pending, node);
    }

    if let Some(top) = stack.pop() {
        return Err(TemplateError::UnterminatedScope {
            kind: top.def.name().to_string(),
            expected: top.def.next().join(" / "),
            line: top.directive.line,
        });
    }

    Ok(output)
}

fn emit(stack: &[Open], output: &mut Vec<Node>, pending: &mut Vec<Node>, node: Node) {
    if stack.is_empty() {
        output.push(node);
    } else {
        pending.push(node);
    }
}

/// `{% endblock name %}` 的名字必须与所结束的 block 一致
fn check_block_name(open: &Directive, close: &Directive) -> Result<()> {
    use crate::syntax::tag::Tag;
    if let (Tag::Block(name), Tag::EndBlock(Some(end))) = (&open.tag, &close.tag)
        && name != end
    {
        return Err(TemplateError::MalformedDirective {
            message: format!("endblock '{end}' 与 block '{name}' 不匹配"),
            line: close.line,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse;
    use crate::syntax::tag::Tag;

    fn tree(src: &str) -> Vec<Node> {
        parse(src, &TagRegistry::builtin()).unwrap()
    }

    fn tag_names(nodes: &[Node]) -> Vec<&'static str> {
        nodes
            .iter()
            .map(|n| match n {
                Node::Raw(_) => "raw",
                Node::Output(_) => "output",
                Node::Directive(d) => match d.tag {
                    Tag::If(_) => "if",
                    Tag::ElseIf(_) => "elseif",
                    Tag::Else => "else",
                    Tag::For { .. } => "for",
                    Tag::Set { .. } => "set",
                    Tag::Block(_) => "block",
                    _ => "other",
                },
            })
            .collect()
    }

    #[test]
    fn if_chain_becomes_sibling_nodes() {
        let nodes = tree("{% if a %}A{% elseif b %}B{% else %}C{% endif %}!");
        assert_eq!(tag_names(&nodes), ["if", "elseif", "else", "raw"]);
        for node in &nodes[..3] {
            let Node::Directive(d) = node else { panic!() };
            assert_eq!(d.body.len(), 1);
        }
    }

    #[test]
    fn nested_scopes_keep_their_bodies() {
        let nodes = tree("{% for x in xs %}[{% if x %}{{ x }}{% endif %}]{% endfor %}");
        assert_eq!(tag_names(&nodes), ["for"]);
        let Node::Directive(outer) = &nodes[0] else { panic!() };
        assert_eq!(tag_names(&outer.body), ["raw", "if", "raw"]);
        let Node::Directive(inner) = &outer.body[1] else { panic!() };
        assert_eq!(tag_names(&inner.body), ["output"]);
    }

    #[test]
    fn standalone_set_is_emitted_in_place() {
        let nodes = tree("a{% set x = 1 %}b");
        assert_eq!(tag_names(&nodes), ["raw", "set", "raw"]);
        let nodes = tree("{% if c %}a{% set x = 1 %}b{% endif %}");
        let Node::Directive(d) = &nodes[0] else { panic!() };
        assert_eq!(tag_names(&d.body), ["raw", "set", "raw"]);
    }

    #[test]
    fn comments_are_dropped() {
        assert_eq!(tag_names(&tree("a{# x #}b")), ["raw", "raw"]);
    }

    #[test]
    fn unterminated_if_names_expected_closers() {
        let err = parse("{% if true %}x", &TagRegistry::builtin()).unwrap_err();
        let TemplateError::UnterminatedScope { kind, expected, line } = err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(kind, "if");
        assert!(expected.contains("endif"));
        assert_eq!(line, 1);
    }

    #[test]
    fn closer_for_wrong_scope_is_unexpected() {
        let err = parse("{% if a %}\n{% endfor %}", &TagRegistry::builtin()).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::UnexpectedDirective { ref found, ref open, line: 2 }
                if found == "endfor" && open == "if"
        ));
    }

    #[test]
    fn else_may_be_closed_by_endif_or_endfor() {
        let tags = TagRegistry::builtin();
        assert!(parse("{% if a %}{% else %}x{% endif %}", &tags).is_ok());
        assert!(parse("{% for a in b %}{% else %}x{% endfor %}", &tags).is_ok());
        assert!(parse("{% if a %}{% else %}x{% endfor %}", &tags).is_ok());
        assert!(parse("{% if a %}{% else %}x{% endfilter %}", &tags).is_err());
    }

    #[test]
    fn closer_without_opener_is_unexpected() {
        assert!(matches!(
            parse("{% endif %}", &TagRegistry::builtin()).unwrap_err(),
            TemplateError::UnexpectedDirective { .. }
        ));
    }

    #[test]
    fn mismatched_endblock_name_fails() {
        assert!(matches!(
            parse("{% block a %}{% endblock b %}", &TagRegistry::builtin()).unwrap_err(),
            TemplateError::MalformedDirective { .. }
        ));
        assert!(parse("{% block a %}{% endblock a %}", &TagRegistry::builtin()).is_ok());
    }
}
