//! 逻辑指令表
//!
//! 每种指令由一条定义描述：匹配正则、打开作用域后允许跟随的指令集合（next）、
//! 是否独立成节点（open），以及把正则捕获编译为 [`Tag`] 的方法。
//! 内置定义之外，宿主可以通过 [`TagRegistry::register`] 增加新指令。

use crate::error::{Result, TemplateError};
use crate::render::TagCall;
use crate::syntax::expression::{self, Expression};
use regex::{Captures, Regex};
use std::fmt;
use std::sync::{Arc, LazyLock};

/// 编译后的指令
#[derive(Debug, Clone)]
pub enum Tag {
    If(Expression),
    ElseIf(Expression),
    Else,
    EndIf,
    For {
        key_var: Option<String>,
        value_var: String,
        source: Expression,
    },
    EndFor,
    Set {
        target: String,
        value: Expression,
    },
    /// 过滤器链，作用于指令体的渲染结果
    Filter(Expression),
    EndFilter,
    Block(String),
    /// `{% endblock %}` 或 `{% endblock name %}`
    EndBlock(Option<String>),
    Extends(Expression),
    Use(Expression),
    Extension(ExtensionTag),
}

/// 宿主注册的指令实例
#[derive(Clone)]
pub struct ExtensionTag {
    pub name: String,
    pub args: Vec<Expression>,
    pub handler: Arc<dyn TagHandler>,
}

impl fmt::Debug for ExtensionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionTag")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// 自定义指令的渲染结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagOutcome {
    pub output: String,
    /// 之后的 elseif / else 是否还可以执行
    pub chain: bool,
}

/// 自定义指令的编译与渲染
pub trait TagHandler: Send + Sync {
    /// 把正则捕获组（不含整体匹配）编译为参数表达式，默认逐个编译非空捕获
    fn compile(&self, captures: &[Option<&str>]) -> Result<Vec<Expression>> {
        captures
            .iter()
            .flatten()
            .map(|text| expression::compile(text.trim()))
            .collect()
    }

    fn render(&self, call: &mut TagCall<'_, '_>) -> Result<TagOutcome>;
}

type BuiltinCompile = fn(&Captures<'_>, usize) -> Result<Tag>;

#[derive(Clone)]
enum Compiler {
    Builtin(BuiltinCompile),
    Extension(Arc<dyn TagHandler>),
}

#[derive(Clone)]
pub struct TagDefinition {
    name: String,
    pattern: Regex,
    next: Vec<String>,
    open: bool,
    compiler: Compiler,
}

impl fmt::Debug for TagDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagDefinition")
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .field("next", &self.next)
            .field("open", &self.open)
            .finish()
    }
}

impl TagDefinition {
    /// 定义自定义指令。`pattern` 匹配去掉首尾空白后的指令内容，应自行以 `^...$` 锚定
    ///
    /// - `next` 非空：打开作用域，直到 `next` 中的某个指令出现
    /// - `next` 为空且 `open`：独立指令
    /// - `next` 为空且非 `open`：结束标记
    pub fn new<H>(name: impl Into<String>, pattern: Regex, next: &[&str], open: bool, handler: H) -> Self
    where
        H: TagHandler + 'static,
    {
        Self {
            name: name.into(),
            pattern,
            next: next.iter().map(|s| s.to_string()).collect(),
            open,
            compiler: Compiler::Extension(Arc::new(handler)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn next(&self) -> &[String] {
        &self.next
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn accepts(&self, name: &str) -> bool {
        self.next.iter().any(|n| n == name)
    }

    /// 不匹配时返回 None
    fn compile(&self, text: &str, line: usize) -> Option<Result<Tag>> {
        let caps = self.pattern.captures(text)?;
        let tag = match &self.compiler {
            Compiler::Builtin(compile) => compile(&caps, line),
            Compiler::Extension(handler) => {
                let groups: Vec<Option<&str>> =
                    caps.iter().skip(1).map(|m| m.map(|m| m.as_str())).collect();
                handler.compile(&groups).map(|args| {
                    Tag::Extension(ExtensionTag {
                        name: self.name.clone(),
                        args,
                        handler: Arc::clone(handler),
                    })
                })
            }
        };
        Some(tag)
    }
}

/// 有序的指令表：先匹配先得
#[derive(Debug, Clone)]
pub struct TagRegistry {
    defs: Vec<Arc<TagDefinition>>,
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TagRegistry {
    pub fn builtin() -> Self {
        Self {
            defs: BUILTIN.clone(),
        }
    }

    /// 注册新指令，同名指令只能注册一次
    pub fn register(&mut self, def: TagDefinition) -> Result<()> {
        if self.get(&def.name).is_some() {
            return Err(TemplateError::DuplicateDirective(def.name));
        }
        tracing::trace!("注册指令: {}", def.name);
        self.defs.push(Arc::new(def));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<TagDefinition>> {
        self.defs.iter().find(|d| d.name == name)
    }

    /// 识别并编译一条指令内容
    pub fn compile(&self, text: &str, line: usize) -> Result<(Arc<TagDefinition>, Tag)> {
        for def in &self.defs {
            if let Some(tag) = def.compile(text, line) {
                return Ok((Arc::clone(def), tag?));
            }
        }
        Err(TemplateError::UnrecognizedDirective {
            text: text.to_string(),
            line,
        })
    }
}

static BUILTIN: LazyLock<Vec<Arc<TagDefinition>>> = LazyLock::new(|| {
    vec![
        builtin("if", r"^if\s+(.+)$", &["elseif", "else", "endif"], true, |caps, _| {
            Ok(Tag::If(capture_expression(caps, 1)?))
        }),
        builtin("elseif", r"^elseif\s+(.+)$", &["elseif", "else", "endif"], false, |caps, _| {
            Ok(Tag::ElseIf(capture_expression(caps, 1)?))
        }),
        // else 同时服务 if 和 for，因此 endif / endfor 都可以结束它
        builtin("else", r"^else$", &["endif", "endfor"], false, |_, _| Ok(Tag::Else)),
        builtin("endif", r"^endif$", &[], false, |_, _| Ok(Tag::EndIf)),
        builtin(
            "for",
            r"^for\s+([a-zA-Z0-9_,\s]+)\s+in\s+(.+)$",
            &["else", "endfor"],
            true,
            compile_for,
        ),
        builtin("endfor", r"^endfor$", &[], false, |_, _| Ok(Tag::EndFor)),
        builtin("set", r"^set\s+([a-zA-Z0-9_,\s]+?)\s*=\s*(.+)$", &[], true, compile_set),
        builtin("filter", r"^filter\s+(.+)$", &["endfilter"], true, |caps, _| {
            Ok(Tag::Filter(expression::compile_filter_chain(
                capture(caps, 1).trim(),
            )?))
        }),
        builtin("endfilter", r"^endfilter$", &[], false, |_, _| Ok(Tag::EndFilter)),
        builtin("block", r"^block\s+([a-zA-Z0-9_]+)$", &["endblock"], true, |caps, _| {
            Ok(Tag::Block(capture(caps, 1).to_string()))
        }),
        builtin(
            "endblock",
            r"^endblock(?:\s+([a-zA-Z0-9_]+))?$",
            &[],
            false,
            |caps, _| Ok(Tag::EndBlock(caps.get(1).map(|m| m.as_str().to_string()))),
        ),
        builtin("extends", r"^extends\s+(.+)$", &[], true, |caps, _| {
            Ok(Tag::Extends(capture_expression(caps, 1)?))
        }),
        builtin("use", r"^use\s+(.+)$", &[], true, |caps, _| {
            Ok(Tag::Use(capture_expression(caps, 1)?))
        }),
    ]
});

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap());

fn builtin(
    name: &str,
    pattern: &str,
    next: &[&str],
    open: bool,
    compile: BuiltinCompile,
) -> Arc<TagDefinition> {
    Arc::new(TagDefinition {
        name: name.to_string(),
        // 条件表达式允许跨行
        pattern: Regex::new(&format!("(?s){pattern}")).unwrap(),
        next: next.iter().map(|s| s.to_string()).collect(),
        open,
        compiler: Compiler::Builtin(compile),
    })
}

fn capture<'t>(caps: &Captures<'t>, index: usize) -> &'t str {
    caps.get(index).map_or("", |m| m.as_str())
}

fn capture_expression(caps: &Captures<'_>, index: usize) -> Result<Expression> {
    expression::compile(capture(caps, index).trim())
}

/// `for value in ...` 或 `for key, value in ...`
fn compile_for(caps: &Captures<'_>, line: usize) -> Result<Tag> {
    let vars: Vec<&str> = capture(caps, 1).split(',').map(str::trim).collect();
    if let Some(bad) = vars.iter().find(|v| !IDENTIFIER.is_match(v)) {
        return Err(TemplateError::MalformedDirective {
            message: format!("for 循环变量 '{bad}' 不是合法的标识符"),
            line,
        });
    }
    let (key_var, value_var) = match vars.as_slice() {
        [value] => (None, value.to_string()),
        [key, value] => (Some(key.to_string()), value.to_string()),
        _ => {
            return Err(TemplateError::MalformedDirective {
                message: format!("for 循环最多绑定 key, value 两个变量，实际 {} 个", vars.len()),
                line,
            });
        }
    };
    Ok(Tag::For {
        key_var,
        value_var,
        source: capture_expression(caps, 2)?,
    })
}

fn compile_set(caps: &Captures<'_>, line: usize) -> Result<Tag> {
    let target = capture(caps, 1).trim();
    if !IDENTIFIER.is_match(target) {
        return Err(TemplateError::MalformedDirective {
            message: format!("set 的目标 '{target}' 必须是单个变量名"),
            line,
        });
    }
    Ok(Tag::Set {
        target: target.to_string(),
        value: capture_expression(caps, 2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(text: &str) -> Result<Tag> {
        TagRegistry::builtin().compile(text, 1).map(|(_, tag)| tag)
    }

    #[test]
    fn recognizes_for_with_key_and_value() {
        let Tag::For {
            key_var, value_var, ..
        } = compile("for k, v in items").unwrap()
        else {
            panic!("expected for");
        };
        assert_eq!(key_var.as_deref(), Some("k"));
        assert_eq!(value_var, "v");
    }

    #[test]
    fn for_rejects_three_bindings() {
        let err = compile("for a, b, c in items").unwrap_err();
        assert!(matches!(err, TemplateError::MalformedDirective { line: 1, .. }));
    }

    #[test]
    fn set_splits_at_first_equals() {
        let Tag::Set { target, value } = compile("set ok = a == b").unwrap() else {
            panic!("expected set");
        };
        assert_eq!(target, "ok");
        assert_eq!(value.source, "a == b");
    }

    #[test]
    fn set_target_must_be_single_name() {
        assert!(matches!(
            compile("set a, b = 1").unwrap_err(),
            TemplateError::MalformedDirective { .. }
        ));
    }

    #[test]
    fn endblock_accepts_optional_name() {
        assert!(matches!(compile("endblock").unwrap(), Tag::EndBlock(None)));
        assert!(matches!(
            compile("endblock title").unwrap(),
            Tag::EndBlock(Some(name)) if name == "title"
        ));
    }

    #[test]
    fn multiline_condition_is_accepted() {
        assert!(matches!(compile("if a\n and b").unwrap(), Tag::If(_)));
    }

    #[test]
    fn unknown_keyword_is_unrecognized() {
        assert!(matches!(
            compile("include 'x'").unwrap_err(),
            TemplateError::UnrecognizedDirective { .. }
        ));
    }

    struct Noop;

    impl TagHandler for Noop {
        fn render(&self, _call: &mut TagCall<'_, '_>) -> Result<TagOutcome> {
            Ok(TagOutcome::default())
        }
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut tags = TagRegistry::builtin();
        let def = || TagDefinition::new("spaceless", Regex::new("^spaceless$").unwrap(), &[], true, Noop);
        tags.register(def()).unwrap();
        assert!(matches!(
            tags.register(def()).unwrap_err(),
            TemplateError::DuplicateDirective(name) if name == "spaceless"
        ));
        assert!(matches!(
            tags.register(TagDefinition::new("if", Regex::new("^x$").unwrap(), &[], true, Noop))
                .unwrap_err(),
            TemplateError::DuplicateDirective(_)
        ));
    }

    #[test]
    fn extension_compiles_captures_as_expressions() {
        let mut tags = TagRegistry::builtin();
        tags.register(TagDefinition::new(
            "repeat",
            Regex::new(r"^repeat\s+(.+)$").unwrap(),
            &["endrepeat"],
            true,
            Noop,
        ))
        .unwrap();
        let (def, tag) = tags.compile("repeat 1 + 2", 3).unwrap();
        assert_eq!(def.name(), "repeat");
        let Tag::Extension(ext) = tag else {
            panic!("expected extension");
        };
        assert_eq!(ext.args.len(), 1);
        assert_eq!(ext.args[0].source, "1 + 2");
    }
}
