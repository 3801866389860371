//! 表达式编译：子表达式字符串 → RPN 指令序列
//!
//! 分两步：先按有序规则表切分 Token，并校验每个 Token 能否跟在前一个之后；
//! 再用调度场算法（shunting-yard）把中缀 Token 转成后缀指令。

use crate::error::{Result, TemplateError};
use crate::syntax::operator::{COMMA_PRECEDENCE, Operator};
use regex::Regex;
use std::sync::LazyLock;

/// 单条 RPN 指令，求值时从左到右依次作用于同一个栈
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    String(String),
    Number(f64),
    Variable(String),
    Operator(Operator),
    /// `.name`
    Key(String),
    /// `[expr]`，键本身是一段独立的 RPN
    Index(Vec<Instr>),
    Filter {
        name: String,
        params: Option<Vec<Instr>>,
    },
    Test {
        name: String,
        negated: bool,
        params: Option<Vec<Instr>>,
    },
    /// 从栈上取出 n 个值组成列表
    List(usize),
    /// 从栈上取出与键数相同的值，按给定键顺序组成有序映射
    Map(Vec<String>),
}

/// 编译后的表达式，保留原文便于排错
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub source: String,
    pub instrs: Vec<Instr>,
}

/// 编译普通表达式（{{ ... }}、if 条件等）
pub fn compile(source: &str) -> Result<Expression> {
    let instrs = compile_source(source, None)?;
    if instrs.is_empty() {
        return Err(TemplateError::MalformedExpression("空表达式".into()));
    }
    Ok(Expression {
        source: source.to_string(),
        instrs,
    })
}

/// 编译过滤器链（`upper|join(",")`），求值时以栈上已有的值为输入
pub fn compile_filter_chain(chain: &str) -> Result<Expression> {
    let source = format!("|{}", chain.trim_start_matches('|'));
    let instrs = compile_source(&source, Some(TokenKind::String))?;
    Ok(Expression { source, instrs })
}

fn compile_source(source: &str, previous: Option<TokenKind>) -> Result<Vec<Instr>> {
    let tokens = tokenize(source, previous)?;
    let instrs = Compiler::default().run(tokens)?;
    tracing::trace!("表达式 '{source}' 编译为 {instrs:?}");
    Ok(instrs)
}

// ---------------------------------------------------------------------
// Token 切分
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Test,
    SetKey,
    Comma,
    GroupStart,
    Operator,
    UnaryOperator,
    String,
    ParamStart,
    ParenEnd,
    ArrayStart,
    ArrayEnd,
    ObjectStart,
    ObjectEnd,
    Filter,
    Variable,
    KeyPeriod,
    KeyBrackets,
    Number,
}

use TokenKind as K;

/// 一般表达式之后可以出现的 Token
const OPERATIONS: &[TokenKind] = &[
    K::Filter,
    K::Operator,
    K::ArrayEnd,
    K::ObjectEnd,
    K::ParenEnd,
    K::Comma,
    K::SetKey,
    K::Test,
];

/// 可以开始一个值的 Token，也是表达式开头允许的 Token
const EXPRESSIONS: &[TokenKind] = &[
    K::GroupStart,
    K::String,
    K::Variable,
    K::Number,
    K::ArrayStart,
    K::ObjectStart,
    K::UnaryOperator,
];

const KEY_ACCESS: &[TokenKind] = &[K::KeyPeriod, K::KeyBrackets];

impl TokenKind {
    pub fn name(self) -> &'static str {
        match self {
            K::Test => "测试",
            K::SetKey => "键分隔符 ':'",
            K::Comma => "逗号",
            K::GroupStart => "'('",
            K::Operator => "运算符",
            K::UnaryOperator => "一元运算符",
            K::String => "字符串",
            K::ParamStart => "参数列表 '('",
            K::ParenEnd => "')'",
            K::ArrayStart => "'['",
            K::ArrayEnd => "']'",
            K::ObjectStart => "'{'",
            K::ObjectEnd => "'}'",
            K::Filter => "过滤器",
            K::Variable => "变量",
            K::KeyPeriod => "属性访问",
            K::KeyBrackets => "下标访问",
            K::Number => "数字",
        }
    }

    /// 该 Token 之后合法的 Token 集合
    fn accepts(self, next: TokenKind) -> bool {
        let in_any = |sets: &[&[TokenKind]]| sets.iter().any(|s| s.contains(&next));
        match self {
            K::Test => in_any(&[OPERATIONS, &[K::ParamStart]]),
            K::SetKey | K::Comma | K::Operator | K::UnaryOperator => in_any(&[EXPRESSIONS]),
            K::GroupStart | K::ParamStart => in_any(&[EXPRESSIONS, &[K::ParenEnd]]),
            K::ArrayStart => in_any(&[EXPRESSIONS, &[K::ArrayEnd]]),
            K::ObjectStart => in_any(&[EXPRESSIONS, &[K::ObjectEnd]]),
            K::String | K::Number => in_any(&[OPERATIONS]),
            K::Filter => in_any(&[OPERATIONS, KEY_ACCESS, &[K::ParamStart]]),
            K::ParenEnd
            | K::ArrayEnd
            | K::ObjectEnd
            | K::Variable
            | K::KeyPeriod
            | K::KeyBrackets => in_any(&[OPERATIONS, KEY_ACCESS]),
        }
    }

    /// 表达式能否以该 Token 结束
    fn can_end(self) -> bool {
        !matches!(
            self,
            K::SetKey
                | K::Comma
                | K::Operator
                | K::UnaryOperator
                | K::GroupStart
                | K::ParamStart
                | K::ArrayStart
                | K::ObjectStart
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub text: &'src str,
    pub position: usize,
}

enum Matcher {
    Pattern(Regex),
    Scan(fn(&str) -> Option<usize>),
}

impl Matcher {
    fn matched_len(&self, input: &str) -> Option<usize> {
        match self {
            Matcher::Pattern(re) => re.find(input).map(|m| m.end()).filter(|len| *len > 0),
            Matcher::Scan(scan) => scan(input),
        }
    }
}

struct Definition {
    kind: TokenKind,
    matcher: Matcher,
}

fn pattern(kind: TokenKind, re: &str) -> Definition {
    Definition {
        kind,
        matcher: Matcher::Pattern(Regex::new(re).unwrap()),
    }
}

fn scan(kind: TokenKind, f: fn(&str) -> Option<usize>) -> Definition {
    Definition {
        kind,
        matcher: Matcher::Scan(f),
    }
}

/// 匹配顺序有意义：同一文本可被多条规则命中时，取第一条合法的
static DEFINITIONS: LazyLock<Vec<Definition>> = LazyLock::new(|| {
    vec![
        pattern(K::Test, r"^is\s+(?:not\s+)?[a-zA-Z_][a-zA-Z0-9_]*"),
        pattern(K::SetKey, r"^:"),
        pattern(K::Comma, r"^,"),
        pattern(K::GroupStart, r"^\("),
        pattern(
            K::Operator,
            r"^(?:==|!=|<=|>=|\|\||&&|[+\-*/%~<>?:]|(?:and|or)\b)",
        ),
        pattern(K::UnaryOperator, r"^(?:!|not\b)"),
        scan(K::String, scan_string),
        pattern(K::ParamStart, r"^\("),
        pattern(K::ParenEnd, r"^\)"),
        pattern(K::ArrayStart, r"^\["),
        pattern(K::ArrayEnd, r"^\]"),
        pattern(K::ObjectStart, r"^\{"),
        pattern(K::ObjectEnd, r"^\}"),
        pattern(K::Filter, r"^\|[a-zA-Z_][a-zA-Z0-9_]*"),
        pattern(K::Variable, r"^[a-zA-Z_][a-zA-Z0-9_]*"),
        pattern(K::KeyPeriod, r"^\.[a-zA-Z0-9_]+"),
        scan(K::KeyBrackets, scan_brackets),
        pattern(K::Number, r"^-?[0-9]*\.?[0-9]+"),
    ]
});

/// 引号字符串的长度（含两侧引号），反斜杠转义的引号不结束字符串
fn scan_string(input: &str) -> Option<usize> {
    let quote = input.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let mut escaped = false;
    for (idx, c) in input.char_indices().skip(1) {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Some(idx + c.len_utf8());
        }
    }
    None
}

/// `[ ... ]` 的长度，允许嵌套与内部字符串
fn scan_brackets(input: &str) -> Option<usize> {
    if !input.starts_with('[') {
        return None;
    }
    let mut depth = 0usize;
    let mut idx = 0;
    while idx < input.len() {
        let rest = &input[idx..];
        let c = rest.chars().next()?;
        match c {
            '"' | '\'' => {
                idx += scan_string(rest)?;
                continue;
            }
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
        idx += c.len_utf8();
    }
    None
}

fn near(input: &str) -> String {
    let snippet: String = input.chars().take(20).collect();
    if snippet.len() < input.len() {
        format!("{snippet}...")
    } else {
        snippet
    }
}

/// 切分表达式。`previous` 用于在已有值之后继续（过滤器链）
pub fn tokenize(source: &str, previous: Option<TokenKind>) -> Result<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut prev = previous;
    // 每层括号一个计数：尚未遇到 ':' 的 '?' 个数
    let mut pending_ternary = vec![0usize];
    let mut pos = 0;

    loop {
        let rest = source[pos..].trim_start();
        pos = source.len() - rest.len();
        if rest.is_empty() {
            break;
        }

        let in_ternary = pending_ternary.last().is_some_and(|n| *n > 0);
        let mut rejected = None;
        let mut matched = None;
        for def in DEFINITIONS.iter() {
            if def.kind == K::SetKey && in_ternary {
                continue;
            }
            let Some(len) = def.matcher.matched_len(rest) else {
                continue;
            };
            let legal = match prev {
                None => EXPRESSIONS.contains(&def.kind),
                Some(p) => p.accepts(def.kind),
            };
            if !legal {
                rejected.get_or_insert(def.kind);
                continue;
            }
            matched = Some((def.kind, len));
            break;
        }

        let Some((kind, len)) = matched else {
            return Err(match (rejected, prev) {
                (Some(found), Some(previous)) => TemplateError::IllegalTokenSuccessor {
                    found: found.name(),
                    previous: previous.name(),
                    position: pos,
                    near: near(rest),
                },
                (Some(found), None) => TemplateError::IllegalTokenSuccessor {
                    found: found.name(),
                    previous: "表达式开头",
                    position: pos,
                    near: near(rest),
                },
                (None, _) => TemplateError::InvalidExpression {
                    position: pos,
                    near: near(rest),
                },
            });
        };

        let text = &rest[..len];
        match kind {
            K::GroupStart | K::ParamStart | K::ArrayStart | K::ObjectStart => {
                pending_ternary.push(0);
            }
            K::ParenEnd | K::ArrayEnd | K::ObjectEnd if pending_ternary.len() > 1 => {
                pending_ternary.pop();
            }
            K::Operator => {
                if let Some(open) = pending_ternary.last_mut() {
                    match text {
                        "?" => *open += 1,
                        ":" => *open = open.saturating_sub(1),
                        _ => {}
                    }
                }
            }
            _ => {}
        }

        tracing::trace!(kind = ?kind, position = pos, "表达式 Token: {text}");
        tokens.push(Token {
            kind,
            text,
            position: pos,
        });
        prev = Some(kind);
        pos += len;
    }

    if let Some(last) = tokens.last()
        && !last.kind.can_end()
    {
        return Err(TemplateError::MalformedExpression(format!(
            "表达式在 {} 之后意外结束：'{source}'",
            last.kind.name()
        )));
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------
// 调度场编译
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupKind {
    Paren,
    Params,
    List,
    Map,
}

impl GroupKind {
    fn open_char(self) -> char {
        match self {
            GroupKind::Paren | GroupKind::Params => '(',
            GroupKind::List => '[',
            GroupKind::Map => '{',
        }
    }

    fn close_char(self) -> char {
        match self {
            GroupKind::Paren | GroupKind::Params => ')',
            GroupKind::List => ']',
            GroupKind::Map => '}',
        }
    }
}

#[derive(Debug)]
struct Group {
    kind: GroupKind,
    position: usize,
    /// 分组开始时输出序列的长度
    output_start: usize,
    /// 当前项开始时输出序列的长度
    item_start: usize,
    /// 已由逗号结束的项数
    items: usize,
    keys: Vec<String>,
}

#[derive(Debug)]
enum Pending {
    Op(Operator),
    Group(Group),
}

#[derive(Default)]
struct Compiler {
    output: Vec<Instr>,
    stack: Vec<Pending>,
}

impl Compiler {
    fn run(mut self, tokens: Vec<Token<'_>>) -> Result<Vec<Instr>> {
        for token in tokens {
            self.push_token(token)?;
        }

        while let Some(pending) = self.stack.pop() {
            match pending {
                Pending::Op(op) => self.output.push(Instr::Operator(op)),
                Pending::Group(group) => {
                    return Err(TemplateError::UnbalancedDelimiter {
                        delimiter: group.kind.open_char(),
                        position: group.position,
                    });
                }
            }
        }
        Ok(self.output)
    }

    fn push_token(&mut self, token: Token<'_>) -> Result<()> {
        let text = token.text;
        match token.kind {
            K::String => self.output.push(Instr::String(unquote(text))),
            K::Number => {
                let n = text.parse::<f64>().map_err(|_| TemplateError::InvalidExpression {
                    position: token.position,
                    near: text.to_string(),
                })?;
                self.output.push(Instr::Number(n));
            }
            K::Variable => self.output.push(Instr::Variable(text.to_string())),
            K::KeyPeriod => self.output.push(Instr::Key(text[1..].to_string())),
            K::KeyBrackets => {
                let inner = &text[1..text.len() - 1];
                let key = compile_source(inner, None)?;
                if key.is_empty() {
                    return Err(TemplateError::MalformedExpression(format!(
                        "下标访问缺少键：'{text}'"
                    )));
                }
                self.output.push(Instr::Index(key));
            }
            K::Filter => self.output.push(Instr::Filter {
                name: text[1..].to_string(),
                params: None,
            }),
            K::Test => {
                let rest = text["is".len()..].trim_start();
                let (negated, name) = match rest.strip_prefix("not") {
                    Some(name) if name.starts_with(char::is_whitespace) => (true, name.trim()),
                    _ => (false, rest),
                };
                self.output.push(Instr::Test {
                    name: name.to_string(),
                    negated,
                    params: None,
                });
            }
            K::Operator | K::UnaryOperator => {
                let op = Operator::lookup(text).ok_or_else(|| TemplateError::InvalidExpression {
                    position: token.position,
                    near: text.to_string(),
                })?;
                while let Some(Pending::Op(top)) = self.stack.last()
                    && op.yields_to(*top)
                {
                    self.output.push(Instr::Operator(*top));
                    self.stack.pop();
                }
                if op == Operator::Alternative {
                    self.close_inner_ternaries();
                }
                self.stack.push(Pending::Op(op));
            }
            K::Comma => {
                self.flush_operators();
                match self.stack.last_mut() {
                    Some(Pending::Group(group))
                        if matches!(
                            group.kind,
                            GroupKind::Params | GroupKind::List | GroupKind::Map
                        ) =>
                    {
                        group.items += 1;
                        group.item_start = self.output.len();
                    }
                    _ => {
                        return Err(TemplateError::MalformedExpression(
                            "逗号只能出现在列表、映射或参数列表中".into(),
                        ));
                    }
                }
            }
            K::SetKey => self.set_key(token)?,
            K::GroupStart => self.open(GroupKind::Paren, token.position),
            K::ParamStart => self.open(GroupKind::Params, token.position),
            K::ArrayStart => self.open(GroupKind::List, token.position),
            K::ObjectStart => self.open(GroupKind::Map, token.position),
            K::ParenEnd => self.close(')', token.position)?,
            K::ArrayEnd => self.close(']', token.position)?,
            K::ObjectEnd => self.close('}', token.position)?,
        }
        Ok(())
    }

    fn open(&mut self, kind: GroupKind, position: usize) {
        let start = self.output.len();
        self.stack.push(Pending::Group(Group {
            kind,
            position,
            output_start: start,
            item_start: start,
            items: 0,
            keys: Vec::new(),
        }));
    }

    /// 新的 `:` 到来时，栈顶已经配对完成的 `? :` 属于 then 分支里的内层三元，先输出
    fn close_inner_ternaries(&mut self) {
        while let [
            ..,
            Pending::Op(Operator::Conditional),
            Pending::Op(Operator::Alternative),
        ] = self.stack.as_slice()
        {
            self.stack.truncate(self.stack.len() - 2);
            self.output.push(Instr::Operator(Operator::Alternative));
            self.output.push(Instr::Operator(Operator::Conditional));
        }
    }

    /// 逗号与闭合符号：把当前分组内的运算符全部输出
    fn flush_operators(&mut self) {
        while let Some(Pending::Op(top)) = self.stack.last()
            && top.precedence() <= COMMA_PRECEDENCE
        {
            self.output.push(Instr::Operator(*top));
            self.stack.pop();
        }
    }

    fn set_key(&mut self, token: Token<'_>) -> Result<()> {
        self.flush_operators();
        let Some(Pending::Group(group)) = self.stack.last_mut() else {
            return Err(TemplateError::MalformedExpression(
                "':' 只能出现在映射字面量或三元表达式中".into(),
            ));
        };
        if group.kind != GroupKind::Map {
            return Err(TemplateError::MalformedExpression(
                "':' 只能出现在映射字面量或三元表达式中".into(),
            ));
        }
        if group.keys.len() != group.items || self.output.len() != group.item_start + 1 {
            return Err(TemplateError::MalformedExpression(format!(
                "映射键必须是单个字面量（位置 {}）",
                token.position
            )));
        }
        let key = match self.output.pop() {
            Some(Instr::String(s)) | Some(Instr::Variable(s)) => s,
            Some(Instr::Number(n)) => crate::value::format_number(n),
            other => {
                return Err(TemplateError::MalformedExpression(format!(
                    "非法的映射键: {other:?}"
                )));
            }
        };
        group.keys.push(key);
        group.item_start = self.output.len();
        Ok(())
    }

    fn close(&mut self, delimiter: char, position: usize) -> Result<()> {
        self.flush_operators();
        let group = match self.stack.pop() {
            Some(Pending::Group(group)) if group.kind.close_char() == delimiter => group,
            _ => return Err(TemplateError::UnbalancedDelimiter { delimiter, position }),
        };

        let has_last_item = self.output.len() > group.item_start
            || (group.kind == GroupKind::Map && group.keys.len() > group.items);
        let count = group.items + usize::from(has_last_item);

        match group.kind {
            GroupKind::Paren => {
                if self.output.len() == group.output_start {
                    return Err(TemplateError::FilterWithoutParameterContext {
                        position: group.position,
                    });
                }
            }
            GroupKind::Params => {
                let args = self.output.split_off(group.output_start);
                match self.output.last_mut() {
                    Some(Instr::Filter { params, .. }) | Some(Instr::Test { params, .. })
                        if params.is_none() =>
                    {
                        *params = Some(args);
                    }
                    _ => {
                        return Err(TemplateError::FilterWithoutParameterContext {
                            position: group.position,
                        });
                    }
                }
            }
            GroupKind::List => self.output.push(Instr::List(count)),
            GroupKind::Map => {
                if group.keys.len() != count {
                    return Err(TemplateError::MalformedExpression(
                        "映射字面量的每一项都必须是 key: value 形式".into(),
                    ));
                }
                self.output.push(Instr::Map(group.keys));
            }
        }
        Ok(())
    }
}

fn unquote(text: &str) -> String {
    let mut chars = text.chars();
    let quote = chars.next();
    let inner = &text[1..text.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut iter = inner.chars().peekable();
    while let Some(c) = iter.next() {
        if c == '\\'
            && let Some(&next) = iter.peek()
            && (Some(next) == quote || next == '\\')
        {
            out.push(next);
            iter.next();
            continue;
        }
        out.push(c);
    }
    out
}
