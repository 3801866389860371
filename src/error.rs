use std::fmt;
use thiserror::Error;

pub type Result<T, E = TemplateError> = std::result::Result<T, E>;

/// 可调用能力的种类（过滤器 / 测试），用于报错时区分
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Filter,
    Test,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityKind::Filter => f.write_str("过滤器"),
            CapabilityKind::Test => f.write_str("测试"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    // ---- 模板分词 ----
    #[error("{}", format_error("未闭合的标记", *line, *col, context, &format!("缺少 '{close}'")))]
    UnterminatedToken {
        close: &'static str,
        line: usize,
        col: usize,
        context: String,
    },

    #[error("{}", format_error("未闭合的字符串", *line, *col, context, &format!("字符串以 {quote} 开始但没有结束")))]
    UnterminatedString {
        quote: char,
        line: usize,
        col: usize,
        context: String,
    },

    // ---- 逻辑指令编译 ----
    #[error("第 {line} 行：无法识别的指令 '{text}'")]
    UnrecognizedDirective { text: String, line: usize },

    #[error("第 {line} 行：{found} 不能出现在 {open} 之后")]
    UnexpectedDirective {
        found: String,
        open: String,
        line: usize,
    },

    #[error("第 {line} 行：{kind} 没有对应的结束标记，期望 {expected}")]
    UnterminatedScope {
        kind: String,
        expected: String,
        line: usize,
    },

    #[error("第 {line} 行：指令格式错误：{message}")]
    MalformedDirective { message: String, line: usize },

    // ---- 表达式编译 ----
    #[error("表达式位置 {position}：{found} 不能跟在 {previous} 之后，附近 '{near}'")]
    IllegalTokenSuccessor {
        found: &'static str,
        previous: &'static str,
        position: usize,
        near: String,
    },

    #[error("表达式位置 {position}：无法解析 '{near}'")]
    InvalidExpression { position: usize, near: String },

    #[error("表达式位置 {position}：'{delimiter}' 没有匹配的起始符号")]
    UnbalancedDelimiter { delimiter: char, position: usize },

    #[error("表达式位置 {position}：参数列表前必须是过滤器或测试")]
    FilterWithoutParameterContext { position: usize },

    #[error("表达式结构错误：{0}")]
    MalformedExpression(String),

    // ---- 求值 ----
    #[error("无法在空值上访问键 '{key}'")]
    NullKeyAccess { key: String },

    #[error("对象不包含键 '{key}'")]
    MissingKey { key: String },

    #[error("未注册的{kind} '{name}'")]
    UnknownCapability { kind: CapabilityKind, name: String },

    #[error("{kind} '{name}' 参数错误：{message}")]
    InvalidArgument {
        kind: CapabilityKind,
        name: String,
        message: String,
    },

    #[error("未定义的变量 '{0}'")]
    UndefinedVariable(String),

    // ---- 模板加载与继承 ----
    #[error("找不到模板 '{0}'")]
    TemplateNotFound(String),

    #[error("未配置模板加载器，无法加载 '{0}'")]
    NoLoader(String),

    #[error("检测到模板循环继承: {0}")]
    InheritanceCycle(String),

    #[error("指令 '{0}' 已注册")]
    DuplicateDirective(String),

    #[error("读取模板失败: {0}")]
    Io(#[from] std::io::Error),
}

fn format_error(kind: &str, line: usize, col: usize, context: &str, message: &str) -> String {
    let mut out = format!("模板{kind}\n  → {line}:{col}\n\n");
    if !context.is_empty() {
        out.push_str(context);
    }
    out.push_str(&format!("  错误：{message}"));
    out
}

impl TemplateError {
    pub fn unterminated_token(close: &'static str, source: &str, offset: usize) -> Self {
        let (line, col) = line_col(source, offset);
        Self::UnterminatedToken {
            close,
            line,
            col,
            context: build_error_context(source, line),
        }
    }

    pub fn unterminated_string(quote: char, source: &str, offset: usize) -> Self {
        let (line, col) = line_col(source, offset);
        Self::UnterminatedString {
            quote,
            line,
            col,
            context: build_error_context(source, line),
        }
    }
}

/// 字节偏移换算为 1 起始的行列号
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let col = match before.rfind('\n') {
        Some(pos) => before[pos + 1..].chars().count() + 1,
        None => before.chars().count() + 1,
    };
    (line, col)
}

fn build_error_context(source: &str, error_line: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let start = error_line.saturating_sub(3);
    let end = (error_line + 2).min(lines.len());

    let mut ctx = String::new();
    let width = format!("{}", end).len();
    for i in start..end {
        let marker = if i + 1 == error_line { ">" } else { " " };
        ctx.push_str(&format!(
            "  {} {:>width$} | {}\n",
            marker,
            i + 1,
            lines.get(i).unwrap_or(&""),
            width = width,
        ));
    }
    ctx
}
