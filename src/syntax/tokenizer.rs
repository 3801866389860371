use crate::error::{Result, TemplateError};

/// 模板级 Token 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    /// 原样输出的文本
    Raw,
    /// {{ expr }}
    Output,
    /// {% directive %}
    Logic,
    /// {# 注释 #}
    Comment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span<'src> {
    pub kind: SpanKind,
    /// Raw/Comment 为原文；Output/Logic 为去掉首尾空白的定界符内部
    pub text: &'src str,
    /// 内容在模板中的字节偏移
    pub offset: usize,
}

struct Delimiter {
    kind: SpanKind,
    open: &'static str,
    close: &'static str,
}

/// 声明顺序即同一位置同时命中时的优先顺序
const DELIMITERS: [Delimiter; 3] = [
    Delimiter {
        kind: SpanKind::Output,
        open: "{{",
        close: "}}",
    },
    Delimiter {
        kind: SpanKind::Logic,
        open: "{%",
        close: "%}",
    },
    Delimiter {
        kind: SpanKind::Comment,
        open: "{#",
        close: "#}",
    },
];

const QUOTES: [char; 2] = ['"', '\''];

/// 将模板源码切分为 raw / output / logic / comment 序列
pub fn tokenize(source: &str) -> Result<Vec<Span<'_>>> {
    let mut spans = Vec::new();
    let mut pos = 0;

    while pos < source.len() {
        let rest = &source[pos..];
        let Some((start, delim)) = find_start(rest) else {
            spans.push(Span {
                kind: SpanKind::Raw,
                text: rest,
                offset: pos,
            });
            break;
        };

        if start > 0 {
            spans.push(Span {
                kind: SpanKind::Raw,
                text: &rest[..start],
                offset: pos,
            });
        }

        let content_start = pos + start + delim.open.len();
        let end = find_end(source, content_start, delim)?;
        let raw = &source[content_start..end];
        let text = if delim.kind == SpanKind::Comment {
            raw
        } else {
            raw.trim()
        };
        tracing::trace!(kind = ?delim.kind, offset = content_start, "匹配到模板标记: {text}");
        spans.push(Span {
            kind: delim.kind,
            text,
            offset: content_start,
        });

        pos = end + delim.close.len();
    }

    Ok(spans)
}

fn find_start(rest: &str) -> Option<(usize, &'static Delimiter)> {
    let mut found: Option<(usize, &'static Delimiter)> = None;
    for delim in &DELIMITERS {
        if let Some(idx) = rest.find(delim.open)
            && found.is_none_or(|(best, _)| idx < best)
        {
            found = Some((idx, delim));
        }
    }
    found
}

/// 查找结束定界符，跳过引号字符串中的同名定界符
fn find_end(source: &str, from: usize, delim: &Delimiter) -> Result<usize> {
    let mut offset = from;
    loop {
        let rest = &source[offset..];
        let Some(close) = rest.find(delim.close) else {
            return Err(TemplateError::unterminated_token(
                delim.close,
                source,
                from - delim.open.len(),
            ));
        };

        // 注释内容不做字符串识别，撇号不会被误判为未闭合字符串
        if delim.kind == SpanKind::Comment {
            return Ok(offset + close);
        }

        let quote = rest[..close]
            .char_indices()
            .find(|(_, c)| QUOTES.contains(c));

        match quote {
            None => return Ok(offset + close),
            Some((idx, q)) => {
                let string_start = offset + idx;
                offset = skip_string(source, string_start, q)?;
            }
        }
    }
}

/// 返回字符串结束引号之后的偏移
fn skip_string(source: &str, start: usize, quote: char) -> Result<usize> {
    let mut escaped = false;
    for (idx, c) in source[start + 1..].char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Ok(start + 1 + idx + c.len_utf8());
        }
    }
    Err(TemplateError::unterminated_string(quote, source, start))
}
