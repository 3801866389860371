//! 运算符表：优先级、结合性与操作数个数
//!
//! 数值越小绑定越紧（沿用 C 语言运算符表的编号）。

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Associativity {
    LeftToRight,
    RightToLeft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// `~` 字符串拼接
    Concat,
    Not,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    Or,
    And,
    /// 三元 `?`
    Conditional,
    /// 三元 `:`
    Alternative,
}

/// 逗号的优先级：比任何运算符都松，遇到时清空当前分组内的运算符栈
pub const COMMA_PRECEDENCE: u8 = 18;

impl Operator {
    pub fn lookup(symbol: &str) -> Option<Operator> {
        let op = match symbol {
            "+" => Operator::Add,
            "-" => Operator::Sub,
            "*" => Operator::Mul,
            "/" => Operator::Div,
            "%" => Operator::Mod,
            "~" => Operator::Concat,
            "!" | "not" => Operator::Not,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "==" => Operator::Eq,
            "!=" => Operator::Ne,
            "||" | "or" => Operator::Or,
            "&&" | "and" => Operator::And,
            "?" => Operator::Conditional,
            ":" => Operator::Alternative,
            _ => return None,
        };
        Some(op)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Mod => "%",
            Operator::Concat => "~",
            Operator::Not => "!",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Or => "||",
            Operator::And => "&&",
            Operator::Conditional => "?",
            Operator::Alternative => ":",
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            Operator::Conditional | Operator::Alternative => 16,
            Operator::Or => 14,
            Operator::And => 13,
            Operator::Eq | Operator::Ne => 9,
            Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => 8,
            Operator::Concat | Operator::Add | Operator::Sub => 6,
            Operator::Mul | Operator::Div | Operator::Mod => 5,
            Operator::Not => 3,
        }
    }

    pub fn associativity(self) -> Associativity {
        match self {
            Operator::Conditional | Operator::Alternative | Operator::Not => {
                Associativity::RightToLeft
            }
            _ => Associativity::LeftToRight,
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Operator::Not => 1,
            _ => 2,
        }
    }

    /// 新运算符入栈前，栈顶运算符 `top` 是否应先输出
    pub fn yields_to(self, top: Operator) -> bool {
        match self.associativity() {
            Associativity::LeftToRight => self.precedence() >= top.precedence(),
            Associativity::RightToLeft => self.precedence() > top.precedence(),
        }
    }
}
