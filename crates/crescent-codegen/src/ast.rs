/// The AST consumed by the code generator.
///
/// The parser is an external collaborator; these types are its output
/// contract. Node kinds are closed sums dispatched by exhaustive match in
/// the generator — no visitor indirection. Identifier and string payloads
/// are `StringId` handles into the interner shared with the parser.
use crescent_core::string::StringId;

/// A whole source chunk: the top-level statement list.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub body: Vec<Stat>,
}

/// Statements.
#[derive(Clone, Debug)]
pub enum Stat {
    /// `local n1, n2, ... = e1, e2, ...`
    Local { names: Vec<StringId>, exprs: Vec<Expr> },
    /// `t1, t2, ... = e1, e2, ...` — targets are plain names (locals,
    /// upvalues, or globals).
    Assign { targets: Vec<StringId>, values: Vec<Expr> },
    /// `if cond then ... [else ...] end`
    If {
        cond: Expr,
        consequent: Vec<Stat>,
        alternate: Option<Vec<Stat>>,
    },
    /// `do ... end`
    Do(Vec<Stat>),
    /// A call in statement position; the expression is always `Expr::Call`.
    Call(Expr),
    /// `return e1, e2, ...`
    Return(Vec<Expr>),
    /// `[local] function name(params) ... end`
    Function {
        name: StringId,
        is_local: bool,
        params: Vec<StringId>,
        body: Vec<Stat>,
    },
    /// `while cond do ... end` — parsed but not generated.
    While { cond: Expr, body: Vec<Stat> },
    /// `repeat ... until cond` — parsed but not generated.
    Repeat { body: Vec<Stat>, until: Expr },
    /// `for v = init, limit [, step] do ... end` — parsed but not generated.
    NumericFor {
        var: StringId,
        init: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Vec<Stat>,
    },
}

impl Stat {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Stat::Local { .. } => "local declaration",
            Stat::Assign { .. } => "assignment",
            Stat::If { .. } => "if statement",
            Stat::Do(_) => "do block",
            Stat::Call(_) => "call statement",
            Stat::Return(_) => "return statement",
            Stat::Function { .. } => "function declaration",
            Stat::While { .. } => "while statement",
            Stat::Repeat { .. } => "repeat statement",
            Stat::NumericFor { .. } => "numeric for statement",
        }
    }
}

/// Expressions.
#[derive(Clone, Debug)]
pub enum Expr {
    Nil,
    Boolean(bool),
    Number(f64),
    Str(StringId),
    Name(StringId),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary { op: UnOp, operand: Box<Expr> },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Function {
        params: Vec<StringId>,
        body: Vec<Stat>,
    },
    /// `...` — parsed but not generated.
    Vararg,
    /// `{ ... }` — parsed but not generated.
    Table(Vec<TableField>),
}

/// A field of a table constructor.
#[derive(Clone, Debug)]
pub enum TableField {
    Item(Expr),
    Pair(Expr, Expr),
}

impl Expr {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::Nil => "nil literal",
            Expr::Boolean(_) => "boolean literal",
            Expr::Number(_) => "number literal",
            Expr::Str(_) => "string literal",
            Expr::Name(_) => "identifier",
            Expr::Binary { .. } => "binary expression",
            Expr::Unary { .. } => "unary expression",
            Expr::Call { .. } => "call expression",
            Expr::Function { .. } => "function expression",
            Expr::Vararg => "vararg expression",
            Expr::Table(_) => "table constructor",
        }
    }

    /// True for call expressions, whose result count depends on context.
    pub fn is_call(&self) -> bool {
        matches!(self, Expr::Call { .. })
    }
}

/// Binary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

/// Unary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
}
