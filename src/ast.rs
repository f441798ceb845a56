use crate::value::Number;

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub stmt_type: StmtType,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtType {
    Use {
        path: ModulePath,
        alias: String,
    },
    Let {
        name: String,
        annotation: Option<TypeAnnotation>,
        initializer: Expr,
    },
    Assign {
        name: String,
        value: Expr,
    },
    IndexAssign {
        name: String,
        index: Expr,
        value: Expr,
    },
    PropertyAssign(PropertyChain),
    Function(FunctionDef),
    If {
        condition: Expr,
        then_branch: Block,
        else_branch: Option<Block>,
    },
    While {
        condition: Expr,
        body: Block,
    },
    For(ForLoop),
    Switch {
        subject: Expr,
        cases: Vec<SwitchCase>,
        default: Option<Block>,
    },
    Try {
        body: Block,
        catch_var: String,
        handler: Block,
    },
    Print(Vec<Expr>),
    Return(Option<Expr>),
    Break,
    Continue,
    Expression(Expr),
}

/// How a `use` statement named its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModulePath {
    Path(String),
    String(String),
    Name(String),
}

impl ModulePath {
    pub fn text(&self) -> &str {
        match self {
            ModulePath::Path(text) | ModulePath::String(text) | ModulePath::Name(text) => text,
        }
    }
}

/// `a.b = v`, `a.b.c = v` or `a.b.c.d = v`.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyChain {
    Two {
        base: String,
        first: String,
        value: Expr,
    },
    Three {
        base: String,
        first: String,
        second: String,
        value: Expr,
    },
    Four {
        base: String,
        first: String,
        second: String,
        third: String,
        value: Expr,
    },
}

impl PropertyChain {
    pub fn base(&self) -> &str {
        match self {
            PropertyChain::Two { base, .. }
            | PropertyChain::Three { base, .. }
            | PropertyChain::Four { base, .. } => base,
        }
    }

    /// Property names below the base, outermost first.
    pub fn properties(&self) -> Vec<&str> {
        match self {
            PropertyChain::Two { first, .. } => vec![first.as_str()],
            PropertyChain::Three { first, second, .. } => vec![first.as_str(), second.as_str()],
            PropertyChain::Four {
                first,
                second,
                third,
                ..
            } => vec![first.as_str(), second.as_str(), third.as_str()],
        }
    }

    pub fn value(&self) -> &Expr {
        match self {
            PropertyChain::Two { value, .. }
            | PropertyChain::Three { value, .. }
            | PropertyChain::Four { value, .. } => value,
        }
    }

    /// Number of names in the chain, including the base.
    pub fn depth(&self) -> usize {
        self.properties().len() + 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<TypeAnnotation>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub annotation: Option<TypeAnnotation>,
}

/// Recorded for documentation; annotations are never enforced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeAnnotation {
    Int,
    String,
    Named(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForLoop {
    pub variable: String,
    pub kind: ForKind,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForKind {
    /// `for i in start:end:`
    Range { start: Expr, end: Expr },
    /// `for i in start:end:step:` with a non-negative literal step.
    Step { start: Expr, end: Expr, step: Expr },
    /// `for i in start:end:-step:`
    Countdown { start: Expr, end: Expr, step: Expr },
    /// `for item in array:`
    Array { iterable: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub value: Expr,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub expr_type: ExprType,
    pub line: usize,
}

impl Expr {
    pub fn new(expr_type: ExprType, line: usize) -> Self {
        Expr { expr_type, line }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprType {
    Literal(Literal),
    Variable(String),
    Unary {
        operator: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        right: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        name: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Lambda(Lambda),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(Number),
    String(String),
    Boolean(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Box<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::And | BinaryOp::Or => 1,
            BinaryOp::Equal | BinaryOp::NotEqual => 2,
            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => 3,
            BinaryOp::Add | BinaryOp::Subtract => 4,
            BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => 5,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}
