//! The loop-nest IR: expressions, statements, and procedures.
//!
//! Statements and expressions are tagged variants with exhaustive case
//! analysis at every use site; there is no visitor indirection in the data
//! model itself (see [`crate::visit`] for the generic walks).  Every node
//! carries a [`SrcInfo`]; expression nodes additionally carry their [`Type`].

use std::rc::Rc;

use crate::srcinfo::SrcInfo;
use crate::sym::Sym;
use crate::types::Type;

/// Binary operators.  `Div` and `Mod` on indexable operands require a
/// constant right-hand side strictly greater than one.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
}

impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq
        )
    }

    pub fn is_logic(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

/// A literal constant value.
#[derive(Clone, PartialEq, Debug)]
pub enum Lit {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Lit {
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Lit::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Lit::Bool(v) => Some(v),
            _ => None,
        }
    }
}

/// A per-dimension window access: either a single point or a half-open
/// interval `[lo, hi)`.
#[derive(Clone, PartialEq, Debug)]
pub enum WAccess {
    Point { pt: Expr, srcinfo: SrcInfo },
    Interval { lo: Expr, hi: Expr, srcinfo: SrcInfo },
}

impl WAccess {
    pub fn is_interval(&self) -> bool {
        matches!(self, WAccess::Interval { .. })
    }

    pub fn srcinfo(&self) -> &SrcInfo {
        match self {
            WAccess::Point { srcinfo, .. } => srcinfo,
            WAccess::Interval { srcinfo, .. } => srcinfo,
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum Expr {
    /// A scalar or fully-indexed buffer read; `idx` is empty for scalars and
    /// matches the tensor rank otherwise.
    Read {
        name: Sym,
        idx: Vec<Expr>,
        ty: Type,
        srcinfo: SrcInfo,
    },
    Const {
        val: Lit,
        ty: Type,
        srcinfo: SrcInfo,
    },
    USub {
        arg: Box<Expr>,
        ty: Type,
        srcinfo: SrcInfo,
    },
    BinOp {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        ty: Type,
        srcinfo: SrcInfo,
    },
    /// `(cond)? body` — indicator selection.
    Select {
        cond: Box<Expr>,
        body: Box<Expr>,
        ty: Type,
        srcinfo: SrcInfo,
    },
    /// A window of a buffer; one access per source dimension.
    Window {
        name: Sym,
        idx: Vec<WAccess>,
        ty: Type,
        srcinfo: SrcInfo,
    },
    /// The stride of a buffer along one dimension.
    Stride {
        name: Sym,
        dim: usize,
        ty: Type,
        srcinfo: SrcInfo,
    },
    /// A read of one field of a configuration record.
    ReadConfig {
        config: Rc<Config>,
        field: String,
        ty: Type,
        srcinfo: SrcInfo,
    },
}

impl Expr {
    pub fn ty(&self) -> &Type {
        match self {
            Expr::Read { ty, .. }
            | Expr::Const { ty, .. }
            | Expr::USub { ty, .. }
            | Expr::BinOp { ty, .. }
            | Expr::Select { ty, .. }
            | Expr::Window { ty, .. }
            | Expr::Stride { ty, .. }
            | Expr::ReadConfig { ty, .. } => ty,
        }
    }

    pub fn srcinfo(&self) -> &SrcInfo {
        match self {
            Expr::Read { srcinfo, .. }
            | Expr::Const { srcinfo, .. }
            | Expr::USub { srcinfo, .. }
            | Expr::BinOp { srcinfo, .. }
            | Expr::Select { srcinfo, .. }
            | Expr::Window { srcinfo, .. }
            | Expr::Stride { srcinfo, .. }
            | Expr::ReadConfig { srcinfo, .. } => srcinfo,
        }
    }

    /// A scalar read of `name`.
    pub fn read(name: &Sym, ty: Type, srcinfo: &SrcInfo) -> Expr {
        Expr::Read {
            name: name.clone(),
            idx: vec![],
            ty,
            srcinfo: srcinfo.clone(),
        }
    }

    pub fn int(val: i64, ty: Type, srcinfo: &SrcInfo) -> Expr {
        Expr::Const {
            val: Lit::Int(val),
            ty,
            srcinfo: srcinfo.clone(),
        }
    }

    pub fn bool(val: bool, srcinfo: &SrcInfo) -> Expr {
        Expr::Const {
            val: Lit::Bool(val),
            ty: Type::Bool,
            srcinfo: srcinfo.clone(),
        }
    }

    pub fn binop(op: BinOp, lhs: Expr, rhs: Expr, ty: Type, srcinfo: &SrcInfo) -> Expr {
        Expr::BinOp {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            ty,
            srcinfo: srcinfo.clone(),
        }
    }

    pub fn is_const_zero(&self) -> bool {
        matches!(
            self,
            Expr::Const {
                val: Lit::Int(0),
                ..
            }
        )
    }

    pub fn as_const_int(&self) -> Option<i64> {
        match self {
            Expr::Const { val, .. } => val.as_int(),
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum Stmt {
    /// `name[idx] = rhs`
    Assign {
        name: Sym,
        ty: Type,
        idx: Vec<Expr>,
        rhs: Expr,
        srcinfo: SrcInfo,
    },
    /// `name[idx] += rhs`
    Reduce {
        name: Sym,
        ty: Type,
        idx: Vec<Expr>,
        rhs: Expr,
        srcinfo: SrcInfo,
    },
    /// `config.field = rhs`
    WriteConfig {
        config: Rc<Config>,
        field: String,
        rhs: Expr,
        srcinfo: SrcInfo,
    },
    /// `name = <window expression>` — binds a window to a name.
    WindowStmt {
        name: Sym,
        rhs: Expr,
        srcinfo: SrcInfo,
    },
    If {
        cond: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        srcinfo: SrcInfo,
    },
    /// `for iter in [lo, hi): body` — half-open bounds, iterator fresh in
    /// the body.
    Seq {
        iter: Sym,
        lo: Expr,
        hi: Expr,
        body: Vec<Stmt>,
        srcinfo: SrcInfo,
    },
    Alloc {
        name: Sym,
        ty: Type,
        mem: Option<Mem>,
        srcinfo: SrcInfo,
    },
    Free {
        name: Sym,
        ty: Type,
        mem: Option<Mem>,
        srcinfo: SrcInfo,
    },
    Call {
        proc: Rc<Proc>,
        args: Vec<Expr>,
        srcinfo: SrcInfo,
    },
    Pass {
        srcinfo: SrcInfo,
    },
    /// A subtree tagged as matching a hardware instruction's structural
    /// template; the tag is carried but uninterpreted by the core.
    Instr {
        op: Instr,
        body: Box<Stmt>,
        srcinfo: SrcInfo,
    },
}

impl Stmt {
    pub fn srcinfo(&self) -> &SrcInfo {
        match self {
            Stmt::Assign { srcinfo, .. }
            | Stmt::Reduce { srcinfo, .. }
            | Stmt::WriteConfig { srcinfo, .. }
            | Stmt::WindowStmt { srcinfo, .. }
            | Stmt::If { srcinfo, .. }
            | Stmt::Seq { srcinfo, .. }
            | Stmt::Alloc { srcinfo, .. }
            | Stmt::Free { srcinfo, .. }
            | Stmt::Call { srcinfo, .. }
            | Stmt::Pass { srcinfo }
            | Stmt::Instr { srcinfo, .. } => srcinfo,
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Stmt::Pass { .. })
    }
}

/// An uninterpreted hardware-instruction tag.
#[derive(Clone, PartialEq, Debug)]
pub struct Instr {
    pub op: Rc<str>,
}

/// A memory-space tag for an allocation or argument; carried but
/// uninterpreted by the core.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Mem(pub Rc<str>);

impl Mem {
    pub fn new(name: &str) -> Mem {
        Mem(Rc::from(name))
    }
}

/// The I/O effect of a procedure argument.  `In` buffers are never written;
/// `Out` buffers are never read before their first write.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Effect {
    In,
    Out,
    InOut,
}

#[derive(Clone, PartialEq, Debug)]
pub struct FnArg {
    pub name: Sym,
    pub ty: Type,
    pub mem: Option<Mem>,
    pub effect: Option<Effect>,
    pub srcinfo: SrcInfo,
}

/// A named configuration record with typed fields, shared across procedures.
#[derive(Clone, PartialEq, Debug)]
pub struct Config {
    pub name: String,
    pub fields: Vec<(String, Type)>,
}

impl Config {
    pub fn field_type(&self, field: &str) -> Option<&Type> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, ty)| ty)
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct Proc {
    pub name: String,
    pub args: Vec<FnArg>,
    /// Preconditions asserted at entry; consulted to discharge divisibility
    /// and range obligations.
    pub preds: Vec<Expr>,
    pub body: Vec<Stmt>,
    pub instr: Option<Instr>,
    pub srcinfo: SrcInfo,
}

impl Proc {
    pub fn arg(&self, name: &Sym) -> Option<&FnArg> {
        self.args.iter().find(|a| &a.name == name)
    }
}
