//! Pretty-printing for the IR.
//!
//! Expression printing is precedence-aware: each operator is assigned a
//! precedence number, where a higher number binds more tightly, and a
//! subexpression is parenthesized exactly when its operator binds less
//! tightly than its context requires.  The printed form doubles as a
//! canonical key for syntactic-equality tables, so it must be deterministic
//! and location-free.

use std::fmt;

use itertools::Itertools;

use crate::ir::{BinOp, Expr, Lit, Proc, Stmt, WAccess};
use crate::types::Type;

fn parenthesize_if(
    cond: bool,
    f: &mut fmt::Formatter,
    inner: impl FnOnce(&mut fmt::Formatter) -> fmt::Result,
) -> fmt::Result {
    if cond {
        f.write_str("(")?;
    }
    inner(f)?;
    if cond {
        f.write_str(")")?;
    }
    Ok(())
}

// Precedence:
// - or: 1, and: 2
// - comparisons: 3
// - + -: 4
// - * / %: 5
// - unary minus: 6
// - atoms: never parenthesized
fn binop_prec(op: BinOp) -> usize {
    match op {
        BinOp::Or => 1,
        BinOp::And => 2,
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq => 3,
        BinOp::Add | BinOp::Sub => 4,
        BinOp::Mul | BinOp::Div | BinOp::Mod => 5,
    }
}

fn pretty_expr(e: &Expr, f: &mut fmt::Formatter, prec: usize) -> fmt::Result {
    match e {
        Expr::Read { name, idx, .. } => {
            write!(f, "{}", name)?;
            if !idx.is_empty() {
                f.write_str("[")?;
                for (i, ix) in idx.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    pretty_expr(ix, f, 0)?;
                }
                f.write_str("]")?;
            }
            Ok(())
        }
        Expr::Const { val, .. } => match val {
            Lit::Int(v) => write!(f, "{}", v),
            Lit::Float(v) => write!(f, "{:?}", v),
            Lit::Bool(v) => write!(f, "{}", v),
        },
        Expr::USub { arg, .. } => parenthesize_if(prec > 6, f, |f| {
            f.write_str("-")?;
            pretty_expr(arg, f, 6)
        }),
        Expr::BinOp { op, lhs, rhs, .. } => {
            let p = binop_prec(*op);
            parenthesize_if(prec >= p, f, |f| {
                pretty_expr(lhs, f, p - 1)?;
                write!(f, " {} ", op.as_str())?;
                pretty_expr(rhs, f, p)
            })
        }
        Expr::Select { cond, body, .. } => parenthesize_if(prec > 0, f, |f| {
            f.write_str("(")?;
            pretty_expr(cond, f, 0)?;
            f.write_str(")? ")?;
            pretty_expr(body, f, 6)
        }),
        Expr::Window { name, idx, .. } => {
            write!(f, "{}[", name)?;
            for (i, w) in idx.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                match w {
                    WAccess::Point { pt, .. } => pretty_expr(pt, f, 0)?,
                    WAccess::Interval { lo, hi, .. } => {
                        pretty_expr(lo, f, 0)?;
                        f.write_str(":")?;
                        pretty_expr(hi, f, 0)?;
                    }
                }
            }
            f.write_str("]")
        }
        Expr::Stride { name, dim, .. } => write!(f, "stride({}, {})", name, dim),
        Expr::ReadConfig { config, field, .. } => write!(f, "{}.{}", config.name, field),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        pretty_expr(self, f, 0)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::R => f.write_str("R"),
            Type::F16 => f.write_str("f16"),
            Type::F32 => f.write_str("f32"),
            Type::F64 => f.write_str("f64"),
            Type::I8 => f.write_str("i8"),
            Type::I32 => f.write_str("i32"),
            Type::Bool => f.write_str("bool"),
            Type::Int => f.write_str("int"),
            Type::Index => f.write_str("index"),
            Type::Size => f.write_str("size"),
            Type::Stride => f.write_str("stride"),
            Type::Tensor(t) => {
                write!(f, "{}[{}]", t.elem, t.shape.iter().format(", "))?;
                if t.is_window {
                    f.write_str(" @window")?;
                }
                Ok(())
            }
            Type::Window(w) => write!(f, "window({} of {})", w.as_tensor, w.src_buf),
        }
    }
}

fn write_indent(f: &mut fmt::Formatter, indent: usize) -> fmt::Result {
    for _ in 0..indent {
        f.write_str("  ")?;
    }
    Ok(())
}

fn write_idx(f: &mut fmt::Formatter, idx: &[Expr]) -> fmt::Result {
    if !idx.is_empty() {
        write!(f, "[{}]", idx.iter().format(", "))?;
    }
    Ok(())
}

fn write_stmt(f: &mut fmt::Formatter, s: &Stmt, indent: usize) -> fmt::Result {
    write_indent(f, indent)?;
    match s {
        Stmt::Assign { name, idx, rhs, .. } => {
            write!(f, "{}", name)?;
            write_idx(f, idx)?;
            writeln!(f, " = {}", rhs)
        }
        Stmt::Reduce { name, idx, rhs, .. } => {
            write!(f, "{}", name)?;
            write_idx(f, idx)?;
            writeln!(f, " += {}", rhs)
        }
        Stmt::WriteConfig { config, field, rhs, .. } => {
            writeln!(f, "{}.{} = {}", config.name, field, rhs)
        }
        Stmt::WindowStmt { name, rhs, .. } => writeln!(f, "{} = {}", name, rhs),
        Stmt::If { cond, body, orelse, .. } => {
            writeln!(f, "if {}:", cond)?;
            for s in body {
                write_stmt(f, s, indent + 1)?;
            }
            if !orelse.is_empty() {
                write_indent(f, indent)?;
                writeln!(f, "else:")?;
                for s in orelse {
                    write_stmt(f, s, indent + 1)?;
                }
            }
            Ok(())
        }
        Stmt::Seq { iter, lo, hi, body, .. } => {
            writeln!(f, "for {} in seq({}, {}):", iter, lo, hi)?;
            for s in body {
                write_stmt(f, s, indent + 1)?;
            }
            Ok(())
        }
        Stmt::Alloc { name, ty, mem, .. } => {
            write!(f, "{} : {}", name, ty)?;
            if let Some(mem) = mem {
                write!(f, " @{}", mem.0)?;
            }
            writeln!(f)
        }
        Stmt::Free { name, .. } => writeln!(f, "free({})", name),
        Stmt::Call { proc, args, .. } => {
            writeln!(f, "{}({})", proc.name, args.iter().format(", "))
        }
        Stmt::Pass { .. } => writeln!(f, "pass"),
        Stmt::Instr { op, body, .. } => {
            writeln!(f, "instr[{}]:", op.op)?;
            write_stmt(f, body, indent + 1)
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_stmt(f, self, 0)
    }
}

impl fmt::Display for Proc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "def {}(", self.name)?;
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} : {}", a.name, a.ty)?;
        }
        writeln!(f, "):")?;
        for p in &self.preds {
            writeln!(f, "  assert {}", p)?;
        }
        for s in &self.body {
            write_stmt(f, s, 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::srcinfo::SrcInfo;
    use crate::sym::Sym;

    fn src() -> SrcInfo {
        SrcInfo::unknown()
    }

    fn rd(s: &Sym) -> Expr {
        Expr::read(s, Type::Index, &src())
    }

    fn op(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::binop(op, lhs, rhs, Type::Index, &src())
    }

    /// Test precedence handling in `pretty_expr`.
    #[test]
    fn expr_pretty_precedence() {
        let n = Sym::fresh("n");
        let k = Sym::fresh("k");

        // Mul vs Add
        assert_eq!(
            op(BinOp::Mul, op(BinOp::Add, rd(&n), rd(&k)), rd(&k)).to_string(),
            "(n + k) * k",
        );
        assert_eq!(
            op(BinOp::Add, rd(&n), op(BinOp::Mul, rd(&k), rd(&k))).to_string(),
            "n + k * k",
        );

        // Left-associativity of Sub requires right parenthesization
        assert_eq!(
            op(BinOp::Sub, rd(&n), op(BinOp::Sub, rd(&n), rd(&k))).to_string(),
            "n - (n - k)",
        );

        // Comparisons bind loosest of the arithmetic layer
        assert_eq!(
            op(BinOp::Lt, op(BinOp::Add, rd(&n), rd(&k)), rd(&n)).to_string(),
            "n + k < n",
        );
    }

    #[test]
    fn printed_form_ignores_location() {
        let n = Sym::fresh("n");
        let a = Expr::read(&n, Type::Index, &SrcInfo::new("f.py", 3, 1));
        let b = Expr::read(&n, Type::Index, &src());
        assert_eq!(a.to_string(), b.to_string());
    }
}
