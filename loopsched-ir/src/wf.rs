//! Structural well-formedness checks.
//!
//! Verifies the invariants that can be decided without the safety oracle:
//! every symbol read is in scope, index arity matches the declared rank of
//! the target, loop bounds are index-typed, and `/`/`%` in indexing context
//! divide by a constant strictly greater than one.  Violations are reported
//! as internal diagnostics; a well-formed tree stays well-formed under every
//! directive, so a failure here is a bug, not a scheduling error.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::ir::{Expr, Proc, Stmt, WAccess};
use crate::srcinfo::SrcInfo;
use crate::sym::Sym;
use crate::types::Type;

#[derive(Clone, Debug)]
pub struct WfError {
    pub msg: String,
    pub srcinfo: SrcInfo,
}

impl fmt::Display for WfError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.srcinfo, self.msg)
    }
}

pub fn validate(proc: &Proc) -> Result<(), WfError> {
    let mut env: FxHashMap<Sym, Type> = FxHashMap::default();
    for arg in &proc.args {
        env.insert(arg.name.clone(), arg.ty.clone());
    }
    for p in &proc.preds {
        check_expr(p, &env)?;
    }
    check_stmts(&proc.body, &mut env)
}

fn err<T>(msg: String, srcinfo: &SrcInfo) -> Result<T, WfError> {
    Err(WfError {
        msg,
        srcinfo: srcinfo.clone(),
    })
}

fn check_stmts(stmts: &[Stmt], env: &mut FxHashMap<Sym, Type>) -> Result<(), WfError> {
    for s in stmts {
        check_stmt(s, env)?;
    }
    Ok(())
}

fn check_stmt(s: &Stmt, env: &mut FxHashMap<Sym, Type>) -> Result<(), WfError> {
    match s {
        Stmt::Assign { name, idx, rhs, srcinfo, .. }
        | Stmt::Reduce { name, idx, rhs, srcinfo, .. } => {
            let rank = match env.get(name) {
                Some(ty) => ty.rank(),
                None => return err(format!("write to unbound symbol {}", name), srcinfo),
            };
            if idx.len() != rank {
                return err(
                    format!(
                        "write to {} has {} indices but rank {}",
                        name,
                        idx.len(),
                        rank
                    ),
                    srcinfo,
                );
            }
            for i in idx {
                check_index_expr(i, env)?;
            }
            check_expr(rhs, env)
        }
        Stmt::WriteConfig { rhs, .. } => check_expr(rhs, env),
        Stmt::WindowStmt { name, rhs, srcinfo } => {
            if !matches!(rhs, Expr::Window { .. }) {
                return err("window binding of a non-window expression".into(), srcinfo);
            }
            check_expr(rhs, env)?;
            env.insert(name.clone(), rhs.ty().clone());
            Ok(())
        }
        Stmt::If { cond, body, orelse, srcinfo } => {
            if !cond.ty().is_bool() {
                return err("conditional guard is not boolean".into(), srcinfo);
            }
            check_expr(cond, env)?;
            check_stmts(body, &mut env.clone())?;
            check_stmts(orelse, &mut env.clone())
        }
        Stmt::Seq { iter, lo, hi, body, srcinfo } => {
            if !lo.ty().is_indexable() || !hi.ty().is_indexable() {
                return err("loop bounds must be index-typed".into(), srcinfo);
            }
            check_expr(lo, env)?;
            check_expr(hi, env)?;
            let mut inner = env.clone();
            inner.insert(iter.clone(), Type::Index);
            check_stmts(body, &mut inner)
        }
        Stmt::Alloc { name, ty, srcinfo, .. } => {
            if let Type::Tensor(t) = ty {
                if !t.elem.is_real_scalar() {
                    return err("tensor element must be scalar".into(), srcinfo);
                }
                for e in &t.shape {
                    check_expr(e, env)?;
                }
            }
            env.insert(name.clone(), ty.clone());
            Ok(())
        }
        Stmt::Free { name, srcinfo, .. } => {
            if !env.contains_key(name) {
                return err(format!("free of unbound symbol {}", name), srcinfo);
            }
            Ok(())
        }
        Stmt::Call { proc, args, srcinfo } => {
            if args.len() != proc.args.len() {
                return err(
                    format!(
                        "call to {} has {} arguments, expected {}",
                        proc.name,
                        args.len(),
                        proc.args.len()
                    ),
                    srcinfo,
                );
            }
            for a in args {
                check_expr(a, env)?;
            }
            Ok(())
        }
        Stmt::Pass { .. } => Ok(()),
        Stmt::Instr { body, .. } => check_stmt(body, env),
    }
}

fn check_expr(e: &Expr, env: &FxHashMap<Sym, Type>) -> Result<(), WfError> {
    match e {
        Expr::Read { name, idx, srcinfo, .. } => {
            let rank = match env.get(name) {
                Some(ty) => ty.rank(),
                None => return err(format!("read of unbound symbol {}", name), srcinfo),
            };
            if !idx.is_empty() && idx.len() != rank {
                return err(
                    format!(
                        "read of {} has {} indices but rank {}",
                        name,
                        idx.len(),
                        rank
                    ),
                    srcinfo,
                );
            }
            for i in idx {
                check_index_expr(i, env)?;
            }
            Ok(())
        }
        Expr::Const { .. } | Expr::ReadConfig { .. } => Ok(()),
        Expr::USub { arg, .. } => check_expr(arg, env),
        Expr::BinOp { lhs, rhs, .. } => {
            check_expr(lhs, env)?;
            check_expr(rhs, env)
        }
        Expr::Select { cond, body, .. } => {
            check_expr(cond, env)?;
            check_expr(body, env)
        }
        Expr::Window { name, idx, srcinfo, .. } => {
            let rank = match env.get(name) {
                Some(ty) => ty.rank(),
                None => return err(format!("window of unbound symbol {}", name), srcinfo),
            };
            if idx.len() != rank {
                return err(
                    format!(
                        "window of {} has {} accesses but rank {}",
                        name,
                        idx.len(),
                        rank
                    ),
                    srcinfo,
                );
            }
            for w in idx {
                match w {
                    WAccess::Point { pt, .. } => check_index_expr(pt, env)?,
                    WAccess::Interval { lo, hi, .. } => {
                        check_index_expr(lo, env)?;
                        check_index_expr(hi, env)?;
                    }
                }
            }
            Ok(())
        }
        Expr::Stride { name, srcinfo, .. } => {
            if !env.contains_key(name) {
                return err(format!("stride of unbound symbol {}", name), srcinfo);
            }
            Ok(())
        }
    }
}

/// Indexing context additionally restricts division and remainder to
/// constant divisors strictly greater than one.
fn check_index_expr(e: &Expr, env: &FxHashMap<Sym, Type>) -> Result<(), WfError> {
    if let Expr::BinOp { op, lhs, rhs, srcinfo, .. } = e {
        if matches!(op, crate::ir::BinOp::Div | crate::ir::BinOp::Mod) {
            match rhs.as_const_int() {
                Some(v) if v > 1 => {}
                _ => {
                    return err(
                        format!("{} in indexing context requires a constant divisor > 1", op.as_str()),
                        srcinfo,
                    )
                }
            }
            return check_index_expr(lhs, env);
        }
        check_index_expr(lhs, env)?;
        return check_index_expr(rhs, env);
    }
    check_expr(e, env)
}
