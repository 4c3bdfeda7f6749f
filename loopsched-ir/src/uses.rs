//! Read/write/free-variable collection over statements and expressions, and
//! the syntactic idempotence predicate.

use rustc_hash::FxHashSet;

use crate::ir::{Effect, Expr, Stmt};
use crate::sym::Sym;
use crate::types::Type;
use crate::visit::{walk_expr, walk_stmt, Visit};

/// Buffers (and scalars) read by an expression, with their types.  Window
/// expressions count as reads of their source buffer.
pub fn reads_of_expr(e: &Expr) -> Vec<(Sym, Type)> {
    let mut c = ReadCollector { out: Vec::new() };
    c.visit_expr(e);
    c.out
}

/// Buffers read anywhere in a statement block: right-hand sides, indices,
/// conditions, loop bounds, and call arguments.
pub fn reads_of_stmts(stmts: &[Stmt]) -> Vec<(Sym, Type)> {
    let mut c = ReadCollector { out: Vec::new() };
    c.visit_stmts(stmts);
    c.out
}

struct ReadCollector {
    out: Vec<(Sym, Type)>,
}

impl Visit for ReadCollector {
    fn visit_expr(&mut self, e: &Expr) {
        match e {
            Expr::Read { name, ty, .. } | Expr::Window { name, ty, .. } => {
                self.out.push((name.clone(), ty.clone()));
            }
            _ => {}
        }
        walk_expr(self, e);
    }
}

/// Buffers written by a statement block: assignment and reduction targets,
/// plus call arguments whose callee effect is `Out` or `InOut`.
pub fn writes_of_stmts(stmts: &[Stmt]) -> Vec<(Sym, Type)> {
    let mut c = WriteCollector { out: Vec::new() };
    c.visit_stmts(stmts);
    c.out
}

struct WriteCollector {
    out: Vec<(Sym, Type)>,
}

impl Visit for WriteCollector {
    fn visit_stmt(&mut self, s: &Stmt) {
        match s {
            Stmt::Assign { name, ty, .. } | Stmt::Reduce { name, ty, .. } => {
                self.out.push((name.clone(), ty.clone()));
            }
            Stmt::Call { proc, args, .. } => {
                for (arg, decl) in args.iter().zip(&proc.args) {
                    if matches!(decl.effect, Some(Effect::Out) | Some(Effect::InOut)) {
                        match arg {
                            Expr::Read { name, ty, .. } | Expr::Window { name, ty, .. } => {
                                self.out.push((name.clone(), ty.clone()));
                            }
                            _ => {}
                        }
                    }
                }
            }
            _ => {}
        }
        walk_stmt(self, s);
    }
}

/// Symbols free in a statement block.  A symbol bound earlier in the block
/// (loop iterator, allocation, window binding) is not free in what follows.
pub fn free_vars_stmts(stmts: &[Stmt]) -> FxHashSet<Sym> {
    let mut c = FreeVars::default();
    c.visit_stmts(stmts);
    c.free
}

pub fn free_vars_expr(e: &Expr) -> FxHashSet<Sym> {
    let mut c = FreeVars::default();
    c.visit_expr(e);
    c.free
}

#[derive(Default)]
struct FreeVars {
    free: FxHashSet<Sym>,
    bound: FxHashSet<Sym>,
}

impl FreeVars {
    fn mention(&mut self, name: &Sym) {
        if !self.bound.contains(name) {
            self.free.insert(name.clone());
        }
    }
}

impl Visit for FreeVars {
    fn visit_stmt(&mut self, s: &Stmt) {
        match s {
            Stmt::Assign { name, .. } | Stmt::Reduce { name, .. } => self.mention(name),
            Stmt::Seq { iter, lo, hi, body, .. } => {
                // bounds are evaluated outside the iterator's scope
                self.visit_expr(lo);
                self.visit_expr(hi);
                self.bound.insert(iter.clone());
                self.visit_stmts(body);
                return;
            }
            Stmt::Alloc { name, ty, .. } => {
                self.visit_type(ty);
                self.bound.insert(name.clone());
                return;
            }
            Stmt::WindowStmt { name, rhs, .. } => {
                self.visit_expr(rhs);
                self.bound.insert(name.clone());
                return;
            }
            _ => {}
        }
        walk_stmt(self, s);
    }

    fn visit_expr(&mut self, e: &Expr) {
        match e {
            Expr::Read { name, .. } | Expr::Window { name, .. } | Expr::Stride { name, .. } => {
                self.mention(name);
            }
            _ => {}
        }
        walk_expr(self, e);
    }
}

/// Whether running the block twice is equivalent to running it once:
/// no reductions, every nested call idempotent, and both arms of every
/// conditional idempotent.
pub fn is_idempotent(stmts: &[Stmt]) -> bool {
    stmts.iter().all(|s| match s {
        Stmt::Reduce { .. } => false,
        Stmt::Call { proc, .. } => is_idempotent(&proc.body),
        Stmt::If { body, orelse, .. } => is_idempotent(body) && is_idempotent(orelse),
        Stmt::Seq { body, .. } => is_idempotent(body),
        Stmt::Instr { body, .. } => is_idempotent(std::slice::from_ref(body)),
        _ => true,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::BinOp;
    use crate::srcinfo::SrcInfo;

    fn src() -> SrcInfo {
        SrcInfo::unknown()
    }

    #[test]
    fn loop_iter_is_bound() {
        let i = Sym::fresh("i");
        let n = Sym::fresh("n");
        let x = Sym::fresh("x");
        let body = vec![Stmt::Assign {
            name: x.clone(),
            ty: Type::F32,
            idx: vec![Expr::read(&i, Type::Index, &src())],
            rhs: Expr::int(0, Type::I32, &src()),
            srcinfo: src(),
        }];
        let loop_ = vec![Stmt::Seq {
            iter: i.clone(),
            lo: Expr::int(0, Type::Index, &src()),
            hi: Expr::read(&n, Type::Size, &src()),
            body,
            srcinfo: src(),
        }];
        let fv = free_vars_stmts(&loop_);
        assert!(fv.contains(&n));
        assert!(fv.contains(&x));
        assert!(!fv.contains(&i));
    }

    #[test]
    fn reduce_is_not_idempotent() {
        let s = Sym::fresh("s");
        let red = Stmt::Reduce {
            name: s,
            ty: Type::F32,
            idx: vec![],
            rhs: Expr::int(1, Type::I32, &src()),
            srcinfo: src(),
        };
        assert!(!is_idempotent(std::slice::from_ref(&red)));
    }

    #[test]
    fn cond_idempotent_needs_both_arms() {
        let s = Sym::fresh("s");
        let assign = Stmt::Assign {
            name: s.clone(),
            ty: Type::F32,
            idx: vec![],
            rhs: Expr::int(1, Type::I32, &src()),
            srcinfo: src(),
        };
        let red = Stmt::Reduce {
            name: s.clone(),
            ty: Type::F32,
            idx: vec![],
            rhs: Expr::int(1, Type::I32, &src()),
            srcinfo: src(),
        };
        let cond = Expr::binop(
            BinOp::Lt,
            Expr::int(0, Type::Index, &src()),
            Expr::int(1, Type::Index, &src()),
            Type::Bool,
            &src(),
        );
        let good = Stmt::If {
            cond: cond.clone(),
            body: vec![assign.clone()],
            orelse: vec![assign.clone()],
            srcinfo: src(),
        };
        let bad = Stmt::If {
            cond,
            body: vec![assign],
            orelse: vec![red],
            srcinfo: src(),
        };
        assert!(is_idempotent(std::slice::from_ref(&good)));
        assert!(!is_idempotent(std::slice::from_ref(&bad)));
    }
}
