//! Substitution and alpha-renaming.
//!
//! Symbols are globally unique, so substitution by symbol is capture-free by
//! construction.  What requires care is *duplication*: any time a subtree is
//! copied into the tree twice (unrolling, inlining, specialization, tail
//! loops), the copy must go through [`alpha_rename`] so every binder in it
//! gets a fresh symbol.

use rustc_hash::FxHashMap;

use crate::ir::{Expr, Proc, Stmt, WAccess};
use crate::sym::Sym;
use crate::types::Type;
use crate::visit::{rebuild_expr, rebuild_stmt, rebuild_type, Map};

/// Replace reads of the keys of `env` by the mapped expressions.
///
/// A scalar read of a key is replaced wholesale.  An indexed read, write, or
/// window of a key is only legal when the mapped expression is itself a bare
/// buffer read, in which case the buffer is renamed in place; anything else
/// is an internal inconsistency.
pub fn substitute(stmts: &[Stmt], env: &FxHashMap<Sym, Expr>) -> Vec<Stmt> {
    let mut subst = Subst { env };
    subst.map_stmts(stmts)
}

pub fn substitute_expr(e: &Expr, env: &FxHashMap<Sym, Expr>) -> Expr {
    let mut subst = Subst { env };
    subst.map_expr(e)
}

struct Subst<'a> {
    env: &'a FxHashMap<Sym, Expr>,
}

impl<'a> Subst<'a> {
    /// The renaming for a bound buffer occurrence (write target, window
    /// source), when the environment maps it to another bare buffer.
    fn renamed(&self, name: &Sym) -> Option<Sym> {
        match self.env.get(name) {
            None => None,
            Some(Expr::Read { name: new, idx, .. }) if idx.is_empty() => Some(new.clone()),
            Some(other) => panic!(
                "cannot substitute buffer {:?} with non-buffer expression {:?}",
                name, other
            ),
        }
    }
}

impl<'a> Map for Subst<'a> {
    fn map_stmt(&mut self, s: &Stmt) -> Vec<Stmt> {
        match s {
            Stmt::Assign { name, .. } | Stmt::Reduce { name, .. } => {
                let mut new = rebuild_stmt(self, s);
                if let Some(renamed) = self.renamed(name) {
                    match &mut new {
                        Stmt::Assign { name, .. } | Stmt::Reduce { name, .. } => *name = renamed,
                        _ => unreachable!(),
                    }
                }
                vec![new]
            }
            _ => vec![rebuild_stmt(self, s)],
        }
    }

    fn map_expr(&mut self, e: &Expr) -> Expr {
        match e {
            Expr::Read { name, idx, ty, srcinfo } => {
                if let Some(repl) = self.env.get(name) {
                    if idx.is_empty() {
                        return repl.clone();
                    }
                    let renamed = self.renamed(name).unwrap();
                    return Expr::Read {
                        name: renamed,
                        idx: idx.iter().map(|i| self.map_expr(i)).collect(),
                        ty: self.map_type(ty),
                        srcinfo: srcinfo.clone(),
                    };
                }
                rebuild_expr(self, e)
            }
            Expr::Window { name, idx, ty, srcinfo } => {
                let name = self.renamed(name).unwrap_or_else(|| name.clone());
                Expr::Window {
                    name,
                    idx: idx.iter().map(|w| self.map_waccess(w)).collect(),
                    ty: self.map_type(ty),
                    srcinfo: srcinfo.clone(),
                }
            }
            Expr::Stride { name, dim, ty, srcinfo } => {
                let name = self.renamed(name).unwrap_or_else(|| name.clone());
                Expr::Stride {
                    name,
                    dim: *dim,
                    ty: ty.clone(),
                    srcinfo: srcinfo.clone(),
                }
            }
            _ => rebuild_expr(self, e),
        }
    }

    fn map_type(&mut self, t: &Type) -> Type {
        let mut new = rebuild_type(self, t);
        if let Type::Window(wt) = &mut new {
            if let Some(renamed) = self.renamed(&wt.src_buf) {
                wt.src_buf = renamed;
            }
        }
        new
    }
}

/// Copy a statement block, giving every binder in it a fresh symbol and
/// updating all inner readers by lookup.
pub fn alpha_rename(stmts: &[Stmt]) -> Vec<Stmt> {
    let mut ren = AlphaRename {
        env: FxHashMap::default(),
    };
    ren.map_stmts(stmts)
}

struct AlphaRename {
    env: FxHashMap<Sym, Sym>,
}

impl AlphaRename {
    fn rename(&self, name: &Sym) -> Sym {
        self.env.get(name).cloned().unwrap_or_else(|| name.clone())
    }

    fn bind(&mut self, name: &Sym) -> Sym {
        let fresh = name.copy();
        self.env.insert(name.clone(), fresh.clone());
        fresh
    }
}

impl Map for AlphaRename {
    fn map_stmt(&mut self, s: &Stmt) -> Vec<Stmt> {
        match s {
            Stmt::Seq { iter, lo, hi, body, srcinfo } => {
                let lo = self.map_expr(lo);
                let hi = self.map_expr(hi);
                let iter = self.bind(iter);
                vec![Stmt::Seq {
                    iter,
                    lo,
                    hi,
                    body: self.map_stmts(body),
                    srcinfo: srcinfo.clone(),
                }]
            }
            Stmt::Alloc { name, ty, mem, srcinfo } => {
                let ty = self.map_type(ty);
                vec![Stmt::Alloc {
                    name: self.bind(name),
                    ty,
                    mem: mem.clone(),
                    srcinfo: srcinfo.clone(),
                }]
            }
            Stmt::Free { name, ty, mem, srcinfo } => vec![Stmt::Free {
                name: self.rename(name),
                ty: self.map_type(ty),
                mem: mem.clone(),
                srcinfo: srcinfo.clone(),
            }],
            Stmt::WindowStmt { name, rhs, srcinfo } => {
                let rhs = self.map_expr(rhs);
                vec![Stmt::WindowStmt {
                    name: self.bind(name),
                    rhs,
                    srcinfo: srcinfo.clone(),
                }]
            }
            Stmt::Assign { name, ty, idx, rhs, srcinfo } => vec![Stmt::Assign {
                name: self.rename(name),
                ty: self.map_type(ty),
                idx: idx.iter().map(|i| self.map_expr(i)).collect(),
                rhs: self.map_expr(rhs),
                srcinfo: srcinfo.clone(),
            }],
            Stmt::Reduce { name, ty, idx, rhs, srcinfo } => vec![Stmt::Reduce {
                name: self.rename(name),
                ty: self.map_type(ty),
                idx: idx.iter().map(|i| self.map_expr(i)).collect(),
                rhs: self.map_expr(rhs),
                srcinfo: srcinfo.clone(),
            }],
            _ => vec![rebuild_stmt(self, s)],
        }
    }

    fn map_expr(&mut self, e: &Expr) -> Expr {
        match e {
            Expr::Read { name, idx, ty, srcinfo } => Expr::Read {
                name: self.rename(name),
                idx: idx.iter().map(|i| self.map_expr(i)).collect(),
                ty: self.map_type(ty),
                srcinfo: srcinfo.clone(),
            },
            Expr::Window { name, idx, ty, srcinfo } => Expr::Window {
                name: self.rename(name),
                idx: idx.iter().map(|w| self.map_waccess(w)).collect(),
                ty: self.map_type(ty),
                srcinfo: srcinfo.clone(),
            },
            Expr::Stride { name, dim, ty, srcinfo } => Expr::Stride {
                name: self.rename(name),
                dim: *dim,
                ty: ty.clone(),
                srcinfo: srcinfo.clone(),
            },
            _ => rebuild_expr(self, e),
        }
    }

    fn map_type(&mut self, t: &Type) -> Type {
        let mut new = rebuild_type(self, t);
        if let Type::Window(wt) = &mut new {
            wt.src_buf = self.rename(&wt.src_buf);
        }
        new
    }
}

/// Structural equality of two procedures up to a bijection between their
/// binders.  Preconditions, argument types, and bodies must all correspond.
pub fn alpha_eq_procs(a: &Proc, b: &Proc) -> bool {
    if a.args.len() != b.args.len() || a.preds.len() != b.preds.len() {
        return false;
    }
    let mut env = FxHashMap::default();
    for (x, y) in a.args.iter().zip(&b.args) {
        if x.effect != y.effect || x.mem != y.mem {
            return false;
        }
        env.insert(x.name.clone(), y.name.clone());
    }
    // Argument types may mention earlier size arguments.
    for (x, y) in a.args.iter().zip(&b.args) {
        if !alpha_eq_type(&x.ty, &y.ty, &env) {
            return false;
        }
    }
    a.preds
        .iter()
        .zip(&b.preds)
        .all(|(x, y)| alpha_eq_expr(x, y, &env))
        && alpha_eq_stmts(&a.body, &b.body, &mut env)
}

pub fn alpha_eq_stmts(a: &[Stmt], b: &[Stmt], env: &mut FxHashMap<Sym, Sym>) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).all(|(x, y)| alpha_eq_stmt(x, y, env))
}

fn alpha_eq_stmt(a: &Stmt, b: &Stmt, env: &mut FxHashMap<Sym, Sym>) -> bool {
    match (a, b) {
        (
            Stmt::Assign { name: n1, idx: i1, rhs: r1, .. },
            Stmt::Assign { name: n2, idx: i2, rhs: r2, .. },
        )
        | (
            Stmt::Reduce { name: n1, idx: i1, rhs: r1, .. },
            Stmt::Reduce { name: n2, idx: i2, rhs: r2, .. },
        ) => {
            sym_eq(n1, n2, env)
                && i1.len() == i2.len()
                && i1.iter().zip(i2).all(|(x, y)| alpha_eq_expr(x, y, env))
                && alpha_eq_expr(r1, r2, env)
        }
        (
            Stmt::WriteConfig { config: c1, field: f1, rhs: r1, .. },
            Stmt::WriteConfig { config: c2, field: f2, rhs: r2, .. },
        ) => c1.name == c2.name && f1 == f2 && alpha_eq_expr(r1, r2, env),
        (Stmt::WindowStmt { name: n1, rhs: r1, .. }, Stmt::WindowStmt { name: n2, rhs: r2, .. }) => {
            let ok = alpha_eq_expr(r1, r2, env);
            env.insert(n1.clone(), n2.clone());
            ok
        }
        (
            Stmt::If { cond: c1, body: b1, orelse: o1, .. },
            Stmt::If { cond: c2, body: b2, orelse: o2, .. },
        ) => {
            alpha_eq_expr(c1, c2, env)
                && alpha_eq_stmts(b1, b2, env)
                && alpha_eq_stmts(o1, o2, env)
        }
        (
            Stmt::Seq { iter: it1, lo: l1, hi: h1, body: b1, .. },
            Stmt::Seq { iter: it2, lo: l2, hi: h2, body: b2, .. },
        ) => {
            if !alpha_eq_expr(l1, l2, env) || !alpha_eq_expr(h1, h2, env) {
                return false;
            }
            env.insert(it1.clone(), it2.clone());
            alpha_eq_stmts(b1, b2, env)
        }
        (Stmt::Alloc { name: n1, ty: t1, mem: m1, .. }, Stmt::Alloc { name: n2, ty: t2, mem: m2, .. }) => {
            if m1 != m2 || !alpha_eq_type(t1, t2, env) {
                return false;
            }
            env.insert(n1.clone(), n2.clone());
            true
        }
        (Stmt::Free { name: n1, .. }, Stmt::Free { name: n2, .. }) => sym_eq(n1, n2, env),
        (Stmt::Call { proc: p1, args: a1, .. }, Stmt::Call { proc: p2, args: a2, .. }) => {
            p1.name == p2.name
                && a1.len() == a2.len()
                && a1.iter().zip(a2).all(|(x, y)| alpha_eq_expr(x, y, env))
        }
        (Stmt::Pass { .. }, Stmt::Pass { .. }) => true,
        (Stmt::Instr { op: o1, body: b1, .. }, Stmt::Instr { op: o2, body: b2, .. }) => {
            o1 == o2 && alpha_eq_stmt(b1, b2, env)
        }
        _ => false,
    }
}

fn sym_eq(a: &Sym, b: &Sym, env: &FxHashMap<Sym, Sym>) -> bool {
    match env.get(a) {
        Some(mapped) => mapped == b,
        None => a == b,
    }
}

pub fn alpha_eq_expr(a: &Expr, b: &Expr, env: &FxHashMap<Sym, Sym>) -> bool {
    match (a, b) {
        (Expr::Read { name: n1, idx: i1, .. }, Expr::Read { name: n2, idx: i2, .. }) => {
            sym_eq(n1, n2, env)
                && i1.len() == i2.len()
                && i1.iter().zip(i2).all(|(x, y)| alpha_eq_expr(x, y, env))
        }
        (Expr::Const { val: v1, .. }, Expr::Const { val: v2, .. }) => v1 == v2,
        (Expr::USub { arg: a1, .. }, Expr::USub { arg: a2, .. }) => alpha_eq_expr(a1, a2, env),
        (
            Expr::BinOp { op: op1, lhs: l1, rhs: r1, .. },
            Expr::BinOp { op: op2, lhs: l2, rhs: r2, .. },
        ) => op1 == op2 && alpha_eq_expr(l1, l2, env) && alpha_eq_expr(r1, r2, env),
        (
            Expr::Select { cond: c1, body: b1, .. },
            Expr::Select { cond: c2, body: b2, .. },
        ) => alpha_eq_expr(c1, c2, env) && alpha_eq_expr(b1, b2, env),
        (Expr::Window { name: n1, idx: i1, .. }, Expr::Window { name: n2, idx: i2, .. }) => {
            sym_eq(n1, n2, env)
                && i1.len() == i2.len()
                && i1.iter().zip(i2).all(|(x, y)| match (x, y) {
                    (WAccess::Point { pt: p1, .. }, WAccess::Point { pt: p2, .. }) => {
                        alpha_eq_expr(p1, p2, env)
                    }
                    (
                        WAccess::Interval { lo: l1, hi: h1, .. },
                        WAccess::Interval { lo: l2, hi: h2, .. },
                    ) => alpha_eq_expr(l1, l2, env) && alpha_eq_expr(h1, h2, env),
                    _ => false,
                })
        }
        (Expr::Stride { name: n1, dim: d1, .. }, Expr::Stride { name: n2, dim: d2, .. }) => {
            sym_eq(n1, n2, env) && d1 == d2
        }
        (
            Expr::ReadConfig { config: c1, field: f1, .. },
            Expr::ReadConfig { config: c2, field: f2, .. },
        ) => c1.name == c2.name && f1 == f2,
        _ => false,
    }
}

fn alpha_eq_type(a: &Type, b: &Type, env: &FxHashMap<Sym, Sym>) -> bool {
    match (a, b) {
        (Type::Tensor(t1), Type::Tensor(t2)) => {
            t1.is_window == t2.is_window
                && t1.elem == t2.elem
                && t1.shape.len() == t2.shape.len()
                && t1
                    .shape
                    .iter()
                    .zip(&t2.shape)
                    .all(|(x, y)| alpha_eq_expr(x, y, env))
        }
        (Type::Window(w1), Type::Window(w2)) => {
            sym_eq(&w1.src_buf, &w2.src_buf, env)
                && alpha_eq_type(&w1.as_tensor, &w2.as_tensor, env)
        }
        _ => a == b,
    }
}
