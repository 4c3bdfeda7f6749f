//! Generic traversals over the IR.
//!
//! [`Visit`] is a read-only walk; [`Map`] is a rebuilding walk in which a
//! statement may expand to zero or more statements.  Both provide default
//! recursion through the free `walk_*` / `rebuild_*` functions, so an
//! implementation overrides only the cases it cares about and delegates the
//! rest.

use crate::ir::{Expr, Stmt, WAccess};
use crate::types::Type;

pub trait Visit {
    fn visit_stmts(&mut self, stmts: &[Stmt]) {
        for s in stmts {
            self.visit_stmt(s);
        }
    }

    fn visit_stmt(&mut self, s: &Stmt) {
        walk_stmt(self, s);
    }

    fn visit_expr(&mut self, e: &Expr) {
        walk_expr(self, e);
    }

    fn visit_type(&mut self, t: &Type) {
        walk_type(self, t);
    }
}

pub fn walk_stmt<V: Visit + ?Sized>(v: &mut V, s: &Stmt) {
    match s {
        Stmt::Assign { ty, idx, rhs, .. } | Stmt::Reduce { ty, idx, rhs, .. } => {
            v.visit_type(ty);
            for e in idx {
                v.visit_expr(e);
            }
            v.visit_expr(rhs);
        }
        Stmt::WriteConfig { rhs, .. } | Stmt::WindowStmt { rhs, .. } => {
            v.visit_expr(rhs);
        }
        Stmt::If { cond, body, orelse, .. } => {
            v.visit_expr(cond);
            v.visit_stmts(body);
            v.visit_stmts(orelse);
        }
        Stmt::Seq { lo, hi, body, .. } => {
            v.visit_expr(lo);
            v.visit_expr(hi);
            v.visit_stmts(body);
        }
        Stmt::Alloc { ty, .. } | Stmt::Free { ty, .. } => {
            v.visit_type(ty);
        }
        Stmt::Call { args, .. } => {
            for a in args {
                v.visit_expr(a);
            }
        }
        Stmt::Pass { .. } => {}
        Stmt::Instr { body, .. } => {
            v.visit_stmt(body);
        }
    }
}

pub fn walk_expr<V: Visit + ?Sized>(v: &mut V, e: &Expr) {
    match e {
        Expr::Read { idx, ty, .. } => {
            for i in idx {
                v.visit_expr(i);
            }
            v.visit_type(ty);
        }
        Expr::Const { .. } | Expr::Stride { .. } | Expr::ReadConfig { .. } => {}
        Expr::USub { arg, .. } => v.visit_expr(arg),
        Expr::BinOp { lhs, rhs, .. } => {
            v.visit_expr(lhs);
            v.visit_expr(rhs);
        }
        Expr::Select { cond, body, .. } => {
            v.visit_expr(cond);
            v.visit_expr(body);
        }
        Expr::Window { idx, ty, .. } => {
            for w in idx {
                match w {
                    WAccess::Point { pt, .. } => v.visit_expr(pt),
                    WAccess::Interval { lo, hi, .. } => {
                        v.visit_expr(lo);
                        v.visit_expr(hi);
                    }
                }
            }
            v.visit_type(ty);
        }
    }
}

pub fn walk_type<V: Visit + ?Sized>(v: &mut V, t: &Type) {
    match t {
        Type::Tensor(tt) => {
            for e in &tt.shape {
                v.visit_expr(e);
            }
        }
        Type::Window(wt) => {
            v.visit_type(&wt.as_tensor);
            for w in &wt.idx {
                match w {
                    WAccess::Point { pt, .. } => v.visit_expr(pt),
                    WAccess::Interval { lo, hi, .. } => {
                        v.visit_expr(lo);
                        v.visit_expr(hi);
                    }
                }
            }
        }
        _ => {}
    }
}

pub trait Map {
    fn map_stmts(&mut self, stmts: &[Stmt]) -> Vec<Stmt> {
        stmts.iter().flat_map(|s| self.map_stmt(s)).collect()
    }

    /// Map one statement to its replacements; an empty vector deletes it.
    fn map_stmt(&mut self, s: &Stmt) -> Vec<Stmt> {
        vec![rebuild_stmt(self, s)]
    }

    fn map_expr(&mut self, e: &Expr) -> Expr {
        rebuild_expr(self, e)
    }

    fn map_type(&mut self, t: &Type) -> Type {
        rebuild_type(self, t)
    }

    fn map_waccess(&mut self, w: &WAccess) -> WAccess {
        match w {
            WAccess::Point { pt, srcinfo } => WAccess::Point {
                pt: self.map_expr(pt),
                srcinfo: srcinfo.clone(),
            },
            WAccess::Interval { lo, hi, srcinfo } => WAccess::Interval {
                lo: self.map_expr(lo),
                hi: self.map_expr(hi),
                srcinfo: srcinfo.clone(),
            },
        }
    }
}

pub fn rebuild_stmt<M: Map + ?Sized>(m: &mut M, s: &Stmt) -> Stmt {
    match s {
        Stmt::Assign { name, ty, idx, rhs, srcinfo } => Stmt::Assign {
            name: name.clone(),
            ty: m.map_type(ty),
            idx: idx.iter().map(|e| m.map_expr(e)).collect(),
            rhs: m.map_expr(rhs),
            srcinfo: srcinfo.clone(),
        },
        Stmt::Reduce { name, ty, idx, rhs, srcinfo } => Stmt::Reduce {
            name: name.clone(),
            ty: m.map_type(ty),
            idx: idx.iter().map(|e| m.map_expr(e)).collect(),
            rhs: m.map_expr(rhs),
            srcinfo: srcinfo.clone(),
        },
        Stmt::WriteConfig { config, field, rhs, srcinfo } => Stmt::WriteConfig {
            config: config.clone(),
            field: field.clone(),
            rhs: m.map_expr(rhs),
            srcinfo: srcinfo.clone(),
        },
        Stmt::WindowStmt { name, rhs, srcinfo } => Stmt::WindowStmt {
            name: name.clone(),
            rhs: m.map_expr(rhs),
            srcinfo: srcinfo.clone(),
        },
        Stmt::If { cond, body, orelse, srcinfo } => Stmt::If {
            cond: m.map_expr(cond),
            body: m.map_stmts(body),
            orelse: m.map_stmts(orelse),
            srcinfo: srcinfo.clone(),
        },
        Stmt::Seq { iter, lo, hi, body, srcinfo } => Stmt::Seq {
            iter: iter.clone(),
            lo: m.map_expr(lo),
            hi: m.map_expr(hi),
            body: m.map_stmts(body),
            srcinfo: srcinfo.clone(),
        },
        Stmt::Alloc { name, ty, mem, srcinfo } => Stmt::Alloc {
            name: name.clone(),
            ty: m.map_type(ty),
            mem: mem.clone(),
            srcinfo: srcinfo.clone(),
        },
        Stmt::Free { name, ty, mem, srcinfo } => Stmt::Free {
            name: name.clone(),
            ty: m.map_type(ty),
            mem: mem.clone(),
            srcinfo: srcinfo.clone(),
        },
        Stmt::Call { proc, args, srcinfo } => Stmt::Call {
            proc: proc.clone(),
            args: args.iter().map(|e| m.map_expr(e)).collect(),
            srcinfo: srcinfo.clone(),
        },
        Stmt::Pass { srcinfo } => Stmt::Pass {
            srcinfo: srcinfo.clone(),
        },
        Stmt::Instr { op, body, srcinfo } => {
            let mapped = m.map_stmt(body);
            assert_eq!(
                mapped.len(),
                1,
                "instruction body must map to exactly one statement"
            );
            Stmt::Instr {
                op: op.clone(),
                body: Box::new(mapped.into_iter().next().unwrap()),
                srcinfo: srcinfo.clone(),
            }
        }
    }
}

pub fn rebuild_expr<M: Map + ?Sized>(m: &mut M, e: &Expr) -> Expr {
    match e {
        Expr::Read { name, idx, ty, srcinfo } => Expr::Read {
            name: name.clone(),
            idx: idx.iter().map(|i| m.map_expr(i)).collect(),
            ty: m.map_type(ty),
            srcinfo: srcinfo.clone(),
        },
        Expr::Const { .. } => e.clone(),
        Expr::USub { arg, ty, srcinfo } => Expr::USub {
            arg: Box::new(m.map_expr(arg)),
            ty: m.map_type(ty),
            srcinfo: srcinfo.clone(),
        },
        Expr::BinOp { op, lhs, rhs, ty, srcinfo } => Expr::BinOp {
            op: *op,
            lhs: Box::new(m.map_expr(lhs)),
            rhs: Box::new(m.map_expr(rhs)),
            ty: m.map_type(ty),
            srcinfo: srcinfo.clone(),
        },
        Expr::Select { cond, body, ty, srcinfo } => Expr::Select {
            cond: Box::new(m.map_expr(cond)),
            body: Box::new(m.map_expr(body)),
            ty: m.map_type(ty),
            srcinfo: srcinfo.clone(),
        },
        Expr::Window { name, idx, ty, srcinfo } => Expr::Window {
            name: name.clone(),
            idx: idx.iter().map(|w| m.map_waccess(w)).collect(),
            ty: m.map_type(ty),
            srcinfo: srcinfo.clone(),
        },
        Expr::Stride { .. } | Expr::ReadConfig { .. } => e.clone(),
    }
}

pub fn rebuild_type<M: Map + ?Sized>(m: &mut M, t: &Type) -> Type {
    match t {
        Type::Tensor(tt) => Type::Tensor(crate::types::TensorType {
            shape: tt.shape.iter().map(|e| m.map_expr(e)).collect(),
            is_window: tt.is_window,
            elem: tt.elem.clone(),
        }),
        Type::Window(wt) => Type::Window(crate::types::WindowType {
            src_type: Box::new(m.map_type(&wt.src_type)),
            as_tensor: Box::new(m.map_type(&wt.as_tensor)),
            src_buf: wt.src_buf.clone(),
            idx: wt.idx.iter().map(|w| m.map_waccess(w)).collect(),
        }),
        other => other.clone(),
    }
}
