//! The algebraic simplifier.
//!
//! Runs index normalization as a prelude, then applies: constant folding
//! across all numeric and boolean operators; the unit/zero identities
//! (`x+0`, `x·1`, `x·0`, `x/1`, `x%1`); recognition of `N%K + K·(N/K) ↦ N`;
//! propagation of equality facts from the condition of an `If` into its then
//! branch (with the derived fact `e%M == e` when the condition is
//! `e/M == 0`); elimination of constant-condition branches; and deletion of
//! loops that cannot run (`lo == hi`) or whose body simplified away.
//!
//! The pass is built from composed cursor edits, so cursors obtained before
//! simplification forward through it.  Simplification is idempotent: a
//! second run finds nothing to rewrite.

use std::rc::Rc;

use log::debug;
use rustc_hash::FxHashMap;

use loopsched_ir::ir::{BinOp, Expr, Lit, Proc, Stmt, WAccess};
use loopsched_ir::types::Type;

use crate::cursor::{Cursor, Field, Forward, NodeValue, Path, Step};
use crate::error::Result;
use crate::normalize::normalize;

pub fn simplify(root: &Rc<Proc>) -> Result<(Rc<Proc>, Forward)> {
    let (ir, fwd) = normalize(root)?;
    let orig = ir.clone();
    let mut s = Simplifier {
        orig: orig.clone(),
        ir,
        fwd: Forward::identity(&orig),
        facts: vec![FxHashMap::default()],
    };

    for (i, p) in orig.preds.iter().enumerate() {
        let new = s.map_expr(p);
        if new != *p || new.to_string() != p.to_string() {
            let mut path = Path::new();
            path.push(Step { field: Field::Preds, idx: i as u32 });
            s.replace_expr(&path, new)?;
        }
    }

    let mut path = Path::new();
    s.walk_stmts(&orig.body.clone(), &mut path, Field::Body)?;

    debug!("simplify: done");
    let Simplifier { ir, fwd: fwd2, .. } = s;
    Ok((ir, fwd.then(fwd2)))
}

struct Simplifier {
    /// The normalized tree the walk reads from; edits are addressed by its
    /// paths and transported through `fwd`.
    orig: Rc<Proc>,
    ir: Rc<Proc>,
    fwd: Forward,
    facts: Vec<FxHashMap<String, Expr>>,
}

impl Simplifier {
    fn cursor(&self, path: &Path) -> Cursor {
        Cursor::from_path(&self.orig, path.clone())
    }

    fn replace_expr(&mut self, path: &Path, e: Expr) -> Result<()> {
        let c = self.fwd.fwd(&self.cursor(path))?;
        let (ir, f) = c.replace(NodeValue::Expr(e))?;
        self.ir = ir;
        self.fwd = std::mem::replace(&mut self.fwd, Forward::identity(&self.orig)).then(f);
        Ok(())
    }

    fn replace_ty(&mut self, path: &Path, ty: Type) -> Result<()> {
        let c = self.fwd.fwd(&self.cursor(path))?;
        let (ir, f) = c.replace(NodeValue::Ty(ty))?;
        self.ir = ir;
        self.fwd = std::mem::replace(&mut self.fwd, Forward::identity(&self.orig)).then(f);
        Ok(())
    }

    fn compose(&mut self, ir: Rc<Proc>, f: Forward) {
        self.ir = ir;
        self.fwd = std::mem::replace(&mut self.fwd, Forward::identity(&self.orig)).then(f);
    }

    // -- facts --------------------------------------------------------------

    fn push_facts(&mut self) {
        self.facts.push(FxHashMap::default());
    }

    fn pop_facts(&mut self) {
        self.facts.pop();
    }

    fn known_constant(&self, e: &Expr) -> Option<Expr> {
        let key = e.to_string();
        self.facts.iter().rev().find_map(|m| m.get(&key).cloned())
    }

    /// Learn from a branch condition.  `e == c` makes `e` rewrite to `c`
    /// inside the branch; `e/M == 0` additionally teaches `e%M == e`.
    fn add_fact(&mut self, cond: &Expr) {
        let (expr, konst) = match cond {
            Expr::BinOp { op: BinOp::Eq, lhs, rhs, .. } => match (&**lhs, &**rhs) {
                (e, c @ Expr::Const { .. }) => (e.clone(), c.clone()),
                (c @ Expr::Const { .. }, e) => (e.clone(), c.clone()),
                _ => return,
            },
            _ => return,
        };
        self.facts
            .last_mut()
            .unwrap()
            .insert(expr.to_string(), konst.clone());

        if let Expr::BinOp { op: BinOp::Div, lhs, rhs, ty, srcinfo } = &expr {
            if konst.as_const_int() == Some(0) {
                let modexpr = Expr::BinOp {
                    op: BinOp::Mod,
                    lhs: lhs.clone(),
                    rhs: rhs.clone(),
                    ty: ty.clone(),
                    srcinfo: srcinfo.clone(),
                };
                self.facts
                    .last_mut()
                    .unwrap()
                    .insert(modexpr.to_string(), (**lhs).clone());
            }
        }
    }

    // -- expression simplification ------------------------------------------

    fn cfold(&self, op: BinOp, l: &Expr, r: &Expr) -> Option<Expr> {
        let (lv, rv) = match (l, r) {
            (Expr::Const { val: a, .. }, Expr::Const { val: b, .. }) => (a.clone(), b.clone()),
            _ => return None,
        };
        let srcinfo = l.srcinfo();
        let ty = l.ty().clone();
        let val = match (lv, rv) {
            (Lit::Int(a), Lit::Int(b)) => match op {
                BinOp::Add => Lit::Int(a.checked_add(b)?),
                BinOp::Sub => Lit::Int(a.checked_sub(b)?),
                BinOp::Mul => Lit::Int(a.checked_mul(b)?),
                BinOp::Div => {
                    if b == 0 {
                        return None;
                    }
                    Lit::Int(a.div_euclid(b))
                }
                BinOp::Mod => {
                    if b == 0 {
                        return None;
                    }
                    Lit::Int(a.rem_euclid(b))
                }
                BinOp::Lt => Lit::Bool(a < b),
                BinOp::Gt => Lit::Bool(a > b),
                BinOp::Le => Lit::Bool(a <= b),
                BinOp::Ge => Lit::Bool(a >= b),
                BinOp::Eq => Lit::Bool(a == b),
                BinOp::And | BinOp::Or => return None,
            },
            (Lit::Float(a), Lit::Float(b)) => match op {
                BinOp::Add => Lit::Float(a + b),
                BinOp::Sub => Lit::Float(a - b),
                BinOp::Mul => Lit::Float(a * b),
                BinOp::Div => Lit::Float(a / b),
                BinOp::Lt => Lit::Bool(a < b),
                BinOp::Gt => Lit::Bool(a > b),
                BinOp::Le => Lit::Bool(a <= b),
                BinOp::Ge => Lit::Bool(a >= b),
                BinOp::Eq => Lit::Bool(a == b),
                _ => return None,
            },
            (Lit::Bool(a), Lit::Bool(b)) => match op {
                BinOp::And => Lit::Bool(a && b),
                BinOp::Or => Lit::Bool(a || b),
                BinOp::Eq => Lit::Bool(a == b),
                _ => return None,
            },
            _ => return None,
        };
        let ty = match val {
            Lit::Bool(_) => Type::Bool,
            _ => ty,
        };
        Some(Expr::Const {
            val,
            ty,
            srcinfo: srcinfo.clone(),
        })
    }

    /// Recognize `N%K + K·(N/K)` (up to commutativity) and return `N`.
    fn quotient_remainder(&self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Option<Expr> {
        if op != BinOp::Add {
            return None;
        }
        let (rem, quot) = if matches!(lhs, Expr::BinOp { op: BinOp::Mod, .. }) {
            (lhs, rhs)
        } else if matches!(rhs, Expr::BinOp { op: BinOp::Mod, .. }) {
            (rhs, lhs)
        } else {
            return None;
        };
        let (num, modulus) = match rem {
            Expr::BinOp { op: BinOp::Mod, lhs, rhs, .. } => (&**lhs, &**rhs),
            _ => return None,
        };
        let (qa, qb) = match quot {
            Expr::BinOp { op: BinOp::Mul, lhs, rhs, .. } => (&**lhs, &**rhs),
            _ => return None,
        };
        let check = |konst: &Expr, div: &Expr| -> bool {
            matches!(konst, Expr::Const { .. })
                && konst.to_string() == modulus.to_string()
                && matches!(div, Expr::BinOp { op: BinOp::Div, .. })
                && match div {
                    Expr::BinOp { lhs, rhs, .. } => {
                        lhs.to_string() == num.to_string()
                            && rhs.to_string() == modulus.to_string()
                    }
                    _ => false,
                }
        };
        if check(qa, qb) || check(qb, qa) {
            Some(num.clone())
        } else {
            None
        }
    }

    fn map_binop(&self, e: &Expr) -> Expr {
        let (op, lhs0, rhs0, ty, srcinfo) = match e {
            Expr::BinOp { op, lhs, rhs, ty, srcinfo } => (*op, lhs, rhs, ty, srcinfo),
            _ => unreachable!(),
        };
        let lhs = self.map_expr(lhs0);
        let rhs = self.map_expr(rhs0);

        if let Some(folded) = self.cfold(op, &lhs, &rhs) {
            return folded;
        }

        match op {
            BinOp::Add => {
                if lhs.is_const_zero() {
                    return rhs;
                }
                if rhs.is_const_zero() {
                    return lhs;
                }
                if let Some(n) = self.quotient_remainder(op, &lhs, &rhs) {
                    return n;
                }
            }
            BinOp::Sub => {
                if rhs.is_const_zero() {
                    return lhs;
                }
                // (a + b) - b  ->  a ;  (a + b) - a  ->  b
                if let Expr::BinOp { op: BinOp::Add, lhs: a, rhs: b, .. } = &lhs {
                    if a.to_string() == rhs.to_string() {
                        return (**b).clone();
                    }
                    if b.to_string() == rhs.to_string() {
                        return (**a).clone();
                    }
                }
            }
            BinOp::Mul => {
                if lhs.is_const_zero() || rhs.is_const_zero() {
                    return Expr::int(0, lhs.ty().clone(), srcinfo);
                }
                if lhs.as_const_int() == Some(1) {
                    return rhs;
                }
                if rhs.as_const_int() == Some(1) {
                    return lhs;
                }
            }
            BinOp::Div => {
                if rhs.as_const_int() == Some(1) {
                    return lhs;
                }
            }
            BinOp::Mod => {
                if rhs.as_const_int() == Some(1) {
                    return Expr::int(0, lhs.ty().clone(), srcinfo);
                }
            }
            _ => {}
        }

        Expr::BinOp {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            ty: ty.clone(),
            srcinfo: srcinfo.clone(),
        }
    }

    fn map_expr(&self, e: &Expr) -> Expr {
        if let Some(konst) = self.known_constant(e) {
            return konst;
        }
        let out = match e {
            Expr::BinOp { .. } => self.map_binop(e),
            Expr::USub { arg, ty, srcinfo } => {
                let arg = self.map_expr(arg);
                match &arg {
                    Expr::Const { val: Lit::Int(v), ty, srcinfo } => Expr::Const {
                        val: Lit::Int(-v),
                        ty: ty.clone(),
                        srcinfo: srcinfo.clone(),
                    },
                    _ => Expr::USub {
                        arg: Box::new(arg),
                        ty: ty.clone(),
                        srcinfo: srcinfo.clone(),
                    },
                }
            }
            Expr::Select { cond, body, ty, srcinfo } => Expr::Select {
                cond: Box::new(self.map_expr(cond)),
                body: Box::new(self.map_expr(body)),
                ty: ty.clone(),
                srcinfo: srcinfo.clone(),
            },
            Expr::Read { name, idx, ty, srcinfo } => Expr::Read {
                name: name.clone(),
                idx: idx.iter().map(|i| self.map_expr(i)).collect(),
                ty: ty.clone(),
                srcinfo: srcinfo.clone(),
            },
            Expr::Window { name, idx, ty, srcinfo } => Expr::Window {
                name: name.clone(),
                idx: idx
                    .iter()
                    .map(|w| match w {
                        WAccess::Point { pt, srcinfo } => WAccess::Point {
                            pt: self.map_expr(pt),
                            srcinfo: srcinfo.clone(),
                        },
                        WAccess::Interval { lo, hi, srcinfo } => WAccess::Interval {
                            lo: self.map_expr(lo),
                            hi: self.map_expr(hi),
                            srcinfo: srcinfo.clone(),
                        },
                    })
                    .collect(),
                ty: ty.clone(),
                srcinfo: srcinfo.clone(),
            },
            other => other.clone(),
        };
        if let Some(konst) = self.known_constant(&out) {
            return konst;
        }
        out
    }

    fn changed(old: &Expr, new: &Expr) -> bool {
        new != old || new.to_string() != old.to_string()
    }

    // -- statement walk -----------------------------------------------------

    fn walk_stmts(&mut self, stmts: &[Stmt], path: &mut Path, field: Field) -> Result<()> {
        for (i, s) in stmts.iter().enumerate() {
            path.push(Step { field, idx: i as u32 });
            self.walk_stmt(s, path)?;
            path.pop();
        }
        Ok(())
    }

    fn expr_at(&mut self, path: &Path, field: Field, idx: usize, e: &Expr) -> Result<()> {
        let new = self.map_expr(e);
        if Self::changed(e, &new) {
            let mut p = path.clone();
            p.push(Step { field, idx: idx as u32 });
            self.replace_expr(&p, new)?;
        }
        Ok(())
    }

    fn walk_stmt(&mut self, s: &Stmt, path: &mut Path) -> Result<()> {
        match s {
            Stmt::If { cond, body, orelse, .. } => {
                let new_cond = self.map_expr(cond);

                if let Expr::Const { val: Lit::Bool(b), .. } = new_cond {
                    // Constant condition: splice the live arm in front of
                    // the `if`, drop the `if`, then keep simplifying the
                    // spliced statements through the forwarder.
                    let c = self.fwd.fwd(&self.cursor(path))?;
                    let arm = if b { c.body()? } else { c.orelse()? };
                    if !arm.is_empty() {
                        let gap = c.before()?;
                        let (ir, f) = arm.move_to(&gap)?;
                        self.compose(ir, f);
                    }
                    let c = self.fwd.fwd(&self.cursor(path))?;
                    let (ir, f) = c.delete()?;
                    self.compose(ir, f);
                    let (arm_stmts, arm_field) =
                        if b { (body, Field::Body) } else { (orelse, Field::Orelse) };
                    self.walk_stmts(arm_stmts, path, arm_field)?;
                    return Ok(());
                }

                self.push_facts();
                self.add_fact(&new_cond);
                self.walk_stmts(body, path, Field::Body)?;
                self.pop_facts();

                self.push_facts();
                // TODO: learn the negated condition for the else branch
                self.walk_stmts(orelse, path, Field::Orelse)?;
                self.pop_facts();

                if Self::changed(cond, &new_cond) {
                    let mut p = path.clone();
                    p.push(Step { field: Field::Cond, idx: 0 });
                    self.replace_expr(&p, new_cond)?;
                }
            }
            Stmt::Seq { lo, hi, body, .. } => {
                let new_lo = self.map_expr(lo);
                let new_hi = self.map_expr(hi);

                // A loop that cannot run is dropped whole.
                if let (Some(l), Some(h)) = (new_lo.as_const_int(), new_hi.as_const_int()) {
                    if l == h {
                        let c = self.fwd.fwd(&self.cursor(path))?;
                        let (ir, f) = c.delete()?;
                        self.compose(ir, f);
                        return Ok(());
                    }
                }

                self.walk_stmts(body, path, Field::Body)?;

                // The body may have simplified away entirely.
                let was_vacuous = body.iter().all(|s| s.is_pass());
                let c = self.fwd.fwd(&self.cursor(path))?;
                let now_vacuous = match c.stmt()? {
                    Stmt::Seq { body, .. } => body.iter().all(|s| s.is_pass()),
                    _ => false,
                };
                if now_vacuous && !was_vacuous {
                    let (ir, f) = c.delete()?;
                    self.compose(ir, f);
                    return Ok(());
                }

                if Self::changed(lo, &new_lo) {
                    let mut p = path.clone();
                    p.push(Step { field: Field::Lo, idx: 0 });
                    self.replace_expr(&p, new_lo)?;
                }
                if Self::changed(hi, &new_hi) {
                    let mut p = path.clone();
                    p.push(Step { field: Field::Hi, idx: 0 });
                    self.replace_expr(&p, new_hi)?;
                }
            }
            Stmt::Assign { idx, rhs, .. } | Stmt::Reduce { idx, rhs, .. } => {
                for (i, e) in idx.iter().enumerate() {
                    self.expr_at(path, Field::Idx, i, e)?;
                }
                self.expr_at(path, Field::Rhs, 0, rhs)?;
            }
            Stmt::WriteConfig { rhs, .. } | Stmt::WindowStmt { rhs, .. } => {
                self.expr_at(path, Field::Rhs, 0, rhs)?;
            }
            Stmt::Call { args, .. } => {
                for (i, a) in args.iter().enumerate() {
                    self.expr_at(path, Field::Args, i, a)?;
                }
            }
            Stmt::Alloc { ty, .. } => {
                if let Type::Tensor(t) = ty {
                    let mut t2 = t.clone();
                    t2.shape = t.shape.iter().map(|e| self.map_expr(e)).collect();
                    let new = Type::Tensor(t2);
                    if new != *ty {
                        let mut p = path.clone();
                        p.push(Step { field: Field::Ty, idx: 0 });
                        self.replace_ty(&p, new)?;
                    }
                }
            }
            Stmt::Instr { body, .. } => {
                path.push(Step { field: Field::Body, idx: 0 });
                self.walk_stmt(body, path)?;
                path.pop();
            }
            Stmt::Free { .. } | Stmt::Pass { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use loopsched_ir::SrcInfo;
    use loopsched_ir::Sym;

    fn src() -> SrcInfo {
        SrcInfo::unknown()
    }

    fn proc_with_body(body: Vec<Stmt>) -> Rc<Proc> {
        Rc::new(Proc {
            name: "p".into(),
            args: vec![],
            preds: vec![],
            body,
            instr: None,
            srcinfo: src(),
        })
    }

    #[test]
    fn drops_zero_trip_loop() {
        let i = Sym::fresh("i");
        let x = Sym::fresh("x");
        let root = proc_with_body(vec![
            Stmt::Alloc {
                name: x.clone(),
                ty: Type::F32,
                mem: None,
                srcinfo: src(),
            },
            Stmt::Seq {
                iter: i.clone(),
                lo: Expr::int(2, Type::Index, &src()),
                hi: Expr::int(2, Type::Index, &src()),
                body: vec![Stmt::Assign {
                    name: x.clone(),
                    ty: Type::F32,
                    idx: vec![],
                    rhs: Expr::int(0, Type::I32, &src()),
                    srcinfo: src(),
                }],
                srcinfo: src(),
            },
        ]);
        let (out, _) = simplify(&root).unwrap();
        assert_eq!(out.body.len(), 1);
        assert!(matches!(out.body[0], Stmt::Alloc { .. }));
    }

    #[test]
    fn constant_branch_is_spliced() {
        let x = Sym::fresh("x");
        let assign = Stmt::Assign {
            name: x.clone(),
            ty: Type::F32,
            idx: vec![],
            rhs: Expr::int(1, Type::I32, &src()),
            srcinfo: src(),
        };
        let root = proc_with_body(vec![
            Stmt::Alloc {
                name: x.clone(),
                ty: Type::F32,
                mem: None,
                srcinfo: src(),
            },
            Stmt::If {
                cond: Expr::binop(
                    BinOp::Lt,
                    Expr::int(0, Type::Int, &src()),
                    Expr::int(1, Type::Int, &src()),
                    Type::Bool,
                    &src(),
                ),
                body: vec![assign],
                orelse: vec![],
                srcinfo: src(),
            },
        ]);
        let (out, _) = simplify(&root).unwrap();
        assert_eq!(out.body.len(), 2);
        assert!(matches!(out.body[1], Stmt::Assign { .. }));
    }

    #[test]
    fn simplify_is_idempotent() {
        let x = Sym::fresh("x");
        let i = Sym::fresh("i");
        let n = Sym::fresh("n");
        let ix = Expr::binop(
            BinOp::Add,
            Expr::binop(
                BinOp::Mul,
                Expr::int(1, Type::Int, &src()),
                Expr::read(&i, Type::Index, &src()),
                Type::Index,
                &src(),
            ),
            Expr::int(0, Type::Int, &src()),
            Type::Index,
            &src(),
        );
        let root = proc_with_body(vec![
            Stmt::Alloc {
                name: x.clone(),
                ty: Type::tensor(
                    vec![Expr::read(&n, Type::Size, &src())],
                    false,
                    Type::F32,
                ),
                mem: None,
                srcinfo: src(),
            },
            Stmt::Seq {
                iter: i.clone(),
                lo: Expr::int(0, Type::Index, &src()),
                hi: Expr::read(&n, Type::Size, &src()),
                body: vec![Stmt::Assign {
                    name: x.clone(),
                    ty: Type::F32,
                    idx: vec![ix],
                    rhs: Expr::int(0, Type::I32, &src()),
                    srcinfo: src(),
                }],
                srcinfo: src(),
            },
        ]);
        let (once, _) = simplify(&root).unwrap();
        let (twice, _) = simplify(&once).unwrap();
        assert_eq!(format!("{}", once), format!("{}", twice));
    }

    #[test]
    fn quotient_remainder_collapses() {
        let n = Sym::fresh("n");
        let s = Simplifier {
            orig: proc_with_body(vec![]),
            ir: proc_with_body(vec![]),
            fwd: Forward::identity(&proc_with_body(vec![])),
            facts: vec![FxHashMap::default()],
        };
        let rd = Expr::read(&n, Type::Index, &src());
        let k = Expr::int(4, Type::Int, &src());
        let e = Expr::binop(
            BinOp::Add,
            Expr::binop(BinOp::Mod, rd.clone(), k.clone(), Type::Index, &src()),
            Expr::binop(
                BinOp::Mul,
                k.clone(),
                Expr::binop(BinOp::Div, rd.clone(), k.clone(), Type::Index, &src()),
                Type::Index,
                &src(),
            ),
            Type::Index,
            &src(),
        );
        assert_eq!(s.map_expr(&e).to_string(), "n");
    }
}
