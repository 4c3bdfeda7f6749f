//! The affine-index canonicalizer.
//!
//! Every indexing expression is lowered to a coefficient map `{sym -> c}`
//! plus a constant; negation, subtraction, and scaling distribute into the
//! map.  `/` and `%` by a constant are simplified using the map: if all
//! coefficients of the dividend are multiples of the divisor the division
//! distributes, and otherwise the dividend is split into divisible and
//! non-divisible parts, with the non-divisible part elided when range
//! analysis bounds its magnitude below the divisor.  Write-back emits the
//! constant followed by `±coeff·sym` terms in a deterministic order, so two
//! semantically equal affine expressions print identically.
//!
//! Normalization runs both as a standalone directive and as the internal
//! prelude of directives that compare index expressions syntactically.

use std::rc::Rc;

use indexmap::IndexMap;
use log::trace;

use loopsched_ir::ir::{BinOp, Expr, Lit, Proc, Stmt, WAccess};
use loopsched_ir::types::Type;
use loopsched_ir::Sym;

use crate::cursor::{Cursor, Field, Forward, NodeValue, Path, Step};
use crate::error::Result;
use crate::range::{range_of, Interval, RangeEnv};

/// The canonical affine form `constant + Σ coeff·sym`.
#[derive(Clone, Debug, Default)]
struct Affine {
    constant: i64,
    terms: IndexMap<Sym, i64>,
}

impl Affine {
    fn constant(v: i64) -> Affine {
        Affine {
            constant: v,
            terms: IndexMap::new(),
        }
    }

    fn term(sym: &Sym) -> Affine {
        let mut terms = IndexMap::new();
        terms.insert(sym.clone(), 1);
        Affine { constant: 0, terms }
    }

    fn neg(mut self) -> Affine {
        self.constant = -self.constant;
        for c in self.terms.values_mut() {
            *c = -*c;
        }
        self
    }

    fn add(mut self, other: Affine) -> Affine {
        self.constant += other.constant;
        for (sym, c) in other.terms {
            *self.terms.entry(sym).or_insert(0) += c;
        }
        self
    }

    fn scale(mut self, k: i64) -> Affine {
        self.constant *= k;
        for c in self.terms.values_mut() {
            *c *= k;
        }
        self
    }

    /// Non-zero terms sorted by `(coeff, sym)`, the deterministic emission
    /// order.
    fn sorted_terms(&self) -> Vec<(i64, Sym)> {
        let mut out: Vec<(i64, Sym)> = self
            .terms
            .iter()
            .filter(|(_, &c)| c != 0)
            .map(|(s, &c)| (c, s.clone()))
            .collect();
        out.sort();
        out
    }
}

/// Subexpressions the affine map cannot absorb.
fn has_non_affine(e: &Expr) -> bool {
    match e {
        Expr::Read { idx, .. } => !idx.is_empty(),
        Expr::Const { val, .. } => !matches!(val, Lit::Int(_)),
        Expr::USub { arg, .. } => has_non_affine(arg),
        Expr::BinOp { op, lhs, rhs, .. } => {
            !matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul)
                || has_non_affine(lhs)
                || has_non_affine(rhs)
        }
        Expr::ReadConfig { .. } | Expr::Select { .. } | Expr::Window { .. } | Expr::Stride { .. } => {
            true
        }
    }
}

/// `None` when the expression is not affine (e.g. a product of two
/// symbols).
fn to_affine(e: &Expr) -> Option<Affine> {
    match e {
        Expr::Read { name, idx, .. } if idx.is_empty() => Some(Affine::term(name)),
        Expr::Const { val: Lit::Int(v), .. } => Some(Affine::constant(*v)),
        Expr::USub { arg, .. } => Some(to_affine(arg)?.neg()),
        Expr::BinOp { op, lhs, rhs, .. } => {
            let l = to_affine(lhs)?;
            let r = to_affine(rhs)?;
            match op {
                BinOp::Add => Some(l.add(r)),
                BinOp::Sub => Some(l.add(r.neg())),
                BinOp::Mul => {
                    // one side must be constant
                    if l.terms.is_empty() {
                        Some(r.scale(l.constant))
                    } else if r.terms.is_empty() {
                        Some(l.scale(r.constant))
                    } else {
                        None
                    }
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Write the affine form back as IR: the constant, then signed scaled terms
/// in sorted order.
fn emit(context: &Expr, constant: i64, terms: &[(i64, Sym)]) -> Expr {
    let srcinfo = context.srcinfo();
    let ty = context.ty().clone();
    let mut out = Expr::int(constant, Type::Int, srcinfo);
    for (coeff, sym) in terms {
        let scaled = Expr::binop(
            BinOp::Mul,
            Expr::int(coeff.abs(), Type::Int, srcinfo),
            Expr::read(sym, ty.clone(), srcinfo),
            ty.clone(),
            srcinfo,
        );
        let op = if *coeff > 0 { BinOp::Add } else { BinOp::Sub };
        out = Expr::binop(op, out, scaled, ty.clone(), srcinfo);
    }
    out
}

fn range_env_of(affine_src: &Expr, env: &RangeEnv) -> Interval {
    range_of(affine_src, env)
}

fn div_floor(a: i64, d: i64) -> i64 {
    a.div_euclid(d)
}

fn mod_floor(a: i64, d: i64) -> i64 {
    a.rem_euclid(d)
}

/// `lhs / d` where `lhs` is affine and `d` a constant > 1.
fn division_simplification(e: &Expr, env: &RangeEnv) -> Expr {
    let (lhs, rhs, d) = match e {
        Expr::BinOp { op: BinOp::Div, lhs, rhs, .. } => {
            (lhs.as_ref(), rhs.as_ref(), rhs.as_const_int().unwrap())
        }
        _ => unreachable!(),
    };
    let aff = match to_affine(lhs) {
        Some(aff) => aff,
        None => return e.clone(),
    };
    let terms = aff.sorted_terms();

    let non_divisible: Vec<(i64, Sym)> = terms
        .iter()
        .filter(|(c, _)| c % d != 0)
        .cloned()
        .collect();

    if non_divisible.is_empty() {
        // Fully distributes: (c + Σ d·kᵢ·sᵢ) / d  =  c/d + Σ kᵢ·sᵢ
        let divided: Vec<(i64, Sym)> = terms.iter().map(|(c, s)| (c / d, s.clone())).collect();
        return emit(lhs, div_floor(aff.constant, d), &divided);
    }

    // Split into divisible and non-divisible parts; if the non-divisible
    // part provably stays in [0, d), it contributes nothing to the quotient.
    let divisible: Vec<(i64, Sym)> = terms
        .iter()
        .filter(|(c, _)| c % d == 0)
        .map(|(c, s)| (c / d, s.clone()))
        .collect();

    if mod_floor(aff.constant, d) == 0 {
        let residue = emit(lhs, 0, &non_divisible);
        if let Some((lo, hi)) = range_env_of(&residue, env).bounded() {
            if lo >= 0 && hi < d {
                return emit(lhs, div_floor(aff.constant, d), &divisible);
            }
        }
    } else {
        let residue = emit(lhs, aff.constant, &non_divisible);
        if let Some((lo, hi)) = range_env_of(&residue, env).bounded() {
            if lo >= 0 && hi < d {
                return emit(lhs, 0, &divisible);
            }
        }
    }

    let new_lhs = emit(lhs, aff.constant, &terms);
    Expr::binop(
        BinOp::Div,
        new_lhs,
        rhs.clone(),
        e.ty().clone(),
        e.srcinfo(),
    )
}

/// Collapse `(n / c1) / c2` into `n / (c1·c2)`, repeatedly.  Applied when
/// the dividend is not affine.
fn division_denominator_simplification(e: &Expr) -> Expr {
    let mut out = e.clone();
    loop {
        let (inner, c1, c2) = match &out {
            Expr::BinOp { op: BinOp::Div, lhs, rhs, .. } => match (lhs.as_ref(), rhs.as_const_int()) {
                (Expr::BinOp { op: BinOp::Div, lhs: inner, rhs: inner_rhs, .. }, Some(c2)) => {
                    match inner_rhs.as_const_int() {
                        Some(c1) => ((**inner).clone(), c1, c2),
                        None => return out,
                    }
                }
                _ => return out,
            },
            _ => return out,
        };
        let srcinfo = out.srcinfo().clone();
        let ty = out.ty().clone();
        out = Expr::binop(
            BinOp::Div,
            inner,
            Expr::int(c1 * c2, Type::Int, &srcinfo),
            ty,
            &srcinfo,
        );
    }
}

/// Divide, and if the quotient survives, try factoring the divisor so one of
/// the factors distributes.
fn division_with_split(e: &Expr, env: &RangeEnv) -> Expr {
    fn still_division(e: &Expr) -> bool {
        matches!(e, Expr::BinOp { op: BinOp::Div, .. })
    }

    let out = division_simplification(e, env);
    if !still_division(&out) {
        return out;
    }
    let (lhs, d) = match e {
        Expr::BinOp { op: BinOp::Div, lhs, rhs, .. } => (lhs.as_ref(), rhs.as_const_int().unwrap()),
        _ => unreachable!(),
    };
    let srcinfo = e.srcinfo();
    let ty = e.ty().clone();

    let mut divisor = 2;
    while divisor * divisor <= d {
        if d % divisor == 0 {
            for (first, second) in [(divisor, d / divisor), (d / divisor, divisor)] {
                let inner = Expr::binop(
                    BinOp::Div,
                    lhs.clone(),
                    Expr::int(first, Type::Int, srcinfo),
                    ty.clone(),
                    srcinfo,
                );
                let inner = division_simplification(&inner, env);
                if !still_division(&inner) {
                    return Expr::binop(
                        BinOp::Div,
                        inner,
                        Expr::int(second, Type::Int, srcinfo),
                        ty.clone(),
                        srcinfo,
                    );
                }
            }
        }
        divisor += 1;
    }
    out
}

/// `lhs % m` where `lhs` is affine and `m` a constant > 1.
fn modulo_simplification(e: &Expr, env: &RangeEnv) -> Expr {
    let (lhs, rhs, m) = match e {
        Expr::BinOp { op: BinOp::Mod, lhs, rhs, .. } => {
            (lhs.as_ref(), rhs.as_ref(), rhs.as_const_int().unwrap())
        }
        _ => unreachable!(),
    };
    let aff = match to_affine(lhs) {
        Some(aff) => aff,
        None => return e.clone(),
    };
    // Terms whose coefficient is a multiple of m vanish.
    let kept: Vec<(i64, Sym)> = aff
        .sorted_terms()
        .into_iter()
        .filter(|(c, _)| c % m != 0)
        .collect();

    if kept.is_empty() {
        return Expr::int(mod_floor(aff.constant, m), Type::Int, e.srcinfo());
    }

    let constant = if mod_floor(aff.constant, m) == 0 {
        0
    } else {
        aff.constant
    };
    let new_lhs = emit(lhs, constant, &kept);
    if let Some((lo, hi)) = range_env_of(&new_lhs, env).bounded() {
        if lo >= 0 && hi < m {
            return new_lhs;
        }
    }
    Expr::binop(BinOp::Mod, new_lhs, rhs.clone(), e.ty().clone(), e.srcinfo())
}

/// Canonicalize one indexable expression under the given symbol ranges.
pub fn canon_index_expr(e: &Expr, env: &RangeEnv) -> Expr {
    // Children first, so nested quotients see canonical dividends.
    let e = match e {
        Expr::BinOp { op, lhs, rhs, ty, srcinfo } => Expr::BinOp {
            op: *op,
            lhs: Box::new(canon_index_expr(lhs, env)),
            rhs: Box::new(canon_index_expr(rhs, env)),
            ty: ty.clone(),
            srcinfo: srcinfo.clone(),
        },
        other => other.clone(),
    };

    if let Expr::BinOp { op, lhs, rhs, .. } = &e {
        if matches!(op, BinOp::Div | BinOp::Mod) && rhs.as_const_int().is_some() {
            if has_non_affine(lhs) {
                return if *op == BinOp::Div {
                    division_denominator_simplification(&e)
                } else {
                    e
                };
            }
            return if *op == BinOp::Div {
                division_with_split(&e, env)
            } else {
                modulo_simplification(&e, env)
            };
        }
    }

    if has_non_affine(&e) {
        return e;
    }
    match to_affine(&e) {
        Some(aff) => emit(&e, aff.constant, &aff.sorted_terms()),
        None => e,
    }
}

/// Canonical syntactic equality of two index expressions.  Printed forms are
/// compared so that type and location annotations cannot split semantically
/// identical terms.
pub fn canon_eq(e1: &Expr, e2: &Expr, env: &RangeEnv) -> bool {
    let a = canon_index_expr(e1, env);
    let b = canon_index_expr(e2, env);
    a == b || a.to_string() == b.to_string()
}

// ---------------------------------------------------------------------------
// The normalization pass

struct Normalizer {
    replacements: Vec<(Path, Expr)>,
    ty_replacements: Vec<(Path, Type)>,
}

impl Normalizer {
    /// Normalize an arbitrary expression: indexable expressions are
    /// canonicalized wholesale, anything else recurses into its children.
    fn norm_expr(&self, e: &Expr, env: &RangeEnv) -> Expr {
        if e.ty().is_indexable() {
            return canon_index_expr(e, env);
        }
        match e {
            Expr::BinOp { op, lhs, rhs, ty, srcinfo } => Expr::BinOp {
                op: *op,
                lhs: Box::new(self.norm_expr(lhs, env)),
                rhs: Box::new(self.norm_expr(rhs, env)),
                ty: ty.clone(),
                srcinfo: srcinfo.clone(),
            },
            Expr::USub { arg, ty, srcinfo } => Expr::USub {
                arg: Box::new(self.norm_expr(arg, env)),
                ty: ty.clone(),
                srcinfo: srcinfo.clone(),
            },
            Expr::Select { cond, body, ty, srcinfo } => Expr::Select {
                cond: Box::new(self.norm_expr(cond, env)),
                body: Box::new(self.norm_expr(body, env)),
                ty: ty.clone(),
                srcinfo: srcinfo.clone(),
            },
            Expr::Window { name, idx, ty, srcinfo } => Expr::Window {
                name: name.clone(),
                idx: idx
                    .iter()
                    .map(|w| match w {
                        WAccess::Point { pt, srcinfo } => WAccess::Point {
                            pt: self.norm_expr(pt, env),
                            srcinfo: srcinfo.clone(),
                        },
                        WAccess::Interval { lo, hi, srcinfo } => WAccess::Interval {
                            lo: self.norm_expr(lo, env),
                            hi: self.norm_expr(hi, env),
                            srcinfo: srcinfo.clone(),
                        },
                    })
                    .collect(),
                ty: ty.clone(),
                srcinfo: srcinfo.clone(),
            },
            other => other.clone(),
        }
    }

    fn record_expr(&mut self, path: &Path, field: Field, idx: usize, e: &Expr, env: &RangeEnv) {
        let new = self.norm_expr(e, env);
        if new != *e || new.to_string() != e.to_string() {
            let mut p = path.clone();
            p.push(Step { field, idx: idx as u32 });
            self.replacements.push((p, new));
        }
    }

    fn norm_type(&self, ty: &Type, env: &RangeEnv) -> Type {
        match ty {
            Type::Tensor(t) => {
                let mut t = t.clone();
                t.shape = t.shape.iter().map(|e| self.norm_expr(e, env)).collect();
                Type::Tensor(t)
            }
            other => other.clone(),
        }
    }

    fn walk_stmts(&mut self, stmts: &[Stmt], path: &mut Path, field: Field, env: &mut RangeEnv) {
        for (i, s) in stmts.iter().enumerate() {
            path.push(Step { field, idx: i as u32 });
            self.walk_stmt(s, path, env);
            path.pop();
        }
    }

    fn walk_stmt(&mut self, s: &Stmt, path: &mut Path, env: &mut RangeEnv) {
        match s {
            Stmt::Assign { idx, rhs, .. } | Stmt::Reduce { idx, rhs, .. } => {
                for (i, e) in idx.iter().enumerate() {
                    self.record_expr(path, Field::Idx, i, e, env);
                }
                self.record_expr(path, Field::Rhs, 0, rhs, env);
            }
            Stmt::WriteConfig { rhs, .. } | Stmt::WindowStmt { rhs, .. } => {
                self.record_expr(path, Field::Rhs, 0, rhs, env);
            }
            Stmt::If { cond, body, orelse, .. } => {
                self.record_expr(path, Field::Cond, 0, cond, env);
                let mut inner = env.clone();
                self.walk_stmts(body, path, Field::Body, &mut inner);
                let mut inner = env.clone();
                self.walk_stmts(orelse, path, Field::Orelse, &mut inner);
            }
            Stmt::Seq { iter, lo, hi, body, .. } => {
                let lo_n = self.norm_expr(lo, env);
                let hi_n = self.norm_expr(hi, env);
                self.record_expr(path, Field::Lo, 0, lo, env);
                self.record_expr(path, Field::Hi, 0, hi, env);

                let mut inner = env.clone();
                let lo_r = range_of(&lo_n, env);
                let hi_r = range_of(&hi_n, env);
                let bound = match (lo_r.lo, hi_r.hi) {
                    (Some(l), Some(h)) if l < h => Some(Interval::new(l, h - 1)),
                    _ => None,
                };
                inner.insert(iter.clone(), bound);
                self.walk_stmts(body, path, Field::Body, &mut inner);
            }
            Stmt::Call { args, .. } => {
                for (i, a) in args.iter().enumerate() {
                    self.record_expr(path, Field::Args, i, a, env);
                }
            }
            Stmt::Alloc { ty, .. } => {
                let new = self.norm_type(ty, env);
                if new != *ty {
                    let mut p = path.clone();
                    p.push(Step {
                        field: Field::Ty,
                        idx: 0,
                    });
                    self.ty_replacements.push((p, new));
                }
            }
            Stmt::Instr { body, .. } => {
                path.push(Step {
                    field: Field::Body,
                    idx: 0,
                });
                self.walk_stmt(body, path, env);
                path.pop();
            }
            Stmt::Free { .. } | Stmt::Pass { .. } => {}
        }
    }
}

/// Canonicalize every indexable expression of the procedure.  Returns the
/// new root and a forwarder (all edits are in-place expression
/// replacements, so every cursor survives).
pub fn normalize(root: &Rc<Proc>) -> Result<(Rc<Proc>, Forward)> {
    let mut n = Normalizer {
        replacements: Vec::new(),
        ty_replacements: Vec::new(),
    };
    let mut env = RangeEnv::default();
    for arg in &root.args {
        // TODO: seed argument ranges from the precondition list
        env.insert(arg.name.clone(), None);
    }
    for (i, p) in root.preds.iter().enumerate() {
        let mut path = Path::new();
        n.record_expr(&mut path, Field::Preds, i, p, &env);
    }
    let mut path = Path::new();
    n.walk_stmts(&root.body, &mut path, Field::Body, &mut env);

    trace!(
        "normalize: {} expression rewrites, {} shape rewrites",
        n.replacements.len(),
        n.ty_replacements.len()
    );

    let mut fwd = Forward::identity(root);
    let mut ir = root.clone();
    for (path, new_expr) in n.replacements {
        let c = fwd.fwd(&Cursor::from_path(root, path))?;
        let (ir2, f2) = c.replace(NodeValue::Expr(new_expr))?;
        ir = ir2;
        fwd = fwd.then(f2);
    }
    for (path, new_ty) in n.ty_replacements {
        let c = fwd.fwd(&Cursor::from_path(root, path))?;
        let (ir2, f2) = c.replace(NodeValue::Ty(new_ty))?;
        ir = ir2;
        fwd = fwd.then(f2);
    }
    Ok((ir, fwd))
}

#[cfg(test)]
mod test {
    use super::*;
    use loopsched_ir::SrcInfo;

    fn src() -> SrcInfo {
        SrcInfo::unknown()
    }

    fn rd(s: &Sym) -> Expr {
        Expr::read(s, Type::Index, &src())
    }

    fn op(o: BinOp, l: Expr, r: Expr) -> Expr {
        Expr::binop(o, l, r, Type::Index, &src())
    }

    fn cint(v: i64) -> Expr {
        Expr::int(v, Type::Int, &src())
    }

    #[test]
    fn cancelling_terms_vanish() {
        let n = Sym::fresh("n");
        // n*4 - n*4 + 1  ->  1
        let e = op(
            BinOp::Add,
            op(
                BinOp::Sub,
                op(BinOp::Mul, rd(&n), cint(4)),
                op(BinOp::Mul, rd(&n), cint(4)),
            ),
            cint(1),
        );
        let env = RangeEnv::default();
        assert_eq!(canon_index_expr(&e, &env).to_string(), "1");
    }

    #[test]
    fn divisible_coefficients_distribute() {
        let n = Sym::fresh("n");
        // (4*n + 8) / 4  ->  2 + 1*n
        let e = op(
            BinOp::Div,
            op(BinOp::Add, op(BinOp::Mul, cint(4), rd(&n)), cint(8)),
            cint(4),
        );
        let env = RangeEnv::default();
        assert_eq!(canon_index_expr(&e, &env).to_string(), "2 + 1 * n");
    }

    #[test]
    fn modulo_elides_bounded_residue() {
        let i = Sym::fresh("i");
        let mut env = RangeEnv::default();
        env.insert(i.clone(), Some(Interval::new(0, 3)));
        // (4*n + i) % 4  ->  i  when i in [0, 4)
        let n = Sym::fresh("n");
        let e = op(
            BinOp::Mod,
            op(BinOp::Add, op(BinOp::Mul, cint(4), rd(&n)), rd(&i)),
            cint(4),
        );
        assert_eq!(canon_index_expr(&e, &env).to_string(), "0 + 1 * i");
    }

    #[test]
    fn unbounded_residue_keeps_modulo() {
        let n = Sym::fresh("n");
        let env = RangeEnv::default();
        let e = op(BinOp::Mod, rd(&n), cint(4));
        assert!(matches!(
            canon_index_expr(&e, &env),
            Expr::BinOp { op: BinOp::Mod, .. }
        ));
    }

    #[test]
    fn nested_denominators_collapse() {
        let cfg = Rc::new(loopsched_ir::ir::Config {
            name: "cfg".into(),
            fields: vec![("tile".into(), Type::Index)],
        });
        let rc = Expr::ReadConfig {
            config: cfg,
            field: "tile".into(),
            ty: Type::Index,
            srcinfo: src(),
        };
        // (cfg.tile / 2) / 3 -> cfg.tile / 6
        let e = op(BinOp::Div, op(BinOp::Div, rc, cint(2)), cint(3));
        let env = RangeEnv::default();
        let out = canon_index_expr(&e, &env);
        match out {
            Expr::BinOp { op: BinOp::Div, rhs, .. } => {
                assert_eq!(rhs.as_const_int(), Some(6));
            }
            other => panic!("expected division, got {}", other),
        }
    }

    #[test]
    fn canon_eq_ignores_association() {
        let n = Sym::fresh("n");
        let k = Sym::fresh("k");
        let e1 = op(BinOp::Add, rd(&n), rd(&k));
        let e2 = op(BinOp::Add, rd(&k), rd(&n));
        assert!(canon_eq(&e1, &e2, &RangeEnv::default()));
    }
}
