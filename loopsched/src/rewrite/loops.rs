//! Loop-reshaping directives: reorder, split, partition, product, unroll,
//! fission, fusion, scope lifting, loop removal/introduction, guards, and
//! the `Pass` bookkeeping directives.

use std::rc::Rc;

use log::debug;
use rustc_hash::FxHashMap;

use loopsched_ir::ir::{BinOp, Expr, Proc, Stmt};
use loopsched_ir::subst::{alpha_rename, substitute};
use loopsched_ir::types::Type;
use loopsched_ir::uses::{free_vars_expr, free_vars_stmts, reads_of_expr};
use loopsched_ir::{SrcInfo, Sym};

use crate::cursor::{for_each_node, Cursor, Field, Forward, GapCursor, NodeRef, NodeValue, Path};
use crate::error::{Result, SchedulingError};
use crate::oracle::SafetyOracle;
use crate::rewrite::Tx;

fn err<T>(msg: impl Into<String>, srcinfo: &SrcInfo) -> Result<T> {
    Err(SchedulingError::new(msg, srcinfo).into())
}

fn expect_seq(s: &Stmt) -> Result<(&Sym, &Expr, &Expr, &[Stmt], &SrcInfo)> {
    match s {
        Stmt::Seq { iter, lo, hi, body, srcinfo } => Ok((iter, lo, hi, body, srcinfo)),
        _ => Err(SchedulingError::new("expected a loop", s.srcinfo()).into()),
    }
}

fn index_read(sym: &Sym, srcinfo: &SrcInfo) -> Expr {
    Expr::read(sym, Type::Index, srcinfo)
}

fn cnst(v: i64, srcinfo: &SrcInfo) -> Expr {
    Expr::int(v, Type::Int, srcinfo)
}

fn szop(op: BinOp, lhs: Expr, rhs: Expr, srcinfo: &SrcInfo) -> Expr {
    let ty = lhs.ty().clone();
    Expr::binop(op, lhs, rhs, ty, srcinfo)
}

fn boolop(op: BinOp, lhs: Expr, rhs: Expr, srcinfo: &SrcInfo) -> Expr {
    Expr::binop(op, lhs, rhs, Type::Bool, srcinfo)
}

fn if_stmt(cond: Expr, body: Vec<Stmt>, srcinfo: SrcInfo) -> Stmt {
    Stmt::If {
        cond,
        body,
        orelse: vec![],
        srcinfo,
    }
}

/// Reads of `sym` in the *current* tree under the given (current-root)
/// cursors, in pre-order.
fn reads_in(root: &Rc<Proc>, region: &[Cursor], sym: &Sym) -> Vec<Path> {
    let mut out = Vec::new();
    for c in region {
        let start: Path = c.path().iter().copied().collect();
        for_each_node(root, &start, &mut |path, node| {
            if let NodeRef::Expr(Expr::Read { name, .. }) = node {
                if name == sym {
                    out.push(path.clone());
                }
            }
        });
    }
    out
}

/// Replace every read of `sym` under the current-root `region` cursors by
/// `with(srcinfo)`.  Edits run against the transaction's current tree.
fn replace_reads_now(
    tx: &mut Tx,
    region: &[Cursor],
    sym: &Sym,
    with: &mut impl FnMut(&SrcInfo) -> Expr,
) -> Result<()> {
    let sites = reads_in(tx.ir(), region, sym);
    for path in sites.iter().rev() {
        let c = Cursor::from_path(tx.ir(), path.clone());
        let srcinfo = c.expr()?.srcinfo().clone();
        tx.apply(c.replace(NodeValue::Expr(with(&srcinfo)))?);
    }
    Ok(())
}

// ---------------------------------------------------------------------------

/// Swap two adjacent statements.
pub fn reorder_stmts(
    first: &Cursor,
    second: &Cursor,
    oracle: &dyn SafetyOracle,
) -> Result<(Rc<Proc>, Forward)> {
    let adjacent =
        first.same_root(second) && matches!(first.next(), Some(n) if n.path() == second.path());
    if !adjacent {
        return err(
            "expected the second statement to be directly after the first",
            first.stmt()?.srcinfo(),
        );
    }
    oracle.reorder_stmts(first.stmt()?, second.stmt()?)?;
    debug!("reorder_stmts at {:?}", first);
    Ok(second.move_to(&first.before()?)?)
}

/// The tail strategies of [`split_loop`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TailStrategy {
    /// Round the trip count up and guard the body.
    Guard,
    /// Round down and emit a separate tail loop.
    Cut,
    /// As `Cut`, with the tail loop wrapped in a non-empty check.
    CutAndGuard,
    /// Fail unless the factor provably divides the trip count.
    Perfect,
}

/// Replace `for i in [0, N)` by nested loops `for o in [0, H): for l in
/// [0, q)` with `i ↦ q·o + l`, handling the remainder according to the tail
/// strategy.
pub fn split_loop(
    loop_c: &Cursor,
    quot: i64,
    outer_name: &str,
    inner_name: &str,
    tail: TailStrategy,
) -> Result<(Rc<Proc>, Forward)> {
    let root = loop_c.proc().clone();
    let split_loop = loop_c.stmt()?.clone();
    let (iter, lo, hi, body, srcinfo) = expect_seq(&split_loop)?;
    let n = hi.clone();
    let srcinfo = srcinfo.clone();

    if !lo.is_const_zero() {
        return err(
            format!("expected the lower bound of the loop to be zero, got {}", lo),
            &srcinfo,
        );
    }
    if quot <= 1 {
        return err(
            format!("expected a split factor greater than one, got {}", quot),
            &srcinfo,
        );
    }

    let outer_sym = Sym::fresh(outer_name);
    let inner_sym = Sym::fresh(inner_name);

    let substitute_idx = |srcinfo: &SrcInfo| {
        szop(
            BinOp::Add,
            szop(
                BinOp::Mul,
                cnst(quot, srcinfo),
                index_read(&outer_sym, srcinfo),
                srcinfo,
            ),
            index_read(&inner_sym, srcinfo),
            srcinfo,
        )
    };

    let ceildiv = |lhs: Expr, q: i64, srcinfo: &SrcInfo| {
        szop(
            BinOp::Div,
            szop(BinOp::Add, lhs, cnst(q - 1, srcinfo), srcinfo),
            cnst(q, srcinfo),
            srcinfo,
        )
    };

    let hi_rng = match tail {
        TailStrategy::Guard => ceildiv(n.clone(), quot, &srcinfo),
        TailStrategy::Cut | TailStrategy::CutAndGuard => {
            szop(BinOp::Div, n.clone(), cnst(quot, &srcinfo), &srcinfo)
        }
        TailStrategy::Perfect => match n.as_const_int() {
            Some(val) => {
                if val % quot != 0 {
                    return err(
                        format!(
                            "cannot perfectly split the '{}' loop because {} does not evenly divide {}",
                            iter, quot, val
                        ),
                        &srcinfo,
                    );
                }
                cnst(val / quot, &srcinfo)
            }
            None => {
                // A procedure precondition of the form `N % k == 0` with
                // `quot | k` discharges divisibility.
                if !divisibility_from_preds(&root, &n, quot) {
                    return err(
                        format!("cannot perfectly split the '{}' loop", iter),
                        &srcinfo,
                    );
                }
                szop(BinOp::Div, n.clone(), cnst(quot, &srcinfo), &srcinfo)
            }
        },
    };

    let mut tx = Tx::new(&root);
    tx.apply(
        loop_c
            .child(Field::Iter, 0)
            .replace(NodeValue::Sym(outer_sym.clone()))?,
    );

    // Guarded bodies keep the exact trip count.
    if tail == TailStrategy::Guard {
        let cond = boolop(BinOp::Lt, substitute_idx(&srcinfo), n.clone(), &srcinfo);
        let guard_src = srcinfo.clone();
        let body_block = tx.fwd(loop_c)?.body()?;
        tx.apply(body_block.wrap(move |stmts| if_stmt(cond, stmts, guard_src), Field::Body)?);
    }

    let c = tx.fwd(loop_c)?;
    tx.apply(c.child(Field::Hi, 0).replace(NodeValue::Expr(hi_rng.clone()))?);

    let inner_sym2 = inner_sym.clone();
    let inner_src = srcinfo.clone();
    let inner_hi = cnst(quot, &srcinfo);
    let body_block = tx.fwd(loop_c)?.body()?;
    tx.apply(body_block.wrap(
        move |stmts| Stmt::Seq {
            iter: inner_sym2,
            lo: Expr::int(0, Type::Index, &inner_src),
            hi: inner_hi,
            body: stmts,
            srcinfo: inner_src.clone(),
        },
        Field::Body,
    )?);

    // Re-point the body at `q·o + l`.
    let loop_now = tx.fwd(loop_c)?;
    replace_reads_now(&mut tx, &[loop_now], iter, &mut |si| substitute_idx(si))?;

    // The tail loop covers the remaining `N mod q` iterations.
    if matches!(tail, TailStrategy::Cut | TailStrategy::CutAndGuard) {
        let cut_sym = Sym::fresh(inner_name);
        let n_tail = szop(BinOp::Mod, n.clone(), cnst(quot, &srcinfo), &srcinfo);
        let cut_sub = szop(
            BinOp::Add,
            index_read(&cut_sym, &srcinfo),
            szop(BinOp::Mul, hi_rng.clone(), cnst(quot, &srcinfo), &srcinfo),
            &srcinfo,
        );
        let mut env = FxHashMap::default();
        env.insert(iter.clone(), cut_sub);
        let cut_body = substitute(&alpha_rename(body), &env);
        let mut cut_stmt = Stmt::Seq {
            iter: cut_sym,
            lo: Expr::int(0, Type::Index, &srcinfo),
            hi: n_tail.clone(),
            body: cut_body,
            srcinfo: srcinfo.clone(),
        };
        if tail == TailStrategy::CutAndGuard {
            let cond = boolop(BinOp::Gt, n_tail, cnst(0, &srcinfo), &srcinfo);
            cut_stmt = if_stmt(cond, vec![cut_stmt], srcinfo.clone());
        }
        let gap = tx.fwd(loop_c)?.after()?;
        tx.apply(gap.insert(vec![cut_stmt])?);
    }

    debug!("split_loop {} by {} ({:?})", iter, quot, tail);
    Ok(tx.finish())
}

/// A `N % k == 0` precondition on the bound's symbol, with `q | k`.
fn divisibility_from_preds(root: &Proc, n: &Expr, quot: i64) -> bool {
    let n_sym = match n {
        Expr::Read { name, idx, .. } if idx.is_empty() => name,
        _ => return false,
    };
    root.preds.iter().any(|pred| match pred {
        Expr::BinOp { op: BinOp::Eq, lhs, rhs, .. } => {
            rhs.as_const_int() == Some(0)
                && match &**lhs {
                    Expr::BinOp { op: BinOp::Mod, lhs: inner, rhs: k, .. } => {
                        matches!(&**inner, Expr::Read { name, idx, .. }
                                 if name == n_sym && idx.is_empty())
                            && matches!(k.as_const_int(), Some(kv) if kv > 0 && kv % quot == 0)
                    }
                    _ => false,
                }
        }
        _ => false,
    })
}

/// Split `for i in [0, N)` into `for i in [0, k)` followed by
/// `for i in [0, N-k): body[i ↦ i+k]`.
pub fn partition_loop(
    loop_c: &Cursor,
    partition_by: i64,
    oracle: &dyn SafetyOracle,
) -> Result<(Rc<Proc>, Forward)> {
    let s = loop_c.stmt()?.clone();
    let (iter, _lo, hi, body, srcinfo) = expect_seq(&s)?;
    let srcinfo = srcinfo.clone();

    let part = cnst(partition_by, &srcinfo);
    let new_hi = szop(BinOp::Sub, hi.clone(), part.clone(), &srcinfo);
    let plus_one = szop(BinOp::Add, new_hi.clone(), cnst(1, &srcinfo), &srcinfo);
    if oracle.is_positive(loop_c, &plus_one).is_err() {
        return err(
            format!("expected the new loop bound {} to be always non-negative", new_hi),
            &srcinfo,
        );
    }

    let loop1 = alpha_rename(std::slice::from_ref(&Stmt::Seq {
        iter: iter.clone(),
        lo: Expr::int(0, Type::Index, &srcinfo),
        hi: part.clone(),
        body: body.to_vec(),
        srcinfo: srcinfo.clone(),
    }))
    .pop()
    .unwrap();

    // The second half sees the iterator offset by the partition point.
    let iter2 = iter.copy();
    let offset = szop(BinOp::Add, index_read(&iter2, &srcinfo), part, &srcinfo);
    let mut env = FxHashMap::default();
    env.insert(iter.clone(), offset);
    let body2 = substitute(body, &env);
    let loop2 = alpha_rename(std::slice::from_ref(&Stmt::Seq {
        iter: iter2,
        lo: Expr::int(0, Type::Index, &srcinfo),
        hi: new_hi,
        body: body2,
        srcinfo: srcinfo.clone(),
    }))
    .pop()
    .unwrap();

    Ok(loop_c.replace_stmts(vec![loop1, loop2])?)
}

/// Fuse a perfectly nested pair of zero-based loops (the inner one with a
/// constant bound) into one loop over the product range.
pub fn product_loop(outer_c: &Cursor, new_name: &str) -> Result<(Rc<Proc>, Forward)> {
    let root = outer_c.proc().clone();
    let outer = outer_c.stmt()?.clone();
    let (outer_iter, outer_lo, outer_hi, outer_body, srcinfo) = expect_seq(&outer)?;
    let srcinfo = srcinfo.clone();

    let inner = match outer_body {
        [s @ Stmt::Seq { .. }] => s.clone(),
        _ => return err("expected a loop directly inside the outer loop", &srcinfo),
    };
    let (inner_iter, inner_lo, inner_hi, _, _) = expect_seq(&inner)?;

    if inner_hi.as_const_int().is_none() {
        return err(
            format!("expected the inner loop to have a constant bound, got {}", inner_hi),
            &srcinfo,
        );
    }
    if !(outer_lo.is_const_zero() && inner_lo.is_const_zero()) {
        return err(
            format!(
                "expected the inner and outer loops to have a constant lower bound of 0, got {} and {}",
                inner_lo, outer_lo
            ),
            &srcinfo,
        );
    }

    // Only spend a name once the other parameters are validated.
    let new_var = Sym::fresh(new_name);
    let inner_hi = inner_hi.clone();
    let outer_hi = outer_hi.clone();
    let outer_iter = outer_iter.clone();
    let inner_iter = inner_iter.clone();

    let inner_c = outer_c.child(Field::Body, 0);

    let mut tx = Tx::new(&root);
    let body_now = tx.fwd(&inner_c)?.body()?.cursors();
    let (nv, ih) = (new_var.clone(), inner_hi.clone());
    replace_reads_now(&mut tx, &body_now, &outer_iter, &mut |si| {
        szop(BinOp::Div, index_read(&nv, si), ih.clone(), si)
    })?;
    let body_now = tx.fwd(&inner_c)?.body()?.cursors();
    let (nv, ih) = (new_var.clone(), inner_hi.clone());
    replace_reads_now(&mut tx, &body_now, &inner_iter, &mut |si| {
        szop(BinOp::Mod, index_read(&nv, si), ih.clone(), si)
    })?;

    let c = tx.fwd(outer_c)?;
    tx.apply(c.child(Field::Iter, 0).replace(NodeValue::Sym(new_var))?);
    let new_hi = szop(BinOp::Mul, outer_hi, inner_hi, &srcinfo);
    let c = tx.fwd(outer_c)?;
    tx.apply(c.child(Field::Hi, 0).replace(NodeValue::Expr(new_hi))?);

    let inner_now = tx.fwd(&inner_c)?;
    let dst = inner_now.after()?;
    tx.apply(inner_now.body()?.move_to(&dst)?);
    let inner_now = tx.fwd(&inner_c)?;
    tx.apply(inner_now.delete()?);

    Ok(tx.finish())
}

/// Replace a constant-bounds loop by `hi - lo` alpha-renamed copies of its
/// body.
pub fn unroll(loop_c: &Cursor) -> Result<(Rc<Proc>, Forward)> {
    let s = loop_c.stmt()?.clone();
    let (iter, lo, hi, body, srcinfo) = expect_seq(&s)?;
    let (lo_v, hi_v) = match (lo.as_const_int(), hi.as_const_int()) {
        (Some(l), Some(h)) => (l, h),
        _ => {
            return err(
                format!("expected loop '{}' to have constant bounds", iter),
                srcinfo,
            )
        }
    };

    let mut unrolled = Vec::new();
    for i in lo_v..hi_v {
        let mut env = FxHashMap::default();
        env.insert(iter.clone(), Expr::int(i, Type::Index, srcinfo));
        unrolled.extend(alpha_rename(&substitute(body, &env)));
    }
    debug!("unroll {}: {} copies", iter, hi_v.saturating_sub(lo_v));
    Ok(loop_c.replace_stmts(unrolled)?)
}

/// Allocations in the pre half must not be visible to the post half.
fn alloc_check(pre: &[Stmt], post: &[Stmt], srcinfo: &SrcInfo) -> Result<()> {
    let post_fv = free_vars_stmts(post);
    for s in pre {
        if let Stmt::Alloc { name, .. } = s {
            if post_fv.contains(name) {
                return err(
                    format!(
                        "will not fission here, because doing so would hide the allocation of {} from a later use site",
                        name
                    ),
                    srcinfo,
                );
            }
        }
    }
    Ok(())
}

/// Split each of the `n_lifts` enclosing scopes at the point just after the
/// given statement.  With `n_lifts == 0` this is a no-op.
pub fn fission_after(
    stmt_c: &Cursor,
    n_lifts: usize,
    oracle: &dyn SafetyOracle,
) -> Result<(Rc<Proc>, Forward)> {
    let root = stmt_c.proc().clone();
    let mut acc = Forward::identity(&root);
    let mut ir = root.clone();
    // The statement after which each level is cut, in current coordinates.
    let mut cur_path: Path = stmt_c.path().iter().copied().collect();

    for _ in 0..n_lifts {
        let base = ir.clone();
        let cur = Cursor::from_path(&base, cur_path.clone());
        let srcinfo = cur.stmt()?.srcinfo().clone();

        let idx = match cur.block_index() {
            Some(i) => i + 1,
            None => return err("cannot fission here", &srcinfo),
        };
        let par = match cur.parent() {
            Some(p) => p,
            None => break,
        };
        if par.path().is_empty() {
            // reached the procedure body
            break;
        }
        let in_orelse = cur.path().last().map(|s| s.field) == Some(Field::Orelse);
        let par_s = par.stmt()?.clone();

        let block = if in_orelse { par.orelse()? } else { par.body()? };
        let stmts = block.stmts()?;
        let (pre, post) = stmts.split_at(idx.min(stmts.len()));

        if pre.is_empty() || post.is_empty() {
            // The cut already sits at a scope boundary; ascend.
            cur_path.pop();
            continue;
        }
        alloc_check(pre, post, &srcinfo)?;

        let mut tx = Tx::new(&base);
        match &par_s {
            Stmt::Seq { iter, lo, hi, srcinfo: loop_src, .. } => {
                let skippable = !free_vars_stmts(pre).contains(iter);
                oracle.fission_loop(&par_s, pre, post, skippable)?;

                // The post half moves into its own copy of the loop, bound
                // to a fresh iterator.
                let iter2 = iter.copy();
                let post_block = block.slice(idx, stmts.len())?;
                let i2 = iter2.clone();
                replace_reads_now(&mut tx, &post_block.cursors(), iter, &mut |si| {
                    index_read(&i2, si)
                })?;

                let post_block = tx.fwd_block(&post_block)?;
                let (w_lo, w_hi, w_src) = (lo.clone(), hi.clone(), loop_src.clone());
                tx.apply(post_block.wrap(
                    move |stmts| Stmt::Seq {
                        iter: iter2,
                        lo: w_lo,
                        hi: w_hi,
                        body: stmts,
                        srcinfo: w_src,
                    },
                    Field::Body,
                )?);

                let par_now = tx.fwd(&par)?;
                let wrapped = if in_orelse {
                    par_now.orelse()?.last()
                } else {
                    par_now.body()?.last()
                };
                let dst = par_now.after()?;
                tx.apply(wrapped.as_block()?.move_to(&dst)?);

                // The next cut point is after the original loop.
                let (new_ir, f) = tx.finish();
                cur_path = f.fwd(&par)?.path().iter().copied().collect();
                acc = acc.then(f);
                ir = new_ir;
            }
            Stmt::If { cond, srcinfo: if_src, .. } => {
                if !in_orelse {
                    // The pre half moves out in front, in its own `if`.
                    let pre_block = block.slice(0, idx)?;
                    let (w_cond, w_src) = (cond.clone(), if_src.clone());
                    tx.apply(pre_block.wrap(
                        move |stmts| if_stmt(w_cond, stmts, w_src),
                        Field::Body,
                    )?);
                    let par_now = tx.fwd(&par)?;
                    let wrapped = par_now.body()?.first();
                    let dst = par_now.before()?;
                    tx.apply(wrapped.as_block()?.move_to(&dst)?);

                    // The next cut point is after the moved pre-`if`.
                    let (new_ir, f) = tx.finish();
                    let par_new = f.fwd(&par)?;
                    let pre_if = par_new
                        .prev()
                        .ok_or_else(|| SchedulingError::new("fission lost its cut point", &srcinfo))?;
                    cur_path = pre_if.path().iter().copied().collect();
                    acc = acc.then(f);
                    ir = new_ir;
                } else {
                    // The post half of the else branch moves out behind,
                    // guarded by an `if` with an empty then branch.
                    let post_block = block.slice(idx, stmts.len())?;
                    let (w_cond, w_src) = (cond.clone(), if_src.clone());
                    let pass_src = if_src.clone();
                    tx.apply(post_block.wrap(
                        move |stmts| Stmt::If {
                            cond: w_cond,
                            body: vec![Stmt::Pass { srcinfo: pass_src }],
                            orelse: stmts,
                            srcinfo: w_src,
                        },
                        Field::Orelse,
                    )?);
                    let par_now = tx.fwd(&par)?;
                    let wrapped = par_now.orelse()?.last();
                    let dst = par_now.after()?;
                    tx.apply(wrapped.as_block()?.move_to(&dst)?);

                    let (new_ir, f) = tx.finish();
                    cur_path = f.fwd(&par)?.path().iter().copied().collect();
                    acc = acc.then(f);
                    ir = new_ir;
                }
            }
            _ => {
                return err(
                    "can only fission past a for loop or an if statement",
                    par_s.srcinfo(),
                )
            }
        }
    }

    Ok((ir, acc))
}

/// Fuse two adjacent loops with equivalent bounds into one.
pub fn fuse_loops(
    f_cursor: &Cursor,
    s_cursor: &Cursor,
    unsafe_disable_check: bool,
    oracle: &dyn SafetyOracle,
) -> Result<(Rc<Proc>, Forward)> {
    let root = f_cursor.proc().clone();
    let adjacent = matches!(f_cursor.next(), Some(n) if n.path() == s_cursor.path());
    if !adjacent {
        return err(
            "expected the two loops to be fused to come one right after the other",
            f_cursor.stmt()?.srcinfo(),
        );
    }

    let loop1 = f_cursor.stmt()?.clone();
    let loop2 = s_cursor.stmt()?.clone();
    let (iter1, _, hi1, body1, _) = expect_seq(&loop1)?;
    let (iter2, _, hi2, body2, _) = expect_seq(&loop2)?;
    oracle.expr_eqv_in_context(hi1, f_cursor, hi2, s_cursor)?;

    let mut tx = Tx::new(&root);
    let i1 = iter1.clone();
    let s_now = tx.fwd(s_cursor)?;
    replace_reads_now(&mut tx, &[s_now], iter2, &mut |si| index_read(&i1, si))?;

    let dst = tx.fwd(f_cursor)?.body()?.after();
    let src = tx.fwd(s_cursor)?.body()?;
    tx.apply(src.move_to(&dst)?);
    let s_now = tx.fwd(s_cursor)?;
    tx.apply(s_now.delete()?);

    if !unsafe_disable_check {
        let mut env = FxHashMap::default();
        env.insert(iter2.clone(), index_read(iter1, loop1.srcinfo()));
        let body2_sub = substitute(body2, &env);
        let fused = tx.fwd(f_cursor)?.stmt()?.clone();
        oracle.fission_loop(&fused, body1, &body2_sub, false)?;
    }

    Ok(tx.finish())
}

/// Fuse two adjacent conditionals with equivalent conditions.
pub fn fuse_ifs(
    f_cursor: &Cursor,
    s_cursor: &Cursor,
    oracle: &dyn SafetyOracle,
) -> Result<(Rc<Proc>, Forward)> {
    let root = f_cursor.proc().clone();
    let adjacent = matches!(f_cursor.next(), Some(n) if n.path() == s_cursor.path());
    if !adjacent {
        return err(
            "expected the two if statements to be fused to come one right after the other",
            f_cursor.stmt()?.srcinfo(),
        );
    }
    let (cond1, cond2) = match (f_cursor.stmt()?, s_cursor.stmt()?) {
        (Stmt::If { cond: c1, .. }, Stmt::If { cond: c2, .. }) => (c1.clone(), c2.clone()),
        _ => return err("expected two if statements", f_cursor.stmt()?.srcinfo()),
    };
    oracle.expr_eqv_in_context(&cond1, f_cursor, &cond2, s_cursor)?;

    let mut tx = Tx::new(&root);
    let dst = tx.fwd(f_cursor)?.body()?.after();
    let src = tx.fwd(s_cursor)?.body()?;
    tx.apply(src.move_to(&dst)?);

    let s_orelse = tx.fwd(s_cursor)?.orelse()?;
    if !s_orelse.is_empty() {
        let dst = tx.fwd(f_cursor)?.orelse()?.after();
        tx.apply(s_orelse.move_to(&dst)?);
    }

    let s_now = tx.fwd(s_cursor)?;
    tx.apply(s_now.delete()?);
    Ok(tx.finish())
}

/// Move an `If` or `Seq` outward past its immediately enclosing scope.
pub fn lift_scope(inner_c: &Cursor, oracle: &dyn SafetyOracle) -> Result<(Rc<Proc>, Forward)> {
    let root = inner_c.proc().clone();
    let inner_s = inner_c.stmt()?.clone();
    if !matches!(inner_s, Stmt::If { .. } | Stmt::Seq { .. }) {
        return err("can only lift an if statement or a for loop", inner_s.srcinfo());
    }
    let target = if matches!(inner_s, Stmt::If { .. }) {
        "if statement"
    } else {
        "for loop"
    };

    let outer_c = match inner_c.parent() {
        Some(p) if !p.path().is_empty() => p,
        _ => return err("cannot lift scope of a top-level statement", inner_s.srcinfo()),
    };
    let outer_s = outer_c.stmt()?.clone();
    let in_orelse = inner_c.path().last().map(|s| s.field) == Some(Field::Orelse);

    let nested_err = || -> Result<(Rc<Proc>, Forward)> {
        err(
            format!("expected {} to be directly nested in parent", target),
            inner_s.srcinfo(),
        )
    };

    let mut tx = Tx::new(&root);

    match (&outer_s, &inner_s) {
        (
            Stmt::If { cond: o_cond, body: o_body, orelse: o_orelse, srcinfo: o_src },
            Stmt::If { orelse: i_orelse, .. },
        ) => {
            if !in_orelse {
                //                    if INNER:
                // if OUTER:            if OUTER: A
                //   if INNER: A        else:     C
                //   else:     B  ~>  else:
                // else: C              if OUTER: B
                //                      else:     C
                if o_body.len() > 1 {
                    return nested_err();
                }
                let arms: &[Field] = if i_orelse.is_empty() {
                    &[Field::Body]
                } else {
                    &[Field::Body, Field::Orelse]
                };
                for &arm in arms {
                    let blk = match arm {
                        Field::Body => tx.fwd(inner_c)?.body()?,
                        _ => tx.fwd(inner_c)?.orelse()?,
                    };
                    let (w_cond, w_src) = (o_cond.clone(), o_src.clone());
                    let w_orelse = alpha_rename(o_orelse);
                    tx.apply(blk.wrap(
                        move |stmts| Stmt::If {
                            cond: w_cond,
                            body: stmts,
                            orelse: w_orelse,
                            srcinfo: w_src,
                        },
                        Field::Body,
                    )?);
                }
            } else {
                // if OUTER: A          if INNER:
                // else:                  if OUTER: A
                //   if INNER: B  ~>      else:     B
                //   else: C            else:
                //                        if OUTER: A
                //                        else:     C
                if o_orelse.len() > 1 {
                    return nested_err();
                }
                let arms: &[Field] = if i_orelse.is_empty() {
                    &[Field::Body]
                } else {
                    &[Field::Body, Field::Orelse]
                };
                for &arm in arms {
                    let blk = match arm {
                        Field::Body => tx.fwd(inner_c)?.body()?,
                        _ => tx.fwd(inner_c)?.orelse()?,
                    };
                    let (w_cond, w_src) = (o_cond.clone(), o_src.clone());
                    let w_body = alpha_rename(o_body);
                    tx.apply(blk.wrap(
                        move |stmts| Stmt::If {
                            cond: w_cond,
                            body: w_body,
                            orelse: stmts,
                            srcinfo: w_src,
                        },
                        Field::Orelse,
                    )?);
                }
            }
        }
        (Stmt::If { body: o_body, orelse: o_orelse, .. }, Stmt::Seq { .. }) => {
            // if OUTER:                for INNER in _:
            //   for INNER in _: A  ~>    if OUTER: A
            if o_body.len() > 1 {
                return nested_err();
            }
            if !o_orelse.is_empty() {
                return err(
                    "cannot lift a for loop out of an if with an else clause",
                    inner_s.srcinfo(),
                );
            }
            let inner_now = tx.fwd(inner_c)?;
            let dst = inner_now.after()?;
            tx.apply(inner_now.body()?.move_to(&dst)?);
            let inner_now = tx.fwd(inner_c)?;
            let dst = tx.fwd(&outer_c)?.after()?;
            tx.apply(inner_now.move_to(&dst)?);
            let outer_now = tx.fwd(&outer_c)?;
            let dst = tx.fwd(inner_c)?.body()?.first().after()?;
            tx.apply(outer_now.move_to(&dst)?);
            let pass_c = tx.fwd(inner_c)?.body()?.first();
            tx.apply(pass_c.delete()?);
            return Ok(tx.finish());
        }
        (
            Stmt::Seq { iter: o_iter, lo: o_lo, hi: o_hi, body: o_body, srcinfo: o_src },
            Stmt::If { cond: i_cond, orelse: i_orelse, .. },
        ) => {
            // for OUTER in _:      if INNER:
            //   if INNER: A    ~>    for OUTER in _: A
            //   else:     B        else:
            //                        for OUTER in _: B
            if o_body.len() > 1 {
                return nested_err();
            }
            if free_vars_expr(i_cond).contains(o_iter) {
                return err("if statement depends on iteration variable", inner_s.srcinfo());
            }

            let arms: &[Field] = if i_orelse.is_empty() {
                &[Field::Body]
            } else {
                &[Field::Body, Field::Orelse]
            };
            for &arm in arms {
                // Each arm gets its own loop with a fresh iterator.
                let iter_fresh = o_iter.copy();
                let blk = match arm {
                    Field::Body => tx.fwd(inner_c)?.body()?,
                    _ => tx.fwd(inner_c)?.orelse()?,
                };
                let ifr = iter_fresh.clone();
                replace_reads_now(&mut tx, &blk.cursors(), o_iter, &mut |si| {
                    index_read(&ifr, si)
                })?;
                let blk = match arm {
                    Field::Body => tx.fwd(inner_c)?.body()?,
                    _ => tx.fwd(inner_c)?.orelse()?,
                };
                let (w_lo, w_hi, w_src) = (o_lo.clone(), o_hi.clone(), o_src.clone());
                tx.apply(blk.wrap(
                    move |stmts| Stmt::Seq {
                        iter: iter_fresh,
                        lo: w_lo,
                        hi: w_hi,
                        body: stmts,
                        srcinfo: w_src,
                    },
                    Field::Body,
                )?);
            }
        }
        (
            Stmt::Seq { iter: o_iter, body: o_body, .. },
            Stmt::Seq { lo: i_lo, hi: i_hi, .. },
        ) => {
            // for OUTER in _:          for INNER in _:
            //   for INNER in _: A  ~>    for OUTER in _: A
            if o_body.len() > 1 {
                return nested_err();
            }
            let bound_reads: Vec<Sym> = reads_of_expr(i_lo)
                .into_iter()
                .chain(reads_of_expr(i_hi))
                .map(|(s, _)| s)
                .collect();
            if bound_reads.contains(o_iter) {
                return err(
                    "inner loop's lo or hi depends on outer loop's iteration variable",
                    inner_s.srcinfo(),
                );
            }
            oracle.reorder_loops(&outer_c)?;

            let inner_now = tx.fwd(inner_c)?;
            let dst = tx.fwd(&outer_c)?.after()?;
            tx.apply(inner_now.move_to(&dst)?);
            let outer_now = tx.fwd(&outer_c)?;
            let dst = tx.fwd(inner_c)?.body()?.first().before()?;
            tx.apply(outer_now.move_to(&dst)?);
            let inner_body = tx.fwd(inner_c)?.body()?;
            if inner_body.len() > 1 {
                let rest = inner_body.slice(1, inner_body.len())?;
                let dst = tx.fwd(&outer_c)?.body()?.first().after()?;
                tx.apply(rest.move_to(&dst)?);
            }
            let pass_c = tx.fwd(&outer_c)?.body()?.first();
            tx.apply(pass_c.delete()?);
            return Ok(tx.finish());
        }
        _ => return err("cannot lift scope here", inner_s.srcinfo()),
    }

    // Common tail: the rebuilt inner statement replaces the outer one.
    let inner_now = tx.fwd(inner_c)?;
    let dst = tx.fwd(&outer_c)?.after()?;
    tx.apply(inner_now.move_to(&dst)?);
    let outer_now = tx.fwd(&outer_c)?;
    tx.apply(outer_now.delete()?);
    Ok(tx.finish())
}

/// Replace a loop by its body when the body does not use the iterator and is
/// idempotent.  A guard is inserted when the loop may be zero-trip.
pub fn remove_loop(loop_c: &Cursor, oracle: &dyn SafetyOracle) -> Result<(Rc<Proc>, Forward)> {
    let root = loop_c.proc().clone();
    let s = loop_c.stmt()?.clone();
    let (iter, lo, hi, body, srcinfo) = expect_seq(&s)?;

    if free_vars_stmts(body).contains(iter) {
        return err(
            format!("cannot remove the loop because its body uses {}", iter),
            srcinfo,
        );
    }
    oracle.idempotent(body)?;

    let mut tx = Tx::new(&root);
    if oracle.is_positive(loop_c, hi).is_err() {
        let cond = boolop(BinOp::Gt, hi.clone(), lo.clone(), srcinfo);
        let w_src = srcinfo.clone();
        let blk = tx.fwd(loop_c)?.body()?;
        tx.apply(blk.wrap(move |stmts| if_stmt(cond, stmts, w_src), Field::Body)?);
    }

    let loop_now = tx.fwd(loop_c)?;
    let dst = loop_now.after()?;
    tx.apply(loop_now.body()?.move_to(&dst)?);
    let loop_now = tx.fwd(loop_c)?;
    tx.apply(loop_now.delete()?);
    Ok(tx.finish())
}

/// Wrap an idempotent statement in `for iter in [0, hi)`, optionally guarded
/// by `iter == 0`.
pub fn add_loop(
    stmt_c: &Cursor,
    var: &str,
    hi: Expr,
    guard: bool,
    unsafe_disable_check: bool,
    oracle: &dyn SafetyOracle,
) -> Result<(Rc<Proc>, Forward)> {
    let root = stmt_c.proc().clone();
    let s = stmt_c.stmt()?.clone();
    if !unsafe_disable_check {
        oracle.idempotent(std::slice::from_ref(&s))?;
        oracle.is_positive(stmt_c, &hi)?;
    }
    let srcinfo = s.srcinfo().clone();
    let sym = Sym::fresh(var);

    let mut tx = Tx::new(&root);
    if guard {
        let cond = boolop(
            BinOp::Eq,
            index_read(&sym, &srcinfo),
            cnst(0, &srcinfo),
            &srcinfo,
        );
        let w_src = srcinfo.clone();
        let blk = stmt_c.as_block()?;
        tx.apply(blk.wrap(move |stmts| if_stmt(cond, stmts, w_src), Field::Body)?);
    }
    let c = tx.fwd(stmt_c)?;
    let blk = if guard {
        // the statement now sits inside the guard; the loop goes around it
        c.parent()
            .ok_or_else(|| SchedulingError::new("guard wrapping failed", &srcinfo))?
            .as_block()?
    } else {
        c.as_block()?
    };
    let (w_sym, w_hi, w_src) = (sym, hi, srcinfo);
    tx.apply(blk.wrap(
        move |stmts| Stmt::Seq {
            iter: w_sym,
            lo: Expr::int(0, Type::Index, &w_src),
            hi: w_hi,
            body: stmts,
            srcinfo: w_src.clone(),
        },
        Field::Body,
    )?);
    Ok(tx.finish())
}

/// Replace `for i in [0, N)` by `for i in [0, bound): if i < N`, where
/// `bound` is a constant upper envelope derived from `N`.
pub fn bound_and_guard(loop_c: &Cursor) -> Result<(Rc<Proc>, Forward)> {
    let root = loop_c.proc().clone();
    let s = loop_c.stmt()?.clone();
    let (iter, _lo, hi, _body, srcinfo) = expect_seq(&s)?;

    // The derivable envelope: `x % K` is bounded by the constant `K`.
    let bound = match hi {
        Expr::BinOp { op: BinOp::Mod, rhs, .. } => (**rhs).clone(),
        _ => {
            return err(
                format!("could not derive a constant bound on {}", hi),
                srcinfo,
            )
        }
    };

    let cond = boolop(BinOp::Lt, index_read(iter, srcinfo), hi.clone(), srcinfo);
    let w_src = srcinfo.clone();

    let mut tx = Tx::new(&root);
    let blk = tx.fwd(loop_c)?.body()?;
    tx.apply(blk.wrap(move |stmts| if_stmt(cond, stmts, w_src), Field::Body)?);
    let c = tx.fwd(loop_c)?;
    tx.apply(c.child(Field::Hi, 0).replace(NodeValue::Expr(bound))?);
    Ok(tx.finish())
}

/// Wrap a statement in a cascade `if c1: s else: if c2: s else: ... else: s`.
pub fn specialize(stmt_c: &Cursor, conds: Vec<Expr>) -> Result<(Rc<Proc>, Forward)> {
    let s = stmt_c.stmt()?.clone();
    if conds.is_empty() {
        return err("must add at least one condition", s.srcinfo());
    }

    fn is_valid_condition(e: &Expr) -> bool {
        match e {
            Expr::BinOp { op, lhs, rhs, .. } if op.is_logic() => {
                is_valid_condition(lhs) && is_valid_condition(rhs)
            }
            Expr::BinOp { op, lhs, rhs, .. } if op.is_comparison() => {
                lhs.ty().is_indexable() && rhs.ty().is_indexable()
            }
            _ => false,
        }
    }

    let mut else_br = alpha_rename(std::slice::from_ref(&s));
    for cond in conds.iter().rev() {
        if !is_valid_condition(cond) {
            return err("invalid specialization condition", cond.srcinfo());
        }
        let then_br = alpha_rename(std::slice::from_ref(&s));
        else_br = vec![Stmt::If {
            cond: cond.clone(),
            body: then_br,
            orelse: else_br,
            srcinfo: s.srcinfo().clone(),
        }];
    }

    Ok(stmt_c.replace_stmts(else_br)?)
}

/// Prove the condition of an `If` constant and replace the statement by the
/// selected arm.
pub fn assert_if(
    if_c: &Cursor,
    value: bool,
    oracle: &dyn SafetyOracle,
) -> Result<(Rc<Proc>, Forward)> {
    let root = if_c.proc().clone();
    let s = if_c.stmt()?.clone();
    let cond = match &s {
        Stmt::If { cond, .. } => cond.clone(),
        _ => return err("expected an if statement", s.srcinfo()),
    };
    let target = Expr::bool(value, s.srcinfo());
    oracle.expr_eqv_in_context(&cond, if_c, &target, if_c)?;

    let mut tx = Tx::new(&root);
    let c = tx.fwd(if_c)?;
    let arm = if value { c.body()? } else { c.orelse()? };
    if !arm.is_empty() {
        let dst = c.before()?;
        tx.apply(arm.move_to(&dst)?);
    }
    let c = tx.fwd(if_c)?;
    tx.apply(c.delete()?);
    Ok(tx.finish())
}

/// Purely syntactic guard insertion; performs no semantic check.
pub fn add_unsafe_guard(stmt_c: &Cursor, cond: Expr) -> Result<(Rc<Proc>, Forward)> {
    let srcinfo = stmt_c.stmt()?.srcinfo().clone();
    let blk = stmt_c.as_block()?;
    Ok(blk.wrap(move |stmts| if_stmt(cond, stmts, srcinfo), Field::Body)?)
}

/// Insert a `Pass` at a gap.
pub fn insert_pass(gap: &GapCursor) -> Result<(Rc<Proc>, Forward)> {
    let srcinfo = gap
        .parent()
        .stmt()
        .map(|s| s.srcinfo().clone())
        .unwrap_or_else(|_| SrcInfo::unknown());
    Ok(gap.insert(vec![Stmt::Pass { srcinfo }])?)
}

/// Remove every `Pass`, and any loop whose body that removal leaves empty.
pub fn delete_pass(root: &Rc<Proc>) -> Result<(Rc<Proc>, Forward)> {
    let mut tx = Tx::new(root);
    loop {
        let ir = tx.ir().clone();
        let mut victim: Option<Path> = None;
        for_each_node(&ir, &Path::new(), &mut |path, node| {
            if victim.is_some() {
                return;
            }
            match node {
                NodeRef::Stmt(Stmt::Pass { .. }) => {
                    let c = Cursor::from_path(&ir, path.clone());
                    // deletable only when siblings remain
                    if c.sibling_count().map(|n| n > 1).unwrap_or(false) {
                        victim = Some(path.clone());
                    }
                }
                NodeRef::Stmt(Stmt::Seq { body, .. }) => {
                    if body.iter().all(|s| s.is_pass()) {
                        victim = Some(path.clone());
                    }
                }
                _ => {}
            }
        });
        match victim {
            None => break,
            Some(path) => {
                let c = Cursor::from_path(&ir, path);
                tx.apply(c.delete()?);
            }
        }
    }
    Ok(tx.finish())
}
