//! Allocation and memory directives: lifting allocations, reshaping buffer
//! dimensions, unrolling buffers, staging regions to scratch, buffer reuse,
//! and window inlining.

use std::rc::Rc;

use log::debug;

use loopsched_ir::ir::{BinOp, Expr, Mem, Proc, Stmt, WAccess};
use loopsched_ir::types::{Type, WindowType};
use loopsched_ir::{SrcInfo, Sym};

use crate::cursor::{BlockCursor, Cursor, Field, Forward, NodeRef, NodeValue};
use crate::error::{Result, SchedulingError};
use crate::oracle::{RwFlags, SafetyOracle};
use crate::rewrite::{collect_accesses, is_call_argument, rest_of_block, AccessSite, Tx};

fn err<T>(msg: impl Into<String>, srcinfo: &SrcInfo) -> Result<T> {
    Err(SchedulingError::new(msg, srcinfo).into())
}

fn expect_alloc(c: &Cursor) -> Result<(Sym, Type, Option<Mem>, SrcInfo)> {
    match c.stmt()? {
        Stmt::Alloc { name, ty, mem, srcinfo } => {
            Ok((name.clone(), ty.clone(), mem.clone(), srcinfo.clone()))
        }
        s => err("expected an allocation", s.srcinfo()),
    }
}

fn index_read(sym: &Sym, srcinfo: &SrcInfo) -> Expr {
    Expr::read(sym, Type::Index, srcinfo)
}

fn add(lhs: Expr, rhs: Expr, srcinfo: &SrcInfo) -> Expr {
    Expr::binop(BinOp::Add, lhs, rhs, Type::Index, srcinfo)
}

fn sub(lhs: Expr, rhs: Expr, srcinfo: &SrcInfo) -> Expr {
    Expr::binop(BinOp::Sub, lhs, rhs, Type::Index, srcinfo)
}

/// Apply per-kind rewrites to every access of `buf` in `region` (cursors
/// against the directive's input root).  Each callback sees the node as it
/// currently stands and returns its replacement, or `None` to leave it.
#[allow(clippy::too_many_arguments)]
fn rewrite_accesses(
    tx: &mut Tx,
    root: &Rc<Proc>,
    region: &[Cursor],
    buf: &Sym,
    on_read: &mut dyn FnMut(&Expr, bool) -> Result<Option<Expr>>,
    on_window: &mut dyn FnMut(&Expr, bool) -> Result<Option<Expr>>,
    on_stride: &mut dyn FnMut(&Expr) -> Result<Option<Expr>>,
    on_write: &mut dyn FnMut(&Stmt) -> Result<Option<Stmt>>,
) -> Result<()> {
    let sites = collect_accesses(root, region, buf);
    for site in sites.iter().rev() {
        let in_call = is_call_argument(site.path());
        let c = tx.fwd(&Cursor::from_path(root, site.path().clone()))?;
        match site {
            AccessSite::Read(_) => {
                if let Some(new) = on_read(c.expr()?, in_call)? {
                    tx.apply(c.replace(NodeValue::Expr(new))?);
                }
            }
            AccessSite::Window(_) => {
                if let Some(new) = on_window(c.expr()?, in_call)? {
                    tx.apply(c.replace(NodeValue::Expr(new))?);
                }
            }
            AccessSite::Stride(_) => {
                if let Some(new) = on_stride(c.expr()?)? {
                    tx.apply(c.replace(NodeValue::Expr(new))?);
                }
            }
            AccessSite::Write(_) => {
                if let Some(new) = on_write(c.stmt()?)? {
                    tx.apply(c.replace_stmts(vec![new])?);
                }
            }
        }
    }
    Ok(())
}

fn no_window(e: &Expr, buf: &Sym) -> Result<Option<Expr>> {
    err(
        format!("cannot reshape {} because the buffer is windowed later on", buf),
        e.srcinfo(),
    )
}

fn no_stride(e: &Expr, buf: &Sym) -> Result<Option<Expr>> {
    err(
        format!("cannot reshape {} because its strides are queried later on", buf),
        e.srcinfo(),
    )
}

/// The block of statements after the allocation, in the current tree.
fn following_block(tx: &Tx, alloc_c: &Cursor) -> Result<BlockCursor> {
    let now = tx.fwd(alloc_c)?;
    let rest = rest_of_block(&now)?;
    Ok(rest.slice(1, rest.len())?)
}

// ---------------------------------------------------------------------------

/// Move an allocation outward past `n_lifts` enclosing scopes, without
/// changing its shape.
pub fn lift_alloc_simple(alloc_c: &Cursor, n_lifts: usize) -> Result<(Rc<Proc>, Forward)> {
    let (name, ty, _mem, srcinfo) = expect_alloc(alloc_c)?;
    let shape_fv: rustc_hash::FxHashSet<Sym> = ty
        .shape()
        .iter()
        .flat_map(loopsched_ir::uses::free_vars_expr)
        .collect();

    let mut stmt_c = alloc_c.clone();
    for i in 0..n_lifts {
        let parent = stmt_c.parent().filter(|p| !p.path().is_empty());
        stmt_c = match parent {
            Some(p) => p,
            None => {
                return err(
                    format!(
                        "specified lift level {} is more than {}, the number of loops and ifs above the allocation",
                        n_lifts, i
                    ),
                    &srcinfo,
                )
            }
        };
        if let Stmt::Seq { iter, .. } = stmt_c.stmt()? {
            if shape_fv.contains(iter) {
                return err(
                    format!(
                        "cannot lift the allocation of {} past the loop over {} because its size depends on it",
                        name, iter
                    ),
                    &srcinfo,
                );
            }
        }
    }

    let gap = stmt_c.before()?;
    Ok(alloc_c.move_to(&gap)?)
}

/// Which end of the shape receives the new extents in [`lift_alloc`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LiftMode {
    /// New extents are prepended.
    Row,
    /// New extents are appended.
    Col,
}

/// Move an allocation outward past `n_lifts` enclosing scopes, extending its
/// shape with the extents of the traversed loops and indexing every access
/// by the loop iterators.
pub fn lift_alloc(
    alloc_c: &Cursor,
    n_lifts: usize,
    mode: LiftMode,
    size: Option<i64>,
    keep_dims: bool,
) -> Result<(Rc<Proc>, Forward)> {
    let root = alloc_c.proc().clone();
    let (name, ty, _mem, srcinfo) = expect_alloc(alloc_c)?;

    // Walk up the control context, outermost last.
    let mut scopes: Vec<Cursor> = Vec::new();
    let mut c = alloc_c.clone();
    for i in 0..n_lifts {
        let parent = c.parent().filter(|p| !p.path().is_empty());
        c = match parent {
            Some(p) => p,
            None => {
                return err(
                    format!(
                        "specified lift level {} is higher than the number of enclosing scopes {}",
                        n_lifts, i
                    ),
                    &srcinfo,
                )
            }
        };
        scopes.push(c.clone());
    }
    let lift_site = scopes.last().cloned().unwrap_or_else(|| alloc_c.clone());

    // Extents and iterators of the traversed loops, outermost first.
    let mut idxs: Vec<Sym> = Vec::new();
    let mut rngs: Vec<Expr> = Vec::new();
    for scope in scopes.iter().rev() {
        match scope.stmt()? {
            // guards do not affect the allocation
            Stmt::If { .. } => continue,
            Stmt::Seq { iter, hi, .. } => {
                if !keep_dims {
                    continue;
                }
                idxs.push(iter.clone());
                let rng = match size {
                    None => hi.clone(),
                    Some(bound) => {
                        let fits = match hi.as_const_int() {
                            Some(v) => v <= bound,
                            None => match hi {
                                Expr::BinOp { op: BinOp::Mod, rhs, .. } => {
                                    matches!(rhs.as_const_int(), Some(k) if k <= bound)
                                }
                                _ => false,
                            },
                        };
                        if !fits {
                            return err(
                                format!("lift size {} cannot be less than the loop bound {}", bound, hi),
                                &srcinfo,
                            );
                        }
                        Expr::int(bound, Type::Int, hi.srcinfo())
                    }
                };
                rngs.push(rng);
            }
            s => return err("can only lift past loops and ifs", s.srcinfo()),
        }
    }

    if !keep_dims {
        // shape unchanged; behave as a plain lift with the same checks
        let shape_fv: rustc_hash::FxHashSet<Sym> = ty
            .shape()
            .iter()
            .flat_map(loopsched_ir::uses::free_vars_expr)
            .collect();
        for scope in &scopes {
            if let Stmt::Seq { iter, .. } = scope.stmt()? {
                if shape_fv.contains(iter) {
                    return err(
                        format!(
                            "cannot lift the allocation of {} past the loop over {} because its size depends on it",
                            name, iter
                        ),
                        &srcinfo,
                    );
                }
            }
        }
    }

    let old_shape = ty.shape().to_vec();
    let basetype = ty.basetype().clone();
    let new_shape: Vec<Expr> = match mode {
        LiftMode::Row => rngs.iter().cloned().chain(old_shape.iter().cloned()).collect(),
        LiftMode::Col => old_shape.iter().cloned().chain(rngs.iter().cloned()).collect(),
    };
    let new_ty = if new_shape.is_empty() {
        basetype.clone()
    } else {
        Type::tensor(new_shape, false, basetype)
    };

    let idx_mode = |access: Vec<Expr>, orig: Vec<Expr>| -> Vec<Expr> {
        match mode {
            LiftMode::Row => access.into_iter().chain(orig).collect(),
            LiftMode::Col => orig.into_iter().chain(access).collect(),
        }
    };
    let waccess_mode = |access: Vec<WAccess>, orig: Vec<WAccess>| -> Vec<WAccess> {
        match mode {
            LiftMode::Row => access.into_iter().chain(orig).collect(),
            LiftMode::Col => orig.into_iter().chain(access).collect(),
        }
    };

    let mut tx = Tx::new(&root);
    tx.apply(
        alloc_c
            .child(Field::Ty, 0)
            .replace(NodeValue::Ty(new_ty.clone()))?,
    );

    // All uses live inside the outermost traversed scope.
    let region = vec![lift_site.clone()];
    let idxs_ref = &idxs;
    let new_ty_ref = &new_ty;
    let name_ref = &name;
    rewrite_accesses(
        &mut tx,
        &root,
        &region,
        &name,
        &mut |e, in_call| {
            let (idx, ety, srcinfo) = match e {
                Expr::Read { idx, ty, srcinfo, .. } => (idx, ty, srcinfo),
                _ => unreachable!(),
            };
            if idxs_ref.is_empty() {
                return Ok(None);
            }
            let access: Vec<Expr> = idxs_ref.iter().map(|i| index_read(i, srcinfo)).collect();
            if ety.is_real_scalar() {
                Ok(Some(Expr::Read {
                    name: name_ref.clone(),
                    idx: idx_mode(access, idx.clone()),
                    ty: ety.clone(),
                    srcinfo: srcinfo.clone(),
                }))
            } else if in_call {
                // A whole-buffer argument becomes a window at the current
                // iteration.
                let points: Vec<WAccess> = access
                    .into_iter()
                    .map(|pt| WAccess::Point {
                        pt,
                        srcinfo: srcinfo.clone(),
                    })
                    .collect();
                let full: Vec<WAccess> = ety
                    .shape()
                    .iter()
                    .map(|hi| WAccess::Interval {
                        lo: Expr::int(0, Type::Int, srcinfo),
                        hi: hi.clone(),
                        srcinfo: srcinfo.clone(),
                    })
                    .collect();
                let widx = waccess_mode(points, full);
                let win_ty = Type::Window(WindowType {
                    src_type: Box::new(new_ty_ref.clone()),
                    as_tensor: Box::new(ety.as_tensor().clone()),
                    src_buf: name_ref.clone(),
                    idx: widx.clone(),
                });
                Ok(Some(Expr::Window {
                    name: name_ref.clone(),
                    idx: widx,
                    ty: win_ty,
                    srcinfo: srcinfo.clone(),
                }))
            } else {
                err("unsupported buffer use under lift_alloc", srcinfo)
            }
        },
        &mut |e, _| {
            let (idx, ety, srcinfo) = match e {
                Expr::Window { idx, ty, srcinfo, .. } => (idx, ty, srcinfo),
                _ => unreachable!(),
            };
            if idxs_ref.is_empty() {
                return Ok(None);
            }
            let points: Vec<WAccess> = idxs_ref
                .iter()
                .map(|i| WAccess::Point {
                    pt: index_read(i, srcinfo),
                    srcinfo: srcinfo.clone(),
                })
                .collect();
            let widx = waccess_mode(points, idx.clone());
            let win_ty = Type::Window(WindowType {
                src_type: Box::new(new_ty_ref.clone()),
                as_tensor: Box::new(ety.as_tensor().clone()),
                src_buf: name_ref.clone(),
                idx: widx.clone(),
            });
            Ok(Some(Expr::Window {
                name: name_ref.clone(),
                idx: widx,
                ty: win_ty,
                srcinfo: srcinfo.clone(),
            }))
        },
        &mut |_| Ok(None),
        &mut |s| {
            if idxs_ref.is_empty() {
                return Ok(None);
            }
            let mut new = s.clone();
            match &mut new {
                Stmt::Assign { idx, srcinfo, .. } | Stmt::Reduce { idx, srcinfo, .. } => {
                    let access: Vec<Expr> =
                        idxs_ref.iter().map(|i| index_read(i, srcinfo)).collect();
                    *idx = idx_mode(access, idx.clone());
                }
                _ => unreachable!(),
            }
            Ok(Some(new))
        },
    )?;

    // Finally hoist the allocation itself.
    let alloc_now = tx.fwd(alloc_c)?;
    let dst = tx.fwd(&lift_site)?.before()?;
    tx.apply(alloc_now.move_to(&dst)?);

    debug!("lift_alloc {} by {} ({:?})", name, n_lifts, mode);
    Ok(tx.finish())
}

/// Prepend a dimension of extent `new_dim` to an allocation and index every
/// access with `indexing`.
pub fn expand_dim(
    alloc_c: &Cursor,
    new_dim: Expr,
    indexing: Expr,
    oracle: &dyn SafetyOracle,
) -> Result<(Rc<Proc>, Forward)> {
    let root = alloc_c.proc().clone();
    let (name, ty, _mem, _srcinfo) = expect_alloc(alloc_c)?;

    oracle.is_positive(alloc_c, &new_dim)?;

    let mut shape = vec![new_dim];
    shape.extend(ty.shape().iter().cloned());
    let new_ty = Type::tensor(shape, false, ty.basetype().clone());

    let mut tx = Tx::new(&root);
    tx.apply(alloc_c.child(Field::Ty, 0).replace(NodeValue::Ty(new_ty))?);

    let region = rest_of_block(alloc_c)?.cursors();
    let ind = &indexing;
    rewrite_accesses(
        &mut tx,
        &root,
        &region,
        &name,
        &mut |e, in_call| {
            let (idx, ety, srcinfo) = match e {
                Expr::Read { idx, ty, srcinfo, .. } => (idx, ty, srcinfo),
                _ => unreachable!(),
            };
            if in_call && idx.is_empty() {
                return err(
                    "cannot expand a buffer that is passed whole to a sub-procedure",
                    srcinfo,
                );
            }
            let mut new_idx = vec![ind.clone()];
            new_idx.extend(idx.iter().cloned());
            Ok(Some(Expr::Read {
                name: name.clone(),
                idx: new_idx,
                ty: ety.clone(),
                srcinfo: srcinfo.clone(),
            }))
        },
        &mut |e, _| {
            let (idx, ety, srcinfo) = match e {
                Expr::Window { idx, ty, srcinfo, .. } => (idx, ty, srcinfo),
                _ => unreachable!(),
            };
            let mut new_idx = vec![WAccess::Point {
                pt: ind.clone(),
                srcinfo: srcinfo.clone(),
            }];
            new_idx.extend(idx.iter().cloned());
            Ok(Some(Expr::Window {
                name: name.clone(),
                idx: new_idx,
                ty: ety.clone(),
                srcinfo: srcinfo.clone(),
            }))
        },
        &mut |_| Ok(None),
        &mut |s| {
            let mut new = s.clone();
            match &mut new {
                Stmt::Assign { idx, .. } | Stmt::Reduce { idx, .. } => {
                    idx.insert(0, ind.clone());
                }
                _ => unreachable!(),
            }
            Ok(Some(new))
        },
    )?;

    let alloc_now = tx.fwd(alloc_c)?;
    let following = following_block(&tx, alloc_c)?;
    oracle.bounds(&alloc_now, &following)?;

    Ok(tx.finish())
}

/// Split one constant dimension `d` into `[d/q, q]`; accesses become
/// `[e/q, e%q]`.
pub fn divide_dim(alloc_c: &Cursor, dim_idx: usize, quotient: i64) -> Result<(Rc<Proc>, Forward)> {
    let root = alloc_c.proc().clone();
    let (name, ty, _mem, srcinfo) = expect_alloc(alloc_c)?;

    let shape = ty.shape();
    if dim_idx >= shape.len() {
        return err(format!("no dimension {} on {}", dim_idx, name), &srcinfo);
    }
    let dim = &shape[dim_idx];
    let dim_val = match dim.as_const_int() {
        Some(v) => v,
        None => return err(format!("cannot divide non-literal dimension: {}", dim), &srcinfo),
    };
    if quotient <= 0 || dim_val % quotient != 0 {
        return err(
            format!("cannot divide {} evenly by {}", dim_val, quotient),
            &srcinfo,
        );
    }

    let mut new_shape = shape.to_vec();
    new_shape.splice(
        dim_idx..dim_idx + 1,
        [
            Expr::int(dim_val / quotient, Type::Int, dim.srcinfo()),
            Expr::int(quotient, Type::Int, dim.srcinfo()),
        ],
    );
    let new_ty = Type::tensor(new_shape, false, ty.basetype().clone());

    let remap = move |idx: &[Expr]| -> Vec<Expr> {
        let orig = idx[dim_idx].clone();
        let srcinfo = orig.srcinfo().clone();
        let q = Expr::int(quotient, Type::Int, &srcinfo);
        let hi = Expr::binop(BinOp::Div, orig.clone(), q.clone(), orig.ty().clone(), &srcinfo);
        let lo = Expr::binop(BinOp::Mod, orig, q, hi.ty().clone(), &srcinfo);
        let mut out = idx.to_vec();
        out.splice(dim_idx..dim_idx + 1, [hi, lo]);
        out
    };

    let mut tx = Tx::new(&root);
    tx.apply(alloc_c.child(Field::Ty, 0).replace(NodeValue::Ty(new_ty))?);

    let region = rest_of_block(alloc_c)?.cursors();
    rewrite_accesses(
        &mut tx,
        &root,
        &region,
        &name,
        &mut |e, _| {
            let (idx, ety, srcinfo) = match e {
                Expr::Read { idx, ty, srcinfo, .. } => (idx, ty, srcinfo),
                _ => unreachable!(),
            };
            if idx.is_empty() {
                return err(
                    format!("cannot divide {} because the buffer is passed as an argument", name),
                    srcinfo,
                );
            }
            Ok(Some(Expr::Read {
                name: name.clone(),
                idx: remap(idx),
                ty: ety.clone(),
                srcinfo: srcinfo.clone(),
            }))
        },
        &mut |e, _| no_window(e, &name),
        &mut |e| no_stride(e, &name),
        &mut |s| {
            let mut new = s.clone();
            match &mut new {
                Stmt::Assign { idx, .. } | Stmt::Reduce { idx, .. } => {
                    *idx = remap(idx);
                }
                _ => unreachable!(),
            }
            Ok(Some(new))
        },
    )?;

    Ok(tx.finish())
}

/// Collapse two dimensions, the second of which has a literal extent `L`;
/// accesses `[..a.., ..b..]` become `L·a + b`.
pub fn multiply_dim(
    alloc_c: &Cursor,
    hi_idx: usize,
    lo_idx: usize,
) -> Result<(Rc<Proc>, Forward)> {
    let root = alloc_c.proc().clone();
    let (name, ty, _mem, srcinfo) = expect_alloc(alloc_c)?;

    let shape = ty.shape();
    if hi_idx == lo_idx || hi_idx >= shape.len() || lo_idx >= shape.len() {
        return err("multiply_dim requires two distinct dimensions", &srcinfo);
    }
    let lo_dim = &shape[lo_idx];
    let lo_val = match lo_dim.as_const_int() {
        Some(v) => v,
        None => {
            return err(
                format!("cannot multiply with non-literal second dimension: {}", lo_dim),
                &srcinfo,
            )
        }
    };

    let prod = Expr::binop(
        BinOp::Mul,
        lo_dim.clone(),
        shape[hi_idx].clone(),
        shape[hi_idx].ty().clone(),
        shape[hi_idx].srcinfo(),
    );
    let mut new_shape = shape.to_vec();
    new_shape[hi_idx] = prod;
    new_shape.remove(lo_idx);
    let new_ty = Type::tensor(new_shape, false, ty.basetype().clone());

    let remap = move |idx: &[Expr]| -> Vec<Expr> {
        let hi = idx[hi_idx].clone();
        let lo = idx[lo_idx].clone();
        let srcinfo = hi.srcinfo().clone();
        let mul = Expr::binop(
            BinOp::Mul,
            Expr::int(lo_val, Type::Int, &srcinfo),
            hi,
            Type::Index,
            &srcinfo,
        );
        let merged = add(mul, lo, &srcinfo);
        let mut out = idx.to_vec();
        out[hi_idx] = merged;
        out.remove(lo_idx);
        out
    };

    let mut tx = Tx::new(&root);
    tx.apply(alloc_c.child(Field::Ty, 0).replace(NodeValue::Ty(new_ty))?);

    let region = rest_of_block(alloc_c)?.cursors();
    rewrite_accesses(
        &mut tx,
        &root,
        &region,
        &name,
        &mut |e, _| {
            let (idx, ety, srcinfo) = match e {
                Expr::Read { idx, ty, srcinfo, .. } => (idx, ty, srcinfo),
                _ => unreachable!(),
            };
            if idx.is_empty() {
                return err(
                    format!("cannot multiply {} because the buffer is passed as an argument", name),
                    srcinfo,
                );
            }
            Ok(Some(Expr::Read {
                name: name.clone(),
                idx: remap(idx),
                ty: ety.clone(),
                srcinfo: srcinfo.clone(),
            }))
        },
        &mut |e, _| no_window(e, &name),
        &mut |e| no_stride(e, &name),
        &mut |s| {
            let mut new = s.clone();
            match &mut new {
                Stmt::Assign { idx, .. } | Stmt::Reduce { idx, .. } => {
                    *idx = remap(idx);
                }
                _ => unreachable!(),
            }
            Ok(Some(new))
        },
    )?;

    Ok(tx.finish())
}

fn check_permutation(perm: &[usize], rank: usize, srcinfo: &SrcInfo) -> Result<()> {
    let mut seen = vec![false; rank];
    if perm.len() != rank {
        return err(
            format!("permutation names {} dimensions, buffer has {}", perm.len(), rank),
            srcinfo,
        );
    }
    for &p in perm {
        if p >= rank || seen[p] {
            return err("not a permutation of the buffer's dimensions", srcinfo);
        }
        seen[p] = true;
    }
    Ok(())
}

/// Reorder the dimensions of an allocation; every access, write, and stride
/// query is permuted consistently.  The identity permutation is a no-op.
pub fn rearrange_dim(alloc_c: &Cursor, perm: Vec<usize>) -> Result<(Rc<Proc>, Forward)> {
    let root = alloc_c.proc().clone();
    let (name, ty, _mem, srcinfo) = expect_alloc(alloc_c)?;
    check_permutation(&perm, ty.rank(), &srcinfo)?;

    if perm.iter().enumerate().all(|(i, &p)| i == p) {
        return Ok((root.clone(), Forward::identity(&root)));
    }

    let new_ty = Type::tensor(
        perm.iter().map(|&i| ty.shape()[i].clone()).collect(),
        false,
        ty.basetype().clone(),
    );

    let mut tx = Tx::new(&root);
    tx.apply(alloc_c.child(Field::Ty, 0).replace(NodeValue::Ty(new_ty))?);

    let region = rest_of_block(alloc_c)?.cursors();
    permute_accesses(&mut tx, &root, &region, &name, &perm)?;
    Ok(tx.finish())
}

/// [`rearrange_dim`] for a tensor-typed procedure argument: the whole body
/// is in the buffer's scope, and the signature is rewritten in place.
pub fn rearrange_dim_arg(
    root: &Rc<Proc>,
    arg_name: &Sym,
    perm: Vec<usize>,
) -> Result<(Rc<Proc>, Forward)> {
    let arg = root
        .arg(arg_name)
        .ok_or_else(|| SchedulingError::misc(format!("no argument named {}", arg_name)))?;
    check_permutation(&perm, arg.ty.rank(), &arg.srcinfo)?;
    if perm.iter().enumerate().all(|(i, &p)| i == p) {
        return Ok((root.clone(), Forward::identity(root)));
    }
    let (is_window, elem) = match &arg.ty {
        Type::Tensor(tt) => (tt.is_window, tt.elem.as_ref().clone()),
        _ => {
            return Err(SchedulingError::new(
                "can only permute a tensor-typed argument",
                &arg.srcinfo,
            )
            .into())
        }
    };
    let new_ty = Type::tensor(
        perm.iter().map(|&i| arg.ty.shape()[i].clone()).collect(),
        is_window,
        elem,
    );

    let mut tx = Tx::new(root);
    let region = Cursor::root(root).body()?.cursors();
    permute_accesses(&mut tx, root, &region, arg_name, &perm)?;

    let (ir, fwd) = tx.finish();
    let mut proc = (*ir).clone();
    for a in &mut proc.args {
        if &a.name == arg_name {
            a.ty = new_ty.clone();
        }
    }
    let new = Rc::new(proc);
    Ok((new.clone(), fwd.then(Forward::retarget(&ir, &new))))
}

fn permute_accesses(
    tx: &mut Tx,
    root: &Rc<Proc>,
    region: &[Cursor],
    name: &Sym,
    perm: &[usize],
) -> Result<()> {
    let permute_exprs = |es: &[Expr]| -> Vec<Expr> { perm.iter().map(|&i| es[i].clone()).collect() };
    let permute_w =
        |ws: &[WAccess]| -> Vec<WAccess> { perm.iter().map(|&i| ws[i].clone()).collect() };
    // The interval dimensions of a window must remain in increasing order
    // under the permutation, or the window's meaning would change.
    let window_stable = |ws: &[WAccess]| -> bool {
        let kept: Vec<usize> = perm
            .iter()
            .copied()
            .filter(|&i| ws[i].is_interval())
            .collect();
        kept.windows(2).all(|p| p[0] < p[1])
    };

    rewrite_accesses(
        tx,
        root,
        region,
        name,
        &mut |e, in_call| {
            let (idx, ety, srcinfo) = match e {
                Expr::Read { idx, ty, srcinfo, .. } => (idx, ty, srcinfo),
                _ => unreachable!(),
            };
            if in_call {
                return err(
                    format!(
                        "cannot permute buffer '{}' because it is passed as a sub-procedure argument",
                        name
                    ),
                    srcinfo,
                );
            }
            Ok(Some(Expr::Read {
                name: name.clone(),
                idx: permute_exprs(idx),
                ty: ety.clone(),
                srcinfo: srcinfo.clone(),
            }))
        },
        &mut |e, _| {
            let (idx, ety, srcinfo) = match e {
                Expr::Window { idx, ty, srcinfo, .. } => (idx, ty, srcinfo),
                _ => unreachable!(),
            };
            if !window_stable(idx) {
                return err(
                    "permuting this window expression would change its meaning",
                    srcinfo,
                );
            }
            Ok(Some(Expr::Window {
                name: name.clone(),
                idx: permute_w(idx),
                ty: ety.clone(),
                srcinfo: srcinfo.clone(),
            }))
        },
        &mut |e| {
            let (dim, ety, srcinfo) = match e {
                Expr::Stride { dim, ty, srcinfo, .. } => (*dim, ty, srcinfo),
                _ => unreachable!(),
            };
            let new_dim = perm
                .iter()
                .position(|&p| p == dim)
                .expect("checked permutation");
            Ok(Some(Expr::Stride {
                name: name.clone(),
                dim: new_dim,
                ty: ety.clone(),
                srcinfo: srcinfo.clone(),
            }))
        },
        &mut |s| {
            let mut new = s.clone();
            match &mut new {
                Stmt::Assign { idx, .. } | Stmt::Reduce { idx, .. } => {
                    *idx = permute_exprs(idx);
                }
                _ => unreachable!(),
            }
            Ok(Some(new))
        },
    )
}

/// Split a buffer along one literal-extent dimension into independent
/// buffers, one per constant index in use; unused indices are dropped.
pub fn unroll_buffer(alloc_c: &Cursor, dim: usize) -> Result<(Rc<Proc>, Forward)> {
    let root = alloc_c.proc().clone();
    let (name, ty, mem, srcinfo) = expect_alloc(alloc_c)?;

    let shape = ty.shape();
    if shape.is_empty() {
        return err("cannot unroll a scalar buffer", &srcinfo);
    }
    if dim >= shape.len() {
        return err(format!("no dimension {} on {}", dim, name), &srcinfo);
    }
    let extent = match shape[dim].as_const_int() {
        Some(v) if v > 0 => v as usize,
        _ => {
            return err(
                format!(
                    "expected a constant buffer dimension, got {} at dimension {}",
                    shape[dim], dim
                ),
                &srcinfo,
            )
        }
    };

    let buf_syms: Vec<Sym> = (0..extent)
        .map(|i| Sym::fresh(&format!("{}_{}", name.name(), i)))
        .collect();

    let mut new_shape = shape.to_vec();
    new_shape.remove(dim);
    let split_ty = if new_shape.is_empty() {
        ty.basetype().clone()
    } else {
        Type::tensor(new_shape, false, ty.basetype().clone())
    };

    let used = std::cell::RefCell::new(vec![false; extent]);

    let constant_at = |es: &[Expr], srcinfo: &SrcInfo| -> Result<usize> {
        match es[dim].as_const_int() {
            Some(v) if v >= 0 && (v as usize) < extent => Ok(v as usize),
            _ => err(
                format!(
                    "expected a constant buffer access, got {} at dimension {}; try unrolling the loop",
                    es[dim], dim
                ),
                srcinfo,
            ),
        }
    };

    let mut tx = Tx::new(&root);
    let region = rest_of_block(alloc_c)?.cursors();
    {
        let used = &used;
        let buf_syms = &buf_syms;
        rewrite_accesses(
            &mut tx,
            &root,
            &region,
            &name,
            &mut |e, _| {
                let (idx, ety, srcinfo) = match e {
                    Expr::Read { idx, ty, srcinfo, .. } => (idx, ty, srcinfo),
                    _ => unreachable!(),
                };
                if idx.is_empty() {
                    return err(
                        format!("cannot unroll {} because the buffer is passed as an argument", name),
                        srcinfo,
                    );
                }
                let v = constant_at(idx, srcinfo)?;
                used.borrow_mut()[v] = true;
                let mut new_idx = idx.to_vec();
                new_idx.remove(dim);
                Ok(Some(Expr::Read {
                    name: buf_syms[v].clone(),
                    idx: new_idx,
                    ty: ety.clone(),
                    srcinfo: srcinfo.clone(),
                }))
            },
            &mut |e, _| {
                let (idx, ety, srcinfo) = match e {
                    Expr::Window { idx, ty, srcinfo, .. } => (idx, ty, srcinfo),
                    _ => unreachable!(),
                };
                let pt = match &idx[dim] {
                    WAccess::Point { pt, .. } => pt,
                    WAccess::Interval { .. } => {
                        return err(
                            "cannot unroll a buffer at a dimension used as a window",
                            srcinfo,
                        )
                    }
                };
                let v = match pt.as_const_int() {
                    Some(v) if v >= 0 && (v as usize) < extent => v as usize,
                    _ => {
                        return err(
                            format!(
                                "expected a constant buffer access, got {} at dimension {}; try unrolling the loop",
                                pt, dim
                            ),
                            srcinfo,
                        )
                    }
                };
                used.borrow_mut()[v] = true;
                let mut new_idx = idx.to_vec();
                new_idx.remove(dim);
                let new_ty = match ety {
                    Type::Window(wt) => Type::Window(WindowType {
                        src_buf: buf_syms[v].clone(),
                        idx: new_idx.clone(),
                        src_type: wt.src_type.clone(),
                        as_tensor: wt.as_tensor.clone(),
                    }),
                    other => other.clone(),
                };
                Ok(Some(Expr::Window {
                    name: buf_syms[v].clone(),
                    idx: new_idx,
                    ty: new_ty,
                    srcinfo: srcinfo.clone(),
                }))
            },
            &mut |e| no_stride(e, &name),
            &mut |s| {
                let (idx, srcinfo) = match s {
                    Stmt::Assign { idx, srcinfo, .. } | Stmt::Reduce { idx, srcinfo, .. } => {
                        (idx, srcinfo)
                    }
                    _ => unreachable!(),
                };
                let v = constant_at(idx, srcinfo)?;
                used.borrow_mut()[v] = true;
                let mut new = s.clone();
                match &mut new {
                    Stmt::Assign { name, idx, .. } | Stmt::Reduce { name, idx, .. } => {
                        *name = buf_syms[v].clone();
                        idx.remove(dim);
                    }
                    _ => unreachable!(),
                }
                Ok(Some(new))
            },
        )?;
    }

    let used = used.into_inner();
    let new_allocs: Vec<Stmt> = (0..extent)
        .filter(|&i| used[i])
        .map(|i| Stmt::Alloc {
            name: buf_syms[i].clone(),
            ty: split_ty.clone(),
            mem: mem.clone(),
            srcinfo: srcinfo.clone(),
        })
        .collect();
    let alloc_now = tx.fwd(alloc_c)?;
    tx.apply(alloc_now.replace_stmts(new_allocs)?);

    Ok(tx.finish())
}

/// One dimension of a staging request: a half-open window or a single point.
#[derive(Clone, Debug)]
pub enum WRange {
    Interval(Expr, Expr),
    Point(Expr),
}

/// Resolve the buffer a name refers to at the start of a block: procedure
/// arguments, allocations, and window bindings in scope.
fn find_buf_data(root: &Proc, at: &Cursor, name: &str) -> Result<(Sym, Type, Option<Mem>)> {
    struct Finder<'a> {
        target_path: &'a [crate::cursor::Step],
        name: &'a str,
        scopes: Vec<Vec<(String, (Sym, Type, Option<Mem>))>>,
        found: Option<(Sym, Type, Option<Mem>)>,
    }
    impl<'a> Finder<'a> {
        fn lookup(&self, name: &str) -> Option<(Sym, Type, Option<Mem>)> {
            self.scopes
                .iter()
                .rev()
                .flat_map(|s| s.iter().rev())
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
        }

        fn walk(&mut self, stmts: &[Stmt], path: &mut crate::cursor::Path) {
            use crate::cursor::Step;
            for (i, s) in stmts.iter().enumerate() {
                if self.found.is_some() {
                    return;
                }
                path.push(Step {
                    field: Field::Body,
                    idx: i as u32,
                });
                if path.as_slice() == self.target_path {
                    self.found = self.lookup(self.name);
                    path.pop();
                    return;
                }
                match s {
                    Stmt::Alloc { name, ty, mem, .. } => {
                        self.scopes.last_mut().unwrap().push((
                            name.name().to_string(),
                            (name.clone(), ty.clone(), mem.clone()),
                        ));
                    }
                    Stmt::WindowStmt { name, rhs, .. } => {
                        let src_mem = match rhs {
                            Expr::Window { name: src, .. } => {
                                self.lookup(src.name()).and_then(|(_, _, m)| m)
                            }
                            _ => None,
                        };
                        self.scopes.last_mut().unwrap().push((
                            name.name().to_string(),
                            (name.clone(), rhs.ty().clone(), src_mem),
                        ));
                    }
                    Stmt::Seq { body, .. } => {
                        self.scopes.push(vec![]);
                        self.walk(body, path);
                        self.scopes.pop();
                    }
                    Stmt::If { body, orelse, .. } => {
                        self.scopes.push(vec![]);
                        self.walk(body, path);
                        self.scopes.pop();
                        // the else branch lives one step over
                        path.pop();
                        path.push(Step {
                            field: Field::Orelse,
                            idx: i as u32,
                        });
                        let _ = s;
                        self.scopes.push(vec![]);
                        self.walk(orelse, path);
                        self.scopes.pop();
                    }
                    _ => {}
                }
                path.pop();
            }
        }
    }

    let mut finder = Finder {
        target_path: at.path(),
        name,
        scopes: vec![root
            .args
            .iter()
            .filter(|a| a.ty.is_numeric())
            .map(|a| {
                (
                    a.name.name().to_string(),
                    (a.name.clone(), a.ty.clone(), a.mem.clone()),
                )
            })
            .collect()],
        found: None,
    };
    let mut path = crate::cursor::Path::new();
    finder.walk(&root.body, &mut path);
    finder.found.ok_or_else(|| {
        SchedulingError::new(
            format!(
                "no buffer or window named {} was live in the indicated statement block",
                name
            ),
            &SrcInfo::unknown(),
        )
        .into()
    })
}

/// Stage the accesses of a block to one buffer through a freshly allocated
/// window-shaped scratch buffer, with load and store epilogues as the
/// block's read/write behavior requires.  With `accum_zero`, the scratch is
/// zero-initialised and stored back with a reduction, which requires the
/// block to touch the buffer only through reductions.
pub fn stage_mem(
    block: &BlockCursor,
    buf_name: &str,
    w_exprs: Vec<WRange>,
    new_name: &str,
    accum_zero: bool,
    oracle: &dyn SafetyOracle,
) -> Result<(Rc<Proc>, Forward)> {
    let root = block.proc().clone();
    if block.is_empty() {
        return Err(SchedulingError::misc("cannot stage an empty block").into());
    }
    let (buf_sym, buf_ty, _mem) = find_buf_data(&root, &block.first(), buf_name)?;
    let buf_tensor = buf_ty.as_tensor().clone();
    let n_dims = buf_tensor.rank();
    let block_stmts = block.stmts()?;
    let srcinfo = block_stmts[0].srcinfo().clone();

    if w_exprs.len() != n_dims {
        return err(
            format!(
                "expected windowing of '{}' to have {} indices, but got {}",
                buf_name,
                n_dims,
                w_exprs.len()
            ),
            &srcinfo,
        );
    }

    let shape: Vec<Expr> = w_exprs
        .iter()
        .filter_map(|w| match w {
            WRange::Interval(lo, hi) => Some(sub(hi.clone(), lo.clone(), lo.srcinfo())),
            WRange::Point(_) => None,
        })
        .collect();
    let basetype = buf_tensor.basetype().clone();
    let new_ty = if shape.is_empty() {
        basetype.clone()
    } else {
        Type::tensor(shape.clone(), false, basetype.clone())
    };

    if accum_zero {
        oracle.buffer_reduce_only(&block_stmts, &buf_sym, n_dims)?;
    }

    let new_sym = Sym::fresh(new_name);
    let mut tx = Tx::new(&root);

    let alloc = Stmt::Alloc {
        name: new_sym.clone(),
        ty: new_ty.clone(),
        mem: None,
        srcinfo: srcinfo.clone(),
    };
    tx.apply(block.before().insert(vec![alloc])?);

    let rw = oracle.buffer_rw(&block_stmts, &buf_sym, n_dims)?;

    // Load epilogue: copy (or zero) the staged region in.
    if rw.contains(RwFlags::READ) {
        let load_iters: Vec<Sym> = (0..shape.len()).map(|i| Sym::fresh(&format!("i{}", i))).collect();
        let load_widx: Vec<Expr> = load_iters.iter().map(|s| index_read(s, &srcinfo)).collect();
        let load_rhs = if accum_zero {
            Expr::Const {
                val: loopsched_ir::ir::Lit::Float(0.0),
                ty: basetype.clone(),
                srcinfo: srcinfo.clone(),
            }
        } else {
            let mut widx = load_widx.clone();
            let mut ridx = Vec::with_capacity(n_dims);
            for w in &w_exprs {
                match w {
                    WRange::Interval(lo, _) => {
                        ridx.push(add(widx.remove(0), lo.clone(), &srcinfo));
                    }
                    WRange::Point(pt) => ridx.push(pt.clone()),
                }
            }
            Expr::Read {
                name: buf_sym.clone(),
                idx: ridx,
                ty: basetype.clone(),
                srcinfo: srcinfo.clone(),
            }
        };
        let mut nest = vec![Stmt::Assign {
            name: new_sym.clone(),
            ty: basetype.clone(),
            idx: load_widx,
            rhs: load_rhs,
            srcinfo: srcinfo.clone(),
        }];
        for (i, n) in load_iters.iter().zip(&shape).rev() {
            nest = vec![Stmt::Seq {
                iter: i.clone(),
                lo: Expr::int(0, Type::Index, &srcinfo),
                hi: n.clone(),
                body: nest,
                srcinfo: srcinfo.clone(),
            }];
        }
        let gap = tx.fwd(&block.first())?.before()?;
        tx.apply(gap.insert(nest)?);
    }

    // Store epilogue: write (or reduce) the staged region back.
    if rw.contains(RwFlags::WRITE) {
        let store_iters: Vec<Sym> =
            (0..shape.len()).map(|i| Sym::fresh(&format!("i{}", i))).collect();
        let store_ridx: Vec<Expr> = store_iters.iter().map(|s| index_read(s, &srcinfo)).collect();
        let mut ridx = store_ridx.clone();
        let mut widx = Vec::with_capacity(n_dims);
        for w in &w_exprs {
            match w {
                WRange::Interval(lo, _) => {
                    widx.push(add(ridx.remove(0), lo.clone(), &srcinfo));
                }
                WRange::Point(pt) => widx.push(pt.clone()),
            }
        }
        let store_rhs = Expr::Read {
            name: new_sym.clone(),
            idx: store_ridx,
            ty: basetype.clone(),
            srcinfo: srcinfo.clone(),
        };
        let mut nest = vec![if accum_zero {
            Stmt::Reduce {
                name: buf_sym.clone(),
                ty: basetype.clone(),
                idx: widx,
                rhs: store_rhs,
                srcinfo: srcinfo.clone(),
            }
        } else {
            Stmt::Assign {
                name: buf_sym.clone(),
                ty: basetype.clone(),
                idx: widx,
                rhs: store_rhs,
                srcinfo: srcinfo.clone(),
            }
        }];
        for (i, n) in store_iters.iter().zip(&shape).rev() {
            nest = vec![Stmt::Seq {
                iter: i.clone(),
                lo: Expr::int(0, Type::Index, &srcinfo),
                hi: n.clone(),
                body: nest,
                srcinfo: srcinfo.clone(),
            }];
        }
        let gap = tx.fwd(&block.last())?.after()?;
        tx.apply(gap.insert(nest)?);
    }

    // Redirect the block's accesses through the scratch buffer.
    let rewrite_idx = |idx: &[Expr]| -> Vec<Expr> {
        idx.iter()
            .zip(&w_exprs)
            .filter_map(|(i, w)| match w {
                WRange::Interval(lo, _) => Some(sub(i.clone(), lo.clone(), i.srcinfo())),
                WRange::Point(_) => None,
            })
            .collect()
    };
    let rewrite_win = |widx: &[WAccess]| -> Vec<WAccess> {
        widx.iter()
            .zip(&w_exprs)
            .filter_map(|(wi, we)| {
                let off = match we {
                    WRange::Interval(lo, _) => lo.clone(),
                    WRange::Point(_) => return None,
                };
                Some(match wi {
                    WAccess::Point { pt, srcinfo } => WAccess::Point {
                        pt: sub(pt.clone(), off, srcinfo),
                        srcinfo: srcinfo.clone(),
                    },
                    WAccess::Interval { lo, hi, srcinfo } => WAccess::Interval {
                        lo: sub(lo.clone(), off.clone(), srcinfo),
                        hi: sub(hi.clone(), off, srcinfo),
                        srcinfo: srcinfo.clone(),
                    },
                })
            })
            .collect()
    };

    let region = block.cursors();
    let ns = &new_sym;
    let nt = &new_ty;
    rewrite_accesses(
        &mut tx,
        &root,
        &region,
        &buf_sym,
        &mut |e, _| {
            let (idx, ety, srcinfo) = match e {
                Expr::Read { idx, ty, srcinfo, .. } => (idx, ty, srcinfo),
                _ => unreachable!(),
            };
            Ok(Some(Expr::Read {
                name: ns.clone(),
                idx: rewrite_idx(idx),
                ty: ety.clone(),
                srcinfo: srcinfo.clone(),
            }))
        },
        &mut |e, _| {
            let (idx, ety, srcinfo) = match e {
                Expr::Window { idx, ty, srcinfo, .. } => (idx, ty, srcinfo),
                _ => unreachable!(),
            };
            let w_idx = rewrite_win(idx);
            let new_win_ty = Type::Window(WindowType {
                src_type: Box::new(nt.clone()),
                as_tensor: Box::new(ety.as_tensor().clone()),
                src_buf: ns.clone(),
                idx: w_idx.clone(),
            });
            Ok(Some(Expr::Window {
                name: ns.clone(),
                idx: w_idx,
                ty: new_win_ty,
                srcinfo: srcinfo.clone(),
            }))
        },
        &mut |_| Ok(None),
        &mut |s| {
            let mut new = s.clone();
            match &mut new {
                Stmt::Assign { name, idx, .. } | Stmt::Reduce { name, idx, .. } => {
                    *name = ns.clone();
                    *idx = rewrite_idx(idx);
                }
                _ => unreachable!(),
            }
            Ok(Some(new))
        },
    )?;

    // Everything the staging added must stay within the new allocation.
    let staged = tx.fwd_block(block)?;
    let staged = staged.expand(
        if rw.contains(RwFlags::READ) { 1 } else { 0 },
        if rw.contains(RwFlags::WRITE) { 1 } else { 0 },
    )?;
    let alloc_now = staged
        .first()
        .prev()
        .ok_or_else(|| SchedulingError::misc("staging lost its allocation"))?;
    oracle.bounds(&alloc_now, &staged)?;

    debug!("stage_mem {} -> {}", buf_name, new_name);
    Ok(tx.finish())
}

/// Overwrite selected dimension extents of an allocation.  Deliberately
/// performs no access-bounds verification.
pub fn bound_alloc(alloc_c: &Cursor, bounds: Vec<Option<Expr>>) -> Result<(Rc<Proc>, Forward)> {
    let (name, ty, _mem, srcinfo) = expect_alloc(alloc_c)?;
    let shape = ty.shape();
    if bounds.len() != shape.len() {
        return err(
            format!(
                "bound_alloc on {}: dimensions do not match: {} != {} (expected)",
                name,
                bounds.len(),
                shape.len()
            ),
            &srcinfo,
        );
    }
    let new_shape: Vec<Expr> = shape
        .iter()
        .zip(bounds)
        .map(|(old, new)| new.unwrap_or_else(|| old.clone()))
        .collect();
    let new_ty = Type::tensor(new_shape, false, ty.basetype().clone());
    Ok(alloc_c.child(Field::Ty, 0).replace(NodeValue::Ty(new_ty))?)
}

/// Delete `alias_c`'s allocation and redirect its uses to `target_c`'s
/// buffer.  The target must be dead at the aliased buffer's first write.
pub fn data_reuse(
    target_c: &Cursor,
    alias_c: &Cursor,
    oracle: &dyn SafetyOracle,
) -> Result<(Rc<Proc>, Forward)> {
    let root = target_c.proc().clone();
    let (target_sym, target_ty, _, _) = expect_alloc(target_c)?;
    let (alias_sym, alias_ty, _, srcinfo) = expect_alloc(alias_c)?;
    if target_ty != alias_ty {
        return err(
            format!(
                "cannot reuse {} for {}: the buffer types differ",
                target_sym, alias_sym
            ),
            &srcinfo,
        );
    }
    let rank = target_ty.rank();

    let region = rest_of_block(alias_c)?;
    let region = region.slice(1, region.len())?.cursors();

    // The target must be dead by the time the alias is first written,
    // checked against the directive's input tree.
    let sites = collect_accesses(&root, &region, &alias_sym);
    if let Some(first_write) = sites.iter().find_map(|s| match s {
        AccessSite::Write(p) => Some(p.clone()),
        _ => None,
    }) {
        oracle.dead_after(&Cursor::from_path(&root, first_write), &target_sym, rank)?;
    }

    let mut tx = Tx::new(&root);
    let alias_now = tx.fwd(alias_c)?;
    tx.apply(alias_now.delete()?);

    let ts = &target_sym;
    rewrite_accesses(
        &mut tx,
        &root,
        &region,
        &alias_sym,
        &mut |e, _| {
            let mut new = e.clone();
            if let Expr::Read { name, .. } = &mut new {
                *name = ts.clone();
            }
            Ok(Some(new))
        },
        &mut |e, _| {
            let mut new = e.clone();
            if let Expr::Window { name, ty, .. } = &mut new {
                *name = ts.clone();
                if let Type::Window(wt) = ty {
                    wt.src_buf = ts.clone();
                }
            }
            Ok(Some(new))
        },
        &mut |e| {
            let mut new = e.clone();
            if let Expr::Stride { name, .. } = &mut new {
                *name = ts.clone();
            }
            Ok(Some(new))
        },
        &mut |s| {
            let mut new = s.clone();
            match &mut new {
                Stmt::Assign { name, .. } | Stmt::Reduce { name, .. } => *name = ts.clone(),
                _ => unreachable!(),
            }
            Ok(Some(new))
        },
    )?;

    Ok(tx.finish())
}

/// Eliminate a window binding by substituting its definition into all later
/// uses: point accesses collapse, interval accesses pick up the window's
/// offsets.
pub fn inline_window(window_c: &Cursor) -> Result<(Rc<Proc>, Forward)> {
    let root = window_c.proc().clone();
    let (win_name, src_sym, win_idx, win_src_ty) = match window_c.stmt()? {
        Stmt::WindowStmt { name, rhs: Expr::Window { name: src, idx, ty, .. }, .. } => {
            (name.clone(), src.clone(), idx.clone(), ty.clone())
        }
        s => return err("expected a window binding", s.srcinfo()),
    };

    // Translate an access through the window's per-dimension access list.
    let calc_idx = |idxs: &[Expr]| -> Vec<Expr> {
        let mut rest = idxs.to_vec();
        win_idx
            .iter()
            .map(|w| match w {
                WAccess::Point { pt, .. } => pt.clone(),
                WAccess::Interval { lo, .. } => {
                    let i = rest.remove(0);
                    add(i, lo.clone(), lo.srcinfo())
                }
            })
            .collect()
    };
    let calc_win = |accs: &[WAccess]| -> Vec<WAccess> {
        let mut rest = accs.to_vec();
        win_idx
            .iter()
            .map(|w| match w {
                WAccess::Point { .. } => w.clone(),
                WAccess::Interval { lo, .. } => match rest.remove(0) {
                    WAccess::Point { pt, srcinfo } => WAccess::Point {
                        pt: add(pt, lo.clone(), &srcinfo),
                        srcinfo,
                    },
                    WAccess::Interval { lo: ilo, hi: ihi, srcinfo } => WAccess::Interval {
                        lo: add(ilo, lo.clone(), &srcinfo),
                        hi: add(ihi, lo.clone(), &srcinfo),
                        srcinfo,
                    },
                },
            })
            .collect()
    };
    // Window dimension `dim` names the dim-th interval; its absolute
    // position accounts for the points before it.
    let calc_dim = |dim: usize| -> usize {
        let mut remaining = dim;
        for (abs, w) in win_idx.iter().enumerate() {
            if w.is_interval() {
                if remaining == 0 {
                    return abs;
                }
                remaining -= 1;
            }
        }
        win_idx.len()
    };

    let mut tx = Tx::new(&root);
    let win_now = tx.fwd(window_c)?;
    tx.apply(win_now.delete()?);

    let region = rest_of_block(window_c)?;
    let region = region.slice(1, region.len())?.cursors();
    let src = &src_sym;
    rewrite_accesses(
        &mut tx,
        &root,
        &region,
        &win_name,
        &mut |e, _| {
            let (idx, ety, srcinfo) = match e {
                Expr::Read { idx, ty, srcinfo, .. } => (idx, ty, srcinfo),
                _ => unreachable!(),
            };
            Ok(Some(Expr::Read {
                name: src.clone(),
                idx: calc_idx(idx),
                ty: ety.clone(),
                srcinfo: srcinfo.clone(),
            }))
        },
        &mut |e, _| {
            let (idx, ety, srcinfo) = match e {
                Expr::Window { idx, ty, srcinfo, .. } => (idx, ty, srcinfo),
                _ => unreachable!(),
            };
            let new_idx = calc_win(idx);
            let new_ty = match ety {
                Type::Window(wt) => Type::Window(WindowType {
                    src_buf: src.clone(),
                    idx: new_idx.clone(),
                    src_type: match &win_src_ty {
                        Type::Window(outer) => outer.src_type.clone(),
                        other => Box::new(other.clone()),
                    },
                    as_tensor: wt.as_tensor.clone(),
                }),
                other => other.clone(),
            };
            Ok(Some(Expr::Window {
                name: src.clone(),
                idx: new_idx,
                ty: new_ty,
                srcinfo: srcinfo.clone(),
            }))
        },
        &mut |e| {
            let (dim, ety, srcinfo) = match e {
                Expr::Stride { dim, ty, srcinfo, .. } => (*dim, ty, srcinfo),
                _ => unreachable!(),
            };
            Ok(Some(Expr::Stride {
                name: src.clone(),
                dim: calc_dim(dim),
                ty: ety.clone(),
                srcinfo: srcinfo.clone(),
            }))
        },
        &mut |s| {
            let mut new = s.clone();
            match &mut new {
                Stmt::Assign { name, idx, .. } | Stmt::Reduce { name, idx, .. } => {
                    *name = src.clone();
                    *idx = calc_idx(idx);
                }
                _ => unreachable!(),
            }
            Ok(Some(new))
        },
    )?;

    Ok(tx.finish())
}
