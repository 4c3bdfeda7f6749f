//! Expression, configuration, and procedure-structure directives: binding
//! expressions and config fields, commuting operands, merging writes,
//! lifting loop-invariant factors, inlining and swapping calls, type and
//! memory annotations, partial evaluation, and method extraction.

use std::rc::Rc;

use indexmap::IndexSet;
use itertools::Itertools;
use log::debug;
use rustc_hash::FxHashMap;

use loopsched_ir::ir::{BinOp, Config, Effect, Expr, FnArg, Lit, Mem, Proc, Stmt};
use loopsched_ir::subst::alpha_rename;
use loopsched_ir::types::Type;
use loopsched_ir::uses::{free_vars_expr, free_vars_stmts, reads_of_expr, reads_of_stmts,
                         writes_of_stmts};
use loopsched_ir::{SrcInfo, Sym};

use crate::cursor::{
    for_each_node, Cursor, Field, Forward, NodeRef, NodeValue, Path, Step,
};
use crate::error::{Result, SchedulingError};
use crate::oracle::{ConfigKey, SafetyOracle};
use crate::rewrite::{collect_accesses, rest_of_block, same_write_dest, AccessSite, Tx};

fn err<T>(msg: impl Into<String>, srcinfo: &SrcInfo) -> Result<T> {
    Err(SchedulingError::new(msg, srcinfo).into())
}

/// Document order on node paths.
fn path_less(a: &[Step], b: &[Step]) -> bool {
    for (x, y) in a.iter().zip(b) {
        if x != y {
            return x < y;
        }
    }
    a.len() < b.len()
}

fn path_prefix(prefix: &[Step], path: &[Step]) -> bool {
    path.len() >= prefix.len() && &path[..prefix.len()] == prefix
}

// ---------------------------------------------------------------------------

/// Bind an expression to a fresh scalar: allocate and assign it just before
/// its first occurrence's statement and replace occurrences by a read of the
/// new scalar.  Replacement stops at the first statement that writes any
/// buffer the expression reads.  With `cse = false`, only the first
/// occurrence is replaced.
pub fn bind_expr(
    new_name: &str,
    expr_cursors: &[Cursor],
    cse: bool,
    oracle: &dyn SafetyOracle,
) -> Result<(Rc<Proc>, Forward)> {
    let first = match expr_cursors.first() {
        Some(c) => c,
        None => return Err(SchedulingError::misc("no expression to bind").into()),
    };
    let root = first.proc().clone();
    let expr = first.expr()?.clone();
    if !expr.ty().is_numeric() {
        return err("can only bind numeric expressions", expr.srcinfo());
    }
    let srcinfo = expr.srcinfo().clone();

    let cursors: Vec<&Cursor> = if cse { expr_cursors.iter().collect() } else { expr_cursors.iter().take(1).collect() };
    // Occurrences must be syntactically identical to the first.
    let key = expr.to_string();
    let cursors: Vec<&Cursor> = cursors
        .into_iter()
        .filter(|c| c.expr().map(|e| e.to_string() == key).unwrap_or(false))
        .collect();

    let expr_reads: Vec<Sym> = reads_of_expr(&expr).into_iter().map(|(s, _)| s).collect();

    let init_c = first.enclosing_stmt()?;
    let new_sym = Sym::fresh(new_name);
    let scalar_ty = expr.ty().basetype().clone();

    let alloc_s = Stmt::Alloc {
        name: new_sym.clone(),
        ty: scalar_ty.clone(),
        mem: None,
        srcinfo: srcinfo.clone(),
    };
    let assign_s = Stmt::Assign {
        name: new_sym.clone(),
        ty: scalar_ty,
        idx: vec![],
        rhs: expr.clone(),
        srcinfo: srcinfo.clone(),
    };

    let mut tx = Tx::new(&root);
    tx.apply(init_c.before()?.insert(vec![alloc_s, assign_s])?);

    // The first statement (after the binding site) that writes any buffer
    // the expression reads ends the replacement region.
    let region = rest_of_block(&init_c)?.cursors();
    let mut boundary: Option<Path> = None;
    for c in &region {
        let start: Path = c.path().iter().copied().collect();
        for_each_node(&root, &start, &mut |path, node| {
            let writes_read_buf = match node {
                NodeRef::Stmt(Stmt::Assign { name, .. })
                | NodeRef::Stmt(Stmt::Reduce { name, .. }) => expr_reads.contains(name),
                _ => false,
            };
            if writes_read_buf {
                match &boundary {
                    Some(b) if path_less(b, path) => {}
                    _ => boundary = Some(path.clone()),
                }
            }
        });
        if boundary.is_some() {
            break;
        }
    }

    let new_read = Expr::read(&new_sym, expr.ty().clone(), &srcinfo);
    for c in &cursors {
        let in_range = match &boundary {
            None => true,
            // occurrences before the write, and inside the writing
            // statement itself, still see the bound value
            Some(b) => path_less(c.path(), b) || path_prefix(b, c.path()),
        };
        if !in_range {
            continue;
        }
        let now = tx.fwd(c)?;
        tx.apply(now.replace(NodeValue::Expr(new_read.clone()))?);
    }

    oracle.aliasing(tx.ir())?;
    debug!("bind_expr {} ({} occurrences)", new_name, cursors.len());
    Ok(tx.finish())
}

/// Lift a read into a config-field write just before its enclosing
/// statement, and replace the read by a read of the config field.
pub fn bind_config(
    config: &Rc<Config>,
    field: &str,
    read_c: &Cursor,
    oracle: &dyn SafetyOracle,
) -> Result<(Rc<Proc>, Forward, IndexSet<ConfigKey>)> {
    let root = read_c.proc().clone();
    let e = read_c.expr()?.clone();
    if !matches!(e, Expr::Read { .. }) {
        return err("can only bind a read to a config field", e.srcinfo());
    }
    let srcinfo = e.srcinfo().clone();

    let stmt_c = read_c.enclosing_stmt()?;
    let write_s = Stmt::WriteConfig {
        config: config.clone(),
        field: field.to_string(),
        rhs: e.clone(),
        srcinfo: srcinfo.clone(),
    };

    let mut tx = Tx::new(&root);
    tx.apply(stmt_c.before()?.insert(vec![write_s])?);

    // The inserted write must be redundant in context.
    let inserted = tx
        .fwd(&stmt_c)?
        .prev()
        .ok_or_else(|| SchedulingError::misc("config write insertion failed"))?;
    let keys = oracle.delete_config_write(&inserted.as_block()?)?;

    let read_e = Expr::ReadConfig {
        config: config.clone(),
        field: field.to_string(),
        ty: e.ty().clone(),
        srcinfo,
    };
    let now = tx.fwd(read_c)?;
    tx.apply(now.replace(NodeValue::Expr(read_e))?);

    oracle.aliasing(tx.ir())?;
    let (ir, fwd) = tx.finish();
    Ok((ir, fwd, keys))
}

/// Insert a `WriteConfig` before or after a statement; the write must be
/// dead with respect to every later read.
pub fn config_write(
    stmt_c: &Cursor,
    config: &Rc<Config>,
    field: &str,
    expr: Expr,
    before: bool,
    oracle: &dyn SafetyOracle,
) -> Result<(Rc<Proc>, Forward, IndexSet<ConfigKey>)> {
    if !matches!(expr, Expr::Read { .. } | Expr::Stride { .. } | Expr::Const { .. }) {
        return err(
            "config writes take a read, a stride, or a constant",
            expr.srcinfo(),
        );
    }
    let root = stmt_c.proc().clone();
    let srcinfo = stmt_c.stmt()?.srcinfo().clone();
    let write_s = Stmt::WriteConfig {
        config: config.clone(),
        field: field.to_string(),
        rhs: expr,
        srcinfo,
    };

    let mut tx = Tx::new(&root);
    let gap = if before {
        stmt_c.before()?
    } else {
        stmt_c.after()?
    };
    tx.apply(gap.insert(vec![write_s])?);

    let inserted = if before {
        tx.fwd(stmt_c)?
            .prev()
            .ok_or_else(|| SchedulingError::misc("config write insertion failed"))?
    } else {
        tx.fwd(stmt_c)?
            .next()
            .ok_or_else(|| SchedulingError::misc("config write insertion failed"))?
    };
    let keys = oracle.delete_config_write(&inserted.as_block()?)?;

    let (ir, fwd) = tx.finish();
    Ok((ir, fwd, keys))
}

/// Delete a `WriteConfig` the oracle proves redundant; returns the config
/// keys whose equivalence survives the deletion.
pub fn delete_config(
    config_c: &Cursor,
    oracle: &dyn SafetyOracle,
) -> Result<(Rc<Proc>, Forward, IndexSet<ConfigKey>)> {
    if !matches!(config_c.stmt()?, Stmt::WriteConfig { .. }) {
        return err("expected a config write", config_c.stmt()?.srcinfo());
    }
    let keys = oracle.delete_config_write(&config_c.as_block()?)?;
    let (ir, fwd) = config_c.delete()?;
    Ok((ir, fwd, keys))
}

/// Swap the operands of associative-commutative binary operators.
pub fn commute(expr_cursors: &[Cursor]) -> Result<(Rc<Proc>, Forward)> {
    let first = match expr_cursors.first() {
        Some(c) => c,
        None => return Err(SchedulingError::misc("no expression to commute").into()),
    };
    let mut tx = Tx::new(first.proc());
    for c in expr_cursors {
        let (op, lhs, rhs) = match c.expr()? {
            Expr::BinOp { op, lhs, rhs, .. } => (*op, (**lhs).clone(), (**rhs).clone()),
            e => return err("can only commute binary operators", e.srcinfo()),
        };
        if !matches!(op, BinOp::Add | BinOp::Mul) {
            return err(
                format!("operator {} is not associative-commutative", op.as_str()),
                c.expr()?.srcinfo(),
            );
        }
        let now = tx.fwd(c)?;
        tx.apply(now.child(Field::Lhs, 0).replace(NodeValue::Expr(rhs))?);
        let now = tx.fwd(c)?;
        tx.apply(now.child(Field::Rhs, 0).replace(NodeValue::Expr(lhs))?);
    }
    Ok(tx.finish())
}

/// Merge two adjacent writes to the same destination.  The first write is
/// deleted; if the second is a reduction, its right-hand side becomes the
/// sum of both.
pub fn merge_writes(
    c1: &Cursor,
    c2: &Cursor,
    oracle: &dyn SafetyOracle,
) -> Result<(Rc<Proc>, Forward)> {
    let adjacent = matches!(c1.next(), Some(n) if n.path() == c2.path());
    if !adjacent {
        return err(
            "expected the second write to come directly after the first",
            c1.stmt()?.srcinfo(),
        );
    }
    let s1 = c1.stmt()?.clone();
    let s2 = c2.stmt()?.clone();
    if !same_write_dest(oracle, c1, &s1, c2, &s2) {
        return err(
            "expected the left hand side's indices to be the same",
            s1.srcinfo(),
        );
    }
    let (name1, ty1, rhs1) = match &s1 {
        Stmt::Assign { name, ty, rhs, .. } | Stmt::Reduce { name, ty, rhs, .. } => {
            (name.clone(), ty.clone(), rhs.clone())
        }
        _ => unreachable!(),
    };
    if reads_of_expr(match &s2 {
        Stmt::Assign { rhs, .. } | Stmt::Reduce { rhs, .. } => rhs,
        _ => unreachable!(),
    })
    .iter()
    .any(|(n, t)| *n == name1 && *t == ty1)
    {
        return err(
            "expected the right hand side of the second statement to not depend on the left hand side of the first statement",
            s2.srcinfo(),
        );
    }

    let mut tx = Tx::new(c1.proc());
    let first_now = tx.fwd(c1)?;
    tx.apply(first_now.delete()?);

    if let Stmt::Reduce { rhs: rhs2, .. } = &s2 {
        // The first statement's kind and type win.
        let sum = Expr::binop(
            BinOp::Add,
            rhs1,
            rhs2.clone(),
            ty1,
            s1.srcinfo(),
        );
        let mut merged = s1.clone();
        match &mut merged {
            Stmt::Assign { rhs, .. } | Stmt::Reduce { rhs, .. } => *rhs = sum,
            _ => unreachable!(),
        }
        let second_now = tx.fwd(c2)?;
        tx.apply(second_now.replace_stmts(vec![merged])?);
    }

    Ok(tx.finish())
}

/// Pull a loop-invariant scalar factor out of the reductions in a loop:
/// every relevant reduction `buf[idx] += c * e` loses its factor, and
/// `buf[idx] = c * buf[idx]` is inserted after the loop.
pub fn lift_constant(
    write_c: &Cursor,
    loop_c: &Cursor,
    oracle: &dyn SafetyOracle,
) -> Result<(Rc<Proc>, Forward)> {
    let root = write_c.proc().clone();
    let target = write_c.stmt()?.clone();
    let (t_name, t_ty, t_idx) = match &target {
        Stmt::Assign { name, ty, idx, .. } | Stmt::Reduce { name, ty, idx, .. } => {
            (name.clone(), ty.clone(), idx.clone())
        }
        s => return err("expected a write to name the buffer", s.srcinfo()),
    };
    let (loop_body, loop_src) = match loop_c.stmt()? {
        Stmt::Seq { body, srcinfo, .. } => (body.clone(), srcinfo.clone()),
        s => return err("expected a loop", s.srcinfo()),
    };

    if reads_of_stmts(&loop_body)
        .iter()
        .any(|(n, t)| *n == t_name && *t == t_ty)
    {
        return err(
            "cannot lift constant because the buffer is read in the loop body",
            &loop_src,
        );
    }
    for s in &loop_body {
        check_no_opaque_stmts(s)?;
    }

    // Every write to the buffer in the loop must be a reduction of the form
    // `buf[idx] += c * e`, with the same destination and the same `c`.
    let sites = collect_accesses(&root, &loop_c.body()?.cursors(), &t_name);
    let mut reduce_sites: Vec<Path> = Vec::new();
    let mut constant: Option<Expr> = None;
    for site in &sites {
        let path = match site {
            AccessSite::Write(p) => p,
            AccessSite::Read(_) => continue, // unreachable; reads were rejected above
            _ => {
                return err(
                    "cannot lift constant because the buffer is windowed in the loop body",
                    &loop_src,
                )
            }
        };
        let c = Cursor::from_path(&root, path.clone());
        let s = c.stmt()?;
        let rhs = match s {
            Stmt::Reduce { rhs, .. } => rhs,
            _ => {
                return err(
                    "cannot lift constant because there are other operations on the same buffer that may interfere",
                    s.srcinfo(),
                )
            }
        };
        if !same_write_dest(oracle, write_c, &target, &c, s) {
            return err(
                "cannot lift constant because there are other operations on the same buffer that may interfere",
                s.srcinfo(),
            );
        }
        let factor = match rhs {
            Expr::BinOp { op: BinOp::Mul, lhs, .. }
                if matches!(&**lhs, Expr::Const { .. } | Expr::Read { .. }) =>
            {
                (**lhs).clone()
            }
            _ => {
                return err(
                    "cannot lift constant because did not find a reduce in the loop body of the form `buffer += c * expr`",
                    s.srcinfo(),
                )
            }
        };
        match &constant {
            None => constant = Some(factor),
            Some(c0) => {
                let same = match (c0, &factor) {
                    (Expr::Const { val: a, .. }, Expr::Const { val: b, .. }) => a == b,
                    (Expr::Read { name: a, .. }, Expr::Read { name: b, .. }) => {
                        a == b && c0.to_string() == factor.to_string()
                    }
                    _ => false,
                };
                if !same {
                    return err(
                        format!(
                            "cannot lift constant because the reduces to buffer {} in the loop body have different constants",
                            t_name
                        ),
                        factor.srcinfo(),
                    );
                }
            }
        }
        reduce_sites.push(path.clone());
    }
    let constant = match constant {
        Some(c) => c,
        None => {
            return err(
                "cannot lift constant because did not find a reduce in the loop body of the form `buffer += c * expr`",
                &loop_src,
            )
        }
    };
    if let Expr::Read { name, .. } = &constant {
        if writes_of_stmts(&loop_body).iter().any(|(n, _)| n == name) {
            return err(
                "cannot lift constant because it is a buffer that is written in the loop body",
                constant.srcinfo(),
            );
        }
    }

    let mut tx = Tx::new(&root);
    for path in reduce_sites.iter().rev() {
        let c = tx.fwd(&Cursor::from_path(&root, path.clone()))?;
        let inner = match c.stmt()? {
            Stmt::Reduce { rhs: Expr::BinOp { rhs, .. }, .. } => (**rhs).clone(),
            _ => unreachable!("validated above"),
        };
        tx.apply(c.child(Field::Rhs, 0).replace(NodeValue::Expr(inner))?);
    }

    // buf[idx] = c * buf[idx], after the loop
    let buf_read = Expr::Read {
        name: t_name.clone(),
        idx: t_idx.clone(),
        ty: t_ty.clone(),
        srcinfo: loop_src.clone(),
    };
    let scaled = Expr::binop(BinOp::Mul, constant, buf_read, t_ty.clone(), &loop_src);
    let scale_s = Stmt::Assign {
        name: t_name,
        ty: t_ty,
        idx: t_idx,
        rhs: scaled,
        srcinfo: loop_src,
    };
    let gap = tx.fwd(loop_c)?.after()?;
    tx.apply(gap.insert(vec![scale_s])?);

    Ok(tx.finish())
}

fn check_no_opaque_stmts(s: &Stmt) -> Result<()> {
    match s {
        Stmt::WindowStmt { .. } | Stmt::WriteConfig { .. } | Stmt::Call { .. } => err(
            "unsupported statement kind in the loop body of lift_constant",
            s.srcinfo(),
        ),
        Stmt::If { body, orelse, .. } => {
            for s in body.iter().chain(orelse) {
                check_no_opaque_stmts(s)?;
            }
            Ok(())
        }
        Stmt::Seq { body, .. } => {
            for s in body {
                check_no_opaque_stmts(s)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Substitute the callee's body at the call site, alpha-renamed, with window
/// arguments pre-bound via `WindowStmt`s to preserve sharing.
pub fn inline_call(call_c: &Cursor) -> Result<(Rc<Proc>, Forward)> {
    let (callee, args, srcinfo) = match call_c.stmt()? {
        Stmt::Call { proc, args, srcinfo } => (proc.clone(), args.clone(), srcinfo.clone()),
        s => return err("expected a call", s.srcinfo()),
    };

    let mut win_binds: Vec<Stmt> = Vec::new();
    let mut env: FxHashMap<Sym, Expr> = FxHashMap::default();
    for (decl, arg) in callee.args.iter().zip(&args) {
        if matches!(arg, Expr::Window { .. }) {
            // The binding keeps the window expression evaluated once; the
            // body already reads the argument symbol.
            win_binds.push(Stmt::WindowStmt {
                name: decl.name.clone(),
                rhs: arg.clone(),
                srcinfo: srcinfo.clone(),
            });
        } else {
            env.insert(decl.name.clone(), arg.clone());
        }
    }

    // All sub-procedure preconditions hold at the call site, or the call
    // would not have been valid in the first place.
    let mut body = win_binds;
    body.extend(loopsched_ir::subst::substitute(&callee.body, &env));
    let new_body = alpha_rename(&body);

    debug!("inline {}", callee.name);
    Ok(call_c.replace_stmts(new_body)?)
}

/// Replace a call's callee by an equivalent procedure; the equivalence (and
/// the config keys it is modulo of) is established by the oracle.
pub fn call_swap(
    call_c: &Cursor,
    new_callee: &Rc<Proc>,
    oracle: &dyn SafetyOracle,
) -> Result<(Rc<Proc>, Forward, IndexSet<ConfigKey>)> {
    let (old_callee, args, srcinfo) = match call_c.stmt()? {
        Stmt::Call { proc, args, srcinfo } => (proc.clone(), args.clone(), srcinfo.clone()),
        s => return err("expected a call", s.srcinfo()),
    };
    let keys = oracle.extend_eqv(&old_callee, new_callee).map_err(|_| {
        SchedulingError::new(
            "cannot swap call because the two procedures are not equivalent",
            &srcinfo,
        )
    })?;

    let new_call = Stmt::Call {
        proc: new_callee.clone(),
        args,
        srcinfo,
    };
    let (ir, fwd) = call_c.replace_stmts(vec![new_call])?;
    oracle.aliasing(&ir)?;
    Ok((ir, fwd, keys))
}

/// Update an allocation's scalar type or memory space.
pub fn set_type_and_mem(
    alloc_c: &Cursor,
    basetype: Option<Type>,
    mem: Option<Mem>,
) -> Result<(Rc<Proc>, Forward)> {
    let (name, ty, old_mem, srcinfo) = match alloc_c.stmt()? {
        Stmt::Alloc { name, ty, mem, srcinfo } => {
            (name.clone(), ty.clone(), mem.clone(), srcinfo.clone())
        }
        s => return err("expected an allocation", s.srcinfo()),
    };

    let new_ty = match &basetype {
        None => ty.clone(),
        Some(base) => {
            if !base.is_real_scalar() {
                return err("new base type must be a real scalar", &srcinfo);
            }
            match &ty {
                t if t.is_real_scalar() => base.clone(),
                Type::Tensor(tt) => {
                    Type::tensor(tt.shape.clone(), tt.is_window, base.clone())
                }
                _ => return err("cannot change the base type of this declaration", &srcinfo),
            }
        }
    };

    let new_alloc = Stmt::Alloc {
        name,
        ty: new_ty,
        mem: mem.or(old_mem),
        srcinfo,
    };
    Ok(alloc_c.replace_stmts(vec![new_alloc])?)
}

/// Update a procedure argument's scalar type, window flag, or memory space.
pub fn set_type_and_mem_arg(
    root: &Rc<Proc>,
    arg_name: &Sym,
    basetype: Option<Type>,
    is_window: Option<bool>,
    mem: Option<Mem>,
) -> Result<(Rc<Proc>, Forward)> {
    let mut proc = (**root).clone();
    let arg = proc
        .args
        .iter_mut()
        .find(|a| &a.name == arg_name)
        .ok_or_else(|| SchedulingError::misc(format!("no argument named {}", arg_name)))?;

    if let Some(base) = basetype {
        if !base.is_real_scalar() {
            return Err(SchedulingError::new(
                "new base type must be a real scalar",
                &arg.srcinfo,
            )
            .into());
        }
        arg.ty = match &arg.ty {
            t if t.is_real_scalar() => base,
            Type::Tensor(tt) => Type::tensor(tt.shape.clone(), tt.is_window, base),
            _ => {
                return Err(SchedulingError::new(
                    "cannot change the base type of this argument",
                    &arg.srcinfo,
                )
                .into())
            }
        };
    }
    if let Some(win) = is_window {
        arg.ty = match &arg.ty {
            Type::Tensor(tt) => Type::tensor(tt.shape.clone(), win, tt.elem.as_ref().clone()),
            _ => {
                return Err(SchedulingError::new(
                    "cannot change windowing of a non-tensor argument",
                    &arg.srcinfo,
                )
                .into())
            }
        };
    }
    if mem.is_some() {
        arg.mem = mem;
    }

    let new = Rc::new(proc);
    Ok((new.clone(), Forward::retarget(root, &new)))
}

/// Substitute compile-time constants for size- and bool-typed arguments and
/// drop them from the signature.
pub fn partial_eval(root: &Rc<Proc>, env: &FxHashMap<Sym, Lit>) -> Result<(Rc<Proc>, Forward)> {
    if env.is_empty() {
        return Err(SchedulingError::misc("no substitutions to apply").into());
    }
    for (sym, val) in env {
        let arg = root
            .arg(sym)
            .ok_or_else(|| SchedulingError::misc(format!("no argument named {}", sym)))?;
        match (&arg.ty, val) {
            (t, Lit::Int(_)) if t.is_indexable() => {}
            (Type::Bool, Lit::Bool(_)) => {}
            _ => {
                return Err(SchedulingError::new(
                    "cannot partially evaluate numeric (non-index, non-bool) arguments",
                    &arg.srcinfo,
                )
                .into())
            }
        }
    }

    // Rewrite every read of a substituted argument, body and preconditions
    // alike.
    let mut sites: Vec<Path> = Vec::new();
    for_each_node(root, &Path::new(), &mut |path, node| {
        if let NodeRef::Expr(Expr::Read { name, idx, .. }) = node {
            if idx.is_empty() && env.contains_key(name) {
                sites.push(path.clone());
            }
        }
    });

    let mut tx = Tx::new(root);
    for path in sites.iter().rev() {
        let c = tx.fwd(&Cursor::from_path(root, path.clone()))?;
        let (name, ty, srcinfo) = match c.expr()? {
            Expr::Read { name, ty, srcinfo, .. } => (name.clone(), ty.clone(), srcinfo.clone()),
            _ => unreachable!(),
        };
        let val = env[&name].clone();
        let ty = match val {
            Lit::Bool(_) => Type::Bool,
            _ => ty,
        };
        tx.apply(c.replace(NodeValue::Expr(Expr::Const { val, ty, srcinfo }))?);
    }

    // Drop the evaluated arguments from the signature; remaining argument
    // shapes see the substitution too.
    let subst_env: FxHashMap<Sym, Expr> = env
        .iter()
        .map(|(sym, val)| {
            let ty = match val {
                Lit::Bool(_) => Type::Bool,
                _ => Type::Int,
            };
            (
                sym.clone(),
                Expr::Const {
                    val: val.clone(),
                    ty,
                    srcinfo: SrcInfo::unknown(),
                },
            )
        })
        .collect();
    let (ir, fwd) = tx.finish();
    let mut proc = (*ir).clone();
    proc.args.retain(|a| !env.contains_key(&a.name));
    for arg in &mut proc.args {
        if let Type::Tensor(tt) = &arg.ty {
            let mut tt = tt.clone();
            tt.shape = tt
                .shape
                .iter()
                .map(|e| loopsched_ir::subst::substitute_expr(e, &subst_env))
                .collect();
            arg.ty = Type::Tensor(tt);
        }
    }
    let new = Rc::new(proc);
    Ok((new.clone(), fwd.then(Forward::retarget(&ir, &new))))
}

/// Replace a statement by a call to a new procedure built from it.  The new
/// procedure's arguments are the statement's free symbols, sizes first, in
/// the caller-supplied order if one is given.
pub fn extract_method(
    stmt_c: &Cursor,
    name: &str,
    order: Option<Vec<String>>,
    oracle: &dyn SafetyOracle,
) -> Result<(Rc<Proc>, Forward, Rc<Proc>)> {
    let root = stmt_c.proc().clone();
    let stmt = stmt_c.stmt()?.clone();
    let srcinfo = stmt.srcinfo().clone();

    let var_types = types_in_scope(&root, stmt_c.path());
    let fvs: Vec<Sym> = free_vars_stmts(std::slice::from_ref(&stmt))
        .into_iter()
        .sorted_by(|a, b| (a.name(), a.id()).cmp(&(b.name(), b.id())))
        .collect();

    let mut sizes: Vec<Sym> = Vec::new();
    let mut args: Vec<Expr> = Vec::new();
    let mut fnargs: Vec<FnArg> = Vec::new();
    for v in &fvs {
        let ty = match var_types.get(v) {
            Some(t) => t.clone(),
            None => {
                return err(
                    format!("free symbol {} has no declaration in scope", v),
                    &srcinfo,
                )
            }
        };
        if matches!(ty, Type::Size) {
            if !sizes.contains(v) {
                sizes.push(v.clone());
            }
            continue;
        }
        // sizes the argument's shape depends on also join the signature
        for dim in ty.shape() {
            for s in free_vars_expr(dim) {
                if matches!(var_types.get(&s), Some(Type::Size)) && !sizes.contains(&s) {
                    sizes.push(s.clone());
                }
            }
        }
        args.push(Expr::read(v, ty.clone(), &srcinfo));
        fnargs.push(FnArg {
            name: v.clone(),
            ty,
            mem: None,
            effect: Some(Effect::InOut),
            srcinfo: srcinfo.clone(),
        });
    }
    sizes.sort_by(|a, b| (a.name(), a.id()).cmp(&(b.name(), b.id())));
    let mut all_args: Vec<Expr> = sizes
        .iter()
        .map(|s| Expr::read(s, Type::Size, &srcinfo))
        .collect();
    all_args.extend(args);
    let mut all_fnargs: Vec<FnArg> = sizes
        .iter()
        .map(|s| FnArg {
            name: s.clone(),
            ty: Type::Size,
            mem: None,
            effect: None,
            srcinfo: srcinfo.clone(),
        })
        .collect();
    all_fnargs.extend(fnargs);

    if let Some(order) = order {
        if order.len() != all_fnargs.len() {
            return err("expected to provide a full ordering of arguments", &srcinfo);
        }
        let position = |nm: &str| -> Result<usize> {
            all_fnargs
                .iter()
                .position(|a| a.name.name() == nm)
                .ok_or_else(|| {
                    SchedulingError::new(
                        format!("no argument named {} to order", nm),
                        &srcinfo,
                    )
                    .into()
                })
        };
        let mut new_args = Vec::with_capacity(all_args.len());
        let mut new_fnargs = Vec::with_capacity(all_fnargs.len());
        for nm in &order {
            let i = position(nm)?;
            new_args.push(all_args[i].clone());
            new_fnargs.push(all_fnargs[i].clone());
        }
        all_args = new_args;
        all_fnargs = new_fnargs;
    }

    let callee = Rc::new(Proc {
        name: name.to_string(),
        args: all_fnargs,
        preds: vec![],
        body: vec![stmt],
        instr: None,
        srcinfo: srcinfo.clone(),
    });

    let call = Stmt::Call {
        proc: callee.clone(),
        args: all_args,
        srcinfo,
    };
    let (ir, fwd) = stmt_c.replace_stmts(vec![call])?;
    oracle.aliasing(&ir)?;
    Ok((ir, fwd, callee))
}

/// Types of all symbols in scope at a path: procedure arguments, enclosing
/// loop iterators, and allocations or window bindings before the position in
/// each enclosing block.
fn types_in_scope(root: &Proc, path: &[Step]) -> FxHashMap<Sym, Type> {
    let mut out: FxHashMap<Sym, Type> = FxHashMap::default();
    for arg in &root.args {
        out.insert(arg.name.clone(), arg.ty.clone());
    }

    let mut stmts: &[Stmt] = &root.body;
    for (depth, step) in path.iter().enumerate() {
        if !matches!(step.field, Field::Body | Field::Orelse) {
            break;
        }
        let idx = step.idx as usize;
        for s in &stmts[..idx.min(stmts.len())] {
            match s {
                Stmt::Alloc { name, ty, .. } => {
                    out.insert(name.clone(), ty.clone());
                }
                Stmt::WindowStmt { name, rhs, .. } => {
                    out.insert(name.clone(), rhs.ty().clone());
                }
                _ => {}
            }
        }
        let s = match stmts.get(idx) {
            Some(s) => s,
            None => break,
        };
        if depth + 1 == path.len() {
            break;
        }
        stmts = match (s, step_next_field(path, depth)) {
            (Stmt::Seq { iter, body, .. }, _) => {
                out.insert(iter.clone(), Type::Index);
                body
            }
            (Stmt::If { body, .. }, Some(Field::Body)) => body,
            (Stmt::If { orelse, .. }, Some(Field::Orelse)) => orelse,
            (Stmt::Instr { body, .. }, _) => std::slice::from_ref(body),
            _ => break,
        };
    }
    out
}

fn step_next_field(path: &[Step], depth: usize) -> Option<Field> {
    path.get(depth + 1).map(|s| s.field)
}
