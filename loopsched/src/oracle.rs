//! The safety-oracle interface and its conservative implementation.
//!
//! Directives consult the oracle before rewriting; every query either
//! succeeds or returns a [`SchedulingError`] naming the violated condition.
//! The oracle may be incomplete — a true property may be rejected — but must
//! never accept a false one.  [`ConservativeOracle`] is the shipped
//! implementation: it decides each query from canonical-form syntactic
//! reasoning and interval range analysis, and rejects on doubt.  A host may
//! substitute an implementation backed by a real symbolic engine.

use bitflags::bitflags;
use indexmap::IndexSet;
use rustc_hash::{FxHashMap, FxHashSet};

use loopsched_ir::ir::{Expr, Proc, Stmt, WAccess};
use loopsched_ir::subst::alpha_eq_procs;
use loopsched_ir::types::Type;
use loopsched_ir::uses::{self, reads_of_stmts, writes_of_stmts};
use loopsched_ir::visit::{walk_expr, walk_stmt, Visit};
use loopsched_ir::{SrcInfo, Sym};

use crate::cursor::{resolve, BlockCursor, Cursor, Field, NodeRef};
use crate::error::SchedulingError;
use crate::normalize::{canon_eq, canon_index_expr};
use crate::range::{range_of, Interval, RangeEnv};

pub type SchedResult<T> = std::result::Result<T, SchedulingError>;

/// A configuration field, identified by record name and field name.
pub type ConfigKey = (String, String);

bitflags! {
    /// How a block touches a buffer; the answer to the `buffer_rw` query.
    pub struct RwFlags: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

pub trait SafetyOracle {
    /// `e1` at `at1` and `e2` at `at2` evaluate equal on every reachable
    /// state.
    fn expr_eqv_in_context(
        &self,
        e1: &Expr,
        at1: &Cursor,
        e2: &Expr,
        at2: &Cursor,
    ) -> SchedResult<()>;

    /// `e >= 1` on every reachable state at the given statement.
    fn is_positive(&self, at: &Cursor, e: &Expr) -> SchedResult<()>;

    /// Swapping the adjacent statements `s1; s2` preserves semantics.
    fn reorder_stmts(&self, s1: &Stmt, s2: &Stmt) -> SchedResult<()>;

    /// Swapping `outer` with its unique inner loop preserves semantics.
    fn reorder_loops(&self, outer: &Cursor) -> SchedResult<()>;

    /// Splitting `loop_` at the boundary between `pre` and `post` preserves
    /// semantics.  `skippable` hints that iterations may be dropped for a
    /// half whose statements do not mention the iteration variable.
    fn fission_loop(
        &self,
        loop_: &Stmt,
        pre: &[Stmt],
        post: &[Stmt],
        skippable: bool,
    ) -> SchedResult<()>;

    /// Whether `block` reads and/or writes `buf`.
    fn buffer_rw(&self, block: &[Stmt], buf: &Sym, rank: usize) -> SchedResult<RwFlags>;

    /// Every access to `buf` in `block` is a reduction.
    fn buffer_reduce_only(&self, block: &[Stmt], buf: &Sym, rank: usize) -> SchedResult<()>;

    /// All accesses to the allocation in the following statements lie within
    /// its declared shape.
    fn bounds(&self, alloc: &Cursor, following: &BlockCursor) -> SchedResult<()>;

    /// `buf` is not read after the given statement.
    fn dead_after(&self, at: &Cursor, buf: &Sym, rank: usize) -> SchedResult<()>;

    /// Running the block twice is equivalent to running it once.
    fn idempotent(&self, stmts: &[Stmt]) -> SchedResult<()>;

    /// The config writes in `block` are never observed afterwards; returns
    /// the key set on which post-equivalence is preserved modulo the writes.
    fn delete_config_write(&self, block: &BlockCursor) -> SchedResult<IndexSet<ConfigKey>>;

    /// The two callees are equivalent modulo some set of config keys, which
    /// is returned.
    fn extend_eqv(&self, old_callee: &Proc, new_callee: &Proc) -> SchedResult<IndexSet<ConfigKey>>;

    /// No procedure call in the tree receives two aliasing buffer arguments.
    fn aliasing(&self, root: &Proc) -> SchedResult<()>;
}

// ---------------------------------------------------------------------------
// Conservative implementation

#[derive(Default)]
pub struct ConservativeOracle;

impl ConservativeOracle {
    pub fn new() -> ConservativeOracle {
        ConservativeOracle
    }
}

fn sched_err<T>(msg: String, srcinfo: &SrcInfo) -> SchedResult<T> {
    Err(SchedulingError::new(msg, srcinfo))
}

/// Interval environment visible at a cursor: loop iterators bounded by their
/// enclosing `Seq` ranges, `Size` arguments at least one.
fn env_at(at: &Cursor) -> RangeEnv {
    let mut env = RangeEnv::default();
    let proc = at.proc();
    for arg in &proc.args {
        if matches!(arg.ty, Type::Size) {
            env.insert(arg.name.clone(), Some(Interval::at_least(1)));
        }
    }
    let path = at.path();
    for depth in 0..path.len() {
        if let Ok(NodeRef::Stmt(Stmt::Seq { iter, lo, hi, .. })) = resolve(proc, &path[..depth]) {
            if path[depth].field == Field::Body {
                let lo_r = range_of(&canon_index_expr(lo, &env), &env);
                let hi_r = range_of(&canon_index_expr(hi, &env), &env);
                let bound = match (lo_r.lo, hi_r.hi) {
                    (Some(l), Some(h)) if l < h => Some(Interval::new(l, h - 1)),
                    (Some(l), None) => Some(Interval::at_least(l)),
                    _ => None,
                };
                env.insert(iter.clone(), bound);
            }
        }
    }
    env
}

/// Buffer and config-field effects of a statement sequence, for the Bernstein
/// reorder conditions.
struct Effects {
    reads: FxHashSet<Sym>,
    writes: FxHashSet<Sym>,
    config_reads: FxHashSet<ConfigKey>,
    config_writes: FxHashSet<ConfigKey>,
}

fn effects_of(stmts: &[Stmt]) -> Effects {
    struct ConfigCollector {
        reads: FxHashSet<ConfigKey>,
        writes: FxHashSet<ConfigKey>,
    }
    impl Visit for ConfigCollector {
        fn visit_stmt(&mut self, s: &Stmt) {
            if let Stmt::WriteConfig { config, field, .. } = s {
                self.writes.insert((config.name.clone(), field.clone()));
            }
            walk_stmt(self, s);
        }
        fn visit_expr(&mut self, e: &Expr) {
            if let Expr::ReadConfig { config, field, .. } = e {
                self.reads.insert((config.name.clone(), field.clone()));
            }
            walk_expr(self, e);
        }
    }
    let mut cc = ConfigCollector {
        reads: FxHashSet::default(),
        writes: FxHashSet::default(),
    };
    cc.visit_stmts(stmts);
    Effects {
        reads: reads_of_stmts(stmts).into_iter().map(|(s, _)| s).collect(),
        writes: writes_of_stmts(stmts).into_iter().map(|(s, _)| s).collect(),
        config_reads: cc.reads,
        config_writes: cc.writes,
    }
}

/// All accesses to one buffer in a block: canonical index vectors for reads
/// and writes, plus flags for anything the analysis cannot see through.
#[derive(Default)]
struct AccessSummary {
    read_idx: Vec<Vec<String>>,
    write_idx: Vec<Vec<String>>,
    reduce_idx: Vec<Vec<String>>,
    /// Windowing, stride queries, or opaque call arguments involving the
    /// buffer.
    opaque: bool,
}

fn summarize_accesses(stmts: &[Stmt], buf: &Sym, env: &RangeEnv) -> AccessSummary {
    struct Collector<'a> {
        buf: &'a Sym,
        env: &'a RangeEnv,
        out: AccessSummary,
    }
    impl<'a> Collector<'a> {
        fn canon_vec(&self, idx: &[Expr]) -> Vec<String> {
            idx.iter()
                .map(|e| canon_index_expr(e, self.env).to_string())
                .collect()
        }
    }
    impl<'a> Visit for Collector<'a> {
        fn visit_stmt(&mut self, s: &Stmt) {
            match s {
                Stmt::Assign { name, idx, .. } if name == self.buf => {
                    let v = self.canon_vec(idx);
                    self.out.write_idx.push(v);
                }
                Stmt::Reduce { name, idx, .. } if name == self.buf => {
                    let v = self.canon_vec(idx);
                    self.out.reduce_idx.push(v);
                }
                Stmt::Call { args, .. } => {
                    for a in args {
                        match a {
                            Expr::Read { name, idx, .. } if name == self.buf && idx.is_empty() => {
                                self.out.opaque = true;
                            }
                            Expr::Window { name, .. } if name == self.buf => {
                                self.out.opaque = true;
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
            walk_stmt(self, s);
        }

        fn visit_expr(&mut self, e: &Expr) {
            match e {
                Expr::Read { name, idx, .. } if name == self.buf => {
                    if idx.is_empty() {
                        // scalar read, or buffer passed opaquely
                        self.out.read_idx.push(vec![]);
                    } else {
                        let v = self.canon_vec(idx);
                        self.out.read_idx.push(v);
                    }
                }
                Expr::Window { name, .. } | Expr::Stride { name, .. } if name == self.buf => {
                    self.out.opaque = true;
                }
                _ => {}
            }
            walk_expr(self, e);
        }
    }
    let mut c = Collector {
        buf,
        env,
        out: AccessSummary::default(),
    };
    c.visit_stmts(stmts);
    c.out
}

fn canon_read_of(sym: &Sym, env: &RangeEnv) -> String {
    let e = Expr::read(sym, Type::Index, &SrcInfo::unknown());
    canon_index_expr(&e, env).to_string()
}

/// All canonical index vectors in the summary are identical, and some
/// position is exactly the given iterator (so distinct iterations touch
/// distinct cells).
fn private_per_iteration(summary: &AccessSummary, iters: &[&Sym], env: &RangeEnv) -> bool {
    if summary.opaque {
        return false;
    }
    let all: Vec<&Vec<String>> = summary
        .read_idx
        .iter()
        .chain(&summary.write_idx)
        .chain(&summary.reduce_idx)
        .collect();
    let first = match all.first() {
        Some(f) => f,
        None => return true,
    };
    if first.is_empty() {
        return false;
    }
    if !all.iter().all(|v| v == first) {
        return false;
    }
    iters.iter().all(|it| {
        let key = canon_read_of(it, env);
        first.iter().any(|ix| *ix == key)
    })
}

impl SafetyOracle for ConservativeOracle {
    fn expr_eqv_in_context(
        &self,
        e1: &Expr,
        at1: &Cursor,
        e2: &Expr,
        at2: &Cursor,
    ) -> SchedResult<()> {
        let mut env = env_at(at1);
        env.extend(env_at(at2));
        if canon_eq(e1, e2, &env) {
            Ok(())
        } else {
            sched_err(
                format!("cannot prove {} equivalent to {}", e1, e2),
                e1.srcinfo(),
            )
        }
    }

    fn is_positive(&self, at: &Cursor, e: &Expr) -> SchedResult<()> {
        let env = env_at(at);
        let canon = canon_index_expr(e, &env);
        match range_of(&canon, &env).lo {
            Some(lo) if lo >= 1 => Ok(()),
            _ => sched_err(format!("cannot prove {} to be positive", e), e.srcinfo()),
        }
    }

    fn reorder_stmts(&self, s1: &Stmt, s2: &Stmt) -> SchedResult<()> {
        let e1 = effects_of(std::slice::from_ref(s1));
        let e2 = effects_of(std::slice::from_ref(s2));
        let buf_conflict = e1.writes.intersection(&e2.writes).next().is_some()
            || e1.writes.intersection(&e2.reads).next().is_some()
            || e2.writes.intersection(&e1.reads).next().is_some();
        let cfg_conflict = e1
            .config_writes
            .intersection(&e2.config_writes)
            .next()
            .is_some()
            || e1
                .config_writes
                .intersection(&e2.config_reads)
                .next()
                .is_some()
            || e2
                .config_writes
                .intersection(&e1.config_reads)
                .next()
                .is_some();
        if buf_conflict || cfg_conflict {
            return sched_err(
                "cannot reorder statements that touch the same buffer or config field".into(),
                s1.srcinfo(),
            );
        }
        Ok(())
    }

    fn reorder_loops(&self, outer: &Cursor) -> SchedResult<()> {
        let outer_s = outer
            .stmt()
            .map_err(|e| SchedulingError::misc(e.to_string()))?;
        let (outer_iter, body, srcinfo) = match outer_s {
            Stmt::Seq { iter, body, srcinfo, .. } => (iter, body, srcinfo),
            _ => return sched_err("expected a loop".into(), outer_s.srcinfo()),
        };
        let inner_s = match &body[..] {
            [s @ Stmt::Seq { .. }] => s,
            _ => {
                return sched_err(
                    "expected the outer loop to contain exactly one inner loop".into(),
                    srcinfo,
                )
            }
        };
        let (inner_iter, inner_body) = match inner_s {
            Stmt::Seq { iter, body, .. } => (iter, body),
            _ => unreachable!(),
        };

        // Conservative: writes must land on per-(i, j) private cells;
        // reductions commute and are exempt.
        let env = env_at(outer);
        let mut written: FxHashSet<Sym> = FxHashSet::default();
        for (sym, _) in writes_of_stmts(inner_body) {
            written.insert(sym);
        }
        for buf in written {
            let summary = summarize_accesses(inner_body, &buf, &env);
            if summary.write_idx.is_empty() && !summary.opaque {
                // reduce-only buffers reorder freely
                continue;
            }
            if !private_per_iteration(&summary, &[outer_iter, inner_iter], &env) {
                return sched_err(
                    format!(
                        "cannot reorder loops: writes to {} are not private per iteration",
                        buf
                    ),
                    srcinfo,
                );
            }
        }
        Ok(())
    }

    fn fission_loop(
        &self,
        loop_: &Stmt,
        pre: &[Stmt],
        post: &[Stmt],
        _skippable: bool,
    ) -> SchedResult<()> {
        let (iter, srcinfo) = match loop_ {
            Stmt::Seq { iter, srcinfo, .. } => (iter, srcinfo),
            _ => return sched_err("expected a loop".into(), loop_.srcinfo()),
        };
        let env = RangeEnv::default();

        let e_pre = effects_of(pre);
        let e_post = effects_of(post);
        if !e_pre.config_writes.is_empty() || !e_post.config_writes.is_empty() {
            return sched_err(
                "cannot prove fission safe in the presence of config writes".into(),
                srcinfo,
            );
        }

        // Buffers carried across the cut must be iteration-private: then a
        // later pre-iteration cannot disturb an earlier post-iteration.
        let mut carried: FxHashSet<Sym> = FxHashSet::default();
        for sym in e_pre.writes.iter() {
            if e_post.reads.contains(sym) || e_post.writes.contains(sym) {
                carried.insert(sym.clone());
            }
        }
        for sym in e_post.writes.iter() {
            if e_pre.reads.contains(sym) {
                carried.insert(sym.clone());
            }
        }

        for buf in carried {
            let mut summary = summarize_accesses(pre, &buf, &env);
            let post_summary = summarize_accesses(post, &buf, &env);
            summary.read_idx.extend(post_summary.read_idx);
            summary.write_idx.extend(post_summary.write_idx);
            summary.reduce_idx.extend(post_summary.reduce_idx);
            summary.opaque |= post_summary.opaque;
            if !private_per_iteration(&summary, &[iter], &env) {
                return sched_err(
                    format!(
                        "cannot fission: accesses to {} are not private per iteration of {}",
                        buf, iter
                    ),
                    srcinfo,
                );
            }
        }
        Ok(())
    }

    fn buffer_rw(&self, block: &[Stmt], buf: &Sym, _rank: usize) -> SchedResult<RwFlags> {
        let mut flags = RwFlags::empty();
        if reads_of_stmts(block).iter().any(|(s, _)| s == buf) {
            flags |= RwFlags::READ;
        }
        if writes_of_stmts(block).iter().any(|(s, _)| s == buf) {
            flags |= RwFlags::WRITE;
        }
        // A reduction reads the old value as well as writing the new one.
        let env = RangeEnv::default();
        if !summarize_accesses(block, buf, &env).reduce_idx.is_empty() {
            flags |= RwFlags::READ | RwFlags::WRITE;
        }
        Ok(flags)
    }

    fn buffer_reduce_only(&self, block: &[Stmt], buf: &Sym, _rank: usize) -> SchedResult<()> {
        let env = RangeEnv::default();
        let summary = summarize_accesses(block, buf, &env);
        if !summary.read_idx.is_empty() || !summary.write_idx.is_empty() || summary.opaque {
            return sched_err(
                format!("expected every access to {} to be a reduction", buf),
                block
                    .first()
                    .map(|s| s.srcinfo().clone())
                    .as_ref()
                    .unwrap_or(&SrcInfo::unknown()),
            );
        }
        Ok(())
    }

    fn bounds(&self, alloc: &Cursor, following: &BlockCursor) -> SchedResult<()> {
        let (buf, shape, srcinfo) = match alloc
            .stmt()
            .map_err(|e| SchedulingError::misc(e.to_string()))?
        {
            Stmt::Alloc { name, ty, srcinfo, .. } => {
                (name.clone(), ty.shape().to_vec(), srcinfo.clone())
            }
            s => return sched_err("expected an allocation".into(), s.srcinfo()),
        };
        if shape.is_empty() {
            return Ok(());
        }
        let env = env_at(alloc);
        // Enclosing loops also bound their iterators symbolically.
        let mut sym_bounds: FxHashMap<Sym, (String, String)> = FxHashMap::default();
        let path = alloc.path();
        for depth in 0..path.len() {
            if let Ok(NodeRef::Stmt(Stmt::Seq { iter, lo, hi, .. })) =
                resolve(alloc.proc(), &path[..depth])
            {
                if path[depth].field == Field::Body {
                    sym_bounds.insert(
                        iter.clone(),
                        (
                            canon_index_expr(lo, &env).to_string(),
                            canon_index_expr(hi, &env).to_string(),
                        ),
                    );
                }
            }
        }
        let stmts = following
            .stmts()
            .map_err(|e| SchedulingError::misc(e.to_string()))?;
        let mut checker = BoundsChecker {
            buf,
            shape,
            env,
            sym_bounds,
            failure: None,
        };
        checker.visit_stmts(&stmts);
        match checker.failure {
            None => Ok(()),
            Some(msg) => sched_err(msg, &srcinfo),
        }
    }

    fn dead_after(&self, at: &Cursor, buf: &Sym, _rank: usize) -> SchedResult<()> {
        let region = region_after(at);
        for stmts in &region {
            if reads_of_stmts(stmts).iter().any(|(s, _)| s == buf) {
                return sched_err(
                    format!("{} is read again after the target statement", buf),
                    at.stmt()
                        .map(|s| s.srcinfo().clone())
                        .as_ref()
                        .unwrap_or(&SrcInfo::unknown()),
                );
            }
        }
        Ok(())
    }

    fn idempotent(&self, stmts: &[Stmt]) -> SchedResult<()> {
        if uses::is_idempotent(stmts) {
            Ok(())
        } else {
            sched_err(
                "statement is not idempotent".into(),
                stmts
                    .first()
                    .map(|s| s.srcinfo().clone())
                    .as_ref()
                    .unwrap_or(&SrcInfo::unknown()),
            )
        }
    }

    fn delete_config_write(&self, block: &BlockCursor) -> SchedResult<IndexSet<ConfigKey>> {
        let stmts = block
            .stmts()
            .map_err(|e| SchedulingError::misc(e.to_string()))?;
        let eff = effects_of(&stmts);
        let keys: IndexSet<ConfigKey> = eff.config_writes.iter().cloned().collect();
        if keys.is_empty() {
            return Ok(keys);
        }
        let last = block.at(block.len() - 1);
        let region = region_after(&last);
        for stmts in &region {
            let later = effects_of(stmts);
            for key in &keys {
                if later.config_reads.contains(key) {
                    return sched_err(
                        format!("config field {}.{} is read afterwards", key.0, key.1),
                        last.stmt()
                            .map(|s| s.srcinfo().clone())
                            .as_ref()
                            .unwrap_or(&SrcInfo::unknown()),
                    );
                }
            }
        }
        Ok(keys)
    }

    fn extend_eqv(&self, old_callee: &Proc, new_callee: &Proc) -> SchedResult<IndexSet<ConfigKey>> {
        if alpha_eq_procs(old_callee, new_callee) {
            return Ok(IndexSet::new());
        }
        let (old_stripped, old_keys) = strip_config_writes(old_callee);
        let (new_stripped, new_keys) = strip_config_writes(new_callee);
        if alpha_eq_procs(&old_stripped, &new_stripped) {
            let mut keys = old_keys;
            keys.extend(new_keys);
            return Ok(keys);
        }
        sched_err(
            format!(
                "procedures {} and {} are not equivalent",
                old_callee.name, new_callee.name
            ),
            &new_callee.srcinfo,
        )
    }

    fn aliasing(&self, root: &Proc) -> SchedResult<()> {
        struct Checker {
            win_src: FxHashMap<Sym, Sym>,
            failure: Option<(String, SrcInfo)>,
        }
        impl Checker {
            fn base(&self, s: &Sym) -> Sym {
                let mut cur = s.clone();
                while let Some(next) = self.win_src.get(&cur) {
                    cur = next.clone();
                }
                cur
            }
        }
        impl Visit for Checker {
            fn visit_stmt(&mut self, s: &Stmt) {
                match s {
                    Stmt::WindowStmt { name, rhs, .. } => {
                        if let Expr::Window { name: src, .. } = rhs {
                            self.win_src.insert(name.clone(), src.clone());
                        }
                    }
                    Stmt::Call { proc, args, srcinfo } => {
                        let mut seen: FxHashSet<Sym> = FxHashSet::default();
                        for a in args {
                            let buf = match a {
                                Expr::Read { name, idx, ty, .. }
                                    if idx.is_empty() && ty.is_tensor_or_window() =>
                                {
                                    Some(self.base(name))
                                }
                                Expr::Window { name, .. } => Some(self.base(name)),
                                _ => None,
                            };
                            if let Some(buf) = buf {
                                if !seen.insert(buf.clone()) && self.failure.is_none() {
                                    self.failure = Some((
                                        format!(
                                            "call to {} passes aliasing views of {}",
                                            proc.name, buf
                                        ),
                                        srcinfo.clone(),
                                    ));
                                }
                            }
                        }
                    }
                    _ => {}
                }
                walk_stmt(self, s);
            }
        }
        let mut c = Checker {
            win_src: FxHashMap::default(),
            failure: None,
        };
        c.visit_stmts(&root.body);
        match c.failure {
            None => Ok(()),
            Some((msg, srcinfo)) => sched_err(msg, &srcinfo),
        }
    }
}

/// The statement regions that may execute after the statement at `at`:
/// later siblings at every enclosing level, and — because loops repeat —
/// the entire body of the outermost enclosing `Seq`, if any.
fn region_after(at: &Cursor) -> Vec<Vec<Stmt>> {
    let proc = at.proc();
    let path = at.path();
    let mut out: Vec<Vec<Stmt>> = Vec::new();

    for depth in (0..path.len()).rev() {
        let step = path[depth];
        if !matches!(step.field, Field::Body | Field::Orelse) {
            continue;
        }
        let parent = &path[..depth];
        let block: Option<&[Stmt]> = match resolve(proc, parent) {
            Ok(NodeRef::Proc(p)) if step.field == Field::Body => Some(&p.body),
            Ok(NodeRef::Stmt(Stmt::Seq { body, .. })) if step.field == Field::Body => Some(body),
            Ok(NodeRef::Stmt(Stmt::If { body, .. })) if step.field == Field::Body => Some(body),
            Ok(NodeRef::Stmt(Stmt::If { orelse, .. })) if step.field == Field::Orelse => {
                Some(orelse)
            }
            _ => None,
        };
        if let Some(block) = block {
            let after = (step.idx as usize + 1).min(block.len());
            out.push(block[after..].to_vec());
        }
    }

    // Loops re-run their whole body.
    for depth in 0..path.len() {
        if let Ok(NodeRef::Stmt(s @ Stmt::Seq { .. })) = resolve(proc, &path[..depth]) {
            out.push(vec![s.clone()]);
            break;
        }
    }
    out
}

fn strip_config_writes(proc: &Proc) -> (Proc, IndexSet<ConfigKey>) {
    fn strip(stmts: &[Stmt], keys: &mut IndexSet<ConfigKey>) -> Vec<Stmt> {
        let mut out = Vec::with_capacity(stmts.len());
        for s in stmts {
            match s {
                Stmt::WriteConfig { config, field, .. } => {
                    keys.insert((config.name.clone(), field.clone()));
                }
                Stmt::If { cond, body, orelse, srcinfo } => out.push(Stmt::If {
                    cond: cond.clone(),
                    body: strip(body, keys),
                    orelse: strip(orelse, keys),
                    srcinfo: srcinfo.clone(),
                }),
                Stmt::Seq { iter, lo, hi, body, srcinfo } => out.push(Stmt::Seq {
                    iter: iter.clone(),
                    lo: lo.clone(),
                    hi: hi.clone(),
                    body: strip(body, keys),
                    srcinfo: srcinfo.clone(),
                }),
                other => out.push(other.clone()),
            }
        }
        out
    }
    let mut keys = IndexSet::new();
    let body = strip(&proc.body, &mut keys);
    (
        Proc {
            body,
            ..proc.clone()
        },
        keys,
    )
}

/// Per-access bounds verification for one allocation.
struct BoundsChecker {
    buf: Sym,
    shape: Vec<Expr>,
    env: RangeEnv,
    /// Symbolic loop bounds for iterators met while walking.
    sym_bounds: FxHashMap<Sym, (String, String)>,
    failure: Option<String>,
}

impl BoundsChecker {
    fn check_index(&mut self, dim: usize, e: &Expr) {
        if self.failure.is_some() {
            return;
        }
        let extent = &self.shape[dim];
        let ce = canon_index_expr(e, &self.env);
        let cext = canon_index_expr(extent, &self.env);

        // Constant extents: interval containment.
        if let Some(ext) = cext.as_const_int() {
            if let Some((lo, hi)) = range_of(&ce, &self.env).bounded() {
                if lo >= 0 && hi < ext {
                    return;
                }
            }
        } else if let Some((lo, hi)) = range_of(&ce, &self.env).bounded() {
            // A constant access against a symbolic extent cannot be decided.
            let _ = (lo, hi);
        }

        // Symbolic extents: the access is exactly a loop iterator running
        // from zero to the extent.
        if let Expr::Read { name, idx, .. } = e {
            if idx.is_empty() {
                if let Some((lo, hi)) = self.sym_bounds.get(name) {
                    if lo == "0" && *hi == cext.to_string() {
                        return;
                    }
                }
            }
        }
        self.failure = Some(format!(
            "cannot prove access {}[..., {}, ...] within extent {}",
            self.buf, e, extent
        ));
    }

    fn check_access(&mut self, idx: &[Expr]) {
        if idx.len() != self.shape.len() {
            self.failure = Some(format!(
                "access to {} has {} indices but rank {}",
                self.buf,
                idx.len(),
                self.shape.len()
            ));
            return;
        }
        for (d, e) in idx.iter().enumerate() {
            self.check_index(d, e);
        }
    }
}

impl Visit for BoundsChecker {
    fn visit_stmt(&mut self, s: &Stmt) {
        match s {
            Stmt::Assign { name, idx, .. } | Stmt::Reduce { name, idx, .. } if *name == self.buf => {
                self.check_access(idx);
            }
            Stmt::Seq { iter, lo, hi, body, .. } => {
                self.visit_expr(lo);
                self.visit_expr(hi);
                let clo = canon_index_expr(lo, &self.env);
                let chi = canon_index_expr(hi, &self.env);
                let lo_r = range_of(&clo, &self.env);
                let hi_r = range_of(&chi, &self.env);
                let bound = match (lo_r.lo, hi_r.hi) {
                    (Some(l), Some(h)) if l < h => Some(Interval::new(l, h - 1)),
                    _ => None,
                };
                let saved_env = self.env.insert(iter.clone(), bound);
                let saved_sym = self
                    .sym_bounds
                    .insert(iter.clone(), (clo.to_string(), chi.to_string()));
                self.visit_stmts(body);
                match saved_env {
                    Some(v) => {
                        self.env.insert(iter.clone(), v);
                    }
                    None => {
                        self.env.remove(iter);
                    }
                }
                match saved_sym {
                    Some(v) => {
                        self.sym_bounds.insert(iter.clone(), v);
                    }
                    None => {
                        self.sym_bounds.remove(iter);
                    }
                }
                return;
            }
            _ => {}
        }
        walk_stmt(self, s);
    }

    fn visit_expr(&mut self, e: &Expr) {
        match e {
            Expr::Read { name, idx, .. } if *name == self.buf && !idx.is_empty() => {
                self.check_access(idx);
            }
            Expr::Window { name, idx, .. } if *name == self.buf => {
                for (d, w) in idx.iter().enumerate() {
                    match w {
                        WAccess::Point { pt, .. } => self.check_index(d, pt),
                        WAccess::Interval { lo, .. } => {
                            // conservative: the low endpoint must be a valid
                            // index; the high endpoint is exclusive and is
                            // not checked beyond well-formedness
                            self.check_index(d, lo);
                        }
                    }
                }
            }
            _ => {}
        }
        walk_expr(self, e);
    }
}
