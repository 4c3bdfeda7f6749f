//! The rewrite kernel: scheduling directives as IR-to-IR transformations.
//!
//! The overall implementation strategy for every directive is:
//!
//! 1. Check the directive's preconditions — structural ones directly,
//!    semantic ones through the safety oracle — before touching the tree.
//!    A failed check raises a scheduling error and no rewrite happens.
//!
//! 2. Compose the rewrite out of atomic cursor edits (insert, delete,
//!    replace, move, wrap).  Each edit yields a new immutable root and a
//!    forwarding record; the directive threads the composition through a
//!    small transaction value, so cursors collected against the input tree
//!    can be re-targeted at every step.
//!
//! 3. Return the final root plus the composed forwarder.  Callers apply the
//!    forwarder to any cursors they obtained before the directive.
//!
//! The catalogue is split by subject: [`loops`] reshapes control flow,
//! [`memory`] reshapes allocations and buffer accesses, and [`exprs`]
//! rewrites expressions, configuration state, and procedure structure.

pub mod exprs;
pub mod loops;
pub mod memory;

use std::rc::Rc;

use loopsched_ir::ir::{Expr, Proc, Stmt};
use loopsched_ir::Sym;

use crate::cursor::{for_each_node, BlockCursor, Cursor, Field, Forward, GapCursor, NodeRef, Path};
use crate::error::Result;
use crate::oracle::SafetyOracle;

/// An editing transaction: the current root plus the forwarder from the
/// directive's input root.  Edits are applied through [`Tx::apply`], and
/// cursors created against the input are re-targeted with [`Tx::fwd`].
pub(crate) struct Tx {
    ir: Rc<Proc>,
    fwd: Forward,
}

impl Tx {
    pub fn new(root: &Rc<Proc>) -> Tx {
        Tx {
            ir: root.clone(),
            fwd: Forward::identity(root),
        }
    }

    pub fn ir(&self) -> &Rc<Proc> {
        &self.ir
    }

    /// Forward a cursor from the input root into the current root.
    pub fn fwd(&self, c: &Cursor) -> Result<Cursor> {
        Ok(self.fwd.fwd(c)?)
    }

    pub fn fwd_gap(&self, g: &GapCursor) -> Result<GapCursor> {
        Ok(self.fwd.fwd_gap(g)?)
    }

    pub fn fwd_block(&self, b: &BlockCursor) -> Result<BlockCursor> {
        Ok(self.fwd.fwd_block(b)?)
    }

    /// Fold one atomic edit into the transaction.
    pub fn apply(&mut self, step: (Rc<Proc>, Forward)) {
        let (ir, f) = step;
        let cur = std::mem::replace(&mut self.fwd, Forward::identity(&self.ir));
        self.fwd = cur.then(f);
        self.ir = ir;
    }

    pub fn finish(self) -> (Rc<Proc>, Forward) {
        (self.ir, self.fwd)
    }
}

/// Where a buffer is touched inside a region, as paths into the region's
/// root.  Sites are collected in pre-order.
#[derive(Clone, Debug)]
pub(crate) enum AccessSite {
    /// A `Read` expression of the buffer.
    Read(Path),
    /// A `Window` expression of the buffer.
    Window(Path),
    /// A `Stride` expression of the buffer.
    Stride(Path),
    /// An `Assign` or `Reduce` statement targeting the buffer.
    Write(Path),
}

impl AccessSite {
    pub fn path(&self) -> &Path {
        match self {
            AccessSite::Read(p)
            | AccessSite::Window(p)
            | AccessSite::Stride(p)
            | AccessSite::Write(p) => p,
        }
    }
}

/// Collect every access to `buf` in the subtrees of the given statement
/// cursors.
pub(crate) fn collect_accesses(root: &Rc<Proc>, region: &[Cursor], buf: &Sym) -> Vec<AccessSite> {
    let mut out = Vec::new();
    for c in region {
        let start: Path = c.path().iter().copied().collect();
        for_each_node(root, &start, &mut |path, node| match node {
            NodeRef::Expr(Expr::Read { name, .. }) if name == buf => {
                out.push(AccessSite::Read(path.clone()));
            }
            NodeRef::Expr(Expr::Window { name, .. }) if name == buf => {
                out.push(AccessSite::Window(path.clone()));
            }
            NodeRef::Expr(Expr::Stride { name, .. }) if name == buf => {
                out.push(AccessSite::Stride(path.clone()));
            }
            NodeRef::Stmt(Stmt::Assign { name, .. }) | NodeRef::Stmt(Stmt::Reduce { name, .. })
                if name == buf =>
            {
                out.push(AccessSite::Write(path.clone()));
            }
            _ => {}
        });
    }
    out
}

/// Is the node at `path` an argument of a `Call` statement?
pub(crate) fn is_call_argument(path: &Path) -> bool {
    path.last().map(|s| s.field) == Some(Field::Args)
}

/// The block slice from `c` to the end of its sibling block, `c` included.
pub(crate) fn rest_of_block(c: &Cursor) -> Result<BlockCursor> {
    Ok(c.as_block()?.to_end()?)
}

/// Equivalence of the write destinations of two assignments/reductions,
/// decided by the oracle's expression-equivalence query per index.
pub(crate) fn same_write_dest(
    oracle: &dyn SafetyOracle,
    c1: &Cursor,
    s1: &Stmt,
    c2: &Cursor,
    s2: &Stmt,
) -> bool {
    let (n1, i1) = match s1 {
        Stmt::Assign { name, idx, .. } | Stmt::Reduce { name, idx, .. } => (name, idx),
        _ => return false,
    };
    let (n2, i2) = match s2 {
        Stmt::Assign { name, idx, .. } | Stmt::Reduce { name, idx, .. } => (name, idx),
        _ => return false,
    };
    if n1 != n2 || i1.len() != i2.len() {
        return false;
    }
    i1.iter()
        .zip(i2)
        .all(|(a, b)| oracle.expr_eqv_in_context(a, c1, b, c2).is_ok())
}
