//! Cursors: navigable, forwardable references into an IR tree.
//!
//! A cursor is a root reference plus a path of `(field, index)` steps from
//! the procedure down to a node.  Cursors designate a single node, a
//! contiguous block of sibling statements, or a *gap* between siblings
//! (including the endpoints).  The atomic edits — insert, delete, replace,
//! move, wrap — each produce a new root plus a [`Forward`]: an ordered list
//! of small edit records that transports any cursor valid under the old root
//! to its image under the new one.  A directive composes several atomic
//! edits and returns the composition of their forwarders.
//!
//! Edits keep statement blocks well-formed: deleting or moving away every
//! statement of a `body` block leaves a `Pass` in its place (an `orelse`
//! block may become empty, since an empty `orelse` just means "no else").

use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use loopsched_ir::ir::{Expr, Proc, Stmt, WAccess};
use loopsched_ir::types::Type;
use loopsched_ir::{SrcInfo, Sym};

use crate::error::InvalidCursorError;

/// The named child-edges of the IR, as they appear in cursor paths.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub enum Field {
    /// Statement children of a `Seq`, `If`, `Instr`, or the procedure root.
    Body,
    /// Statement children of an `If`'s else branch.
    Orelse,
    /// Indexing expressions of a read, assignment, or reduction; window
    /// accesses of a window expression.
    Idx,
    /// Arguments of a `Call`.
    Args,
    /// Preconditions of the procedure root.
    Preds,
    Cond,
    Lo,
    Hi,
    Rhs,
    Lhs,
    Arg,
    /// The value of a `Select`.
    SelBody,
    /// The endpoints of a window interval access, or a point access.
    WinLo,
    WinHi,
    WinPt,
    /// The iterator symbol of a `Seq`.
    Iter,
    /// The type annotation of an allocation or write.
    Ty,
}

impl Field {
    /// Fields holding a statement list (the only fields block and gap
    /// cursors may address).
    fn is_stmt_block(self) -> bool {
        matches!(self, Field::Body | Field::Orelse)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct Step {
    pub field: Field,
    pub idx: u32,
}

impl Step {
    fn new(field: Field, idx: usize) -> Step {
        Step {
            field,
            idx: idx as u32,
        }
    }
}

pub type Path = SmallVec<[Step; 8]>;

pub fn render_path(path: &[Step]) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    for step in path {
        let _ = write!(out, ".{:?}[{}]", step.field, step.idx);
    }
    if out.is_empty() {
        out.push_str("<root>");
    }
    out
}

fn invalid(path: &[Step], reason: impl Into<String>) -> InvalidCursorError {
    InvalidCursorError::new(render_path(path), reason)
}

/// A reference to the node a cursor points at.
#[derive(Clone, Copy, Debug)]
pub enum NodeRef<'a> {
    Proc(&'a Proc),
    Stmt(&'a Stmt),
    Expr(&'a Expr),
    WAccess(&'a WAccess),
    Sym(&'a Sym),
    Ty(&'a Type),
}

enum NodeMut<'a> {
    Proc(&'a mut Proc),
    Stmt(&'a mut Stmt),
    Expr(&'a mut Expr),
    WAccess(&'a mut WAccess),
    Sym(&'a mut Sym),
    Ty(&'a mut Type),
}

/// A replacement value for [`Cursor::replace`].
#[derive(Clone, Debug)]
pub enum NodeValue {
    Expr(Expr),
    WAccess(WAccess),
    Sym(Sym),
    Ty(Type),
}

fn step_ref<'a>(node: NodeRef<'a>, step: Step, path: &[Step]) -> Result<NodeRef<'a>, InvalidCursorError> {
    let i = step.idx as usize;
    let out = match (node, step.field) {
        (NodeRef::Proc(p), Field::Body) => p.body.get(i).map(NodeRef::Stmt),
        (NodeRef::Proc(p), Field::Preds) => p.preds.get(i).map(NodeRef::Expr),
        (NodeRef::Stmt(s), field) => match (s, field) {
            (Stmt::If { cond, .. }, Field::Cond) => Some(NodeRef::Expr(cond)),
            (Stmt::If { body, .. }, Field::Body) => body.get(i).map(NodeRef::Stmt),
            (Stmt::If { orelse, .. }, Field::Orelse) => orelse.get(i).map(NodeRef::Stmt),
            (Stmt::Seq { iter, .. }, Field::Iter) => Some(NodeRef::Sym(iter)),
            (Stmt::Seq { lo, .. }, Field::Lo) => Some(NodeRef::Expr(lo)),
            (Stmt::Seq { hi, .. }, Field::Hi) => Some(NodeRef::Expr(hi)),
            (Stmt::Seq { body, .. }, Field::Body) => body.get(i).map(NodeRef::Stmt),
            (Stmt::Assign { idx, .. } | Stmt::Reduce { idx, .. }, Field::Idx) => {
                idx.get(i).map(NodeRef::Expr)
            }
            (
                Stmt::Assign { rhs, .. }
                | Stmt::Reduce { rhs, .. }
                | Stmt::WriteConfig { rhs, .. }
                | Stmt::WindowStmt { rhs, .. },
                Field::Rhs,
            ) => Some(NodeRef::Expr(rhs)),
            (
                Stmt::Assign { ty, .. }
                | Stmt::Reduce { ty, .. }
                | Stmt::Alloc { ty, .. }
                | Stmt::Free { ty, .. },
                Field::Ty,
            ) => Some(NodeRef::Ty(ty)),
            (Stmt::Call { args, .. }, Field::Args) => args.get(i).map(NodeRef::Expr),
            (Stmt::Instr { body, .. }, Field::Body) if i == 0 => Some(NodeRef::Stmt(body)),
            _ => None,
        },
        (NodeRef::Expr(e), field) => match (e, field) {
            (Expr::BinOp { lhs, .. }, Field::Lhs) => Some(NodeRef::Expr(lhs)),
            (Expr::BinOp { rhs, .. }, Field::Rhs) => Some(NodeRef::Expr(rhs)),
            (Expr::USub { arg, .. }, Field::Arg) => Some(NodeRef::Expr(arg)),
            (Expr::Select { cond, .. }, Field::Cond) => Some(NodeRef::Expr(cond)),
            (Expr::Select { body, .. }, Field::SelBody) => Some(NodeRef::Expr(body)),
            (Expr::Read { idx, .. }, Field::Idx) => idx.get(i).map(NodeRef::Expr),
            (Expr::Window { idx, .. }, Field::Idx) => idx.get(i).map(NodeRef::WAccess),
            _ => None,
        },
        (NodeRef::WAccess(w), field) => match (w, field) {
            (WAccess::Point { pt, .. }, Field::WinPt) => Some(NodeRef::Expr(pt)),
            (WAccess::Interval { lo, .. }, Field::WinLo) => Some(NodeRef::Expr(lo)),
            (WAccess::Interval { hi, .. }, Field::WinHi) => Some(NodeRef::Expr(hi)),
            _ => None,
        },
        _ => None,
    };
    out.ok_or_else(|| invalid(path, "path does not resolve in this tree"))
}

fn step_mut<'a>(
    node: NodeMut<'a>,
    step: Step,
    path: &[Step],
) -> Result<NodeMut<'a>, InvalidCursorError> {
    let i = step.idx as usize;
    let out = match (node, step.field) {
        (NodeMut::Proc(p), Field::Body) => p.body.get_mut(i).map(NodeMut::Stmt),
        (NodeMut::Proc(p), Field::Preds) => p.preds.get_mut(i).map(NodeMut::Expr),
        (NodeMut::Stmt(s), field) => match (s, field) {
            (Stmt::If { cond, .. }, Field::Cond) => Some(NodeMut::Expr(cond)),
            (Stmt::If { body, .. }, Field::Body) => body.get_mut(i).map(NodeMut::Stmt),
            (Stmt::If { orelse, .. }, Field::Orelse) => orelse.get_mut(i).map(NodeMut::Stmt),
            (Stmt::Seq { iter, .. }, Field::Iter) => Some(NodeMut::Sym(iter)),
            (Stmt::Seq { lo, .. }, Field::Lo) => Some(NodeMut::Expr(lo)),
            (Stmt::Seq { hi, .. }, Field::Hi) => Some(NodeMut::Expr(hi)),
            (Stmt::Seq { body, .. }, Field::Body) => body.get_mut(i).map(NodeMut::Stmt),
            (Stmt::Assign { idx, .. } | Stmt::Reduce { idx, .. }, Field::Idx) => {
                idx.get_mut(i).map(NodeMut::Expr)
            }
            (
                Stmt::Assign { rhs, .. }
                | Stmt::Reduce { rhs, .. }
                | Stmt::WriteConfig { rhs, .. }
                | Stmt::WindowStmt { rhs, .. },
                Field::Rhs,
            ) => Some(NodeMut::Expr(rhs)),
            (
                Stmt::Assign { ty, .. }
                | Stmt::Reduce { ty, .. }
                | Stmt::Alloc { ty, .. }
                | Stmt::Free { ty, .. },
                Field::Ty,
            ) => Some(NodeMut::Ty(ty)),
            (Stmt::Call { args, .. }, Field::Args) => args.get_mut(i).map(NodeMut::Expr),
            (Stmt::Instr { body, .. }, Field::Body) if i == 0 => Some(NodeMut::Stmt(body)),
            _ => None,
        },
        (NodeMut::Expr(e), field) => match (e, field) {
            (Expr::BinOp { lhs, .. }, Field::Lhs) => Some(NodeMut::Expr(lhs)),
            (Expr::BinOp { rhs, .. }, Field::Rhs) => Some(NodeMut::Expr(rhs)),
            (Expr::USub { arg, .. }, Field::Arg) => Some(NodeMut::Expr(arg)),
            (Expr::Select { cond, .. }, Field::Cond) => Some(NodeMut::Expr(cond)),
            (Expr::Select { body, .. }, Field::SelBody) => Some(NodeMut::Expr(body)),
            (Expr::Read { idx, .. }, Field::Idx) => idx.get_mut(i).map(NodeMut::Expr),
            (Expr::Window { idx, .. }, Field::Idx) => idx.get_mut(i).map(NodeMut::WAccess),
            _ => None,
        },
        (NodeMut::WAccess(w), field) => match (w, field) {
            (WAccess::Point { pt, .. }, Field::WinPt) => Some(NodeMut::Expr(pt)),
            (WAccess::Interval { lo, .. }, Field::WinLo) => Some(NodeMut::Expr(lo)),
            (WAccess::Interval { hi, .. }, Field::WinHi) => Some(NodeMut::Expr(hi)),
            _ => None,
        },
        _ => None,
    };
    out.ok_or_else(|| invalid(path, "path does not resolve in this tree"))
}

pub fn resolve<'a>(proc: &'a Proc, path: &[Step]) -> Result<NodeRef<'a>, InvalidCursorError> {
    let mut node = NodeRef::Proc(proc);
    for &step in path {
        node = step_ref(node, step, path)?;
    }
    Ok(node)
}

fn resolve_mut<'a>(proc: &'a mut Proc, path: &[Step]) -> Result<NodeMut<'a>, InvalidCursorError> {
    let mut node = NodeMut::Proc(proc);
    for &step in path {
        node = step_mut(node, step, path)?;
    }
    Ok(node)
}

/// Resolve `parent`+`field` to the statement list it names.
fn block_mut<'a>(
    proc: &'a mut Proc,
    parent: &[Step],
    field: Field,
) -> Result<&'a mut Vec<Stmt>, InvalidCursorError> {
    if !field.is_stmt_block() {
        return Err(invalid(parent, "not a statement block field"));
    }
    match resolve_mut(proc, parent)? {
        NodeMut::Proc(p) if field == Field::Body => Ok(&mut p.body),
        NodeMut::Stmt(Stmt::Seq { body, .. }) if field == Field::Body => Ok(body),
        NodeMut::Stmt(Stmt::If { body, .. }) if field == Field::Body => Ok(body),
        NodeMut::Stmt(Stmt::If { orelse, .. }) if field == Field::Orelse => Ok(orelse),
        _ => Err(invalid(parent, "parent has no such statement block")),
    }
}

fn block_ref<'a>(
    proc: &'a Proc,
    parent: &[Step],
    field: Field,
) -> Result<&'a [Stmt], InvalidCursorError> {
    match resolve(proc, parent)? {
        NodeRef::Proc(p) if field == Field::Body => Ok(&p.body),
        NodeRef::Stmt(Stmt::Seq { body, .. }) if field == Field::Body => Ok(body),
        NodeRef::Stmt(Stmt::If { body, .. }) if field == Field::Body => Ok(body),
        NodeRef::Stmt(Stmt::If { orelse, .. }) if field == Field::Orelse => Ok(orelse),
        _ => Err(invalid(parent, "parent has no such statement block")),
    }
}

fn clone_mutate(
    root: &Rc<Proc>,
    f: impl FnOnce(&mut Proc) -> Result<(), InvalidCursorError>,
) -> Result<Rc<Proc>, InvalidCursorError> {
    let mut proc = (**root).clone();
    f(&mut proc)?;
    Ok(Rc::new(proc))
}

/// Re-establish the block invariant after removals: a `body` block must not
/// be left empty.
fn patch_empty_block(block: &mut Vec<Stmt>, field: Field, srcinfo: &SrcInfo) {
    if block.is_empty() && field == Field::Body {
        block.push(Stmt::Pass {
            srcinfo: srcinfo.clone(),
        });
    }
}

// ---------------------------------------------------------------------------
// Cursors

/// A cursor naming a single node of the tree.
#[derive(Clone)]
pub struct Cursor {
    root: Rc<Proc>,
    path: Path,
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Cursor({})", render_path(&self.path))
    }
}

impl Cursor {
    /// The cursor naming the procedure itself.
    pub fn root(proc: &Rc<Proc>) -> Cursor {
        Cursor {
            root: proc.clone(),
            path: Path::new(),
        }
    }

    pub fn from_path(proc: &Rc<Proc>, path: Path) -> Cursor {
        Cursor {
            root: proc.clone(),
            path,
        }
    }

    pub fn proc(&self) -> &Rc<Proc> {
        &self.root
    }

    pub fn path(&self) -> &[Step] {
        &self.path
    }

    pub fn same_root(&self, other: &Cursor) -> bool {
        Rc::ptr_eq(&self.root, &other.root)
    }

    pub fn node(&self) -> Result<NodeRef, InvalidCursorError> {
        resolve(&self.root, &self.path)
    }

    pub fn stmt(&self) -> Result<&Stmt, InvalidCursorError> {
        match self.node()? {
            NodeRef::Stmt(s) => Ok(s),
            _ => Err(invalid(&self.path, "expected a statement")),
        }
    }

    pub fn expr(&self) -> Result<&Expr, InvalidCursorError> {
        match self.node()? {
            NodeRef::Expr(e) => Ok(e),
            _ => Err(invalid(&self.path, "expected an expression")),
        }
    }

    pub fn child(&self, field: Field, idx: usize) -> Cursor {
        let mut path = self.path.clone();
        path.push(Step::new(field, idx));
        Cursor {
            root: self.root.clone(),
            path,
        }
    }

    pub fn parent(&self) -> Option<Cursor> {
        if self.path.is_empty() {
            return None;
        }
        let mut path = self.path.clone();
        path.pop();
        Some(Cursor {
            root: self.root.clone(),
            path,
        })
    }

    /// The nearest enclosing statement cursor (identity if this already is
    /// one).
    pub fn enclosing_stmt(&self) -> Result<Cursor, InvalidCursorError> {
        let mut c = self.clone();
        loop {
            match c.node()? {
                NodeRef::Stmt(_) => return Ok(c),
                _ => match c.parent() {
                    Some(p) => c = p,
                    None => return Err(invalid(&self.path, "no enclosing statement")),
                },
            }
        }
    }

    /// Number of statements in this statement's sibling block.
    pub fn sibling_count(&self) -> Result<usize, InvalidCursorError> {
        let (parent, field, _) = self.split_block_pos()?;
        Ok(block_ref(&self.root, &parent, field)?.len())
    }

    /// Index of this statement within its sibling block, if it is one.
    pub fn block_index(&self) -> Option<usize> {
        let last = self.path.last()?;
        if last.field.is_stmt_block() {
            Some(last.idx as usize)
        } else {
            None
        }
    }

    fn split_block_pos(&self) -> Result<(Path, Field, usize), InvalidCursorError> {
        match self.path.last() {
            Some(last) if last.field.is_stmt_block() => {
                let mut parent = self.path.clone();
                parent.pop();
                Ok((parent, self.path.last().unwrap().field, self.path.last().unwrap().idx as usize))
            }
            _ => Err(invalid(&self.path, "not a statement in a block")),
        }
    }

    pub fn prev(&self) -> Option<Cursor> {
        let (_, _, i) = self.split_block_pos().ok()?;
        if i == 0 {
            return None;
        }
        let mut path = self.path.clone();
        path.last_mut().unwrap().idx -= 1;
        Some(Cursor {
            root: self.root.clone(),
            path,
        })
    }

    pub fn next(&self) -> Option<Cursor> {
        let (parent, field, i) = self.split_block_pos().ok()?;
        let block = block_ref(&self.root, &parent, field).ok()?;
        if i + 1 >= block.len() {
            return None;
        }
        let mut path = self.path.clone();
        path.last_mut().unwrap().idx += 1;
        Some(Cursor {
            root: self.root.clone(),
            path,
        })
    }

    pub fn before(&self) -> Result<GapCursor, InvalidCursorError> {
        let (parent, field, i) = self.split_block_pos()?;
        Ok(GapCursor {
            root: self.root.clone(),
            parent,
            field,
            at: i,
        })
    }

    pub fn after(&self) -> Result<GapCursor, InvalidCursorError> {
        let (parent, field, i) = self.split_block_pos()?;
        Ok(GapCursor {
            root: self.root.clone(),
            parent,
            field,
            at: i + 1,
        })
    }

    pub fn as_block(&self) -> Result<BlockCursor, InvalidCursorError> {
        let (parent, field, i) = self.split_block_pos()?;
        Ok(BlockCursor {
            root: self.root.clone(),
            parent,
            field,
            lo: i,
            hi: i + 1,
        })
    }

    /// The statement block of a `Seq`, an `If`, or the procedure root.
    pub fn body(&self) -> Result<BlockCursor, InvalidCursorError> {
        let len = match self.node()? {
            NodeRef::Proc(p) => p.body.len(),
            NodeRef::Stmt(Stmt::Seq { body, .. }) | NodeRef::Stmt(Stmt::If { body, .. }) => {
                body.len()
            }
            _ => return Err(invalid(&self.path, "node has no body block")),
        };
        Ok(BlockCursor {
            root: self.root.clone(),
            parent: self.path.clone(),
            field: Field::Body,
            lo: 0,
            hi: len,
        })
    }

    pub fn orelse(&self) -> Result<BlockCursor, InvalidCursorError> {
        let len = match self.node()? {
            NodeRef::Stmt(Stmt::If { orelse, .. }) => orelse.len(),
            _ => return Err(invalid(&self.path, "node has no orelse block")),
        };
        Ok(BlockCursor {
            root: self.root.clone(),
            parent: self.path.clone(),
            field: Field::Orelse,
            lo: 0,
            hi: len,
        })
    }

    // -- atomic edits -------------------------------------------------------

    /// Replace the pointed-to non-statement node (expression, window access,
    /// iterator symbol, or type annotation).
    pub fn replace(&self, value: NodeValue) -> Result<(Rc<Proc>, Forward), InvalidCursorError> {
        let path = self.path.clone();
        let new = clone_mutate(&self.root, |p| {
            match (resolve_mut(p, &path)?, value) {
                (NodeMut::Expr(slot), NodeValue::Expr(e)) => *slot = e,
                (NodeMut::WAccess(slot), NodeValue::WAccess(w)) => *slot = w,
                (NodeMut::Sym(slot), NodeValue::Sym(s)) => *slot = s,
                (NodeMut::Ty(slot), NodeValue::Ty(t)) => *slot = t,
                _ => return Err(invalid(&path, "replacement value does not fit this node")),
            }
            Ok(())
        })?;
        let fwd = Forward::one(&self.root, &new, Edit::ReplaceNode { path: self.path.clone() });
        Ok((new, fwd))
    }

    /// Replace this statement with zero or more statements.
    pub fn replace_stmts(&self, stmts: Vec<Stmt>) -> Result<(Rc<Proc>, Forward), InvalidCursorError> {
        self.as_block()?.replace(stmts)
    }

    pub fn delete(&self) -> Result<(Rc<Proc>, Forward), InvalidCursorError> {
        self.as_block()?.delete()
    }

    pub fn move_to(&self, gap: &GapCursor) -> Result<(Rc<Proc>, Forward), InvalidCursorError> {
        self.as_block()?.move_to(gap)
    }
}

/// A cursor naming a contiguous block of sibling statements `[lo, hi)`.
#[derive(Clone)]
pub struct BlockCursor {
    root: Rc<Proc>,
    parent: Path,
    field: Field,
    lo: usize,
    hi: usize,
}

impl fmt::Debug for BlockCursor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "BlockCursor({}.{:?}[{}..{}])",
            render_path(&self.parent),
            self.field,
            self.lo,
            self.hi
        )
    }
}

impl BlockCursor {
    pub fn proc(&self) -> &Rc<Proc> {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.hi - self.lo
    }

    pub fn is_empty(&self) -> bool {
        self.lo == self.hi
    }

    pub fn at(&self, i: usize) -> Cursor {
        debug_assert!(self.lo + i < self.hi);
        let mut path = self.parent.clone();
        path.push(Step::new(self.field, self.lo + i));
        Cursor {
            root: self.root.clone(),
            path,
        }
    }

    pub fn first(&self) -> Cursor {
        self.at(0)
    }

    pub fn last(&self) -> Cursor {
        self.at(self.len() - 1)
    }

    pub fn cursors(&self) -> Vec<Cursor> {
        (0..self.len()).map(|i| self.at(i)).collect()
    }

    /// The parent node the block hangs off.
    pub fn parent(&self) -> Cursor {
        Cursor {
            root: self.root.clone(),
            path: self.parent.clone(),
        }
    }

    pub fn stmts(&self) -> Result<Vec<Stmt>, InvalidCursorError> {
        let block = block_ref(&self.root, &self.parent, self.field)?;
        if self.hi > block.len() {
            return Err(invalid(&self.parent, "block range out of bounds"));
        }
        Ok(block[self.lo..self.hi].to_vec())
    }

    /// Keep the start, extend the end to cover the rest of the sibling
    /// block.
    pub fn to_end(&self) -> Result<BlockCursor, InvalidCursorError> {
        let block = block_ref(&self.root, &self.parent, self.field)?;
        Ok(BlockCursor {
            hi: block.len(),
            ..self.clone()
        })
    }

    /// Grow the block by `more_lo` earlier and `more_hi` later siblings.
    pub fn expand(&self, more_lo: usize, more_hi: usize) -> Result<BlockCursor, InvalidCursorError> {
        let block = block_ref(&self.root, &self.parent, self.field)?;
        Ok(BlockCursor {
            lo: self.lo.saturating_sub(more_lo),
            hi: (self.hi + more_hi).min(block.len()),
            ..self.clone()
        })
    }

    /// The sub-block `[from, to)` relative to this block's start.
    pub fn slice(&self, from: usize, to: usize) -> Result<BlockCursor, InvalidCursorError> {
        if from > to || self.lo + to > self.hi {
            return Err(invalid(&self.parent, "slice out of range"));
        }
        Ok(BlockCursor {
            lo: self.lo + from,
            hi: self.lo + to,
            ..self.clone()
        })
    }

    pub fn before(&self) -> GapCursor {
        GapCursor {
            root: self.root.clone(),
            parent: self.parent.clone(),
            field: self.field,
            at: self.lo,
        }
    }

    pub fn after(&self) -> GapCursor {
        GapCursor {
            root: self.root.clone(),
            parent: self.parent.clone(),
            field: self.field,
            at: self.hi,
        }
    }

    // -- atomic edits -------------------------------------------------------

    pub fn delete(&self) -> Result<(Rc<Proc>, Forward), InvalidCursorError> {
        let (parent, field, lo, hi) = (self.parent.clone(), self.field, self.lo, self.hi);
        let new = clone_mutate(&self.root, |p| {
            let block = block_mut(p, &parent, field)?;
            if hi > block.len() || lo >= hi {
                return Err(invalid(&parent, "block range out of bounds"));
            }
            let srcinfo = block[lo].srcinfo().clone();
            block.drain(lo..hi);
            patch_empty_block(block, field, &srcinfo);
            Ok(())
        })?;
        let fwd = Forward::one(
            &self.root,
            &new,
            Edit::Delete {
                parent: self.parent.clone(),
                field: self.field,
                at: self.lo,
                n: self.hi - self.lo,
            },
        );
        Ok((new, fwd))
    }

    pub fn replace(&self, stmts: Vec<Stmt>) -> Result<(Rc<Proc>, Forward), InvalidCursorError> {
        let n_new = stmts.len();
        let (parent, field, lo, hi) = (self.parent.clone(), self.field, self.lo, self.hi);
        let new = clone_mutate(&self.root, |p| {
            let block = block_mut(p, &parent, field)?;
            if hi > block.len() {
                return Err(invalid(&parent, "block range out of bounds"));
            }
            let srcinfo = block
                .get(lo)
                .map(|s| s.srcinfo().clone())
                .unwrap_or_else(SrcInfo::unknown);
            block.splice(lo..hi, stmts);
            patch_empty_block(block, field, &srcinfo);
            Ok(())
        })?;
        let fwd = Forward::one(
            &self.root,
            &new,
            Edit::ReplaceBlock {
                parent: self.parent.clone(),
                field: self.field,
                at: self.lo,
                n_old: self.hi - self.lo,
                n_new,
            },
        );
        Ok((new, fwd))
    }

    /// Wrap the block in a new enclosing statement.  `build` receives the
    /// block's statements and must return a statement holding them under
    /// `wrap_field`.
    pub fn wrap(
        &self,
        build: impl FnOnce(Vec<Stmt>) -> Stmt,
        wrap_field: Field,
    ) -> Result<(Rc<Proc>, Forward), InvalidCursorError> {
        let (parent, field, lo, hi) = (self.parent.clone(), self.field, self.lo, self.hi);
        let n = hi - lo;
        if n == 0 {
            return Err(invalid(&parent, "cannot wrap an empty block"));
        }
        let new = clone_mutate(&self.root, |p| {
            let block = block_mut(p, &parent, field)?;
            if hi > block.len() {
                return Err(invalid(&parent, "block range out of bounds"));
            }
            let inner: Vec<Stmt> = block.drain(lo..hi).collect();
            let wrapper = build(inner);
            block.insert(lo, wrapper);
            Ok(())
        })?;
        let fwd = Forward::one(
            &self.root,
            &new,
            Edit::Wrap {
                parent: self.parent.clone(),
                field: self.field,
                at: self.lo,
                n,
                wrap_field,
            },
        );
        Ok((new, fwd))
    }

    pub fn move_to(&self, gap: &GapCursor) -> Result<(Rc<Proc>, Forward), InvalidCursorError> {
        if !Rc::ptr_eq(&self.root, &gap.root) {
            return Err(invalid(&self.parent, "move destination has a different root"));
        }
        let n = self.hi - self.lo;
        // Destination in post-removal coordinates; refuses gaps inside the
        // moved range.
        let removal = Edit::Delete {
            parent: self.parent.clone(),
            field: self.field,
            at: self.lo,
            n,
        };
        let (dst_parent, dst_field, dst_at) = removal
            .fwd_gap(&gap.parent, gap.field, gap.at)
            .map_err(|reason| invalid(&gap.parent, reason))?;
        let (parent, field, lo, hi) = (self.parent.clone(), self.field, self.lo, self.hi);
        let (dp, df, da) = (dst_parent.clone(), dst_field, dst_at);
        let new = clone_mutate(&self.root, |p| {
            let block = block_mut(p, &parent, field)?;
            if hi > block.len() || lo >= hi {
                return Err(invalid(&parent, "block range out of bounds"));
            }
            let srcinfo = block[lo].srcinfo().clone();
            let moved: Vec<Stmt> = block.drain(lo..hi).collect();
            patch_empty_block(block, field, &srcinfo);
            let dst_block = block_mut(p, &dp, df)?;
            if da > dst_block.len() {
                return Err(invalid(&dp, "gap out of bounds"));
            }
            dst_block.splice(da..da, moved);
            Ok(())
        })?;
        let fwd = Forward::one(
            &self.root,
            &new,
            Edit::Move {
                src_parent: self.parent.clone(),
                src_field: self.field,
                src_at: self.lo,
                n,
                dst_parent,
                dst_field,
                dst_at,
            },
        );
        Ok((new, fwd))
    }
}

/// A cursor naming the gap before the `at`-th statement of a block.
#[derive(Clone)]
pub struct GapCursor {
    root: Rc<Proc>,
    parent: Path,
    field: Field,
    at: usize,
}

impl fmt::Debug for GapCursor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GapCursor({}.{:?}@{})",
            render_path(&self.parent),
            self.field,
            self.at
        )
    }
}

impl GapCursor {
    pub fn proc(&self) -> &Rc<Proc> {
        &self.root
    }

    /// The parent node the gap sits in.
    pub fn parent(&self) -> Cursor {
        Cursor {
            root: self.root.clone(),
            path: self.parent.clone(),
        }
    }

    pub fn insert(&self, stmts: Vec<Stmt>) -> Result<(Rc<Proc>, Forward), InvalidCursorError> {
        let n = stmts.len();
        let (parent, field, at) = (self.parent.clone(), self.field, self.at);
        let new = clone_mutate(&self.root, |p| {
            let block = block_mut(p, &parent, field)?;
            if at > block.len() {
                return Err(invalid(&parent, "gap out of bounds"));
            }
            block.splice(at..at, stmts);
            Ok(())
        })?;
        let fwd = Forward::one(
            &self.root,
            &new,
            Edit::Insert {
                parent: self.parent.clone(),
                field: self.field,
                at: self.at,
                n,
            },
        );
        Ok((new, fwd))
    }
}

// ---------------------------------------------------------------------------
// Forwarding

/// One atomic edit, as a path-rewriting record.
#[derive(Clone, Debug)]
enum Edit {
    Insert {
        parent: Path,
        field: Field,
        at: usize,
        n: usize,
    },
    Delete {
        parent: Path,
        field: Field,
        at: usize,
        n: usize,
    },
    ReplaceBlock {
        parent: Path,
        field: Field,
        at: usize,
        n_old: usize,
        n_new: usize,
    },
    ReplaceNode {
        path: Path,
    },
    Wrap {
        parent: Path,
        field: Field,
        at: usize,
        n: usize,
        wrap_field: Field,
    },
    /// `dst_*` are in post-removal coordinates.
    Move {
        src_parent: Path,
        src_field: Field,
        src_at: usize,
        n: usize,
        dst_parent: Path,
        dst_field: Field,
        dst_at: usize,
    },
}

/// Does `path` pass through the statement block `parent`.`field`?  If so,
/// return the position (in `path`) of the block step.
fn block_step_pos(path: &[Step], parent: &[Step], field: Field) -> Option<usize> {
    if path.len() <= parent.len() {
        return None;
    }
    if &path[..parent.len()] != parent {
        return None;
    }
    if path[parent.len()].field == field {
        Some(parent.len())
    } else {
        None
    }
}

impl Edit {
    /// Transport a node path through this edit.
    fn fwd_path(&self, path: &[Step]) -> Result<Path, String> {
        match *self {
            Edit::Insert { ref parent, field, at, n } => {
                let mut out: Path = path.into();
                if let Some(pos) = block_step_pos(path, parent, field) {
                    if out[pos].idx as usize >= at {
                        out[pos].idx += n as u32;
                    }
                }
                Ok(out)
            }
            Edit::Delete { ref parent, field, at, n } => {
                let mut out: Path = path.into();
                if let Some(pos) = block_step_pos(path, parent, field) {
                    let i = out[pos].idx as usize;
                    if i >= at && i < at + n {
                        return Err("target was deleted".into());
                    }
                    if i >= at + n {
                        out[pos].idx -= n as u32;
                    }
                }
                Ok(out)
            }
            Edit::ReplaceBlock { ref parent, field, at, n_old, n_new } => {
                let mut out: Path = path.into();
                if let Some(pos) = block_step_pos(path, parent, field) {
                    let i = out[pos].idx as usize;
                    if i >= at && i < at + n_old {
                        // A cursor onto a one-for-one replaced statement
                        // survives, pointing at the replacement; anything
                        // else in the replaced range is gone.
                        if pos + 1 == path.len() && n_old == 1 && n_new == 1 {
                            return Ok(out);
                        }
                        return Err("target was replaced".into());
                    }
                    if i >= at + n_old {
                        out[pos].idx = (i - n_old + n_new) as u32;
                    }
                }
                Ok(out)
            }
            Edit::ReplaceNode { path: ref target } => {
                if path.len() > target.len() && &path[..target.len()] == &target[..] {
                    return Err("target's subtree was replaced".into());
                }
                Ok(path.into())
            }
            Edit::Wrap { ref parent, field, at, n, wrap_field } => {
                if let Some(pos) = block_step_pos(path, parent, field) {
                    let i = path[pos].idx as usize;
                    if i >= at && i < at + n {
                        let mut out: Path = parent.clone();
                        out.push(Step::new(field, at));
                        out.push(Step::new(wrap_field, i - at));
                        out.extend_from_slice(&path[pos + 1..]);
                        return Ok(out);
                    }
                    let mut out: Path = path.into();
                    if i >= at + n {
                        out[pos].idx -= (n - 1) as u32;
                    }
                    return Ok(out);
                }
                Ok(path.into())
            }
            Edit::Move {
                ref src_parent,
                src_field,
                src_at,
                n,
                ref dst_parent,
                dst_field,
                dst_at,
            } => {
                // Paths into the moved range are re-rooted at the
                // destination.
                if let Some(pos) = block_step_pos(path, src_parent, src_field) {
                    let i = path[pos].idx as usize;
                    if i >= src_at && i < src_at + n {
                        let mut out: Path = dst_parent.clone();
                        out.push(Step::new(dst_field, dst_at + (i - src_at)));
                        out.extend_from_slice(&path[pos + 1..]);
                        return Ok(out);
                    }
                }
                // Everything else: shift out of the source, then into the
                // destination (whose coordinates are post-removal).
                let removal = Edit::Delete {
                    parent: src_parent.clone(),
                    field: src_field,
                    at: src_at,
                    n,
                };
                let mid = removal.fwd_path(path)?;
                let insertion = Edit::Insert {
                    parent: dst_parent.clone(),
                    field: dst_field,
                    at: dst_at,
                    n,
                };
                insertion.fwd_path(&mid)
            }
        }
    }

    /// Transport a gap through this edit.
    fn fwd_gap(
        &self,
        parent: &[Step],
        field: Field,
        at: usize,
    ) -> Result<(Path, Field, usize), String> {
        match *self {
            Edit::Insert { parent: ref ep, field: ef, at: eat, n } => {
                let mut p: Path = parent.into();
                let mut a = at;
                if let Some(pos) = block_step_pos(parent, ep, ef) {
                    // The gap's parent path passes through the edited block.
                    let mut out: Path = parent.into();
                    if out[pos].idx as usize >= eat {
                        out[pos].idx += n as u32;
                    }
                    p = out;
                } else if parent == &ep[..] && field == ef && at >= eat {
                    a += n;
                }
                Ok((p, field, a))
            }
            Edit::Delete { parent: ref ep, field: ef, at: eat, n } => {
                if let Some(pos) = block_step_pos(parent, ep, ef) {
                    let i = parent[pos].idx as usize;
                    if i >= eat && i < eat + n {
                        return Err("gap's enclosing statement was deleted".into());
                    }
                    let mut out: Path = parent.into();
                    if i >= eat + n {
                        out[pos].idx -= n as u32;
                    }
                    return Ok((out, field, at));
                }
                let mut a = at;
                if parent == &ep[..] && field == ef {
                    if a > eat + n {
                        a -= n;
                    } else if a > eat {
                        a = eat;
                    }
                }
                Ok((parent.into(), field, a))
            }
            Edit::ReplaceBlock { parent: ref ep, field: ef, at: eat, n_old, n_new } => {
                if let Some(pos) = block_step_pos(parent, ep, ef) {
                    let i = parent[pos].idx as usize;
                    if i >= eat && i < eat + n_old {
                        if n_old == 1 && n_new == 1 && pos + 1 == parent.len() {
                            return Ok((parent.into(), field, at));
                        }
                        return Err("gap's enclosing statement was replaced".into());
                    }
                    let mut out: Path = parent.into();
                    if i >= eat + n_old {
                        out[pos].idx = (i - n_old + n_new) as u32;
                    }
                    return Ok((out, field, at));
                }
                let mut a = at;
                if parent == &ep[..] && field == ef {
                    if a > eat + n_old {
                        a = a - n_old + n_new;
                    } else if a > eat {
                        a = eat;
                    }
                }
                Ok((parent.into(), field, a))
            }
            Edit::ReplaceNode { path: ref target } => {
                if parent.len() >= target.len() && &parent[..target.len()] == &target[..] {
                    // gap inside a replaced subtree
                    if parent.len() > target.len() {
                        return Err("gap's subtree was replaced".into());
                    }
                }
                Ok((parent.into(), field, at))
            }
            Edit::Wrap { parent: ref ep, field: ef, at: eat, n, wrap_field } => {
                if let Some(pos) = block_step_pos(parent, ep, ef) {
                    let i = parent[pos].idx as usize;
                    if i >= eat && i < eat + n {
                        let mut out: Path = ep.clone();
                        out.push(Step::new(ef, eat));
                        out.push(Step::new(wrap_field, i - eat));
                        out.extend_from_slice(&parent[pos + 1..]);
                        return Ok((out, field, at));
                    }
                    let mut out: Path = parent.into();
                    if i >= eat + n {
                        out[pos].idx -= (n - 1) as u32;
                    }
                    return Ok((out, field, at));
                }
                let mut a = at;
                if parent == &ep[..] && field == ef {
                    if a <= eat {
                        // unchanged
                    } else if a < eat + n {
                        let mut out: Path = ep.clone();
                        out.push(Step::new(ef, eat));
                        return Ok((out, wrap_field, a - eat));
                    } else {
                        a -= n - 1;
                    }
                }
                Ok((parent.into(), field, a))
            }
            Edit::Move {
                ref src_parent,
                src_field,
                src_at,
                n,
                ref dst_parent,
                dst_field,
                dst_at,
            } => {
                // A gap strictly inside the moved range travels with it.
                if parent == &src_parent[..] && field == src_field && at > src_at && at < src_at + n
                {
                    return Ok((dst_parent.clone(), dst_field, dst_at + (at - src_at)));
                }
                if let Some(pos) = block_step_pos(parent, src_parent, src_field) {
                    let i = parent[pos].idx as usize;
                    if i >= src_at && i < src_at + n {
                        let mut out: Path = dst_parent.clone();
                        out.push(Step::new(dst_field, dst_at + (i - src_at)));
                        out.extend_from_slice(&parent[pos + 1..]);
                        return Ok((out, field, at));
                    }
                }
                let removal = Edit::Delete {
                    parent: src_parent.clone(),
                    field: src_field,
                    at: src_at,
                    n,
                };
                let (p, f, a) = removal.fwd_gap(parent, field, at)?;
                let insertion = Edit::Insert {
                    parent: dst_parent.clone(),
                    field: dst_field,
                    at: dst_at,
                    n,
                };
                insertion.fwd_gap(&p, f, a)
            }
        }
    }
}

/// A forwarding function: transports cursors valid under `old` to cursors
/// valid under `new`.  Pure data; composition is concatenation.
#[derive(Clone)]
pub struct Forward {
    old: Rc<Proc>,
    new: Rc<Proc>,
    edits: Vec<Edit>,
}

impl Forward {
    pub fn identity(root: &Rc<Proc>) -> Forward {
        Forward {
            old: root.clone(),
            new: root.clone(),
            edits: vec![],
        }
    }

    /// A structure-preserving rewrite: same tree shape, new root (used when
    /// only out-of-path attributes changed, e.g. the argument list of the
    /// procedure).
    pub fn retarget(old: &Rc<Proc>, new: &Rc<Proc>) -> Forward {
        Forward {
            old: old.clone(),
            new: new.clone(),
            edits: vec![],
        }
    }

    fn one(old: &Rc<Proc>, new: &Rc<Proc>, edit: Edit) -> Forward {
        Forward {
            old: old.clone(),
            new: new.clone(),
            edits: vec![edit],
        }
    }

    pub fn old_root(&self) -> &Rc<Proc> {
        &self.old
    }

    pub fn new_root(&self) -> &Rc<Proc> {
        &self.new
    }

    /// Left-to-right composition: `self` then `next`.
    pub fn then(mut self, next: Forward) -> Forward {
        assert!(
            Rc::ptr_eq(&self.new, &next.old),
            "composed forwarders must chain root-to-root"
        );
        self.edits.extend(next.edits);
        self.new = next.new;
        self
    }

    pub fn fwd(&self, c: &Cursor) -> Result<Cursor, InvalidCursorError> {
        if !Rc::ptr_eq(&c.root, &self.old) {
            return Err(invalid(&c.path, "cursor does not belong to this root"));
        }
        let mut path: Path = c.path.clone();
        for edit in &self.edits {
            path = edit
                .fwd_path(&path)
                .map_err(|reason| invalid(&c.path, reason))?;
        }
        Ok(Cursor {
            root: self.new.clone(),
            path,
        })
    }

    pub fn fwd_gap(&self, g: &GapCursor) -> Result<GapCursor, InvalidCursorError> {
        if !Rc::ptr_eq(&g.root, &self.old) {
            return Err(invalid(&g.parent, "cursor does not belong to this root"));
        }
        let mut parent: Path = g.parent.clone();
        let mut field = g.field;
        let mut at = g.at;
        for edit in &self.edits {
            let (p, f, a) = edit
                .fwd_gap(&parent, field, at)
                .map_err(|reason| invalid(&g.parent, reason))?;
            parent = p;
            field = f;
            at = a;
        }
        Ok(GapCursor {
            root: self.new.clone(),
            parent,
            field,
            at,
        })
    }

    pub fn fwd_block(&self, b: &BlockCursor) -> Result<BlockCursor, InvalidCursorError> {
        if !Rc::ptr_eq(&b.root, &self.old) {
            return Err(invalid(&b.parent, "cursor does not belong to this root"));
        }
        if b.is_empty() {
            let g = GapCursor {
                root: b.root.clone(),
                parent: b.parent.clone(),
                field: b.field,
                at: b.lo,
            };
            let g = self.fwd_gap(&g)?;
            return Ok(BlockCursor {
                root: g.root,
                parent: g.parent,
                field: g.field,
                lo: g.at,
                hi: g.at,
            });
        }
        let first = self.fwd(&b.at(0))?;
        let last = self.fwd(&b.at(b.len() - 1))?;
        let (p1, f1, lo) = first.split_block_pos()?;
        let (p2, f2, hi) = last.split_block_pos()?;
        if p1 != p2 || f1 != f2 || hi < lo {
            return Err(invalid(&b.parent, "block was torn apart by an edit"));
        }
        Ok(BlockCursor {
            root: self.new.clone(),
            parent: p1,
            field: f1,
            lo,
            hi: hi + 1,
        })
    }
}

// ---------------------------------------------------------------------------
// Path enumeration

/// Invoke `f` on every statement, expression, and window access in the
/// subtree under `path` (pre-order), with its absolute path.
pub fn for_each_node(proc: &Proc, path: &Path, f: &mut impl FnMut(&Path, NodeRef)) {
    let node = match resolve(proc, path) {
        Ok(n) => n,
        Err(_) => return,
    };
    walk_node(node, &mut path.clone(), f);
}

fn walk_node(node: NodeRef, path: &mut Path, f: &mut impl FnMut(&Path, NodeRef)) {
    match node {
        NodeRef::Proc(p) => {
            for (i, e) in p.preds.iter().enumerate() {
                path.push(Step::new(Field::Preds, i));
                walk_node(NodeRef::Expr(e), path, f);
                path.pop();
            }
            for (i, s) in p.body.iter().enumerate() {
                path.push(Step::new(Field::Body, i));
                walk_node(NodeRef::Stmt(s), path, f);
                path.pop();
            }
        }
        NodeRef::Stmt(s) => {
            f(path, node);
            let mut child = |field: Field, i: usize, n: NodeRef, path: &mut Path| {
                path.push(Step::new(field, i));
                walk_node(n, path, f);
                path.pop();
            };
            match s {
                Stmt::Assign { idx, rhs, .. } | Stmt::Reduce { idx, rhs, .. } => {
                    for (i, e) in idx.iter().enumerate() {
                        child(Field::Idx, i, NodeRef::Expr(e), path);
                    }
                    child(Field::Rhs, 0, NodeRef::Expr(rhs), path);
                }
                Stmt::WriteConfig { rhs, .. } | Stmt::WindowStmt { rhs, .. } => {
                    child(Field::Rhs, 0, NodeRef::Expr(rhs), path);
                }
                Stmt::If { cond, body, orelse, .. } => {
                    child(Field::Cond, 0, NodeRef::Expr(cond), path);
                    for (i, s) in body.iter().enumerate() {
                        child(Field::Body, i, NodeRef::Stmt(s), path);
                    }
                    for (i, s) in orelse.iter().enumerate() {
                        child(Field::Orelse, i, NodeRef::Stmt(s), path);
                    }
                }
                Stmt::Seq { lo, hi, body, .. } => {
                    child(Field::Lo, 0, NodeRef::Expr(lo), path);
                    child(Field::Hi, 0, NodeRef::Expr(hi), path);
                    for (i, s) in body.iter().enumerate() {
                        child(Field::Body, i, NodeRef::Stmt(s), path);
                    }
                }
                Stmt::Call { args, .. } => {
                    for (i, e) in args.iter().enumerate() {
                        child(Field::Args, i, NodeRef::Expr(e), path);
                    }
                }
                Stmt::Instr { body, .. } => {
                    child(Field::Body, 0, NodeRef::Stmt(body), path);
                }
                Stmt::Alloc { .. } | Stmt::Free { .. } | Stmt::Pass { .. } => {}
            }
        }
        NodeRef::Expr(e) => {
            f(path, node);
            let mut child = |field: Field, i: usize, n: NodeRef, path: &mut Path| {
                path.push(Step::new(field, i));
                walk_node(n, path, f);
                path.pop();
            };
            match e {
                Expr::Read { idx, .. } => {
                    for (i, ix) in idx.iter().enumerate() {
                        child(Field::Idx, i, NodeRef::Expr(ix), path);
                    }
                }
                Expr::USub { arg, .. } => child(Field::Arg, 0, NodeRef::Expr(arg), path),
                Expr::BinOp { lhs, rhs, .. } => {
                    child(Field::Lhs, 0, NodeRef::Expr(lhs), path);
                    child(Field::Rhs, 0, NodeRef::Expr(rhs), path);
                }
                Expr::Select { cond, body, .. } => {
                    child(Field::Cond, 0, NodeRef::Expr(cond), path);
                    child(Field::SelBody, 0, NodeRef::Expr(body), path);
                }
                Expr::Window { idx, .. } => {
                    for (i, w) in idx.iter().enumerate() {
                        child(Field::Idx, i, NodeRef::WAccess(w), path);
                    }
                }
                Expr::Const { .. } | Expr::Stride { .. } | Expr::ReadConfig { .. } => {}
            }
        }
        NodeRef::WAccess(w) => {
            f(path, node);
            let mut child = |field: Field, n: NodeRef, path: &mut Path| {
                path.push(Step::new(field, 0));
                walk_node(n, path, f);
                path.pop();
            };
            match w {
                WAccess::Point { pt, .. } => child(Field::WinPt, NodeRef::Expr(pt), path),
                WAccess::Interval { lo, hi, .. } => {
                    child(Field::WinLo, NodeRef::Expr(lo), path);
                    child(Field::WinHi, NodeRef::Expr(hi), path);
                }
            }
        }
        NodeRef::Sym(_) | NodeRef::Ty(_) => {}
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use loopsched_ir::ir::BinOp;
    use loopsched_ir::types::Type;
    use loopsched_ir::SrcInfo;

    fn src() -> SrcInfo {
        SrcInfo::unknown()
    }

    fn assign(buf: &Sym, idx: Vec<Expr>, v: i64) -> Stmt {
        Stmt::Assign {
            name: buf.clone(),
            ty: Type::F32,
            idx,
            rhs: Expr::int(v, Type::I32, &src()),
            srcinfo: src(),
        }
    }

    fn read(s: &Sym) -> Expr {
        Expr::read(s, Type::Index, &src())
    }

    /// for i in seq(0, 8): { x[i] = 0 ; x[i] = 1 ; x[i] = 2 }
    fn sample_proc() -> (Rc<Proc>, Sym, Sym) {
        let i = Sym::fresh("i");
        let x = Sym::fresh("x");
        let body = vec![
            assign(&x, vec![read(&i)], 0),
            assign(&x, vec![read(&i)], 1),
            assign(&x, vec![read(&i)], 2),
        ];
        let proc = Rc::new(Proc {
            name: "p".into(),
            args: vec![],
            preds: vec![],
            body: vec![Stmt::Seq {
                iter: i.clone(),
                lo: Expr::int(0, Type::Index, &src()),
                hi: Expr::int(8, Type::Index, &src()),
                body,
                srcinfo: src(),
            }],
            instr: None,
            srcinfo: src(),
        });
        (proc, i, x)
    }

    fn stmt_rhs_val(s: &Stmt) -> i64 {
        match s {
            Stmt::Assign { rhs, .. } => rhs.as_const_int().unwrap(),
            _ => panic!("expected assign"),
        }
    }

    #[test]
    fn navigation_and_resolution() {
        let (proc, _, _) = sample_proc();
        let root = Cursor::root(&proc);
        let loop_c = root.child(Field::Body, 0);
        assert!(matches!(loop_c.stmt().unwrap(), Stmt::Seq { .. }));
        let body = loop_c.body().unwrap();
        assert_eq!(body.len(), 3);
        assert_eq!(stmt_rhs_val(body.at(1).stmt().unwrap()), 1);
        assert_eq!(
            stmt_rhs_val(body.at(1).next().unwrap().stmt().unwrap()),
            2
        );
        assert!(body.at(0).prev().is_none());
    }

    #[test]
    fn insertion_shifts_later_siblings() {
        let (proc, _, x) = sample_proc();
        let loop_c = Cursor::root(&proc).child(Field::Body, 0);
        let first = loop_c.body().unwrap().at(0);
        let last = loop_c.body().unwrap().at(2);

        let gap = loop_c.body().unwrap().at(1).before().unwrap();
        let (_, fwd) = gap.insert(vec![assign(&x, vec![], 9)]).unwrap();

        // earlier siblings unaffected, later siblings shifted
        let first2 = fwd.fwd(&first).unwrap();
        assert_eq!(first2.path().last().unwrap().idx, 0);
        let last2 = fwd.fwd(&last).unwrap();
        assert_eq!(last2.path().last().unwrap().idx, 3);
        assert_eq!(stmt_rhs_val(last2.stmt().unwrap()), 2);
    }

    #[test]
    fn deletion_invalidates_target_only() {
        let (proc, _, _) = sample_proc();
        let loop_c = Cursor::root(&proc).child(Field::Body, 0);
        let victim = loop_c.body().unwrap().at(1);
        let last = loop_c.body().unwrap().at(2);

        let (_, fwd) = victim.delete().unwrap();
        assert!(fwd.fwd(&victim).is_err());
        let last2 = fwd.fwd(&last).unwrap();
        assert_eq!(last2.path().last().unwrap().idx, 1);
        assert_eq!(stmt_rhs_val(last2.stmt().unwrap()), 2);
    }

    #[test]
    fn replacement_invalidates_subtree() {
        let (proc, i, x) = sample_proc();
        let loop_c = Cursor::root(&proc).child(Field::Body, 0);
        let target = loop_c.body().unwrap().at(1);
        let inner_rhs = target.child(Field::Rhs, 0);

        let (_, fwd) = target
            .replace_stmts(vec![assign(&x, vec![read(&i)], 7)])
            .unwrap();
        // one-for-one replacement keeps the statement cursor...
        let target2 = fwd.fwd(&target).unwrap();
        assert_eq!(stmt_rhs_val(target2.stmt().unwrap()), 7);
        // ...but not cursors into the replaced subtree
        assert!(fwd.fwd(&inner_rhs).is_err());
    }

    #[test]
    fn wrap_extends_paths_by_one_step() {
        let (proc, i, _) = sample_proc();
        let loop_c = Cursor::root(&proc).child(Field::Body, 0);
        let mid = loop_c.body().unwrap().at(1);
        let last = loop_c.body().unwrap().at(2);

        let cond = Expr::binop(
            BinOp::Lt,
            read(&i),
            Expr::int(4, Type::Index, &src()),
            Type::Bool,
            &src(),
        );
        let block = loop_c.body().unwrap().slice(0, 2).unwrap();
        let (ir, fwd) = block
            .wrap(
                move |stmts| Stmt::If {
                    cond,
                    body: stmts,
                    orelse: vec![],
                    srcinfo: src(),
                },
                Field::Body,
            )
            .unwrap();

        let mid2 = fwd.fwd(&mid).unwrap();
        assert_eq!(stmt_rhs_val(mid2.stmt().unwrap()), 1);
        assert_eq!(mid2.path().len(), mid.path().len() + 1);

        // the sibling after the block slides left past the wrapper
        let last2 = fwd.fwd(&last).unwrap();
        assert_eq!(stmt_rhs_val(last2.stmt().unwrap()), 2);
        assert_eq!(last2.path().last().unwrap().idx, 1);

        match resolve(&ir, &[Step::new(Field::Body, 0), Step::new(Field::Body, 0)]).unwrap() {
            NodeRef::Stmt(Stmt::If { body, .. }) => assert_eq!(body.len(), 2),
            other => panic!("expected wrapper if, got {:?}", other),
        }
    }

    #[test]
    fn move_reroots_cursors_into_moved_block() {
        let (proc, _, _) = sample_proc();
        let loop_c = Cursor::root(&proc).child(Field::Body, 0);
        let mid = loop_c.body().unwrap().at(1);

        // move x[i] = 1 out after the loop
        let dst = loop_c.after().unwrap();
        let (ir, fwd) = mid.as_block().unwrap().move_to(&dst).unwrap();

        let mid2 = fwd.fwd(&mid).unwrap();
        assert_eq!(stmt_rhs_val(mid2.stmt().unwrap()), 1);
        assert_eq!(mid2.path().len(), 1);
        assert_eq!(mid2.path()[0], Step::new(Field::Body, 1));
        assert_eq!(ir.body.len(), 2);
    }

    #[test]
    fn moving_out_a_whole_body_leaves_a_pass() {
        let (proc, _, _) = sample_proc();
        let loop_c = Cursor::root(&proc).child(Field::Body, 0);
        let dst = loop_c.after().unwrap();
        let (ir, _) = loop_c.body().unwrap().move_to(&dst).unwrap();
        match &ir.body[0] {
            Stmt::Seq { body, .. } => {
                assert_eq!(body.len(), 1);
                assert!(body[0].is_pass());
            }
            other => panic!("expected loop, got {}", other),
        }
        assert_eq!(ir.body.len(), 4);
    }

    #[test]
    fn forwarding_composes() {
        let (proc, _, x) = sample_proc();
        let loop_c = Cursor::root(&proc).child(Field::Body, 0);
        let last = loop_c.body().unwrap().at(2);

        let gap = loop_c.body().unwrap().at(0).before().unwrap();
        let (ir1, f1) = gap.insert(vec![assign(&x, vec![], 8)]).unwrap();
        let victim = Cursor::from_path(&ir1, {
            let mut p = Path::new();
            p.push(Step::new(Field::Body, 0));
            p.push(Step::new(Field::Body, 1));
            p
        });
        let (_, f2) = victim.delete().unwrap();

        let composed = f1.clone().then(f2.clone());
        let via_composed = composed.fwd(&last).unwrap();
        let via_steps = f2.fwd(&f1.fwd(&last).unwrap()).unwrap();
        assert_eq!(via_composed.path(), via_steps.path());
        assert_eq!(stmt_rhs_val(via_composed.stmt().unwrap()), 2);
    }

    #[test]
    fn stale_root_is_rejected() {
        let (proc, _, _) = sample_proc();
        let (other, _, _) = sample_proc();
        let loop_c = Cursor::root(&proc).child(Field::Body, 0);
        let (_, fwd) = loop_c.body().unwrap().at(1).delete().unwrap();
        let foreign = Cursor::root(&other).child(Field::Body, 0);
        assert!(fwd.fwd(&foreign).is_err());
    }

    #[test]
    fn gap_forwarding_through_insertions() {
        let (proc, _, x) = sample_proc();
        let loop_c = Cursor::root(&proc).child(Field::Body, 0);
        let end_gap = loop_c.body().unwrap().after();

        let gap0 = loop_c.body().unwrap().at(0).before().unwrap();
        let (_, fwd) = gap0.insert(vec![assign(&x, vec![], 8)]).unwrap();
        let end2 = fwd.fwd_gap(&end_gap).unwrap();
        let (ir, _) = end2.insert(vec![assign(&x, vec![], 9)]).unwrap();
        match &ir.body[0] {
            Stmt::Seq { body, .. } => {
                assert_eq!(body.len(), 5);
                assert_eq!(stmt_rhs_val(&body[4]), 9);
            }
            _ => panic!("expected loop"),
        }
    }
}
