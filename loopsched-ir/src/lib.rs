//! The typed loop-nest IR of the loopsched engine.
//!
//! The IR is an algebraic tree: a [`Proc`] owns a list of statements, and
//! statements own expressions.  Trees are immutable values; every rewrite in
//! the engine produces a new tree and leaves old nodes untouched.  Binders
//! (procedure arguments, allocations, loop iterators, window bindings) own a
//! [`Sym`], and all readers refer back by symbol, so duplicating a subtree is
//! only legal after [`subst::alpha_rename`] has freshened its binders.
//!
//! Source locations are carried on every node but are metadata, not identity:
//! [`SrcInfo`] compares equal to any other `SrcInfo`, so the derived
//! structural equality of IR nodes is location-insensitive.

pub mod ir;
pub mod pprint;
pub mod srcinfo;
pub mod subst;
pub mod sym;
pub mod types;
pub mod uses;
pub mod visit;
pub mod wf;

pub use ir::{BinOp, Config, Effect, Expr, FnArg, Instr, Lit, Mem, Proc, Stmt, WAccess};
pub use srcinfo::SrcInfo;
pub use sym::Sym;
pub use types::Type;
