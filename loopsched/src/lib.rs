//! The rewriting core of a user-scheduled loop-nest compiler.
//!
//! The overall structure, in dependency order:
//!
//! 1. The typed loop-nest IR lives in the `loopsched-ir` crate: an algebraic
//!    tree of statements and expressions with attached types and source
//!    locations.  Trees are immutable values; every rewrite produces a new
//!    tree and leaves old nodes untouched.
//!
//! 2. The [`cursor`] layer provides navigable, forwardable references into a
//!    tree, and the atomic edit primitives (insert, delete, replace, move,
//!    wrap).  Each edit returns a new root plus a forwarding function that
//!    rewrites old cursors to new ones; a directive composes several edits
//!    and returns the composed forwarder.
//!
//! 3. The [`oracle`] is the semantic safety interface: a set of queries
//!    (expression equivalence, positivity, reorder/fission legality, buffer
//!    read/write analysis, ...) that either succeed or raise a scheduling
//!    error.  The shipped [`oracle::ConservativeOracle`] decides them
//!    syntactically and rejects on doubt; a host may plug in a symbolic
//!    engine instead.
//!
//! 4. The [`rewrite`] kernel implements the scheduling directives — split,
//!    unroll, fuse, fission, lift, stage, inline, and the rest — as
//!    compositions of atomic edits guarded by oracle queries.  Directives
//!    fail atomically: no partial rewrite is ever observable.
//!
//! 5. The [`normalize`] / [`simplify`] pair canonicalizes affine index
//!    arithmetic and folds algebraic identities; it runs both as a
//!    standalone directive and as the internal prelude of directives that
//!    compare index expressions syntactically.
//!
//! The engine is single-threaded and synchronous; the only shared state is
//! the fresh-symbol counter, which is globally monotonic.  Two directive
//! sequences applied in the same order to the same root produce identical
//! trees.

pub mod cursor;
pub mod error;
pub mod normalize;
pub mod oracle;
pub mod pattern;
pub mod range;
pub mod rewrite;
pub mod simplify;

pub use cursor::{BlockCursor, Cursor, Field, Forward, GapCursor, NodeRef, NodeValue};
pub use error::{Error, InvalidCursorError, Result, SchedulingError};
pub use normalize::normalize;
pub use oracle::{ConfigKey, ConservativeOracle, RwFlags, SafetyOracle};
pub use pattern::{find, find_one, match_pattern};
pub use rewrite::exprs::{
    bind_config, bind_expr, call_swap, commute, config_write, delete_config, extract_method,
    inline_call, lift_constant, merge_writes, partial_eval, set_type_and_mem,
    set_type_and_mem_arg,
};
pub use rewrite::loops::{
    add_loop, add_unsafe_guard, assert_if, bound_and_guard, delete_pass, fission_after,
    fuse_ifs, fuse_loops, insert_pass, lift_scope, partition_loop, product_loop, remove_loop,
    reorder_stmts, specialize, split_loop, unroll, TailStrategy,
};
pub use rewrite::memory::{
    bound_alloc, data_reuse, divide_dim, expand_dim, inline_window, lift_alloc,
    lift_alloc_simple, multiply_dim, rearrange_dim, rearrange_dim_arg, stage_mem, unroll_buffer,
    LiftMode, WRange,
};
pub use simplify::simplify;
