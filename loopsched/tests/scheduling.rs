//! End-to-end scheduling scenarios: each test builds a small procedure,
//! applies directives through the public API, and checks the rewritten tree
//! and the forwarded cursors.

mod common;

use assert_matches::assert_matches;

use common::*;
use loopsched::{
    bind_expr, delete_pass, divide_dim, fission_after, fuse_loops, lift_alloc, lift_constant,
    lift_scope, multiply_dim, rearrange_dim, remove_loop, simplify, split_loop, stage_mem,
    unroll, ConservativeOracle, Cursor, Field, LiftMode, TailStrategy, WRange,
};
use loopsched_ir::ir::{BinOp, Effect, Expr, Stmt};
use loopsched_ir::Sym;

/// Scenario: a perfect split of the outer loop of a 2-deep matmul-style
/// nest, then reordering the fresh inner loop past the next one.  No tail
/// appears, and the body survives up to iterator substitution.
#[test]
fn perfect_split_then_reorder() {
    init_logging();
    let oracle = ConservativeOracle::new();
    let (i, j) = (Sym::fresh("i"), Sym::fresh("j"));
    let (a, b, c) = (Sym::fresh("A"), Sym::fresh("B"), Sym::fresh("C"));
    let n16 = || ixint(16);

    let body = reduce(
        &c,
        vec![rd(&i), rd(&j)],
        op(
            BinOp::Mul,
            buf_rd(&a, vec![rd(&i), rd(&j)]),
            buf_rd(&b, vec![rd(&i), rd(&j)]),
        ),
    );
    let root = proc(
        "matmul",
        vec![
            tensor_arg(&a, vec![n16(), n16()], Effect::In),
            tensor_arg(&b, vec![n16(), n16()], Effect::In),
            tensor_arg(&c, vec![n16(), n16()], Effect::InOut),
        ],
        vec![],
        vec![seq(
            &i,
            ixint(0),
            n16(),
            vec![seq(&j, ixint(0), n16(), vec![body])],
        )],
    );

    let outer = Cursor::root(&root).child(Field::Body, 0);
    let (ir, _fwd) = split_loop(&outer, 4, "o", "l", TailStrategy::Perfect).unwrap();

    // for o in [0, 4): for l in [0, 4): for j in [0, 16): ...
    assert_eq!(ir.body.len(), 1, "perfect split leaves no tail loop");
    let (_, _, o_hi, o_body) = loop_parts(&ir.body[0]);
    assert_eq!(o_hi.as_const_int(), Some(4));
    let (_, _, l_hi, l_body) = loop_parts(&o_body[0]);
    assert_eq!(l_hi.as_const_int(), Some(4));
    let (_, _, j_hi, _) = loop_parts(&l_body[0]);
    assert_eq!(j_hi.as_const_int(), Some(16));

    // reorder (l, j): lift the j loop past l
    let j_loop = Cursor::root(&ir)
        .child(Field::Body, 0)
        .child(Field::Body, 0)
        .child(Field::Body, 0);
    let (ir, _) = lift_scope(&j_loop, &oracle).unwrap();

    let (_, _, _, o_body) = loop_parts(&ir.body[0]);
    let (j_iter, _, j_hi, j_body) = loop_parts(&o_body[0]);
    assert_eq!(j_iter.name(), "j");
    assert_eq!(j_hi.as_const_int(), Some(16));
    let (l_iter, _, _, l_body) = loop_parts(&j_body[0]);
    assert_eq!(l_iter.name(), "l");

    // the body's write index was substituted with 4*o + l
    assert_matches!(&l_body[0], Stmt::Reduce { idx, .. } => {
        assert_eq!(idx[0].to_string(), "4 * o + l");
        assert_eq!(idx[1].to_string(), "j");
    });
}

/// Scenario: fusing two loops over the same symbolic bound.
#[test]
fn fuse_adjacent_loops() {
    init_logging();
    let oracle = ConservativeOracle::new();
    let n = Sym::fresh("n");
    let (i1, i2) = (Sym::fresh("i"), Sym::fresh("i"));
    let (buf, out) = (Sym::fresh("buf"), Sym::fresh("out"));

    let root = proc(
        "p",
        vec![size_arg(&n), tensor_arg(&out, vec![size_rd(&n)], Effect::Out)],
        vec![],
        vec![
            alloc_tensor(&buf, vec![size_rd(&n)]),
            seq(
                &i1,
                ixint(0),
                size_rd(&n),
                vec![assign(&buf, vec![rd(&i1)], cint(0))],
            ),
            seq(
                &i2,
                ixint(0),
                size_rd(&n),
                vec![assign(
                    &out,
                    vec![rd(&i2)],
                    op(BinOp::Mul, buf_rd(&buf, vec![rd(&i2)]), cint(2)),
                )],
            ),
        ],
    );

    let first = Cursor::root(&root).child(Field::Body, 1);
    let second = Cursor::root(&root).child(Field::Body, 2);
    let (ir, _) = fuse_loops(&first, &second, false, &oracle).unwrap();

    assert_eq!(ir.body.len(), 2);
    let (iter, _, _, body) = loop_parts(&ir.body[1]);
    assert_eq!(body.len(), 2);
    // the second body reads the first loop's iterator now
    assert_matches!(&body[1], Stmt::Assign { idx, rhs, .. } => {
        assert_eq!(idx[0].to_string(), iter.name());
        assert!(rhs.to_string().contains(&format!("buf[{}]", iter.name())));
    });
}

/// Scenario: lifting a scalar temporary out of two loops grows it to a
/// matching tensor and indexes every access.
#[test]
fn lift_alloc_through_two_loops() {
    init_logging();
    let (i, j) = (Sym::fresh("i"), Sym::fresh("j"));
    let (n, m) = (Sym::fresh("n"), Sym::fresh("m"));
    let (a, b, c, t) = (
        Sym::fresh("a"),
        Sym::fresh("b"),
        Sym::fresh("c"),
        Sym::fresh("t"),
    );

    let inner = vec![
        Stmt::Alloc {
            name: t.clone(),
            ty: loopsched_ir::types::Type::F32,
            mem: None,
            srcinfo: src(),
        },
        assign(
            &t,
            vec![],
            op(
                BinOp::Mul,
                buf_rd(&a, vec![rd(&i)]),
                buf_rd(&b, vec![rd(&j)]),
            ),
        ),
        assign(&c, vec![rd(&i), rd(&j)], buf_rd(&t, vec![])),
    ];
    let root = proc(
        "p",
        vec![
            size_arg(&n),
            size_arg(&m),
            tensor_arg(&a, vec![size_rd(&n)], Effect::In),
            tensor_arg(&b, vec![size_rd(&m)], Effect::In),
            tensor_arg(&c, vec![size_rd(&n), size_rd(&m)], Effect::Out),
        ],
        vec![],
        vec![seq(
            &i,
            ixint(0),
            size_rd(&n),
            vec![seq(&j, ixint(0), size_rd(&m), inner)],
        )],
    );

    let alloc_c = Cursor::root(&root)
        .child(Field::Body, 0)
        .child(Field::Body, 0)
        .child(Field::Body, 0);
    let (ir, _) = lift_alloc(&alloc_c, 2, LiftMode::Row, None, true).unwrap();

    // alloc t: f32[n, m] now precedes the loop nest
    assert_matches!(&ir.body[0], Stmt::Alloc { ty, .. } => {
        let shape = ty.shape();
        assert_eq!(shape.len(), 2);
        assert_eq!(shape[0].to_string(), "n");
        assert_eq!(shape[1].to_string(), "m");
    });
    let (_, _, _, i_body) = loop_parts(&ir.body[1]);
    let (_, _, _, j_body) = loop_parts(&i_body[0]);
    assert_matches!(&j_body[0], Stmt::Assign { idx, .. } => {
        assert_eq!(idx.len(), 2);
        assert_eq!(idx[0].to_string(), "i");
        assert_eq!(idx[1].to_string(), "j");
    });
    assert_matches!(&j_body[1], Stmt::Assign { rhs, .. } => {
        assert_eq!(rhs.to_string(), "t[i, j]");
    });
}

/// Scenario: lifting the constant factor out of a reduction loop.
#[test]
fn lift_constant_factor() {
    init_logging();
    let oracle = ConservativeOracle::new();
    let i = Sym::fresh("i");
    let (s, x) = (Sym::fresh("s"), Sym::fresh("x"));

    let root = proc(
        "p",
        vec![tensor_arg(&x, vec![ixint(8)], Effect::In)],
        vec![],
        vec![
            alloc_scalar(&s),
            seq(
                &i,
                ixint(0),
                ixint(8),
                vec![reduce(
                    &s,
                    vec![],
                    op(BinOp::Mul, cint(2), buf_rd(&x, vec![rd(&i)])),
                )],
            ),
        ],
    );

    let loop_c = Cursor::root(&root).child(Field::Body, 1);
    let write_c = loop_c.child(Field::Body, 0);
    let (ir, _) = lift_constant(&write_c, &loop_c, &oracle).unwrap();

    assert_eq!(ir.body.len(), 3);
    let (_, _, _, body) = loop_parts(&ir.body[1]);
    assert_matches!(&body[0], Stmt::Reduce { rhs, .. } => {
        assert_eq!(rhs.to_string(), "x[i]");
    });
    assert_matches!(&ir.body[2], Stmt::Assign { name, rhs, .. } => {
        assert_eq!(name, &s);
        assert_eq!(rhs.to_string(), "2 * s");
    });
}

/// Scenario: a perfect split discharged by the procedure precondition
/// `n % 4 == 0`.
#[test]
fn perfect_split_from_precondition() {
    init_logging();
    let n = Sym::fresh("n");
    let i = Sym::fresh("i");
    let y = Sym::fresh("y");

    let pred = Expr::binop(
        BinOp::Eq,
        op(BinOp::Mod, size_rd(&n), cint(4)),
        cint(0),
        loopsched_ir::types::Type::Bool,
        &src(),
    );
    let root = proc(
        "p",
        vec![size_arg(&n), tensor_arg(&y, vec![size_rd(&n)], Effect::Out)],
        vec![pred],
        vec![seq(
            &i,
            ixint(0),
            size_rd(&n),
            vec![assign(&y, vec![rd(&i)], cint(0))],
        )],
    );

    let loop_c = Cursor::root(&root).child(Field::Body, 0);
    let (ir, _) = split_loop(&loop_c, 4, "o", "l", TailStrategy::Perfect).unwrap();

    assert_eq!(ir.body.len(), 1);
    let (_, _, o_hi, o_body) = loop_parts(&ir.body[0]);
    assert_eq!(o_hi.to_string(), "n / 4");
    let (_, _, l_hi, _) = loop_parts(&o_body[0]);
    assert_eq!(l_hi.as_const_int(), Some(4));
}

/// Without the precondition, the same perfect split must fail.
#[test]
fn perfect_split_rejected_without_precondition() {
    let n = Sym::fresh("n");
    let i = Sym::fresh("i");
    let y = Sym::fresh("y");
    let root = proc(
        "p",
        vec![size_arg(&n), tensor_arg(&y, vec![size_rd(&n)], Effect::Out)],
        vec![],
        vec![seq(
            &i,
            ixint(0),
            size_rd(&n),
            vec![assign(&y, vec![rd(&i)], cint(0))],
        )],
    );
    let loop_c = Cursor::root(&root).child(Field::Body, 0);
    assert!(split_loop(&loop_c, 4, "o", "l", TailStrategy::Perfect).is_err());
}

/// Scenario: staging the accumulation target of the innermost matmul loop
/// into a scalar with `accum_zero`.
#[test]
fn stage_memory_accumulator() {
    init_logging();
    let oracle = ConservativeOracle::new();
    let (i, j, k) = (Sym::fresh("i"), Sym::fresh("j"), Sym::fresh("k"));
    let (a, b, c) = (Sym::fresh("A"), Sym::fresh("B"), Sym::fresh("C"));
    let n4 = || ixint(4);

    let k_loop = seq(
        &k,
        ixint(0),
        n4(),
        vec![reduce(
            &c,
            vec![rd(&i), rd(&j)],
            op(
                BinOp::Mul,
                buf_rd(&a, vec![rd(&i), rd(&k)]),
                buf_rd(&b, vec![rd(&k), rd(&j)]),
            ),
        )],
    );
    let root = proc(
        "p",
        vec![
            tensor_arg(&a, vec![n4(), n4()], Effect::In),
            tensor_arg(&b, vec![n4(), n4()], Effect::In),
            tensor_arg(&c, vec![n4(), n4()], Effect::InOut),
        ],
        vec![],
        vec![seq(
            &i,
            ixint(0),
            n4(),
            vec![seq(&j, ixint(0), n4(), vec![k_loop])],
        )],
    );

    let k_loop_c = Cursor::root(&root)
        .child(Field::Body, 0)
        .child(Field::Body, 0)
        .child(Field::Body, 0);
    let block = k_loop_c.as_block().unwrap();
    let (ir, _) = stage_mem(
        &block,
        "C",
        vec![WRange::Point(rd(&i)), WRange::Point(rd(&j))],
        "acc",
        true,
        &oracle,
    )
    .unwrap();

    // for j: { acc : R ; acc = 0.0 ; for k: acc += ... ; C[i, j] += acc }
    let (_, _, _, i_body) = loop_parts(&ir.body[0]);
    let (_, _, _, j_body) = loop_parts(&i_body[0]);
    assert_eq!(j_body.len(), 4);
    assert_matches!(&j_body[0], Stmt::Alloc { ty, .. } => assert_eq!(ty.rank(), 0));
    assert_matches!(&j_body[1], Stmt::Assign { idx, .. } => assert!(idx.is_empty()));
    let (_, _, _, k_body) = loop_parts(&j_body[2]);
    assert_matches!(&k_body[0], Stmt::Reduce { name, idx, .. } => {
        assert_eq!(name.name(), "acc");
        assert!(idx.is_empty());
    });
    assert_matches!(&j_body[3], Stmt::Reduce { name, idx, rhs, .. } => {
        assert_eq!(name, &c);
        assert_eq!(idx.len(), 2);
        assert_eq!(rhs.to_string(), "acc");
    });
}

/// A write-only staged block gets a store epilogue but no load.
#[test]
fn stage_memory_write_only_skips_load() {
    init_logging();
    let oracle = ConservativeOracle::new();
    let i = Sym::fresh("i");
    let (y, n) = (Sym::fresh("y"), Sym::fresh("n"));

    let root = proc(
        "p",
        vec![size_arg(&n), tensor_arg(&y, vec![size_rd(&n)], Effect::Out)],
        vec![],
        vec![seq(
            &i,
            ixint(0),
            size_rd(&n),
            vec![assign(&y, vec![rd(&i)], cint(1))],
        )],
    );

    let body_c = Cursor::root(&root)
        .child(Field::Body, 0)
        .child(Field::Body, 0);
    let block = body_c.as_block().unwrap();
    let (ir, _) = stage_mem(
        &block,
        "y",
        vec![WRange::Point(rd(&i))],
        "tmp",
        false,
        &oracle,
    )
    .unwrap();

    // for i: { tmp : R ; tmp = 1 ; y[i] = tmp }  — no load loop
    let (_, _, _, body) = loop_parts(&ir.body[0]);
    assert_eq!(body.len(), 3);
    assert_matches!(&body[0], Stmt::Alloc { .. });
    assert_matches!(&body[1], Stmt::Assign { name, .. } => assert_eq!(name.name(), "tmp"));
    assert_matches!(&body[2], Stmt::Assign { name, rhs, .. } => {
        assert_eq!(name, &y);
        assert_eq!(rhs.to_string(), "tmp");
    });
}

/// Splitting by a factor of one is rejected.
#[test]
fn split_by_one_is_rejected() {
    let i = Sym::fresh("i");
    let y = Sym::fresh("y");
    let root = proc(
        "p",
        vec![tensor_arg(&y, vec![ixint(8)], Effect::Out)],
        vec![],
        vec![seq(
            &i,
            ixint(0),
            ixint(8),
            vec![assign(&y, vec![rd(&i)], cint(0))],
        )],
    );
    let loop_c = Cursor::root(&root).child(Field::Body, 0);
    assert!(split_loop(&loop_c, 1, "o", "l", TailStrategy::Guard).is_err());
}

/// Unrolling a zero-trip loop erases the loop body entirely.
#[test]
fn unroll_zero_trip_loop() {
    let i = Sym::fresh("i");
    let y = Sym::fresh("y");
    let root = proc(
        "p",
        vec![tensor_arg(&y, vec![ixint(8)], Effect::Out)],
        vec![],
        vec![seq(
            &i,
            ixint(0),
            ixint(0),
            vec![assign(&y, vec![rd(&i)], cint(0))],
        )],
    );
    let loop_c = Cursor::root(&root).child(Field::Body, 0);
    let (ir, _) = unroll(&loop_c).unwrap();
    assert!(ir.body.iter().all(|s| s.is_pass()));
}

/// A perfect split followed by unrolling the inner loop yields exactly `q`
/// body copies per outer iteration.
#[test]
fn perfect_split_then_unroll_inner() {
    let i = Sym::fresh("i");
    let y = Sym::fresh("y");
    let root = proc(
        "p",
        vec![tensor_arg(&y, vec![ixint(8)], Effect::Out)],
        vec![],
        vec![seq(
            &i,
            ixint(0),
            ixint(8),
            vec![assign(&y, vec![rd(&i)], cint(0))],
        )],
    );
    let loop_c = Cursor::root(&root).child(Field::Body, 0);
    let (ir, _) = split_loop(&loop_c, 4, "o", "l", TailStrategy::Perfect).unwrap();
    let inner_c = Cursor::root(&ir)
        .child(Field::Body, 0)
        .child(Field::Body, 0);
    let (ir, _) = unroll(&inner_c).unwrap();
    let (_, _, o_hi, o_body) = loop_parts(&ir.body[0]);
    assert_eq!(o_hi.as_const_int(), Some(2));
    assert_eq!(o_body.len(), 4);
}

/// Fission with zero lifts changes nothing.
#[test]
fn fission_zero_lifts_is_noop() {
    let oracle = ConservativeOracle::new();
    let i = Sym::fresh("i");
    let y = Sym::fresh("y");
    let root = proc(
        "p",
        vec![tensor_arg(&y, vec![ixint(8)], Effect::Out)],
        vec![],
        vec![seq(
            &i,
            ixint(0),
            ixint(8),
            vec![
                assign(&y, vec![rd(&i)], cint(0)),
                assign(&y, vec![rd(&i)], cint(1)),
            ],
        )],
    );
    let stmt_c = Cursor::root(&root)
        .child(Field::Body, 0)
        .child(Field::Body, 0);
    let (ir, fwd) = fission_after(&stmt_c, 0, &oracle).unwrap();
    assert_eq!(*ir, *root);
    // the forwarder is the identity on surviving cursors
    let fwded = fwd.fwd(&stmt_c).unwrap();
    assert_eq!(fwded.path(), stmt_c.path());
}

/// Fission splits the loop into two, rebinding the post half.
#[test]
fn fission_splits_a_loop() {
    init_logging();
    let oracle = ConservativeOracle::new();
    let i = Sym::fresh("i");
    let (y, z) = (Sym::fresh("y"), Sym::fresh("z"));
    let root = proc(
        "p",
        vec![
            tensor_arg(&y, vec![ixint(8)], Effect::Out),
            tensor_arg(&z, vec![ixint(8)], Effect::Out),
        ],
        vec![],
        vec![seq(
            &i,
            ixint(0),
            ixint(8),
            vec![
                assign(&y, vec![rd(&i)], cint(0)),
                assign(&z, vec![rd(&i)], cint(1)),
            ],
        )],
    );
    let stmt_c = Cursor::root(&root)
        .child(Field::Body, 0)
        .child(Field::Body, 0);
    let (ir, _) = fission_after(&stmt_c, 1, &oracle).unwrap();

    assert_eq!(ir.body.len(), 2);
    let (_, _, _, first_body) = loop_parts(&ir.body[0]);
    let (it2, _, _, second_body) = loop_parts(&ir.body[1]);
    assert_matches!(&first_body[0], Stmt::Assign { name, .. } => assert_eq!(name, &y));
    assert_matches!(&second_body[0], Stmt::Assign { name, idx, .. } => {
        assert_eq!(name, &z);
        assert_eq!(idx[0].to_string(), it2.name());
    });
}

/// `rearrange_dim` with the identity permutation is a no-op.
#[test]
fn rearrange_identity_is_noop() {
    let i = Sym::fresh("i");
    let t = Sym::fresh("t");
    let root = proc(
        "p",
        vec![],
        vec![],
        vec![
            alloc_tensor(&t, vec![ixint(4), ixint(8)]),
            seq(
                &i,
                ixint(0),
                ixint(4),
                vec![assign(&t, vec![rd(&i), rd(&i)], cint(0))],
            ),
        ],
    );
    let alloc_c = Cursor::root(&root).child(Field::Body, 0);
    let (ir, _) = rearrange_dim(&alloc_c, vec![0, 1]).unwrap();
    assert_eq!(*ir, *root);
}

/// Dividing a dimension and multiplying it back restores the original
/// accesses after simplification.
#[test]
fn divide_then_multiply_roundtrip() {
    init_logging();
    let i = Sym::fresh("i");
    let t = Sym::fresh("t");
    let root = proc(
        "p",
        vec![],
        vec![],
        vec![
            alloc_tensor(&t, vec![ixint(8)]),
            seq(
                &i,
                ixint(0),
                ixint(8),
                vec![assign(&t, vec![rd(&i)], cint(0))],
            ),
        ],
    );

    let alloc_c = Cursor::root(&root).child(Field::Body, 0);
    let (ir, _) = divide_dim(&alloc_c, 0, 4).unwrap();
    assert_matches!(&ir.body[0], Stmt::Alloc { ty, .. } => {
        assert_eq!(ty.shape().len(), 2);
        assert_eq!(ty.shape()[0].as_const_int(), Some(2));
        assert_eq!(ty.shape()[1].as_const_int(), Some(4));
    });

    let alloc_c = Cursor::root(&ir).child(Field::Body, 0);
    let (ir, _) = multiply_dim(&alloc_c, 0, 1).unwrap();
    let (ir, _) = simplify(&ir).unwrap();

    assert_matches!(&ir.body[0], Stmt::Alloc { ty, .. } => {
        assert_eq!(ty.shape().len(), 1);
        assert_eq!(ty.shape()[0].as_const_int(), Some(8));
    });
    let (_, _, _, body) = loop_parts(&ir.body[1]);
    assert_matches!(&body[0], Stmt::Assign { idx, .. } => {
        assert_eq!(idx[0].to_string(), "i");
    });
}

/// Applying `lift_scope` twice climbs the statement two levels.
#[test]
fn lift_scope_twice_climbs_two_levels() {
    init_logging();
    let oracle = ConservativeOracle::new();
    let (i, j, k) = (Sym::fresh("i"), Sym::fresh("j"), Sym::fresh("k"));
    let c = Sym::fresh("c");
    let root = proc(
        "p",
        vec![tensor_arg(&c, vec![ixint(4), ixint(4), ixint(4)], Effect::Out)],
        vec![],
        vec![seq(
            &i,
            ixint(0),
            ixint(4),
            vec![seq(
                &j,
                ixint(0),
                ixint(4),
                vec![seq(
                    &k,
                    ixint(0),
                    ixint(4),
                    vec![assign(&c, vec![rd(&i), rd(&j), rd(&k)], cint(0))],
                )],
            )],
        )],
    );

    let k_loop = Cursor::root(&root)
        .child(Field::Body, 0)
        .child(Field::Body, 0)
        .child(Field::Body, 0);
    let (ir, fwd) = lift_scope(&k_loop, &oracle).unwrap();
    let k_loop = fwd.fwd(&k_loop).unwrap();
    let (ir2, _) = lift_scope(&k_loop, &oracle).unwrap();

    let (top_iter, _, _, _) = loop_parts(&ir2.body[0]);
    assert_eq!(top_iter, &k);
    // intermediate tree had k in the middle
    let (mid_iter, _, _, mid_body) = loop_parts(&ir.body[0]);
    assert_eq!(mid_iter, &i);
    let (inner_iter, _, _, _) = loop_parts(&mid_body[0]);
    assert_eq!(inner_iter, &k);
}

/// `remove_loop` unwraps a loop whose body ignores the iterator, guarding
/// when the trip count is not provably positive.
#[test]
fn remove_loop_unwraps_or_guards() {
    init_logging();
    let oracle = ConservativeOracle::new();
    let i = Sym::fresh("i");
    let y = Sym::fresh("y");
    let mk = |hi: Expr| {
        proc(
            "p",
            vec![tensor_arg(&y, vec![ixint(8)], Effect::Out)],
            vec![],
            vec![seq(&i, ixint(0), hi, vec![assign(&y, vec![cint(0)], cint(1))])],
        )
    };

    // positive trip count: plain unwrap
    let root = mk(ixint(8));
    let loop_c = Cursor::root(&root).child(Field::Body, 0);
    let (ir, _) = remove_loop(&loop_c, &oracle).unwrap();
    assert_matches!(&ir.body[0], Stmt::Assign { .. });

    // unknown trip count: a guard appears
    let n = Sym::fresh("n");
    let root = proc(
        "p",
        vec![
            size_arg(&n),
            tensor_arg(&y, vec![ixint(8)], Effect::Out),
        ],
        vec![],
        vec![seq(
            &i,
            ixint(0),
            op(BinOp::Sub, size_rd(&n), cint(1)),
            vec![assign(&y, vec![cint(0)], cint(1))],
        )],
    );
    let loop_c = Cursor::root(&root).child(Field::Body, 0);
    let (ir, _) = remove_loop(&loop_c, &oracle).unwrap();
    assert_matches!(&ir.body[0], Stmt::If { body, .. } => {
        assert_matches!(&body[0], Stmt::Assign { .. });
    });
}

/// `bind_expr` introduces the scalar and stops replacing at the first write
/// to a read buffer.
#[test]
fn bind_expr_stops_at_clobber() {
    init_logging();
    let oracle = ConservativeOracle::new();
    let (x, y) = (Sym::fresh("x"), Sym::fresh("y"));
    let e = || op(BinOp::Mul, buf_rd(&x, vec![cint(0)]), cint(2));
    let root = proc(
        "p",
        vec![
            tensor_arg(&x, vec![ixint(4)], Effect::InOut),
            tensor_arg(&y, vec![ixint(4)], Effect::Out),
        ],
        vec![],
        vec![
            assign(&y, vec![cint(0)], e()),
            assign(&x, vec![cint(1)], cint(7)),
            assign(&y, vec![cint(2)], e()),
        ],
    );

    let occ1 = Cursor::root(&root).child(Field::Body, 0).child(Field::Rhs, 0);
    let occ2 = Cursor::root(&root).child(Field::Body, 2).child(Field::Rhs, 0);
    let (ir, _) = bind_expr("tmp", &[occ1, occ2], true, &oracle).unwrap();

    // alloc tmp; tmp = x[0] * 2; y[0] = tmp; x[1] = 7; y[2] = x[0] * 2
    assert_eq!(ir.body.len(), 5);
    assert_matches!(&ir.body[0], Stmt::Alloc { .. });
    assert_matches!(&ir.body[2], Stmt::Assign { rhs, .. } => assert_eq!(rhs.to_string(), "tmp"));
    assert_matches!(&ir.body[4], Stmt::Assign { rhs, .. } => {
        assert_eq!(rhs.to_string(), "x[0] * 2");
    });
}

/// `delete_pass` removes passes and collapses loops left empty.
#[test]
fn delete_pass_collapses() {
    let i = Sym::fresh("i");
    let y = Sym::fresh("y");
    let root = proc(
        "p",
        vec![tensor_arg(&y, vec![ixint(8)], Effect::Out)],
        vec![],
        vec![
            Stmt::Pass { srcinfo: src() },
            seq(&i, ixint(0), ixint(8), vec![Stmt::Pass { srcinfo: src() }]),
            assign(&y, vec![cint(0)], cint(1)),
        ],
    );
    let (ir, _) = delete_pass(&root).unwrap();
    assert_eq!(ir.body.len(), 1);
    assert_matches!(&ir.body[0], Stmt::Assign { .. });
}

/// Cursors survive a directive through its forwarder and still point at the
/// same (locally rewritten) statement.
#[test]
fn forwarding_preserves_untouched_cursors() {
    let oracle = ConservativeOracle::new();
    let i = Sym::fresh("i");
    let (y, z) = (Sym::fresh("y"), Sym::fresh("z"));
    let root = proc(
        "p",
        vec![
            tensor_arg(&y, vec![ixint(8)], Effect::Out),
            tensor_arg(&z, vec![ixint(8)], Effect::Out),
        ],
        vec![],
        vec![
            seq(&i, ixint(0), ixint(8), vec![assign(&y, vec![rd(&i)], cint(0))]),
            assign(&z, vec![cint(0)], cint(3)),
        ],
    );

    let tail_c = Cursor::root(&root).child(Field::Body, 1);
    let loop_c = Cursor::root(&root).child(Field::Body, 0);
    let (_, fwd) = split_loop(&loop_c, 2, "o", "l", TailStrategy::Guard).unwrap();

    let tail2 = fwd.fwd(&tail_c).unwrap();
    assert_matches!(tail2.stmt().unwrap(), Stmt::Assign { name, .. } => {
        assert_eq!(name, &z);
    });
}
