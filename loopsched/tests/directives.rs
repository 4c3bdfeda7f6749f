//! Per-directive coverage for the rest of the catalogue: splitting with
//! tails, loop products and partitions, conditional surgery, call and config
//! rewrites, and the buffer-shape directives.

mod common;

use std::rc::Rc;

use assert_matches::assert_matches;

use common::*;
use loopsched::{
    add_loop, add_unsafe_guard, assert_if, bind_config, bound_alloc, bound_and_guard, call_swap,
    commute, config_write, data_reuse, delete_config, expand_dim, extract_method, find, find_one,
    fuse_ifs, inline_call, inline_window, insert_pass, lift_alloc_simple, merge_writes,
    partial_eval, partition_loop, product_loop, set_type_and_mem, split_loop, unroll_buffer,
    ConservativeOracle, Cursor, Field, TailStrategy,
};
use loopsched_ir::ir::{BinOp, Config, Effect, Expr, Lit, Mem, Stmt, WAccess};
use loopsched_ir::types::Type;
use loopsched_ir::{Sym};
use rustc_hash::FxHashMap;

#[test]
fn split_cut_emits_tail_loop() {
    init_logging();
    let i = Sym::fresh("i");
    let y = Sym::fresh("y");
    let root = proc(
        "p",
        vec![tensor_arg(&y, vec![ixint(10)], Effect::Out)],
        vec![],
        vec![seq(
            &i,
            ixint(0),
            ixint(10),
            vec![assign(&y, vec![rd(&i)], cint(0))],
        )],
    );
    let loop_c = Cursor::root(&root).child(Field::Body, 0);
    let (ir, _) = split_loop(&loop_c, 4, "o", "l", TailStrategy::Cut).unwrap();
    assert_eq!(ir.body.len(), 2);
    let (_, _, tail_hi, _) = loop_parts(&ir.body[1]);
    assert_eq!(tail_hi.to_string(), "10 % 4");

    // cut-and-guard wraps the tail in a non-empty check
    let (ir, _) = split_loop(&loop_c, 4, "o", "l", TailStrategy::CutAndGuard).unwrap();
    assert_matches!(&ir.body[1], Stmt::If { cond, body, .. } => {
        assert_eq!(cond.to_string(), "10 % 4 > 0");
        assert_matches!(&body[0], Stmt::Seq { .. });
    });
}

#[test]
fn product_loop_fuses_nest() {
    init_logging();
    let (i, j) = (Sym::fresh("i"), Sym::fresh("j"));
    let (n, y) = (Sym::fresh("n"), Sym::fresh("y"));
    let root = proc(
        "p",
        vec![
            size_arg(&n),
            tensor_arg(&y, vec![size_rd(&n), ixint(4)], Effect::Out),
        ],
        vec![],
        vec![seq(
            &i,
            ixint(0),
            size_rd(&n),
            vec![seq(
                &j,
                ixint(0),
                ixint(4),
                vec![assign(&y, vec![rd(&i), rd(&j)], cint(0))],
            )],
        )],
    );
    let outer = Cursor::root(&root).child(Field::Body, 0);
    let (ir, _) = product_loop(&outer, "ij").unwrap();

    let (iter, _, hi, body) = loop_parts(&ir.body[0]);
    assert_eq!(iter.name(), "ij");
    assert_eq!(hi.to_string(), "n * 4");
    assert_matches!(&body[0], Stmt::Assign { idx, .. } => {
        assert_eq!(idx[0].to_string(), "ij / 4");
        assert_eq!(idx[1].to_string(), "ij % 4");
    });
}

#[test]
fn partition_loop_offsets_second_half() {
    init_logging();
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
            vec![assign(&y, vec![rd(&i)], cint(0))],
        )],
    );
    let loop_c = Cursor::root(&root).child(Field::Body, 0);
    let (ir, _) = partition_loop(&loop_c, 3, &oracle).unwrap();

    assert_eq!(ir.body.len(), 2);
    let (_, _, hi1, _) = loop_parts(&ir.body[0]);
    assert_eq!(hi1.as_const_int(), Some(3));
    let (_, _, _, body2) = loop_parts(&ir.body[1]);
    assert_matches!(&body2[0], Stmt::Assign { idx, .. } => {
        assert_eq!(idx[0].to_string(), "i + 3");
    });
}

#[test]
fn fuse_ifs_concatenates_arms() {
    init_logging();
    let oracle = ConservativeOracle::new();
    let n = Sym::fresh("n");
    let y = Sym::fresh("y");
    let cond = || {
        Expr::binop(
            BinOp::Lt,
            size_rd(&n),
            cint(4),
            Type::Bool,
            &src(),
        )
    };
    let if1 = Stmt::If {
        cond: cond(),
        body: vec![assign(&y, vec![cint(0)], cint(1))],
        orelse: vec![assign(&y, vec![cint(0)], cint(2))],
        srcinfo: src(),
    };
    let if2 = Stmt::If {
        cond: cond(),
        body: vec![assign(&y, vec![cint(1)], cint(3))],
        orelse: vec![],
        srcinfo: src(),
    };
    let root = proc(
        "p",
        vec![size_arg(&n), tensor_arg(&y, vec![ixint(8)], Effect::Out)],
        vec![],
        vec![if1, if2],
    );
    let first = Cursor::root(&root).child(Field::Body, 0);
    let second = Cursor::root(&root).child(Field::Body, 1);
    let (ir, _) = fuse_ifs(&first, &second, &oracle).unwrap();

    assert_eq!(ir.body.len(), 1);
    assert_matches!(&ir.body[0], Stmt::If { body, orelse, .. } => {
        assert_eq!(body.len(), 2);
        assert_eq!(orelse.len(), 1);
    });
}

#[test]
fn assert_if_selects_the_proven_arm() {
    let oracle = ConservativeOracle::new();
    let y = Sym::fresh("y");
    let root = proc(
        "p",
        vec![tensor_arg(&y, vec![ixint(8)], Effect::Out)],
        vec![],
        vec![Stmt::If {
            cond: Expr::bool(true, &src()),
            body: vec![assign(&y, vec![cint(0)], cint(1))],
            orelse: vec![assign(&y, vec![cint(0)], cint(2))],
            srcinfo: src(),
        }],
    );
    let if_c = Cursor::root(&root).child(Field::Body, 0);
    let (ir, _) = assert_if(&if_c, true, &oracle).unwrap();
    assert_eq!(ir.body.len(), 1);
    assert_matches!(&ir.body[0], Stmt::Assign { rhs, .. } => {
        assert_eq!(rhs.as_const_int(), Some(1));
    });
}

#[test]
fn add_loop_with_guard() {
    let oracle = ConservativeOracle::new();
    let y = Sym::fresh("y");
    let root = proc(
        "p",
        vec![tensor_arg(&y, vec![ixint(8)], Effect::Out)],
        vec![],
        vec![assign(&y, vec![cint(0)], cint(1))],
    );
    let stmt_c = Cursor::root(&root).child(Field::Body, 0);
    let (ir, _) = add_loop(&stmt_c, "it", cint(4), true, false, &oracle).unwrap();

    let (iter, _, hi, body) = loop_parts(&ir.body[0]);
    assert_eq!(iter.name(), "it");
    assert_eq!(hi.as_const_int(), Some(4));
    assert_matches!(&body[0], Stmt::If { cond, body, .. } => {
        assert_eq!(cond.to_string(), "it == 0");
        assert_matches!(&body[0], Stmt::Assign { .. });
    });
}

#[test]
fn unsafe_guard_and_insert_pass() {
    let y = Sym::fresh("y");
    let n = Sym::fresh("n");
    let root = proc(
        "p",
        vec![size_arg(&n), tensor_arg(&y, vec![ixint(8)], Effect::Out)],
        vec![],
        vec![assign(&y, vec![cint(0)], cint(1))],
    );
    let stmt_c = Cursor::root(&root).child(Field::Body, 0);
    let cond = Expr::binop(BinOp::Gt, size_rd(&n), cint(0), Type::Bool, &src());
    let (ir, _) = add_unsafe_guard(&stmt_c, cond).unwrap();
    assert_matches!(&ir.body[0], Stmt::If { cond, .. } => {
        assert_eq!(cond.to_string(), "n > 0");
    });

    let stmt_c = Cursor::root(&ir).child(Field::Body, 0);
    let (ir, _) = insert_pass(&stmt_c.before().unwrap()).unwrap();
    assert!(ir.body[0].is_pass());
    assert_matches!(&ir.body[1], Stmt::If { .. });
}

#[test]
fn bound_and_guard_derives_envelope() {
    let i = Sym::fresh("i");
    let (n, y) = (Sym::fresh("n"), Sym::fresh("y"));
    let root = proc(
        "p",
        vec![size_arg(&n), tensor_arg(&y, vec![ixint(8)], Effect::Out)],
        vec![],
        vec![seq(
            &i,
            ixint(0),
            op(BinOp::Mod, size_rd(&n), cint(8)),
            vec![assign(&y, vec![rd(&i)], cint(0))],
        )],
    );
    let loop_c = Cursor::root(&root).child(Field::Body, 0);
    let (ir, _) = bound_and_guard(&loop_c).unwrap();
    let (_, _, hi, body) = loop_parts(&ir.body[0]);
    assert_eq!(hi.as_const_int(), Some(8));
    assert_matches!(&body[0], Stmt::If { cond, .. } => {
        assert_eq!(cond.to_string(), "i < n % 8");
    });
}

#[test]
fn commute_swaps_operands() {
    let (a, b, y) = (Sym::fresh("a"), Sym::fresh("b"), Sym::fresh("y"));
    let root = proc(
        "p",
        vec![
            tensor_arg(&a, vec![ixint(4)], Effect::In),
            tensor_arg(&b, vec![ixint(4)], Effect::In),
            tensor_arg(&y, vec![ixint(4)], Effect::Out),
        ],
        vec![],
        vec![assign(
            &y,
            vec![cint(0)],
            op(
                BinOp::Mul,
                buf_rd(&a, vec![cint(0)]),
                buf_rd(&b, vec![cint(0)]),
            ),
        )],
    );
    let rhs_c = Cursor::root(&root).child(Field::Body, 0).child(Field::Rhs, 0);
    let (ir, _) = commute(&[rhs_c]).unwrap();
    assert_matches!(&ir.body[0], Stmt::Assign { rhs, .. } => {
        assert_eq!(rhs.to_string(), "b[0] * a[0]");
    });
}

#[test]
fn merge_writes_folds_reduction() {
    let oracle = ConservativeOracle::new();
    let y = Sym::fresh("y");
    let root = proc(
        "p",
        vec![tensor_arg(&y, vec![ixint(4)], Effect::Out)],
        vec![],
        vec![
            assign(&y, vec![cint(0)], cint(2)),
            reduce(&y, vec![cint(0)], cint(3)),
        ],
    );
    let c1 = Cursor::root(&root).child(Field::Body, 0);
    let c2 = Cursor::root(&root).child(Field::Body, 1);
    let (ir, _) = merge_writes(&c1, &c2, &oracle).unwrap();
    assert_eq!(ir.body.len(), 1);
    assert_matches!(&ir.body[0], Stmt::Assign { rhs, .. } => {
        assert_eq!(rhs.to_string(), "2 + 3");
    });
}

#[test]
fn inline_substitutes_callee_body() {
    init_logging();
    let y_arg = Sym::fresh("dst");
    let callee = proc(
        "set_first",
        vec![tensor_arg(&y_arg, vec![ixint(4)], Effect::Out)],
        vec![],
        vec![assign(&y_arg, vec![cint(0)], cint(7))],
    );

    let y = Sym::fresh("y");
    let root = proc(
        "p",
        vec![tensor_arg(&y, vec![ixint(4)], Effect::Out)],
        vec![],
        vec![Stmt::Call {
            proc: callee,
            args: vec![Expr::Read {
                name: y.clone(),
                idx: vec![],
                ty: Type::tensor(vec![ixint(4)], false, Type::F32),
                srcinfo: src(),
            }],
            srcinfo: src(),
        }],
    );
    let call_c = Cursor::root(&root).child(Field::Body, 0);
    let (ir, _) = inline_call(&call_c).unwrap();
    assert_matches!(&ir.body[0], Stmt::Assign { name, rhs, .. } => {
        assert_eq!(name, &y);
        assert_eq!(rhs.as_const_int(), Some(7));
    });
}

#[test]
fn call_swap_requires_equivalence() {
    let oracle = ConservativeOracle::new();
    let mk_callee = |name: &str, val: i64| {
        let arg = Sym::fresh("dst");
        proc(
            name,
            vec![tensor_arg(&arg, vec![ixint(4)], Effect::Out)],
            vec![],
            vec![assign(&arg, vec![cint(0)], cint(val))],
        )
    };
    let old_callee = mk_callee("v1", 7);
    let new_callee = mk_callee("v2", 7);
    let different = mk_callee("v3", 8);

    let y = Sym::fresh("y");
    let root = proc(
        "p",
        vec![tensor_arg(&y, vec![ixint(4)], Effect::Out)],
        vec![],
        vec![Stmt::Call {
            proc: old_callee,
            args: vec![Expr::Read {
                name: y.clone(),
                idx: vec![],
                ty: Type::tensor(vec![ixint(4)], false, Type::F32),
                srcinfo: src(),
            }],
            srcinfo: src(),
        }],
    );
    let call_c = Cursor::root(&root).child(Field::Body, 0);

    let (ir, _, keys) = call_swap(&call_c, &new_callee, &oracle).unwrap();
    assert!(keys.is_empty());
    assert_matches!(&ir.body[0], Stmt::Call { proc, .. } => assert_eq!(proc.name, "v2"));

    let call_c = Cursor::root(&root).child(Field::Body, 0);
    assert!(call_swap(&call_c, &different, &oracle).is_err());
}

#[test]
fn partial_eval_substitutes_and_drops_args() {
    init_logging();
    let (n, i) = (Sym::fresh("n"), Sym::fresh("i"));
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
    let mut env = FxHashMap::default();
    env.insert(n.clone(), Lit::Int(8));
    let (ir, _) = partial_eval(&root, &env).unwrap();

    assert_eq!(ir.args.len(), 1);
    assert_eq!(ir.args[0].ty.shape()[0].as_const_int(), Some(8));
    let (_, _, hi, _) = loop_parts(&ir.body[0]);
    assert_eq!(hi.as_const_int(), Some(8));
}

#[test]
fn extract_method_builds_closure() {
    init_logging();
    let oracle = ConservativeOracle::new();
    let (n, m) = (Sym::fresh("n"), Sym::fresh("m"));
    let (i, j) = (Sym::fresh("i"), Sym::fresh("j"));
    let c = Sym::fresh("c");
    let root = proc(
        "p",
        vec![
            size_arg(&n),
            size_arg(&m),
            tensor_arg(&c, vec![size_rd(&n), size_rd(&m)], Effect::Out),
        ],
        vec![],
        vec![seq(
            &i,
            ixint(0),
            size_rd(&n),
            vec![seq(
                &j,
                ixint(0),
                size_rd(&m),
                vec![assign(&c, vec![rd(&i), rd(&j)], cint(0))],
            )],
        )],
    );
    let j_loop = Cursor::root(&root)
        .child(Field::Body, 0)
        .child(Field::Body, 0);
    let (ir, _, callee) = extract_method(&j_loop, "inner", None, &oracle).unwrap();

    let (_, _, _, i_body) = loop_parts(&ir.body[0]);
    assert_matches!(&i_body[0], Stmt::Call { proc, .. } => {
        assert_eq!(proc.name, "inner");
    });
    // sizes head the signature
    assert_matches!(callee.args.first(), Some(arg) => {
        assert_matches!(arg.ty, Type::Size);
    });
    assert_matches!(&callee.body[0], Stmt::Seq { .. });
}

#[test]
fn expand_dim_indexes_by_enclosing_iter() {
    init_logging();
    let oracle = ConservativeOracle::new();
    let (i, j) = (Sym::fresh("i"), Sym::fresh("j"));
    let t = Sym::fresh("t");
    let root = proc(
        "p",
        vec![],
        vec![],
        vec![seq(
            &j,
            ixint(0),
            ixint(4),
            vec![
                alloc_tensor(&t, vec![ixint(8)]),
                seq(
                    &i,
                    ixint(0),
                    ixint(8),
                    vec![assign(&t, vec![rd(&i)], cint(0))],
                ),
            ],
        )],
    );
    let alloc_c = Cursor::root(&root)
        .child(Field::Body, 0)
        .child(Field::Body, 0);
    let (ir, _) = expand_dim(&alloc_c, ixint(4), rd(&j), &oracle).unwrap();

    let (_, _, _, j_body) = loop_parts(&ir.body[0]);
    assert_matches!(&j_body[0], Stmt::Alloc { ty, .. } => {
        assert_eq!(ty.shape().len(), 2);
        assert_eq!(ty.shape()[0].as_const_int(), Some(4));
    });
    let (_, _, _, i_body) = loop_parts(&j_body[1]);
    assert_matches!(&i_body[0], Stmt::Assign { idx, .. } => {
        assert_eq!(idx.len(), 2);
        assert_eq!(idx[0].to_string(), "j");
        assert_eq!(idx[1].to_string(), "i");
    });
}

#[test]
fn unroll_buffer_splits_by_constant_index() {
    init_logging();
    let t = Sym::fresh("t");
    let y = Sym::fresh("y");
    let root = proc(
        "p",
        vec![tensor_arg(&y, vec![ixint(4)], Effect::Out)],
        vec![],
        vec![
            alloc_tensor(&t, vec![ixint(2)]),
            assign(&t, vec![cint(0)], cint(1)),
            assign(&t, vec![cint(1)], cint(2)),
            assign(
                &y,
                vec![cint(0)],
                op(
                    BinOp::Add,
                    buf_rd(&t, vec![cint(0)]),
                    buf_rd(&t, vec![cint(1)]),
                ),
            ),
        ],
    );
    let alloc_c = Cursor::root(&root).child(Field::Body, 0);
    let (ir, _) = unroll_buffer(&alloc_c, 0).unwrap();

    assert_eq!(ir.body.len(), 5);
    assert_matches!(&ir.body[0], Stmt::Alloc { name, ty, .. } => {
        assert_eq!(name.name(), "t_0");
        assert_eq!(ty.rank(), 0);
    });
    assert_matches!(&ir.body[1], Stmt::Alloc { name, .. } => assert_eq!(name.name(), "t_1"));
    assert_matches!(&ir.body[2], Stmt::Assign { name, idx, .. } => {
        assert_eq!(name.name(), "t_0");
        assert!(idx.is_empty());
    });
    assert_matches!(&ir.body[4], Stmt::Assign { rhs, .. } => {
        assert_eq!(rhs.to_string(), "t_0 + t_1");
    });
}

#[test]
fn data_reuse_renames_alias() {
    init_logging();
    let oracle = ConservativeOracle::new();
    let (a, b, y) = (Sym::fresh("a"), Sym::fresh("b"), Sym::fresh("y"));
    let root = proc(
        "p",
        vec![tensor_arg(&y, vec![ixint(4)], Effect::Out)],
        vec![],
        vec![
            alloc_scalar(&a),
            alloc_scalar(&b),
            assign(&a, vec![], cint(1)),
            assign(&y, vec![cint(0)], buf_rd(&a, vec![])),
            assign(&b, vec![], cint(2)),
            assign(&y, vec![cint(1)], buf_rd(&b, vec![])),
        ],
    );
    let target_c = Cursor::root(&root).child(Field::Body, 0);
    let alias_c = Cursor::root(&root).child(Field::Body, 1);
    let (ir, _) = data_reuse(&target_c, &alias_c, &oracle).unwrap();

    assert_eq!(ir.body.len(), 5);
    assert_matches!(&ir.body[3], Stmt::Assign { name, .. } => assert_eq!(name, &a));
    assert_matches!(&ir.body[4], Stmt::Assign { rhs, .. } => {
        assert_eq!(rhs.to_string(), "a");
    });
}

#[test]
fn inline_window_offsets_accesses() {
    init_logging();
    let (buf, win, y) = (Sym::fresh("buf"), Sym::fresh("win"), Sym::fresh("y"));
    let win_ty = Type::Window(loopsched_ir::types::WindowType {
        src_type: Box::new(Type::tensor(vec![ixint(8)], false, Type::F32)),
        as_tensor: Box::new(Type::tensor(vec![ixint(4)], false, Type::F32)),
        src_buf: buf.clone(),
        idx: vec![WAccess::Interval {
            lo: ixint(2),
            hi: ixint(6),
            srcinfo: src(),
        }],
    });
    let root = proc(
        "p",
        vec![tensor_arg(&y, vec![ixint(4)], Effect::Out)],
        vec![],
        vec![
            alloc_tensor(&buf, vec![ixint(8)]),
            Stmt::WindowStmt {
                name: win.clone(),
                rhs: Expr::Window {
                    name: buf.clone(),
                    idx: vec![WAccess::Interval {
                        lo: ixint(2),
                        hi: ixint(6),
                        srcinfo: src(),
                    }],
                    ty: win_ty,
                    srcinfo: src(),
                },
                srcinfo: src(),
            },
            assign(&win, vec![cint(0)], cint(5)),
            assign(&y, vec![cint(0)], buf_rd(&win, vec![cint(1)])),
        ],
    );
    let win_c = Cursor::root(&root).child(Field::Body, 1);
    let (ir, _) = inline_window(&win_c).unwrap();

    assert_eq!(ir.body.len(), 3);
    assert_matches!(&ir.body[1], Stmt::Assign { name, idx, .. } => {
        assert_eq!(name, &buf);
        assert_eq!(idx[0].to_string(), "0 + 2");
    });
    assert_matches!(&ir.body[2], Stmt::Assign { rhs, .. } => {
        assert_eq!(rhs.to_string(), "buf[1 + 2]");
    });
}

#[test]
fn config_binding_and_deletion() {
    init_logging();
    let oracle = ConservativeOracle::new();
    let cfg = Rc::new(Config {
        name: "unit".into(),
        fields: vec![("stride".into(), Type::Index)],
    });
    let (n, i, y) = (Sym::fresh("n"), Sym::fresh("i"), Sym::fresh("y"));
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

    let hi_c = Cursor::root(&root).child(Field::Body, 0).child(Field::Hi, 0);
    let (ir, _, keys) = bind_config(&cfg, "stride", &hi_c, &oracle).unwrap();
    assert!(keys.contains(&("unit".to_string(), "stride".to_string())));
    assert_matches!(&ir.body[0], Stmt::WriteConfig { field, rhs, .. } => {
        assert_eq!(field, "stride");
        assert_eq!(rhs.to_string(), "n");
    });
    let (_, _, hi, _) = loop_parts(&ir.body[1]);
    assert_eq!(hi.to_string(), "unit.stride");

    // a free-standing config write with no later read can be inserted and
    // deleted again
    let stmt_c = Cursor::root(&root).child(Field::Body, 0);
    let (ir2, _, _) = config_write(&stmt_c, &cfg, "stride", cint(1), false, &oracle).unwrap();
    let write_c = Cursor::root(&ir2).child(Field::Body, 1);
    let (ir3, _, keys) = delete_config(&write_c, &oracle).unwrap();
    assert!(keys.contains(&("unit".to_string(), "stride".to_string())));
    assert_eq!(ir3.body.len(), 1);
}

#[test]
fn lift_alloc_simple_hoists() {
    let (i, t) = (Sym::fresh("i"), Sym::fresh("t"));
    let root = proc(
        "p",
        vec![],
        vec![],
        vec![seq(
            &i,
            ixint(0),
            ixint(4),
            vec![
                alloc_tensor(&t, vec![ixint(8)]),
                seq(
                    &Sym::fresh("k"),
                    ixint(0),
                    ixint(8),
                    vec![Stmt::Pass { srcinfo: src() }],
                ),
            ],
        )],
    );
    let alloc_c = Cursor::root(&root)
        .child(Field::Body, 0)
        .child(Field::Body, 0);
    let (ir, _) = lift_alloc_simple(&alloc_c, 1).unwrap();
    assert_matches!(&ir.body[0], Stmt::Alloc { .. });
    assert_matches!(&ir.body[1], Stmt::Seq { .. });

    // lifting past a loop the shape depends on is rejected
    let n = Sym::fresh("j");
    let u = Sym::fresh("u");
    let root = proc(
        "p",
        vec![],
        vec![],
        vec![seq(
            &n,
            ixint(1),
            ixint(4),
            vec![alloc_tensor(&u, vec![rd(&n)])],
        )],
    );
    let alloc_c = Cursor::root(&root)
        .child(Field::Body, 0)
        .child(Field::Body, 0);
    assert!(lift_alloc_simple(&alloc_c, 1).is_err());
}

#[test]
fn bound_alloc_and_set_type() {
    let t = Sym::fresh("t");
    let root = proc(
        "p",
        vec![],
        vec![],
        vec![alloc_tensor(&t, vec![ixint(8), ixint(4)])],
    );
    let alloc_c = Cursor::root(&root).child(Field::Body, 0);
    let (ir, _) = bound_alloc(&alloc_c, vec![Some(ixint(16)), None]).unwrap();
    assert_matches!(&ir.body[0], Stmt::Alloc { ty, .. } => {
        assert_eq!(ty.shape()[0].as_const_int(), Some(16));
        assert_eq!(ty.shape()[1].as_const_int(), Some(4));
    });

    let alloc_c = Cursor::root(&ir).child(Field::Body, 0);
    let (ir, _) = set_type_and_mem(&alloc_c, Some(Type::F64), Some(Mem::new("scratch"))).unwrap();
    assert_matches!(&ir.body[0], Stmt::Alloc { ty, mem, .. } => {
        assert_matches!(ty.basetype(), Type::F64);
        assert_eq!(mem.as_ref().unwrap().0.as_ref(), "scratch");
    });
}

#[test]
fn pattern_matching_finds_cursors() {
    let (i, y) = (Sym::fresh("i"), Sym::fresh("y"));
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
                reduce(&y, vec![rd(&i)], cint(1)),
            ],
        )],
    );

    let loops = find(&root, "for i in _: _").unwrap();
    assert_eq!(loops.len(), 1);
    assert_matches!(loops[0].stmt().unwrap(), Stmt::Seq { .. });

    let writes = find(&root, "y[_] = _").unwrap();
    assert_eq!(writes.len(), 1);
    let reduces = find(&root, "y[_] += _").unwrap();
    assert_eq!(reduces.len(), 1);

    // two reads of i, one per write's index
    let i_reads = find(&root, "i").unwrap();
    assert_eq!(i_reads.len(), 2);
    let second = find_one(&root, "i #1").unwrap();
    assert!(matches!(
        second.expr().unwrap(),
        Expr::Read { name, .. } if name == &i
    ));
}
