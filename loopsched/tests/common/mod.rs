//! Builders shared by the scheduling scenario tests.
#![allow(dead_code)]

use std::rc::Rc;

use loopsched_ir::ir::{BinOp, Effect, Expr, FnArg, Proc, Stmt};
use loopsched_ir::types::Type;
use loopsched_ir::{SrcInfo, Sym};

pub fn src() -> SrcInfo {
    SrcInfo::unknown()
}

pub fn rd(s: &Sym) -> Expr {
    Expr::read(s, Type::Index, &src())
}

pub fn size_rd(s: &Sym) -> Expr {
    Expr::read(s, Type::Size, &src())
}

pub fn cint(v: i64) -> Expr {
    Expr::int(v, Type::Int, &src())
}

pub fn ixint(v: i64) -> Expr {
    Expr::int(v, Type::Index, &src())
}

pub fn op(o: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    let ty = lhs.ty().clone();
    Expr::binop(o, lhs, rhs, ty, &src())
}

pub fn buf_rd(buf: &Sym, idx: Vec<Expr>) -> Expr {
    Expr::Read {
        name: buf.clone(),
        idx,
        ty: Type::F32,
        srcinfo: src(),
    }
}

pub fn assign(buf: &Sym, idx: Vec<Expr>, rhs: Expr) -> Stmt {
    Stmt::Assign {
        name: buf.clone(),
        ty: Type::F32,
        idx,
        rhs,
        srcinfo: src(),
    }
}

pub fn reduce(buf: &Sym, idx: Vec<Expr>, rhs: Expr) -> Stmt {
    Stmt::Reduce {
        name: buf.clone(),
        ty: Type::F32,
        idx,
        rhs,
        srcinfo: src(),
    }
}

pub fn seq(iter: &Sym, lo: Expr, hi: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::Seq {
        iter: iter.clone(),
        lo,
        hi,
        body,
        srcinfo: src(),
    }
}

pub fn alloc_scalar(name: &Sym) -> Stmt {
    Stmt::Alloc {
        name: name.clone(),
        ty: Type::R,
        mem: None,
        srcinfo: src(),
    }
}

pub fn alloc_tensor(name: &Sym, shape: Vec<Expr>) -> Stmt {
    Stmt::Alloc {
        name: name.clone(),
        ty: Type::tensor(shape, false, Type::F32),
        mem: None,
        srcinfo: src(),
    }
}

pub fn tensor_arg(name: &Sym, shape: Vec<Expr>, effect: Effect) -> FnArg {
    FnArg {
        name: name.clone(),
        ty: Type::tensor(shape, false, Type::F32),
        mem: None,
        effect: Some(effect),
        srcinfo: src(),
    }
}

pub fn size_arg(name: &Sym) -> FnArg {
    FnArg {
        name: name.clone(),
        ty: Type::Size,
        mem: None,
        effect: None,
        srcinfo: src(),
    }
}

pub fn proc(name: &str, args: Vec<FnArg>, preds: Vec<Expr>, body: Vec<Stmt>) -> Rc<Proc> {
    Rc::new(Proc {
        name: name.into(),
        args,
        preds,
        body,
        instr: None,
        srcinfo: src(),
    })
}

/// Destructure `for _ in seq(_, _): body`.
pub fn loop_body(s: &Stmt) -> &[Stmt] {
    match s {
        Stmt::Seq { body, .. } => body,
        other => panic!("expected a loop, got {}", other),
    }
}

pub fn loop_parts(s: &Stmt) -> (&Sym, &Expr, &Expr, &[Stmt]) {
    match s {
        Stmt::Seq { iter, lo, hi, body, .. } => (iter, lo, hi, body),
        other => panic!("expected a loop, got {}", other),
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
