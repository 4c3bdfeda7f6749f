//! Interval range analysis over indexable expressions.
//!
//! Given an environment mapping each in-scope symbol to an optional interval,
//! computes a (possibly half-open) interval for an expression, or *unknown*.
//! Used to prove `%`-narrowing and `/`-elision in the normalizer and the
//! positivity and bounds obligations in the conservative oracle.

use rustc_hash::FxHashMap;

use loopsched_ir::ir::{BinOp, Expr, Lit};
use loopsched_ir::Sym;

/// A conservative integer interval; `None` endpoints are unbounded.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Interval {
    pub lo: Option<i64>,
    pub hi: Option<i64>,
}

impl Interval {
    pub fn exact(v: i64) -> Interval {
        Interval {
            lo: Some(v),
            hi: Some(v),
        }
    }

    pub fn new(lo: i64, hi: i64) -> Interval {
        Interval {
            lo: Some(lo),
            hi: Some(hi),
        }
    }

    pub fn unknown() -> Interval {
        Interval { lo: None, hi: None }
    }

    pub fn at_least(v: i64) -> Interval {
        Interval {
            lo: Some(v),
            hi: None,
        }
    }

    /// Both endpoints known.
    pub fn bounded(&self) -> Option<(i64, i64)> {
        Some((self.lo?, self.hi?))
    }
}

/// Per-symbol interval bounds; a missing or `None` entry means unknown.
pub type RangeEnv = FxHashMap<Sym, Option<Interval>>;

fn add_bound(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    a?.checked_add(b?)
}

fn sub_bound(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    a?.checked_sub(b?)
}

/// Evaluate an interval for `e` under `env`, conservatively.
pub fn range_of(e: &Expr, env: &RangeEnv) -> Interval {
    match e {
        Expr::Const {
            val: Lit::Int(v), ..
        } => Interval::exact(*v),
        Expr::Read { name, idx, .. } if idx.is_empty() => match env.get(name) {
            Some(Some(iv)) => *iv,
            _ => Interval::unknown(),
        },
        Expr::USub { arg, .. } => {
            let r = range_of(arg, env);
            Interval {
                lo: r.hi.and_then(|v| v.checked_neg()),
                hi: r.lo.and_then(|v| v.checked_neg()),
            }
        }
        Expr::BinOp { op, lhs, rhs, .. } => {
            let l = range_of(lhs, env);
            let r = range_of(rhs, env);
            match op {
                BinOp::Add => Interval {
                    lo: add_bound(l.lo, r.lo),
                    hi: add_bound(l.hi, r.hi),
                },
                BinOp::Sub => Interval {
                    lo: sub_bound(l.lo, r.hi),
                    hi: sub_bound(l.hi, r.lo),
                },
                BinOp::Mul => mul_range(l, r),
                BinOp::Div => match rhs.as_const_int() {
                    Some(d) if d > 0 => Interval {
                        // conservative only for non-negative dividends
                        lo: l.lo.map(|v| if v >= 0 { v / d } else { i64::MIN }),
                        hi: l.hi.map(|v| if v >= 0 { v / d } else { v }),
                    },
                    _ => Interval::unknown(),
                },
                BinOp::Mod => match rhs.as_const_int() {
                    Some(d) if d > 0 => {
                        if let Some((lo, hi)) = l.bounded() {
                            if lo >= 0 && hi < d {
                                return Interval::new(lo, hi);
                            }
                        }
                        Interval::new(0, d - 1)
                    }
                    _ => Interval::unknown(),
                },
                _ => Interval::unknown(),
            }
        }
        _ => Interval::unknown(),
    }
}

fn mul_range(l: Interval, r: Interval) -> Interval {
    let (llo, lhi) = match l.bounded() {
        Some(b) => b,
        None => return Interval::unknown(),
    };
    let (rlo, rhi) = match r.bounded() {
        Some(b) => b,
        None => return Interval::unknown(),
    };
    let mut candidates = [
        llo.checked_mul(rlo),
        llo.checked_mul(rhi),
        lhi.checked_mul(rlo),
        lhi.checked_mul(rhi),
    ];
    candidates.sort();
    match (candidates[0], candidates[3]) {
        (Some(lo), Some(hi)) if candidates.iter().all(|c| c.is_some()) => Interval::new(lo, hi),
        _ => Interval::unknown(),
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

    #[test]
    fn loop_iter_modulo_narrows() {
        let i = Sym::fresh("i");
        let mut env = RangeEnv::default();
        env.insert(i.clone(), Some(Interval::new(0, 3)));
        let e = Expr::binop(
            BinOp::Mod,
            Expr::read(&i, Type::Index, &src()),
            Expr::int(8, Type::Int, &src()),
            Type::Index,
            &src(),
        );
        assert_eq!(range_of(&e, &env), Interval::new(0, 3));
    }

    #[test]
    fn unknown_symbol_is_unbounded() {
        let n = Sym::fresh("n");
        let env = RangeEnv::default();
        let e = Expr::read(&n, Type::Size, &src());
        assert_eq!(range_of(&e, &env), Interval::unknown());
    }

    #[test]
    fn affine_combination() {
        let i = Sym::fresh("i");
        let mut env = RangeEnv::default();
        env.insert(i.clone(), Some(Interval::new(0, 7)));
        // 4*i + 3 in [3, 31]
        let e = Expr::binop(
            BinOp::Add,
            Expr::binop(
                BinOp::Mul,
                Expr::int(4, Type::Int, &src()),
                Expr::read(&i, Type::Index, &src()),
                Type::Index,
                &src(),
            ),
            Expr::int(3, Type::Int, &src()),
            Type::Index,
            &src(),
        );
        assert_eq!(range_of(&e, &env), Interval::new(3, 31));
    }
}
