//! The textual pattern language of the authoring interface.
//!
//! Users name program points with two conventions: `name` or `name #k`
//! picks the k-th occurrence of an identifier (counting from zero), and a
//! skeletal statement pattern such as `for x in _: _` or `name[_] = _`
//! matches statements, with `_` matching anything.  The matcher returns
//! cursors into the procedure; directives consume those cursors.
//!
//! Supported forms:
//!
//! | pattern            | matches                                   |
//! |--------------------|-------------------------------------------|
//! | `x`                | reads of the identifier `x`               |
//! | `for x in _: _`    | loops with iterator named `x` (`_` = any) |
//! | `x[_] = _`, `x = _`| assignments to `x` (`_` = any target)     |
//! | `x[_] += _`        | reductions to `x` (`_` = any target)      |
//! | `if _: _`          | conditionals                              |
//! | `stride(x, _)`     | stride queries of `x`                     |
//!
//! Any form may carry a trailing `#k`.

use std::rc::Rc;

use regex::Regex;

use loopsched_ir::ir::{Expr, Proc, Stmt};

use crate::cursor::{for_each_node, Cursor, NodeRef, Path};
use crate::error::{Result, SchedulingError};

#[derive(Clone, Debug, PartialEq)]
enum Pattern {
    ReadOf(String),
    Loop(Option<String>),
    AssignTo(Option<String>),
    ReduceTo(Option<String>),
    AnyIf,
    StrideOf(String),
}

fn parse(pattern: &str) -> Result<(Pattern, Option<usize>)> {
    let text = pattern.trim();
    // split a trailing "#k"
    let with_count = Regex::new(r"^(.*?)\s*#\s*([0-9]+)$").unwrap();
    let (base, count) = match with_count.captures(text) {
        Some(caps) => (
            caps.get(1).unwrap().as_str().trim().to_string(),
            Some(caps[2].parse::<usize>().unwrap()),
        ),
        None => (text.to_string(), None),
    };

    let ident = r"([a-zA-Z_]\w*|_)";
    let grab = |name: &str| {
        if name == "_" {
            None
        } else {
            Some(name.to_string())
        }
    };

    let loop_re = Regex::new(&format!(r"^for\s+{ident}\s+in\s+_\s*:\s*_$")).unwrap();
    if let Some(caps) = loop_re.captures(&base) {
        return Ok((Pattern::Loop(grab(&caps[1])), count));
    }

    let assign_re = Regex::new(&format!(r"^{ident}\s*(\[\s*_\s*\])?\s*=\s*_$")).unwrap();
    if let Some(caps) = assign_re.captures(&base) {
        return Ok((Pattern::AssignTo(grab(&caps[1])), count));
    }

    let reduce_re = Regex::new(&format!(r"^{ident}\s*(\[\s*_\s*\])?\s*\+=\s*_$")).unwrap();
    if let Some(caps) = reduce_re.captures(&base) {
        return Ok((Pattern::ReduceTo(grab(&caps[1])), count));
    }

    if Regex::new(r"^if\s+_\s*:\s*_$").unwrap().is_match(&base) {
        return Ok((Pattern::AnyIf, count));
    }

    let stride_re = Regex::new(&format!(r"^stride\s*\(\s*{ident}\s*,\s*_\s*\)$")).unwrap();
    if let Some(caps) = stride_re.captures(&base) {
        match grab(&caps[1]) {
            Some(name) => return Ok((Pattern::StrideOf(name), count)),
            None => {
                return Err(SchedulingError::misc(
                    "stride pattern requires a buffer name",
                )
                .into())
            }
        }
    }

    let ident_re = Regex::new(r"^[a-zA-Z_]\w*$").unwrap();
    if ident_re.is_match(&base) && base != "_" {
        return Ok((Pattern::ReadOf(base), count));
    }

    Err(SchedulingError::misc(format!(
        "could not parse pattern {:?}; expected an identifier, `name #k`, \
         `for x in _: _`, `x[_] = _`, `x[_] += _`, `if _: _`, or `stride(x, _)`",
        pattern
    ))
    .into())
}

fn matches(pat: &Pattern, node: NodeRef) -> bool {
    match (pat, node) {
        (Pattern::ReadOf(name), NodeRef::Expr(Expr::Read { name: sym, .. })) => {
            sym.name() == name
        }
        (Pattern::Loop(name), NodeRef::Stmt(Stmt::Seq { iter, .. })) => match name {
            Some(n) => iter.name() == n,
            None => true,
        },
        (Pattern::AssignTo(name), NodeRef::Stmt(Stmt::Assign { name: sym, .. })) => match name {
            Some(n) => sym.name() == n,
            None => true,
        },
        (Pattern::ReduceTo(name), NodeRef::Stmt(Stmt::Reduce { name: sym, .. })) => match name {
            Some(n) => sym.name() == n,
            None => true,
        },
        (Pattern::AnyIf, NodeRef::Stmt(Stmt::If { .. })) => true,
        (Pattern::StrideOf(name), NodeRef::Expr(Expr::Stride { name: sym, .. })) => {
            sym.name() == name
        }
        _ => false,
    }
}

/// All matches of `pattern` in the subtree under `scope`, in pre-order.
pub fn match_pattern(scope: &Cursor, pattern: &str) -> Result<Vec<Cursor>> {
    let (pat, count) = parse(pattern)?;
    let mut found: Vec<Cursor> = Vec::new();
    let start: Path = scope.path().iter().copied().collect();
    for_each_node(scope.proc(), &start, &mut |path, node| {
        if matches(&pat, node) {
            found.push(Cursor::from_path(scope.proc(), path.clone()));
        }
    });
    match count {
        None => Ok(found),
        Some(k) => {
            if k < found.len() {
                Ok(vec![found.swap_remove(k)])
            } else {
                Err(SchedulingError::misc(format!(
                    "pattern {:?} has only {} matches",
                    pattern,
                    found.len()
                ))
                .into())
            }
        }
    }
}

/// All matches of `pattern` anywhere in the procedure.
pub fn find(root: &Rc<Proc>, pattern: &str) -> Result<Vec<Cursor>> {
    match_pattern(&Cursor::root(root), pattern)
}

/// The unique match of `pattern`; errors when there are none or several.
pub fn find_one(root: &Rc<Proc>, pattern: &str) -> Result<Cursor> {
    let mut found = find(root, pattern)?;
    match found.len() {
        1 => Ok(found.pop().unwrap()),
        0 => Err(SchedulingError::misc(format!("no match for pattern {:?}", pattern)).into()),
        n => Err(SchedulingError::misc(format!(
            "pattern {:?} is ambiguous ({} matches); disambiguate with `#k`",
            pattern, n
        ))
        .into()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_forms() {
        assert_eq!(parse("i").unwrap().0, Pattern::ReadOf("i".into()));
        assert_eq!(parse("i #2").unwrap(), (Pattern::ReadOf("i".into()), Some(2)));
        assert_eq!(
            parse("for i in _: _").unwrap().0,
            Pattern::Loop(Some("i".into()))
        );
        assert_eq!(parse("for _ in _: _").unwrap().0, Pattern::Loop(None));
        assert_eq!(
            parse("x[_] = _").unwrap().0,
            Pattern::AssignTo(Some("x".into()))
        );
        assert_eq!(parse("_ = _").unwrap().0, Pattern::AssignTo(None));
        assert_eq!(
            parse("acc[_] += _ #0").unwrap(),
            (Pattern::ReduceTo(Some("acc".into())), Some(0))
        );
        assert_eq!(parse("if _: _").unwrap().0, Pattern::AnyIf);
        assert_eq!(
            parse("stride(a, _)").unwrap().0,
            Pattern::StrideOf("a".into())
        );
        assert!(parse("for in:").is_err());
    }
}
