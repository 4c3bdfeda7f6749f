use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// A source location attached to an IR node.
///
/// Locations are metadata, not identity: `SrcInfo` compares equal to any
/// other `SrcInfo` and hashes to nothing, so the derived `PartialEq` of IR
/// nodes is structural equality modulo location.  Rewrites copy the location
/// of whatever node they were derived from.
#[derive(Clone, Debug)]
pub struct SrcInfo {
    file: Option<Rc<str>>,
    line: u32,
    col: u32,
}

impl SrcInfo {
    pub fn new(file: &str, line: u32, col: u32) -> SrcInfo {
        SrcInfo {
            file: Some(Rc::from(file)),
            line,
            col,
        }
    }

    /// The location used for synthesized nodes with no source counterpart.
    pub fn unknown() -> SrcInfo {
        SrcInfo {
            file: None,
            line: 0,
            col: 0,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.file.is_none()
    }
}

impl PartialEq for SrcInfo {
    fn eq(&self, _other: &SrcInfo) -> bool {
        true
    }
}

impl Eq for SrcInfo {}

impl Hash for SrcInfo {
    fn hash<H: Hasher>(&self, _state: &mut H) {}
}

impl fmt::Display for SrcInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.file {
            Some(ref file) => write!(f, "{}:{}:{}", file, self.line, self.col),
            None => write!(f, "<unknown>"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn locations_do_not_affect_equality() {
        assert_eq!(SrcInfo::new("a.py", 1, 2), SrcInfo::unknown());
    }
}
