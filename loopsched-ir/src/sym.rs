use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

/// Allocator for symbol ids.  Monotonic across the whole process so that a
/// symbol id is never reused, even across independent procedures.
static NEXT_SYM_ID: AtomicU32 = AtomicU32::new(1);

/// A globally unique identifier carrying a human-readable name.
///
/// Equality, hashing, and ordering are by id only; two symbols spelled the
/// same are still distinct binders.  Every binder in the IR (procedure
/// argument, allocation, loop iterator, window binding) owns one `Sym`, and
/// readers refer to it by the same `Sym` value.
#[derive(Clone)]
pub struct Sym {
    name: Rc<str>,
    id: u32,
}

impl Sym {
    /// Allocate a fresh symbol with the given name.
    pub fn fresh(name: &str) -> Sym {
        Sym {
            name: Rc::from(name),
            id: NEXT_SYM_ID.fetch_add(1, AtomicOrdering::Relaxed),
        }
    }

    /// Allocate a fresh symbol with the same name as `self` but a new id.
    /// Used by alpha-renaming and by directives that duplicate a binder.
    pub fn copy(&self) -> Sym {
        Sym {
            name: self.name.clone(),
            id: NEXT_SYM_ID.fetch_add(1, AtomicOrdering::Relaxed),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}

impl PartialEq for Sym {
    fn eq(&self, other: &Sym) -> bool {
        self.id == other.id
    }
}

impl Eq for Sym {}

impl PartialOrd for Sym {
    fn partial_cmp(&self, other: &Sym) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Sym {
    fn cmp(&self, other: &Sym) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Hash for Sym {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Sym {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl fmt::Debug for Sym {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}${}", self.name, self.id)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fresh_syms_are_distinct() {
        let a = Sym::fresh("x");
        let b = Sym::fresh("x");
        assert_ne!(a, b);
        assert_eq!(a.name(), b.name());
    }

    #[test]
    fn copy_preserves_name_not_identity() {
        let a = Sym::fresh("i");
        let b = a.copy();
        assert_ne!(a, b);
        assert_eq!(b.name(), "i");
        assert!(a.id() < b.id());
    }
}
