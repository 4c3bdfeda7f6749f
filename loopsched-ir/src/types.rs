use crate::ir::{Expr, WAccess};
use crate::sym::Sym;

/// The type attached to every expression and declaration.
///
/// Scalars are numeric reals of a declared precision, control-typed integers
/// (`Int`/`Index`/`Size`/`Stride`), or booleans.  `Tensor` is a
/// multi-dimensional buffer whose extents are themselves (indexable)
/// expressions; its element type is always scalar.  `Window` is a subregion
/// view of a buffer, carrying the viewed buffer's type, the tensor type the
/// window behaves as, the source buffer symbol, and the per-dimension access
/// list (whose length always equals the source rank).
#[derive(Clone, PartialEq, Debug)]
pub enum Type {
    /// Real scalar of unspecified precision; the default type of staged
    /// scalar temporaries.
    R,
    F16,
    F32,
    F64,
    I8,
    I32,
    Bool,
    Int,
    Index,
    Size,
    Stride,
    Tensor(TensorType),
    Window(WindowType),
}

#[derive(Clone, PartialEq, Debug)]
pub struct TensorType {
    pub shape: Vec<Expr>,
    pub is_window: bool,
    pub elem: Box<Type>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct WindowType {
    /// Type of the buffer being windowed.
    pub src_type: Box<Type>,
    /// The tensor type this window behaves as.
    pub as_tensor: Box<Type>,
    /// The buffer the window views.
    pub src_buf: Sym,
    /// Per-dimension accesses; length equals the source buffer's rank.
    pub idx: Vec<WAccess>,
}

impl Type {
    pub fn tensor(shape: Vec<Expr>, is_window: bool, elem: Type) -> Type {
        debug_assert!(elem.is_real_scalar(), "tensor element must be scalar");
        Type::Tensor(TensorType {
            shape,
            is_window,
            elem: Box::new(elem),
        })
    }

    pub fn is_real_scalar(&self) -> bool {
        matches!(self, Type::R | Type::F16 | Type::F32 | Type::F64 | Type::I8 | Type::I32)
    }

    /// Types whose values may appear in indexing positions.
    pub fn is_indexable(&self) -> bool {
        matches!(self, Type::Int | Type::Index | Type::Size)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Type::Bool)
    }

    /// Real scalars and buffers of them; the types a data access may have.
    pub fn is_numeric(&self) -> bool {
        self.is_real_scalar() || matches!(self, Type::Tensor(_) | Type::Window(_))
    }

    pub fn is_tensor_or_window(&self) -> bool {
        matches!(self, Type::Tensor(_) | Type::Window(_))
    }

    /// The scalar type underlying this type: itself for scalars, the element
    /// type for tensors and windows.
    pub fn basetype(&self) -> &Type {
        match self {
            Type::Tensor(t) => t.elem.basetype(),
            Type::Window(w) => w.as_tensor.basetype(),
            other => other,
        }
    }

    /// The extents of this type; empty for scalars.  Windows report the
    /// shape of the tensor they behave as.
    pub fn shape(&self) -> &[Expr] {
        match self {
            Type::Tensor(t) => &t.shape,
            Type::Window(w) => w.as_tensor.shape(),
            _ => &[],
        }
    }

    /// Number of dimensions; zero for scalars.
    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    /// For windows, the tensor type the window behaves as; identity
    /// otherwise.
    pub fn as_tensor(&self) -> &Type {
        match self {
            Type::Window(w) => &w.as_tensor,
            other => other,
        }
    }
}
