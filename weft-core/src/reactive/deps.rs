//! Dependency Lists
//!
//! Memo, callback and effect cells are keyed by an ordered list of
//! dependencies. Two lists are equal when every position compares equal:
//!
//! - primitives and strings compare by value
//! - `Rc` values, callbacks and refs compare by identity (pointer equality)
//!
//! Floats compare by bit pattern, so `NaN` equals itself and `0.0` differs
//! from `-0.0`.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

/// One positional dependency.
#[derive(Clone)]
pub enum Dep {
    /// An absent optional value.
    None,
    Unit,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(u64),
    Char(char),
    Str(Rc<str>),
    /// Compared with `Rc::ptr_eq`. Holding the `Rc` keeps the address from
    /// being reused while the list is cached.
    Identity(Rc<dyn Any>),
}

/// An ordered dependency list.
pub type DepList = SmallVec<[Dep; 4]>;

impl Dep {
    /// Identity dependency on a shared value.
    pub fn identity<T: 'static>(value: &Rc<T>) -> Self {
        Self::Identity(value.clone())
    }
}

impl PartialEq for Dep {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) | (Self::Unit, Self::Unit) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Identity(a), Self::Identity(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Unit => f.write_str("()"),
            Self::Bool(v) => write!(f, "{v:?}"),
            Self::Int(v) => write!(f, "{v:?}"),
            Self::UInt(v) => write!(f, "{v:?}u"),
            Self::Float(bits) => write!(f, "{:?}", f64::from_bits(*bits)),
            Self::Char(v) => write!(f, "{v:?}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Identity(rc) => write!(f, "Identity({:p})", Rc::as_ptr(rc)),
        }
    }
}

macro_rules! dep_from_signed {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Dep {
            fn from(value: $ty) -> Self {
                Self::Int(value as i64)
            }
        })*
    };
}

macro_rules! dep_from_unsigned {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Dep {
            fn from(value: $ty) -> Self {
                Self::UInt(value as u64)
            }
        })*
    };
}

dep_from_signed!(i8, i16, i32, i64, isize);
dep_from_unsigned!(u8, u16, u32, u64, usize);

impl From<()> for Dep {
    fn from(_: ()) -> Self {
        Self::Unit
    }
}

impl From<bool> for Dep {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f32> for Dep {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value).to_bits())
    }
}

impl From<f64> for Dep {
    fn from(value: f64) -> Self {
        Self::Float(value.to_bits())
    }
}

impl From<char> for Dep {
    fn from(value: char) -> Self {
        Self::Char(value)
    }
}

impl From<&str> for Dep {
    fn from(value: &str) -> Self {
        Self::Str(Rc::from(value))
    }
}

impl From<String> for Dep {
    fn from(value: String) -> Self {
        Self::Str(Rc::from(value))
    }
}

impl From<&String> for Dep {
    fn from(value: &String) -> Self {
        Self::Str(Rc::from(value.as_str()))
    }
}

impl<T: 'static> From<&Rc<T>> for Dep {
    fn from(value: &Rc<T>) -> Self {
        Self::identity(value)
    }
}

impl<T: Into<Dep> + Clone> From<&Option<T>> for Dep {
    fn from(value: &Option<T>) -> Self {
        match value {
            Some(v) => v.clone().into(),
            None => Self::None,
        }
    }
}

/// Build a [`DepList`] from a comma separated list of expressions.
///
/// ```rust,ignore
/// let doubled = scope.use_memo(deps![count], move || count * 2);
/// ```
#[macro_export]
macro_rules! deps {
    () => {
        $crate::reactive::DepList::new()
    };
    ($($dep:expr),+ $(,)?) => {{
        let mut list = $crate::reactive::DepList::new();
        $( list.push($crate::reactive::Dep::from($dep)); )+
        list
    }};
}

/// Outcome of comparing a new dependency list against the cached one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepsChange {
    /// No previous list: first evaluation.
    Initial,
    Unchanged,
    Changed,
    /// Lengths differ. Positional identity is broken.
    LengthChanged { previous: usize, current: usize },
}

impl DepsChange {
    /// Whether the guarded computation has to run.
    pub fn needs_run(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Shallow positional comparison.
pub fn compare(previous: Option<&[Dep]>, current: &[Dep]) -> DepsChange {
    let Some(previous) = previous else {
        return DepsChange::Initial;
    };

    if previous.len() != current.len() {
        return DepsChange::LengthChanged {
            previous: previous.len(),
            current: current.len(),
        };
    }

    if previous.iter().zip(current).all(|(a, b)| a == b) {
        DepsChange::Unchanged
    } else {
        DepsChange::Changed
    }
}
