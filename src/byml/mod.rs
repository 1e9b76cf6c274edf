//! BYML document reading, writing and YAML conversion.

mod parse;
mod text;
mod writer;

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::hash::{Hash as StdHash, Hasher};

/// String-keyed dictionary node. Iteration order is key-sorted, which makes
/// serialization deterministic.
pub type Hash = BTreeMap<String, Byml>;
/// u32-keyed dictionary node (MK8-family documents).
pub type Hash32 = BTreeMap<u32, Byml>;
/// u64-keyed dictionary node (MK8-family documents).
pub type Hash64 = BTreeMap<u64, Byml>;
/// Array node.
pub type Array = Vec<Byml>;

/// A BYML document node.
///
/// `I64`, `U64`, `F64` and all containers are stored out of line in the
/// binary format; everything else is inlined into the parent's payload word.
#[derive(Debug, Clone)]
pub enum Byml {
    Null,
    String(String),
    Binary(Vec<u8>),
    File { data: Vec<u8>, align: u32 },
    Array(Array),
    Hash(Hash),
    Hash32(Hash32),
    Hash64(Hash64),
    Bool(bool),
    I32(i32),
    F32(f32),
    U32(u32),
    I64(i64),
    U64(u64),
    F64(f64),
}

impl Default for Byml {
    fn default() -> Self {
        Byml::Null
    }
}

// Equality and hashing compare floats bitwise so that nodes can key the
// writer's value-to-offset reuse index.
impl PartialEq for Byml {
    fn eq(&self, other: &Self) -> bool {
        use Byml::*;
        match (self, other) {
            (Null, Null) => true,
            (String(a), String(b)) => a == b,
            (Binary(a), Binary(b)) => a == b,
            (
                File { data: a, align: aa },
                File { data: b, align: ba },
            ) => a == b && aa == ba,
            (Array(a), Array(b)) => a == b,
            (Hash(a), Hash(b)) => a == b,
            (Hash32(a), Hash32(b)) => a == b,
            (Hash64(a), Hash64(b)) => a == b,
            (Bool(a), Bool(b)) => a == b,
            (I32(a), I32(b)) => a == b,
            (F32(a), F32(b)) => a.to_bits() == b.to_bits(),
            (U32(a), U32(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (U64(a), U64(b)) => a == b,
            (F64(a), F64(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Byml {}

impl StdHash for Byml {
    fn hash<H: Hasher>(&self, state: &mut H) {
        use Byml::*;
        std::mem::discriminant(self).hash(state);
        match self {
            Null => {}
            String(s) => s.hash(state),
            Binary(b) => b.hash(state),
            File { data, align } => {
                data.hash(state);
                align.hash(state);
            }
            Array(a) => a.hash(state),
            Hash(h) => h.hash(state),
            Hash32(h) => h.hash(state),
            Hash64(h) => h.hash(state),
            Bool(b) => b.hash(state),
            I32(v) => v.hash(state),
            F32(v) => v.to_bits().hash(state),
            U32(v) => v.hash(state),
            I64(v) => v.hash(state),
            U64(v) => v.hash(state),
            F64(v) => v.to_bits().hash(state),
        }
    }
}

impl Byml {
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Byml::Array(_) | Byml::Hash(_) | Byml::Hash32(_) | Byml::Hash64(_)
        )
    }

    pub fn as_hash(&self) -> Result<&Hash> {
        match self {
            Byml::Hash(h) => Ok(h),
            _ => Err(Error::TypeError("expected a Hash node")),
        }
    }

    pub fn as_array(&self) -> Result<&Array> {
        match self {
            Byml::Array(a) => Ok(a),
            _ => Err(Error::TypeError("expected an Array node")),
        }
    }

    pub fn as_string(&self) -> Result<&str> {
        match self {
            Byml::String(s) => Ok(s),
            _ => Err(Error::TypeError("expected a String node")),
        }
    }

    pub fn as_binary(&self) -> Result<&[u8]> {
        match self {
            Byml::Binary(b) => Ok(b),
            _ => Err(Error::TypeError("expected a Binary node")),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Byml::Bool(b) => Ok(*b),
            _ => Err(Error::TypeError("expected a Bool node")),
        }
    }

    pub fn as_f32(&self) -> Result<f32> {
        match self {
            Byml::F32(v) => Ok(*v),
            _ => Err(Error::TypeError("expected a F32 node")),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Byml::F64(v) => Ok(*v),
            _ => Err(Error::TypeError("expected a F64 node")),
        }
    }

    // These getters mirror the behaviour of the runtime's BYML library:
    // some perform integer conversions automatically.

    pub fn as_i32(&self) -> Result<i32> {
        match self {
            Byml::I32(v) => Ok(*v),
            Byml::U32(v) => Ok(*v as i32),
            _ => Err(Error::TypeError("expected an I32 or U32 node")),
        }
    }

    pub fn as_u32(&self) -> Result<u32> {
        match self {
            Byml::U32(v) => Ok(*v),
            Byml::I32(v) if *v >= 0 => Ok(*v as u32),
            Byml::I32(_) => Err(Error::TypeError("expected a non-negative integer")),
            _ => Err(Error::TypeError("expected an I32 or U32 node")),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Byml::I32(v) => Ok(*v as i64),
            Byml::U32(v) => Ok(*v as i64),
            Byml::I64(v) => Ok(*v),
            _ => Err(Error::TypeError("expected an I32, U32 or I64 node")),
        }
    }

    pub fn as_u64(&self) -> Result<u64> {
        match self {
            Byml::I32(v) if *v >= 0 => Ok(*v as u64),
            Byml::I64(v) if *v >= 0 => Ok(*v as u64),
            Byml::I32(_) | Byml::I64(_) => {
                Err(Error::TypeError("expected a non-negative integer"))
            }
            Byml::U32(v) => Ok(*v as u64),
            Byml::U64(v) => Ok(*v),
            _ => Err(Error::TypeError("expected a U32 or U64 node")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getter_conversions() {
        assert_eq!(Byml::I32(-5).as_i32().unwrap(), -5);
        assert_eq!(Byml::U32(0xFFFF_FFFF).as_i32().unwrap(), -1);
        assert_eq!(Byml::I32(7).as_u32().unwrap(), 7);
        assert!(Byml::I32(-7).as_u32().is_err());
        assert_eq!(Byml::U32(9).as_i64().unwrap(), 9);
        assert_eq!(Byml::I32(4).as_u64().unwrap(), 4);
        assert!(Byml::I64(-1).as_u64().is_err());
        assert!(Byml::F32(1.0).as_i32().is_err());
        assert!(Byml::Null.as_hash().is_err());
    }

    #[test]
    fn float_equality_is_bitwise() {
        assert_eq!(Byml::F32(1.5), Byml::F32(1.5));
        assert_ne!(Byml::F32(0.0), Byml::F32(-0.0));
        assert_eq!(Byml::F64(f64::NAN), Byml::F64(f64::NAN));
    }
}
