//! AAMP parameter archive reading, writing and YAML conversion.

mod names;
mod parse;
mod text;
mod writer;

pub use names::NameTable;

use crate::types::{Color4f, Curve, FixedSafeString, Quatf, Vector2f, Vector3f, Vector4f};
use crate::{Error, Result};
use indexmap::IndexMap;

/// Parameter structure name: a wrapper around a CRC32 hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(pub u32);

impl Name {
    /// Hashes a name string. The polynomial is the standard 0xEDB88320.
    pub fn from_str(name: &str) -> Name {
        Name(crc32fast::hash(name.as_bytes()))
    }
}

impl From<&str> for Name {
    fn from(name: &str) -> Name {
        Name::from_str(name)
    }
}

impl From<u32> for Name {
    fn from(hash: u32) -> Name {
        Name(hash)
    }
}

/// CRC32 of `param_root`, the name of every archive's root list.
pub const ROOT_KEY: Name = Name(0xA4F6_CB6C);

pub(crate) const DEMO_AI_ACTION_IDX: Name = Name(0xB994_C459);

/// A parameter value.
///
/// The name is not stored in the parameter itself; parameters live in
/// name-keyed maps.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    Bool(bool),
    F32(f32),
    Int(i32),
    Vec2(Vector2f),
    Vec3(Vector3f),
    Vec4(Vector4f),
    Color(Color4f),
    String32(FixedSafeString<32>),
    String64(FixedSafeString<64>),
    Curve1([Curve; 1]),
    Curve2([Curve; 2]),
    Curve3([Curve; 3]),
    Curve4([Curve; 4]),
    BufferInt(Vec<i32>),
    BufferF32(Vec<f32>),
    String256(FixedSafeString<256>),
    Quat(Quatf),
    U32(u32),
    BufferU32(Vec<u32>),
    BufferBinary(Vec<u8>),
    StringRef(String),
}

impl Parameter {
    pub(crate) fn type_byte(&self) -> u8 {
        match self {
            Parameter::Bool(_) => 0,
            Parameter::F32(_) => 1,
            Parameter::Int(_) => 2,
            Parameter::Vec2(_) => 3,
            Parameter::Vec3(_) => 4,
            Parameter::Vec4(_) => 5,
            Parameter::Color(_) => 6,
            Parameter::String32(_) => 7,
            Parameter::String64(_) => 8,
            Parameter::Curve1(_) => 9,
            Parameter::Curve2(_) => 10,
            Parameter::Curve3(_) => 11,
            Parameter::Curve4(_) => 12,
            Parameter::BufferInt(_) => 13,
            Parameter::BufferF32(_) => 14,
            Parameter::String256(_) => 15,
            Parameter::Quat(_) => 16,
            Parameter::U32(_) => 17,
            Parameter::BufferU32(_) => 18,
            Parameter::BufferBinary(_) => 19,
            Parameter::StringRef(_) => 20,
        }
    }

    pub fn is_string_type(&self) -> bool {
        matches!(
            self,
            Parameter::String32(_)
                | Parameter::String64(_)
                | Parameter::String256(_)
                | Parameter::StringRef(_)
        )
    }

    pub fn is_buffer_type(&self) -> bool {
        matches!(
            self,
            Parameter::BufferInt(_)
                | Parameter::BufferF32(_)
                | Parameter::BufferU32(_)
                | Parameter::BufferBinary(_)
        )
    }

    /// The string value of any string-typed parameter.
    pub fn as_str(&self) -> Result<&str> {
        match self {
            Parameter::String32(s) => Ok(s.as_str()),
            Parameter::String64(s) => Ok(s.as_str()),
            Parameter::String256(s) => Ok(s.as_str()),
            Parameter::StringRef(s) => Ok(s),
            _ => Err(Error::TypeError("expected a string parameter")),
        }
    }
}

pub type ParameterMap = IndexMap<Name, Parameter>;
pub type ParameterObjectMap = IndexMap<Name, ParameterObject>;
pub type ParameterListMap = IndexMap<Name, ParameterList>;

/// Parameter object: an ordered dictionary of parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterObject {
    pub params: ParameterMap,
}

/// Parameter list: ordered dictionaries of child objects and child lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterList {
    pub objects: ParameterObjectMap,
    pub lists: ParameterListMap,
}

/// Parameter IO: the root parameter list with its data version and type,
/// the only structure a binary parameter archive can hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterIO {
    /// Data version (not the AAMP format version). Typically 0.
    pub version: u32,
    /// Data type identifier. Typically "xml".
    pub data_type: String,
    pub param_root: ParameterList,
}

impl ParameterIO {
    pub fn new(version: u32, data_type: impl Into<String>) -> Self {
        ParameterIO {
            version,
            data_type: data_type.into(),
            param_root: ParameterList::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_vectors() {
        assert_eq!(Name::from_str("param_root"), ROOT_KEY);
        assert_eq!(Name::from_str("DemoAIActionIdx"), DEMO_AI_ACTION_IDX);
        assert_eq!(Name::from_str("Bone"), Name(0x9574_1049));
        assert_eq!(Name::from_str("Bone_03"), Name(0x9AD6_F6D4));
    }

    #[test]
    fn string_parameter_views() {
        assert_eq!(
            Parameter::String32("abc".into()).as_str().unwrap(),
            "abc"
        );
        assert_eq!(
            Parameter::StringRef("text".into()).as_str().unwrap(),
            "text"
        );
        assert!(Parameter::Int(1).as_str().is_err());
        assert!(Parameter::BufferInt(vec![1]).is_buffer_type());
        assert!(!Parameter::Bool(true).is_buffer_type());
    }
}
