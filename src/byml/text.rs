use super::{Byml, Hash, Hash32, Hash64};
use crate::yaml::{
    emit_document, format_double, format_float, get_map_entry, is_binary_tag, scalar_i64,
    scalar_u64, untag, Scalar, YamlNode,
};
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_yaml::Value;

fn is_simple(node: &Byml) -> bool {
    !matches!(
        node,
        Byml::Array(_) | Byml::Hash(_) | Byml::Hash32(_) | Byml::Hash64(_)
    )
}

/// Small containers of scalars are emitted in flow style.
fn use_inline_style(node: &Byml) -> bool {
    match node {
        Byml::Array(items) => items.len() <= 10 && items.iter().all(is_simple),
        Byml::Hash(entries) => entries.len() <= 10 && entries.values().all(is_simple),
        Byml::Hash32(entries) => entries.len() <= 10 && entries.values().all(is_simple),
        Byml::Hash64(entries) => entries.len() <= 10 && entries.values().all(is_simple),
        _ => false,
    }
}

fn to_yaml_node(node: &Byml) -> YamlNode {
    match node {
        Byml::Null => YamlNode::Scalar(Scalar::plain("null")),
        Byml::String(s) => YamlNode::Scalar(Scalar::string(s.clone())),
        Byml::Binary(data) => YamlNode::Scalar(Scalar::tagged("!!binary", BASE64.encode(data))),
        Byml::File { data, align } => YamlNode::map(
            Some("!file"),
            false,
            vec![
                (
                    Scalar::string("Alignment"),
                    YamlNode::Scalar(Scalar::tagged("!u", format!("0x{:08x}", align))),
                ),
                (
                    Scalar::string("Data"),
                    YamlNode::Scalar(Scalar::tagged("!!binary", BASE64.encode(data))),
                ),
            ],
        ),
        Byml::Array(items) => YamlNode::seq(
            None,
            use_inline_style(node),
            items.iter().map(to_yaml_node).collect(),
        ),
        Byml::Hash(entries) => YamlNode::map(
            None,
            use_inline_style(node),
            entries
                .iter()
                .map(|(k, v)| (Scalar::string(k.clone()), to_yaml_node(v)))
                .collect(),
        ),
        Byml::Hash32(entries) => YamlNode::map(
            Some("!h32"),
            use_inline_style(node),
            entries
                .iter()
                .map(|(k, v)| (Scalar::string(format!("0x{:08x}", k)), to_yaml_node(v)))
                .collect(),
        ),
        Byml::Hash64(entries) => YamlNode::map(
            Some("!h64"),
            use_inline_style(node),
            entries
                .iter()
                .map(|(k, v)| (Scalar::string(format!("0x{:016x}", k)), to_yaml_node(v)))
                .collect(),
        ),
        Byml::Bool(b) => YamlNode::Scalar(Scalar::plain(if *b { "true" } else { "false" })),
        Byml::I32(v) => YamlNode::Scalar(Scalar::plain(v.to_string())),
        Byml::F32(v) => YamlNode::Scalar(Scalar::plain(format_float(*v))),
        Byml::U32(v) => YamlNode::Scalar(Scalar::tagged("!u", format!("0x{:08x}", v))),
        Byml::I64(v) => YamlNode::Scalar(Scalar::tagged("!l", v.to_string())),
        Byml::U64(v) => YamlNode::Scalar(Scalar::tagged("!ul", v.to_string())),
        Byml::F64(v) => YamlNode::Scalar(Scalar::tagged("!f64", format_double(*v))),
    }
}

fn parse_hex_key(value: &Value) -> Result<u64> {
    match value {
        Value::String(s) => {
            let digits = s
                .strip_prefix("0x")
                .or_else(|| s.strip_prefix("0X"))
                .unwrap_or(s);
            u64::from_str_radix(digits, 16)
                .map_err(|_| Error::invalid("invalid hexadecimal hash key"))
        }
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| Error::invalid("invalid numeric hash key")),
        _ => Err(Error::invalid("unexpected hash key type")),
    }
}

fn string_key(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(Error::invalid("unexpected hash key type")),
    }
}

fn decode_binary(value: &Value) -> Result<Vec<u8>> {
    let text = match value {
        Value::String(s) => s.as_str(),
        _ => return Err(Error::invalid("binary node must be a base64 string")),
    };
    BASE64
        .decode(text)
        .map_err(|_| Error::invalid("invalid base64-encoded data"))
}

fn from_yaml_value(value: &Value) -> Result<Byml> {
    let (tag, inner) = untag(value);
    if let Some(tag) = tag.as_deref() {
        return from_tagged(tag, inner);
    }
    match inner {
        Value::Null => Ok(Byml::Null),
        Value::Bool(b) => Ok(Byml::Bool(*b)),
        Value::Number(n) => {
            if n.is_f64() {
                Ok(Byml::F32(n.as_f64().unwrap() as f32))
            } else if let Some(i) = n.as_i64() {
                Ok(Byml::I32(i as i32))
            } else {
                Ok(Byml::I32(n.as_u64().unwrap() as i32))
            }
        }
        Value::String(s) => Ok(Byml::String(s.clone())),
        Value::Sequence(items) => Ok(Byml::Array(
            items.iter().map(from_yaml_value).collect::<Result<_>>()?,
        )),
        Value::Mapping(entries) => {
            let mut hash = Hash::new();
            for (key, value) in entries {
                hash.insert(string_key(key)?, from_yaml_value(value)?);
            }
            Ok(Byml::Hash(hash))
        }
        Value::Tagged(_) => unreachable!("tags are stripped above"),
    }
}

fn from_tagged(tag: &str, inner: &Value) -> Result<Byml> {
    if is_binary_tag(tag) {
        return Ok(Byml::Binary(decode_binary(inner)?));
    }
    match tag {
        "u" => scalar_u64(inner)
            .map(|v| Byml::U32(v as u32))
            .ok_or_else(|| Error::invalid("!u expects an unsigned integer")),
        "l" => scalar_i64(inner)
            .map(Byml::I64)
            .ok_or_else(|| Error::invalid("!l expects an integer")),
        "ul" => scalar_u64(inner)
            .map(Byml::U64)
            .ok_or_else(|| Error::invalid("!ul expects an unsigned integer")),
        "f64" => inner
            .as_f64()
            .map(Byml::F64)
            .ok_or_else(|| Error::invalid("!f64 expects a float")),
        "h32" => {
            let entries = inner
                .as_mapping()
                .ok_or_else(|| Error::invalid("!h32 expects a mapping"))?;
            let mut hash = Hash32::new();
            for (key, value) in entries {
                hash.insert(parse_hex_key(key)? as u32, from_yaml_value(value)?);
            }
            Ok(Byml::Hash32(hash))
        }
        "h64" => {
            let entries = inner
                .as_mapping()
                .ok_or_else(|| Error::invalid("!h64 expects a mapping"))?;
            let mut hash = Hash64::new();
            for (key, value) in entries {
                hash.insert(parse_hex_key(key)?, from_yaml_value(value)?);
            }
            Ok(Byml::Hash64(hash))
        }
        "file" => {
            let align = get_map_entry(inner, "Alignment")
                .ok_or_else(|| Error::invalid("!file node is missing Alignment"))?;
            let data = get_map_entry(inner, "Data")
                .ok_or_else(|| Error::invalid("!file node is missing Data"))?;
            let (_, align) = untag(align);
            let align = scalar_u64(align)
                .ok_or_else(|| Error::invalid("invalid file alignment"))? as u32;
            let (_, data) = untag(data);
            Ok(Byml::File {
                data: decode_binary(data)?,
                align,
            })
        }
        _ => Err(Error::invalid("unknown node tag")),
    }
}

impl Byml {
    /// Loads a document from YAML text.
    pub fn from_text(text: &str) -> Result<Byml> {
        let value: Value = serde_yaml::from_str(text)?;
        from_yaml_value(&value)
    }

    /// Serializes the document to YAML.
    pub fn to_text(&self) -> String {
        emit_document(&to_yaml_node(self))
    }
}
