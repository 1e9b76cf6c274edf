//! Shared YAML machinery for the BYML and AAMP text representations.
//!
//! Parsing goes through [`serde_yaml`]; both text modules interpret the
//! resulting [`Value`] trees with their own tag sets. Emission is handled
//! here by a small block/flow emitter over an intermediate node tree, because
//! the output discipline (flow style for small scalar-only containers,
//! `%.9g`/`%.17g` float text, zero-padded hex keys, local tags) is part of
//! the format.

use serde_yaml::value::TaggedValue;
use serde_yaml::Value;

/// A scalar ready for emission.
#[derive(Debug, Clone)]
pub struct Scalar {
    pub text: String,
    pub tag: Option<String>,
    pub quoted: bool,
}

impl Scalar {
    /// A scalar emitted verbatim (numbers, booleans, null).
    pub fn plain(text: impl Into<String>) -> Self {
        Scalar {
            text: text.into(),
            tag: None,
            quoted: false,
        }
    }

    /// A tagged scalar, e.g. `!u 0x80`.
    pub fn tagged(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Scalar {
            text: text.into(),
            tag: Some(tag.into()),
            quoted: false,
        }
    }

    /// A string scalar, quoted whenever a plain rendering would be parsed
    /// back as something else.
    pub fn string(text: impl Into<String>) -> Self {
        let text = text.into();
        let quoted = string_needs_quotes(&text);
        Scalar {
            text,
            tag: None,
            quoted,
        }
    }
}

/// An emission-ready YAML node.
#[derive(Debug, Clone)]
pub enum YamlNode {
    Scalar(Scalar),
    Seq {
        tag: Option<String>,
        flow: bool,
        items: Vec<YamlNode>,
    },
    Map {
        tag: Option<String>,
        flow: bool,
        entries: Vec<(Scalar, YamlNode)>,
    },
}

impl YamlNode {
    pub fn seq(tag: Option<&str>, flow: bool, items: Vec<YamlNode>) -> Self {
        YamlNode::Seq {
            tag: tag.map(str::to_owned),
            flow,
            items,
        }
    }

    pub fn map(tag: Option<&str>, flow: bool, entries: Vec<(Scalar, YamlNode)>) -> Self {
        YamlNode::Map {
            tag: tag.map(str::to_owned),
            flow,
            entries,
        }
    }
}

/// Formats a binary32 float the way `%.9g` does, with a `.0` suffix when the
/// result would otherwise read back as an integer.
pub fn format_float(value: f32) -> String {
    format_with_significant_digits(value as f64, 9)
}

/// Formats a binary64 float the way `%.17g` does, with the same suffix rule.
pub fn format_double(value: f64) -> String {
    format_with_significant_digits(value, 17)
}

fn format_with_significant_digits(value: f64, sig: usize) -> String {
    if value.is_nan() {
        return ".nan".into();
    }
    if value.is_infinite() {
        return if value > 0.0 { ".inf" } else { "-.inf" }.into();
    }

    let exp_form = format!("{:.*e}", sig - 1, value);
    let e_pos = exp_form.find('e').unwrap();
    let exponent: i32 = exp_form[e_pos + 1..].parse().unwrap();

    let mut repr = if exponent < -4 || exponent >= sig as i32 {
        let mantissa = exp_form[..e_pos].trim_end_matches('0').trim_end_matches('.');
        format!(
            "{}e{}{:02}",
            mantissa,
            if exponent < 0 { '-' } else { '+' },
            exponent.abs()
        )
    } else {
        let decimals = (sig as i32 - 1 - exponent).max(0) as usize;
        let fixed = format!("{:.*}", decimals, value);
        if fixed.contains('.') {
            fixed.trim_end_matches('0').trim_end_matches('.').to_owned()
        } else {
            fixed
        }
    };

    if !repr.contains('.') && !repr.contains('e') {
        repr.push_str(".0");
    }
    repr
}

fn parses_as_number(value: &str) -> bool {
    if value.contains('.') {
        if matches!(
            value,
            ".inf" | ".Inf" | ".INF" | "+.inf" | "+.Inf" | "+.INF" | "-.inf" | "-.Inf" | "-.INF"
                | ".nan" | ".NaN" | ".NAN"
        ) {
            return true;
        }
        if value.parse::<f64>().is_ok() {
            return true;
        }
    }
    if !value.is_empty() {
        let unsigned = value.strip_prefix('-').unwrap_or(value);
        if let Some(hex) = unsigned.strip_prefix("0x").or_else(|| unsigned.strip_prefix("0X")) {
            if !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return true;
            }
        } else if !unsigned.is_empty() && unsigned.bytes().all(|b| b.is_ascii_digit()) {
            return true;
        }
    }
    false
}

/// Returns true when a string must be quoted to survive a round trip as a
/// string (it would otherwise be read back as a bool, number or null, or it
/// collides with YAML syntax).
pub fn string_needs_quotes(value: &str) -> bool {
    if value.is_empty() || value == "true" || value == "false" || value == "null" || value == "~" {
        return true;
    }
    if parses_as_number(value) {
        return true;
    }
    let first = value.as_bytes()[0];
    if b"-?:,[]{}#&*!|>'\"%@` ".contains(&first) {
        return true;
    }
    if value.ends_with(' ') || value.ends_with(':') {
        return true;
    }
    value
        .bytes()
        .any(|b| b.is_ascii_control() || b",[]{}#".contains(&b))
        || value.contains(": ")
        || value.contains(" #")
}

fn render_scalar(scalar: &Scalar) -> String {
    let body = if scalar.quoted {
        quote(&scalar.text)
    } else {
        scalar.text.clone()
    };
    match &scalar.tag {
        Some(tag) => format!("{} {}", tag, body),
        None => body,
    }
}

fn quote(text: &str) -> String {
    if text.bytes().any(|b| b.is_ascii_control()) {
        // Double-quoted with escapes for anything unprintable.
        let mut out = String::with_capacity(text.len() + 2);
        out.push('"');
        for c in text.chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                '\r' => out.push_str("\\r"),
                c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
                c => out.push(c),
            }
        }
        out.push('"');
        out
    } else {
        format!("'{}'", text.replace('\'', "''"))
    }
}

fn is_empty_container(node: &YamlNode) -> bool {
    match node {
        YamlNode::Seq { items, .. } => items.is_empty(),
        YamlNode::Map { entries, .. } => entries.is_empty(),
        YamlNode::Scalar(_) => false,
    }
}

fn render_flow(node: &YamlNode) -> String {
    match node {
        YamlNode::Scalar(s) => render_scalar(s),
        YamlNode::Seq { tag, items, .. } => {
            let body = items.iter().map(render_flow).collect::<Vec<_>>().join(", ");
            match tag {
                Some(tag) => format!("{} [{}]", tag, body),
                None => format!("[{}]", body),
            }
        }
        YamlNode::Map { tag, entries, .. } => {
            let body = entries
                .iter()
                .map(|(k, v)| format!("{}: {}", render_scalar(k), render_flow(v)))
                .collect::<Vec<_>>()
                .join(", ");
            match tag {
                Some(tag) => format!("{} {{{}}}", tag, body),
                None => format!("{{{}}}", body),
            }
        }
    }
}

fn render_block(node: &YamlNode, indent: usize, out: &mut String) {
    let pad = " ".repeat(indent);
    match node {
        YamlNode::Scalar(_) => {
            out.push_str(&pad);
            out.push_str(&render_flow(node));
            out.push('\n');
        }
        YamlNode::Seq { items, .. } => {
            for item in items {
                if use_flow(item) {
                    out.push_str(&pad);
                    out.push_str("- ");
                    out.push_str(&render_flow(item));
                    out.push('\n');
                } else {
                    let tag = container_tag(item);
                    if let Some(tag) = tag {
                        out.push_str(&pad);
                        out.push_str("- ");
                        out.push_str(tag);
                        out.push('\n');
                        render_block(item, indent + 2, out);
                    } else {
                        // Splice the "- " marker into the first child line.
                        let mut sub = String::new();
                        render_block(item, indent + 2, &mut sub);
                        let spliced = sub.replacen(&format!("{}  ", pad), &format!("{}- ", pad), 1);
                        out.push_str(&spliced);
                    }
                }
            }
        }
        YamlNode::Map { entries, .. } => {
            for (key, value) in entries {
                out.push_str(&pad);
                out.push_str(&render_scalar(key));
                out.push(':');
                if use_flow(value) {
                    out.push(' ');
                    out.push_str(&render_flow(value));
                    out.push('\n');
                } else {
                    if let Some(tag) = container_tag(value) {
                        out.push(' ');
                        out.push_str(tag);
                    }
                    out.push('\n');
                    render_block(value, indent + 2, out);
                }
            }
        }
    }
}

fn container_tag(node: &YamlNode) -> Option<&str> {
    match node {
        YamlNode::Seq { tag, .. } | YamlNode::Map { tag, .. } => tag.as_deref(),
        YamlNode::Scalar(_) => None,
    }
}

fn use_flow(node: &YamlNode) -> bool {
    match node {
        YamlNode::Scalar(_) => true,
        YamlNode::Seq { flow, .. } | YamlNode::Map { flow, .. } => {
            *flow || is_empty_container(node)
        }
    }
}

/// Emits a document. The trailing newline is included.
pub fn emit_document(root: &YamlNode) -> String {
    let mut out = String::new();
    if use_flow(root) {
        out.push_str(&render_flow(root));
        out.push('\n');
        return out;
    }
    if let Some(tag) = container_tag(root) {
        out.push_str(tag);
        out.push('\n');
    }
    render_block(root, 0, &mut out);
    out
}

// ---- serde_yaml helpers used by both text parsers ----

/// Splits a possibly tagged value into its tag text (without the leading `!`)
/// and inner value.
pub fn untag(value: &Value) -> (Option<String>, &Value) {
    match value {
        Value::Tagged(tagged) => {
            let TaggedValue { tag, value } = tagged.as_ref();
            let text = tag.to_string();
            (Some(text.trim_start_matches('!').to_owned()), value)
        }
        other => (None, other),
    }
}

/// Looks up a key in a mapping value, looking through a tag if present.
pub fn get_map_entry<'v>(value: &'v Value, key: &str) -> Option<&'v Value> {
    let (_, inner) = untag(value);
    inner
        .as_mapping()?
        .iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

/// True for the `!!binary` tag in any of its spellings.
pub fn is_binary_tag(tag: &str) -> bool {
    matches!(tag, "binary" | "!binary" | "tag:yaml.org,2002:binary")
}

/// Reads an unsigned integer scalar, accepting both resolved numbers and
/// base-prefixed digit strings (`0x...`).
pub fn scalar_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                u64::from_str_radix(hex, 16).ok()
            } else {
                s.parse().ok()
            }
        }
        _ => None,
    }
}

/// Reads a signed integer scalar, accepting both resolved numbers and
/// base-prefixed digit strings.
pub fn scalar_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_u64().map(|v| v as i64)),
        Value::String(s) => {
            let (neg, digits) = match s.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, s.as_str()),
            };
            let magnitude = if let Some(hex) =
                digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X"))
            {
                u64::from_str_radix(hex, 16).ok()?
            } else {
                digits.parse().ok()?
            };
            Some(if neg {
                (magnitude as i64).wrapping_neg()
            } else {
                magnitude as i64
            })
        }
        _ => None,
    }
}
