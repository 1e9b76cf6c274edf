use super::{
    Name, NameTable, Parameter, ParameterIO, ParameterList, ParameterObject, ROOT_KEY,
};
use crate::types::{Color4f, Curve, FixedSafeString, Quatf, Vector2f, Vector3f, Vector4f};
use crate::yaml::{
    emit_document, format_float, get_map_entry, scalar_i64, scalar_u64, string_needs_quotes,
    untag, Scalar, YamlNode,
};
use crate::{Error, Result};
use serde_yaml::Value;

// ---- emission ----

struct TextEmitter<'a> {
    /// Names recovered from string parameters in this document.
    extra_name_table: NameTable<'a>,
    default_name_table: NameTable<'static>,
}

fn tagged_string(tag: &str, text: &str) -> Scalar {
    Scalar {
        text: text.to_owned(),
        tag: Some(tag.to_owned()),
        quoted: string_needs_quotes(text),
    }
}

fn float_scalar(value: f32) -> YamlNode {
    YamlNode::Scalar(Scalar::plain(format_float(value)))
}

fn int_scalar(value: impl ToString) -> YamlNode {
    YamlNode::Scalar(Scalar::plain(value.to_string()))
}

fn float_seq(tag: &str, values: &[f32]) -> YamlNode {
    YamlNode::seq(
        Some(tag),
        true,
        values.iter().map(|v| float_scalar(*v)).collect(),
    )
}

impl<'a> TextEmitter<'a> {
    fn new(pio: &'a ParameterIO) -> Self {
        let mut emitter = TextEmitter {
            extra_name_table: NameTable::new(false),
            default_name_table: NameTable::new(true),
        };
        emitter.build_extra_name_table(&pio.param_root);
        emitter
    }

    /// String-valued parameters often name their siblings; make them
    /// available for key recovery.
    fn build_extra_name_table(&mut self, list: &'a ParameterList) {
        for object in list.objects.values() {
            for param in object.params.values() {
                if param.is_string_type() {
                    if let Ok(s) = param.as_str() {
                        self.extra_name_table.add_name_reference(s);
                    }
                }
            }
        }
        for child in list.lists.values() {
            self.build_extra_name_table(child);
        }
    }

    fn emit_name(&mut self, name: Name, index: usize, parent_name: Name) -> Scalar {
        if let Some(found) = self.extra_name_table.get_name(name.0, index, parent_name.0) {
            return Scalar::string(found.to_owned());
        }
        if let Some(found) = self
            .default_name_table
            .get_name(name.0, index, parent_name.0)
        {
            return Scalar::string(found.to_owned());
        }
        Scalar::plain(name.0.to_string())
    }

    fn emit_parameter(&mut self, param: &Parameter) -> YamlNode {
        match param {
            Parameter::Bool(v) => {
                YamlNode::Scalar(Scalar::plain(if *v { "true" } else { "false" }))
            }
            Parameter::F32(v) => float_scalar(*v),
            Parameter::Int(v) => int_scalar(v),
            Parameter::Vec2(v) => float_seq("!vec2", &[v.x, v.y]),
            Parameter::Vec3(v) => float_seq("!vec3", &[v.x, v.y, v.z]),
            Parameter::Vec4(v) => float_seq("!vec4", &[v.x, v.y, v.z, v.t]),
            Parameter::Color(v) => float_seq("!color", &[v.r, v.g, v.b, v.a]),
            Parameter::Quat(v) => float_seq("!quat", &[v.a, v.b, v.c, v.d]),
            Parameter::String32(v) => YamlNode::Scalar(tagged_string("!str32", v.as_str())),
            Parameter::String64(v) => YamlNode::Scalar(tagged_string("!str64", v.as_str())),
            Parameter::String256(v) => YamlNode::Scalar(tagged_string("!str256", v.as_str())),
            Parameter::StringRef(v) => YamlNode::Scalar(Scalar::string(v.clone())),
            Parameter::Curve1(v) => emit_curves(v),
            Parameter::Curve2(v) => emit_curves(v),
            Parameter::Curve3(v) => emit_curves(v),
            Parameter::Curve4(v) => emit_curves(v),
            Parameter::U32(v) => YamlNode::Scalar(Scalar::tagged("!u", v.to_string())),
            Parameter::BufferInt(v) => YamlNode::seq(
                Some("!buffer_int"),
                true,
                v.iter().map(int_scalar).collect(),
            ),
            Parameter::BufferF32(v) => float_seq("!buffer_f32", v),
            Parameter::BufferU32(v) => YamlNode::seq(
                Some("!buffer_u32"),
                true,
                v.iter().map(int_scalar).collect(),
            ),
            Parameter::BufferBinary(v) => YamlNode::seq(
                Some("!buffer_binary"),
                true,
                v.iter().map(int_scalar).collect(),
            ),
        }
    }

    fn emit_object(&mut self, object: &ParameterObject, parent_name: Name) -> YamlNode {
        let mut entries = Vec::with_capacity(object.params.len());
        for (i, (name, param)) in object.params.iter().enumerate() {
            let key = self.emit_name(*name, i, parent_name);
            entries.push((key, self.emit_parameter(param)));
        }
        YamlNode::map(Some("!obj"), false, entries)
    }

    fn emit_list(&mut self, list: &ParameterList, list_name: Name) -> YamlNode {
        let mut objects = Vec::with_capacity(list.objects.len());
        for (i, (name, object)) in list.objects.iter().enumerate() {
            let key = self.emit_name(*name, i, list_name);
            objects.push((key, self.emit_object(object, *name)));
        }
        let mut lists = Vec::with_capacity(list.lists.len());
        for (i, (name, child)) in list.lists.iter().enumerate() {
            let key = self.emit_name(*name, i, list_name);
            lists.push((key, self.emit_list(child, *name)));
        }
        YamlNode::map(
            Some("!list"),
            false,
            vec![
                (Scalar::string("objects"), YamlNode::map(None, false, objects)),
                (Scalar::string("lists"), YamlNode::map(None, false, lists)),
            ],
        )
    }

    fn emit_io(&mut self, pio: &ParameterIO) -> YamlNode {
        YamlNode::map(
            Some("!io"),
            false,
            vec![
                (
                    Scalar::string("version"),
                    YamlNode::Scalar(Scalar::plain(pio.version.to_string())),
                ),
                (
                    Scalar::string("type"),
                    YamlNode::Scalar(Scalar::string(pio.data_type.clone())),
                ),
                (
                    Scalar::string("param_root"),
                    self.emit_list(&pio.param_root, ROOT_KEY),
                ),
            ],
        )
    }
}

fn emit_curves(curves: &[Curve]) -> YamlNode {
    let mut items = Vec::with_capacity(curves.len() * 32);
    for curve in curves {
        items.push(int_scalar(curve.a));
        items.push(int_scalar(curve.b));
        for float in &curve.floats {
            items.push(float_scalar(*float));
        }
    }
    YamlNode::seq(Some("!curve"), true, items)
}

// ---- parsing ----

fn name_from_key(key: &Value) -> Result<Name> {
    let (_, key) = untag(key);
    match key {
        Value::String(s) => Ok(Name::from_str(s)),
        Value::Number(_) => scalar_u64(key)
            .map(|v| Name(v as u32))
            .ok_or_else(|| Error::invalid("invalid numeric parameter key")),
        _ => Err(Error::invalid("unexpected key scalar type")),
    }
}

fn value_as_f32(value: &Value) -> Result<f32> {
    let (_, value) = untag(value);
    match value {
        Value::Number(n) => Ok(n.as_f64().unwrap_or_default() as f32),
        Value::String(_) => scalar_i64(value)
            .map(|v| v as f32)
            .ok_or_else(|| Error::invalid("expected a float scalar")),
        _ => Err(Error::invalid("expected a float scalar")),
    }
}

fn value_as_u32(value: &Value) -> Result<u32> {
    let (_, value) = untag(value);
    scalar_u64(value)
        .map(|v| v as u32)
        .ok_or_else(|| Error::invalid("expected an integer scalar"))
}

fn value_as_i32(value: &Value) -> Result<i32> {
    let (_, value) = untag(value);
    scalar_i64(value)
        .map(|v| v as i32)
        .ok_or_else(|| Error::invalid("expected an integer scalar"))
}

fn scalar_to_string(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(Error::invalid("expected a string scalar")),
    }
}

fn read_sequence(tag: &str, items: &[Value]) -> Result<Parameter> {
    let mut floats = || -> Result<Vec<f32>> { items.iter().map(value_as_f32).collect() };
    match tag {
        "vec2" => {
            let v = floats()?;
            if v.len() != 2 {
                return Err(Error::invalid("!vec2 expects 2 floats"));
            }
            Ok(Parameter::Vec2(Vector2f { x: v[0], y: v[1] }))
        }
        "vec3" => {
            let v = floats()?;
            if v.len() != 3 {
                return Err(Error::invalid("!vec3 expects 3 floats"));
            }
            Ok(Parameter::Vec3(Vector3f {
                x: v[0],
                y: v[1],
                z: v[2],
            }))
        }
        "vec4" => {
            let v = floats()?;
            if v.len() != 4 {
                return Err(Error::invalid("!vec4 expects 4 floats"));
            }
            Ok(Parameter::Vec4(Vector4f {
                x: v[0],
                y: v[1],
                z: v[2],
                t: v[3],
            }))
        }
        "color" => {
            let v = floats()?;
            if v.len() != 4 {
                return Err(Error::invalid("!color expects 4 floats"));
            }
            Ok(Parameter::Color(Color4f {
                r: v[0],
                g: v[1],
                b: v[2],
                a: v[3],
            }))
        }
        "quat" => {
            let v = floats()?;
            if v.len() != 4 {
                return Err(Error::invalid("!quat expects 4 floats"));
            }
            Ok(Parameter::Quat(Quatf {
                a: v[0],
                b: v[1],
                c: v[2],
                d: v[3],
            }))
        }
        "curve" => read_curves(items),
        "buffer_int" => Ok(Parameter::BufferInt(
            items.iter().map(value_as_i32).collect::<Result<_>>()?,
        )),
        "buffer_f32" => Ok(Parameter::BufferF32(
            items.iter().map(value_as_f32).collect::<Result<_>>()?,
        )),
        "buffer_u32" => Ok(Parameter::BufferU32(
            items.iter().map(value_as_u32).collect::<Result<_>>()?,
        )),
        "buffer_binary" => Ok(Parameter::BufferBinary(
            items
                .iter()
                .map(|v| value_as_u32(v).map(|x| x as u8))
                .collect::<Result<_>>()?,
        )),
        _ => Err(Error::invalid("unexpected sequence tag (or no tag)")),
    }
}

fn read_curves(items: &[Value]) -> Result<Parameter> {
    const ELEMENTS_PER_CURVE: usize = 32;
    let count = items.len() / ELEMENTS_PER_CURVE;
    if count == 0 || count > 4 || items.len() % ELEMENTS_PER_CURVE != 0 {
        return Err(Error::invalid("invalid curve: unexpected number of children"));
    }
    let mut curves = [Curve::default(); 4];
    for (i, curve) in curves.iter_mut().take(count).enumerate() {
        let chunk = &items[i * ELEMENTS_PER_CURVE..(i + 1) * ELEMENTS_PER_CURVE];
        curve.a = value_as_u32(&chunk[0])?;
        curve.b = value_as_u32(&chunk[1])?;
        for (float, value) in curve.floats.iter_mut().zip(&chunk[2..]) {
            *float = value_as_f32(value)?;
        }
    }
    Ok(match count {
        1 => Parameter::Curve1([curves[0]]),
        2 => Parameter::Curve2([curves[0], curves[1]]),
        3 => Parameter::Curve3([curves[0], curves[1], curves[2]]),
        _ => Parameter::Curve4(curves),
    })
}

fn read_parameter(value: &Value) -> Result<Parameter> {
    let (tag, inner) = untag(value);
    if let Value::Sequence(items) = inner {
        let tag = tag.ok_or_else(|| Error::invalid("unexpected sequence tag (or no tag)"))?;
        return read_sequence(&tag, items);
    }

    match tag.as_deref() {
        Some("str32") => Ok(Parameter::String32(FixedSafeString::new(
            &scalar_to_string(inner)?,
        ))),
        Some("str64") => Ok(Parameter::String64(FixedSafeString::new(
            &scalar_to_string(inner)?,
        ))),
        Some("str256") => Ok(Parameter::String256(FixedSafeString::new(
            &scalar_to_string(inner)?,
        ))),
        Some("u") => Ok(Parameter::U32(value_as_u32(inner)?)),
        Some(_) => Err(Error::invalid("unexpected parameter tag")),
        None => match inner {
            Value::Bool(b) => Ok(Parameter::Bool(*b)),
            Value::Number(n) => {
                if n.is_f64() {
                    Ok(Parameter::F32(n.as_f64().unwrap_or_default() as f32))
                } else {
                    Ok(Parameter::Int(value_as_i32(inner)?))
                }
            }
            Value::String(s) => Ok(Parameter::StringRef(s.clone())),
            _ => Err(Error::invalid("unexpected scalar type")),
        },
    }
}

fn read_object(value: &Value) -> Result<ParameterObject> {
    let (_, inner) = untag(value);
    let entries = inner
        .as_mapping()
        .ok_or_else(|| Error::invalid("expected a parameter object mapping"))?;
    let mut object = ParameterObject::default();
    for (key, value) in entries {
        object
            .params
            .insert(name_from_key(key)?, read_parameter(value)?);
    }
    Ok(object)
}

fn read_list(value: &Value) -> Result<ParameterList> {
    let mut list = ParameterList::default();

    let objects = get_map_entry(value, "objects")
        .ok_or_else(|| Error::invalid("parameter list is missing objects"))?;
    let (_, objects) = untag(objects);
    let objects = objects
        .as_mapping()
        .ok_or_else(|| Error::invalid("expected an objects mapping"))?;
    for (key, value) in objects {
        list.objects.insert(name_from_key(key)?, read_object(value)?);
    }

    let lists = get_map_entry(value, "lists")
        .ok_or_else(|| Error::invalid("parameter list is missing lists"))?;
    let (_, lists) = untag(lists);
    let lists = lists
        .as_mapping()
        .ok_or_else(|| Error::invalid("expected a lists mapping"))?;
    for (key, value) in lists {
        list.lists.insert(name_from_key(key)?, read_list(value)?);
    }
    Ok(list)
}

impl ParameterIO {
    /// Loads a ParameterIO from its YAML representation.
    pub fn from_text(text: &str) -> Result<ParameterIO> {
        let value: Value = serde_yaml::from_str(text)?;
        let version = get_map_entry(&value, "version")
            .and_then(|v| scalar_u64(untag(v).1))
            .ok_or_else(|| Error::invalid("document is missing a version"))?;
        let data_type = get_map_entry(&value, "type")
            .map(|v| scalar_to_string(untag(v).1))
            .ok_or_else(|| Error::invalid("document is missing a type"))??;
        let param_root = get_map_entry(&value, "param_root")
            .ok_or_else(|| Error::invalid("document is missing param_root"))?;
        Ok(ParameterIO {
            version: version as u32,
            data_type,
            param_root: read_list(param_root)?,
        })
    }

    /// Serializes the ParameterIO to a YAML representation.
    pub fn to_text(&self) -> String {
        let mut emitter = TextEmitter::new(self);
        let doc = emitter.emit_io(self);
        emit_document(&doc)
    }
}

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::types::Vector2f;

    fn sample_pio() -> ParameterIO {
        let mut pio = ParameterIO::new(0, "xml");
        let mut object = ParameterObject::default();
        object
            .params
            .insert(Name::from_str("Enabled"), Parameter::Bool(true));
        object
            .params
            .insert(Name::from_str("Life"), Parameter::Int(100));
        object.params.insert(
            Name::from_str("Scale"),
            Parameter::Vec2(Vector2f { x: 1.0, y: 2.5 }),
        );
        object.params.insert(
            Name::from_str("ItemName"),
            Parameter::String64("Weapon_Sword_001".into()),
        );
        object.params.insert(
            Name::from_str("Rank"),
            Parameter::U32(3),
        );
        object.params.insert(
            Name::from_str("Values"),
            Parameter::BufferF32(vec![0.5, 1.5]),
        );
        pio.param_root
            .objects
            .insert(Name::from_str("General"), object);
        let mut child = ParameterList::default();
        child.objects.insert(
            Name::from_str("Slot"),
            ParameterObject::default(),
        );
        pio.param_root
            .lists
            .insert(Name::from_str("Children"), child);
        pio
    }

    #[test]
    fn text_round_trip() {
        let pio = sample_pio();
        let text = pio.to_text();
        let parsed = ParameterIO::from_text(&text).unwrap();
        assert_eq!(parsed, pio);
        assert_eq!(parsed.to_text(), text);
    }

    #[test]
    fn known_names_are_recovered() {
        let pio = sample_pio();
        let text = pio.to_text();
        assert!(text.starts_with("!io\n"), "{}", text);
        assert!(text.contains("General"), "{}", text);
        assert!(text.contains("Enabled"), "{}", text);
        assert!(text.contains("!str64 Weapon_Sword_001"), "{}", text);
        assert!(text.contains("!u 3"), "{}", text);
    }

    #[test]
    fn unknown_names_fall_back_to_hashes() {
        let mut pio = ParameterIO::new(0, "xml");
        let mut object = ParameterObject::default();
        object
            .params
            .insert(Name(0xDEADBEEF), Parameter::Int(1));
        pio.param_root
            .objects
            .insert(Name(0xCAFEBABE), object);
        let text = pio.to_text();
        assert!(text.contains(&0xDEADBEEFu32.to_string()), "{}", text);
        assert!(text.contains(&0xCAFEBABEu32.to_string()), "{}", text);
        let parsed = ParameterIO::from_text(&text).unwrap();
        assert_eq!(parsed, pio);
    }

    #[test]
    fn text_to_binary_round_trip() {
        let pio = sample_pio();
        let text = pio.to_text();
        let parsed = ParameterIO::from_text(&text).unwrap();
        let bytes = parsed.to_binary().unwrap();
        assert_eq!(ParameterIO::from_binary(&bytes).unwrap(), pio);
    }

    #[test]
    fn hand_written_document() {
        let text = r#"!io
version: 1
type: xml
param_root: !list
  objects:
    TestObject: !obj
      Position: !vec3 [1.0, 2.0, 3.0]
      Count: 4
      Ratio: 0.5
      Label: !str32 hello
      Raw: !buffer_binary [1, 2, 255]
  lists: {}
"#;
        let pio = ParameterIO::from_text(text).unwrap();
        assert_eq!(pio.version, 1);
        assert_eq!(pio.data_type, "xml");
        let object = &pio.param_root.objects[&Name::from_str("TestObject")];
        assert_eq!(
            object.params[&Name::from_str("Count")],
            Parameter::Int(4)
        );
        assert_eq!(
            object.params[&Name::from_str("Ratio")],
            Parameter::F32(0.5)
        );
        assert_eq!(
            object.params[&Name::from_str("Raw")],
            Parameter::BufferBinary(vec![1, 2, 255])
        );
    }

    #[test]
    fn curve_round_trip() {
        let mut pio = ParameterIO::new(0, "xml");
        let mut object = ParameterObject::default();
        let mut curve = crate::types::Curve::default();
        curve.a = 2;
        curve.b = 3;
        curve.floats[0] = 0.5;
        object
            .params
            .insert(Name::from_str("Curve"), Parameter::Curve2([curve, curve]));
        pio.param_root
            .objects
            .insert(Name::from_str("General"), object);
        let text = pio.to_text();
        let parsed = ParameterIO::from_text(&text).unwrap();
        assert_eq!(parsed, pio);
    }
}
