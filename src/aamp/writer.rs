use super::parse::{FLAG_LITTLE_ENDIAN, FLAG_UTF8, HEADER_SIZE};
use super::{
    Name, Parameter, ParameterIO, ParameterList, ParameterObject, DEMO_AI_ACTION_IDX, ROOT_KEY,
};
use crate::bin_io::BinWriter;
use crate::types::Curve;
use crate::{Endian, Error, Result};
use std::collections::HashMap;

/// Field offsets inside the serialized structures.
const LIST_LISTS_REL: usize = 4;
const LIST_OBJECTS_REL: usize = 8;
const OBJ_PARAMS_REL: usize = 4;
const PARAM_DATA_REL: usize = 4;

const U24_MAX_OFFSET: usize = (1 << 24) * 4;

/// Identity key for a node being written; structure addresses are stable for
/// the duration of the borrow.
fn key<T>(value: &T) -> usize {
    value as *const T as usize
}

struct WriteContext<'a> {
    writer: BinWriter,
    num_lists: u32,
    num_objects: u32,
    num_parameters: u32,
    /// Non-string parameters in data serialization order.
    parameters_to_write: Vec<&'a Parameter>,
    /// String parameters in string serialization order.
    string_parameters_to_write: Vec<&'a Parameter>,
    /// Where each structure was written, for offset patch-backs.
    offsets: HashMap<usize, usize>,
    string_offsets: HashMap<&'a str, usize>,
}

impl<'a> WriteContext<'a> {
    fn new() -> Self {
        WriteContext {
            writer: BinWriter::new(Endian::Little),
            num_lists: 0,
            num_objects: 0,
            num_parameters: 0,
            parameters_to_write: Vec::new(),
            string_parameters_to_write: Vec::new(),
            offsets: HashMap::new(),
            string_offsets: HashMap::new(),
        }
    }

    /// Patches a compact u16 offset field (distance / 4) in a previously
    /// written structure to point at the current cursor.
    fn write_offset_for_parent(&mut self, parent_key: usize, field_offset: usize) -> Result<()> {
        let parent_offset = self.offsets[&parent_key];
        let distance = self.writer.tell() - parent_offset;
        let compact = compact_u16(distance)?;
        self.writer
            .run_at(parent_offset + field_offset, |w| w.write(&compact))
    }

    fn write_list_header(&mut self, name: Name, list: &'a ParameterList) -> Result<()> {
        self.offsets.insert(key(list), self.writer.tell());
        self.num_lists += 1;
        self.writer.write(&name.0)?;
        self.writer.write(&0u16)?; // lists offset, patched later
        self.writer.write(&(list.lists.len() as u16))?;
        self.writer.write(&0u16)?; // objects offset, patched later
        self.writer.write(&(list.objects.len() as u16))
    }

    fn write_object_header(&mut self, name: Name, object: &'a ParameterObject) -> Result<()> {
        self.offsets.insert(key(object), self.writer.tell());
        self.num_objects += 1;
        self.writer.write(&name.0)?;
        self.writer.write(&0u16)?; // parameters offset, patched later
        self.writer.write(&(object.params.len() as u16))
    }

    fn write_parameter_header(&mut self, name: Name, param: &'a Parameter) -> Result<()> {
        self.offsets.insert(key(param), self.writer.tell());
        self.num_parameters += 1;
        self.writer.write(&name.0)?;
        self.writer.write_u24(0)?; // data offset, patched later
        self.writer.write(&param.type_byte())
    }

    /// Lays out every list structure: the root first, then each list's
    /// children as one contiguous block, depth first.
    fn write_lists(&mut self, root: &'a ParameterList) -> Result<()> {
        self.write_list_header(ROOT_KEY, root)?;
        self.write_child_lists(root)
    }

    fn write_child_lists(&mut self, list: &'a ParameterList) -> Result<()> {
        self.write_offset_for_parent(key(list), LIST_LISTS_REL)?;
        for (name, child) in &list.lists {
            self.write_list_header(*name, child)?;
        }
        for child in list.lists.values() {
            self.write_child_lists(child)?;
        }
        Ok(())
    }

    /// Lays out object structures via DFS on the list tree, parent before
    /// children.
    fn write_objects(&mut self, list: &'a ParameterList) -> Result<()> {
        self.write_offset_for_parent(key(list), LIST_OBJECTS_REL)?;
        for (name, object) in &list.objects {
            self.write_object_header(*name, object)?;
        }
        for child in list.lists.values() {
            self.write_objects(child)?;
        }
        Ok(())
    }

    /// Lays out parameter structures via DFS, child lists before this list's
    /// own objects.
    fn write_parameters(&mut self, list: &'a ParameterList) -> Result<()> {
        for child in list.lists.values() {
            self.write_parameters(child)?;
        }
        for object in list.objects.values() {
            self.write_offset_for_parent(key(object), OBJ_PARAMS_REL)?;
            for (name, param) in &object.params {
                self.write_parameter_header(*name, param)?;
            }
        }
        Ok(())
    }

    /// Determines the order in which parameter data is serialized. The order
    /// is not object order: objects are collected after recursing into child
    /// lists, with one object of the parent interleaved every two child
    /// lists. The root processes up to seven objects up front, except for
    /// BotW AIProgram documents (first root object named DemoAIActionIdx),
    /// which behave like non-root lists.
    fn collect_parameters(&mut self, list: &'a ParameterList, process_top_objects_first: bool) {
        let objects: Vec<&'a ParameterObject> = list.objects.values().collect();
        let mut next_object = 0usize;

        let is_botw_aiprog = list
            .objects
            .get_index(0)
            .map(|(name, _)| *name == DEMO_AI_ACTION_IDX)
            .unwrap_or(false);

        macro_rules! process_one_object {
            () => {{
                for param in objects[next_object].params.values() {
                    if param.is_string_type() {
                        self.string_parameters_to_write.push(param);
                    } else {
                        self.parameters_to_write.push(param);
                    }
                }
                next_object += 1;
            }};
        }

        if process_top_objects_first && !is_botw_aiprog {
            for _ in 0..7 {
                if next_object >= objects.len() {
                    break;
                }
                process_one_object!();
            }
        }

        for (i, child) in list.lists.values().enumerate() {
            if !is_botw_aiprog && i % 2 == 0 && next_object < objects.len() {
                process_one_object!();
            }
            self.collect_parameters(child, false);
        }

        while next_object < objects.len() {
            process_one_object!();
        }
    }

    fn write_data_section(&mut self) -> Result<()> {
        let lookup_start_offset = self.writer.tell();
        let params = std::mem::take(&mut self.parameters_to_write);
        for param in params {
            self.write_parameter_data(param, lookup_start_offset)?;
        }
        self.writer.align_up(4);
        Ok(())
    }

    fn write_parameter_data(
        &mut self,
        param: &'a Parameter,
        lookup_start_offset: usize,
    ) -> Result<()> {
        let payload = serialize_payload(param);
        let parent_offset = self.offsets[&key(param)];
        let is_buffer = param.is_buffer_type();
        let count_skip = if is_buffer { 4 } else { 0 };

        // Scan the already-written data section for an identical run so the
        // bytes can be shared.
        let mut data_offset = self.writer.tell() + count_skip;
        let mut found = false;
        {
            let buffer = self.writer.buffer();
            let mut offset = lookup_start_offset;
            while offset + payload.len() <= buffer.len()
                && offset - parent_offset < U24_MAX_OFFSET
            {
                if &buffer[offset..offset + payload.len()] == payload.as_slice() {
                    data_offset = offset + count_skip;
                    found = true;
                    break;
                }
                offset += 4;
            }
        }

        let compact = compact_u24(data_offset - parent_offset)?;
        self.writer.run_at(parent_offset + PARAM_DATA_REL, |w| {
            w.write_u24(compact)
        })?;

        if !found {
            self.writer.write_bytes(&payload)?;
            self.writer.align_up(4);
        }
        Ok(())
    }

    fn write_string_section(&mut self) -> Result<()> {
        let params = std::mem::take(&mut self.string_parameters_to_write);
        for param in params {
            self.write_string(param)?;
        }
        self.writer.align_up(4);
        Ok(())
    }

    fn write_string(&mut self, param: &'a Parameter) -> Result<()> {
        let parent_offset = self.offsets[&key(param)];
        let string = param.as_str()?;
        let (target, is_new) = match self.string_offsets.get(string) {
            Some(&offset) => (offset, false),
            None => {
                let offset = self.writer.tell();
                self.string_offsets.insert(string, offset);
                (offset, true)
            }
        };

        let compact = compact_u24(target - parent_offset)?;
        self.writer.run_at(parent_offset + PARAM_DATA_REL, |w| {
            w.write_u24(compact)
        })?;

        if is_new {
            self.writer.write_cstr(string)?;
            self.writer.align_up(4);
        }
        Ok(())
    }
}

fn compact_u16(distance: usize) -> Result<u16> {
    if distance % 4 != 0 || distance / 4 > u16::MAX as usize {
        return Err(Error::Arithmetic("offset is not representable"));
    }
    Ok((distance / 4) as u16)
}

fn compact_u24(distance: usize) -> Result<u32> {
    if distance % 4 != 0 || distance >= U24_MAX_OFFSET {
        return Err(Error::Arithmetic("offset is not representable"));
    }
    Ok((distance / 4) as u32)
}

fn push_f32(out: &mut Vec<u8>, value: f32) {
    out.extend_from_slice(&value.to_bits().to_le_bytes());
}

fn push_curves(out: &mut Vec<u8>, curves: &[Curve]) {
    for curve in curves {
        out.extend_from_slice(&curve.a.to_le_bytes());
        out.extend_from_slice(&curve.b.to_le_bytes());
        for float in &curve.floats {
            push_f32(out, *float);
        }
    }
}

/// Serializes a non-string parameter's payload; buffer payloads include
/// their u32 length prefix.
fn serialize_payload(param: &Parameter) -> Vec<u8> {
    let mut out = Vec::new();
    match param {
        Parameter::Bool(v) => out.extend_from_slice(&(*v as u32).to_le_bytes()),
        Parameter::F32(v) => push_f32(&mut out, *v),
        Parameter::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
        Parameter::Vec2(v) => {
            push_f32(&mut out, v.x);
            push_f32(&mut out, v.y);
        }
        Parameter::Vec3(v) => {
            push_f32(&mut out, v.x);
            push_f32(&mut out, v.y);
            push_f32(&mut out, v.z);
        }
        Parameter::Vec4(v) => {
            push_f32(&mut out, v.x);
            push_f32(&mut out, v.y);
            push_f32(&mut out, v.z);
            push_f32(&mut out, v.t);
        }
        Parameter::Color(v) => {
            push_f32(&mut out, v.r);
            push_f32(&mut out, v.g);
            push_f32(&mut out, v.b);
            push_f32(&mut out, v.a);
        }
        Parameter::Quat(v) => {
            push_f32(&mut out, v.a);
            push_f32(&mut out, v.b);
            push_f32(&mut out, v.c);
            push_f32(&mut out, v.d);
        }
        Parameter::Curve1(v) => push_curves(&mut out, v),
        Parameter::Curve2(v) => push_curves(&mut out, v),
        Parameter::Curve3(v) => push_curves(&mut out, v),
        Parameter::Curve4(v) => push_curves(&mut out, v),
        Parameter::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Parameter::BufferInt(v) => {
            out.extend_from_slice(&(v.len() as u32).to_le_bytes());
            for item in v {
                out.extend_from_slice(&item.to_le_bytes());
            }
        }
        Parameter::BufferF32(v) => {
            out.extend_from_slice(&(v.len() as u32).to_le_bytes());
            for item in v {
                push_f32(&mut out, *item);
            }
        }
        Parameter::BufferU32(v) => {
            out.extend_from_slice(&(v.len() as u32).to_le_bytes());
            for item in v {
                out.extend_from_slice(&item.to_le_bytes());
            }
        }
        Parameter::BufferBinary(v) => {
            out.extend_from_slice(&(v.len() as u32).to_le_bytes());
            out.extend_from_slice(v);
        }
        Parameter::String32(_)
        | Parameter::String64(_)
        | Parameter::String256(_)
        | Parameter::StringRef(_) => {
            unreachable!("string parameters are written to the string section")
        }
    }
    out
}

impl ParameterIO {
    /// Serializes the ParameterIO to a binary parameter archive.
    pub fn to_binary(&self) -> Result<Vec<u8>> {
        let mut ctx = WriteContext::new();
        ctx.writer.seek(HEADER_SIZE);
        ctx.writer.write_cstr(&self.data_type)?;
        ctx.writer.align_up(4);
        let offset_to_pio = ctx.writer.tell();

        ctx.write_lists(&self.param_root)?;
        ctx.write_objects(&self.param_root)?;
        ctx.collect_parameters(&self.param_root, true);
        ctx.write_parameters(&self.param_root)?;

        let data_section_begin = ctx.writer.tell();
        ctx.write_data_section()?;

        let string_section_begin = ctx.writer.tell();
        ctx.write_string_section()?;

        let unk_section_begin = ctx.writer.tell();
        ctx.writer.align_up(4);
        ctx.writer.grow_buffer();
        let file_size = ctx.writer.tell() as u32;

        ctx.writer.seek(0);
        ctx.writer.write_bytes(b"AAMP")?;
        ctx.writer.write(&2u32)?;
        ctx.writer.write(&(FLAG_LITTLE_ENDIAN | FLAG_UTF8))?;
        ctx.writer.write(&file_size)?;
        ctx.writer.write(&self.version)?;
        ctx.writer.write(&((offset_to_pio - HEADER_SIZE) as u32))?;
        ctx.writer.write(&ctx.num_lists)?;
        ctx.writer.write(&ctx.num_objects)?;
        ctx.writer.write(&ctx.num_parameters)?;
        ctx.writer
            .write(&((string_section_begin - data_section_begin) as u32))?;
        ctx.writer
            .write(&((unk_section_begin - string_section_begin) as u32))?;
        ctx.writer.write(&0u32)?;
        ctx.writer.seek(file_size as usize);
        Ok(ctx.writer.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::types::{Curve, Vector3f};

    fn obj(params: Vec<(&str, Parameter)>) -> ParameterObject {
        let mut object = ParameterObject::default();
        for (name, param) in params {
            object.params.insert(Name::from_str(name), param);
        }
        object
    }

    fn sample_pio() -> ParameterIO {
        let mut pio = ParameterIO::new(0, "xml");
        pio.param_root.objects.insert(
            Name::from_str("TestContent"),
            obj(vec![
                ("Bool_0", Parameter::Bool(true)),
                ("F32_0", Parameter::F32(500.12)),
                ("Int_0", Parameter::Int(-50)),
                ("Vec3_0", Parameter::Vec3(Vector3f { x: 1.0, y: 2.0, z: 3.0 })),
                ("Str32_0", Parameter::String32("test32".into())),
                ("StrRef_0", Parameter::StringRef("reference".into())),
                ("U32_0", Parameter::U32(0xDEADBEEF)),
                ("BufInt", Parameter::BufferInt(vec![1, 2, 3])),
                ("BufF32", Parameter::BufferF32(vec![0.25, 0.5])),
                ("BufBin", Parameter::BufferBinary(vec![9, 8, 7, 6, 5])),
                ("Curve", Parameter::Curve1([Curve::default()])),
            ]),
        );
        let mut child = ParameterList::default();
        child.objects.insert(
            Name::from_str("Nested"),
            obj(vec![("Str256", Parameter::String256("long".into()))]),
        );
        let mut grandchild = ParameterList::default();
        grandchild.objects.insert(
            Name::from_str("Deep"),
            obj(vec![("Value", Parameter::F32(1.5))]),
        );
        child.lists.insert(Name::from_str("Grandchild"), grandchild);
        pio.param_root.lists.insert(Name::from_str("Child"), child);
        pio
    }

    #[test]
    fn binary_round_trip() {
        let pio = sample_pio();
        let bytes = pio.to_binary().unwrap();
        let parsed = ParameterIO::from_binary(&bytes).unwrap();
        assert_eq!(parsed, pio);
    }

    #[test]
    fn reserialization_is_byte_exact() {
        let pio = sample_pio();
        let bytes = pio.to_binary().unwrap();
        let parsed = ParameterIO::from_binary(&bytes).unwrap();
        assert_eq!(parsed.to_binary().unwrap(), bytes);
    }

    #[test]
    fn trivial_io_round_trip() {
        let mut pio = ParameterIO::new(0, "xml");
        pio.param_root
            .objects
            .insert(Name::from_str("A"), ParameterObject::default());
        let bytes = pio.to_binary().unwrap();
        let parsed = ParameterIO::from_binary(&bytes).unwrap();
        assert_eq!(parsed, pio);
        assert_eq!(parsed.to_binary().unwrap(), bytes);
    }

    #[test]
    fn header_counters() {
        let pio = sample_pio();
        let bytes = pio.to_binary().unwrap();
        let num_lists = u32::from_le_bytes(bytes[0x18..0x1C].try_into().unwrap());
        let num_objects = u32::from_le_bytes(bytes[0x1C..0x20].try_into().unwrap());
        let num_parameters = u32::from_le_bytes(bytes[0x20..0x24].try_into().unwrap());
        assert_eq!(num_lists, 3); // root, Child, Grandchild
        assert_eq!(num_objects, 3);
        assert_eq!(num_parameters, 13);
        let file_size = u32::from_le_bytes(bytes[0xC..0x10].try_into().unwrap());
        assert_eq!(file_size as usize, bytes.len());
    }

    #[test]
    fn duplicate_buffers_are_stored_once() {
        let mut pio = ParameterIO::new(0, "xml");
        pio.param_root.objects.insert(
            Name::from_str("Dup"),
            obj(vec![
                ("First", Parameter::BufferInt(vec![1, 2, 3])),
                ("Second", Parameter::BufferInt(vec![1, 2, 3])),
            ]),
        );
        let bytes = pio.to_binary().unwrap();

        // The data section holds the four words {3, 1, 2, 3} exactly once.
        let data_section_size = u32::from_le_bytes(bytes[0x24..0x28].try_into().unwrap());
        assert_eq!(data_section_size, 16);

        // Both parameters point at the same elements.
        let parsed = ParameterIO::from_binary(&bytes).unwrap();
        let object = &parsed.param_root.objects[&Name::from_str("Dup")];
        assert_eq!(
            object.params[&Name::from_str("First")],
            object.params[&Name::from_str("Second")]
        );
        let needle = [3u32, 1, 2, 3]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect::<Vec<u8>>();
        let occurrences = bytes
            .windows(needle.len())
            .filter(|w| *w == needle.as_slice())
            .count();
        assert_eq!(occurrences, 1);
    }

    #[test]
    fn strings_are_pooled() {
        let mut pio = ParameterIO::new(0, "xml");
        pio.param_root.objects.insert(
            Name::from_str("Strings"),
            obj(vec![
                ("A", Parameter::StringRef("shared".into())),
                ("B", Parameter::StringRef("shared".into())),
                ("C", Parameter::String32("shared".into())),
                ("D", Parameter::StringRef("unique".into())),
            ]),
        );
        let bytes = pio.to_binary().unwrap();
        let needle = b"shared\0";
        let occurrences = bytes
            .windows(needle.len())
            .filter(|w| *w == needle.as_slice())
            .count();
        assert_eq!(occurrences, 1);

        let parsed = ParameterIO::from_binary(&bytes).unwrap();
        assert_eq!(parsed, pio);
    }

    #[test]
    fn many_root_objects_round_trip() {
        // More than seven root objects exercises the root collection rule.
        let mut pio = ParameterIO::new(10, "xml");
        for i in 0..10 {
            pio.param_root.objects.insert(
                Name::from_str(&format!("Object_{}", i)),
                obj(vec![("Value", Parameter::Int(i))]),
            );
        }
        for i in 0..3 {
            let mut list = ParameterList::default();
            list.objects.insert(
                Name::from_str("Inner"),
                obj(vec![("Value", Parameter::U32(i))]),
            );
            pio.param_root
                .lists
                .insert(Name::from_str(&format!("List_{}", i)), list);
        }
        let bytes = pio.to_binary().unwrap();
        let parsed = ParameterIO::from_binary(&bytes).unwrap();
        assert_eq!(parsed, pio);
        assert_eq!(parsed.to_binary().unwrap(), bytes);
    }

    #[test]
    fn aiprog_heuristic_round_trip() {
        let mut pio = ParameterIO::new(0, "xml");
        pio.param_root.objects.insert(
            DEMO_AI_ACTION_IDX,
            obj(vec![("Demo", Parameter::Int(1))]),
        );
        pio.param_root.objects.insert(
            Name::from_str("Other"),
            obj(vec![("Value", Parameter::Int(2))]),
        );
        let mut list = ParameterList::default();
        list.objects.insert(
            Name::from_str("AI_0"),
            obj(vec![("Behavior", Parameter::Int(3))]),
        );
        pio.param_root.lists.insert(Name::from_str("AI"), list);
        let bytes = pio.to_binary().unwrap();
        let parsed = ParameterIO::from_binary(&bytes).unwrap();
        assert_eq!(parsed, pio);
    }
}
