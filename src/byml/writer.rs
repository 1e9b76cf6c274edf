use super::parse::{is_valid_version, node_type};
use super::Byml;
use crate::bin_io::BinWriter;
use crate::{Endian, Error, Result};
use std::collections::{BTreeSet, HashMap};

fn type_byte(node: &Byml) -> u8 {
    match node {
        Byml::Null => node_type::NULL,
        Byml::String(_) => node_type::STRING,
        Byml::Binary(_) => node_type::BINARY,
        Byml::File { .. } => node_type::FILE,
        Byml::Array(_) => node_type::ARRAY,
        Byml::Hash(_) => node_type::HASH,
        Byml::Hash32(_) => node_type::HASH32,
        Byml::Hash64(_) => node_type::HASH64,
        Byml::Bool(_) => node_type::BOOL,
        Byml::I32(_) => node_type::I32,
        Byml::F32(_) => node_type::F32,
        Byml::U32(_) => node_type::U32,
        Byml::I64(_) => node_type::I64,
        Byml::U64(_) => node_type::U64,
        Byml::F64(_) => node_type::F64,
    }
}

fn is_non_inline(node: &Byml) -> bool {
    matches!(
        node,
        Byml::Array(_)
            | Byml::Hash(_)
            | Byml::Hash32(_)
            | Byml::Hash64(_)
            | Byml::I64(_)
            | Byml::U64(_)
            | Byml::F64(_)
            | Byml::Binary(_)
            | Byml::File { .. }
    )
}

#[derive(Default)]
struct StringTable<'a> {
    strings: BTreeSet<&'a str>,
    index: HashMap<&'a str, u32>,
}

impl<'a> StringTable<'a> {
    fn add(&mut self, s: &'a str) {
        self.strings.insert(s);
    }

    fn build(&mut self) {
        self.index = self
            .strings
            .iter()
            .enumerate()
            .map(|(i, s)| (*s, i as u32))
            .collect();
    }

    fn get_index(&self, s: &str) -> u32 {
        self.index[s]
    }

    fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    fn len(&self) -> u32 {
        self.strings.len() as u32
    }
}

struct WriteContext<'a> {
    writer: BinWriter,
    hash_key_table: StringTable<'a>,
    string_table: StringTable<'a>,
    /// Offsets of already-written non-inline nodes, keyed by value, so equal
    /// subtrees are stored once.
    written_nodes: HashMap<&'a Byml, u32>,
}

impl<'a> WriteContext<'a> {
    fn new(root: &'a Byml, endian: Endian) -> Self {
        let mut ctx = WriteContext {
            writer: BinWriter::new(endian),
            hash_key_table: StringTable::default(),
            string_table: StringTable::default(),
            written_nodes: HashMap::new(),
        };
        ctx.collect_strings(root);
        ctx.hash_key_table.build();
        ctx.string_table.build();
        ctx
    }

    fn collect_strings(&mut self, node: &'a Byml) {
        match node {
            Byml::String(s) => self.string_table.add(s),
            Byml::Array(items) => {
                for item in items {
                    self.collect_strings(item);
                }
            }
            Byml::Hash(entries) => {
                for (key, value) in entries {
                    self.hash_key_table.add(key);
                    self.collect_strings(value);
                }
            }
            Byml::Hash32(entries) => {
                for value in entries.values() {
                    self.collect_strings(value);
                }
            }
            Byml::Hash64(entries) => {
                for value in entries.values() {
                    self.collect_strings(value);
                }
            }
            _ => {}
        }
    }

    /// Writes the inline payload word for a value node.
    fn write_value_node(&mut self, node: &Byml) -> Result<()> {
        match node {
            Byml::Null => self.writer.write(&0u32),
            Byml::String(s) => self.writer.write(&self.string_table.get_index(s)),
            Byml::Bool(b) => self.writer.write(&(*b as u32)),
            Byml::I32(v) => self.writer.write(v),
            Byml::F32(v) => self.writer.write(&v.to_bits()),
            Byml::U32(v) => self.writer.write(v),
            Byml::I64(v) => self.writer.write(v),
            Byml::U64(v) => self.writer.write(v),
            Byml::F64(v) => self.writer.write(&v.to_bits()),
            _ => Err(Error::TypeError("not a value node")),
        }
    }

    /// Writes the out-of-line payload of a non-container node.
    fn write_long_node(&mut self, node: &Byml) -> Result<()> {
        match node {
            Byml::I64(_) | Byml::U64(_) | Byml::F64(_) => self.write_value_node(node),
            Byml::Binary(data) => {
                self.writer.write(&(data.len() as u32))?;
                self.writer.write_bytes(data)
            }
            Byml::File { data, align } => {
                self.writer.write(&(data.len() as u32))?;
                self.writer.write(align)?;
                self.writer.write_bytes(data)
            }
            _ => Err(Error::TypeError("not an out-of-line value node")),
        }
    }

    fn write_container_node(&mut self, node: &'a Byml) -> Result<()> {
        // Slots in this container that hold offsets to nodes written later.
        let mut non_inline_nodes: Vec<(usize, &'a Byml)> = Vec::new();

        macro_rules! write_container_item {
            ($item:expr) => {{
                let item: &'a Byml = $item;
                if is_non_inline(item) {
                    non_inline_nodes.push((self.writer.tell(), item));
                    self.writer.write(&0u32)?;
                } else {
                    self.write_value_node(item)?;
                }
            }};
        }

        match node {
            Byml::Array(items) => {
                self.writer.write(&node_type::ARRAY)?;
                self.writer.write_u24(items.len() as u32)?;
                for item in items {
                    self.writer.write(&type_byte(item))?;
                }
                self.writer.align_up(4);
                for item in items {
                    write_container_item!(item);
                }
            }
            Byml::Hash(entries) => {
                self.writer.write(&node_type::HASH)?;
                self.writer.write_u24(entries.len() as u32)?;
                for (key, value) in entries {
                    self.writer.write_u24(self.hash_key_table.get_index(key))?;
                    self.writer.write(&type_byte(value))?;
                    write_container_item!(value);
                }
            }
            Byml::Hash32(entries) => {
                self.writer.write(&node_type::HASH32)?;
                self.writer.write_u24(entries.len() as u32)?;
                for (key, value) in entries {
                    self.writer.write(key)?;
                    write_container_item!(value);
                }
                for value in entries.values() {
                    self.writer.write(&type_byte(value))?;
                }
                self.writer.align_up(4);
            }
            Byml::Hash64(entries) => {
                self.writer.write(&node_type::HASH64)?;
                self.writer.write_u24(entries.len() as u32)?;
                for (key, value) in entries {
                    self.writer.write(key)?;
                    write_container_item!(value);
                }
                for value in entries.values() {
                    self.writer.write(&type_byte(value))?;
                }
                self.writer.align_up(4);
            }
            _ => return Err(Error::TypeError("not a container node")),
        }

        for (slot_offset, child) in non_inline_nodes {
            if let Some(&offset) = self.written_nodes.get(child) {
                // Equal node already written: reuse its offset.
                self.writer.run_at(slot_offset, |w| w.write(&offset))?;
            } else {
                let offset = self.writer.tell() as u32;
                self.writer.run_at(slot_offset, |w| w.write(&offset))?;
                self.written_nodes.insert(child, offset);
                if child.is_container() {
                    self.write_container_node(child)?;
                } else {
                    self.write_long_node(child)?;
                }
                self.writer.align_up(4);
            }
        }
        Ok(())
    }

    fn write_string_table(&mut self, hash_keys: bool) -> Result<()> {
        let (count, sorted): (u32, Vec<&str>) = if hash_keys {
            (
                self.hash_key_table.len(),
                self.hash_key_table.strings.iter().copied().collect(),
            )
        } else {
            (
                self.string_table.len(),
                self.string_table.strings.iter().copied().collect(),
            )
        };
        let base = self.writer.tell();
        self.writer.write(&node_type::STRING_TABLE)?;
        self.writer.write_u24(count)?;

        let offset_table_offset = self.writer.tell();
        self.writer
            .seek(offset_table_offset + 4 * (count as usize + 1));
        for (i, string) in sorted.iter().enumerate() {
            self.writer
                .write_offset_u32_at(offset_table_offset + 4 * i, base)?;
            self.writer.write_cstr(string)?;
        }
        self.writer
            .write_offset_u32_at(offset_table_offset + 4 * count as usize, base)?;
        self.writer.align_up(4);
        Ok(())
    }
}

impl Byml {
    /// Serializes the document with the given endianness and version. The
    /// root must be Null or a container node.
    pub fn to_binary(&self, endian: Endian, version: u16) -> Result<Vec<u8>> {
        if !is_valid_version(version) {
            return Err(Error::invalid("unexpected BYML version"));
        }
        let mut ctx = WriteContext::new(self, endian);

        ctx.writer.write_bytes(match endian {
            Endian::Big => b"BY",
            Endian::Little => b"YB",
        })?;
        ctx.writer.write(&version)?;
        ctx.writer.write(&0u32)?; // hash key table offset
        ctx.writer.write(&0u32)?; // string table offset
        ctx.writer.write(&0u32)?; // root node offset

        if let Byml::Null = self {
            return Ok(ctx.writer.finalize());
        }
        if !self.is_container() {
            return Err(Error::invalid(
                "only Null or container nodes can be document roots",
            ));
        }

        if !ctx.hash_key_table.is_empty() {
            ctx.writer.write_offset_u32_at(4, 0)?;
            ctx.write_string_table(true)?;
        }
        if !ctx.string_table.is_empty() {
            ctx.writer.write_offset_u32_at(8, 0)?;
            ctx.write_string_table(false)?;
        }

        ctx.writer.write_offset_u32_at(12, 0)?;
        ctx.writer.align_up(4);
        ctx.write_container_node(self)?;
        ctx.writer.align_up(4);
        Ok(ctx.writer.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Byml, Hash};
    use crate::Endian;

    fn sample_doc() -> Byml {
        let mut hash = Hash::new();
        hash.insert("name".into(), Byml::String("Lizalfos".into()));
        hash.insert("life".into(), Byml::I32(30));
        hash.insert("scale".into(), Byml::F32(1.5));
        hash.insert("flags".into(), Byml::U32(0x80000001));
        hash.insert("tags".into(), Byml::Array(vec![
            Byml::String("enemy".into()),
            Byml::String("water".into()),
            Byml::Bool(true),
            Byml::Null,
        ]));
        hash.insert("id".into(), Byml::U64(0xDEAD_BEEF_CAFE_F00D));
        hash.insert("offset".into(), Byml::I64(-4));
        hash.insert("ratio".into(), Byml::F64(0.25));
        Byml::Hash(hash)
    }

    #[test]
    fn round_trip_both_endians() {
        let doc = sample_doc();
        for endian in [Endian::Big, Endian::Little] {
            for version in [2u16, 3, 4] {
                let bytes = doc.to_binary(endian, version).unwrap();
                assert_eq!(Byml::from_binary(&bytes).unwrap(), doc, "{:?} v{}", endian, version);
            }
        }
    }

    #[test]
    fn null_document_serializes_to_bare_header() {
        let bytes = Byml::Null.to_binary(Endian::Little, 2).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..2], b"YB");
        assert_eq!(bytes[2], 2);
        assert!(bytes[4..].iter().all(|&b| b == 0));
        assert_eq!(Byml::from_binary(&bytes).unwrap(), Byml::Null);
    }

    #[test]
    fn hash_keys_are_sorted_in_table() {
        let mut hash = Hash::new();
        hash.insert("b".into(), Byml::I32(1));
        hash.insert("a".into(), Byml::I32(2));
        let bytes = Byml::Hash(hash).to_binary(Endian::Little, 2).unwrap();

        // Header, then the hash key table at 0x10.
        let table_offset = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        assert_eq!(table_offset, 0x10);
        assert_eq!(bytes[table_offset], 0xC2);
        let count = u32::from_le_bytes([bytes[table_offset + 1], bytes[table_offset + 2], bytes[table_offset + 3], 0]);
        assert_eq!(count, 2);
        let first_rel =
            u32::from_le_bytes(bytes[table_offset + 4..table_offset + 8].try_into().unwrap())
                as usize;
        assert_eq!(bytes[table_offset + first_rel], b'a');

        // Hash entries are ordered by key index.
        let doc = Byml::from_binary(&bytes).unwrap();
        let hash = doc.as_hash().unwrap();
        assert_eq!(hash.get("a").unwrap().as_i32().unwrap(), 2);
        assert_eq!(hash.get("b").unwrap().as_i32().unwrap(), 1);
    }

    #[test]
    fn string_tables_are_sorted() {
        let doc = Byml::Array(vec![
            Byml::String("zebra".into()),
            Byml::String("apple".into()),
            Byml::String("mango".into()),
        ]);
        let bytes = doc.to_binary(Endian::Big, 2).unwrap();
        let table_offset = u32::from_be_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let first_rel =
            u32::from_be_bytes(bytes[table_offset + 4..table_offset + 8].try_into().unwrap())
                as usize;
        assert_eq!(&bytes[table_offset + first_rel..table_offset + first_rel + 5], b"apple");
        assert_eq!(Byml::from_binary(&bytes).unwrap(), doc);
    }

    #[test]
    fn equal_subtrees_are_written_once() {
        let inner = Byml::Array(vec![Byml::I32(1), Byml::I32(2), Byml::I32(3)]);
        let doc = Byml::Array(vec![inner.clone(), inner.clone(), inner.clone()]);
        let bytes = doc.to_binary(Endian::Little, 2).unwrap();

        let copies = Byml::Array(vec![inner.clone()]);
        let single = copies.to_binary(Endian::Little, 2).unwrap();
        // Three references, one body: barely larger than a single copy.
        assert!(bytes.len() < single.len() + 2 * 12);
        assert_eq!(Byml::from_binary(&bytes).unwrap(), doc);
    }

    #[test]
    fn extended_nodes_round_trip() {
        let mut h32 = super::super::Hash32::new();
        h32.insert(0xDEAD, Byml::String("dead".into()));
        h32.insert(0x1, Byml::I32(5));
        let mut h64 = super::super::Hash64::new();
        h64.insert(0xAABB_CCDD_EEFF_0011, Byml::Bool(true));
        let mut hash = Hash::new();
        hash.insert("bin".into(), Byml::Binary(vec![1, 2, 3, 4, 5]));
        hash.insert(
            "file".into(),
            Byml::File {
                data: vec![9, 9, 9],
                align: 0x100,
            },
        );
        hash.insert("h32".into(), Byml::Hash32(h32));
        hash.insert("h64".into(), Byml::Hash64(h64));
        let doc = Byml::Hash(hash);
        let bytes = doc.to_binary(Endian::Little, 7).unwrap();
        assert_eq!(Byml::from_binary(&bytes).unwrap(), doc);
    }

    #[test]
    fn non_container_root_is_rejected() {
        assert!(Byml::I32(1).to_binary(Endian::Little, 2).is_err());
        assert!(Byml::Null.to_binary(Endian::Little, 0).is_err());
    }
}
