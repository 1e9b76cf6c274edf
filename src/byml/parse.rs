use super::{Byml, Hash, Hash32, Hash64};
use crate::bin_io::{align_up, BinReader};
use crate::{Endian, Error, Result};

pub(crate) mod node_type {
    pub const HASH32: u8 = 0x20;
    pub const HASH64: u8 = 0x21;
    pub const STRING: u8 = 0xA0;
    pub const BINARY: u8 = 0xA1;
    pub const FILE: u8 = 0xA2;
    pub const ARRAY: u8 = 0xC0;
    pub const HASH: u8 = 0xC1;
    pub const STRING_TABLE: u8 = 0xC2;
    pub const PATH_ARRAY: u8 = 0xC3;
    pub const RELOCATED_STRING_TABLE: u8 = 0xC5;
    pub const BOOL: u8 = 0xD0;
    pub const I32: u8 = 0xD1;
    pub const F32: u8 = 0xD2;
    pub const U32: u8 = 0xD3;
    pub const I64: u8 = 0xD4;
    pub const U64: u8 = 0xD5;
    pub const F64: u8 = 0xD6;
    pub const NULL: u8 = 0xFF;
}

pub(crate) fn is_container_type(ty: u8) -> bool {
    matches!(
        ty,
        node_type::ARRAY | node_type::HASH | node_type::HASH32 | node_type::HASH64
    )
}

pub(crate) fn is_valid_version(version: u16) -> bool {
    (1..=10).contains(&version)
}

const MAX_DEPTH: u32 = 128;

/// A lazy view of a string table node. The table is only touched when a
/// string is actually referenced, so documents with dangling table offsets
/// but no string nodes still parse.
struct StringTableParser {
    offset: u32,
}

impl StringTableParser {
    fn new(offset: u32) -> Self {
        StringTableParser { offset }
    }

    fn get_string(&self, reader: &mut BinReader, index: u32) -> Result<String> {
        if self.offset == 0 {
            return Err(Error::invalid("document has no string table"));
        }
        let offset = self.offset as usize;
        let ty: u8 = reader.read_at(offset)?;
        let num_entries = reader.read_u24()?;
        if ty != node_type::STRING_TABLE || num_entries == 0 {
            return Err(Error::invalid("invalid string table"));
        }
        if index >= num_entries {
            return Err(Error::invalid("string table index out of range"));
        }
        let rel_offset: u32 = reader.read_at(offset + 4 + 4 * index as usize)?;
        // Safe even for the last entry: the offset array has N+1 elements.
        let next_rel_offset: u32 = reader.read()?;
        if next_rel_offset < rel_offset {
            return Err(Error::invalid("string table offsets are inconsistent"));
        }
        reader.read_string(
            offset + rel_offset as usize,
            Some((next_rel_offset - rel_offset) as usize),
        )
    }
}

pub(crate) struct Parser<'a> {
    reader: BinReader<'a>,
    hash_key_table: StringTableParser,
    string_table: StringTableParser,
    root_node_offset: u32,
}

impl<'a> Parser<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        if data.len() < 0x10 {
            return Err(Error::invalid("BYML document too small"));
        }
        let endian = match &data[0..2] {
            b"BY" => Endian::Big,
            b"YB" => Endian::Little,
            _ => return Err(Error::invalid("bad BYML magic")),
        };
        let mut reader = BinReader::new(data, endian);
        let version: u16 = reader.read_at(2)?;
        if !is_valid_version(version) {
            return Err(Error::invalid("unexpected BYML version"));
        }
        let hash_key_table_offset: u32 = reader.read_at(4)?;
        let string_table_offset: u32 = reader.read_at(8)?;
        let root_node_offset: u32 = reader.read_at(12)?;
        Ok(Parser {
            reader,
            hash_key_table: StringTableParser::new(hash_key_table_offset),
            string_table: StringTableParser::new(string_table_offset),
            root_node_offset,
        })
    }

    pub fn parse(&mut self) -> Result<Byml> {
        if self.root_node_offset == 0 {
            return Ok(Byml::Null);
        }
        self.parse_container_node(self.root_node_offset as usize, 0)
    }

    fn parse_value_node(&mut self, offset: usize, ty: u8) -> Result<Byml> {
        let raw: u32 = self.reader.read_at(offset)?;
        match ty {
            node_type::STRING => Ok(Byml::String(
                self.string_table.get_string(&mut self.reader, raw)?,
            )),
            node_type::BINARY => {
                let size: u32 = self.reader.read_at(raw as usize)?;
                Ok(Byml::Binary(self.read_raw(raw as usize + 4, size as usize)?))
            }
            node_type::FILE => {
                let size: u32 = self.reader.read_at(raw as usize)?;
                let align: u32 = self.reader.read()?;
                Ok(Byml::File {
                    data: self.read_raw(raw as usize + 8, size as usize)?,
                    align,
                })
            }
            node_type::BOOL => Ok(Byml::Bool(raw != 0)),
            node_type::I32 => Ok(Byml::I32(raw as i32)),
            node_type::F32 => Ok(Byml::F32(f32::from_bits(raw))),
            node_type::U32 => Ok(Byml::U32(raw)),
            node_type::I64 => Ok(Byml::I64(self.read_long(raw)? as i64)),
            node_type::U64 => Ok(Byml::U64(self.read_long(raw)?)),
            node_type::F64 => Ok(Byml::F64(f64::from_bits(self.read_long(raw)?))),
            node_type::NULL => Ok(Byml::Null),
            node_type::PATH_ARRAY => Err(Error::Unsupported("BYML path nodes")),
            node_type::RELOCATED_STRING_TABLE => {
                Err(Error::Unsupported("BYML relocated string tables"))
            }
            _ => Err(Error::invalid("unexpected value node type")),
        }
    }

    fn read_raw(&mut self, offset: usize, size: usize) -> Result<Vec<u8>> {
        self.reader
            .data()
            .get(offset..offset + size)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::invalid("binary node data out of range"))
    }

    fn read_long(&mut self, offset: u32) -> Result<u64> {
        self.reader.read_at(offset as usize)
    }

    fn parse_container_child_node(&mut self, offset: usize, ty: u8, depth: u32) -> Result<Byml> {
        if is_container_type(ty) {
            let container_offset: u32 = self.reader.read_at(offset)?;
            self.parse_container_node(container_offset as usize, depth)
        } else {
            self.parse_value_node(offset, ty)
        }
    }

    fn parse_array_node(&mut self, offset: usize, size: usize, depth: u32) -> Result<Byml> {
        let mut result = Vec::with_capacity(size.min(0x10000));
        let values_offset = offset + 4 + align_up(size, 4);
        for i in 0..size {
            let ty: u8 = self.reader.read_at(offset + 4 + i)?;
            result.push(self.parse_container_child_node(values_offset + 4 * i, ty, depth)?);
        }
        Ok(Byml::Array(result))
    }

    fn parse_hash_node(&mut self, offset: usize, size: usize, depth: u32) -> Result<Byml> {
        let mut result = Hash::new();
        for i in 0..size {
            let entry_offset = offset + 4 + 8 * i;
            let name_index = self.reader.read_u24_at(entry_offset)?;
            let ty: u8 = self.reader.read()?;
            let key = self.hash_key_table.get_string(&mut self.reader, name_index)?;
            result.insert(key, self.parse_container_child_node(entry_offset + 4, ty, depth)?);
        }
        Ok(Byml::Hash(result))
    }

    fn parse_hash32_node(&mut self, offset: usize, size: usize, depth: u32) -> Result<Byml> {
        let mut result = Hash32::new();
        let types_offset = offset + 4 + 8 * size;
        for i in 0..size {
            let entry_offset = offset + 4 + 8 * i;
            let key: u32 = self.reader.read_at(entry_offset)?;
            let ty: u8 = self.reader.read_at(types_offset + i)?;
            result.insert(key, self.parse_container_child_node(entry_offset + 4, ty, depth)?);
        }
        Ok(Byml::Hash32(result))
    }

    fn parse_hash64_node(&mut self, offset: usize, size: usize, depth: u32) -> Result<Byml> {
        let mut result = Hash64::new();
        let types_offset = offset + 4 + 12 * size;
        for i in 0..size {
            let entry_offset = offset + 4 + 12 * i;
            let key: u64 = self.reader.read_at(entry_offset)?;
            let ty: u8 = self.reader.read_at(types_offset + i)?;
            result.insert(key, self.parse_container_child_node(entry_offset + 8, ty, depth)?);
        }
        Ok(Byml::Hash64(result))
    }

    fn parse_container_node(&mut self, offset: usize, depth: u32) -> Result<Byml> {
        if depth > MAX_DEPTH {
            return Err(Error::invalid("BYML nesting is too deep"));
        }
        let ty: u8 = self.reader.read_at(offset)?;
        let num_entries = self.reader.read_u24()?;
        match ty {
            node_type::ARRAY => self.parse_array_node(offset, num_entries as usize, depth + 1),
            node_type::HASH => self.parse_hash_node(offset, num_entries as usize, depth + 1),
            node_type::HASH32 => self.parse_hash32_node(offset, num_entries as usize, depth + 1),
            node_type::HASH64 => self.parse_hash64_node(offset, num_entries as usize, depth + 1),
            _ => Err(Error::invalid("container node must be an array or hash")),
        }
    }
}

impl Byml {
    /// Loads a document from binary data.
    pub fn from_binary(data: &[u8]) -> Result<Byml> {
        Parser::new(data)?.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_document() {
        let data = b"YB\x02\x00\x10\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00";
        assert_eq!(Byml::from_binary(data).unwrap(), Byml::Null);
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        assert!(Byml::from_binary(b"XX\x02\x00" as &[u8]).is_err());
        let data = b"YB\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00";
        assert!(Byml::from_binary(data).is_err());
        let data = b"YB\x0B\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00";
        assert!(Byml::from_binary(data).is_err());
    }

    #[test]
    fn rejects_truncation() {
        assert!(Byml::from_binary(b"YB\x02\x00").is_err());
        // Root offset pointing past the end.
        let data = b"YB\x02\x00\x00\x00\x00\x00\x00\x00\x00\x00\xF0\x00\x00\x00";
        assert!(Byml::from_binary(data).is_err());
    }
}
