use super::parse::{ResFatEntry, ResFatHeader, ResFntHeader, ResHeader};
use super::{hash_name, is_valid_alignment, HASH_MULTIPLIER, SARC_MAGIC, SFAT_MAGIC, SFNT_MAGIC};
use crate::bin_io::{align_up, BinReader, BinWriter};
use crate::{Endian, Error, Result, Sarc};
use cached::proc_macro::cached;
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

const FACTORY_INFO: &str = include_str!("../../data/botw_resource_factory_info.tsv");
const AGLENV_INFO: &str = include_str!("../../data/aglenv_file_info.json");

#[cached]
fn botw_factory_names() -> HashSet<&'static str> {
    FACTORY_INFO
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| line.split('\t').next().unwrap())
        .collect()
}

#[derive(Deserialize)]
#[allow(dead_code)]
struct AglEnvInfo {
    id: u16,
    i0: u16,
    ext: String,
    bext: String,
    s: Option<String>,
    align: i32,
    system: String,
    desc: String,
}

#[cached]
fn agl_env_alignment_requirements() -> Vec<(String, usize)> {
    let mut info: Vec<AglEnvInfo> =
        serde_json::from_str(AGLENV_INFO).expect("embedded aglenv info must parse");
    let mut requirements = Vec::new();
    for entry in info.iter_mut() {
        if entry.align < 0 {
            continue;
        }
        let align = entry.align as usize;
        requirements.push((std::mem::take(&mut entry.ext), align));
        requirements.push((std::mem::take(&mut entry.bext), align));
    }
    requirements
}

/// Builds SARC archives, handling the alignment requirements of common file
/// formats. Files are sorted by name hash on write so the archive supports
/// binary-search lookups.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SarcWriter {
    endian: Endian,
    legacy: bool,
    hash_multiplier: u32,
    min_alignment: usize,
    alignment_map: HashMap<String, usize>,
    /// Files to store, by name. Insertion order is irrelevant; the writer
    /// sorts by name hash.
    pub files: IndexMap<String, Vec<u8>>,
}

impl SarcWriter {
    pub fn new(endian: Endian) -> SarcWriter {
        SarcWriter {
            endian,
            legacy: false,
            hash_multiplier: HASH_MULTIPLIER,
            min_alignment: 4,
            alignment_map: HashMap::new(),
            files: IndexMap::new(),
        }
    }

    /// Builds a writer from an existing archive, keeping its endianness and
    /// guessed minimum alignment. Nameless files are dropped.
    pub fn from_sarc(sarc: &Sarc) -> SarcWriter {
        let mut writer = SarcWriter::new(sarc.endian());
        writer.min_alignment = sarc.guess_min_alignment();
        writer.files.extend(
            sarc.files()
                .filter_map(|f| f.name.map(|name| (name.to_owned(), f.data.to_vec()))),
        );
        writer
    }

    /// In legacy mode (games with an older engine), nested SARC files are
    /// forced to 0x2000 alignment and format detection always runs.
    pub fn set_legacy_mode(&mut self, value: bool) {
        self.legacy = value;
    }

    pub fn set_min_alignment(&mut self, alignment: usize) -> Result<()> {
        if !is_valid_alignment(alignment) {
            return Err(Error::Arithmetic("alignment must be a power of two"));
        }
        self.min_alignment = alignment;
        Ok(())
    }

    pub fn add_alignment_requirement(&mut self, ext: String, alignment: usize) -> Result<()> {
        if !is_valid_alignment(alignment) {
            return Err(Error::Arithmetic("alignment must be a power of two"));
        }
        self.alignment_map.insert(ext, alignment);
        Ok(())
    }

    fn add_default_alignments(&mut self) -> Result<()> {
        for (ext, alignment) in agl_env_alignment_requirements() {
            self.add_alignment_requirement(ext, alignment)?;
        }
        // BotW: Pack/Bootup.pack/Env/env.sgenvb/postfx/*.bksky (AAMP)
        self.add_alignment_requirement("ksky".to_owned(), 8)?;
        self.add_alignment_requirement("bksky".to_owned(), 8)?;
        // BotW: Pack/TitleBG.pack/Terrain/System/tera_resource.*.ssarc
        self.add_alignment_requirement("gtx".to_owned(), 0x2000)?;
        self.add_alignment_requirement("sharcb".to_owned(), 0x1000)?;
        self.add_alignment_requirement("sharc".to_owned(), 0x1000)?;
        // BotW: Pack/Bootup.pack/Layout/MultiFilter.ssarc/*.baglmf (AAMP)
        self.add_alignment_requirement("baglmf".to_owned(), 0x80)?;
        // Font/*.bfarc/.bffnt
        self.add_alignment_requirement(
            "bffnt".to_owned(),
            match self.endian {
                Endian::Big => 0x2000,
                Endian::Little => 0x1000,
            },
        )?;
        Ok(())
    }

    /// Writes the archive to a byte buffer.
    pub fn write_to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut writer = BinWriter::new(self.endian);
        self.write(&mut writer)?;
        Ok(writer.finalize())
    }

    fn write(&mut self, writer: &mut BinWriter) -> Result<()> {
        let multiplier = self.hash_multiplier;
        self.files.sort_by(move |name, _, name2, _| {
            Ord::cmp(&hash_name(multiplier, name), &hash_name(multiplier, name2))
        });

        writer.seek(0x14);
        writer.write(&ResFatHeader {
            magic: SFAT_MAGIC,
            header_size: 0x0C,
            num_files: self.files.len() as u16,
            hash_multiplier: self.hash_multiplier,
        })?;

        self.add_default_alignments()?;
        let mut alignments: Vec<usize> = Vec::with_capacity(self.files.len());
        {
            let mut rel_string_offset = 0u32;
            let mut rel_data_offset = 0usize;
            for (name, data) in self.files.iter() {
                let alignment = self.alignment_for_file(name, data);
                alignments.push(alignment);

                let offset = align_up(rel_data_offset, alignment);
                writer.write(&ResFatEntry {
                    name_hash: hash_name(self.hash_multiplier, name),
                    rel_name_opt_offset: 1 << 24 | rel_string_offset / 4,
                    data_begin: offset as u32,
                    data_end: (offset + data.len()) as u32,
                })?;

                rel_data_offset = offset + data.len();
                rel_string_offset += align_up(name.len() + 1, 4) as u32;
            }
        }

        writer.write(&ResFntHeader {
            magic: SFNT_MAGIC,
            header_size: 0x08,
            reserved: 0,
        })?;
        for (name, _) in self.files.iter() {
            writer.write_cstr(name)?;
            writer.align_up(4);
        }

        let required_alignment = alignments
            .iter()
            .fold(1, |acc, alignment| num::integer::lcm(acc, *alignment));
        writer.align_up(required_alignment);
        let data_offset_begin = writer.tell() as u32;
        for ((_, data), alignment) in self.files.iter().zip(alignments.iter()) {
            writer.align_up(*alignment);
            writer.write_bytes(data)?;
        }

        let file_size = writer.tell() as u32;
        writer.seek(0);
        writer.write(&ResHeader {
            magic: SARC_MAGIC,
            header_size: 0x14,
            bom: self.endian.bom(),
            file_size,
            data_offset: data_offset_begin,
            version: 0x0100,
            reserved: 0,
        })?;
        writer.seek(file_size as usize);
        Ok(())
    }

    pub(crate) fn is_file_sarc(data: &[u8]) -> bool {
        data.len() >= 0x20
            && (&data[0..4] == b"SARC" || (&data[0..4] == b"Yaz0" && &data[0x11..0x15] == b"SARC"))
    }

    /// Alignment for files with an `nn::util::BinaryFileHeader`.
    fn alignment_for_new_binary_file(data: &[u8]) -> usize {
        if data.len() <= 0x20 {
            return 1;
        }
        let endian = match Endian::from_bom([data[0xC], data[0xD]]) {
            Some(endian) => endian,
            None => return 1,
        };
        let mut reader = BinReader::new(data, endian);
        let file_size: u32 = match reader.read_at(0x1C) {
            Ok(size) => size,
            Err(_) => return 1,
        };
        if file_size as usize != data.len() {
            return 1;
        }
        1usize << data[0xE].min(31)
    }

    fn alignment_for_cafe_bflim(data: &[u8]) -> usize {
        if data.len() <= 0x28 || &data[data.len() - 0x28..data.len() - 0x24] != b"FLIM" {
            return 1;
        }
        u16::from_be_bytes([data[data.len() - 8], data[data.len() - 7]]) as usize
    }

    fn alignment_for_file(&self, name: &str, data: &[u8]) -> usize {
        let ext = match name.rfind('.') {
            Some(idx) => &name[idx + 1..],
            None => "",
        };
        let mut alignment = self.min_alignment;
        if let Some(requirement) = self.alignment_map.get(ext) {
            alignment = num::integer::lcm(alignment, *requirement);
        }
        if self.legacy && Self::is_file_sarc(data) {
            alignment = num::integer::lcm(alignment, 0x2000);
        }
        if self.legacy || !botw_factory_names().contains(ext) {
            alignment = num::integer::lcm(alignment, Self::alignment_for_new_binary_file(data));
            if let Endian::Big = self.endian {
                alignment = num::integer::lcm(alignment, Self::alignment_for_cafe_bflim(data));
            }
        }
        alignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_from_extension_table() {
        let mut writer = SarcWriter::new(Endian::Little);
        writer.files.insert("a.txt".into(), b"A".to_vec());
        writer.files.insert("b.bksky".into(), b"B".to_vec());
        let bytes = writer.write_to_bytes().unwrap();

        let sarc = Sarc::new(bytes.as_slice()).unwrap();
        // Headers: 0x14 + 0xC + 2 * 0x10 + 0x8 + name table; data is aligned
        // to the archive-wide requirement of 8 that bksky mandates.
        assert!(sarc.data_offset() >= 0x20 + 2 * 0x10 + 0x8);
        assert_eq!(sarc.data_offset() % 8, 0);
        assert_eq!(sarc.get_file("b.bksky").unwrap().unwrap().data, b"B");
        assert_eq!(sarc.get_file("a.txt").unwrap().unwrap().data, b"A");
    }

    #[test]
    fn per_file_alignment_invariant() {
        let mut writer = SarcWriter::new(Endian::Little);
        writer.files.insert("one.txt".into(), vec![1]);
        writer.files.insert("two.bksky".into(), vec![2; 3]);
        writer.files.insert("three.sharc".into(), vec![3; 17]);
        let bytes = writer.write_to_bytes().unwrap();
        let sarc = Sarc::new(bytes.as_slice()).unwrap();

        for (name, required) in [("one.txt", 4), ("two.bksky", 8), ("three.sharc", 0x1000)] {
            let file = sarc.get_file(name).unwrap().unwrap();
            let offset = file.data.as_ptr() as usize - bytes.as_slice().as_ptr() as usize;
            assert_eq!(offset % required, 0, "{} not aligned to {:#x}", name, required);
        }
    }

    #[test]
    fn round_trip_preserves_file_set() {
        let mut writer = SarcWriter::new(Endian::Big);
        for i in 0..20 {
            writer
                .files
                .insert(format!("dir/file_{}.bin", i), vec![i as u8; (i * 7) % 50 + 1]);
        }
        let bytes = writer.write_to_bytes().unwrap();
        let sarc = Sarc::new(bytes.as_slice()).unwrap();
        assert_eq!(sarc.file_count(), 20);
        for i in 0..20usize {
            let file = sarc.get_file(&format!("dir/file_{}.bin", i)).unwrap().unwrap();
            assert_eq!(file.data, vec![i as u8; (i * 7) % 50 + 1].as_slice());
        }
    }

    #[test]
    fn rebuild_is_stable() {
        let mut writer = SarcWriter::new(Endian::Little);
        writer.files.insert("x.txt".into(), b"xxx".to_vec());
        writer.files.insert("y.txt".into(), b"yy".to_vec());
        let first = writer.write_to_bytes().unwrap();

        let sarc = Sarc::new(first.as_slice()).unwrap();
        let mut rebuilt = SarcWriter::from_sarc(&sarc);
        let second = rebuilt.write_to_bytes().unwrap();
        assert_eq!(first, second);

        let resarc = Sarc::new(second.as_slice()).unwrap();
        assert!(Sarc::are_files_equal(&sarc, &resarc));
    }

    #[test]
    fn legacy_mode_aligns_nested_archives() {
        let mut inner = SarcWriter::new(Endian::Big);
        inner.files.insert("f.txt".into(), b"f".to_vec());
        let nested = inner.write_to_bytes().unwrap();
        assert!(SarcWriter::is_file_sarc(&nested));

        let mut writer = SarcWriter::new(Endian::Big);
        writer.set_legacy_mode(true);
        writer.files.insert("nested.pack".into(), nested.clone());
        let bytes = writer.write_to_bytes().unwrap();
        let sarc = Sarc::new(bytes.as_slice()).unwrap();
        let file = sarc.get_file("nested.pack").unwrap().unwrap();
        let offset = file.data.as_ptr() as usize - bytes.as_slice().as_ptr() as usize;
        assert_eq!(offset % 0x2000, 0);
    }

    #[test]
    fn new_binary_file_header_detection() {
        // A fake nn::util::BinaryFileHeader: BOM at 0xC, alignment shift at
        // 0xE, file size at 0x1C.
        let mut data = vec![0u8; 0x40];
        data[0xC] = 0xFF;
        data[0xD] = 0xFE;
        data[0xE] = 5; // 1 << 5 = 0x20
        data[0x1C..0x20].copy_from_slice(&(0x40u32).to_le_bytes());
        assert_eq!(SarcWriter::alignment_for_new_binary_file(&data), 0x20);

        // Wrong size field: not a binary file header.
        data[0x1C] = 0;
        data[0x1D] = 0;
        assert_eq!(SarcWriter::alignment_for_new_binary_file(&data), 1);
    }

    #[test]
    fn min_alignment_must_be_pow2() {
        let mut writer = SarcWriter::new(Endian::Little);
        assert!(writer.set_min_alignment(3).is_err());
        assert!(writer.set_min_alignment(8).is_ok());
    }
}
