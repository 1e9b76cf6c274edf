use super::{hash_name, is_valid_alignment, SARC_MAGIC, SFAT_MAGIC, SFNT_MAGIC};
use crate::bin_io::BinReader;
use crate::{Endian, Error, Result};
use binread::BinRead;
use binwrite::BinWrite;
use derivative::Derivative;
use std::borrow::Cow;

/// Size = 0x14
#[derive(Debug, Eq, PartialEq, Copy, Clone, BinRead, BinWrite)]
pub(crate) struct ResHeader {
    pub magic: [u8; 4],
    pub header_size: u16,
    pub bom: [u8; 2],
    pub file_size: u32,
    pub data_offset: u32,
    pub version: u16,
    pub reserved: u16,
}

/// Size = 0x0C
#[derive(Debug, Eq, PartialEq, Copy, Clone, BinRead, BinWrite)]
pub(crate) struct ResFatHeader {
    pub magic: [u8; 4],
    pub header_size: u16,
    pub num_files: u16,
    pub hash_multiplier: u32,
}

/// Size = 0x10
#[derive(Debug, Eq, PartialEq, Copy, Clone, BinRead, BinWrite)]
pub(crate) struct ResFatEntry {
    pub name_hash: u32,
    pub rel_name_opt_offset: u32,
    pub data_begin: u32,
    pub data_end: u32,
}

/// Size = 0x8
#[derive(Debug, Eq, PartialEq, Copy, Clone, BinRead, BinWrite)]
pub(crate) struct ResFntHeader {
    pub magic: [u8; 4],
    pub header_size: u16,
    pub reserved: u16,
}

/// A file in a SARC archive. The data is a view into the archive buffer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct File<'a> {
    /// File name. May be empty for archives without a name table.
    pub name: Option<&'a str>,
    /// File data.
    pub data: &'a [u8],
}

/// A simple SARC archive reader.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Sarc<'a> {
    num_files: u16,
    entries_offset: u32,
    hash_multiplier: u32,
    data_offset: u32,
    names_offset: u32,
    endian: Endian,
    #[derivative(Debug = "ignore")]
    data: Cow<'a, [u8]>,
}

impl PartialEq for Sarc<'_> {
    /// Returns true if and only if the raw archive data is identical.
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<'a> Sarc<'a> {
    /// Parses a SARC archive from binary data.
    pub fn new<T: Into<Cow<'a, [u8]>>>(data: T) -> Result<Sarc<'a>> {
        let data = data.into();
        if data.len() < 0x14 + 0x0C + 0x08 {
            return Err(Error::invalid("SARC too small"));
        }

        let endian = Endian::from_bom([data[6], data[7]])
            .ok_or_else(|| Error::invalid("invalid SARC BOM"))?;
        let mut reader = BinReader::new(&data, endian);

        let header: ResHeader = reader.read()?;
        if header.magic != SARC_MAGIC {
            return Err(Error::invalid("bad SARC magic"));
        }
        if header.version != 0x0100 {
            return Err(Error::invalid("unexpected SARC version"));
        }
        if header.header_size != 0x14 {
            return Err(Error::invalid("unexpected SARC header size"));
        }

        let fat_header: ResFatHeader = reader.read()?;
        if fat_header.magic != SFAT_MAGIC {
            return Err(Error::invalid("bad SFAT magic"));
        }
        if fat_header.header_size != 0x0C {
            return Err(Error::invalid("unexpected SFAT header size"));
        }
        if fat_header.num_files >> 0xE != 0 {
            return Err(Error::invalid("too many files in SARC"));
        }

        let num_files = fat_header.num_files;
        let entries_offset = reader.tell() as u32;
        let hash_multiplier = fat_header.hash_multiplier;
        let data_offset = header.data_offset;

        let fnt_header_offset = entries_offset as usize + 0x10 * num_files as usize;
        reader.seek(fnt_header_offset);
        let fnt_header: ResFntHeader = reader.read()?;
        if fnt_header.magic != SFNT_MAGIC {
            return Err(Error::invalid("bad SFNT magic"));
        }
        if fnt_header.header_size != 0x08 {
            return Err(Error::invalid("unexpected SFNT header size"));
        }

        let names_offset = reader.tell() as u32;
        if data_offset < names_offset {
            return Err(Error::invalid("invalid name table offset"));
        }
        if data_offset as usize > data.len() {
            return Err(Error::invalid("invalid data offset"));
        }
        Ok(Sarc {
            num_files,
            entries_offset,
            hash_multiplier,
            data_offset,
            names_offset,
            endian,
            data,
        })
    }

    /// Get the number of files that are stored in the archive.
    pub fn file_count(&self) -> usize {
        self.num_files as usize
    }

    /// Get the offset to the beginning of file data.
    pub fn data_offset(&self) -> usize {
        self.data_offset as usize
    }

    /// Get the archive endianness.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    fn entry_at(&self, index: usize) -> Result<ResFatEntry> {
        let mut reader = BinReader::new(&self.data, self.endian);
        reader.read_at(self.entries_offset as usize + 0x10 * index)
    }

    /// Get a file by name, using binary search over the name hashes.
    pub fn get_file(&self, name: &str) -> Result<Option<File<'_>>> {
        if self.num_files == 0 {
            return Ok(None);
        }
        let needle = hash_name(self.hash_multiplier, name);
        let mut a = 0i64;
        let mut b = self.num_files as i64 - 1;
        while a <= b {
            let m = (a + b) / 2;
            let hash = self.entry_at(m as usize)?.name_hash;
            if needle < hash {
                b = m - 1;
            } else if needle > hash {
                a = m + 1;
            } else {
                return Ok(Some(self.file_at(m as usize)?));
            }
        }
        Ok(None)
    }

    /// Get a file by index. Errors if `index >= file_count()`.
    pub fn file_at(&self, index: usize) -> Result<File<'_>> {
        if index >= self.num_files as usize {
            return Err(Error::invalid("file index out of range"));
        }
        let entry = self.entry_at(index)?;

        let name = if entry.rel_name_opt_offset != 0 {
            let name_offset =
                self.names_offset as usize + (entry.rel_name_opt_offset & 0xFFFFFF) as usize * 4;
            let slice = self
                .data
                .get(name_offset..)
                .ok_or_else(|| Error::invalid("name offset out of range"))?;
            let end = slice
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| Error::invalid("unterminated file name"))?;
            Some(
                std::str::from_utf8(&slice[..end])
                    .map_err(|_| Error::invalid("file name is not valid UTF-8"))?,
            )
        } else {
            None
        };

        let begin = (self.data_offset + entry.data_begin) as usize;
        let end = (self.data_offset + entry.data_end) as usize;
        let data = self
            .data
            .get(begin..end)
            .ok_or_else(|| Error::invalid("file data out of range"))?;
        Ok(File { name, data })
    }

    /// Returns an iterator over the contained files.
    pub fn files(&self) -> impl Iterator<Item = File<'_>> {
        (0..self.num_files).flat_map(move |i| self.file_at(i as usize).ok())
    }

    /// Guess the minimum data alignment for files that are stored in the
    /// archive, from the GCD of all file offsets.
    pub fn guess_min_alignment(&self) -> usize {
        const MIN_ALIGNMENT: u32 = 4;
        let mut gcd = MIN_ALIGNMENT;
        for i in 0..self.num_files as usize {
            if let Ok(entry) = self.entry_at(i) {
                gcd = num::integer::gcd(gcd, self.data_offset + entry.data_begin);
            }
        }
        if !is_valid_alignment(gcd as usize) {
            return MIN_ALIGNMENT as usize;
        }
        gcd as usize
    }

    /// Returns true if both archives contain the same files.
    pub fn are_files_equal(sarc1: &Sarc, sarc2: &Sarc) -> bool {
        if sarc1.file_count() != sarc2.file_count() {
            return false;
        }
        sarc1
            .files()
            .zip(sarc2.files())
            .all(|(file1, file2)| file1 == file2)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Endian, Sarc, SarcWriter};

    fn sample_archive(endian: Endian) -> Vec<u8> {
        let mut writer = SarcWriter::new(endian);
        writer
            .files
            .insert("Actor/Pack/Npc.sbactorpack".into(), vec![1, 2, 3, 4]);
        writer.files.insert("Model/Npc.bfres".into(), b"model data".to_vec());
        writer.files.insert("readme.txt".into(), b"hi".to_vec());
        writer.write_to_bytes().unwrap()
    }

    #[test]
    fn parse_round_trip_both_endians() {
        for endian in [Endian::Big, Endian::Little] {
            let data = sample_archive(endian);
            let sarc = Sarc::new(data.as_slice()).unwrap();
            assert_eq!(sarc.endian(), endian);
            assert_eq!(sarc.file_count(), 3);
            assert_eq!(
                sarc.get_file("Model/Npc.bfres").unwrap().unwrap().data,
                b"model data"
            );
            assert_eq!(
                sarc.get_file("readme.txt").unwrap().unwrap().data,
                b"hi"
            );
            assert!(sarc.get_file("missing").unwrap().is_none());
        }
    }

    #[test]
    fn entries_are_hash_sorted() {
        let data = sample_archive(Endian::Little);
        let sarc = Sarc::new(data.as_slice()).unwrap();
        let hashes: Vec<u32> = (0..sarc.file_count())
            .map(|i| sarc.entry_at(i).unwrap().name_hash)
            .collect();
        let mut sorted = hashes.clone();
        sorted.sort_unstable();
        assert_eq!(hashes, sorted);
    }

    #[test]
    fn rejects_garbage() {
        assert!(Sarc::new(&b"not an archive at all, just bytes"[..]).is_err());
        assert!(Sarc::new(&b"SA"[..]).is_err());
    }
}
