//! A library for parsing, creating and converting the binary container and
//! parameter formats used by Nintendo EAD games: SARC archives, BYML
//! documents, AAMP parameter archives and Yaz0 compression. Handles both
//! endiannesses and the file alignment requirements of common formats and
//! games like `The Legend of Zelda: Breath of the Wild`.
//!
//! Sample usage:
//!
//! ```
//! use eadkit::{Sarc, SarcWriter, Endian};
//! let mut writer = SarcWriter::new(Endian::Little);
//! writer.files.insert("Model/Npc.bfres".into(), vec![0u8; 0x40]);
//! let bytes = writer.write_to_bytes().unwrap();
//! let sarc = Sarc::new(&bytes).unwrap(); // Read a SARC from binary data
//! for file in sarc.files() { // Iterate files in SARC
//!     if let Some(name) = file.name {
//!         println!("File name: {}", name); // Print file name
//!     }
//!     println!("File size: {}", file.data.len()); // Print data size
//! }
//! ```

pub mod aamp;
mod bin_io;
pub mod byml;
mod errors;
pub mod sarc;
pub mod types;
pub mod yaml;
pub mod yaz0;

pub use byml::Byml;
pub use errors::{Error, Result};
pub use sarc::{Sarc, SarcWriter};

/// Endianness of a binary document, encoded on disk as a byte-order mark.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    /// Decodes a byte-order mark as stored in SARC and BYML-family headers.
    pub fn from_bom(bom: [u8; 2]) -> Option<Endian> {
        match bom {
            [0xFE, 0xFF] => Some(Endian::Big),
            [0xFF, 0xFE] => Some(Endian::Little),
            _ => None,
        }
    }

    pub fn bom(self) -> [u8; 2] {
        match self {
            Endian::Big => [0xFE, 0xFF],
            Endian::Little => [0xFF, 0xFE],
        }
    }
}
