use super::{Name, Parameter, ParameterIO, ParameterList, ParameterObject, ROOT_KEY};
use crate::bin_io::BinReader;
use crate::types::{Color4f, Curve, FixedSafeString, Quatf, Vector2f, Vector3f, Vector4f};
use crate::{Endian, Error, Result};

pub(crate) const HEADER_SIZE: usize = 0x30;
pub(crate) const FLAG_LITTLE_ENDIAN: u32 = 1 << 0;
pub(crate) const FLAG_UTF8: u32 = 1 << 1;

const MAX_DEPTH: u32 = 128;

struct Parser<'a> {
    reader: BinReader<'a>,
}

impl<'a> Parser<'a> {
    fn new(data: &'a [u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::invalid("AAMP header too small"));
        }
        let mut reader = BinReader::new(data, Endian::Little);
        let magic: [u8; 4] = reader.read()?;
        if magic != *b"AAMP" {
            return Err(Error::invalid("bad AAMP magic"));
        }
        let version: u32 = reader.read()?;
        if version != 2 {
            return Err(Error::invalid(
                "only version 2 parameter archives are supported",
            ));
        }
        let flags: u32 = reader.read()?;
        if flags & FLAG_LITTLE_ENDIAN == 0 {
            return Err(Error::invalid(
                "only little endian parameter archives are supported",
            ));
        }
        if flags & FLAG_UTF8 == 0 {
            return Err(Error::invalid("only UTF-8 parameter archives are supported"));
        }
        Ok(Parser { reader })
    }

    fn parse(&mut self) -> Result<ParameterIO> {
        let pio_version: u32 = self.reader.read_at(0x10)?;
        let offset_to_pio: u32 = self.reader.read_at(0x14)?;
        let data_type = self.reader.read_string(HEADER_SIZE, None)?;

        let (root_name, root) = self.parse_list(HEADER_SIZE + offset_to_pio as usize, 0)?;
        if root_name != ROOT_KEY {
            return Err(Error::invalid("no param_root"));
        }
        Ok(ParameterIO {
            version: pio_version,
            data_type,
            param_root: root,
        })
    }

    fn parse_parameter(&mut self, offset: usize) -> Result<(Name, Parameter)> {
        let crc32: u32 = self.reader.read_at(offset)?;
        let data_rel = self.reader.read_u24()?;
        let type_byte: u8 = self.reader.read()?;
        let data_offset = offset + data_rel as usize * 4;

        let value = match type_byte {
            0 => Parameter::Bool(self.reader.read_at::<u32>(data_offset)? != 0),
            // Float parameters can be scaled by the engine at load time;
            // the raw value is kept as is.
            1 => Parameter::F32(self.read_f32(data_offset)?),
            2 => Parameter::Int(self.reader.read_at(data_offset)?),
            3 => Parameter::Vec2(Vector2f {
                x: self.read_f32(data_offset)?,
                y: self.read_next_f32()?,
            }),
            4 => Parameter::Vec3(Vector3f {
                x: self.read_f32(data_offset)?,
                y: self.read_next_f32()?,
                z: self.read_next_f32()?,
            }),
            5 => Parameter::Vec4(Vector4f {
                x: self.read_f32(data_offset)?,
                y: self.read_next_f32()?,
                z: self.read_next_f32()?,
                t: self.read_next_f32()?,
            }),
            6 => Parameter::Color(Color4f {
                r: self.read_f32(data_offset)?,
                g: self.read_next_f32()?,
                b: self.read_next_f32()?,
                a: self.read_next_f32()?,
            }),
            7 => Parameter::String32(FixedSafeString::new(
                &self.reader.read_string(data_offset, Some(32))?,
            )),
            8 => Parameter::String64(FixedSafeString::new(
                &self.reader.read_string(data_offset, Some(64))?,
            )),
            9 => Parameter::Curve1(self.read_curves::<1>(data_offset)?),
            10 => Parameter::Curve2(self.read_curves::<2>(data_offset)?),
            11 => Parameter::Curve3(self.read_curves::<3>(data_offset)?),
            12 => Parameter::Curve4(self.read_curves::<4>(data_offset)?),
            13 => Parameter::BufferInt(self.read_buffer::<i32>(data_offset)?),
            14 => Parameter::BufferF32(self.read_f32_buffer(data_offset)?),
            15 => Parameter::String256(FixedSafeString::new(
                &self.reader.read_string(data_offset, Some(256))?,
            )),
            // Quat parameters can be interpolated by the engine at load
            // time; the raw value is kept as is.
            16 => Parameter::Quat(Quatf {
                a: self.read_f32(data_offset)?,
                b: self.read_next_f32()?,
                c: self.read_next_f32()?,
                d: self.read_next_f32()?,
            }),
            17 => Parameter::U32(self.reader.read_at(data_offset)?),
            18 => Parameter::BufferU32(self.read_buffer::<u32>(data_offset)?),
            19 => Parameter::BufferBinary(self.read_buffer::<u8>(data_offset)?),
            20 => Parameter::StringRef(self.reader.read_string(data_offset, None)?),
            _ => return Err(Error::invalid("unexpected parameter type")),
        };
        Ok((Name(crc32), value))
    }

    fn read_f32(&mut self, offset: usize) -> Result<f32> {
        Ok(f32::from_bits(self.reader.read_at(offset)?))
    }

    fn read_next_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.reader.read()?))
    }

    fn read_curves<const N: usize>(&mut self, offset: usize) -> Result<[Curve; N]> {
        let mut curves = [Curve::default(); N];
        self.reader.seek(offset);
        for curve in curves.iter_mut() {
            curve.a = self.reader.read()?;
            curve.b = self.reader.read()?;
            for float in curve.floats.iter_mut() {
                *float = f32::from_bits(self.reader.read()?);
            }
        }
        Ok(curves)
    }

    fn read_buffer<T: binread::BinRead>(&mut self, offset: usize) -> Result<Vec<T>>
    where
        T::Args: Default,
    {
        if offset < 4 {
            return Err(Error::invalid("buffer parameter offset out of range"));
        }
        let size: u32 = self.reader.read_at(offset - 4)?;
        let mut buffer = Vec::with_capacity(size.min(0x10000) as usize);
        for _ in 0..size {
            buffer.push(self.reader.read()?);
        }
        Ok(buffer)
    }

    fn read_f32_buffer(&mut self, offset: usize) -> Result<Vec<f32>> {
        Ok(self
            .read_buffer::<u32>(offset)?
            .into_iter()
            .map(f32::from_bits)
            .collect())
    }

    fn parse_object(&mut self, offset: usize) -> Result<(Name, ParameterObject)> {
        let crc32: u32 = self.reader.read_at(offset)?;
        let params_rel: u16 = self.reader.read()?;
        let num_params: u16 = self.reader.read()?;
        let offset_to_params = offset + params_rel as usize * 4;

        let mut object = ParameterObject::default();
        object.params.reserve(num_params as usize);
        for i in 0..num_params as usize {
            let (name, param) = self.parse_parameter(offset_to_params + 8 * i)?;
            object.params.insert(name, param);
        }
        Ok((Name(crc32), object))
    }

    fn parse_list(&mut self, offset: usize, depth: u32) -> Result<(Name, ParameterList)> {
        if depth > MAX_DEPTH {
            return Err(Error::invalid("parameter list nesting is too deep"));
        }
        let crc32: u32 = self.reader.read_at(offset)?;
        let lists_rel: u16 = self.reader.read()?;
        let num_lists: u16 = self.reader.read()?;
        let objects_rel: u16 = self.reader.read()?;
        let num_objects: u16 = self.reader.read()?;
        let offset_to_lists = offset + lists_rel as usize * 4;
        let offset_to_objects = offset + objects_rel as usize * 4;

        let mut list = ParameterList::default();
        list.lists.reserve(num_lists as usize);
        list.objects.reserve(num_objects as usize);
        for i in 0..num_lists as usize {
            let (name, child) = self.parse_list(offset_to_lists + 0xC * i, depth + 1)?;
            list.lists.insert(name, child);
        }
        for i in 0..num_objects as usize {
            let (name, object) = self.parse_object(offset_to_objects + 8 * i)?;
            list.objects.insert(name, object);
        }
        Ok((Name(crc32), list))
    }
}

impl ParameterIO {
    /// Loads a ParameterIO from a binary parameter archive.
    pub fn from_binary(data: &[u8]) -> Result<ParameterIO> {
        Parser::new(data)?.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::super::ParameterIO;

    #[test]
    fn rejects_bad_input() {
        assert!(ParameterIO::from_binary(b"AAMP").is_err());
        let mut data = vec![0u8; 0x40];
        data[0..4].copy_from_slice(b"AAMP");
        data[4..8].copy_from_slice(&2u32.to_le_bytes());
        // Flags missing the little-endian and UTF-8 bits.
        assert!(ParameterIO::from_binary(&data).is_err());
        data[8..12].copy_from_slice(&3u32.to_le_bytes());
        // No param_root at the pio offset.
        assert!(ParameterIO::from_binary(&data).is_err());
        // Bad version.
        data[4..8].copy_from_slice(&1u32.to_le_bytes());
        assert!(ParameterIO::from_binary(&data).is_err());
    }
}
