// Binary layout shared by the weight and input files
//
// All integers are little-endian:
//
//   weights: magic "SPWT" | version(u32) | neurons(u32) | layers(u32) | width(u32)
//            then per layer: nnz(u64) | nnz x { row(u32) col(u32) value(width) }
//   inputs:  magic "SPIN" | version(u32) | inputs(u32) | neurons(u32) | width(u32)
//            | nnz(u64) | nnz x { row(u32) col(u32) value(width) }
//
// `width` is 4 for f32 values and 8 for f64 values. Values are converted to
// the engine's element type on read.

use sparrow_core::{DType, Element, Error, Result};

pub const WEIGHT_MAGIC: [u8; 4] = *b"SPWT";
pub const INPUT_MAGIC: [u8; 4] = *b"SPIN";
pub const FORMAT_VERSION: u32 = 1;

/// Bytes of one weight-file header.
pub const WEIGHT_HEADER_LEN: usize = 20;
/// Bytes of one input-file header, including the nnz count.
pub const INPUT_HEADER_LEN: usize = 28;

/// Header of a weight file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightHeader {
    pub neurons: u32,
    pub layers: u32,
    pub dtype: DType,
}

/// Header of an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputHeader {
    pub inputs: u32,
    pub neurons: u32,
    pub dtype: DType,
    pub nnz: u64,
}

/// Forward-only reader over a byte buffer.
pub(crate) struct ByteReader<'a> {
    file: &'static str,
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(file: &'static str, data: &'a [u8]) -> Self {
        Self { file, data, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.data.len());
        match end {
            Some(end) => {
                let bytes = &self.data[self.pos..end];
                self.pos = end;
                Ok(bytes)
            }
            None => Err(Error::format(
                self.file,
                format!(
                    "truncated: need {n} bytes at offset {}, file has {}",
                    self.pos,
                    self.data.len()
                ),
            )),
        }
    }

    pub(crate) fn skip(&mut self, n: u64) -> Result<()> {
        let n = usize::try_from(n)
            .map_err(|_| Error::format(self.file, format!("section of {n} bytes")))?;
        self.take(n).map(|_| ())
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(b);
        Ok(u64::from_le_bytes(word))
    }

    pub(crate) fn value<T: Element>(&mut self, dtype: DType) -> Result<T> {
        let v = match dtype {
            DType::F32 => f32::from_bits(self.u32()?) as f64,
            DType::F64 => f64::from_bits(self.u64()?),
        };
        Ok(T::from_f64(v))
    }

    /// One `(row, col, value)` entry.
    pub(crate) fn entry<T: Element>(&mut self, dtype: DType) -> Result<(u32, u32, T)> {
        let row = self.u32()?;
        let col = self.u32()?;
        Ok((row, col, self.value(dtype)?))
    }

    fn magic(&mut self, expected: [u8; 4]) -> Result<()> {
        let got = self.take(4)?;
        if got != expected {
            return Err(Error::format(
                self.file,
                format!(
                    "invalid magic: expected {:?}, got {:?}",
                    String::from_utf8_lossy(&expected),
                    String::from_utf8_lossy(got)
                ),
            ));
        }
        let version = self.u32()?;
        if version != FORMAT_VERSION {
            return Err(Error::format(
                self.file,
                format!("unsupported version {version} (expected {FORMAT_VERSION})"),
            ));
        }
        Ok(())
    }

    fn dtype(&mut self) -> Result<DType> {
        let width = self.u32()?;
        DType::from_width(width)
            .ok_or_else(|| Error::format(self.file, format!("value width {width} is not 4 or 8")))
    }

    pub(crate) fn weight_header(&mut self) -> Result<WeightHeader> {
        self.magic(WEIGHT_MAGIC)?;
        Ok(WeightHeader {
            neurons: self.u32()?,
            layers: self.u32()?,
            dtype: self.dtype()?,
        })
    }

    pub(crate) fn input_header(&mut self) -> Result<InputHeader> {
        self.magic(INPUT_MAGIC)?;
        Ok(InputHeader {
            inputs: self.u32()?,
            neurons: self.u32()?,
            dtype: self.dtype()?,
            nnz: self.u64()?,
        })
    }
}

/// Bytes of one stored entry for the given value type.
pub(crate) fn entry_len(dtype: DType) -> u64 {
    8 + dtype.size_in_bytes() as u64
}

/// Fail with a geometry mismatch unless `got == expected`.
pub(crate) fn expect_eq(what: &'static str, expected: usize, got: u32) -> Result<()> {
    if got as usize != expected {
        return Err(Error::GeometryMismatch {
            what,
            expected,
            got: got as usize,
        });
    }
    Ok(())
}

pub(crate) fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_header(buf: &mut Vec<u8>, magic: [u8; 4], dims: [u32; 2], dtype: DType) {
    buf.extend_from_slice(&magic);
    put_u32(buf, FORMAT_VERSION);
    put_u32(buf, dims[0]);
    put_u32(buf, dims[1]);
    put_u32(buf, dtype.size_in_bytes() as u32);
}

pub(crate) fn put_entry<T: Element>(buf: &mut Vec<u8>, (row, col, value): (u32, u32, T)) {
    put_u32(buf, row);
    put_u32(buf, col);
    match T::DTYPE {
        DType::F32 => put_u32(buf, (value.to_f64() as f32).to_bits()),
        DType::F64 => put_u64(buf, value.to_f64().to_bits()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip_and_lengths() {
        let mut buf = Vec::new();
        put_header(&mut buf, WEIGHT_MAGIC, [1024, 120], DType::F32);
        assert_eq!(buf.len(), WEIGHT_HEADER_LEN);
        let h = ByteReader::new("weight", &buf).weight_header().unwrap();
        assert_eq!(h.neurons, 1024);
        assert_eq!(h.layers, 120);
        assert_eq!(h.dtype, DType::F32);
    }

    #[test]
    fn test_bad_magic_version_and_width() {
        let mut buf = Vec::new();
        put_header(&mut buf, INPUT_MAGIC, [1, 1], DType::F32);
        let err = ByteReader::new("weight", &buf).weight_header().unwrap_err();
        assert!(err.to_string().contains("invalid magic"));

        let mut buf = Vec::new();
        put_header(&mut buf, WEIGHT_MAGIC, [1, 1], DType::F32);
        buf[4] = 9;
        assert!(ByteReader::new("weight", &buf).weight_header().is_err());

        let mut buf = Vec::new();
        put_header(&mut buf, WEIGHT_MAGIC, [1, 1], DType::F32);
        buf[16] = 2;
        let err = ByteReader::new("weight", &buf).weight_header().unwrap_err();
        assert!(err.to_string().contains("value width 2"));
    }

    #[test]
    fn test_truncated_reads() {
        let mut r = ByteReader::new("input", &[1, 0, 0]);
        assert!(r.u32().is_err());
        let mut r = ByteReader::new("input", &[1, 0, 0, 0]);
        assert_eq!(r.u32().unwrap(), 1);
        assert!(r.skip(1).is_err());
    }

    #[test]
    fn test_entry_value_conversion() {
        let mut buf = Vec::new();
        put_entry(&mut buf, (3u32, 7u32, 0.5f32));
        assert_eq!(buf.len() as u64, entry_len(DType::F32));
        let (r, c, v) = ByteReader::new("weight", &buf)
            .entry::<f64>(DType::F32)
            .unwrap();
        assert_eq!((r, c, v), (3, 7, 0.5));
    }
}
