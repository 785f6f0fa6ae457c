use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use nalgebra::{Matrix3, Quaternion, Vector2, Vector3, Vector4};
use serde::Serialize;

use crate::error::DecodeError;
use crate::records::RecordRef;

/// Longest string the format can legally hold.
pub const MAX_STRING_LENGTH: usize = 65_535;

/// Longest header line accepted before the `\n` terminator.
const MAX_HEADER_LINE: usize = 256;

// ─── Format version ───────────────────────────────────────────────────────────

/// BCD-style packed `major.minor.patch.rev` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FormatVersion(pub u32);

impl FormatVersion {
    /// Oldest supported generation: 32-bit booleans, redundant version field
    /// and a trailing root list.
    pub const OLDEST: FormatVersion = FormatVersion::from_parts(4, 0, 0, 2);
    /// First generation after the oldest that this decoder accepts.
    pub const FIRST_BYTE_BOOL: FormatVersion = FormatVersion::from_parts(4, 1, 0, 0);
    /// Newest generation with inline record tags.
    pub const NEWEST: FormatVersion = FormatVersion::from_parts(4, 2, 2, 0);

    pub const fn from_parts(major: u8, minor: u8, patch: u8, rev: u8) -> Self {
        FormatVersion(
            ((major as u32) << 24) | ((minor as u32) << 16) | ((patch as u32) << 8) | rev as u32,
        )
    }

    pub fn parts(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub fn is_oldest(self) -> bool {
        self == Self::OLDEST
    }

    pub fn is_supported(self) -> bool {
        self.is_oldest() || (Self::FIRST_BYTE_BOOL..=Self::NEWEST).contains(&self)
    }

    /// True when this version is at least `major.minor.patch.rev`.
    pub fn at_least(self, major: u8, minor: u8, patch: u8, rev: u8) -> bool {
        self >= Self::from_parts(major, minor, patch, rev)
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch, rev] = self.parts();
        write!(f, "{major}.{minor}.{patch}.{rev}")
    }
}

// ─── Byte cursor ──────────────────────────────────────────────────────────────

/// Bounds-checked little-endian cursor over one file's bytes.
///
/// Every read either returns a value or a `CorruptFormat` error carrying the
/// cursor offset; nothing is zero-filled past the end.
#[derive(Debug, Clone)]
pub struct NifStream<'a> {
    bytes: &'a [u8],
    cursor: usize,
    version: FormatVersion,
}

impl<'a> NifStream<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            cursor: 0,
            version: FormatVersion::OLDEST,
        }
    }

    pub fn version(&self) -> FormatVersion {
        self.version
    }

    pub fn set_version(&mut self, version: FormatVersion) {
        self.version = version;
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.cursor)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::corrupt(
                self.cursor,
                format!(
                    "unexpected end of data: need {len} bytes, {} left",
                    self.remaining()
                ),
            ));
        }
        let slice = &self.bytes[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(slice)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        self.take(len).map(|_| ())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, DecodeError> {
        self.take(len).map(<[u8]>::to_vec)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        Ok(LittleEndian::read_i16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    /// Boolean whose width depends on the format version: a 32-bit integer
    /// for the oldest generation, a single byte afterwards.
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        if self.version.is_oldest() {
            Ok(self.read_i32()? != 0)
        } else {
            Ok(self.read_u8()? != 0)
        }
    }

    /// Single-byte flag that is a byte in every version.
    pub fn read_byte_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    fn read_sized_string(&mut self, min_len: usize) -> Result<String, DecodeError> {
        let offset = self.cursor;
        let len = self.read_u32()? as usize;
        if len < min_len || len > MAX_STRING_LENGTH {
            return Err(DecodeError::corrupt(
                offset,
                format!("string length {len} outside [{min_len}, {MAX_STRING_LENGTH}]"),
            ));
        }
        if len > self.remaining() {
            return Err(DecodeError::corrupt(
                offset,
                format!(
                    "string length {len} exceeds remaining {} bytes",
                    self.remaining()
                ),
            ));
        }
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Length-prefixed string field; may be empty.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        self.read_sized_string(0)
    }

    /// Record tag; must be non-empty.
    pub fn read_tag(&mut self) -> Result<String, DecodeError> {
        self.read_sized_string(1)
    }

    pub fn read_vector2(&mut self) -> Result<Vector2<f32>, DecodeError> {
        let b = self.take(8)?;
        Ok(Vector2::new(
            LittleEndian::read_f32(&b[0..4]),
            LittleEndian::read_f32(&b[4..8]),
        ))
    }

    pub fn read_vector3(&mut self) -> Result<Vector3<f32>, DecodeError> {
        let b = self.take(12)?;
        Ok(Vector3::new(
            LittleEndian::read_f32(&b[0..4]),
            LittleEndian::read_f32(&b[4..8]),
            LittleEndian::read_f32(&b[8..12]),
        ))
    }

    pub fn read_vector4(&mut self) -> Result<Vector4<f32>, DecodeError> {
        let b = self.take(16)?;
        Ok(Vector4::new(
            LittleEndian::read_f32(&b[0..4]),
            LittleEndian::read_f32(&b[4..8]),
            LittleEndian::read_f32(&b[8..12]),
            LittleEndian::read_f32(&b[12..16]),
        ))
    }

    /// RGBA colour as four floats.
    pub fn read_color_rgba(&mut self) -> Result<Vector4<f32>, DecodeError> {
        self.read_vector4()
    }

    /// RGB colour as three floats.
    pub fn read_color_rgb(&mut self) -> Result<Vector3<f32>, DecodeError> {
        self.read_vector3()
    }

    /// 3x3 rotation stored row-major, applied to column vectors.
    pub fn read_matrix3(&mut self) -> Result<Matrix3<f32>, DecodeError> {
        let b = self.take(36)?;
        let mut values = [0.0f32; 9];
        LittleEndian::read_f32_into(b, &mut values);
        Ok(Matrix3::from_row_slice(&values))
    }

    /// Quaternion stored as `w, x, y, z`.
    pub fn read_quaternion(&mut self) -> Result<Quaternion<f32>, DecodeError> {
        let b = self.take(16)?;
        Ok(Quaternion::new(
            LittleEndian::read_f32(&b[0..4]),
            LittleEndian::read_f32(&b[4..8]),
            LittleEndian::read_f32(&b[8..12]),
            LittleEndian::read_f32(&b[12..16]),
        ))
    }

    pub fn read_ref(&mut self) -> Result<RecordRef, DecodeError> {
        Ok(RecordRef(self.read_i32()?))
    }

    /// u32 count followed by that many references.
    pub fn read_ref_list(&mut self) -> Result<Vec<RecordRef>, DecodeError> {
        let count = self.read_u32()? as usize;
        self.read_array(count, 4, NifStream::read_ref)
    }

    /// Read `count` elements of at least `element_size` bytes each. The count
    /// is validated against the remaining bytes before anything is allocated.
    pub fn read_array<T>(
        &mut self,
        count: usize,
        element_size: usize,
        mut read: impl FnMut(&mut Self) -> Result<T, DecodeError>,
    ) -> Result<Vec<T>, DecodeError> {
        let needed = count.checked_mul(element_size);
        match needed {
            Some(needed) if needed <= self.remaining() => {}
            _ => {
                return Err(DecodeError::corrupt(
                    self.cursor,
                    format!(
                        "list of {count} x {element_size} bytes exceeds remaining {} bytes",
                        self.remaining()
                    ),
                ));
            }
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(read(self)?);
        }
        Ok(out)
    }

    /// Read the ASCII header line up to (and consuming) its `\n`.
    pub fn read_header_line(&mut self) -> Result<String, DecodeError> {
        let window = &self.bytes[self.cursor..self.bytes.len().min(self.cursor + MAX_HEADER_LINE)];
        let Some(end) = window.iter().position(|&b| b == b'\n') else {
            return Err(DecodeError::malformed(
                "header line is missing its newline terminator",
            ));
        };
        let line = String::from_utf8_lossy(&window[..end]).into_owned();
        self.cursor += end + 1;
        Ok(line)
    }
}
