use nalgebra::{Quaternion, Vector3, Vector4};
use serde::Serialize;

use crate::error::DecodeError;
use crate::stream::NifStream;

// ─── Interpolation ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Interpolation {
    Linear,
    /// Hermite curve with explicit in/out tangents.
    Quadratic,
    /// Tension, continuity, bias.
    Tcb,
    /// Rotation stored as three separate Euler-angle curves.
    Xyz,
    Constant,
}

impl Interpolation {
    fn from_code(code: u32, offset: usize) -> Result<Self, DecodeError> {
        Ok(match code {
            1 => Interpolation::Linear,
            2 => Interpolation::Quadratic,
            3 => Interpolation::Tcb,
            4 => Interpolation::Xyz,
            5 => Interpolation::Constant,
            other => {
                return Err(DecodeError::corrupt(
                    offset,
                    format!("unknown interpolation type {other}"),
                ));
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TcbParams {
    pub tension: f32,
    pub continuity: f32,
    pub bias: f32,
}

impl TcbParams {
    fn read(stream: &mut NifStream) -> Result<Self, DecodeError> {
        Ok(Self {
            tension: stream.read_f32()?,
            continuity: stream.read_f32()?,
            bias: stream.read_f32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Key<T> {
    pub time: f32,
    pub value: T,
    /// `(in, out)` for quadratic keys.
    pub tangents: Option<(T, T)>,
    pub tcb: Option<TcbParams>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyMap<T> {
    pub interpolation: Interpolation,
    pub keys: Vec<Key<T>>,
}

impl<T> Default for KeyMap<T> {
    fn default() -> Self {
        Self {
            interpolation: Interpolation::Linear,
            keys: Vec::new(),
        }
    }
}

impl<T> KeyMap<T> {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// `(first, last)` key time.
    pub fn time_range(&self) -> Option<(f32, f32)> {
        Some((self.keys.first()?.time, self.keys.last()?.time))
    }
}

pub type FloatKeyMap = KeyMap<f32>;
pub type Vector3KeyMap = KeyMap<Vector3<f32>>;
pub type Vector4KeyMap = KeyMap<Vector4<f32>>;
pub type QuaternionKeyMap = KeyMap<Quaternion<f32>>;

/// Reads a counted key map.
///
/// # Arguments
/// * `value_size` - Encoded size of one `T`, used to bound the key count.
/// * `force_interpolation` - Morph key maps carry the interpolation code
///   even when they hold no keys.
pub(crate) fn read_key_map<'a, T>(
    stream: &mut NifStream<'a>,
    value_size: usize,
    force_interpolation: bool,
    mut read_value: impl FnMut(&mut NifStream<'a>) -> Result<T, DecodeError>,
) -> Result<KeyMap<T>, DecodeError> {
    let count = stream.read_u32()? as usize;
    let interpolation = if count > 0 || force_interpolation {
        let offset = stream.position();
        Interpolation::from_code(stream.read_u32()?, offset)?
    } else {
        Interpolation::Linear
    };
    if interpolation == Interpolation::Xyz && count > 0 {
        return Err(DecodeError::corrupt(
            stream.position(),
            "XYZ interpolation outside rotation keys",
        ));
    }

    let keys = stream.read_array(count, 4 + value_size, |s| {
        let time = s.read_f32()?;
        let value = read_value(s)?;
        let mut key = Key {
            time,
            value,
            tangents: None,
            tcb: None,
        };
        match interpolation {
            Interpolation::Quadratic => {
                key.tangents = Some((read_value(s)?, read_value(s)?));
            }
            Interpolation::Tcb => key.tcb = Some(TcbParams::read(s)?),
            _ => {}
        }
        Ok(key)
    })?;

    Ok(KeyMap {
        interpolation,
        keys,
    })
}

pub(crate) fn read_float_keys(stream: &mut NifStream) -> Result<FloatKeyMap, DecodeError> {
    read_key_map(stream, 4, false, NifStream::read_f32)
}

// ─── Keyed data records ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RotationKeys {
    Quaternion(QuaternionKeyMap),
    /// Separate X, Y and Z Euler-angle curves in radians.
    Euler([FloatKeyMap; 3]),
}

impl Default for RotationKeys {
    fn default() -> Self {
        RotationKeys::Quaternion(KeyMap::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KeyframeData {
    pub rotations: RotationKeys,
    pub translations: Vector3KeyMap,
    pub scales: FloatKeyMap,
}

impl KeyframeData {
    pub(crate) fn read(stream: &mut NifStream) -> Result<Self, DecodeError> {
        let count = stream.read_u32()? as usize;
        let interpolation = if count > 0 {
            let offset = stream.position();
            Interpolation::from_code(stream.read_u32()?, offset)?
        } else {
            Interpolation::Linear
        };

        let rotations = if interpolation == Interpolation::Xyz {
            // Euler axis order; always XYZ in practice.
            let _order = stream.read_f32()?;
            RotationKeys::Euler([
                read_float_keys(stream)?,
                read_float_keys(stream)?,
                read_float_keys(stream)?,
            ])
        } else {
            let keys = stream.read_array(count, 20, |s| {
                let time = s.read_f32()?;
                let value = s.read_quaternion()?;
                let tcb = if interpolation == Interpolation::Tcb {
                    Some(TcbParams::read(s)?)
                } else {
                    None
                };
                Ok(Key {
                    time,
                    value,
                    tangents: None,
                    tcb,
                })
            })?;
            RotationKeys::Quaternion(KeyMap {
                interpolation,
                keys,
            })
        };

        Ok(Self {
            rotations,
            translations: read_key_map(stream, 12, false, NifStream::read_vector3)?,
            scales: read_float_keys(stream)?,
        })
    }

    /// Earliest and latest key time across every curve.
    pub fn time_range(&self) -> Option<(f32, f32)> {
        let mut ranges = vec![self.translations.time_range(), self.scales.time_range()];
        match &self.rotations {
            RotationKeys::Quaternion(map) => ranges.push(map.time_range()),
            RotationKeys::Euler(axes) => ranges.extend(axes.iter().map(KeyMap::time_range)),
        }
        ranges
            .into_iter()
            .flatten()
            .reduce(|(a0, a1), (b0, b1)| (a0.min(b0), a1.max(b1)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VisKey {
    pub time: f32,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Morph {
    pub keys: FloatKeyMap,
    pub vectors: Vec<Vector3<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MorphData {
    pub relative_targets: bool,
    pub morphs: Vec<Morph>,
}

impl MorphData {
    pub(crate) fn read(stream: &mut NifStream) -> Result<Self, DecodeError> {
        let morph_count = stream.read_u32()? as usize;
        let vertex_count = stream.read_u32()? as usize;
        let relative_targets = stream.read_byte_bool()?;
        let morphs = stream.read_array(morph_count, 8, |s| {
            Ok(Morph {
                keys: read_key_map(s, 4, true, NifStream::read_f32)?,
                vectors: s.read_array(vertex_count, 12, NifStream::read_vector3)?,
            })
        })?;
        Ok(Self {
            relative_targets,
            morphs,
        })
    }
}

/// Every keyed-data record kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum KeyedData {
    Keyframe(KeyframeData),
    Float(FloatKeyMap),
    Position(Vector3KeyMap),
    Color(Vector4KeyMap),
    Visibility(Vec<VisKey>),
    /// U translation, V translation, U scale, V scale.
    Uv([FloatKeyMap; 4]),
    Morph(MorphData),
}

impl KeyedData {
    pub(crate) fn read(stream: &mut NifStream, tag: &str) -> Result<Self, DecodeError> {
        Ok(match tag {
            "NiKeyframeData" => KeyedData::Keyframe(KeyframeData::read(stream)?),
            "NiFloatData" => KeyedData::Float(read_float_keys(stream)?),
            "NiPosData" => {
                KeyedData::Position(read_key_map(stream, 12, false, NifStream::read_vector3)?)
            }
            "NiColorData" => {
                KeyedData::Color(read_key_map(stream, 16, false, NifStream::read_color_rgba)?)
            }
            "NiVisData" => {
                let count = stream.read_u32()? as usize;
                KeyedData::Visibility(stream.read_array(count, 5, |s| {
                    Ok(VisKey {
                        time: s.read_f32()?,
                        visible: s.read_byte_bool()?,
                    })
                })?)
            }
            "NiUVData" => KeyedData::Uv([
                read_float_keys(stream)?,
                read_float_keys(stream)?,
                read_float_keys(stream)?,
                read_float_keys(stream)?,
            ]),
            _ => KeyedData::Morph(MorphData::read(stream)?),
        })
    }
}
