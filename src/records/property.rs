use nalgebra::{Vector3, Vector4};
use serde::Serialize;

use super::RecordRef;
use super::base::NamedObject;
use crate::error::DecodeError;
use crate::stream::NifStream;

// ─── Alpha property flag bits ─────────────────────────────────────────────────

pub const ALPHA_BLEND: u16 = 0x0001;
pub const ALPHA_TEST: u16 = 0x0200;

// ─── Property records ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct MaterialProperty {
    pub ambient: Vector3<f32>,
    pub diffuse: Vector3<f32>,
    pub specular: Vector3<f32>,
    pub emissive: Vector3<f32>,
    pub glossiness: f32,
    pub alpha: f32,
}

/// Index into [`TexturingProperty::slots`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TextureSlot {
    Base = 0,
    Dark = 1,
    Detail = 2,
    Gloss = 3,
    Glow = 4,
    Bump = 5,
    Decal = 6,
}

impl TextureSlot {
    pub const ORDER: [TextureSlot; 7] = [
        TextureSlot::Base,
        TextureSlot::Dark,
        TextureSlot::Detail,
        TextureSlot::Gloss,
        TextureSlot::Glow,
        TextureSlot::Bump,
        TextureSlot::Decal,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ORDER.get(index).copied()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TextureBinding {
    pub source: RecordRef,
    pub clamp: u32,
    pub filter: u32,
    pub uv_set: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BumpMapping {
    pub luma_scale: f32,
    pub luma_offset: f32,
    pub matrix: Vector4<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TexturingProperty {
    pub apply_mode: u32,
    /// One entry per encoded slot, `None` where the slot is unused.
    pub slots: Vec<Option<TextureBinding>>,
    pub bump: Option<BumpMapping>,
}

impl TexturingProperty {
    fn read(stream: &mut NifStream) -> Result<Self, DecodeError> {
        let apply_mode = stream.read_u32()?;
        let slot_count = stream.read_u32()? as usize;
        let mut slots = Vec::with_capacity(slot_count.min(16));
        let mut bump = None;

        for index in 0..slot_count {
            if !stream.read_bool()? {
                slots.push(None);
                continue;
            }
            let source = stream.read_ref()?;
            let clamp = stream.read_u32()?;
            let filter = stream.read_u32()?;
            let uv_set = stream.read_u32()?;
            // PS2 L/K filtering values
            stream.skip(4)?;
            if !stream.version().at_least(4, 1, 0, 13) {
                stream.skip(2)?;
            }
            if TextureSlot::from_index(index) == Some(TextureSlot::Bump) {
                let luma = stream.read_vector2()?;
                bump = Some(BumpMapping {
                    luma_scale: luma.x,
                    luma_offset: luma.y,
                    matrix: stream.read_vector4()?,
                });
            }
            slots.push(Some(TextureBinding {
                source,
                clamp,
                filter,
                uv_set,
            }));
        }

        Ok(Self {
            apply_mode,
            slots,
            bump,
        })
    }

    pub fn slot(&self, slot: TextureSlot) -> Option<&TextureBinding> {
        self.slots.get(slot as usize).and_then(Option::as_ref)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StencilProperty {
    pub enabled: bool,
    pub function: u32,
    pub reference: u32,
    pub mask: u32,
    pub fail_action: u32,
    pub z_fail_action: u32,
    pub pass_action: u32,
    /// 0 = application default, 1 = counter-clockwise, 2 = clockwise, 3 = both.
    pub draw_mode: u32,
}

pub const DRAW_BOTH: u32 = 3;

#[derive(Debug, Clone, Serialize)]
pub enum PropertyKind {
    Material(MaterialProperty),
    Texturing(TexturingProperty),
    Alpha {
        threshold: u8,
    },
    VertexColor {
        vertex_mode: u32,
        lighting_mode: u32,
    },
    ZBuffer {
        test_function: Option<u32>,
    },
    Stencil(StencilProperty),
    Fog {
        depth: f32,
        color: Vector3<f32>,
    },
    Shade,
    Wireframe,
    Dither,
    Specular,
}

/// Render-state record attached to spatial nodes.
#[derive(Debug, Clone, Serialize)]
pub struct Property {
    pub base: NamedObject,
    pub flags: u16,
    pub kind: PropertyKind,
}

impl Property {
    pub(crate) fn read(stream: &mut NifStream, tag: &str) -> Result<Self, DecodeError> {
        let base = NamedObject::read(stream)?;
        let flags = stream.read_u16()?;

        let kind = match tag {
            "NiMaterialProperty" => PropertyKind::Material(MaterialProperty {
                ambient: stream.read_color_rgb()?,
                diffuse: stream.read_color_rgb()?,
                specular: stream.read_color_rgb()?,
                emissive: stream.read_color_rgb()?,
                glossiness: stream.read_f32()?,
                alpha: stream.read_f32()?,
            }),
            "NiTexturingProperty" => PropertyKind::Texturing(TexturingProperty::read(stream)?),
            "NiAlphaProperty" => PropertyKind::Alpha {
                threshold: stream.read_u8()?,
            },
            "NiVertexColorProperty" => PropertyKind::VertexColor {
                vertex_mode: stream.read_u32()?,
                lighting_mode: stream.read_u32()?,
            },
            "NiZBufferProperty" => PropertyKind::ZBuffer {
                test_function: if stream.version().at_least(4, 1, 0, 12) {
                    Some(stream.read_u32()?)
                } else {
                    None
                },
            },
            "NiStencilProperty" => PropertyKind::Stencil(StencilProperty {
                enabled: stream.read_byte_bool()?,
                function: stream.read_u32()?,
                reference: stream.read_u32()?,
                mask: stream.read_u32()?,
                fail_action: stream.read_u32()?,
                z_fail_action: stream.read_u32()?,
                pass_action: stream.read_u32()?,
                draw_mode: stream.read_u32()?,
            }),
            "NiFogProperty" => PropertyKind::Fog {
                depth: stream.read_f32()?,
                color: stream.read_color_rgb()?,
            },
            "NiShadeProperty" => PropertyKind::Shade,
            "NiWireframeProperty" => PropertyKind::Wireframe,
            "NiDitherProperty" => PropertyKind::Dither,
            _ => PropertyKind::Specular,
        };

        Ok(Self { base, flags, kind })
    }

    /// Variant discriminant used for ancestor fallback lookups.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            PropertyKind::Material(_) => "material",
            PropertyKind::Texturing(_) => "texturing",
            PropertyKind::Alpha { .. } => "alpha",
            PropertyKind::VertexColor { .. } => "vertex_color",
            PropertyKind::ZBuffer { .. } => "zbuffer",
            PropertyKind::Stencil(_) => "stencil",
            PropertyKind::Fog { .. } => "fog",
            PropertyKind::Shade => "shade",
            PropertyKind::Wireframe => "wireframe",
            PropertyKind::Dither => "dither",
            PropertyKind::Specular => "specular",
        }
    }
}

// ─── Texture sources ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub enum TextureLocation {
    External(String),
    Internal(RecordRef),
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceTexture {
    pub base: NamedObject,
    pub location: TextureLocation,
    pub pixel_layout: u32,
    pub use_mipmaps: u32,
    pub alpha_format: u32,
    pub is_static: bool,
}

impl SourceTexture {
    pub(crate) fn read(stream: &mut NifStream) -> Result<Self, DecodeError> {
        let base = NamedObject::read(stream)?;
        let location = if stream.read_byte_bool()? {
            TextureLocation::External(stream.read_string()?)
        } else {
            let _has_pixel_data = stream.read_u8()?;
            TextureLocation::Internal(stream.read_ref()?)
        };
        Ok(Self {
            base,
            location,
            pixel_layout: stream.read_u32()?,
            use_mipmaps: stream.read_u32()?,
            alpha_format: stream.read_u32()?,
            is_static: stream.read_byte_bool()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Mipmap {
    pub width: u32,
    pub height: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PixelData {
    pub format: u32,
    /// red, green, blue, alpha channel masks
    pub masks: [u32; 4],
    pub bits_per_pixel: u32,
    pub palette: RecordRef,
    pub bytes_per_pixel: u32,
    pub mipmaps: Vec<Mipmap>,
    #[serde(skip)]
    pub pixels: Vec<u8>,
}

impl PixelData {
    pub(crate) fn read(stream: &mut NifStream) -> Result<Self, DecodeError> {
        let format = stream.read_u32()?;
        let masks = [
            stream.read_u32()?,
            stream.read_u32()?,
            stream.read_u32()?,
            stream.read_u32()?,
        ];
        let bits_per_pixel = stream.read_u32()?;
        // Fast-compare bytes.
        stream.skip(8)?;
        let palette = stream.read_ref()?;
        let mipmap_count = stream.read_u32()? as usize;
        let bytes_per_pixel = stream.read_u32()?;
        let mipmaps = stream.read_array(mipmap_count, 12, |s| {
            Ok(Mipmap {
                width: s.read_u32()?,
                height: s.read_u32()?,
                offset: s.read_u32()?,
            })
        })?;
        let byte_count = stream.read_u32()? as usize;
        let pixels = stream.read_bytes(byte_count)?;

        Ok(Self {
            format,
            masks,
            bits_per_pixel,
            palette,
            bytes_per_pixel,
            mipmaps,
            pixels,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Palette {
    pub has_alpha: bool,
    /// RGBA entries.
    pub entries: Vec<[u8; 4]>,
}

impl Palette {
    pub(crate) fn read(stream: &mut NifStream) -> Result<Self, DecodeError> {
        let has_alpha = stream.read_byte_bool()?;
        let count = stream.read_u32()? as usize;
        let entries = stream.read_array(count, 4, |s| {
            Ok([s.read_u8()?, s.read_u8()?, s.read_u8()?, s.read_u8()?])
        })?;
        Ok(Self { has_alpha, entries })
    }
}
