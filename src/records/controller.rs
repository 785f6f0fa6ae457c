use nalgebra::{Vector2, Vector3, Vector4};
use serde::Serialize;

use super::RecordRef;
use crate::error::DecodeError;
use crate::stream::NifStream;

// ─── Controllers ──────────────────────────────────────────────────────────────

/// Fields shared by every time controller in a controller chain.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerBase {
    pub next: RecordRef,
    pub flags: u16,
    pub frequency: f32,
    pub phase: f32,
    pub start_time: f32,
    pub stop_time: f32,
    pub target: RecordRef,
}

impl ControllerBase {
    fn read(stream: &mut NifStream) -> Result<Self, DecodeError> {
        Ok(Self {
            next: stream.read_ref()?,
            flags: stream.read_u16()?,
            frequency: stream.read_f32()?,
            phase: stream.read_f32()?,
            start_time: stream.read_f32()?,
            stop_time: stream.read_f32()?,
            target: stream.read_ref()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Particle {
    pub velocity: Vector3<f32>,
    pub rotation_axis: Vector3<f32>,
    pub age: f32,
    pub lifespan: f32,
    pub last_update: f32,
    pub generation: u16,
    pub code: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticleSystemController {
    pub speed: f32,
    pub speed_variation: f32,
    pub declination: f32,
    pub declination_variation: f32,
    pub planar_angle: f32,
    pub planar_angle_variation: f32,
    pub initial_normal: Vector3<f32>,
    pub initial_color: Vector4<f32>,
    pub initial_size: f32,
    pub emit_start_time: f32,
    pub emit_stop_time: f32,
    pub reset_on_loop: bool,
    pub birth_rate: f32,
    pub lifetime: f32,
    pub lifetime_variation: f32,
    pub emit_flags: u16,
    pub emitter_dimensions: Vector3<f32>,
    pub emitter: RecordRef,
    pub spawn_generations: u16,
    pub percentage_spawned: f32,
    pub spawn_multiplier: u16,
    pub spawn_speed_chaos: f32,
    pub spawn_direction_chaos: f32,
    pub active_particles: u16,
    pub particles: Vec<Particle>,
    pub modifier: RecordRef,
    pub collider: RecordRef,
}

impl ParticleSystemController {
    fn read(stream: &mut NifStream) -> Result<Self, DecodeError> {
        let speed = stream.read_f32()?;
        let speed_variation = stream.read_f32()?;
        let declination = stream.read_f32()?;
        let declination_variation = stream.read_f32()?;
        let planar_angle = stream.read_f32()?;
        let planar_angle_variation = stream.read_f32()?;
        let initial_normal = stream.read_vector3()?;
        let initial_color = stream.read_color_rgba()?;
        let initial_size = stream.read_f32()?;
        let emit_start_time = stream.read_f32()?;
        let emit_stop_time = stream.read_f32()?;
        let reset_on_loop = stream.read_byte_bool()?;
        let birth_rate = stream.read_f32()?;
        let lifetime = stream.read_f32()?;
        let lifetime_variation = stream.read_f32()?;
        let emit_flags = stream.read_u16()?;
        let emitter_dimensions = stream.read_vector3()?;
        let emitter = stream.read_ref()?;
        let spawn_generations = stream.read_u16()?;
        let percentage_spawned = stream.read_f32()?;
        let spawn_multiplier = stream.read_u16()?;
        let spawn_speed_chaos = stream.read_f32()?;
        let spawn_direction_chaos = stream.read_f32()?;

        let particle_count = stream.read_u16()? as usize;
        let active_particles = stream.read_u16()?;
        let particles = stream.read_array(particle_count, 40, |s| {
            Ok(Particle {
                velocity: s.read_vector3()?,
                rotation_axis: s.read_vector3()?,
                age: s.read_f32()?,
                lifespan: s.read_f32()?,
                last_update: s.read_f32()?,
                generation: s.read_u16()?,
                code: s.read_u16()?,
            })
        })?;
        let _unused = stream.read_ref()?;
        let modifier = stream.read_ref()?;
        let collider = stream.read_ref()?;

        Ok(Self {
            speed,
            speed_variation,
            declination,
            declination_variation,
            planar_angle,
            planar_angle_variation,
            initial_normal,
            initial_color,
            initial_size,
            emit_start_time,
            emit_stop_time,
            reset_on_loop,
            birth_rate,
            lifetime,
            lifetime_variation,
            emit_flags,
            emitter_dimensions,
            emitter,
            spawn_generations,
            percentage_spawned,
            spawn_multiplier,
            spawn_speed_chaos,
            spawn_direction_chaos,
            active_particles,
            particles,
            modifier,
            collider,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum ControllerKind {
    Keyframe {
        data: RecordRef,
    },
    Visibility {
        data: RecordRef,
    },
    Uv {
        uv_set: u16,
        data: RecordRef,
    },
    Alpha {
        data: RecordRef,
    },
    MaterialColor {
        data: RecordRef,
    },
    Roll {
        data: RecordRef,
    },
    GeomMorpher {
        data: RecordRef,
        always_update: bool,
    },
    Path {
        bank_direction: i32,
        max_bank_angle: f32,
        smoothing: f32,
        follow_axis: i16,
        path_data: RecordRef,
        percent_data: RecordRef,
    },
    LookAt {
        look_at: RecordRef,
    },
    Flip {
        texture_slot: u32,
        delta: f32,
        sources: Vec<RecordRef>,
    },
    /// Also used for `NiBSPArrayController`, which shares the layout.
    ParticleSystem(Box<ParticleSystemController>),
}

#[derive(Debug, Clone, Serialize)]
pub struct Controller {
    pub base: ControllerBase,
    pub kind: ControllerKind,
}

impl Controller {
    pub(crate) fn read(stream: &mut NifStream, tag: &str) -> Result<Self, DecodeError> {
        let base = ControllerBase::read(stream)?;
        let kind = match tag {
            "NiKeyframeController" => ControllerKind::Keyframe {
                data: stream.read_ref()?,
            },
            "NiVisController" => ControllerKind::Visibility {
                data: stream.read_ref()?,
            },
            "NiUVController" => ControllerKind::Uv {
                uv_set: stream.read_u16()?,
                data: stream.read_ref()?,
            },
            "NiAlphaController" => ControllerKind::Alpha {
                data: stream.read_ref()?,
            },
            "NiMaterialColorController" => ControllerKind::MaterialColor {
                data: stream.read_ref()?,
            },
            "NiRollController" => ControllerKind::Roll {
                data: stream.read_ref()?,
            },
            "NiGeomMorpherController" => ControllerKind::GeomMorpher {
                data: stream.read_ref()?,
                always_update: stream.read_byte_bool()?,
            },
            "NiPathController" => ControllerKind::Path {
                bank_direction: stream.read_i32()?,
                max_bank_angle: stream.read_f32()?,
                smoothing: stream.read_f32()?,
                follow_axis: stream.read_i16()?,
                path_data: stream.read_ref()?,
                percent_data: stream.read_ref()?,
            },
            "NiLookAtController" => ControllerKind::LookAt {
                look_at: stream.read_ref()?,
            },
            "NiFlipController" => ControllerKind::Flip {
                texture_slot: stream.read_u32()?,
                delta: stream.read_f32()?,
                sources: stream.read_ref_list()?,
            },
            _ => ControllerKind::ParticleSystem(Box::new(ParticleSystemController::read(stream)?)),
        };
        Ok(Self { base, kind })
    }

    /// Keyed-data record this controller samples, if any.
    pub fn data(&self) -> RecordRef {
        match &self.kind {
            ControllerKind::Keyframe { data }
            | ControllerKind::Visibility { data }
            | ControllerKind::Uv { data, .. }
            | ControllerKind::Alpha { data }
            | ControllerKind::MaterialColor { data }
            | ControllerKind::Roll { data }
            | ControllerKind::GeomMorpher { data, .. } => *data,
            ControllerKind::Path { path_data, .. } => *path_data,
            _ => RecordRef::NONE,
        }
    }
}

// ─── Particle modifiers ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub enum ModifierKind {
    Gravity {
        decay: f32,
        force: f32,
        /// 0 = planar, 1 = spherical.
        field_type: u32,
        position: Vector3<f32>,
        direction: Vector3<f32>,
    },
    GrowFade {
        grow_time: f32,
        fade_time: f32,
    },
    Color {
        data: RecordRef,
    },
    Rotation {
        random_initial_axis: bool,
        initial_axis: Vector3<f32>,
        speed: f32,
    },
    PlanarCollider {
        collision: ColliderResponse,
        extents: Vector2<f32>,
        position: Vector3<f32>,
        x_axis: Vector3<f32>,
        y_axis: Vector3<f32>,
        /// Normal in `xyz`, distance in `w`.
        plane: Vector4<f32>,
    },
    SphericalCollider {
        collision: ColliderResponse,
        radius: f32,
        center: Vector3<f32>,
    },
    Bomb {
        range: f32,
        duration: f32,
        strength: f32,
        start_time: f32,
        decay_type: u32,
        symmetry_type: Option<u32>,
        position: Vector3<f32>,
        direction: Vector3<f32>,
    },
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ColliderResponse {
    pub bounce: f32,
    pub spawn_on_collide: bool,
    pub die_on_collide: bool,
}

impl ColliderResponse {
    fn read(stream: &mut NifStream) -> Result<Self, DecodeError> {
        let bounce = stream.read_f32()?;
        let (spawn_on_collide, die_on_collide) = if stream.version().at_least(4, 2, 0, 2) {
            (stream.read_bool()?, stream.read_bool()?)
        } else {
            (false, false)
        };
        Ok(Self {
            bounce,
            spawn_on_collide,
            die_on_collide,
        })
    }
}

/// Link in a particle controller's modifier chain.
#[derive(Debug, Clone, Serialize)]
pub struct ParticleModifier {
    pub next: RecordRef,
    pub controller: RecordRef,
    pub kind: ModifierKind,
}

impl ParticleModifier {
    pub(crate) fn read(stream: &mut NifStream, tag: &str) -> Result<Self, DecodeError> {
        let next = stream.read_ref()?;
        let controller = stream.read_ref()?;

        let kind = match tag {
            "NiGravity" => ModifierKind::Gravity {
                decay: stream.read_f32()?,
                force: stream.read_f32()?,
                field_type: stream.read_u32()?,
                position: stream.read_vector3()?,
                direction: stream.read_vector3()?,
            },
            "NiParticleGrowFade" => ModifierKind::GrowFade {
                grow_time: stream.read_f32()?,
                fade_time: stream.read_f32()?,
            },
            "NiParticleColorModifier" => ModifierKind::Color {
                data: stream.read_ref()?,
            },
            "NiParticleRotation" => ModifierKind::Rotation {
                random_initial_axis: stream.read_byte_bool()?,
                initial_axis: stream.read_vector3()?,
                speed: stream.read_f32()?,
            },
            "NiPlanarCollider" => ModifierKind::PlanarCollider {
                collision: ColliderResponse::read(stream)?,
                extents: stream.read_vector2()?,
                position: stream.read_vector3()?,
                x_axis: stream.read_vector3()?,
                y_axis: stream.read_vector3()?,
                plane: stream.read_vector4()?,
            },
            "NiSphericalCollider" => ModifierKind::SphericalCollider {
                collision: ColliderResponse::read(stream)?,
                radius: stream.read_f32()?,
                center: stream.read_vector3()?,
            },
            _ => ModifierKind::Bomb {
                range: stream.read_f32()?,
                duration: stream.read_f32()?,
                strength: stream.read_f32()?,
                start_time: stream.read_f32()?,
                decay_type: stream.read_u32()?,
                symmetry_type: if stream.version().at_least(4, 1, 0, 12) {
                    Some(stream.read_u32()?)
                } else {
                    None
                },
                position: stream.read_vector3()?,
                direction: stream.read_vector3()?,
            },
        };

        Ok(Self {
            next,
            controller,
            kind,
        })
    }
}
