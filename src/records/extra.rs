use serde::Serialize;

use super::RecordRef;
use crate::error::DecodeError;
use crate::stream::NifStream;

/// One `(time, label)` marker. A label may span several lines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextKey {
    pub time: f32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExtraPayload {
    String(String),
    TextKeys(Vec<TextKey>),
    /// Opaque payload skipped by its byte count.
    Opaque { byte_count: u32 },
}

/// Link in the singly linked extra-data chain hanging off a named object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtraData {
    pub next: RecordRef,
    pub payload: ExtraPayload,
}

impl ExtraData {
    /// Reads the chain header and the payload for a known tag, or skips the
    /// payload for anything else ending in `ExtraData`.
    pub(crate) fn read(stream: &mut NifStream, tag: &str) -> Result<Self, DecodeError> {
        let next = stream.read_ref()?;
        let byte_count = stream.read_u32()?;

        let payload = match tag {
            "NiStringExtraData" => ExtraPayload::String(stream.read_string()?),
            "NiTextKeyExtraData" => {
                let count = stream.read_u32()? as usize;
                ExtraPayload::TextKeys(stream.read_array(count, 8, |s| {
                    Ok(TextKey {
                        time: s.read_f32()?,
                        text: s.read_string()?,
                    })
                })?)
            }
            _ => {
                stream.skip(byte_count as usize)?;
                ExtraPayload::Opaque { byte_count }
            }
        };

        Ok(Self { next, payload })
    }

    pub fn text_keys(&self) -> Option<&[TextKey]> {
        match &self.payload {
            ExtraPayload::TextKeys(keys) => Some(keys),
            _ => None,
        }
    }
}

/// Tags with a dedicated reader. Other `…ExtraData` tags are decoded
/// generically and reported.
pub(crate) fn is_known_extra_tag(tag: &str) -> bool {
    matches!(
        tag,
        "NiExtraData" | "NiStringExtraData" | "NiTextKeyExtraData" | "NiVertWeightsExtraData"
    )
}
