// error.rs — demo container errors

use myq2_wire::WireError;

#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    /// A sub-message failed to decode. `offset` is the file offset of the
    /// lump or packet, `tag` the sub-message being decoded.
    #[error("{tag} in block at offset {offset}: {source}")]
    Decode {
        offset: u64,
        tag: &'static str,
        #[source]
        source: WireError,
    },

    /// Structured state could not be written in the target encoding.
    #[error("encode failed: {0}")]
    Encode(#[from] WireError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse options: {0}")]
    Config(#[from] toml::de::Error),
}

impl DemoError {
    pub fn decode(offset: u64, tag: &'static str, source: WireError) -> Self {
        DemoError::Decode { offset, tag, source }
    }

    /// Underlying codec failure, if any.
    pub fn wire(&self) -> Option<&WireError> {
        match self {
            DemoError::Decode { source, .. } | DemoError::Encode(source) => Some(source),
            _ => None,
        }
    }
}

pub type DemoResult<T> = Result<T, DemoError>;
