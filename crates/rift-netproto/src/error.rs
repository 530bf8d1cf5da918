use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("bad magic")]
    BadMagic,
    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),
    #[error("buffer too short")]
    TooShort,
    #[error("payload length mismatch")]
    LengthMismatch,
    #[error("payload too large: {0}")]
    PayloadTooLarge(usize),
    #[error("unknown envelope kind: {0}")]
    UnknownKind(u8),
    #[error("unknown routing target: {0}")]
    UnknownTarget(u8),
    #[error("unknown control packet type: {0}")]
    UnknownControl(String),
    #[error("unexpected envelope kind {actual:?}, expected {expected:?}")]
    KindMismatch {
        expected: crate::envelope::EnvelopeKind,
        actual: crate::envelope::EnvelopeKind,
    },
    #[error("postcard decode error: {0}")]
    Postcard(#[from] postcard::Error),
}
