/// Result alias used across the crate.
pub type TimelapseResult<T> = Result<T, TimelapseError>;

/// Crate error type.
///
/// Each variant corresponds to one failure class of the movie pipeline. Shape and configuration
/// errors are raised eagerly, before any frame is scheduled; `ChunkRead` is the only transient
/// kind and is raised from inside frame nodes.
#[derive(thiserror::Error, Debug)]
pub enum TimelapseError {
    /// The source could not be opened or its format was not recognized.
    #[error("unreadable file: {0}")]
    UnreadableFile(String),

    /// A stage received data with missing axes or inconsistent axis lengths.
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// Mutually exclusive or out-of-range configuration (including overwrite refusal).
    #[error("conflicting arguments: {0}")]
    ConflictingArguments(String),

    /// Unknown output container/codec.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// I/O failure while reading one plane of the source.
    #[error("chunk read error (scene {scene}, time {time}): {message}")]
    ChunkRead {
        /// Scene index of the failing read.
        scene: usize,
        /// Time index of the failing read.
        time: usize,
        /// Underlying failure description.
        message: String,
    },

    /// The video encoder failed.
    #[error("encode error: {0}")]
    Encode(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Serializable discriminant of [`TimelapseError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`TimelapseError::UnreadableFile`].
    UnreadableFile,
    /// See [`TimelapseError::InvalidShape`].
    InvalidShape,
    /// See [`TimelapseError::ConflictingArguments`].
    ConflictingArguments,
    /// See [`TimelapseError::UnsupportedFormat`].
    UnsupportedFormat,
    /// See [`TimelapseError::ChunkRead`].
    ChunkRead,
    /// See [`TimelapseError::Encode`].
    Encode,
    /// See [`TimelapseError::Other`].
    Other,
}

impl TimelapseError {
    pub fn unreadable(msg: impl Into<String>) -> Self {
        Self::UnreadableFile(msg.into())
    }

    pub fn invalid_shape(msg: impl Into<String>) -> Self {
        Self::InvalidShape(msg.into())
    }

    pub fn conflicting(msg: impl Into<String>) -> Self {
        Self::ConflictingArguments(msg.into())
    }

    pub fn unsupported_format(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    pub fn chunk_read(scene: usize, time: usize, msg: impl Into<String>) -> Self {
        Self::ChunkRead {
            scene,
            time,
            message: msg.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    /// Discriminant of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnreadableFile(_) => ErrorKind::UnreadableFile,
            Self::InvalidShape(_) => ErrorKind::InvalidShape,
            Self::ConflictingArguments(_) => ErrorKind::ConflictingArguments,
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Self::ChunkRead { .. } => ErrorKind::ChunkRead,
            Self::Encode(_) => ErrorKind::Encode,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// `true` for failures worth retrying inside a frame node.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ChunkRead { .. })
    }

    /// Rebuild an error from its wire form (kind + rendered message).
    pub fn from_kind(kind: ErrorKind, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match kind {
            ErrorKind::UnreadableFile => Self::UnreadableFile(msg),
            ErrorKind::InvalidShape => Self::InvalidShape(msg),
            ErrorKind::ConflictingArguments => Self::ConflictingArguments(msg),
            ErrorKind::UnsupportedFormat => Self::UnsupportedFormat(msg),
            ErrorKind::ChunkRead => Self::ChunkRead {
                scene: 0,
                time: 0,
                message: msg,
            },
            ErrorKind::Encode => Self::Encode(msg),
            ErrorKind::Other => Self::Other(anyhow::anyhow!(msg)),
        }
    }

    /// Message without the display prefix, for round-tripping through [`Self::from_kind`].
    pub fn detail(&self) -> String {
        match self {
            Self::UnreadableFile(m)
            | Self::InvalidShape(m)
            | Self::ConflictingArguments(m)
            | Self::UnsupportedFormat(m)
            | Self::Encode(m) => m.clone(),
            Self::ChunkRead { message, .. } => message.clone(),
            Self::Other(e) => format!("{e:#}"),
        }
    }
}
