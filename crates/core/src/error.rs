/// Result alias that carries the custom [`BeatSyncError`] type.
pub type Result<T> = std::result::Result<T, BeatSyncError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum BeatSyncError {
    /// Free-form error used where no narrower variant applies.
    #[error("{0}")]
    Message(String),
    /// Caller supplied input that can never be valid.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration or preset files that failed to parse.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// Errors raised by the FFT backend of the spectrum analyser.
    #[error("fft: {0}")]
    Fft(#[from] realfft::FftError),
    /// A plugin failed validation while being registered.
    #[error("plugin `{id}` rejected: {reason}")]
    InvalidPlugin { id: String, reason: String },
    #[error("unknown plugin `{0}`")]
    UnknownPlugin(String),
    #[error("unknown preset `{0}`")]
    UnknownPreset(String),
    /// A configuration value did not match the parameter schema.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },
    /// Drawing surface lookups and context acquisition.
    #[error("surface: {0}")]
    Surface(String),
    /// Fault raised from inside a plugin's lifecycle method.
    #[error("plugin `{id}` failed: {message}")]
    Plugin { id: String, message: String },
    /// A shared lock was poisoned by a panicking holder.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
}

impl BeatSyncError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn plugin(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Plugin {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl From<&str> for BeatSyncError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for BeatSyncError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
