use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    InvalidInput(String),
    InvalidData(String),
    Io(String),
    Delivery(String),
    Config(String),
}

impl AppError {
    pub fn invalid_input<M: Into<String>>(message: M) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn invalid_data<M: Into<String>>(message: M) -> Self {
        Self::InvalidData(message.into())
    }

    pub fn io<M: Into<String>>(message: M) -> Self {
        Self::Io(message.into())
    }

    pub fn delivery<M: Into<String>>(message: M) -> Self {
        Self::Delivery(message.into())
    }

    pub fn config<M: Into<String>>(message: M) -> Self {
        Self::Config(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidData(_) => "invalid_data",
            Self::Io(_) => "io_error",
            Self::Delivery(_) => "delivery_error",
            Self::Config(_) => "config_error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidInput(message) => message,
            Self::InvalidData(message) => message,
            Self::Io(message) => message,
            Self::Delivery(message) => message,
            Self::Config(message) => message,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.code(), self.message())
    }
}

impl std::error::Error for AppError {}

/// Whether a failed send is worth attempting again.
///
/// Sweeps retry both kinds on the next pass; the distinction only shapes
/// what gets logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    /// The channel refused the message itself (bad address, bad payload).
    Rejected,
    /// Network trouble, throttling or a server-side failure.
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryError {
    pub kind: DeliveryErrorKind,
    pub message: String,
}

impl DeliveryError {
    pub fn rejected<M: Into<String>>(message: M) -> Self {
        Self {
            kind: DeliveryErrorKind::Rejected,
            message: message.into(),
        }
    }

    pub fn transient<M: Into<String>>(message: M) -> Self {
        Self {
            kind: DeliveryErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == DeliveryErrorKind::Transient
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            DeliveryErrorKind::Rejected => "rejected",
            DeliveryErrorKind::Transient => "transient",
        };
        write!(f, "{label}: {}", self.message)
    }
}

impl std::error::Error for DeliveryError {}

impl From<DeliveryError> for AppError {
    fn from(err: DeliveryError) -> Self {
        AppError::delivery(err.to_string())
    }
}
