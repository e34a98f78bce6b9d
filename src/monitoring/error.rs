use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MonitoringErrorCode {
    InvalidArgument,
    Internal,
    InstrumentationFault,
}

impl MonitoringErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitoringErrorCode::InvalidArgument => "monitoring/invalid-argument",
            MonitoringErrorCode::Internal => "monitoring/internal",
            MonitoringErrorCode::InstrumentationFault => "monitoring/instrumentation-fault",
        }
    }
}

#[derive(Clone, Debug)]
pub struct MonitoringError {
    pub code: MonitoringErrorCode,
    message: String,
}

impl MonitoringError {
    pub fn new(code: MonitoringErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl Display for MonitoringError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for MonitoringError {}

pub type MonitoringResult<T> = Result<T, MonitoringError>;

pub fn invalid_argument(message: impl Into<String>) -> MonitoringError {
    MonitoringError::new(MonitoringErrorCode::InvalidArgument, message)
}

pub fn internal_error(message: impl Into<String>) -> MonitoringError {
    MonitoringError::new(MonitoringErrorCode::Internal, message)
}

pub fn instrumentation_fault(message: impl Into<String>) -> MonitoringError {
    MonitoringError::new(MonitoringErrorCode::InstrumentationFault, message)
}
