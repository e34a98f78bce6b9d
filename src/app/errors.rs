use std::fmt;

use crate::monitoring::MonitoringError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    MissingIdentifier { field: &'static str },
    InvalidBaseUrl { url: String, message: String },
    InvalidOptions { message: String },
    InvalidTarget { target: String, message: String },
    MonitoringUnavailable { message: String },
}

impl AppError {
    pub fn code_str(&self) -> &'static str {
        match self {
            AppError::MissingIdentifier { .. } => "app/missing-identifier",
            AppError::InvalidBaseUrl { .. } => "app/invalid-base-url",
            AppError::InvalidOptions { .. } => "app/invalid-options",
            AppError::InvalidTarget { .. } => "app/invalid-target",
            AppError::MonitoringUnavailable { .. } => "app/monitoring-unavailable",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::MissingIdentifier { field } => {
                write!(f, "An Apigee client needs a non-empty {field}")
            }
            AppError::InvalidBaseUrl { url, message } => {
                write!(f, "Base URL '{url}' is not usable: {message}")
            }
            AppError::InvalidOptions { message } => write!(f, "Invalid client options: {message}"),
            AppError::InvalidTarget { target, message } => {
                write!(f, "Cannot build a request for '{target}': {message}")
            }
            AppError::MonitoringUnavailable { message } => {
                write!(f, "Monitoring is unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for AppError {}

impl From<MonitoringError> for AppError {
    fn from(err: MonitoringError) -> Self {
        AppError::InvalidOptions {
            message: err.to_string(),
        }
    }
}
