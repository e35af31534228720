//! Erreurs du control point.

use thiserror::Error;

use onvifsoap::SoapClientError;

#[derive(Error, Debug)]
pub enum ControlPointError {
    // Fatal à l'appel de découverte concerné uniquement
    #[error("Failed to bind discovery socket: {0}")]
    Bind(std::io::Error),

    #[error(transparent)]
    Soap(#[from] SoapClientError),

    #[error("Missing {0} element in SOAP response")]
    MissingElement(String),

    #[error("Invalid {0} value: {1}")]
    BadValue(String, String),

    #[error("Invalid parameter {0}: {1}")]
    Validation(String, String),

    #[error("Device session for {0} is not initialized")]
    NotInitialized(String),
}

impl ControlPointError {
    pub fn missing_element(name: &str) -> Self {
        ControlPointError::MissingElement(name.to_string())
    }

    pub fn bad_value(name: &str, value: &str) -> Self {
        ControlPointError::BadValue(name.to_string(), value.to_string())
    }

    pub fn validation(name: &str, message: impl Into<String>) -> Self {
        ControlPointError::Validation(name.to_string(), message.into())
    }
}
