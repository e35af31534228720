use thiserror::Error;

/// Erreurs de la couche transport SOAP.
///
/// La taxonomie distingue les pannes réseau, les échecs d'authentification,
/// les opérations non supportées par le device et les SOAP Faults - elles ne
/// sont jamais confondues entre elles.
#[derive(Error, Debug)]
pub enum SoapClientError {
    #[error("Network error reaching {url}: {message}")]
    Network { url: String, message: String },

    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("Authentication rejected by {0}")]
    Unauthorized(String),

    #[error("Device does not support operation '{0}'")]
    UnsupportedOperation(String),

    #[error("SOAP fault (HTTP {http_status}): {reason} {detail}")]
    Fault {
        http_status: u16,
        reason: String,
        detail: String,
    },

    #[error("HTTP {status} {reason}")]
    Http { status: u16, reason: String },

    #[error("XML parse error: {0}")]
    Xml(#[from] xmltree::ParseError),

    #[error("Invalid auth challenge: {0}")]
    BadChallenge(String),

    #[error("qop=auth-int is not supported")]
    QopAuthIntUnsupported,

    #[error("Invalid endpoint URL {0}: {1}")]
    BadUrl(String, String),
}
