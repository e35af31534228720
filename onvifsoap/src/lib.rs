//! # onvifsoap - Transport SOAP pour devices ONVIF
//!
//! Ce crate implémente la couche protocole d'un control point ONVIF :
//! construction d'enveloppes SOAP 1.2, authentification et transport HTTP.
//!
//! ## Fonctionnalités
//!
//! - ✅ Enveloppes SOAP 1.2 avec header WS-Security UsernameToken
//! - ✅ Authentification HTTP Basic et Digest (challenge/response)
//! - ✅ Cycle requête/réponse SOAP-over-HTTP avec classification des erreurs
//! - ✅ Extraction des SOAP Faults (reason/detail)
//! - ✅ Arbre de valeurs XML (xmltree) avec préfixes de namespace ignorés
//!
//! ## Architecture
//!
//! - [`envelope`] : construction d'enveloppes + digest WS-Security
//! - [`auth`] : parsing de challenge `WWW-Authenticate` et header `Authorization`
//! - [`transport`] : [`SoapClient`] - un POST, un retry authentifié, pas plus
//! - [`fault`] : [`SoapFault`] - erreur protocolaire retournée par le device
//! - [`xml`] : helpers de navigation dans l'arbre xmltree

pub mod auth;
pub mod envelope;
pub mod errors;
pub mod fault;
pub mod transport;
pub mod xml;

pub use auth::{AuthScheme, DigestChallenge, authorization_header, parse_challenge};
pub use envelope::build_envelope;
pub use errors::SoapClientError;
pub use fault::SoapFault;
pub use transport::{SoapClient, SoapEndpoint};
