//! # onvifcontrol - Control point ONVIF
//!
//! Ce crate implémente la partie control point du client ONVIF :
//! découverte des caméras par WS-Discovery multicast et session device
//! pour le bootstrap capacités/profils/URIs média.
//!
//! ## Fonctionnalités
//!
//! - ✅ Probes WS-Discovery répétés avec déduplication par URN
//! - ✅ Sessions de découverte concurrentes et annulables (`stop_all_probes`)
//! - ✅ Session device : horloge → capacités → infos → profils, validé étape par étape
//! - ✅ Résolution des URIs de stream/snapshot par profil (tous les sous-fetchs attendus)
//! - ✅ Bus d'événements par liste de subscribers (crossbeam)
//!
//! ## Architecture
//!
//! - [`discovery`] : [`DiscoveryEngine`] - machine à états probe/retry/timeout
//! - [`device`] : [`DeviceSession`] - orchestration des appels SOAP
//! - [`commands`] : builders de commandes typés (validation à la construction)
//! - [`model`] : [`DeviceMatch`] et parsing des scopes descriptifs

pub mod commands;
pub mod device;
pub mod discovery;
pub mod errors;
pub mod events;
pub mod model;

pub use commands::{CommandRequest, IpAddress, PtzSpeed, StreamProtocol};
pub use device::{DeviceCapabilities, DeviceInformation, DeviceSession, MediaProfile, ProfileMedia};
pub use discovery::{DiscoveryConfig, DiscoveryEngine};
pub use errors::ControlPointError;
pub use events::{ControlPointEvent, EventBus};
pub use model::DeviceMatch;
