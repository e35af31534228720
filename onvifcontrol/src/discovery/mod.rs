//! # Module Discovery - WS-Discovery
//!
//! Ce module implémente le client WS-Discovery pour la découverte
//! multicast des devices ONVIF sur le réseau local.
//!
//! ## Fonctionnalités
//!
//! - ✅ Envoi de Probes SOAP-over-UDP en multicast, répétés contre la perte
//! - ✅ Collecte et déduplication des ProbeMatches par URN
//! - ✅ Complétion bornée par un timeout global par session
//! - ✅ Sessions concurrentes indépendantes, annulation globale
//!
//! ## Constants WS-Discovery
//!
//! - **Multicast Address**: 239.255.255.250:3702
//! - **Timeout**: 3000 ms
//! - **Retry interval**: 150 ms, 3 répétitions du jeu de probes

mod engine;
mod message;

pub use engine::{DiscoveryConfig, DiscoveryEngine};
pub use message::{build_probe_message, parse_probe_matches};

/// Adresse multicast WS-Discovery
pub const WS_DISCOVERY_MULTICAST_ADDR: &str = "239.255.255.250";

/// Port WS-Discovery
pub const WS_DISCOVERY_PORT: u16 = 3702;

/// Timeout global d'une session de probe (en millisecondes)
pub const DISCOVERY_TIMEOUT_MS: u64 = 3000;

/// Intervalle entre deux envois de probe (en millisecondes)
pub const DISCOVERY_RETRY_INTERVAL_MS: u64 = 150;

/// Nombre de répétitions du jeu de probes (multicast avec perte)
pub const DISCOVERY_RETRIES_MAX: u32 = 3;

/// Types de device sondés par défaut
pub const DEFAULT_DEVICE_TYPES: &[&str] =
    &["NetworkVideoTransmitter", "Device", "NetworkVideoDisplay"];
