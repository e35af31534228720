//! # Module Commands - Builders de commandes ONVIF
//!
//! Builders typés pour le jeu représentatif de commandes device/media/PTZ.
//! Chaque builder valide ses paramètres à la construction (types contraints,
//! enum taggée pour IPv4/IPv6) puis produit un [`CommandRequest`] : nom
//! d'opération, fragment de body XML et namespaces à déclarer sur
//! l'enveloppe. Aucune I/O ici, la session device fait l'appel.

use std::net::{Ipv4Addr, Ipv6Addr};

use onvifsoap::envelope::{
    NS_ONVIF_DEVICE, NS_ONVIF_MEDIA, NS_ONVIF_PTZ, NS_ONVIF_SCHEMA, xml_escape,
};

use crate::errors::ControlPointError;

/// Une commande prête à être enveloppée et envoyée.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// Nom de l'opération ONVIF (`GetProfiles`, `ContinuousMove`, ...)
    pub operation: &'static str,

    /// Fragment XML du body SOAP
    pub body: String,

    /// Namespaces (préfixe, uri) à déclarer sur la racine de l'enveloppe
    pub namespaces: Vec<(&'static str, &'static str)>,
}

/// Protocole de transport demandé pour un stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProtocol {
    Udp,
    Http,
    Rtsp,
}

impl StreamProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamProtocol::Udp => "UDP",
            StreamProtocol::Http => "HTTP",
            StreamProtocol::Rtsp => "RTSP",
        }
    }
}

/// Vitesse PTZ normalisée, chaque axe dans `[-1.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PtzSpeed {
    pub x: f32,
    pub y: f32,
    pub zoom: f32,
}

impl PtzSpeed {
    pub fn new(x: f32, y: f32, zoom: f32) -> Result<Self, ControlPointError> {
        for (axis, value) in [("x", x), ("y", y), ("zoom", zoom)] {
            if !(-1.0..=1.0).contains(&value) || !value.is_finite() {
                return Err(ControlPointError::validation(
                    axis,
                    format!("speed {} out of [-1.0, 1.0]", value),
                ));
            }
        }
        Ok(Self { x, y, zoom })
    }
}

/// Adresse IP, variantes mutuellement exclusives.
///
/// La validation est faite à la construction : pas de bag `{type, addr}`
/// sondé à l'exécution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpAddress {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl IpAddress {
    pub fn parse(text: &str) -> Result<Self, ControlPointError> {
        if let Ok(v4) = text.parse::<Ipv4Addr>() {
            return Ok(IpAddress::V4(v4));
        }
        if let Ok(v6) = text.parse::<Ipv6Addr>() {
            return Ok(IpAddress::V6(v6));
        }
        Err(ControlPointError::validation(
            "address",
            format!("'{}' is neither IPv4 nor IPv6", text),
        ))
    }
}

fn device_ns() -> Vec<(&'static str, &'static str)> {
    vec![("tds", NS_ONVIF_DEVICE)]
}

fn media_ns() -> Vec<(&'static str, &'static str)> {
    vec![("trt", NS_ONVIF_MEDIA), ("tt", NS_ONVIF_SCHEMA)]
}

fn ptz_ns() -> Vec<(&'static str, &'static str)> {
    vec![("tptz", NS_ONVIF_PTZ), ("tt", NS_ONVIF_SCHEMA)]
}

fn require_token(token: &str) -> Result<String, ControlPointError> {
    if token.trim().is_empty() {
        return Err(ControlPointError::validation(
            "profile_token",
            "must not be empty",
        ));
    }
    Ok(xml_escape(token))
}

/// `GetSystemDateAndTime` : seule commande émise sans credentials,
/// elle sert à apprendre l'offset d'horloge du device.
pub fn get_system_date_and_time() -> CommandRequest {
    CommandRequest {
        operation: "GetSystemDateAndTime",
        body: "<tds:GetSystemDateAndTime/>".to_string(),
        namespaces: device_ns(),
    }
}

pub fn get_capabilities() -> CommandRequest {
    CommandRequest {
        operation: "GetCapabilities",
        body: "<tds:GetCapabilities><tds:Category>All</tds:Category></tds:GetCapabilities>"
            .to_string(),
        namespaces: device_ns(),
    }
}

pub fn get_device_information() -> CommandRequest {
    CommandRequest {
        operation: "GetDeviceInformation",
        body: "<tds:GetDeviceInformation/>".to_string(),
        namespaces: device_ns(),
    }
}

pub fn get_scopes() -> CommandRequest {
    CommandRequest {
        operation: "GetScopes",
        body: "<tds:GetScopes/>".to_string(),
        namespaces: device_ns(),
    }
}

pub fn get_profiles() -> CommandRequest {
    CommandRequest {
        operation: "GetProfiles",
        body: "<trt:GetProfiles/>".to_string(),
        namespaces: media_ns(),
    }
}

/// `GetStreamUri` en RTP-Unicast sur le protocole demandé.
pub fn get_stream_uri(
    profile_token: &str,
    protocol: StreamProtocol,
) -> Result<CommandRequest, ControlPointError> {
    let token = require_token(profile_token)?;
    let body = format!(
        "<trt:GetStreamUri>\
         <trt:StreamSetup>\
         <tt:Stream>RTP-Unicast</tt:Stream>\
         <tt:Transport><tt:Protocol>{}</tt:Protocol></tt:Transport>\
         </trt:StreamSetup>\
         <trt:ProfileToken>{}</trt:ProfileToken>\
         </trt:GetStreamUri>",
        protocol.as_str(),
        token
    );
    Ok(CommandRequest {
        operation: "GetStreamUri",
        body,
        namespaces: media_ns(),
    })
}

pub fn get_snapshot_uri(profile_token: &str) -> Result<CommandRequest, ControlPointError> {
    let token = require_token(profile_token)?;
    Ok(CommandRequest {
        operation: "GetSnapshotUri",
        body: format!(
            "<trt:GetSnapshotUri><trt:ProfileToken>{}</trt:ProfileToken></trt:GetSnapshotUri>",
            token
        ),
        namespaces: media_ns(),
    })
}

/// `ContinuousMove` : vitesse pan/tilt/zoom bornée par [`PtzSpeed`].
pub fn continuous_move(
    profile_token: &str,
    speed: PtzSpeed,
) -> Result<CommandRequest, ControlPointError> {
    let token = require_token(profile_token)?;
    let body = format!(
        "<tptz:ContinuousMove>\
         <tptz:ProfileToken>{}</tptz:ProfileToken>\
         <tptz:Velocity>\
         <tt:PanTilt x=\"{}\" y=\"{}\"/>\
         <tt:Zoom x=\"{}\"/>\
         </tptz:Velocity>\
         </tptz:ContinuousMove>",
        token, speed.x, speed.y, speed.zoom
    );
    Ok(CommandRequest {
        operation: "ContinuousMove",
        body,
        namespaces: ptz_ns(),
    })
}

pub fn ptz_stop(profile_token: &str) -> Result<CommandRequest, ControlPointError> {
    let token = require_token(profile_token)?;
    let body = format!(
        "<tptz:Stop>\
         <tptz:ProfileToken>{}</tptz:ProfileToken>\
         <tptz:PanTilt>true</tptz:PanTilt>\
         <tptz:Zoom>true</tptz:Zoom>\
         </tptz:Stop>",
        token
    );
    Ok(CommandRequest {
        operation: "Stop",
        body,
        namespaces: ptz_ns(),
    })
}

/// `SetNetworkDefaultGateway` : la variante de l'enum choisit l'élément.
pub fn set_network_default_gateway(address: &IpAddress) -> CommandRequest {
    let body = match address {
        IpAddress::V4(addr) => format!(
            "<tds:SetNetworkDefaultGateway><tds:IPv4Address>{}</tds:IPv4Address></tds:SetNetworkDefaultGateway>",
            addr
        ),
        IpAddress::V6(addr) => format!(
            "<tds:SetNetworkDefaultGateway><tds:IPv6Address>{}</tds:IPv6Address></tds:SetNetworkDefaultGateway>",
            addr
        ),
    };
    CommandRequest {
        operation: "SetNetworkDefaultGateway",
        body,
        namespaces: device_ns(),
    }
}
