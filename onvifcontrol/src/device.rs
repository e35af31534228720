//! # Module Device - Session device ONVIF
//!
//! Orchestration des appels SOAP vers un device découvert :
//!
//! - ✅ Apprentissage de l'offset d'horloge (requête date/heure non authentifiée)
//! - ✅ Bootstrap validé étape par étape : capacités → infos → profils
//! - ✅ Résolution des URIs de stream (par protocole) et de snapshot par profil
//! - ✅ Événements de session sur le bus (SessionReady, ProfilesLoaded)
//!
//! Les commandes media sont adressées à la xaddr Media annoncée par les
//! capacités ; les commandes device restent sur l'URL de service initiale.

use chrono::{DateTime, TimeZone, Utc};
use futures::future::try_join_all;
use tracing::{debug, info, warn};
use xmltree::Element;

use onvifsoap::envelope::build_envelope;
use onvifsoap::transport::{SoapClient, SoapEndpoint};
use onvifsoap::{SoapClientError, xml};

use crate::commands::{self, CommandRequest, PtzSpeed, StreamProtocol};
use crate::errors::ControlPointError;
use crate::events::{ControlPointEvent, EventBus};

/// Xaddrs des services annoncés par `GetCapabilities`.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    pub device_xaddr: Option<String>,
    pub media_xaddr: Option<String>,
    pub events_xaddr: Option<String>,
    pub ptz_xaddr: Option<String>,
    pub imaging_xaddr: Option<String>,
}

/// Identité du device (`GetDeviceInformation`).
#[derive(Debug, Clone, Default)]
pub struct DeviceInformation {
    pub manufacturer: String,
    pub model: String,
    pub firmware_version: String,
    pub serial_number: String,
    pub hardware_id: String,
}

/// Profil média minimal : token (clé des commandes media) et nom d'affichage.
#[derive(Debug, Clone)]
pub struct MediaProfile {
    pub token: String,
    pub name: String,
}

/// URIs résolues pour un profil.
#[derive(Debug, Clone)]
pub struct ProfileMedia {
    pub profile: MediaProfile,
    /// Une entrée par protocole demandé et supporté par le device
    pub stream_uris: Vec<(StreamProtocol, String)>,
    pub snapshot_uri: Option<String>,
}

/// Session vers un device : endpoint + client SOAP + état de bootstrap.
pub struct DeviceSession {
    endpoint: SoapEndpoint,
    client: SoapClient,
    bus: EventBus,
    capabilities: Option<DeviceCapabilities>,
    information: Option<DeviceInformation>,
    profiles: Vec<MediaProfile>,
}

impl DeviceSession {
    pub fn new(service_url: impl Into<String>) -> Self {
        Self {
            endpoint: SoapEndpoint::new(service_url),
            client: SoapClient::new(),
            bus: EventBus::new(),
            capabilities: None,
            information: None,
            profiles: Vec::new(),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.endpoint = self.endpoint.with_credentials(username, password);
        self
    }

    pub fn subscribe(&self) -> crossbeam_channel::Receiver<ControlPointEvent> {
        self.bus.subscribe()
    }

    pub fn service_url(&self) -> &str {
        &self.endpoint.url
    }

    pub fn capabilities(&self) -> Option<&DeviceCapabilities> {
        self.capabilities.as_ref()
    }

    pub fn information(&self) -> Option<&DeviceInformation> {
        self.information.as_ref()
    }

    pub fn profiles(&self) -> &[MediaProfile] {
        &self.profiles
    }

    /// Offset d'horloge appris (ms, device moins local).
    pub fn clock_offset_ms(&self) -> i64 {
        self.endpoint.clock_offset_ms
    }

    /// Bootstrap complet de la session, chaque étape validée avant la
    /// suivante : horloge → capacités → informations → profils.
    pub async fn initialize(&mut self) -> Result<(), ControlPointError> {
        self.learn_clock_offset().await?;
        self.fetch_capabilities().await?;
        self.fetch_device_information().await?;
        self.bus.emit(ControlPointEvent::SessionReady {
            url: self.endpoint.url.clone(),
        });
        self.fetch_profiles().await?;
        self.bus.emit(ControlPointEvent::ProfilesLoaded {
            url: self.endpoint.url.clone(),
            count: self.profiles.len(),
        });
        info!(
            "✅ device session ready: {} ({} profile(s))",
            self.endpoint.url,
            self.profiles.len()
        );
        Ok(())
    }

    /// Interroge la date/heure du device (sans authentification, la commande
    /// doit être acceptée telle quelle) et mémorise l'offset pour dater les
    /// digests WS-Security suivants.
    pub async fn learn_clock_offset(&mut self) -> Result<(), ControlPointError> {
        let command = commands::get_system_date_and_time();
        let response = self.call(&self.endpoint.url.clone(), &command, false).await?;
        let device_utc = parse_utc_date_time(&response)?;
        let offset_ms = device_utc
            .signed_duration_since(Utc::now())
            .num_milliseconds();
        debug!("device {} clock offset: {} ms", self.endpoint.url, offset_ms);
        self.endpoint.clock_offset_ms = offset_ms;
        Ok(())
    }

    async fn fetch_capabilities(&mut self) -> Result<(), ControlPointError> {
        let command = commands::get_capabilities();
        let response = self.call(&self.endpoint.url.clone(), &command, true).await?;
        self.capabilities = Some(parse_capabilities(&response)?);
        Ok(())
    }

    async fn fetch_device_information(&mut self) -> Result<(), ControlPointError> {
        let command = commands::get_device_information();
        let response = self.call(&self.endpoint.url.clone(), &command, true).await?;
        self.information = Some(parse_device_information(&response));
        Ok(())
    }

    async fn fetch_profiles(&mut self) -> Result<(), ControlPointError> {
        let command = commands::get_profiles();
        let media_xaddr = self.media_xaddr()?.to_string();
        let response = self.call(&media_xaddr, &command, true).await?;
        self.profiles = parse_profiles(&response)?;
        Ok(())
    }

    /// URI de stream d'un profil pour un protocole donné.
    pub async fn stream_uri(
        &self,
        profile_token: &str,
        protocol: StreamProtocol,
    ) -> Result<String, ControlPointError> {
        let command = commands::get_stream_uri(profile_token, protocol)?;
        let media_xaddr = self.media_xaddr()?.to_string();
        let response = self.call(&media_xaddr, &command, true).await?;
        parse_media_uri(&response)
    }

    /// URI de snapshot JPEG d'un profil.
    pub async fn snapshot_uri(&self, profile_token: &str) -> Result<String, ControlPointError> {
        let command = commands::get_snapshot_uri(profile_token)?;
        let media_xaddr = self.media_xaddr()?.to_string();
        let response = self.call(&media_xaddr, &command, true).await?;
        parse_media_uri(&response)
    }

    /// Résout stream et snapshot pour tous les profils chargés.
    ///
    /// Chaque sous-fetch est réellement attendu avant que l'agrégat ne se
    /// résolve. Un protocole que le device ne supporte pas est omis de la
    /// liste ; toute autre erreur fait échouer l'agrégat.
    pub async fn resolve_media_uris(
        &self,
        protocols: &[StreamProtocol],
    ) -> Result<Vec<ProfileMedia>, ControlPointError> {
        if self.capabilities.is_none() {
            return Err(ControlPointError::NotInitialized(self.endpoint.url.clone()));
        }

        let per_profile = self.profiles.iter().map(|profile| async move {
            let mut stream_uris = Vec::new();
            for protocol in protocols {
                match self.optional(self.stream_uri(&profile.token, *protocol)).await? {
                    Some(uri) => stream_uris.push((*protocol, uri)),
                    None => {
                        debug!("profile {} has no {} stream", profile.token, protocol.as_str())
                    }
                }
            }
            let snapshot_uri = self.optional(self.snapshot_uri(&profile.token)).await?;
            Ok::<ProfileMedia, ControlPointError>(ProfileMedia {
                profile: profile.clone(),
                stream_uris,
                snapshot_uri,
            })
        });

        try_join_all(per_profile).await
    }

    /// Mouvement PTZ continu sur le profil donné.
    pub async fn continuous_move(
        &self,
        profile_token: &str,
        speed: PtzSpeed,
    ) -> Result<(), ControlPointError> {
        let command = commands::continuous_move(profile_token, speed)?;
        let xaddr = self.ptz_xaddr()?.to_string();
        self.call(&xaddr, &command, true).await?;
        Ok(())
    }

    /// Arrêt de tout mouvement PTZ sur le profil donné.
    pub async fn ptz_stop(&self, profile_token: &str) -> Result<(), ControlPointError> {
        let command = commands::ptz_stop(profile_token)?;
        let xaddr = self.ptz_xaddr()?.to_string();
        self.call(&xaddr, &command, true).await?;
        Ok(())
    }

    /// Transforme "opération non supportée" en absence, propage le reste.
    async fn optional(
        &self,
        fetch: impl Future<Output = Result<String, ControlPointError>>,
    ) -> Result<Option<String>, ControlPointError> {
        match fetch.await {
            Ok(uri) => Ok(Some(uri)),
            Err(ControlPointError::Soap(SoapClientError::UnsupportedOperation(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn media_xaddr(&self) -> Result<&str, ControlPointError> {
        let capabilities = self
            .capabilities
            .as_ref()
            .ok_or_else(|| ControlPointError::NotInitialized(self.endpoint.url.clone()))?;
        // Certains devices n'annoncent pas de xaddr Media : l'URL de service
        // répond alors aussi aux commandes media
        Ok(capabilities
            .media_xaddr
            .as_deref()
            .unwrap_or(&self.endpoint.url))
    }

    fn ptz_xaddr(&self) -> Result<&str, ControlPointError> {
        let capabilities = self
            .capabilities
            .as_ref()
            .ok_or_else(|| ControlPointError::NotInitialized(self.endpoint.url.clone()))?;
        Ok(capabilities
            .ptz_xaddr
            .as_deref()
            .unwrap_or(&self.endpoint.url))
    }

    /// Un cycle commande → enveloppe → transport, vers la xaddr donnée.
    async fn call(
        &self,
        xaddr: &str,
        command: &CommandRequest,
        with_credentials: bool,
    ) -> Result<Element, ControlPointError> {
        let mut endpoint = self.endpoint.clone();
        endpoint.url = xaddr.to_string();

        let credentials = if with_credentials {
            endpoint.credentials()
        } else {
            None
        };
        let envelope = build_envelope(
            &command.body,
            &command.namespaces,
            endpoint.clock_offset_ms,
            credentials,
        );

        let response = self
            .client
            .request_command(&endpoint, command.operation, &envelope)
            .await?;
        Ok(response)
    }
}

/// Extrait l'heure UTC d'un `GetSystemDateAndTimeResponse`.
fn parse_utc_date_time(response: &Element) -> Result<DateTime<Utc>, ControlPointError> {
    let utc = xml::descend(response, &["SystemDateAndTime", "UTCDateTime"])
        .ok_or_else(|| ControlPointError::missing_element("UTCDateTime"))?;

    let field = |path: &[&str]| -> Result<u32, ControlPointError> {
        let element = xml::descend(utc, path)
            .ok_or_else(|| ControlPointError::missing_element(&path.join("/")))?;
        let text = xml::text_of(element);
        text.parse::<u32>()
            .map_err(|_| ControlPointError::bad_value(&path.join("/"), &text))
    };

    let year = field(&["Date", "Year"])? as i32;
    let month = field(&["Date", "Month"])?;
    let day = field(&["Date", "Day"])?;
    let hour = field(&["Time", "Hour"])?;
    let minute = field(&["Time", "Minute"])?;
    let second = field(&["Time", "Second"])?;

    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .ok_or_else(|| {
            ControlPointError::bad_value(
                "UTCDateTime",
                &format!("{}-{}-{} {}:{}:{}", year, month, day, hour, minute, second),
            )
        })
}

/// Extrait les xaddrs de service d'un `GetCapabilitiesResponse`.
fn parse_capabilities(response: &Element) -> Result<DeviceCapabilities, ControlPointError> {
    let capabilities = xml::child(response, "Capabilities")
        .ok_or_else(|| ControlPointError::missing_element("Capabilities"))?;

    let xaddr_of = |service: &str| -> Option<String> {
        xml::descend(capabilities, &[service, "XAddr"])
            .map(xml::text_of)
            .filter(|x| !x.is_empty())
    };

    Ok(DeviceCapabilities {
        device_xaddr: xaddr_of("Device"),
        media_xaddr: xaddr_of("Media"),
        events_xaddr: xaddr_of("Events"),
        ptz_xaddr: xaddr_of("PTZ"),
        imaging_xaddr: xaddr_of("Imaging"),
    })
}

/// Extrait l'identité d'un `GetDeviceInformationResponse`. Tous les champs
/// sont optionnels sur le fil, absents ⇒ chaîne vide.
fn parse_device_information(response: &Element) -> DeviceInformation {
    let text = |name: &str| {
        xml::child(response, name)
            .map(xml::text_of)
            .unwrap_or_default()
    };
    DeviceInformation {
        manufacturer: text("Manufacturer"),
        model: text("Model"),
        firmware_version: text("FirmwareVersion"),
        serial_number: text("SerialNumber"),
        hardware_id: text("HardwareId"),
    }
}

/// Extrait les profils d'un `GetProfilesResponse`. Un profil sans attribut
/// `token` est inutilisable pour les commandes media et rejeté.
fn parse_profiles(response: &Element) -> Result<Vec<MediaProfile>, ControlPointError> {
    xml::children(response, "Profiles")
        .into_iter()
        .map(|profile| {
            let token = xml::attr(profile, "token")
                .ok_or_else(|| ControlPointError::missing_element("Profiles@token"))?
                .to_string();
            let name = xml::child(profile, "Name")
                .map(xml::text_of)
                .unwrap_or_default();
            Ok(MediaProfile { token, name })
        })
        .collect()
}

/// Extrait l'URI d'un `MediaUri/Uri` (GetStreamUri comme GetSnapshotUri).
fn parse_media_uri(response: &Element) -> Result<String, ControlPointError> {
    let uri = xml::descend(response, &["MediaUri", "Uri"])
        .map(xml::text_of)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ControlPointError::missing_element("MediaUri/Uri"))?;
    if uri.chars().any(char::is_whitespace) {
        warn!("suspicious media uri with whitespace: {}", uri);
    }
    Ok(uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_tree(operation: &str, inner: &str) -> Element {
        let xml_text = format!(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
    xmlns:tds="http://www.onvif.org/ver10/device/wsdl"
    xmlns:trt="http://www.onvif.org/ver10/media/wsdl"
    xmlns:tt="http://www.onvif.org/ver10/schema">
  <s:Body><tds:{op}Response>{inner}</tds:{op}Response></s:Body>
</s:Envelope>"#,
            op = operation,
            inner = inner,
        );
        let tree = xml::parse_tree(&xml_text).unwrap();
        let response_name = format!("{}Response", operation);
        xml::descend(&tree, &["Body", response_name.as_str()])
            .unwrap()
            .clone()
    }

    #[test]
    fn test_parse_utc_date_time() {
        let response = response_tree(
            "GetSystemDateAndTime",
            r#"<tds:SystemDateAndTime>
                 <tt:UTCDateTime>
                   <tt:Time><tt:Hour>14</tt:Hour><tt:Minute>30</tt:Minute><tt:Second>5</tt:Second></tt:Time>
                   <tt:Date><tt:Year>2024</tt:Year><tt:Month>6</tt:Month><tt:Day>15</tt:Day></tt:Date>
                 </tt:UTCDateTime>
               </tds:SystemDateAndTime>"#,
        );
        let parsed = parse_utc_date_time(&response).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 6, 15, 14, 30, 5).unwrap());
    }

    #[test]
    fn test_parse_utc_date_time_missing_field() {
        let response = response_tree(
            "GetSystemDateAndTime",
            "<tds:SystemDateAndTime><tt:UTCDateTime/></tds:SystemDateAndTime>",
        );
        assert!(matches!(
            parse_utc_date_time(&response),
            Err(ControlPointError::MissingElement(_))
        ));
    }

    #[test]
    fn test_parse_capabilities_xaddrs() {
        let response = response_tree(
            "GetCapabilities",
            r#"<tds:Capabilities>
                 <tt:Device><tt:XAddr>http://cam/onvif/device_service</tt:XAddr></tt:Device>
                 <tt:Media><tt:XAddr>http://cam/onvif/media_service</tt:XAddr></tt:Media>
                 <tt:PTZ><tt:XAddr></tt:XAddr></tt:PTZ>
               </tds:Capabilities>"#,
        );
        let caps = parse_capabilities(&response).unwrap();
        assert_eq!(caps.media_xaddr.as_deref(), Some("http://cam/onvif/media_service"));
        assert_eq!(caps.device_xaddr.as_deref(), Some("http://cam/onvif/device_service"));
        // XAddr vide = service non annoncé
        assert!(caps.ptz_xaddr.is_none());
        assert!(caps.events_xaddr.is_none());
    }

    #[test]
    fn test_parse_device_information_tolerates_absent_fields() {
        let response = response_tree(
            "GetDeviceInformation",
            "<tds:Manufacturer>Acme</tds:Manufacturer><tds:Model>X1</tds:Model>",
        );
        let info = parse_device_information(&response);
        assert_eq!(info.manufacturer, "Acme");
        assert_eq!(info.model, "X1");
        assert_eq!(info.serial_number, "");
    }

    #[test]
    fn test_parse_profiles() {
        let response = response_tree(
            "GetProfiles",
            r#"<trt:Profiles token="Profile_1"><tt:Name>Main</tt:Name></trt:Profiles>
               <trt:Profiles token="Profile_2"><tt:Name>Sub</tt:Name></trt:Profiles>"#,
        );
        let profiles = parse_profiles(&response).unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].token, "Profile_1");
        assert_eq!(profiles[1].name, "Sub");
    }

    #[test]
    fn test_profile_without_token_is_rejected() {
        let response = response_tree("GetProfiles", "<trt:Profiles><tt:Name>Bad</tt:Name></trt:Profiles>");
        assert!(parse_profiles(&response).is_err());
    }

    #[test]
    fn test_parse_media_uri() {
        let response = response_tree(
            "GetStreamUri",
            "<trt:MediaUri><tt:Uri>rtsp://cam/stream1</tt:Uri></trt:MediaUri>",
        );
        assert_eq!(parse_media_uri(&response).unwrap(), "rtsp://cam/stream1");
    }

    #[test]
    fn test_media_uri_missing_is_an_error() {
        let response = response_tree("GetStreamUri", "<trt:MediaUri/>");
        assert!(matches!(
            parse_media_uri(&response),
            Err(ControlPointError::MissingElement(_))
        ));
    }

    #[tokio::test]
    async fn test_media_calls_require_initialized_session() {
        let session = DeviceSession::new("http://192.0.2.1/onvif/device_service");
        let err = session.resolve_media_uris(&[StreamProtocol::Rtsp]).await.unwrap_err();
        assert!(matches!(err, ControlPointError::NotInitialized(_)));
    }
}
