//! Client SOAP-over-HTTP : un POST, un seul retry authentifié.
//!
//! Le cycle est volontairement sans retry automatique : un timeout ou une
//! erreur réseau remonte au caller, qui décide. Seul le challenge 401 donne
//! droit à une seconde requête, authentifiée via [`crate::auth`] ; un second
//! 401 est un échec d'authentification définitif.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use tracing::{debug, trace, warn};
use xmltree::Element;

use crate::auth::{authorization_header, parse_challenge};
use crate::errors::SoapClientError;
use crate::fault::SoapFault;
use crate::xml;

const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// Timeout par défaut d'un cycle requête/réponse.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 3000;

/// Adresse de service d'un device, avec credentials et décalage d'horloge.
///
/// `clock_offset_ms` (device moins local) est appris une fois via une requête
/// de date/heure non authentifiée, puis réutilisé pour dater tous les digests
/// WS-Security adressés à ce device.
#[derive(Debug, Clone)]
pub struct SoapEndpoint {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub clock_offset_ms: i64,
}

impl SoapEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            clock_offset_ms: 0,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Credentials sous forme de paire, si configurés.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }
}

/// Client de transport SOAP.
pub struct SoapClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl Default for SoapClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SoapClient {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .http1_title_case_headers()
                .build()
                .expect("reqwest client"),
            timeout,
        }
    }

    /// Envoie `envelope` à `endpoint` et retourne le sous-arbre
    /// `Body/{operation}Response` de la réponse.
    ///
    /// Classification des échecs :
    /// - erreur réseau / timeout : jamais confondue avec un échec protocole
    /// - 401 (ou Fault "Sender not authorized" sur 400) : `Unauthorized`
    /// - 200 sans `{operation}Response` : `UnsupportedOperation`
    /// - autre non-200 : `Fault` si le body en contient un, sinon `Http`
    pub async fn request_command(
        &self,
        endpoint: &SoapEndpoint,
        operation: &str,
        envelope: &str,
    ) -> Result<Element, SoapClientError> {
        let mut response = self.post_once(endpoint, envelope, None).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let retried = self.retry_with_challenge(endpoint, envelope, &response).await?;
            if retried.status() == StatusCode::UNAUTHORIZED {
                // Un seul retry authentifié ; un second 401 est définitif
                return Err(SoapClientError::Unauthorized(endpoint.url.clone()));
            }
            response = retried;
        }

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport_error(&endpoint.url, e))?;
        trace!("SOAP response from {} ({}): {} bytes", endpoint.url, status, body.len());

        if status.is_success() {
            let tree = xml::parse_tree(&body)?;
            let response_name = format!("{}Response", operation);
            match xml::descend(&tree, &["Body", response_name.as_str()]) {
                Some(subtree) => Ok(subtree.clone()),
                None => {
                    debug!("{} did not answer {} - operation unsupported", endpoint.url, response_name);
                    Err(SoapClientError::UnsupportedOperation(operation.to_string()))
                }
            }
        } else {
            let reason = status.canonical_reason().unwrap_or("").to_string();
            match SoapFault::from_response(status.as_u16(), &reason, &body) {
                Some(fault) if fault.is_unauthorized() => {
                    Err(SoapClientError::Unauthorized(endpoint.url.clone()))
                }
                Some(fault) => Err(SoapClientError::Fault {
                    http_status: fault.http_status,
                    reason: fault.reason.unwrap_or_default(),
                    detail: fault.detail.unwrap_or_default(),
                }),
                None => Err(SoapClientError::Http {
                    status: status.as_u16(),
                    reason,
                }),
            }
        }
    }

    /// Rejoue la requête une fois avec le header `Authorization` calculé
    /// depuis le challenge de la réponse 401.
    async fn retry_with_challenge(
        &self,
        endpoint: &SoapEndpoint,
        envelope: &str,
        response: &reqwest::Response,
    ) -> Result<reqwest::Response, SoapClientError> {
        let Some((username, password)) = endpoint.credentials() else {
            return Err(SoapClientError::Unauthorized(endpoint.url.clone()));
        };

        let header_value = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .ok_or_else(|| SoapClientError::Unauthorized(endpoint.url.clone()))?
            .to_str()
            .map_err(|e| SoapClientError::BadChallenge(e.to_string()))?;

        let challenge = parse_challenge(header_value)?;
        let path = url::Url::parse(&endpoint.url)
            .map_err(|e| SoapClientError::BadUrl(endpoint.url.clone(), e.to_string()))?
            .path()
            .to_string();
        let authorization = authorization_header(&challenge, "POST", &path, username, password)?;

        debug!("🔐 {} answered 401, retrying with {:?} auth", endpoint.url, challenge.scheme);
        self.post_once(endpoint, envelope, Some(authorization)).await
    }

    async fn post_once(
        &self,
        endpoint: &SoapEndpoint,
        envelope: &str,
        authorization: Option<String>,
    ) -> Result<reqwest::Response, SoapClientError> {
        let mut request = self
            .http
            .post(&endpoint.url)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .body(envelope.to_string());
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization);
        }

        request.send().await.map_err(|e| {
            warn!("SOAP request to {} failed: {}", endpoint.url, e);
            classify_transport_error(&endpoint.url, e)
        })
    }
}

fn classify_transport_error(url: &str, error: reqwest::Error) -> SoapClientError {
    if error.is_timeout() {
        SoapClientError::Timeout(url.to_string())
    } else {
        SoapClientError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    const OK_ENVELOPE: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
  <s:Body>
    <tds:GetCapabilitiesResponse xmlns:tds="http://www.onvif.org/ver10/device/wsdl">
      <tds:Capabilities><tds:Media><tds:XAddr>http://cam/onvif/media</tds:XAddr></tds:Media></tds:Capabilities>
    </tds:GetCapabilitiesResponse>
  </s:Body>
</s:Envelope>"#;

    const FAULT_ENVELOPE: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
  <s:Body>
    <s:Fault>
      <s:Reason><s:Text xml:lang="en">Sender not authorized</s:Text></s:Reason>
      <s:Detail><s:Text>Wrong credentials</s:Text></s:Detail>
    </s:Fault>
  </s:Body>
</s:Envelope>"#;

    struct StubResponse {
        status: u16,
        reason: &'static str,
        headers: Vec<(&'static str, String)>,
        body: String,
    }

    impl StubResponse {
        fn ok(body: &str) -> Self {
            Self {
                status: 200,
                reason: "OK",
                headers: vec![],
                body: body.to_string(),
            }
        }

        fn unauthorized_digest() -> Self {
            Self {
                status: 401,
                reason: "Unauthorized",
                headers: vec![(
                    "WWW-Authenticate",
                    r#"Digest realm="IP Camera", nonce="abcdef0123456789", qop="auth""#.to_string(),
                )],
                body: String::new(),
            }
        }
    }

    /// Sert une séquence de réponses HTTP, une connexion par réponse, et
    /// renvoie chaque requête brute capturée sur le channel.
    async fn spawn_stub(responses: Vec<StubResponse>) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for response in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let request = read_http_request(&mut stream).await;
                tx.send(request).ok();

                let mut out = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                    response.status,
                    response.reason,
                    response.body.len()
                );
                for (name, value) in &response.headers {
                    out.push_str(&format!("{}: {}\r\n", name, value));
                }
                out.push_str("\r\n");
                out.push_str(&response.body);
                stream.write_all(out.as_bytes()).await.unwrap();
                stream.shutdown().await.ok();
            }
        });

        (format!("http://{}/onvif/device_service", addr), rx)
    }

    async fn read_http_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 1024];
        let mut body_start = None;
        loop {
            let n = stream.read(&mut tmp).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&tmp[..n]);
            if body_start.is_none() {
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    body_start = Some(pos + 4);
                }
            }
            if let Some(start) = body_start {
                let headers = String::from_utf8_lossy(&buf[..start]);
                let content_length = headers
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if buf.len() >= start + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn endpoint(url: &str) -> SoapEndpoint {
        SoapEndpoint::new(url).with_credentials("admin", "secret")
    }

    #[tokio::test]
    async fn test_success_returns_response_subtree() {
        let (url, mut rx) = spawn_stub(vec![StubResponse::ok(OK_ENVELOPE)]).await;
        let client = SoapClient::new();

        let tree = client
            .request_command(&endpoint(&url), "GetCapabilities", "<envelope/>")
            .await
            .unwrap();

        assert_eq!(tree.name, "GetCapabilitiesResponse");
        let request = rx.recv().await.unwrap();
        assert!(request.starts_with("POST /onvif/device_service"));
        assert!(request.contains("application/soap+xml"));
        assert!(rx.try_recv().is_err(), "exactly one roundtrip expected");
    }

    #[tokio::test]
    async fn test_digest_challenge_then_success_is_two_roundtrips() {
        let (url, mut rx) = spawn_stub(vec![
            StubResponse::unauthorized_digest(),
            StubResponse::ok(OK_ENVELOPE),
        ])
        .await;
        let client = SoapClient::new();

        let tree = client
            .request_command(&endpoint(&url), "GetCapabilities", "<envelope/>")
            .await
            .unwrap();
        assert_eq!(tree.name, "GetCapabilitiesResponse");

        let first = rx.recv().await.unwrap();
        assert!(!first.to_ascii_lowercase().contains("authorization:"));
        let second = rx.recv().await.unwrap();
        assert!(second.contains("Authorization: Digest"));
        assert!(second.contains(r#"username="admin""#));
        assert!(second.contains(r#"uri="/onvif/device_service""#));
        assert!(second.contains("nc=00000001"));
        assert!(rx.try_recv().is_err(), "exactly two roundtrips expected");
    }

    #[tokio::test]
    async fn test_second_401_is_final_auth_failure() {
        let (url, mut rx) = spawn_stub(vec![
            StubResponse::unauthorized_digest(),
            StubResponse::unauthorized_digest(),
        ])
        .await;
        let client = SoapClient::new();

        let result = client
            .request_command(&endpoint(&url), "GetCapabilities", "<envelope/>")
            .await;
        assert!(matches!(result, Err(SoapClientError::Unauthorized(_))));

        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        assert!(rx.try_recv().is_err(), "no third attempt after second 401");
    }

    #[tokio::test]
    async fn test_missing_response_element_is_unsupported_operation() {
        let (url, _rx) = spawn_stub(vec![StubResponse::ok(OK_ENVELOPE)]).await;
        let client = SoapClient::new();

        let result = client
            .request_command(&endpoint(&url), "GetServiceCapabilities", "<envelope/>")
            .await;
        match result {
            Err(SoapClientError::UnsupportedOperation(op)) => {
                assert_eq!(op, "GetServiceCapabilities")
            }
            other => panic!("expected UnsupportedOperation, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_fault_reason_is_preserved() {
        let (url, _rx) = spawn_stub(vec![StubResponse {
            status: 500,
            reason: "Internal Server Error",
            headers: vec![],
            body: r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body><s:Fault><s:Reason><s:Text>Action failed</s:Text></s:Reason></s:Fault></s:Body></s:Envelope>"#.to_string(),
        }])
        .await;
        let client = SoapClient::new();

        let result = client
            .request_command(&endpoint(&url), "GetProfiles", "<envelope/>")
            .await;
        match result {
            Err(SoapClientError::Fault { http_status, reason, .. }) => {
                assert_eq!(http_status, 500);
                assert_eq!(reason, "Action failed");
            }
            other => panic!("expected Fault, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_sender_not_authorized_on_400_maps_to_unauthorized() {
        let (url, _rx) = spawn_stub(vec![StubResponse {
            status: 400,
            reason: "Bad Request",
            headers: vec![],
            body: FAULT_ENVELOPE.to_string(),
        }])
        .await;
        let client = SoapClient::new();

        let result = client
            .request_command(&endpoint(&url), "GetProfiles", "<envelope/>")
            .await;
        assert!(matches!(result, Err(SoapClientError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        // Bind puis drop pour obtenir un port fermé
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = SoapClient::new();
        let result = client
            .request_command(
                &endpoint(&format!("http://{}/onvif/device_service", addr)),
                "GetProfiles",
                "<envelope/>",
            )
            .await;
        assert!(matches!(result, Err(SoapClientError::Network { .. })));
    }
}
