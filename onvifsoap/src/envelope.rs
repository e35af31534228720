//! Construction d'enveloppes SOAP 1.2 avec WS-Security UsernameToken.
//!
//! Le profil "password digest" de WS-Security n'envoie jamais le mot de
//! passe en clair : `digest = base64(SHA1(nonce || created || password))`.
//! La robustesse reste celle de SHA-1 face à un nonce visible du serveur,
//! ce n'est pas un substitut à un chiffrement de transport.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{Duration, Utc};
use rand::RngCore;
use sha1::{Digest, Sha1};

/// Namespace SOAP 1.2
pub const NS_SOAP_ENV: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Namespace WS-Addressing (version utilisée par WS-Discovery)
pub const NS_WSA: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";

/// Namespace WS-Discovery
pub const NS_WSD: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery";

/// Namespace WS-Security secext
pub const NS_WSSE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";

/// Namespace WS-Security utility
pub const NS_WSU: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";

const PASSWORD_DIGEST_TYPE: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest";
const NONCE_ENCODING_TYPE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";

/// Namespaces ONVIF courants (device management, media, PTZ, schéma)
pub const NS_ONVIF_DEVICE: &str = "http://www.onvif.org/ver10/device/wsdl";
pub const NS_ONVIF_MEDIA: &str = "http://www.onvif.org/ver10/media/wsdl";
pub const NS_ONVIF_PTZ: &str = "http://www.onvif.org/ver20/ptz/wsdl";
pub const NS_ONVIF_SCHEMA: &str = "http://www.onvif.org/ver10/schema";
pub const NS_ONVIF_NETWORK: &str = "http://www.onvif.org/ver10/network/wsdl";

/// Construit une enveloppe SOAP 1.2 autour d'un fragment de body.
///
/// `namespaces` est injecté sur l'élément racine sous forme de paires
/// (préfixe, URI). Si des credentials sont fournis, un header WS-Security
/// `UsernameToken` est inséré, daté de `now + clock_offset_ms` pour suivre
/// l'horloge du device.
///
/// La sortie est normalisée sans whitespace entre tags, pour que la mise en
/// page des octets signés soit stable.
pub fn build_envelope(
    body: &str,
    namespaces: &[(&str, &str)],
    clock_offset_ms: i64,
    credentials: Option<(&str, &str)>,
) -> String {
    let mut ns_decls = format!(r#" xmlns:s="{}""#, NS_SOAP_ENV);
    for (prefix, uri) in namespaces {
        ns_decls.push_str(&format!(r#" xmlns:{}="{}""#, prefix, uri));
    }

    let header = match credentials {
        Some((user, pass)) if !user.is_empty() => {
            format!("<s:Header>{}</s:Header>", security_header(user, pass, clock_offset_ms))
        }
        _ => String::new(),
    };

    let envelope = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <s:Envelope{ns}>{header}<s:Body>{body}</s:Body></s:Envelope>",
        ns = ns_decls,
        header = header,
        body = body,
    );

    collapse_between_tags(&envelope)
}

/// Header `wsse:Security` avec un UsernameToken frais.
pub fn security_header(username: &str, password: &str, clock_offset_ms: i64) -> String {
    let mut nonce = [0u8; 16];
    rand::rng().fill_bytes(&mut nonce);

    let created = (Utc::now() + Duration::milliseconds(clock_offset_ms))
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string();

    security_header_with(username, password, &nonce, &created)
}

/// Variante déterministe (nonce et timestamp imposés).
fn security_header_with(username: &str, password: &str, nonce: &[u8; 16], created: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();

    format!(
        r#"<wsse:Security s:mustUnderstand="1" xmlns:wsse="{wsse}" xmlns:wsu="{wsu}"><wsse:UsernameToken><wsse:Username>{user}</wsse:Username><wsse:Password Type="{pwd_type}">{pwd}</wsse:Password><wsse:Nonce EncodingType="{nonce_enc}">{nonce}</wsse:Nonce><wsu:Created>{created}</wsu:Created></wsse:UsernameToken></wsse:Security>"#,
        wsse = NS_WSSE,
        wsu = NS_WSU,
        user = xml_escape(username),
        pwd_type = PASSWORD_DIGEST_TYPE,
        pwd = BASE64.encode(digest),
        nonce_enc = NONCE_ENCODING_TYPE,
        nonce = BASE64.encode(nonce),
        created = created,
    )
}

/// Échappe les caractères réservés XML d'une valeur texte.
pub fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Supprime le whitespace insignifiant entre deux tags.
pub fn collapse_between_tags(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut pending_ws = String::new();
    for c in xml.chars() {
        if c.is_whitespace() {
            pending_ws.push(c);
            continue;
        }
        if !pending_ws.is_empty() {
            // Le whitespace entre '>' et '<' est de la mise en page, pas du contenu
            if !(out.ends_with('>') && c == '<') {
                out.push_str(&pending_ws);
            }
            pending_ws.clear();
        }
        out.push(c);
    }
    out
}
