//! Authentification HTTP Basic/Digest (RFC 2617) pour le transport SOAP.
//!
//! Le challenge `WWW-Authenticate` est reparsé à chaque 401 : aucun état
//! n'est conservé entre deux requêtes, donc le compteur `nc` vaut toujours
//! `00000001` (un nonce serveur n'est jamais réutilisé).
//!
//! Schéma Digest :
//!   HA1 = MD5(username:realm:password)
//!   HA2 = MD5(method:uri)
//!   sans qop      : response = MD5(HA1:nonce:HA2)
//!   avec qop=auth : response = MD5(HA1:nonce:nc:cnonce:qop:HA2)

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest, Md5};
use rand::RngCore;

use crate::errors::SoapClientError;

/// Schéma annoncé par le challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Digest,
}

/// Challenge éphémère parsé d'une réponse 401.
#[derive(Debug, Clone)]
pub struct DigestChallenge {
    pub scheme: AuthScheme,
    pub realm: String,
    pub nonce: String,
    pub algorithm: Option<String>,
    pub qop: Option<String>,
    pub opaque: Option<String>,
}

/// Parse la valeur d'un header `WWW-Authenticate`.
///
/// Grammaire permissive : liste `clé=valeur` séparée par des virgules,
/// valeurs éventuellement entre guillemets, clés inconnues ignorées.
pub fn parse_challenge(header_value: &str) -> Result<DigestChallenge, SoapClientError> {
    let trimmed = header_value.trim();
    let (scheme, params) = match trimmed.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest),
        None => (trimmed, ""),
    };

    let scheme = if scheme.eq_ignore_ascii_case("basic") {
        AuthScheme::Basic
    } else if scheme.eq_ignore_ascii_case("digest") {
        AuthScheme::Digest
    } else {
        return Err(SoapClientError::BadChallenge(format!(
            "unknown scheme '{}'",
            scheme
        )));
    };

    let mut challenge = DigestChallenge {
        scheme,
        realm: String::new(),
        nonce: String::new(),
        algorithm: None,
        qop: None,
        opaque: None,
    };

    for (key, value) in tokenize_params(params) {
        match key.to_ascii_lowercase().as_str() {
            "realm" => challenge.realm = value,
            "nonce" => challenge.nonce = value,
            "algorithm" => challenge.algorithm = Some(value),
            "qop" => challenge.qop = Some(value),
            "opaque" => challenge.opaque = Some(value),
            _ => {}
        }
    }

    if scheme == AuthScheme::Digest && challenge.nonce.is_empty() {
        return Err(SoapClientError::BadChallenge(
            "digest challenge without nonce".to_string(),
        ));
    }

    Ok(challenge)
}

/// Tokenizer `clé=valeur` tolérant aux guillemets et aux espaces.
fn tokenize_params(params: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut chars = params.chars().peekable();

    loop {
        // clé
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' {
                break;
            }
            chars.next();
            if c != ',' && !c.is_whitespace() {
                key.push(c);
            }
        }
        if chars.next().is_none() {
            break; // pas de '=', fin de liste
        }

        // valeur, éventuellement quotée
        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                value.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                chars.next();
                value.push(c);
            }
            value = value.trim().to_string();
        }

        if !key.is_empty() {
            pairs.push((key, value));
        }

        // séparateur
        while let Some(&c) = chars.peek() {
            if c == ',' || c.is_whitespace() {
                chars.next();
            } else {
                break;
            }
        }
        if chars.peek().is_none() {
            break;
        }
    }

    pairs
}

/// Calcule la valeur du header `Authorization` répondant à `challenge`.
///
/// Un `cnonce` frais est tiré pour chaque appel quand qop est présent.
/// `qop=auth-int` est refusé explicitement plutôt que dégradé en silence.
pub fn authorization_header(
    challenge: &DigestChallenge,
    method: &str,
    path: &str,
    username: &str,
    password: &str,
) -> Result<String, SoapClientError> {
    match challenge.scheme {
        AuthScheme::Basic => Ok(format!(
            "Basic {}",
            BASE64.encode(format!("{}:{}", username, password))
        )),
        AuthScheme::Digest => {
            let mut cnonce_bytes = [0u8; 8];
            rand::rng().fill_bytes(&mut cnonce_bytes);
            let cnonce = hex::encode(cnonce_bytes);
            digest_authorization(challenge, method, path, username, password, &cnonce)
        }
    }
}

/// Cœur déterministe du calcul Digest (cnonce imposé).
fn digest_authorization(
    challenge: &DigestChallenge,
    method: &str,
    path: &str,
    username: &str,
    password: &str,
    cnonce: &str,
) -> Result<String, SoapClientError> {
    let qop = match challenge.qop.as_deref() {
        None => None,
        Some(q) if q.split(',').any(|v| v.trim() == "auth") => Some("auth"),
        Some(q) if q.contains("auth-int") => {
            return Err(SoapClientError::QopAuthIntUnsupported);
        }
        Some(q) => {
            return Err(SoapClientError::BadChallenge(format!(
                "unsupported qop '{}'",
                q
            )));
        }
    };

    let mut ha1 = md5_hex(&format!("{}:{}:{}", username, challenge.realm, password));
    // MD5-sess mélange le cnonce dans HA1 ; sans qop le header n'emporte pas
    // de cnonce, donc la re-dérivation n'a de sens que sur le chemin qop
    if qop.is_some()
        && challenge
            .algorithm
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case("md5-sess"))
    {
        ha1 = md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, cnonce));
    }
    let ha2 = md5_hex(&format!("{}:{}", method, path));

    let response = match qop {
        None => md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2)),
        Some(qop) => md5_hex(&format!(
            "{}:{}:{}:{}:{}:{}",
            ha1, challenge.nonce, NC, cnonce, qop, ha2
        )),
    };

    let mut header = format!(
        r#"Digest username="{}", realm="{}", nonce="{}", uri="{}", response="{}""#,
        username, challenge.realm, challenge.nonce, path, response
    );
    if let Some(qop) = qop {
        header.push_str(&format!(r#", qop={}, nc={}, cnonce="{}""#, qop, NC, cnonce));
    }
    if let Some(algorithm) = &challenge.algorithm {
        header.push_str(&format!(", algorithm={}", algorithm));
    }
    if let Some(opaque) = &challenge.opaque {
        header.push_str(&format!(r#", opaque="{}""#, opaque));
    }

    Ok(header)
}

// Un challenge n'est jamais rejoué, le compteur de nonce reste à 1.
const NC: &str = "00000001";

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
