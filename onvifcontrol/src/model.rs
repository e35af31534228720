//! Modèle des devices découverts et parsing des scopes ONVIF.

/// Préfixes de scope fixés par la norme ONVIF pour les champs descriptifs.
const SCOPE_NAME_PREFIX: &str = "onvif://www.onvif.org/name/";
const SCOPE_HARDWARE_PREFIX: &str = "onvif://www.onvif.org/hardware/";
const SCOPE_LOCATION_PREFIX: &str = "onvif://www.onvif.org/location/";

/// Un device distinct découvert par WS-Discovery, dédupliqué par URN.
///
/// Immutable une fois inséré dans une session : la première réponse pour un
/// URN gagne, les doublons suivants sont ignorés.
#[derive(Debug, Clone)]
pub struct DeviceMatch {
    /// Adresse d'endpoint opaque (`EndpointReference/Address`)
    pub urn: String,

    /// URLs candidates du service device (`XAddrs`, séparées par du whitespace)
    pub xaddrs: Vec<String>,

    /// URIs de scope brutes
    pub scopes: Vec<String>,

    /// Types annoncés (`Types`, QNames)
    pub types: Vec<String>,

    /// Nom d'affichage dérivé du scope `name/`
    pub name: String,

    /// Identifiant matériel dérivé du scope `hardware/`
    pub hardware: String,

    /// Localisation dérivée du scope `location/`
    pub location: String,
}

impl DeviceMatch {
    /// Construit un match et dérive les champs d'affichage depuis les scopes.
    pub fn new(urn: String, xaddrs: Vec<String>, scopes: Vec<String>, types: Vec<String>) -> Self {
        let name = scope_value(&scopes, SCOPE_NAME_PREFIX);
        let hardware = scope_value(&scopes, SCOPE_HARDWARE_PREFIX);
        let location = scope_value(&scopes, SCOPE_LOCATION_PREFIX);
        Self {
            urn,
            xaddrs,
            scopes,
            types,
            name,
            hardware,
            location,
        }
    }
}

/// Valeur du premier scope commençant par `prefix`, chaîne vide sinon.
fn scope_value(scopes: &[String], prefix: &str) -> String {
    scopes
        .iter()
        .find_map(|s| s.strip_prefix(prefix))
        .map(decode_scope_text)
        .unwrap_or_default()
}

/// Les scopes encodent les espaces en `%20` ou `_` suivant les constructeurs.
fn decode_scope_text(raw: &str) -> String {
    raw.replace("%20", " ").replace('_', " ")
}
