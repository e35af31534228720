//! Extraction des SOAP Faults retournés par un device.

use crate::xml;

/// Classification d'une réponse non-2xx ou porteuse d'un Fault.
///
/// Le texte reason/detail du device est conservé tel quel, uniquement pour
/// le diagnostic - un Fault n'est jamais rejoué automatiquement.
#[derive(Debug, Clone)]
pub struct SoapFault {
    pub http_status: u16,
    pub http_reason: String,
    pub reason: Option<String>,
    pub detail: Option<String>,
}

impl SoapFault {
    /// Tente d'extraire un `Fault` SOAP 1.2 du body d'une réponse HTTP.
    ///
    /// Retourne `None` si le body ne parse pas ou ne contient pas de Fault ;
    /// le caller retombe alors sur le statut HTTP brut.
    pub fn from_response(http_status: u16, http_reason: &str, body: &str) -> Option<Self> {
        let tree = xml::parse_tree(body).ok()?;
        let body_element = xml::child(&tree, "Body")?;
        // Certains devices imbriquent le Fault sous un élément intermédiaire
        let fault = xml::find_descendant(body_element, "Fault")?;

        // SOAP 1.2 : Fault/Reason/Text ; certains devices émettent encore
        // le faultstring SOAP 1.1
        let reason = xml::descend(fault, &["Reason", "Text"])
            .or_else(|| xml::child(fault, "faultstring"))
            .map(xml::text_of)
            .filter(|t| !t.is_empty());

        let detail = xml::child(fault, "Detail")
            .or_else(|| xml::child(fault, "detail"))
            .map(xml::text_of)
            .filter(|t| !t.is_empty());

        Some(SoapFault {
            http_status,
            http_reason: http_reason.to_string(),
            reason,
            detail,
        })
    }

    /// Certains devices signalent un échec d'authentification par un Fault
    /// "Sender not authorized" sur HTTP 400 au lieu d'un 401.
    pub fn is_unauthorized(&self) -> bool {
        self.http_status == 400
            && self
                .reason
                .as_deref()
                .is_some_and(|r| r.contains("Sender not authorized"))
    }
}
