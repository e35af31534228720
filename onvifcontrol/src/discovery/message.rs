//! Messages WS-Discovery : construction des Probes, parsing des ProbeMatches.

use tracing::trace;
use uuid::Uuid;

use onvifsoap::envelope::{NS_ONVIF_NETWORK, NS_SOAP_ENV, NS_WSA, NS_WSD, collapse_between_tags};
use onvifsoap::xml;

use crate::model::DeviceMatch;

/// Construit le message `Probe` pour un type de device.
///
/// Chaque message porte son propre `wsa:MessageID` aléatoire ; le `ReplyTo`
/// anonyme demande des réponses unicast vers le port source.
pub fn build_probe_message(device_type: &str, message_id: Uuid) -> String {
    let message = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="{soap}" xmlns:wsa="{wsa}" xmlns:d="{wsd}" xmlns:dn="{dn}">
  <s:Header>
    <wsa:Action>{wsd}/Probe</wsa:Action>
    <wsa:MessageID>urn:uuid:{id}</wsa:MessageID>
    <wsa:To>urn:schemas-xmlsoap-org:ws:2005:04:discovery</wsa:To>
    <wsa:ReplyTo><wsa:Address>{wsa}/role/anonymous</wsa:Address></wsa:ReplyTo>
  </s:Header>
  <s:Body>
    <d:Probe>
      <d:Types>dn:{device_type}</d:Types>
    </d:Probe>
  </s:Body>
</s:Envelope>"#,
        soap = NS_SOAP_ENV,
        wsa = NS_WSA,
        wsd = NS_WSD,
        dn = NS_ONVIF_NETWORK,
        id = message_id,
        device_type = device_type,
    );
    collapse_between_tags(&message)
}

/// Interprète un datagramme entrant comme `ProbeMatches/ProbeMatch`.
///
/// Protocole best-effort : un datagramme malformé ou qui n'est pas un
/// ProbeMatch est écarté en silence (n'importe quel pair peut être bruyant).
pub fn parse_probe_matches(datagram: &str) -> Vec<DeviceMatch> {
    let Ok(tree) = xml::parse_tree(datagram) else {
        trace!("discarding non-XML datagram ({} bytes)", datagram.len());
        return Vec::new();
    };

    let Some(probe_matches) = xml::descend(&tree, &["Body", "ProbeMatches"]) else {
        trace!("discarding datagram without ProbeMatches");
        return Vec::new();
    };

    xml::children(probe_matches, "ProbeMatch")
        .into_iter()
        .filter_map(|probe_match| {
            let urn = xml::descend(probe_match, &["EndpointReference", "Address"])
                .map(xml::text_of)
                .filter(|u| !u.is_empty())?;

            let xaddrs = xml::child(probe_match, "XAddrs")
                .map(|e| split_list(&xml::text_of(e)))
                .unwrap_or_default();

            // Les Scopes sont parfois imbriqués sous un wrapper à attribut
            // texte ; text_of agrège tout
            let scopes = xml::child(probe_match, "Scopes")
                .map(|e| split_list(&xml::text_of(e)))
                .unwrap_or_default();

            let types = xml::child(probe_match, "Types")
                .map(|e| split_list(&xml::text_of(e)))
                .unwrap_or_default();

            Some(DeviceMatch::new(urn, xaddrs, scopes, types))
        })
        .collect()
}

fn split_list(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}
