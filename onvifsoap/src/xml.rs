//! Navigation dans l'arbre de valeurs XML (collaborateur xmltree).
//!
//! Les devices ONVIF préfixent leurs réponses avec des namespaces variés
//! (`tds:`, `trt:`, `tt:`, `SOAP-ENV:`...). xmltree range le préfixe à part
//! dans `Element::prefix`, donc toute la navigation se fait sur le nom local.
//! Les attributs restent exposés via `Element::attributes`, le texte via
//! [`text_of`].

use std::io::BufReader;

use xmltree::Element;

/// Parse un payload XML brut en arbre d'éléments.
pub fn parse_tree(xml: &str) -> Result<Element, xmltree::ParseError> {
    let reader = BufReader::new(xml.as_bytes());
    Element::parse(reader)
}

/// Cherche un enfant direct par nom local, préfixe ignoré.
pub fn child<'a>(parent: &'a Element, local_name: &str) -> Option<&'a Element> {
    parent
        .children
        .iter()
        .find_map(|n| n.as_element().filter(|e| e.name == local_name))
}

/// Tous les enfants directs portant ce nom local.
///
/// xmltree ne fusionne pas les tags frères répétés : le caller qui attend
/// une liste (ex: `ProbeMatch`, `Profiles`) passe par ici.
pub fn children<'a>(parent: &'a Element, local_name: &str) -> Vec<&'a Element> {
    parent
        .children
        .iter()
        .filter_map(|n| n.as_element().filter(|e| e.name == local_name))
        .collect()
}

/// Descend une suite de noms locaux depuis `root`.
pub fn descend<'a>(root: &'a Element, path: &[&str]) -> Option<&'a Element> {
    let mut current = root;
    for name in path {
        current = child(current, name)?;
    }
    Some(current)
}

/// Premier descendant (profondeur d'abord) portant ce nom local.
pub fn find_descendant<'a>(root: &'a Element, local_name: &str) -> Option<&'a Element> {
    for node in &root.children {
        if let Some(elem) = node.as_element() {
            if elem.name == local_name {
                return Some(elem);
            }
            if let Some(found) = find_descendant(elem, local_name) {
                return Some(found);
            }
        }
    }
    None
}

/// Texte agrégé d'un élément, chaîne vide si absent.
///
/// Certains devices enveloppent le texte des `Scopes` dans un wrapper à
/// attributs ; on agrège donc récursivement tout le texte descendant.
pub fn text_of(element: &Element) -> String {
    let mut out = String::new();
    collect_text(element, &mut out);
    out.trim().to_string()
}

fn collect_text(element: &Element, out: &mut String) {
    for node in &element.children {
        match node {
            xmltree::XMLNode::Text(t) => out.push_str(t),
            xmltree::XMLNode::Element(e) => collect_text(e, out),
            _ => {}
        }
    }
}

/// Valeur d'attribut d'un élément.
pub fn attr<'a>(element: &'a Element, name: &str) -> Option<&'a str> {
    element.attributes.get(name).map(String::as_str)
}
