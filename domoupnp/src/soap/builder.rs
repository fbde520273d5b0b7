//! Construction des enveloppes SOAP de requête et de réponse.

use xmltree::{Element, EmitterConfig, XMLNode};

use super::ENVELOPE_NS;

/// Construit l'enveloppe d'invocation d'une action.
///
/// Format : `<u:Action xmlns:u="service-urn"><Arg>val</Arg>…</u:Action>`.
/// Les arguments sont émis dans l'ordre fourni (l'ordre du SCPD).
pub fn build_action_request(
    service_urn: &str,
    action: &str,
    args: &[(&str, &str)],
) -> Result<String, xmltree::Error> {
    let mut action_elem = Element::new(&format!("u:{action}"));
    action_elem
        .attributes
        .insert("xmlns:u".to_string(), service_urn.to_string());

    for (name, value) in args {
        let mut child = Element::new(name);
        child.children.push(XMLNode::Text((*value).to_string()));
        action_elem.children.push(XMLNode::Element(child));
    }

    wrap_in_envelope(action_elem)
}

/// Construit l'enveloppe de réponse d'une action.
///
/// Format : `<u:ActionResponse xmlns:u="service-urn">…</u:ActionResponse>`.
pub fn build_action_response(
    service_urn: &str,
    action: &str,
    values: &[(String, String)],
) -> Result<String, xmltree::Error> {
    let mut response_elem = Element::new(&format!("u:{action}Response"));
    response_elem
        .attributes
        .insert("xmlns:u".to_string(), service_urn.to_string());

    for (key, value) in values {
        let mut child = Element::new(key);
        child.children.push(XMLNode::Text(value.clone()));
        response_elem.children.push(XMLNode::Element(child));
    }

    wrap_in_envelope(response_elem)
}

/// Enrobe un élément dans `<s:Envelope><s:Body>…</s:Body></s:Envelope>`.
pub(super) fn wrap_in_envelope(inner: Element) -> Result<String, xmltree::Error> {
    let mut body = Element::new("s:Body");
    body.children.push(XMLNode::Element(inner));

    let mut envelope = Element::new("s:Envelope");
    envelope
        .attributes
        .insert("xmlns:s".to_string(), ENVELOPE_NS.to_string());
    envelope.attributes.insert(
        "s:encodingStyle".to_string(),
        "http://schemas.xmlsoap.org/soap/encoding/".to_string(),
    );
    envelope.children.push(XMLNode::Element(body));

    let mut buf = Vec::new();
    let config = EmitterConfig::new()
        .perform_indent(true)
        .indent_string("  ");
    envelope.write_with_config(&mut buf, config)?;

    Ok(String::from_utf8(buf).expect("xmltree emits valid UTF-8"))
}
