//! Structures de l'enveloppe SOAP.

use xmltree::Element;

/// Enveloppe SOAP décodée.
#[derive(Debug, Clone)]
pub struct SoapEnvelope {
    /// En-tête SOAP optionnel.
    pub header: Option<SoapHeader>,

    /// Corps contenant l'action, la réponse ou le fault.
    pub body: SoapBody,
}

/// En-tête SOAP.
#[derive(Debug, Clone)]
pub struct SoapHeader {
    pub content: Element,
}

/// Corps SOAP.
#[derive(Debug, Clone)]
pub struct SoapBody {
    pub content: Element,
}

impl SoapEnvelope {
    pub fn new(body: SoapBody) -> Self {
        Self { header: None, body }
    }

    pub fn with_header(header: SoapHeader, body: SoapBody) -> Self {
        Self {
            header: Some(header),
            body,
        }
    }
}
