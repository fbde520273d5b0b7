//! Description documents: the parsing contract and its XML
//! implementation.
//!
//! The engine only depends on the [`Descriptions`] trait; the bundled
//! [`XmlDescriptions`] turns raw device-description/SCPD bytes into the
//! in-memory model, reporting the first offending element on failure.

use std::io::BufReader;
use std::str::FromStr;

use thiserror::Error;
use url::Url;
use xmltree::Element;

use domoupnp::actions::{Action, Argument, Direction};
use domoupnp::services::Service;
use domoupnp::state_variables::{Evented, Moderation, StateVariable};
use domoupnp::value_ranges::ValueRange;
use domoupnp::variable_types::StateVarType;
use domoupnp::{Device, ResourceType, Udn, UpnpError};

/// Parse failure, naming the first offending element.
#[derive(Error, Debug)]
pub enum DescriptionError {
    #[error("description is not valid XML: {0}")]
    Xml(#[from] xmltree::ParseError),

    #[error("missing element <{0}>")]
    MissingElement(String),

    #[error("invalid element <{element}>: {detail}")]
    InvalidElement { element: String, detail: String },
}

impl From<DescriptionError> for UpnpError {
    fn from(err: DescriptionError) -> Self {
        UpnpError::MalformedMessage(err.to_string())
    }
}

/// Contract of the description collaborator.
pub trait Descriptions: Send + Sync {
    /// Parses a device description document into a device tree whose
    /// service URLs are resolved against `base_url`. Services carry no
    /// actions or variables yet; see [`Descriptions::parse_scpd`].
    fn parse_device(&self, xml: &[u8], base_url: &Url) -> Result<Device, DescriptionError>;

    /// Parses an SCPD document into the actions and variables of
    /// `service`.
    fn parse_scpd(&self, xml: &[u8], service: &mut Service) -> Result<(), DescriptionError>;
}

/// The bundled `xmltree` implementation.
pub struct XmlDescriptions;

impl Descriptions for XmlDescriptions {
    fn parse_device(&self, xml: &[u8], base_url: &Url) -> Result<Device, DescriptionError> {
        let root = Element::parse(BufReader::new(xml))?;
        if root.name != "root" {
            return Err(DescriptionError::InvalidElement {
                element: root.name.clone(),
                detail: "expected <root>".to_string(),
            });
        }

        // UDA 1.0 allows <URLBase>; relative URLs resolve against it.
        let base = match child_text(&root, "URLBase") {
            Some(raw) => Url::parse(raw.trim()).map_err(|e| DescriptionError::InvalidElement {
                element: "URLBase".to_string(),
                detail: e.to_string(),
            })?,
            None => base_url.clone(),
        };

        let device_elem = root
            .get_child("device")
            .ok_or_else(|| DescriptionError::MissingElement("device".to_string()))?;

        let mut device = parse_device_element(device_elem, &base)?;
        if let Some(config_id) = root.attributes.get("configId") {
            if let Ok(value) = config_id.trim().parse() {
                set_config_recursive(&mut device, value);
            }
        }
        Ok(device)
    }

    fn parse_scpd(&self, xml: &[u8], service: &mut Service) -> Result<(), DescriptionError> {
        let root = Element::parse(BufReader::new(xml))?;
        if root.name != "scpd" {
            return Err(DescriptionError::InvalidElement {
                element: root.name.clone(),
                detail: "expected <scpd>".to_string(),
            });
        }

        // Variables d'abord : les actions les référencent.
        let table = root
            .get_child("serviceStateTable")
            .ok_or_else(|| DescriptionError::MissingElement("serviceStateTable".to_string()))?;
        for var_elem in children_named(table, "stateVariable") {
            let variable = parse_state_variable(var_elem)?;
            service
                .add_variable(variable)
                .map_err(|e| DescriptionError::InvalidElement {
                    element: "stateVariable".to_string(),
                    detail: e.to_string(),
                })?;
        }

        if let Some(action_list) = root.get_child("actionList") {
            for action_elem in children_named(action_list, "action") {
                let action = parse_action(action_elem)?;
                service
                    .add_action(action)
                    .map_err(|e| DescriptionError::InvalidElement {
                        element: "action".to_string(),
                        detail: e.to_string(),
                    })?;
            }
        }

        service
            .validate()
            .map_err(|e| DescriptionError::InvalidElement {
                element: "relatedStateVariable".to_string(),
                detail: e.to_string(),
            })
    }
}

fn parse_device_element(elem: &Element, base: &Url) -> Result<Device, DescriptionError> {
    let udn: Udn = required_text(elem, "UDN")?
        .parse()
        .map_err(|e: UpnpError| DescriptionError::InvalidElement {
            element: "UDN".to_string(),
            detail: e.to_string(),
        })?;
    let device_type: ResourceType = required_text(elem, "deviceType")?
        .parse()
        .map_err(|e: UpnpError| DescriptionError::InvalidElement {
            element: "deviceType".to_string(),
            detail: e.to_string(),
        })?;
    let friendly_name = required_text(elem, "friendlyName")?;

    let mut device = Device::new(udn, device_type, friendly_name);
    device.set_manufacturer(required_text(elem, "manufacturer")?);
    device.set_model_name(required_text(elem, "modelName")?);
    if let Some(text) = child_text(elem, "manufacturerURL") {
        device.set_manufacturer_url(text);
    }
    if let Some(text) = child_text(elem, "modelDescription") {
        device.set_model_description(text);
    }
    if let Some(text) = child_text(elem, "modelNumber") {
        device.set_model_number(text);
    }
    if let Some(text) = child_text(elem, "serialNumber") {
        device.set_serial_number(text);
    }
    if let Some(text) = child_text(elem, "presentationURL") {
        device.set_presentation_url(text);
    }

    if let Some(service_list) = elem.get_child("serviceList") {
        for service_elem in children_named(service_list, "service") {
            let service = parse_service_element(service_elem, base)?;
            device
                .add_service(service)
                .map_err(|e| DescriptionError::InvalidElement {
                    element: "serviceId".to_string(),
                    detail: e.to_string(),
                })?;
        }
    }

    if let Some(device_list) = elem.get_child("deviceList") {
        for child_elem in children_named(device_list, "device") {
            device.add_embedded(parse_device_element(child_elem, base)?);
        }
    }

    Ok(device)
}

fn parse_service_element(elem: &Element, base: &Url) -> Result<Service, DescriptionError> {
    let service_type: ResourceType = required_text(elem, "serviceType")?
        .parse()
        .map_err(|e: UpnpError| DescriptionError::InvalidElement {
            element: "serviceType".to_string(),
            detail: e.to_string(),
        })?;
    let service_id = required_text(elem, "serviceId")?;

    let mut service = Service::new(service_id, service_type);
    let scpd = resolve_url(base, &required_text(elem, "SCPDURL")?, "SCPDURL")?;
    let control = resolve_url(base, &required_text(elem, "controlURL")?, "controlURL")?;
    let event = resolve_url(base, &required_text(elem, "eventSubURL")?, "eventSubURL")?;
    service.set_urls(scpd.to_string(), control.to_string(), event.to_string());
    Ok(service)
}

fn parse_state_variable(elem: &Element) -> Result<StateVariable, DescriptionError> {
    let name = required_text(elem, "name")?;
    let data_type = required_text(elem, "dataType")?;
    let value_type =
        StateVarType::from_str(&data_type).map_err(|e| DescriptionError::InvalidElement {
            element: "dataType".to_string(),
            detail: e.to_string(),
        })?;

    let evented = elem
        .attributes
        .get("sendEvents")
        .map(|raw| Evented::from_scpd(raw))
        .unwrap_or(Evented::Yes);

    let mut variable = StateVariable::new(name, value_type).set_evented(evented);

    let moderation = Moderation {
        maximum_rate: elem
            .attributes
            .get("maximumRate")
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .map(std::time::Duration::from_secs),
        minimum_delta: elem
            .attributes
            .get("minimumDelta")
            .and_then(|raw| raw.trim().parse().ok()),
    };
    if moderation.is_moderated() {
        variable = variable.set_moderation(moderation);
    }

    if let Some(raw) = child_text(elem, "defaultValue") {
        let value = value_type
            .parse_value(&raw)
            .map_err(|e| DescriptionError::InvalidElement {
                element: "defaultValue".to_string(),
                detail: e.to_string(),
            })?;
        variable = variable
            .set_default(value)
            .map_err(|e| DescriptionError::InvalidElement {
                element: "defaultValue".to_string(),
                detail: e.to_string(),
            })?;
    }

    if let Some(list) = elem.get_child("allowedValueList") {
        let values: Vec<String> = children_named(list, "allowedValue")
            .filter_map(|v| v.get_text().map(|t| t.to_string()))
            .collect();
        variable = variable
            .set_allowed_values(values)
            .map_err(|e| DescriptionError::InvalidElement {
                element: "allowedValueList".to_string(),
                detail: e.to_string(),
            })?;
    }

    if let Some(range_elem) = elem.get_child("allowedValueRange") {
        let min = range_value(range_elem, "minimum", value_type)?;
        let max = range_value(range_elem, "maximum", value_type)?;
        let step = match child_text(range_elem, "step") {
            Some(_) => Some(range_value(range_elem, "step", value_type)?),
            None => None,
        };
        let range =
            ValueRange::new(min, max, step).map_err(|e| DescriptionError::InvalidElement {
                element: "allowedValueRange".to_string(),
                detail: e.to_string(),
            })?;
        variable = variable
            .set_range(range)
            .map_err(|e| DescriptionError::InvalidElement {
                element: "allowedValueRange".to_string(),
                detail: e.to_string(),
            })?;
    }

    Ok(variable)
}

fn range_value(
    elem: &Element,
    name: &str,
    value_type: StateVarType,
) -> Result<domoupnp::variable_types::StateValue, DescriptionError> {
    let raw = required_text(elem, name)?;
    value_type
        .parse_value(&raw)
        .map_err(|e| DescriptionError::InvalidElement {
            element: name.to_string(),
            detail: e.to_string(),
        })
}

fn parse_action(elem: &Element) -> Result<Action, DescriptionError> {
    let name = required_text(elem, "name")?;
    let mut action = Action::new(name);

    if let Some(argument_list) = elem.get_child("argumentList") {
        for arg_elem in children_named(argument_list, "argument") {
            let arg_name = required_text(arg_elem, "name")?;
            let direction = Direction::from_scpd(&required_text(arg_elem, "direction")?).map_err(
                |e| DescriptionError::InvalidElement {
                    element: "direction".to_string(),
                    detail: e.to_string(),
                },
            )?;
            let related = required_text(arg_elem, "relatedStateVariable")?;

            let mut argument = match direction {
                Direction::In => Argument::input(arg_name, related),
                Direction::Out => Argument::output(arg_name, related),
            };
            argument.retval = arg_elem.get_child("retval").is_some();
            action = action.add_argument(argument);
        }
    }

    Ok(action)
}

fn set_config_recursive(device: &mut Device, config_id: u32) {
    device.set_config_id(config_id);
    for child in device.embedded_mut() {
        set_config_recursive(child, config_id);
    }
}

fn resolve_url(base: &Url, relative: &str, element: &str) -> Result<Url, DescriptionError> {
    base.join(relative.trim())
        .map_err(|e| DescriptionError::InvalidElement {
            element: element.to_string(),
            detail: e.to_string(),
        })
}

fn child_text(elem: &Element, name: &str) -> Option<String> {
    elem.get_child(name)
        .and_then(|c| c.get_text())
        .map(|t| t.trim().to_string())
}

fn required_text(elem: &Element, name: &str) -> Result<String, DescriptionError> {
    child_text(elem, name).ok_or_else(|| DescriptionError::MissingElement(name.to_string()))
}

fn children_named<'a>(parent: &'a Element, name: &'a str) -> impl Iterator<Item = &'a Element> {
    parent
        .children
        .iter()
        .filter_map(|n| n.as_element())
        .filter(move |e| e.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE_XML: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0" configId="7">
  <specVersion><major>1</major><minor>1</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:BinaryLight:1</deviceType>
    <friendlyName>Kitchen Light</friendlyName>
    <manufacturer>Acme</manufacturer>
    <modelName>Lux-1</modelName>
    <UDN>uuid:aaaaaaaa-1111-2222-3333-444444444444</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:SwitchPower:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:SwitchPower</serviceId>
        <SCPDURL>/switch/scpd.xml</SCPDURL>
        <controlURL>/switch/control</controlURL>
        <eventSubURL>/switch/event</eventSubURL>
      </service>
    </serviceList>
  </device>
</root>"#;

    const SCPD_XML: &str = r#"<?xml version="1.0"?>
<scpd xmlns="urn:schemas-upnp-org:service-1-0">
  <specVersion><major>1</major><minor>1</minor></specVersion>
  <actionList>
    <action>
      <name>SetTarget</name>
      <argumentList>
        <argument>
          <name>newTargetValue</name>
          <direction>in</direction>
          <relatedStateVariable>Target</relatedStateVariable>
        </argument>
      </argumentList>
    </action>
  </actionList>
  <serviceStateTable>
    <stateVariable sendEvents="no">
      <name>Target</name>
      <dataType>boolean</dataType>
      <defaultValue>0</defaultValue>
    </stateVariable>
    <stateVariable sendEvents="yes">
      <name>Status</name>
      <dataType>boolean</dataType>
    </stateVariable>
  </serviceStateTable>
</scpd>"#;

    fn base() -> Url {
        Url::parse("http://192.0.2.10:4932/desc.xml").unwrap()
    }

    #[test]
    fn device_description_parses_and_resolves_urls() {
        let device = XmlDescriptions
            .parse_device(DEVICE_XML.as_bytes(), &base())
            .unwrap();
        assert_eq!(device.friendly_name(), "Kitchen Light");
        assert_eq!(device.config_id(), 7);
        let service = &device.services()[0];
        assert_eq!(
            service.control_url(),
            "http://192.0.2.10:4932/switch/control"
        );
        assert_eq!(
            service.event_sub_url(),
            "http://192.0.2.10:4932/switch/event"
        );
    }

    #[test]
    fn missing_udn_names_the_element() {
        let xml = DEVICE_XML.replace(
            "<UDN>uuid:aaaaaaaa-1111-2222-3333-444444444444</UDN>",
            "",
        );
        let error = XmlDescriptions
            .parse_device(xml.as_bytes(), &base())
            .unwrap_err();
        assert!(matches!(error, DescriptionError::MissingElement(ref e) if e == "UDN"));
    }

    #[test]
    fn scpd_fills_actions_and_variables() {
        let mut device = XmlDescriptions
            .parse_device(DEVICE_XML.as_bytes(), &base())
            .unwrap();
        let service = &mut device.services_mut()[0];
        XmlDescriptions
            .parse_scpd(SCPD_XML.as_bytes(), service)
            .unwrap();

        assert!(service.action("SetTarget").is_some());
        assert_eq!(service.variables().len(), 2);
        assert_eq!(service.evented_variables().count(), 1);
    }

    #[test]
    fn unknown_data_type_is_rejected() {
        let xml = SCPD_XML.replace("<dataType>boolean</dataType>", "<dataType>blob</dataType>");
        let mut device = XmlDescriptions
            .parse_device(DEVICE_XML.as_bytes(), &base())
            .unwrap();
        let service = &mut device.services_mut()[0];
        let error = XmlDescriptions
            .parse_scpd(xml.as_bytes(), service)
            .unwrap_err();
        assert!(matches!(
            error,
            DescriptionError::InvalidElement { ref element, .. } if element == "dataType"
        ));
    }

    #[test]
    fn unresolved_related_variable_is_rejected() {
        let xml = SCPD_XML.replace("Target</relatedStateVariable>", "Ghost</relatedStateVariable>");
        let mut device = XmlDescriptions
            .parse_device(DEVICE_XML.as_bytes(), &base())
            .unwrap();
        let service = &mut device.services_mut()[0];
        assert!(XmlDescriptions.parse_scpd(xml.as_bytes(), service).is_err());
    }
}
