//! Génération des documents de description (device + SCPD).
//!
//! Le host sert ces documents en `GET`/`HEAD` ; ils sont générés depuis
//! le modèle, jamais stockés.

use xmltree::{Element, EmitterConfig, XMLNode};

use crate::services::Service;

use super::Device;

const DEVICE_NS: &str = "urn:schemas-upnp-org:device-1-0";
const SERVICE_NS: &str = "urn:schemas-upnp-org:service-1-0";

/// Document de description du device racine (UDA « device description »).
pub fn device_description_xml(root: &Device) -> Result<String, xmltree::Error> {
    let mut doc = Element::new("root");
    doc.attributes
        .insert("xmlns".to_string(), DEVICE_NS.to_string());
    doc.attributes
        .insert("configId".to_string(), root.config_id().to_string());

    doc.children.push(XMLNode::Element(spec_version()));
    doc.children.push(XMLNode::Element(device_element(root)));

    emit(doc)
}

/// Document SCPD d'un service.
pub fn scpd_xml(service: &Service) -> Result<String, xmltree::Error> {
    let mut doc = Element::new("scpd");
    doc.attributes
        .insert("xmlns".to_string(), SERVICE_NS.to_string());
    doc.children.push(XMLNode::Element(spec_version()));

    let mut action_list = Element::new("actionList");
    for action in service.actions() {
        let mut action_elem = Element::new("action");
        push_text(&mut action_elem, "name", action.name());

        let mut argument_list = Element::new("argumentList");
        for argument in action.arguments() {
            let mut arg_elem = Element::new("argument");
            push_text(&mut arg_elem, "name", &argument.name);
            push_text(&mut arg_elem, "direction", argument.direction.scpd_value());
            if argument.retval {
                arg_elem.children.push(XMLNode::Element(Element::new("retval")));
            }
            push_text(
                &mut arg_elem,
                "relatedStateVariable",
                &argument.related_state_variable,
            );
            argument_list.children.push(XMLNode::Element(arg_elem));
        }
        action_elem.children.push(XMLNode::Element(argument_list));
        action_list.children.push(XMLNode::Element(action_elem));
    }
    doc.children.push(XMLNode::Element(action_list));

    let mut state_table = Element::new("serviceStateTable");
    for variable in service.variables() {
        let mut var_elem = Element::new("stateVariable");
        var_elem.attributes.insert(
            "sendEvents".to_string(),
            variable.evented().scpd_value().to_string(),
        );
        push_text(&mut var_elem, "name", variable.name());
        push_text(&mut var_elem, "dataType", variable.value_type().uda_name());
        if let Some(default) = variable.default_value() {
            push_text(&mut var_elem, "defaultValue", &default.to_string());
        }
        if !variable.allowed_values().is_empty() {
            let mut list = Element::new("allowedValueList");
            for value in variable.allowed_values() {
                push_text(&mut list, "allowedValue", value);
            }
            var_elem.children.push(XMLNode::Element(list));
        }
        if let Some(range) = variable.value_range() {
            let mut range_elem = Element::new("allowedValueRange");
            push_text(&mut range_elem, "minimum", &range.minimum().to_string());
            push_text(&mut range_elem, "maximum", &range.maximum().to_string());
            if let Some(step) = range.step() {
                push_text(&mut range_elem, "step", &step.to_string());
            }
            var_elem.children.push(XMLNode::Element(range_elem));
        }
        state_table.children.push(XMLNode::Element(var_elem));
    }
    doc.children.push(XMLNode::Element(state_table));

    emit(doc)
}

fn device_element(device: &Device) -> Element {
    let mut elem = Element::new("device");

    push_text(&mut elem, "deviceType", &device.device_type().to_string());
    push_text(&mut elem, "friendlyName", device.friendly_name());
    push_text(&mut elem, "manufacturer", device.manufacturer());
    if let Some(url) = device.manufacturer_url() {
        push_text(&mut elem, "manufacturerURL", url);
    }
    if let Some(description) = device.model_description() {
        push_text(&mut elem, "modelDescription", description);
    }
    push_text(&mut elem, "modelName", device.model_name());
    if let Some(number) = device.model_number() {
        push_text(&mut elem, "modelNumber", number);
    }
    if let Some(serial) = device.serial_number() {
        push_text(&mut elem, "serialNumber", serial);
    }
    push_text(&mut elem, "UDN", &device.udn().to_string());

    if !device.services().is_empty() {
        let mut service_list = Element::new("serviceList");
        for service in device.services() {
            let mut service_elem = Element::new("service");
            push_text(
                &mut service_elem,
                "serviceType",
                &service.service_type().to_string(),
            );
            push_text(&mut service_elem, "serviceId", service.service_id());
            push_text(&mut service_elem, "SCPDURL", service.scpd_url());
            push_text(&mut service_elem, "controlURL", service.control_url());
            push_text(&mut service_elem, "eventSubURL", service.event_sub_url());
            service_list.children.push(XMLNode::Element(service_elem));
        }
        elem.children.push(XMLNode::Element(service_list));
    }

    if !device.embedded().is_empty() {
        let mut device_list = Element::new("deviceList");
        for child in device.embedded() {
            device_list.children.push(XMLNode::Element(device_element(child)));
        }
        elem.children.push(XMLNode::Element(device_list));
    }

    if let Some(url) = device.presentation_url() {
        push_text(&mut elem, "presentationURL", url);
    }

    elem
}

fn spec_version() -> Element {
    let mut version = Element::new("specVersion");
    push_text(&mut version, "major", "1");
    push_text(&mut version, "minor", "1");
    version
}

fn push_text(parent: &mut Element, name: &str, text: &str) {
    let mut elem = Element::new(name);
    elem.children.push(XMLNode::Text(text.to_string()));
    parent.children.push(XMLNode::Element(elem));
}

fn emit(doc: Element) -> Result<String, xmltree::Error> {
    let mut buf = Vec::new();
    let config = EmitterConfig::new()
        .perform_indent(true)
        .indent_string("  ");
    doc.write_with_config(&mut buf, config)?;
    Ok(String::from_utf8(buf).expect("xmltree emits valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, Argument};
    use crate::state_variables::{Evented, StateVariable};
    use crate::types::Udn;
    use crate::variable_types::StateVarType;

    fn binary_light() -> Device {
        let udn: Udn = "uuid:aaaaaaaa-1111-2222-3333-444444444444".parse().unwrap();
        let mut device = Device::new(
            udn,
            "urn:schemas-upnp-org:device:BinaryLight:1".parse().unwrap(),
            "Kitchen Light",
        );
        device.set_config_id(7);

        let mut service = Service::new(
            "urn:upnp-org:serviceId:SwitchPower",
            "urn:schemas-upnp-org:service:SwitchPower:1".parse().unwrap(),
        );
        service
            .add_variable(
                StateVariable::new("Target", StateVarType::Boolean).set_evented(Evented::No),
            )
            .unwrap();
        service
            .add_variable(
                StateVariable::new("Status", StateVarType::Boolean).set_evented(Evented::Yes),
            )
            .unwrap();
        service
            .add_action(
                Action::new("SetTarget")
                    .add_argument(Argument::input("newTargetValue", "Target")),
            )
            .unwrap();
        device.add_service(service).unwrap();
        device.assign_host_routes();
        device
    }

    #[test]
    fn description_lists_services_and_udn() {
        let device = binary_light();
        let xml = device_description_xml(&device).unwrap();
        assert!(xml.contains("configId=\"7\""));
        assert!(xml.contains("<UDN>uuid:aaaaaaaa-1111-2222-3333-444444444444</UDN>"));
        assert!(xml.contains("<serviceId>urn:upnp-org:serviceId:SwitchPower</serviceId>"));
        assert!(xml.contains(
            "<controlURL>/device/aaaaaaaa-1111-2222-3333-444444444444/SwitchPower/control</controlURL>"
        ));
    }

    #[test]
    fn scpd_lists_actions_and_variables() {
        let device = binary_light();
        let xml = scpd_xml(&device.services()[0]).unwrap();
        assert!(xml.contains("<name>SetTarget</name>"));
        assert!(xml.contains("<relatedStateVariable>Target</relatedStateVariable>"));
        assert!(xml.contains("sendEvents=\"yes\""));
        assert!(xml.contains("<dataType>boolean</dataType>"));
    }
}
