//! Canal de contrôle côté host : validation des arguments et
//! construction des réponses SOAP.

use std::collections::HashMap;

use crate::actions::Action;
use crate::errors::UpnpError;
use crate::http::HttpResponse;
use crate::services::Service;
use crate::soap::{self, error_codes};
use crate::variable_types::{StateValue, StateValueError};

/// Valide les noms des arguments d'entrée et convertit chaque valeur
/// vers le type de la variable d'état liée.
///
/// Nom inconnu, argument manquant ou type invalide → 402 ; valeur hors
/// `allowedValueList` / `allowedValueRange` → 600.
pub fn validate_inputs(
    service: &Service,
    action: &Action,
    raw_args: &HashMap<String, String>,
) -> Result<HashMap<String, StateValue>, UpnpError> {
    // Tout argument reçu doit être déclaré.
    for name in raw_args.keys() {
        if action.input(name).is_none() {
            return Err(UpnpError::InvalidArgument(format!(
                "unexpected argument '{name}' for action {}",
                action.name()
            )));
        }
    }

    let mut values = HashMap::new();
    for argument in action.inputs() {
        let raw = raw_args.get(&argument.name).ok_or_else(|| {
            UpnpError::InvalidArgument(format!(
                "missing argument '{}' for action {}",
                argument.name,
                action.name()
            ))
        })?;

        let variable = service
            .variable(&argument.related_state_variable)
            .ok_or_else(|| {
                UpnpError::Internal(format!(
                    "argument '{}' references unknown variable '{}'",
                    argument.name, argument.related_state_variable
                ))
            })?;

        let value = variable.coerce(raw).map_err(|e| coercion_error(&argument.name, e))?;
        values.insert(argument.name.clone(), value);
    }

    Ok(values)
}

/// Projette une erreur de conversion sur le bon code UPnPError.
fn coercion_error(argument: &str, error: StateValueError) -> UpnpError {
    match error {
        // Hors plage ou hors liste : UPnPError 600.
        StateValueError::RangeError(e) | StateValueError::ValidationError(e) => {
            UpnpError::InvalidArgument(format!("{}: argument '{argument}': {e}", error_codes::ARGUMENT_VALUE_INVALID))
        }
        other => UpnpError::InvalidArgument(format!("argument '{argument}': {other}")),
    }
}

/// Code UPnPError à émettre pour une erreur de dispatch.
pub fn fault_code(error: &UpnpError) -> u32 {
    match error {
        UpnpError::InvalidArgument(text) => {
            if text.starts_with("600") {
                error_codes::ARGUMENT_VALUE_INVALID
            } else {
                error_codes::INVALID_ARGS
            }
        }
        UpnpError::ActionNotAuthorized(_) => error_codes::INVALID_ACTION,
        _ => error_codes::ACTION_FAILED,
    }
}

/// Réponse HTTP d'un appel de contrôle réussi.
pub fn success_response(
    service_type: &str,
    action: &str,
    outputs: &[(String, String)],
) -> Result<HttpResponse, UpnpError> {
    let body = soap::build_action_response(service_type, action, outputs)
        .map_err(|e| UpnpError::Internal(format!("cannot build SOAP response: {e}")))?;
    Ok(HttpResponse::ok().with_body(body.into_bytes(), soap::CONTENT_TYPE_XML))
}

/// Réponse HTTP d'un appel de contrôle en échec (HTTP 500 + fault).
pub fn fault_response(error: &UpnpError) -> HttpResponse {
    let code = fault_code(error);
    let body = soap::build_soap_fault(code, &error.to_string())
        .unwrap_or_else(|_| String::from("<s:Envelope/>"));
    HttpResponse::new(500).with_body(body.into_bytes(), soap::CONTENT_TYPE_XML)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Argument;
    use crate::state_variables::{Evented, StateVariable};
    use crate::value_ranges::ValueRange;
    use crate::variable_types::StateVarType;

    fn service() -> Service {
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
                StateVariable::new("Level", StateVarType::I4)
                    .set_range(
                        ValueRange::new(StateValue::I4(0), StateValue::I4(100), None).unwrap(),
                    )
                    .unwrap(),
            )
            .unwrap();
        service
            .add_action(
                Action::new("SetTarget")
                    .add_argument(Argument::input("newTargetValue", "Target")),
            )
            .unwrap();
        service
            .add_action(
                Action::new("SetLevel").add_argument(Argument::input("newLevel", "Level")),
            )
            .unwrap();
        service
    }

    fn args(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn valid_arguments_are_coerced() {
        let service = service();
        let action = service.action("SetTarget").unwrap();
        let values = validate_inputs(&service, action, &args(&[("newTargetValue", "1")])).unwrap();
        assert_eq!(values["newTargetValue"], StateValue::Boolean(true));
    }

    #[test]
    fn non_boolean_string_is_a_402() {
        let service = service();
        let action = service.action("SetTarget").unwrap();
        let error = validate_inputs(&service, action, &args(&[("newTargetValue", "sideways")]))
            .unwrap_err();
        assert!(matches!(error, UpnpError::InvalidArgument(_)));
        assert_eq!(fault_code(&error), error_codes::INVALID_ARGS);
    }

    #[test]
    fn out_of_range_value_is_a_600() {
        let service = service();
        let action = service.action("SetLevel").unwrap();
        let error =
            validate_inputs(&service, action, &args(&[("newLevel", "250")])).unwrap_err();
        assert_eq!(fault_code(&error), error_codes::ARGUMENT_VALUE_INVALID);
    }

    #[test]
    fn unknown_and_missing_arguments_are_rejected() {
        let service = service();
        let action = service.action("SetTarget").unwrap();

        assert!(validate_inputs(&service, action, &args(&[("bogus", "1")])).is_err());
        assert!(validate_inputs(&service, action, &args(&[])).is_err());
    }

    #[test]
    fn fault_response_carries_the_upnp_code() {
        let error = UpnpError::InvalidArgument("bad".to_string());
        let response = fault_response(&error);
        assert_eq!(response.status, 500);
        let body = String::from_utf8(response.body).unwrap();
        assert!(body.contains("<errorCode>402</errorCode>"));
    }
}
