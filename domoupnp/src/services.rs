//! Services UPnP : identité, actions et table de variables d'état.

use thiserror::Error;

use crate::actions::Action;
use crate::state_variables::StateVariable;
use crate::types::ResourceType;

/// Erreurs de construction/validation d'un service.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("action '{0}' already exists in service")]
    ActionAlreadyExists(String),

    #[error("state variable '{0}' already exists in service")]
    VariableAlreadyExists(String),

    #[error("action '{action}' argument '{argument}' references unknown state variable '{variable}'")]
    UnknownRelatedVariable {
        action: String,
        argument: String,
        variable: String,
    },
}

/// Un service : identité, URLs, actions et variables.
///
/// Côté host les URLs sont des routes relatives assignées à l'annonce ;
/// côté control point ce sont les URLs absolues résolues depuis la
/// description du device.
#[derive(Debug, Clone)]
pub struct Service {
    service_id: String,
    service_type: ResourceType,
    scpd_url: String,
    control_url: String,
    event_sub_url: String,
    actions: Vec<Action>,
    variables: Vec<StateVariable>,
}

impl Service {
    pub fn new(service_id: impl Into<String>, service_type: ResourceType) -> Self {
        Self {
            service_id: service_id.into(),
            service_type,
            scpd_url: String::new(),
            control_url: String::new(),
            event_sub_url: String::new(),
            actions: Vec::new(),
            variables: Vec::new(),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn service_type(&self) -> &ResourceType {
        &self.service_type
    }

    /// Dernier segment de l'identifiant (`urn:upnp-org:serviceId:SwitchPower`
    /// → `SwitchPower`), utilisé dans les routes.
    pub fn short_id(&self) -> &str {
        self.service_id
            .rsplit_once(':')
            .map_or(self.service_id.as_str(), |(_, tail)| tail)
    }

    pub fn scpd_url(&self) -> &str {
        &self.scpd_url
    }

    pub fn control_url(&self) -> &str {
        &self.control_url
    }

    pub fn event_sub_url(&self) -> &str {
        &self.event_sub_url
    }

    pub fn set_urls(
        &mut self,
        scpd_url: impl Into<String>,
        control_url: impl Into<String>,
        event_sub_url: impl Into<String>,
    ) {
        self.scpd_url = scpd_url.into();
        self.control_url = control_url.into();
        self.event_sub_url = event_sub_url.into();
    }

    pub fn add_action(&mut self, action: Action) -> Result<(), ServiceError> {
        if self.actions.iter().any(|a| a.name() == action.name()) {
            return Err(ServiceError::ActionAlreadyExists(action.name().to_string()));
        }
        self.actions.push(action);
        Ok(())
    }

    pub fn add_variable(&mut self, variable: StateVariable) -> Result<(), ServiceError> {
        if self.variables.iter().any(|v| v.name() == variable.name()) {
            return Err(ServiceError::VariableAlreadyExists(
                variable.name().to_string(),
            ));
        }
        self.variables.push(variable);
        Ok(())
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name() == name)
    }

    pub fn variables(&self) -> &[StateVariable] {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&StateVariable> {
        self.variables.iter().find(|v| v.name() == name)
    }

    /// Variables qui apparaissent dans les événements GENA.
    pub fn evented_variables(&self) -> impl Iterator<Item = &StateVariable> {
        self.variables.iter().filter(|v| v.evented().is_evented())
    }

    /// Vérifie que chaque argument de chaque action référence une
    /// variable déclarée.
    pub fn validate(&self) -> Result<(), ServiceError> {
        for action in &self.actions {
            for argument in action.arguments() {
                if self.variable(&argument.related_state_variable).is_none() {
                    return Err(ServiceError::UnknownRelatedVariable {
                        action: action.name().to_string(),
                        argument: argument.name.clone(),
                        variable: argument.related_state_variable.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Argument;
    use crate::state_variables::Evented;
    use crate::variable_types::StateVarType;

    fn switch_power() -> Service {
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
                crate::actions::Action::new("SetTarget")
                    .add_argument(Argument::input("newTargetValue", "Target")),
            )
            .unwrap();
        service
    }

    #[test]
    fn valid_service_passes() {
        let service = switch_power();
        assert!(service.validate().is_ok());
        assert_eq!(service.short_id(), "SwitchPower");
        assert_eq!(service.evented_variables().count(), 1);
    }

    #[test]
    fn unknown_related_variable_is_rejected() {
        let mut service = switch_power();
        service
            .add_action(
                crate::actions::Action::new("Broken")
                    .add_argument(Argument::input("value", "DoesNotExist")),
            )
            .unwrap();
        assert!(matches!(
            service.validate(),
            Err(ServiceError::UnknownRelatedVariable { .. })
        ));
    }

    #[test]
    fn duplicate_action_is_rejected() {
        let mut service = switch_power();
        assert!(matches!(
            service.add_action(crate::actions::Action::new("SetTarget")),
            Err(ServiceError::ActionAlreadyExists(_))
        ));
    }
}
