//! Actions et arguments, tels que déclarés dans un SCPD.

use crate::errors::UpnpError;

/// Sens d'un argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn from_scpd(raw: &str) -> Result<Self, UpnpError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            other => Err(UpnpError::MalformedMessage(format!(
                "invalid argument direction: {other}"
            ))),
        }
    }

    pub fn scpd_value(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// Argument d'action : le type vient de la variable d'état liée.
#[derive(Debug, Clone)]
pub struct Argument {
    pub name: String,
    pub direction: Direction,
    pub related_state_variable: String,
    /// Marqué `<retval/>` dans le SCPD.
    pub retval: bool,
}

impl Argument {
    pub fn input(name: impl Into<String>, related: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::In,
            related_state_variable: related.into(),
            retval: false,
        }
    }

    pub fn output(name: impl Into<String>, related: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Out,
            related_state_variable: related.into(),
            retval: false,
        }
    }
}

/// Une action : nom et arguments ordonnés comme dans le SCPD.
#[derive(Debug, Clone)]
pub struct Action {
    name: String,
    arguments: Vec<Argument>,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_argument(mut self, argument: Argument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    /// Arguments d'entrée, dans l'ordre SCPD.
    pub fn inputs(&self) -> impl Iterator<Item = &Argument> {
        self.arguments
            .iter()
            .filter(|a| a.direction == Direction::In)
    }

    /// Arguments de sortie, dans l'ordre SCPD.
    pub fn outputs(&self) -> impl Iterator<Item = &Argument> {
        self.arguments
            .iter()
            .filter(|a| a.direction == Direction::Out)
    }

    pub fn input(&self, name: &str) -> Option<&Argument> {
        self.inputs().find(|a| a.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_keep_scpd_order() {
        let action = Action::new("SetTarget")
            .add_argument(Argument::input("newTargetValue", "Target"))
            .add_argument(Argument::output("Echo", "Target"));

        let inputs: Vec<&str> = action.inputs().map(|a| a.name.as_str()).collect();
        assert_eq!(inputs, vec!["newTargetValue"]);
        let outputs: Vec<&str> = action.outputs().map(|a| a.name.as_str()).collect();
        assert_eq!(outputs, vec!["Echo"]);
    }

    #[test]
    fn direction_parse() {
        assert_eq!(Direction::from_scpd("in").unwrap(), Direction::In);
        assert_eq!(Direction::from_scpd(" OUT ").unwrap(), Direction::Out);
        assert!(Direction::from_scpd("sideways").is_err());
    }
}
