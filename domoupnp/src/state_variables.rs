//! Variables d'état : définition SCPD et instance porteuse de valeur.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::value_ranges::ValueRange;
use crate::variable_types::{StateValue, StateValueError, StateVarType};

/// Politique d'événementiel d'une variable (`sendEvents`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evented {
    /// Jamais émise dans les événements.
    No,
    /// Émise à chaque changement.
    Yes,
    /// Émise seulement via les règles de modération.
    Indirect,
}

impl Evented {
    pub fn from_scpd(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "no" | "0" => Evented::No,
            "indirect" => Evented::Indirect,
            _ => Evented::Yes, // défaut UDA
        }
    }

    pub fn scpd_value(&self) -> &'static str {
        match self {
            Evented::No => "no",
            Evented::Yes => "yes",
            Evented::Indirect => "indirect",
        }
    }

    /// La variable apparaît-elle dans les messages d'événement ?
    pub fn is_evented(&self) -> bool {
        !matches!(self, Evented::No)
    }
}

/// Modération des notifications (`maximumRate` / `minimumDelta`).
#[derive(Debug, Clone, Default)]
pub struct Moderation {
    /// Intervalle minimal entre deux notifications de la variable.
    pub maximum_rate: Option<Duration>,

    /// Variation numérique minimale justifiant une notification.
    pub minimum_delta: Option<f64>,
}

impl Moderation {
    pub fn is_moderated(&self) -> bool {
        self.maximum_rate.is_some() || self.minimum_delta.is_some()
    }
}

/// Définition d'une variable d'état, telle que déclarée dans un SCPD.
#[derive(Debug, Clone)]
pub struct StateVariable {
    name: String,
    value_type: StateVarType,
    default_value: Option<StateValue>,
    value_range: Option<ValueRange>,
    allowed_values: Vec<String>,
    evented: Evented,
    moderation: Moderation,
}

impl StateVariable {
    pub fn new(name: impl Into<String>, value_type: StateVarType) -> Self {
        Self {
            name: name.into(),
            value_type,
            default_value: None,
            value_range: None,
            allowed_values: Vec::new(),
            evented: Evented::No,
            moderation: Moderation::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> StateVarType {
        self.value_type
    }

    pub fn evented(&self) -> Evented {
        self.evented
    }

    pub fn set_evented(mut self, evented: Evented) -> Self {
        self.evented = evented;
        self
    }

    pub fn moderation(&self) -> &Moderation {
        &self.moderation
    }

    pub fn set_moderation(mut self, moderation: Moderation) -> Self {
        self.moderation = moderation;
        self
    }

    pub fn default_value(&self) -> Option<&StateValue> {
        self.default_value.as_ref()
    }

    pub fn set_default(mut self, value: StateValue) -> Result<Self, StateValueError> {
        if value.var_type() != self.value_type {
            return Err(StateValueError::TypeError(format!(
                "default value type {} does not match variable type {}",
                value.var_type(),
                self.value_type
            )));
        }
        self.default_value = Some(value);
        Ok(self)
    }

    pub fn value_range(&self) -> Option<&ValueRange> {
        self.value_range.as_ref()
    }

    pub fn set_range(mut self, range: ValueRange) -> Result<Self, StateValueError> {
        if range.var_type() != self.value_type {
            return Err(StateValueError::TypeError(format!(
                "range type {} does not match variable type {}",
                range.var_type(),
                self.value_type
            )));
        }
        self.value_range = Some(range);
        Ok(self)
    }

    pub fn allowed_values(&self) -> &[String] {
        &self.allowed_values
    }

    /// Contrainte UDA : `allowedValueList` n'existe que pour `string`.
    pub fn set_allowed_values(mut self, values: Vec<String>) -> Result<Self, StateValueError> {
        if self.value_type != StateVarType::String {
            return Err(StateValueError::ValidationError(format!(
                "allowedValueList requires a string variable, {} is {}",
                self.name, self.value_type
            )));
        }
        self.allowed_values = values;
        Ok(self)
    }

    /// Convertit et valide une valeur du fil pour cette variable.
    ///
    /// Les violations de plage ou de liste remontent en `RangeError` /
    /// `ValidationError` (UPnPError 600 côté contrôle).
    pub fn coerce(&self, raw: &str) -> Result<StateValue, StateValueError> {
        let value = self.value_type.parse_value(raw)?;
        self.check(&value)?;
        Ok(value)
    }

    /// Valide une valeur déjà typée.
    pub fn check(&self, value: &StateValue) -> Result<(), StateValueError> {
        if value.var_type() != self.value_type {
            return Err(StateValueError::TypeError(format!(
                "value type {} does not match {} ({})",
                value.var_type(),
                self.name,
                self.value_type
            )));
        }
        if let Some(range) = &self.value_range {
            if !range.contains(value) {
                return Err(StateValueError::RangeError(format!(
                    "value {value} outside allowed range for {}",
                    self.name
                )));
            }
        }
        if !self.allowed_values.is_empty() {
            let text = value.to_string();
            if !self.allowed_values.iter().any(|v| v == &text) {
                return Err(StateValueError::ValidationError(format!(
                    "value {text} not in allowedValueList for {}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Valeur initiale d'une instance : défaut du SCPD ou défaut du type.
    pub fn initial_value(&self) -> StateValue {
        self.default_value
            .clone()
            .unwrap_or_else(|| self.value_type.default_value())
    }
}

/// Instance d'une variable : la valeur courante plus la comptabilité de
/// modération côté host.
#[derive(Debug, Clone)]
pub struct StateVarInstance {
    definition: Arc<StateVariable>,
    value: StateValue,
    /// Dernière valeur effectivement notifiée.
    last_sent: Option<StateValue>,
    last_sent_at: Option<Instant>,
    /// Changement en attente, retenu par la modération.
    pending: bool,
}

impl StateVarInstance {
    pub fn new(definition: Arc<StateVariable>) -> Self {
        let value = definition.initial_value();
        Self {
            definition,
            value,
            last_sent: None,
            last_sent_at: None,
            pending: false,
        }
    }

    pub fn definition(&self) -> &StateVariable {
        &self.definition
    }

    pub fn value(&self) -> &StateValue {
        &self.value
    }

    /// Pose une nouvelle valeur validée et dit si une notification doit
    /// partir maintenant (`true`), être retenue (`pending`), ou rien.
    pub fn set_value(&mut self, value: StateValue, now: Instant) -> Result<bool, StateValueError> {
        self.definition.check(&value)?;
        self.value = value;

        if !self.definition.evented().is_evented() {
            return Ok(false);
        }

        let moderation = self.definition.moderation();

        if let Some(delta) = moderation.minimum_delta {
            if let (Some(new_n), Some(sent_n)) = (
                self.value.as_f64(),
                self.last_sent.as_ref().and_then(StateValue::as_f64),
            ) {
                if (new_n - sent_n).abs() < delta {
                    // Variation trop faible : on attend la suivante.
                    self.pending = true;
                    return Ok(false);
                }
            }
        }

        if let Some(rate) = moderation.maximum_rate {
            if let Some(last) = self.last_sent_at {
                if now.duration_since(last) < rate {
                    self.pending = true;
                    return Ok(false);
                }
            }
        }

        if self.definition.evented() == Evented::Indirect && !moderation.is_moderated() {
            // Indirect sans règle de modération : jamais poussée d'elle-même.
            return Ok(false);
        }

        self.note_sent(now);
        Ok(true)
    }

    /// Un changement modéré est-il désormais éligible ?
    pub fn take_due(&mut self, now: Instant) -> Option<StateValue> {
        if !self.pending {
            return None;
        }
        if let Some(rate) = self.definition.moderation().maximum_rate {
            if let Some(last) = self.last_sent_at {
                if now.duration_since(last) < rate {
                    return None;
                }
            }
        }
        self.pending = false;
        self.note_sent(now);
        Some(self.value.clone())
    }

    fn note_sent(&mut self, now: Instant) {
        self.last_sent = Some(self.value.clone());
        self.last_sent_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_var() -> StateVariable {
        StateVariable::new("Status", StateVarType::Boolean).set_evented(Evented::Yes)
    }

    #[test]
    fn coerce_validates_type() {
        let var = status_var();
        assert_eq!(var.coerce("1").unwrap(), StateValue::Boolean(true));
        assert!(var.coerce("not-a-bool").is_err());
    }

    #[test]
    fn allowed_values_only_on_strings() {
        assert!(StateVariable::new("Mode", StateVarType::I4)
            .set_allowed_values(vec!["a".into()])
            .is_err());

        let var = StateVariable::new("Mode", StateVarType::String)
            .set_allowed_values(vec!["NORMAL".into(), "SHUFFLE".into()])
            .unwrap();
        assert!(var.coerce("NORMAL").is_ok());
        assert!(var.coerce("BACKWARDS").is_err());
    }

    #[test]
    fn range_violation_is_rejected() {
        let range = crate::value_ranges::ValueRange::new(
            StateValue::I4(0),
            StateValue::I4(100),
            Some(StateValue::I4(1)),
        )
        .unwrap();
        let var = StateVariable::new("Volume", StateVarType::I4)
            .set_range(range)
            .unwrap();
        assert!(var.coerce("50").is_ok());
        assert!(var.coerce("101").is_err());
    }

    #[test]
    fn unevented_variable_never_notifies() {
        let var = Arc::new(StateVariable::new("Counter", StateVarType::UI4));
        let mut instance = StateVarInstance::new(var);
        let fire = instance
            .set_value(StateValue::UI4(3), Instant::now())
            .unwrap();
        assert!(!fire);
    }

    #[test]
    fn maximum_rate_coalesces_changes() {
        let var = Arc::new(
            StateVariable::new("Level", StateVarType::I4)
                .set_evented(Evented::Yes)
                .set_moderation(Moderation {
                    maximum_rate: Some(Duration::from_secs(60)),
                    minimum_delta: None,
                }),
        );
        let mut instance = StateVarInstance::new(var);
        let t0 = Instant::now();

        assert!(instance.set_value(StateValue::I4(1), t0).unwrap());
        // Trop tôt : retenu.
        assert!(!instance.set_value(StateValue::I4(2), t0).unwrap());
        assert!(!instance.set_value(StateValue::I4(3), t0).unwrap());
        // Pas encore éligible.
        assert!(instance.take_due(t0).is_none());
        // Après la fenêtre : seule la valeur la plus récente part.
        let later = t0 + Duration::from_secs(61);
        assert_eq!(instance.take_due(later), Some(StateValue::I4(3)));
        assert!(instance.take_due(later).is_none());
    }

    #[test]
    fn minimum_delta_filters_small_changes() {
        let var = Arc::new(
            StateVariable::new("Level", StateVarType::R8)
                .set_evented(Evented::Yes)
                .set_moderation(Moderation {
                    maximum_rate: None,
                    minimum_delta: Some(5.0),
                }),
        );
        let mut instance = StateVarInstance::new(var);
        let t0 = Instant::now();

        assert!(instance.set_value(StateValue::R8(10.0), t0).unwrap());
        assert!(!instance.set_value(StateValue::R8(12.0), t0).unwrap());
        assert!(instance.set_value(StateValue::R8(20.0), t0).unwrap());
    }
}
