//! Plages de valeurs autorisées (`allowedValueRange`).

use crate::variable_types::{StateValue, StateValueError, StateVarType};

/// Plage `min..=max` avec pas optionnel, pour les types numériques.
#[derive(Debug, Clone)]
pub struct ValueRange {
    min: StateValue,
    max: StateValue,
    step: Option<StateValue>,
}

impl ValueRange {
    /// Construit une plage validée : types homogènes et numériques,
    /// `min <= max`, `step > 0` s'il est fourni.
    pub fn new(
        min: StateValue,
        max: StateValue,
        step: Option<StateValue>,
    ) -> Result<Self, StateValueError> {
        if min.var_type() != max.var_type() {
            return Err(StateValueError::TypeError(
                "range min and max must share the same type".to_string(),
            ));
        }

        let (min_n, max_n) = match (min.as_f64(), max.as_f64()) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(StateValueError::TypeError(format!(
                    "allowedValueRange requires a numeric type, got {}",
                    min.var_type()
                )));
            }
        };
        if min_n > max_n {
            return Err(StateValueError::RangeError(
                "minimum cannot be greater than maximum".to_string(),
            ));
        }

        if let Some(step) = &step {
            match step.as_f64() {
                Some(s) if s > 0.0 => {}
                _ => {
                    return Err(StateValueError::RangeError(
                        "step must be strictly positive".to_string(),
                    ));
                }
            }
        }

        Ok(Self { min, max, step })
    }

    pub fn minimum(&self) -> &StateValue {
        &self.min
    }

    pub fn maximum(&self) -> &StateValue {
        &self.max
    }

    pub fn step(&self) -> Option<&StateValue> {
        self.step.as_ref()
    }

    pub fn var_type(&self) -> StateVarType {
        self.min.var_type()
    }

    /// La valeur est-elle dans la plage ?
    pub fn contains(&self, value: &StateValue) -> bool {
        if value.var_type() != self.var_type() {
            return false;
        }
        match (value.as_f64(), self.min.as_f64(), self.max.as_f64()) {
            (Some(v), Some(min), Some(max)) => min <= v && v <= max,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_validates_bounds() {
        let range =
            ValueRange::new(StateValue::I4(0), StateValue::I4(100), Some(StateValue::I4(1)))
                .unwrap();
        assert!(range.contains(&StateValue::I4(0)));
        assert!(range.contains(&StateValue::I4(100)));
        assert!(!range.contains(&StateValue::I4(101)));
        assert!(!range.contains(&StateValue::I4(-1)));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        assert!(ValueRange::new(StateValue::I4(10), StateValue::I4(0), None).is_err());
    }

    #[test]
    fn zero_or_negative_step_is_rejected() {
        assert!(
            ValueRange::new(StateValue::I4(0), StateValue::I4(10), Some(StateValue::I4(0)))
                .is_err()
        );
        assert!(
            ValueRange::new(StateValue::I4(0), StateValue::I4(10), Some(StateValue::I4(-2)))
                .is_err()
        );
    }

    #[test]
    fn non_numeric_types_are_rejected() {
        assert!(ValueRange::new(
            StateValue::String("a".into()),
            StateValue::String("z".into()),
            None
        )
        .is_err());
    }

    #[test]
    fn mismatched_types_never_contained() {
        let range = ValueRange::new(StateValue::I4(0), StateValue::I4(10), None).unwrap();
        assert!(!range.contains(&StateValue::UI4(5)));
    }
}
