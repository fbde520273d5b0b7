//! Conversion texte ↔ valeur pour chaque type UDA.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use url::Url;
use uuid::Uuid;

use super::{StateValue, StateValueError, StateVarType};

impl StateVarType {
    /// Nom du type tel qu'il apparaît dans un SCPD.
    pub fn uda_name(&self) -> &'static str {
        match self {
            StateVarType::UI1 => "ui1",
            StateVarType::UI2 => "ui2",
            StateVarType::UI4 => "ui4",
            StateVarType::I1 => "i1",
            StateVarType::I2 => "i2",
            StateVarType::I4 => "i4",
            StateVarType::Int => "int",
            StateVarType::R4 => "r4",
            StateVarType::R8 => "r8",
            StateVarType::Number => "number",
            StateVarType::Fixed14_4 => "fixed.14.4",
            StateVarType::Float => "float",
            StateVarType::Char => "char",
            StateVarType::String => "string",
            StateVarType::Boolean => "boolean",
            StateVarType::BinBase64 => "bin.base64",
            StateVarType::BinHex => "bin.hex",
            StateVarType::Date => "date",
            StateVarType::DateTime => "dateTime",
            StateVarType::DateTimeTZ => "dateTime.tz",
            StateVarType::Time => "time",
            StateVarType::TimeTZ => "time.tz",
            StateVarType::UUID => "uuid",
            StateVarType::URI => "uri",
        }
    }

    /// Valeur par défaut du type, quand le SCPD n'en fournit pas.
    pub fn default_value(&self) -> StateValue {
        match self {
            StateVarType::UI1 => StateValue::UI1(0),
            StateVarType::UI2 => StateValue::UI2(0),
            StateVarType::UI4 => StateValue::UI4(0),
            StateVarType::I1 => StateValue::I1(0),
            StateVarType::I2 => StateValue::I2(0),
            StateVarType::I4 => StateValue::I4(0),
            StateVarType::Int => StateValue::Int(0),
            StateVarType::R4 => StateValue::R4(0.0),
            StateVarType::R8 => StateValue::R8(0.0),
            StateVarType::Number => StateValue::Number(0.0),
            StateVarType::Fixed14_4 => StateValue::Fixed14_4(0.0),
            StateVarType::Float => StateValue::Float(0.0),
            StateVarType::Char => StateValue::Char('\0'),
            StateVarType::String => StateValue::String(String::new()),
            StateVarType::Boolean => StateValue::Boolean(false),
            StateVarType::BinBase64 => StateValue::BinBase64(String::new()),
            StateVarType::BinHex => StateValue::BinHex(String::new()),
            StateVarType::Date => StateValue::Date(NaiveDate::default()),
            StateVarType::DateTime => StateValue::DateTime(NaiveDateTime::default()),
            StateVarType::DateTimeTZ => StateValue::DateTimeTZ(DateTime::default()),
            StateVarType::Time => StateValue::Time(NaiveTime::default()),
            StateVarType::TimeTZ => StateValue::TimeTZ(DateTime::default()),
            StateVarType::UUID => StateValue::UUID(Uuid::nil()),
            StateVarType::URI => {
                StateValue::URI(Url::parse("http://0.0.0.0/").expect("static URL parses"))
            }
        }
    }

    /// Convertit une valeur textuelle du fil vers ce type.
    pub fn parse_value(&self, raw: &str) -> Result<StateValue, StateValueError> {
        let trimmed = raw.trim();
        Ok(match self {
            StateVarType::UI1 => StateValue::UI1(trimmed.parse()?),
            StateVarType::UI2 => StateValue::UI2(trimmed.parse()?),
            StateVarType::UI4 => StateValue::UI4(trimmed.parse()?),
            StateVarType::I1 => StateValue::I1(trimmed.parse()?),
            StateVarType::I2 => StateValue::I2(trimmed.parse()?),
            StateVarType::I4 => StateValue::I4(trimmed.parse()?),
            StateVarType::Int => StateValue::Int(trimmed.parse()?),
            StateVarType::R4 => StateValue::R4(trimmed.parse()?),
            StateVarType::R8 => StateValue::R8(trimmed.parse()?),
            StateVarType::Number => StateValue::Number(trimmed.parse()?),
            StateVarType::Fixed14_4 => StateValue::Fixed14_4(trimmed.parse()?),
            StateVarType::Float => StateValue::Float(trimmed.parse()?),
            StateVarType::Char => {
                let mut chars = trimmed.chars();
                let c = chars.next().ok_or_else(|| {
                    StateValueError::ConversionError("empty char value".to_string())
                })?;
                if chars.next().is_some() {
                    return Err(StateValueError::ConversionError(format!(
                        "char value has more than one character: {trimmed}"
                    )));
                }
                StateValue::Char(c)
            }
            // Les chaînes gardent leurs blancs : le fil est significatif.
            StateVarType::String => StateValue::String(raw.to_string()),
            StateVarType::Boolean => StateValue::Boolean(parse_bool(trimmed)?),
            StateVarType::BinBase64 => {
                base64::engine::general_purpose::STANDARD.decode(trimmed)?;
                StateValue::BinBase64(trimmed.to_string())
            }
            StateVarType::BinHex => {
                hex::decode(trimmed)?;
                StateValue::BinHex(trimmed.to_string())
            }
            StateVarType::Date => StateValue::Date(NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")?),
            StateVarType::DateTime => {
                StateValue::DateTime(NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")?)
            }
            StateVarType::DateTimeTZ => StateValue::DateTimeTZ(DateTime::parse_from_str(
                trimmed,
                "%Y-%m-%dT%H:%M:%S%:z",
            )?),
            StateVarType::Time => StateValue::Time(NaiveTime::parse_from_str(trimmed, "%H:%M:%S")?),
            StateVarType::TimeTZ => {
                // chrono n'a pas d'heure-avec-fuseau autonome : on ancre
                // sur l'époque pour ne garder que l'heure et l'offset.
                let anchored = format!("1970-01-01T{trimmed}");
                StateValue::TimeTZ(DateTime::parse_from_str(
                    &anchored,
                    "%Y-%m-%dT%H:%M:%S%:z",
                )?)
            }
            StateVarType::UUID => StateValue::UUID(Uuid::parse_str(trimmed)?),
            StateVarType::URI => StateValue::URI(Url::parse(trimmed)?),
        })
    }
}

impl FromStr for StateVarType {
    type Err = StateValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "ui1" => StateVarType::UI1,
            "ui2" => StateVarType::UI2,
            "ui4" => StateVarType::UI4,
            "i1" => StateVarType::I1,
            "i2" => StateVarType::I2,
            "i4" => StateVarType::I4,
            "int" => StateVarType::Int,
            "r4" => StateVarType::R4,
            "r8" => StateVarType::R8,
            "number" => StateVarType::Number,
            "fixed.14.4" => StateVarType::Fixed14_4,
            "float" => StateVarType::Float,
            "char" => StateVarType::Char,
            "string" => StateVarType::String,
            "boolean" => StateVarType::Boolean,
            "bin.base64" => StateVarType::BinBase64,
            "bin.hex" => StateVarType::BinHex,
            "date" => StateVarType::Date,
            "dateTime" => StateVarType::DateTime,
            "dateTime.tz" => StateVarType::DateTimeTZ,
            "time" => StateVarType::Time,
            "time.tz" => StateVarType::TimeTZ,
            "uuid" => StateVarType::UUID,
            "uri" => StateVarType::URI,
            other => return Err(StateValueError::UnknownType(other.to_string())),
        })
    }
}

/// Booléens UDA : 1/0, true/false, yes/no.
fn parse_bool(raw: &str) -> Result<bool, StateValueError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(StateValueError::ConversionError(format!(
            "invalid boolean value: {other}"
        ))),
    }
}

impl fmt::Display for StateValue {
    /// Forme textuelle du fil (celle émise dans SOAP et GENA).
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StateValue::UI1(v) => write!(f, "{v}"),
            StateValue::UI2(v) => write!(f, "{v}"),
            StateValue::UI4(v) => write!(f, "{v}"),
            StateValue::I1(v) => write!(f, "{v}"),
            StateValue::I2(v) => write!(f, "{v}"),
            StateValue::I4(v) | StateValue::Int(v) => write!(f, "{v}"),
            StateValue::R4(v) => write!(f, "{v}"),
            StateValue::R8(v) | StateValue::Number(v) | StateValue::Float(v) => write!(f, "{v}"),
            StateValue::Fixed14_4(v) => write!(f, "{v:.4}"),
            StateValue::Char(v) => write!(f, "{v}"),
            StateValue::String(v) => f.write_str(v),
            // Forme canonique UDA : 1 / 0.
            StateValue::Boolean(v) => f.write_str(if *v { "1" } else { "0" }),
            StateValue::BinBase64(v) | StateValue::BinHex(v) => f.write_str(v),
            StateValue::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            StateValue::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%dT%H:%M:%S")),
            StateValue::DateTimeTZ(v) => write!(f, "{}", v.format("%Y-%m-%dT%H:%M:%S%:z")),
            StateValue::Time(v) => write!(f, "{}", v.format("%H:%M:%S")),
            StateValue::TimeTZ(v) => write!(f, "{}", v.format("%H:%M:%S%:z")),
            StateValue::UUID(v) => write!(f, "{v}"),
            StateValue::URI(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_uda_name_parses_back() {
        let names = [
            "ui1", "ui2", "ui4", "i1", "i2", "i4", "int", "r4", "r8", "number", "fixed.14.4",
            "float", "char", "string", "boolean", "bin.base64", "bin.hex", "date", "dateTime",
            "dateTime.tz", "time", "time.tz", "uuid", "uri",
        ];
        for name in names {
            let ty: StateVarType = name.parse().unwrap();
            assert_eq!(ty.uda_name(), name);
        }
        assert!("blob".parse::<StateVarType>().is_err());
    }

    #[test]
    fn boolean_forms() {
        for raw in ["1", "true", "yes", "TRUE"] {
            assert_eq!(
                StateVarType::Boolean.parse_value(raw).unwrap(),
                StateValue::Boolean(true)
            );
        }
        for raw in ["0", "false", "no"] {
            assert_eq!(
                StateVarType::Boolean.parse_value(raw).unwrap(),
                StateValue::Boolean(false)
            );
        }
        assert!(StateVarType::Boolean.parse_value("maybe").is_err());
        assert_eq!(StateValue::Boolean(true).to_string(), "1");
    }

    #[test]
    fn numeric_bounds_are_enforced() {
        assert!(StateVarType::UI1.parse_value("255").is_ok());
        assert!(StateVarType::UI1.parse_value("256").is_err());
        assert!(StateVarType::I1.parse_value("-128").is_ok());
        assert!(StateVarType::I1.parse_value("-129").is_err());
    }

    #[test]
    fn date_time_round_trips() {
        let value = StateVarType::Date.parse_value("2024-03-01").unwrap();
        assert_eq!(value.to_string(), "2024-03-01");

        let value = StateVarType::DateTime
            .parse_value("2024-03-01T12:30:00")
            .unwrap();
        assert_eq!(value.to_string(), "2024-03-01T12:30:00");

        let value = StateVarType::DateTimeTZ
            .parse_value("2024-03-01T12:30:00+02:00")
            .unwrap();
        assert_eq!(value.to_string(), "2024-03-01T12:30:00+02:00");

        let value = StateVarType::TimeTZ.parse_value("12:30:00+02:00").unwrap();
        assert_eq!(value.to_string(), "12:30:00+02:00");
    }

    #[test]
    fn binary_values_are_validated() {
        assert!(StateVarType::BinBase64.parse_value("aGVsbG8=").is_ok());
        assert!(StateVarType::BinBase64.parse_value("???").is_err());
        assert!(StateVarType::BinHex.parse_value("deadbeef").is_ok());
        assert!(StateVarType::BinHex.parse_value("xyz").is_err());
    }

    #[test]
    fn fixed_point_keeps_four_decimals() {
        let value = StateVarType::Fixed14_4.parse_value("3.5").unwrap();
        assert_eq!(value.to_string(), "3.5000");
    }
}
