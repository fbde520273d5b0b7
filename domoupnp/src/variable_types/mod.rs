//! # Module Variable Types - types de données UDA
//!
//! Ce module implémente l'ensemble des types de données des variables
//! d'état UPnP (`ui1`…`uuid`) et leurs valeurs typées :
//!
//! - [`StateVarType`] : le type déclaré dans un SCPD ;
//! - [`StateValue`] : une valeur portée par ce type ;
//! - conversion texte ↔ valeur dans les deux sens (le fil UPnP est
//!   toujours textuel).

mod convert;

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Erreurs de conversion et de validation des valeurs d'état.
#[derive(Error, Debug)]
pub enum StateValueError {
    #[error("conversion error: {0}")]
    ConversionError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("range error: {0}")]
    RangeError(String),

    #[error("type error: {0}")]
    TypeError(String),

    #[error("unknown UPnP data type: {0}")]
    UnknownType(String),
}

impl From<std::num::ParseIntError> for StateValueError {
    fn from(err: std::num::ParseIntError) -> Self {
        StateValueError::ConversionError(format!("integer conversion error: {err}"))
    }
}

impl From<std::num::ParseFloatError> for StateValueError {
    fn from(err: std::num::ParseFloatError) -> Self {
        StateValueError::ConversionError(format!("float conversion error: {err}"))
    }
}

impl From<uuid::Error> for StateValueError {
    fn from(err: uuid::Error) -> Self {
        StateValueError::ConversionError(format!("UUID conversion error: {err}"))
    }
}

impl From<chrono::ParseError> for StateValueError {
    fn from(err: chrono::ParseError) -> Self {
        StateValueError::ConversionError(format!("time conversion error: {err}"))
    }
}

impl From<url::ParseError> for StateValueError {
    fn from(err: url::ParseError) -> Self {
        StateValueError::ConversionError(format!("URI conversion error: {err}"))
    }
}

impl From<base64::DecodeError> for StateValueError {
    fn from(err: base64::DecodeError) -> Self {
        StateValueError::ConversionError(format!("base64 conversion error: {err}"))
    }
}

impl From<hex::FromHexError> for StateValueError {
    fn from(err: hex::FromHexError) -> Self {
        StateValueError::ConversionError(format!("hex conversion error: {err}"))
    }
}

/// Type de donnée d'une variable d'état, tel que déclaré dans un SCPD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateVarType {
    UI1,        // Entier non signé 8 bits
    UI2,        // Entier non signé 16 bits
    UI4,        // Entier non signé 32 bits
    I1,         // Entier signé 8 bits
    I2,         // Entier signé 16 bits
    I4,         // Entier signé 32 bits
    Int,        // Synonyme de i4
    R4,         // Flottant 32 bits
    R8,         // Flottant 64 bits
    Number,     // Synonyme de r8
    Fixed14_4,  // Décimal en virgule fixe
    Float,      // Synonyme de r8
    Char,       // Caractère Unicode
    String,     // Chaîne
    Boolean,    // Booléen
    BinBase64,  // Binaire encodé base64
    BinHex,     // Binaire encodé hexadécimal
    Date,       // Date (YYYY-MM-DD)
    DateTime,   // Date + heure sans fuseau
    DateTimeTZ, // Date + heure avec fuseau
    Time,       // Heure sans fuseau
    TimeTZ,     // Heure avec fuseau
    UUID,       // Identifiant unique universel
    URI,        // Uniform Resource Identifier
}

/// Une valeur typée portée par une variable d'état.
#[derive(Clone, Debug, PartialEq)]
pub enum StateValue {
    UI1(u8),
    UI2(u16),
    UI4(u32),
    I1(i8),
    I2(i16),
    I4(i32),
    Int(i32),
    R4(f32),
    R8(f64),
    Number(f64),
    Fixed14_4(f64),
    Float(f64),
    Char(char),
    String(String),
    Boolean(bool),
    BinBase64(String),
    BinHex(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    DateTimeTZ(DateTime<FixedOffset>),
    Time(NaiveTime),
    TimeTZ(DateTime<FixedOffset>),
    UUID(Uuid),
    URI(Url),
}

impl StateValue {
    /// Le type de cette valeur.
    pub fn var_type(&self) -> StateVarType {
        match self {
            StateValue::UI1(_) => StateVarType::UI1,
            StateValue::UI2(_) => StateVarType::UI2,
            StateValue::UI4(_) => StateVarType::UI4,
            StateValue::I1(_) => StateVarType::I1,
            StateValue::I2(_) => StateVarType::I2,
            StateValue::I4(_) => StateVarType::I4,
            StateValue::Int(_) => StateVarType::Int,
            StateValue::R4(_) => StateVarType::R4,
            StateValue::R8(_) => StateVarType::R8,
            StateValue::Number(_) => StateVarType::Number,
            StateValue::Fixed14_4(_) => StateVarType::Fixed14_4,
            StateValue::Float(_) => StateVarType::Float,
            StateValue::Char(_) => StateVarType::Char,
            StateValue::String(_) => StateVarType::String,
            StateValue::Boolean(_) => StateVarType::Boolean,
            StateValue::BinBase64(_) => StateVarType::BinBase64,
            StateValue::BinHex(_) => StateVarType::BinHex,
            StateValue::Date(_) => StateVarType::Date,
            StateValue::DateTime(_) => StateVarType::DateTime,
            StateValue::DateTimeTZ(_) => StateVarType::DateTimeTZ,
            StateValue::Time(_) => StateVarType::Time,
            StateValue::TimeTZ(_) => StateVarType::TimeTZ,
            StateValue::UUID(_) => StateVarType::UUID,
            StateValue::URI(_) => StateVarType::URI,
        }
    }

    /// Projection numérique (bornes, pas, minimumDelta) ; None pour les
    /// types non numériques.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::UI1(v) => Some(f64::from(*v)),
            StateValue::UI2(v) => Some(f64::from(*v)),
            StateValue::UI4(v) => Some(f64::from(*v)),
            StateValue::I1(v) => Some(f64::from(*v)),
            StateValue::I2(v) => Some(f64::from(*v)),
            StateValue::I4(v) | StateValue::Int(v) => Some(f64::from(*v)),
            StateValue::R4(v) => Some(f64::from(*v)),
            StateValue::R8(v) | StateValue::Number(v) | StateValue::Fixed14_4(v)
            | StateValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for StateVarType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.uda_name())
    }
}
