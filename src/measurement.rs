use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::proto::mode::Mode;

/// Non-numeric reading state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    #[serde(rename = "OL")]
    Overload,
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "SHORT")]
    Short,
    #[serde(rename = "HIGH")]
    LogicHigh,
    #[serde(rename = "LOW")]
    LogicLow,
    #[serde(rename = "----")]
    LogicUndefined,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Overload => f.write_str("Overload"),
            Classification::Open => f.write_str("Open circuit"),
            Classification::Short => f.write_str("Short circuit"),
            Classification::LogicHigh => f.write_str("Logic high"),
            Classification::LogicLow => f.write_str("Logic low"),
            Classification::LogicUndefined => f.write_str("Logic undefined"),
        }
    }
}

/// One decoded response line
///
/// `raw_value` keeps the meter notation (e.g. `3.999`, `1.5k`, `OL`),
/// numeric interpretation is left to [`Reading::numeric_value`].
/// Nothing but `raw_line` is meaningful when `valid` is false.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Reading {
    pub valid: bool,
    /// Mode word as sent, e.g. `FR`
    pub mode_code: String,
    /// Display label, e.g. `FREQ`
    pub mode_name: String,
    pub raw_value: String,
    /// Normalized units, e.g. `kΩ`, `°C`
    pub units: String,
    pub raw_line: String,
    pub classification: Option<Classification>,
}

impl Reading {
    pub(crate) fn invalid(raw_line: impl Into<String>) -> Self {
        Self {
            raw_line: raw_line.into(),
            ..Default::default()
        }
    }

    pub fn mode(&self) -> Option<Mode> {
        if self.valid {
            Mode::from_code(&self.mode_code)
        } else {
            None
        }
    }

    pub fn is_overload(&self) -> bool {
        self.classification == Some(Classification::Overload)
    }

    pub fn is_open(&self) -> bool {
        self.classification == Some(Classification::Open)
    }

    pub fn is_short(&self) -> bool {
        self.classification == Some(Classification::Short)
    }

    pub fn is_logic_high(&self) -> bool {
        self.classification == Some(Classification::LogicHigh)
    }

    pub fn is_logic_low(&self) -> bool {
        self.classification == Some(Classification::LogicLow)
    }

    pub fn is_logic_undefined(&self) -> bool {
        self.classification == Some(Classification::LogicUndefined)
    }

    /// Value with the magnitude suffix applied, e.g. `1.5k` -> 1500.0.
    ///
    /// Units are not taken into account, `3.999 mV` yields 3.999.
    pub fn numeric_value(&self) -> Option<f64> {
        if !self.valid || self.classification.is_some() {
            return None;
        }
        let value = self.raw_value.as_str();
        let (digits, factor) = match value.chars().last()? {
            'p' => (&value[..value.len() - 1], 1e-12),
            'n' => (&value[..value.len() - 1], 1e-9),
            'u' | 'U' => (&value[..value.len() - 1], 1e-6),
            'm' => (&value[..value.len() - 1], 1e-3),
            'k' | 'K' => (&value[..value.len() - 1], 1e3),
            'M' => (&value[..value.len() - 1], 1e6),
            'G' => (&value[..value.len() - 1], 1e9),
            _ => (value, 1.0),
        };
        digits.parse::<f64>().ok().map(|v| v * factor)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.valid {
            return f.write_fmt(format_args!("<invalid: {:?}>", self.raw_line));
        }
        f.write_fmt(format_args!("{} {}", self.mode_name, self.raw_value))?;
        if !self.units.is_empty() {
            f.write_fmt(format_args!(" {}", self.units))?;
        }
        match self.classification {
            Some(class) if f.alternate() => f.write_fmt(format_args!(" [{}]", class)),
            _ => Ok(()),
        }
    }
}

/// Reading with the time it was received
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Local>,
    pub reading: Reading,
}

impl Sample {
    pub fn now(reading: Reading) -> Self {
        Self {
            timestamp: Local::now(),
            reading,
        }
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{} ", self.timestamp.format("%H:%M:%S%.3f")))?;
        if f.alternate() {
            f.write_fmt(format_args!("{:#}", self.reading))
        } else {
            f.write_fmt(format_args!("{}", self.reading))
        }
    }
}

/// CSV row layout: `date,time,mode,reading,units`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlattenSample {
    pub date: String,
    pub time: String,
    pub mode: String,
    pub reading: String,
    pub units: String,
}

impl From<&Sample> for FlattenSample {
    fn from(value: &Sample) -> Self {
        Self {
            date: value.timestamp.format("%Y-%m-%d").to_string(),
            time: value.timestamp.format("%H:%M:%S%.3f").to_string(),
            mode: value.reading.mode_name.clone(),
            reading: value.reading.raw_value.clone(),
            units: value.reading.units.clone(),
        }
    }
}
