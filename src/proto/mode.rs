use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Measurement function, as announced by the leading mode word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    #[serde(rename = "DC")]
    Dc,
    #[serde(rename = "AC")]
    Ac,
    #[serde(rename = "RES")]
    Resistance,
    #[serde(rename = "BUZ")]
    Continuity,
    #[serde(rename = "DIOD")]
    Diode,
    #[serde(rename = "LOG")]
    Logic,
    #[serde(rename = "FR")]
    Frequency,
    #[serde(rename = "CAP")]
    Capacitance,
    #[serde(rename = "IND")]
    Inductance,
    #[serde(rename = "TEMP")]
    Temperature,
}

impl Mode {
    pub const ALL: [Mode; 10] = [
        Mode::Dc,
        Mode::Ac,
        Mode::Resistance,
        Mode::Continuity,
        Mode::Diode,
        Mode::Logic,
        Mode::Frequency,
        Mode::Capacitance,
        Mode::Inductance,
        Mode::Temperature,
    ];

    /// Look up a mode word. Only exact tokens match, "DCV" or "D" don't.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|mode| mode.code() == code)
    }

    /// Token as sent by the meter
    pub fn code(&self) -> &'static str {
        match self {
            Mode::Dc => "DC",
            Mode::Ac => "AC",
            Mode::Resistance => "RES",
            Mode::Continuity => "BUZ",
            Mode::Diode => "DIOD",
            Mode::Logic => "LOG",
            Mode::Frequency => "FR",
            Mode::Capacitance => "CAP",
            Mode::Inductance => "IND",
            Mode::Temperature => "TEMP",
        }
    }

    /// Display label
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Dc => "DC",
            Mode::Ac => "AC",
            Mode::Resistance => "RES",
            Mode::Continuity => "CONT",
            Mode::Diode => "DIODE",
            Mode::Logic => "LOGIC",
            Mode::Frequency => "FREQ",
            Mode::Capacitance => "CAP",
            Mode::Inductance => "IND",
            Mode::Temperature => "TEMP",
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
