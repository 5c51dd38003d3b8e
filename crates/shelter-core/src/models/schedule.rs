use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// How often the scheduled backup fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Never,
    Daily,
    Weekly,
}

impl Frequency {
    /// Read the `backup_frequency` setting. Missing or unknown values disable scheduling.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value {
            None => Frequency::Never,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "Unknown backup frequency, scheduling disabled");
                Frequency::Never
            }),
        }
    }

    /// Cron expression (sec min hour dom month dow) for this frequency, local time
    pub fn cron_expression(&self) -> Option<&'static str> {
        match self {
            Frequency::Never => None,
            Frequency::Daily => Some("0 0 0 * * *"),
            Frequency::Weekly => Some("0 0 0 * * Sun"),
        }
    }
}

impl Display for Frequency {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Frequency::Never => write!(f, "NEVER"),
            Frequency::Daily => write!(f, "DAILY"),
            Frequency::Weekly => write!(f, "WEEKLY"),
        }
    }
}

impl FromStr for Frequency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NEVER" | "" => Ok(Frequency::Never),
            "DAILY" => Ok(Frequency::Daily),
            "WEEKLY" => Ok(Frequency::Weekly),
            _ => Err(anyhow::anyhow!("Invalid backup frequency: {}", s)),
        }
    }
}
