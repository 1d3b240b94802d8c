use std::fmt;
use std::str::FromStr;

use chrono::NaiveTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// Kind of sync target. Doubles as the ledger's scheduler type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Bank,
    Card,
    Tax,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Bank, EntityKind::Card, EntityKind::Tax];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Bank => "bank",
            EntityKind::Card => "card",
            EntityKind::Tax => "tax",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bank" => Ok(EntityKind::Bank),
            "card" => Ok(EntityKind::Card),
            "tax" => Ok(EntityKind::Tax),
            other => Err(CoreError::InvalidEntityKey(format!("unknown entity kind '{other}'"))),
        }
    }
}

/// Identifies one tracked entity, e.g. `card:shinhan` or `tax:1234567890`.
///
/// For tax entities the id is the business registration number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }

    pub fn card(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Card, id)
    }

    pub fn bank(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Bank, id)
    }

    pub fn tax(business_number: impl Into<String>) -> Self {
        Self::new(EntityKind::Tax, business_number)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for EntityKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| CoreError::InvalidEntityKey(s.to_string()))?;
        let id = id.trim();
        if id.is_empty() {
            return Err(CoreError::InvalidEntityKey(s.to_string()));
        }
        Ok(Self::new(kind.parse()?, id))
    }
}

impl Serialize for EntityKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Daily schedule for one entity. Mutated only by user configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchedule {
    pub enabled: bool,
    #[serde(rename = "time", with = "hhmm")]
    pub time_of_day: NaiveTime,
}

impl EntitySchedule {
    pub fn daily_at(time: &str) -> Result<Self, CoreError> {
        Ok(Self {
            enabled: true,
            time_of_day: parse_time_of_day(time)?,
        })
    }

    pub fn disabled(self) -> Self {
        Self { enabled: false, ..self }
    }
}

/// Parse `HH:MM` into a time of day.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, CoreError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| CoreError::InvalidTimeOfDay(s.to_string()))
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&time.format("%H:%M"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_time_of_day(&raw).map_err(serde::de::Error::custom)
    }
}
