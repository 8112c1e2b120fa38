//! Lot identity: the tuple that makes two certificate quantities fungible.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Generation technology a certificate was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyType {
    Solar,
    Wind,
    Hydro,
    Biomass,
    Geothermal,
    Tidal,
}

impl EnergyType {
    pub fn as_str(self) -> &'static str {
        match self {
            EnergyType::Solar => "solar",
            EnergyType::Wind => "wind",
            EnergyType::Hydro => "hydro",
            EnergyType::Biomass => "biomass",
            EnergyType::Geothermal => "geothermal",
            EnergyType::Tidal => "tidal",
        }
    }
}

impl fmt::Display for EnergyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnergyType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "solar" => Ok(EnergyType::Solar),
            "wind" => Ok(EnergyType::Wind),
            "hydro" => Ok(EnergyType::Hydro),
            "biomass" => Ok(EnergyType::Biomass),
            "geothermal" => Ok(EnergyType::Geothermal),
            "tidal" => Ok(EnergyType::Tidal),
            other => Err(EngineError::Validation(format!(
                "unknown energy type '{}'",
                other
            ))),
        }
    }
}

/// Earliest vintage year accepted for a lot.
pub const MIN_VINTAGE: u16 = 1990;
/// Latest vintage year accepted for a lot.
pub const MAX_VINTAGE: u16 = 2100;

/// (facility, energy type, vintage, region, certification standard).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LotIdentity {
    pub facility_id: String,
    pub energy_type: EnergyType,
    pub vintage: u16,
    pub region: String,
    pub certification_standard: String,
}

impl LotIdentity {
    pub fn new(
        facility_id: impl Into<String>,
        energy_type: EnergyType,
        vintage: u16,
        region: impl Into<String>,
        certification_standard: impl Into<String>,
    ) -> Self {
        LotIdentity {
            facility_id: facility_id.into(),
            energy_type,
            vintage,
            region: region.into(),
            certification_standard: certification_standard.into(),
        }
    }

    /// Reject blank text fields and out-of-range vintages.
    pub fn validate(&self) -> EngineResult<()> {
        if self.facility_id.trim().is_empty() {
            return Err(EngineError::Validation("facility id is empty".into()));
        }
        if self.region.trim().is_empty() {
            return Err(EngineError::Validation("region is empty".into()));
        }
        if self.certification_standard.trim().is_empty() {
            return Err(EngineError::Validation(
                "certification standard is empty".into(),
            ));
        }
        if !(MIN_VINTAGE..=MAX_VINTAGE).contains(&self.vintage) {
            return Err(EngineError::Validation(format!(
                "vintage {} outside {}..={}",
                self.vintage, MIN_VINTAGE, MAX_VINTAGE
            )));
        }
        Ok(())
    }
}

impl fmt::Display for LotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.facility_id, self.energy_type, self.vintage, self.region, self.certification_standard
        )
    }
}
