use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    error::ScenarioError,
    eval::{
        evaluator::ValidatorRegistry,
        scenario::{Scenario, ScenarioConfig, Turn},
    },
};

/// File form of a scenario. Validators are referenced by registry name
/// because functions cannot be serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDocument {
    pub config: ScenarioConfig,
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<String>,
}

impl ScenarioDocument {
    pub fn from_yaml_str(input: &str) -> Result<Self, ScenarioError> {
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn from_json_str(input: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            Some("json") => Self::from_json_str(&content),
            _ => Err(ScenarioError::UnsupportedFormat(path.display().to_string())),
        }
    }

    pub fn to_yaml_string(&self) -> Result<String, ScenarioError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn into_scenario(self, registry: &ValidatorRegistry) -> Result<Scenario, ScenarioError> {
        let mut scenario = Scenario::new(self.config)?;

        for turn in self.turns {
            scenario.add_turn(turn);
        }

        for name in &self.validators {
            let validator = registry
                .get(name)
                .ok_or_else(|| ScenarioError::UnknownValidator(name.clone()))?;
            scenario.add_named_validator(validator);
        }

        Ok(scenario)
    }
}
