use crate::{error::ScenarioError, eval::scenario::Scenario};

pub mod vending_machine;

pub use vending_machine::{
    basic_vending_scenario, complex_vending_scenario, custom_vending_scenario,
    edge_case_scenario, register_builtin_validators,
};

pub const BUILTIN_NAMES: [&str; 4] = [
    "basic_vending_machine",
    "complex_vending_machine",
    "edge_cases",
    "custom_test",
];

/// Looks up a built-in scenario by its config name.
pub fn builtin(name: &str) -> Option<Result<Scenario, ScenarioError>> {
    match name {
        "basic_vending_machine" => Some(basic_vending_scenario()),
        "complex_vending_machine" => Some(complex_vending_scenario()),
        "edge_cases" => Some(edge_case_scenario()),
        "custom_test" => Some(custom_vending_scenario()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_name_resolves_to_itself() {
        for name in BUILTIN_NAMES {
            let scenario = builtin(name).unwrap().unwrap();
            assert_eq!(scenario.name(), name);
        }
        assert!(builtin("nope").is_none());
    }
}
