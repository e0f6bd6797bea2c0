use regex::{Regex, RegexBuilder};

use crate::{
    error::{ScenarioError, ValidatorError},
    eval::{
        evaluator::ValidatorRegistry,
        scenario::{Scenario, ScenarioConfig},
    },
    history::Transcript,
};

pub const INVENTORY_TRACKING: &str = "inventory_tracking";
pub const PRICE_CONSISTENCY: &str = "price_consistency";

const BASIC_PROMPT: &str = "You are a vending machine. You have the following items:
- A1: Chips ($1.50) - 3 in stock
- A2: Cookies ($2.00) - 2 in stock
- A3: Candy ($1.00) - 5 in stock
- B1: Water ($1.50) - 4 in stock
- B2: Soda ($2.50) - 1 in stock

Keep track of inventory and money. Only accept $1, $5, $10, and $20 bills.
Provide change when necessary. Update inventory after each purchase.
Always show remaining inventory when asked.";

const COMPLEX_PROMPT: &str = "You are a vending machine with the following features:
- Track inventory for each item
- Accept bills: $1, $5, $10, $20
- Give exact change
- Allow refunds within the same session
- Maintain transaction history

Initial inventory:
- A1: Chocolate Bar ($2.50) - 10 in stock
- A2: Granola Bar ($3.00) - 8 in stock
- B1: Orange Juice ($3.50) - 5 in stock
- B2: Sports Drink ($4.00) - 3 in stock
- C1: Energy Bar ($4.50) - 6 in stock";

const EDGE_CASE_PROMPT: &str = "You are a vending machine. Inventory:
- A1: Gum ($0.50) - 2 in stock
- A2: Mints ($0.75) - 0 in stock (OUT OF STOCK)
- B1: Chips ($1.25) - 1 in stock

Handle errors gracefully for:
- Out of stock items
- Insufficient payment
- Invalid item codes
- Exact change scenarios";

const CUSTOM_PROMPT: &str = "You are a vending machine with:
- Soda ($1.50) - 5 in stock
- Juice ($2.00) - 3 in stock
Track inventory and prices consistently.";

/// Inventory, purchases with change, and an over-order of a scarce item.
pub fn basic_vending_scenario() -> Result<Scenario, ScenarioError> {
    let config = ScenarioConfig::new(
        "basic_vending_machine",
        "Test the model's ability to simulate a vending machine with state management",
    )
    .with_system_prompt(BASIC_PROMPT)
    .with_temperature(0.7)
    .with_max_tokens(500);

    let mut scenario = Scenario::new(config)?;
    scenario
        .add_user_input(
            "Hi, what items do you have?",
            &["Chips", "Cookies", "Candy", "Water", "Soda"],
        )
        .add_user_input(
            "I'll take the chips (A1). Here's $5.",
            &["change", "$3.50", r"\$3\.50"],
        )
        .add_user_input("What's left in stock for A1?", &["2", "two"])
        .add_user_input(
            "I'll buy 3 cookies (A2).",
            &["only 2", "not enough", "insufficient"],
        )
        .add_user_input(
            "Okay, I'll take 1 cookie then. Here's $5.",
            &["change", "$3.00", r"\$3\.00"],
        );

    Ok(scenario)
}

/// Multiple purchases followed by questions about transaction history.
pub fn complex_vending_scenario() -> Result<Scenario, ScenarioError> {
    let config = ScenarioConfig::new(
        "complex_vending_machine",
        "Advanced test with multiple purchases, refunds, and state tracking",
    )
    .with_system_prompt(COMPLEX_PROMPT)
    .with_temperature(0.7)
    .with_max_tokens(600);

    let mut scenario = Scenario::new(config)?;
    scenario
        .add_user_input(
            "I want to buy 2 chocolate bars.",
            &[r"\$5.00", r"\$5\.00", "five dollars"],
        )
        .add_user_input("Here's $10.", &["change", r"\$5.00", r"\$5\.00"])
        .add_user_input("How many chocolate bars do you have left?", &["8", "eight"])
        .add_user_input("What did I buy so far?", &["chocolate", "2", "two"]);

    Ok(scenario)
}

/// Out-of-stock items, unknown codes and underpayment.
pub fn edge_case_scenario() -> Result<Scenario, ScenarioError> {
    let config = ScenarioConfig::new("edge_cases", "Test error handling and edge cases")
        .with_system_prompt(EDGE_CASE_PROMPT)
        .with_temperature(0.7);

    let mut scenario = Scenario::new(config)?;
    scenario
        .add_user_input(
            "I want to buy A2.",
            &["out of stock", "not available", "unavailable"],
        )
        .add_user_input("Give me item Z9.", &["invalid", "not found", "doesn't exist"])
        .add_user_input("I'll take B1. Here's $1.", &["insufficient", "not enough", "need"]);

    Ok(scenario)
}

/// Small catalog graded by both pattern rules and the built-in validators.
pub fn custom_vending_scenario() -> Result<Scenario, ScenarioError> {
    let config = ScenarioConfig::new("custom_test", "Custom vending machine test with validators")
        .with_system_prompt(CUSTOM_PROMPT)
        .with_temperature(0.7);

    let mut scenario = Scenario::new(config)?;
    scenario
        .add_user_input("What do you have?", &["Soda", "Juice", "$1.50", "$2.00"])
        .add_user_input("I'll buy 2 sodas. Here's $5.", &["$2.00", "change"])
        .add_user_input("How many sodas are left?", &["3", "three"])
        .add_validator(PRICE_CONSISTENCY, price_consistency)
        .add_validator(INVENTORY_TRACKING, inventory_tracking);

    Ok(scenario)
}

pub fn register_builtin_validators(registry: &mut ValidatorRegistry) {
    registry
        .register(INVENTORY_TRACKING, inventory_tracking)
        .register(PRICE_CONSISTENCY, price_consistency);
}

/// At least two replies talk about stock levels.
pub fn inventory_tracking(transcript: &Transcript, _scenario: &Scenario) -> Result<bool, ValidatorError> {
    let mentions = transcript
        .responses()
        .iter()
        .map(|response| response.content.to_lowercase())
        .filter(|content| content.contains("stock") || content.contains("remaining"))
        .count();

    Ok(mentions >= 2)
}

fn catalog_regex() -> Result<Regex, ValidatorError> {
    Regex::new(r"(?m)^\s*-\s*(?:[A-Z]\d:\s*)?([A-Za-z][A-Za-z ]*?)\s*\(\$(\d+\.\d{2})\)")
        .map_err(|err| ValidatorError::new(err.to_string()))
}

/// Every price the model quotes right after a catalog item matches the
/// catalog in the system prompt.
pub fn price_consistency(transcript: &Transcript, scenario: &Scenario) -> Result<bool, ValidatorError> {
    let prompt = scenario
        .config()
        .system_prompt
        .as_deref()
        .ok_or_else(|| ValidatorError::new("scenario has no system prompt to read prices from"))?;

    let catalog: Vec<(String, String)> = catalog_regex()?
        .captures_iter(prompt)
        .map(|captures| (captures[1].trim().to_string(), captures[2].to_string()))
        .collect();

    if catalog.is_empty() {
        return Err(ValidatorError::new("no priced items found in the system prompt"));
    }

    for (item, price) in &catalog {
        let quoted = RegexBuilder::new(&format!(
            r"\b{}s?\b\W{{0,3}}\$(\d+\.\d{{2}})",
            regex::escape(item)
        ))
        .case_insensitive(true)
        .build()
        .map_err(|err| ValidatorError::new(err.to_string()))?;

        for response in transcript.responses() {
            for captures in quoted.captures_iter(&response.content) {
                if &captures[1] != price.as_str() {
                    return Ok(false);
                }
            }
        }
    }

    Ok(true)
}
