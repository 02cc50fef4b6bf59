//! Scenario configuration.
//!
//! A scenario fixes the utterance, the expected parameters, the iteration
//! count and the ordered prompt-version and provider lists. It is parsed from
//! YAML or JSON, checked against an embedded JSON Schema, then validated.

mod parser;
mod schema;

pub use parser::{EndpointSpec, Scenario, ScenarioError};
pub use schema::validate_scenario_schema;
