//! Schema-checked parsing of structured oracle answers.
//!
//! Every parser returns `None` for anything that is not a valid answer; the
//! caller decides how an empty answer is treated.

use std::sync::LazyLock;

use jsonschema::Validator;
use serde_json::Value;
use tracing::warn;

use crate::core::types::Strategy;

static STRATEGIES_SCHEMA: LazyLock<Validator> =
    LazyLock::new(|| compile(include_str!("schemas/strategies.schema.json")));
static SOLUTIONS_SCHEMA: LazyLock<Validator> =
    LazyLock::new(|| compile(include_str!("schemas/solutions.schema.json")));
static VERDICT_SCHEMA: LazyLock<Validator> =
    LazyLock::new(|| compile(include_str!("schemas/verdict.schema.json")));
static PACKAGES_SCHEMA: LazyLock<Validator> =
    LazyLock::new(|| compile(include_str!("schemas/packages.schema.json")));

fn compile(schema: &str) -> Validator {
    let value: Value = serde_json::from_str(schema).expect("embedded schema should be json");
    jsonschema::validator_for(&value).expect("embedded schema should compile")
}

fn validated(raw: &str, validator: &Validator, what: &str) -> Option<Value> {
    let value: Value = match serde_json::from_str(raw.trim()) {
        Ok(value) => value,
        Err(err) => {
            warn!(what, err = %err, "answer is not json");
            return None;
        }
    };
    let errors: Vec<String> = validator.iter_errors(&value).map(|e| e.to_string()).collect();
    if !errors.is_empty() {
        warn!(what, errors = %errors.join("; "), "answer failed schema validation");
        return None;
    }
    Some(value)
}

/// `strategies.json`: a ranked list of package lists.
pub fn parse_strategies(raw: &str) -> Option<Vec<Strategy>> {
    let value = validated(raw, &STRATEGIES_SCHEMA, "strategies.json")?;
    serde_json::from_value::<Vec<Vec<String>>>(value)
        .ok()
        .map(|lists| lists.into_iter().map(Strategy::new).collect())
}

/// `solutions.json`: candidates keyed `"1"`, `"2"`, ... returned in rank order.
pub fn parse_solutions(raw: &str) -> Option<Vec<String>> {
    let value = validated(raw, &SOLUTIONS_SCHEMA, "solutions.json")?;
    let object = value.as_object()?;
    let mut ranked: Vec<(u64, String)> = object
        .iter()
        .filter_map(|(key, value)| {
            let rank = key.parse::<u64>().ok()?;
            let text = value.as_str()?.trim();
            (!text.is_empty()).then(|| (rank, text.to_string()))
        })
        .collect();
    ranked.sort_by_key(|(rank, _)| *rank);
    let solutions: Vec<String> = ranked.into_iter().map(|(_, text)| text).collect();
    (!solutions.is_empty()).then_some(solutions)
}

/// A `{"<key>": "yes" | "no"}` verdict.
pub fn parse_verdict(raw: &str, key: &str) -> Option<bool> {
    let value = validated(raw, &VERDICT_SCHEMA, key)?;
    let answer = value.get(key)?.as_str()?.trim().to_lowercase();
    if answer.starts_with("yes") {
        Some(true)
    } else if answer.starts_with("no") {
        Some(false)
    } else {
        None
    }
}

/// `apt-get-packages.json`: OS package names to install.
pub fn parse_packages(raw: &str) -> Option<Vec<String>> {
    let value = validated(raw, &PACKAGES_SCHEMA, "apt-get-packages.json")?;
    let packages = value.get("packages")?.as_array()?;
    Some(
        packages
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}
