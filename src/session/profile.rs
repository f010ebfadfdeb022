use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Height or weight with the unit the user entered it in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: f64,
    pub unit: String,
}

impl Measurement {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }
}

/// Height or weight as sent by the client: a bare number (unit in a sibling
/// `*_unit` key) or a `{value, unit}` object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Value(Number),
    Measured(Measurement),
}

impl From<Measurement> for Quantity {
    fn from(measurement: Measurement) -> Self {
        Quantity::Measured(measurement)
    }
}

/// Daily macro targets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetMacros {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein_g: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbs_g: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fat_g: Option<u32>,
}

/// User profile forwarded verbatim in `session.init`
///
/// The transport never interprets these fields; the remote endpoint uses
/// them to personalize the coach.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// e.g. "muscle_gain", "weight_loss"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dietary_preferences: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allergies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub health_conditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_macros: Option<TargetMacros>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal_frequency: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_hours: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stress_level: Option<String>,
    /// Keys this crate does not model, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProfileContext {
    pub fn with_goal(goal: impl Into<String>) -> Self {
        Self {
            goal: Some(goal.into()),
            ..Self::default()
        }
    }
}
