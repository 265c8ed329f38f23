//! Directive model: the closed set of commands a generator may embed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DirectiveError;

/// Every command type a generator is allowed to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveKind {
    LogMeal,
    LogWorkout,
    LogBody,
    LogBloodPressure,
    LogSubstance,
    SaveTrainingPlan,
    SaveProduct,
    AddSubstance,
    AddReminder,
    UpdateProfile,
    UpdateEquipment,
    SearchProduct,
}

impl DirectiveKind {
    pub const ALL: [DirectiveKind; 12] = [
        Self::LogMeal,
        Self::LogWorkout,
        Self::LogBody,
        Self::LogBloodPressure,
        Self::LogSubstance,
        Self::SaveTrainingPlan,
        Self::SaveProduct,
        Self::AddSubstance,
        Self::AddReminder,
        Self::UpdateProfile,
        Self::UpdateEquipment,
        Self::SearchProduct,
    ];

    /// Name used in the fenced block marker.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::LogMeal => "log_meal",
            Self::LogWorkout => "log_workout",
            Self::LogBody => "log_body",
            Self::LogBloodPressure => "log_blood_pressure",
            Self::LogSubstance => "log_substance",
            Self::SaveTrainingPlan => "save_training_plan",
            Self::SaveProduct => "save_product",
            Self::AddSubstance => "add_substance",
            Self::AddReminder => "add_reminder",
            Self::UpdateProfile => "update_profile",
            Self::UpdateEquipment => "update_equipment",
            Self::SearchProduct => "search_product",
        }
    }

    /// Storage table a confirmed directive of this kind is written to.
    ///
    /// `None` for directives that are consumed internally and never persisted.
    pub fn target_table(&self) -> Option<&'static str> {
        match self {
            Self::LogMeal => Some("meal_logs"),
            Self::LogWorkout => Some("workout_logs"),
            Self::LogBody => Some("body_measurements"),
            Self::LogBloodPressure => Some("blood_pressure_logs"),
            Self::LogSubstance => Some("substance_logs"),
            Self::SaveTrainingPlan => Some("training_plans"),
            Self::SaveProduct => Some("saved_products"),
            Self::AddSubstance => Some("tracked_substances"),
            Self::AddReminder => Some("reminders"),
            Self::UpdateProfile => Some("profiles"),
            Self::UpdateEquipment => Some("user_equipment"),
            Self::SearchProduct => None,
        }
    }

    /// Whether this kind becomes a user-confirmable action.
    pub fn is_actionable(&self) -> bool {
        self.target_table().is_some()
    }

    /// Short label for confirmation prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::LogMeal => "Log meal",
            Self::LogWorkout => "Log workout",
            Self::LogBody => "Log body measurement",
            Self::LogBloodPressure => "Log blood pressure",
            Self::LogSubstance => "Log substance intake",
            Self::SaveTrainingPlan => "Save training plan",
            Self::SaveProduct => "Save product",
            Self::AddSubstance => "Track new substance",
            Self::AddReminder => "Create reminder",
            Self::UpdateProfile => "Update profile",
            Self::UpdateEquipment => "Update equipment",
            Self::SearchProduct => "Search product",
        }
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for DirectiveKind {
    type Err = DirectiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.wire_name() == needle)
            .ok_or(DirectiveError::UnknownKind(needle))
    }
}

/// A command parsed out of generator output, not yet validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub payload: Map<String, Value>,
    /// The complete fenced block the directive was parsed from
    pub raw: String,
}

impl Directive {
    pub fn new(kind: DirectiveKind, payload: Map<String, Value>, raw: impl Into<String>) -> Self {
        Self {
            kind,
            payload,
            raw: raw.into(),
        }
    }
}
