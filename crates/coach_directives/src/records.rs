//! Typed payloads of validated directives.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::directive::DirectiveKind;
use crate::error::{DirectiveError, DirectiveResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub meal_type: String,
    pub calories: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiber: Option<f64>,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutExercise {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sets: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reps: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories_burned: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exercises: Vec<WorkoutExercise>,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyMeasurement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_fat_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waist_cm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chest_cm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arm_cm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hip_cm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thigh_cm: Option<f64>,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloodPressureReading {
    pub systolic: u32,
    pub diastolic: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pulse: Option<u32>,
    /// Derived from systolic and diastolic
    pub category: String,
    pub date: NaiveDate,
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstanceIntake {
    pub name: String,
    pub dose: f64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    pub date: NaiveDate,
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExercise {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sets: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reps: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_sec: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl PlanExercise {
    pub fn is_endurance(&self) -> bool {
        self.sets.is_none() && self.reps.is_none() && (self.duration_min.is_some() || self.distance_km.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPlan {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_per_week: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    pub exercises: Vec<PlanExercise>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    pub calories_per_100: f64,
    pub protein_per_100: f64,
    pub carbs_per_100: f64,
    pub fat_per_100: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serving_size: Option<f64>,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedSubstance {
    pub name: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_dose: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub title: String,
    pub category: String,
    pub time: String,
    pub repeat: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_cm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentUpdate {
    pub items: Vec<String>,
    pub action: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSearch {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_g: Option<f64>,
}

/// Validated payload, one variant per directive kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum DirectiveData {
    LogMeal(MealEntry),
    LogWorkout(WorkoutEntry),
    LogBody(BodyMeasurement),
    LogBloodPressure(BloodPressureReading),
    LogSubstance(SubstanceIntake),
    SaveTrainingPlan(TrainingPlan),
    SaveProduct(ProductEntry),
    AddSubstance(TrackedSubstance),
    AddReminder(Reminder),
    UpdateProfile(ProfileUpdate),
    UpdateEquipment(EquipmentUpdate),
    SearchProduct(ProductSearch),
}

impl DirectiveData {
    /// Build the typed payload from an already validated field map.
    pub fn from_value(kind: DirectiveKind, value: Value) -> DirectiveResult<Self> {
        let typed = match kind {
            DirectiveKind::LogMeal => Self::LogMeal(decode(kind, value)?),
            DirectiveKind::LogWorkout => Self::LogWorkout(decode(kind, value)?),
            DirectiveKind::LogBody => Self::LogBody(decode(kind, value)?),
            DirectiveKind::LogBloodPressure => Self::LogBloodPressure(decode(kind, value)?),
            DirectiveKind::LogSubstance => Self::LogSubstance(decode(kind, value)?),
            DirectiveKind::SaveTrainingPlan => Self::SaveTrainingPlan(decode(kind, value)?),
            DirectiveKind::SaveProduct => Self::SaveProduct(decode(kind, value)?),
            DirectiveKind::AddSubstance => Self::AddSubstance(decode(kind, value)?),
            DirectiveKind::AddReminder => Self::AddReminder(decode(kind, value)?),
            DirectiveKind::UpdateProfile => Self::UpdateProfile(decode(kind, value)?),
            DirectiveKind::UpdateEquipment => Self::UpdateEquipment(decode(kind, value)?),
            DirectiveKind::SearchProduct => Self::SearchProduct(decode(kind, value)?),
        };
        Ok(typed)
    }

    pub fn kind(&self) -> DirectiveKind {
        match self {
            Self::LogMeal(_) => DirectiveKind::LogMeal,
            Self::LogWorkout(_) => DirectiveKind::LogWorkout,
            Self::LogBody(_) => DirectiveKind::LogBody,
            Self::LogBloodPressure(_) => DirectiveKind::LogBloodPressure,
            Self::LogSubstance(_) => DirectiveKind::LogSubstance,
            Self::SaveTrainingPlan(_) => DirectiveKind::SaveTrainingPlan,
            Self::SaveProduct(_) => DirectiveKind::SaveProduct,
            Self::AddSubstance(_) => DirectiveKind::AddSubstance,
            Self::AddReminder(_) => DirectiveKind::AddReminder,
            Self::UpdateProfile(_) => DirectiveKind::UpdateProfile,
            Self::UpdateEquipment(_) => DirectiveKind::UpdateEquipment,
            Self::SearchProduct(_) => DirectiveKind::SearchProduct,
        }
    }

    /// Flat JSON record as written to the target table.
    pub fn to_record(&self) -> DirectiveResult<Value> {
        let value = match self {
            Self::LogMeal(v) => serde_json::to_value(v)?,
            Self::LogWorkout(v) => serde_json::to_value(v)?,
            Self::LogBody(v) => serde_json::to_value(v)?,
            Self::LogBloodPressure(v) => serde_json::to_value(v)?,
            Self::LogSubstance(v) => serde_json::to_value(v)?,
            Self::SaveTrainingPlan(v) => serde_json::to_value(v)?,
            Self::SaveProduct(v) => serde_json::to_value(v)?,
            Self::AddSubstance(v) => serde_json::to_value(v)?,
            Self::AddReminder(v) => serde_json::to_value(v)?,
            Self::UpdateProfile(v) => serde_json::to_value(v)?,
            Self::UpdateEquipment(v) => serde_json::to_value(v)?,
            Self::SearchProduct(v) => serde_json::to_value(v)?,
        };
        Ok(value)
    }

    /// One-line description for confirmation prompts.
    pub fn summary(&self) -> String {
        match self {
            Self::LogMeal(m) => format!("{} ({}, {:.0} kcal)", m.name, m.meal_type, m.calories),
            Self::LogWorkout(w) => match w.duration_min {
                Some(d) => format!("{} ({:.0} min)", w.name, d),
                None => w.name.clone(),
            },
            Self::LogBody(b) => {
                let mut parts = Vec::new();
                if let Some(w) = b.weight_kg {
                    parts.push(format!("{} kg", w));
                }
                if let Some(f) = b.body_fat_pct {
                    parts.push(format!("{}% body fat", f));
                }
                if let Some(w) = b.waist_cm {
                    parts.push(format!("waist {} cm", w));
                }
                if parts.is_empty() {
                    "measurements".to_string()
                } else {
                    parts.join(", ")
                }
            }
            Self::LogBloodPressure(bp) => {
                format!("{}/{} mmHg ({})", bp.systolic, bp.diastolic, bp.category)
            }
            Self::LogSubstance(s) => format!("{} {} {}", s.name, s.dose, s.unit),
            Self::SaveTrainingPlan(p) => format!("{} ({} exercises)", p.name, p.exercises.len()),
            Self::SaveProduct(p) => format!("{} ({:.0} kcal/100{})", p.name, p.calories_per_100, p.unit),
            Self::AddSubstance(s) => format!("{} ({})", s.name, s.category),
            Self::AddReminder(r) => format!("{} at {} ({})", r.title, r.time, r.repeat),
            Self::UpdateProfile(_) => "profile fields".to_string(),
            Self::UpdateEquipment(e) => format!("{} {} ({})", e.action, e.items.join(", "), e.location),
            Self::SearchProduct(s) => s.query.clone(),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(kind: DirectiveKind, value: Value) -> DirectiveResult<T> {
    serde_json::from_value(value).map_err(|e| DirectiveError::MalformedPayload {
        kind: kind.to_string(),
        message: e.to_string(),
    })
}
