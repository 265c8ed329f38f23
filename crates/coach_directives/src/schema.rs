//! Declarative per-directive schemas.
//!
//! A schema is a list of field rules plus two optional hooks: `derive`
//! fills computed fields once every rule passed, and `refine` checks
//! constraints that span several fields.

use serde_json::{Map, Value};

use crate::directive::DirectiveKind;
use crate::error::FieldError;
use crate::normalize;

/// Inclusive/exclusive numeric bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
    /// When set, `min` itself is rejected
    pub exclusive_min: bool,
}

impl Bounds {
    pub const fn range(min: f64, max: f64) -> Self {
        Self { min, max, exclusive_min: false }
    }

    pub const fn non_negative() -> Self {
        Self::range(0.0, f64::MAX)
    }

    pub const fn positive() -> Self {
        Self { min: 0.0, max: f64::MAX, exclusive_min: true }
    }

    pub fn contains(&self, value: f64) -> bool {
        let above = if self.exclusive_min { value > self.min } else { value >= self.min };
        above && value <= self.max
    }

    pub fn describe(&self) -> String {
        match (self.exclusive_min, self.max == f64::MAX) {
            (true, true) => format!("must be greater than {}", self.min),
            (false, true) => format!("must be at least {}", self.min),
            (true, false) => format!("must be greater than {} and at most {}", self.min, self.max),
            (false, false) => format!("must be between {} and {}", self.min, self.max),
        }
    }
}

/// Shape of a single field.
#[derive(Debug, Clone, Copy)]
pub enum FieldType {
    Text,
    Number(Bounds),
    Integer { min: i64, max: i64 },
    /// Closed vocabulary; values are lowercased before comparison
    Enum(&'static [&'static str]),
    /// `YYYY-MM-DD`; also accepts today/heute and yesterday/gestern
    Date,
    /// `HH:MM`
    Time,
    Bool,
    /// Repetition spec: a whole number or a range such as "8-12"
    RepSpec,
    TextList { min_items: usize },
    ObjectList { fields: &'static [FieldRule], min_items: usize },
}

/// Value filled in when an optional field is absent.
#[derive(Debug, Clone, Copy)]
pub enum FieldDefault {
    Today,
    CurrentTime,
    MealTypeByHour,
    Text(&'static str),
    Bool(bool),
}

/// Maps free text onto a closed vocabulary.
pub type Normalizer = fn(&str) -> Option<&'static str>;

/// Rule for one payload field.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub default: Option<FieldDefault>,
    pub normalizer: Option<Normalizer>,
}

impl FieldRule {
    pub const fn required(name: &'static str, ty: FieldType) -> Self {
        Self { name, ty, required: true, default: None, normalizer: None }
    }

    pub const fn optional(name: &'static str, ty: FieldType) -> Self {
        Self { name, ty, required: false, default: None, normalizer: None }
    }

    pub const fn with_default(self, default: FieldDefault) -> Self {
        Self { default: Some(default), ..self }
    }

    pub const fn normalized(self, normalizer: Normalizer) -> Self {
        Self { normalizer: Some(normalizer), ..self }
    }
}

/// Complete schema for one directive kind.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub kind: DirectiveKind,
    pub fields: &'static [FieldRule],
    pub derive: Option<fn(&mut Map<String, Value>)>,
    pub refine: Option<fn(&Map<String, Value>, &mut Vec<FieldError>)>,
}

pub const MEAL_TYPES: &[&str] = &["breakfast", "lunch", "dinner", "snack"];
pub const INTENSITIES: &[&str] = &["low", "medium", "high"];
pub const DOSE_UNITS: &[&str] = &["mg", "mcg", "g", "ml", "iu", "units", "tablet", "capsule"];
pub const ROUTES: &[&str] = &["oral", "injection", "topical", "inhaled", "sublingual", "other"];
pub const CADENCES: &[&str] = &["once", "daily", "weekdays", "weekly", "monthly"];
pub const REMINDER_CATEGORIES: &[&str] = &[
    "medication",
    "supplement",
    "training",
    "meal",
    "hydration",
    "measurement",
    "other",
];
pub const SUBSTANCE_CATEGORIES: &[&str] = &["supplement", "medication", "peptide", "hormone", "other"];
pub const GENDERS: &[&str] = &["male", "female", "diverse"];
pub const GOALS: &[&str] = &["lose_weight", "maintain", "build_muscle", "improve_health"];
pub const ACTIVITY_LEVELS: &[&str] = &["sedentary", "light", "moderate", "active", "very_active"];
pub const MODES: &[&str] = &["natural", "enhanced"];
pub const EQUIPMENT_ACTIONS: &[&str] = &["add", "remove", "replace"];
pub const LOCATIONS: &[&str] = &["home", "gym", "outdoor"];
pub const PRODUCT_UNITS: &[&str] = &["g", "ml"];

/// Measurement fields of a body entry; at least one must be present.
pub const BODY_MEASUREMENTS: &[&str] = &[
    "weight_kg",
    "body_fat_pct",
    "waist_cm",
    "chest_cm",
    "arm_cm",
    "hip_cm",
    "thigh_cm",
];

const MACROS: &[&str] = &["protein", "carbs", "fat"];

const WORKOUT_EXERCISE: &[FieldRule] = &[
    FieldRule::required("name", FieldType::Text),
    FieldRule::optional("sets", FieldType::Integer { min: 1, max: 100 }),
    FieldRule::optional("reps", FieldType::RepSpec),
    FieldRule::optional("weight_kg", FieldType::Number(Bounds::non_negative())),
];

const PLAN_EXERCISE: &[FieldRule] = &[
    FieldRule::required("name", FieldType::Text),
    FieldRule::optional("sets", FieldType::Integer { min: 1, max: 100 }),
    FieldRule::optional("reps", FieldType::RepSpec),
    FieldRule::optional("duration_min", FieldType::Number(Bounds::positive())),
    FieldRule::optional("distance_km", FieldType::Number(Bounds::positive())),
    FieldRule::optional("rest_sec", FieldType::Integer { min: 0, max: 3600 }),
    FieldRule::optional("day", FieldType::Text),
    FieldRule::optional("notes", FieldType::Text),
];

const MEAL: Schema = Schema {
    kind: DirectiveKind::LogMeal,
    fields: &[
        FieldRule::required("name", FieldType::Text),
        FieldRule::optional("type", FieldType::Enum(MEAL_TYPES))
            .with_default(FieldDefault::MealTypeByHour)
            .normalized(normalize::meal_type),
        FieldRule::optional("calories", FieldType::Number(Bounds::range(0.0, 10_000.0))),
        FieldRule::optional("protein", FieldType::Number(Bounds::range(0.0, 1_000.0))),
        FieldRule::optional("carbs", FieldType::Number(Bounds::range(0.0, 1_000.0))),
        FieldRule::optional("fat", FieldType::Number(Bounds::range(0.0, 1_000.0))),
        FieldRule::optional("fiber", FieldType::Number(Bounds::range(0.0, 500.0))),
        FieldRule::optional("date", FieldType::Date).with_default(FieldDefault::Today),
        FieldRule::optional("time", FieldType::Time),
        FieldRule::optional("notes", FieldType::Text),
    ],
    derive: Some(derive_meal_calories),
    refine: Some(refine_meal),
};

const WORKOUT: Schema = Schema {
    kind: DirectiveKind::LogWorkout,
    fields: &[
        FieldRule::required("name", FieldType::Text),
        FieldRule::optional(
            "duration_min",
            FieldType::Number(Bounds { min: 0.0, max: 1_440.0, exclusive_min: true }),
        ),
        FieldRule::optional("calories_burned", FieldType::Number(Bounds::non_negative())),
        FieldRule::optional("intensity", FieldType::Enum(INTENSITIES)),
        FieldRule::optional(
            "exercises",
            FieldType::ObjectList { fields: WORKOUT_EXERCISE, min_items: 0 },
        ),
        FieldRule::optional("date", FieldType::Date).with_default(FieldDefault::Today),
        FieldRule::optional("notes", FieldType::Text),
    ],
    derive: None,
    refine: None,
};

const BODY: Schema = Schema {
    kind: DirectiveKind::LogBody,
    fields: &[
        FieldRule::optional("weight_kg", FieldType::Number(Bounds::range(20.0, 400.0))),
        FieldRule::optional("body_fat_pct", FieldType::Number(Bounds::range(2.0, 70.0))),
        FieldRule::optional("waist_cm", FieldType::Number(Bounds::positive())),
        FieldRule::optional("chest_cm", FieldType::Number(Bounds::positive())),
        FieldRule::optional("arm_cm", FieldType::Number(Bounds::positive())),
        FieldRule::optional("hip_cm", FieldType::Number(Bounds::positive())),
        FieldRule::optional("thigh_cm", FieldType::Number(Bounds::positive())),
        FieldRule::optional("date", FieldType::Date).with_default(FieldDefault::Today),
        FieldRule::optional("notes", FieldType::Text),
    ],
    derive: None,
    refine: Some(refine_body),
};

const BLOOD_PRESSURE: Schema = Schema {
    kind: DirectiveKind::LogBloodPressure,
    fields: &[
        FieldRule::required("systolic", FieldType::Integer { min: 50, max: 260 }),
        FieldRule::required("diastolic", FieldType::Integer { min: 30, max: 200 }),
        FieldRule::optional("pulse", FieldType::Integer { min: 30, max: 220 }),
        FieldRule::optional("date", FieldType::Date).with_default(FieldDefault::Today),
        FieldRule::optional("time", FieldType::Time).with_default(FieldDefault::CurrentTime),
        FieldRule::optional("notes", FieldType::Text),
    ],
    derive: Some(derive_blood_pressure_category),
    refine: Some(refine_blood_pressure),
};

const SUBSTANCE_LOG: Schema = Schema {
    kind: DirectiveKind::LogSubstance,
    fields: &[
        FieldRule::required("name", FieldType::Text),
        FieldRule::required("dose", FieldType::Number(Bounds::positive())),
        FieldRule::required("unit", FieldType::Enum(DOSE_UNITS)).normalized(normalize::dose_unit),
        FieldRule::optional("route", FieldType::Enum(ROUTES)),
        FieldRule::optional("date", FieldType::Date).with_default(FieldDefault::Today),
        FieldRule::optional("time", FieldType::Time).with_default(FieldDefault::CurrentTime),
        FieldRule::optional("notes", FieldType::Text),
    ],
    derive: None,
    refine: None,
};

const TRAINING_PLAN: Schema = Schema {
    kind: DirectiveKind::SaveTrainingPlan,
    fields: &[
        FieldRule::required("name", FieldType::Text),
        FieldRule::optional("days_per_week", FieldType::Integer { min: 1, max: 7 }),
        FieldRule::optional("goal", FieldType::Text),
        FieldRule::required(
            "exercises",
            FieldType::ObjectList { fields: PLAN_EXERCISE, min_items: 1 },
        ),
        FieldRule::optional("notes", FieldType::Text),
    ],
    derive: None,
    refine: Some(refine_training_plan),
};

const PRODUCT: Schema = Schema {
    kind: DirectiveKind::SaveProduct,
    fields: &[
        FieldRule::required("name", FieldType::Text),
        FieldRule::optional("brand", FieldType::Text),
        FieldRule::required("calories_per_100", FieldType::Number(Bounds::range(0.0, 1_000.0))),
        FieldRule::optional("protein_per_100", FieldType::Number(Bounds::range(0.0, 100.0))),
        FieldRule::optional("carbs_per_100", FieldType::Number(Bounds::range(0.0, 100.0))),
        FieldRule::optional("fat_per_100", FieldType::Number(Bounds::range(0.0, 100.0))),
        FieldRule::optional("serving_size", FieldType::Number(Bounds::positive())),
        FieldRule::optional("unit", FieldType::Enum(PRODUCT_UNITS))
            .with_default(FieldDefault::Text("g")),
    ],
    derive: Some(derive_product_macros),
    refine: None,
};

const TRACKED_SUBSTANCE: Schema = Schema {
    kind: DirectiveKind::AddSubstance,
    fields: &[
        FieldRule::required("name", FieldType::Text),
        FieldRule::optional("category", FieldType::Enum(SUBSTANCE_CATEGORIES))
            .with_default(FieldDefault::Text("supplement"))
            .normalized(normalize::substance_category),
        FieldRule::optional("default_dose", FieldType::Number(Bounds::positive())),
        FieldRule::optional("unit", FieldType::Enum(DOSE_UNITS)).normalized(normalize::dose_unit),
        FieldRule::optional("frequency", FieldType::Enum(CADENCES)).normalized(normalize::cadence),
        FieldRule::optional("notes", FieldType::Text),
    ],
    derive: None,
    refine: None,
};

const REMINDER: Schema = Schema {
    kind: DirectiveKind::AddReminder,
    fields: &[
        FieldRule::required("title", FieldType::Text),
        FieldRule::optional("category", FieldType::Enum(REMINDER_CATEGORIES))
            .with_default(FieldDefault::Text("other"))
            .normalized(normalize::reminder_category),
        FieldRule::required("time", FieldType::Time),
        FieldRule::optional("repeat", FieldType::Enum(CADENCES))
            .with_default(FieldDefault::Text("daily"))
            .normalized(normalize::cadence),
        FieldRule::optional("enabled", FieldType::Bool).with_default(FieldDefault::Bool(true)),
    ],
    derive: None,
    refine: None,
};

const PROFILE: Schema = Schema {
    kind: DirectiveKind::UpdateProfile,
    fields: &[
        FieldRule::optional("name", FieldType::Text),
        FieldRule::optional("age", FieldType::Integer { min: 10, max: 120 }),
        FieldRule::optional("weight_kg", FieldType::Number(Bounds::range(20.0, 400.0))),
        FieldRule::optional("height_cm", FieldType::Number(Bounds::range(80.0, 260.0))),
        FieldRule::optional("gender", FieldType::Enum(GENDERS)),
        FieldRule::optional("goal", FieldType::Enum(GOALS)),
        FieldRule::optional("activity_level", FieldType::Enum(ACTIVITY_LEVELS)),
        FieldRule::optional("mode", FieldType::Enum(MODES)),
    ],
    derive: None,
    refine: Some(refine_profile),
};

const EQUIPMENT: Schema = Schema {
    kind: DirectiveKind::UpdateEquipment,
    fields: &[
        FieldRule::required("items", FieldType::TextList { min_items: 1 }),
        FieldRule::optional("action", FieldType::Enum(EQUIPMENT_ACTIONS))
            .with_default(FieldDefault::Text("add")),
        FieldRule::optional("location", FieldType::Enum(LOCATIONS))
            .with_default(FieldDefault::Text("gym")),
    ],
    derive: None,
    refine: None,
};

const PRODUCT_SEARCH: Schema = Schema {
    kind: DirectiveKind::SearchProduct,
    fields: &[
        FieldRule::required("query", FieldType::Text),
        FieldRule::optional("amount_g", FieldType::Number(Bounds::positive())),
    ],
    derive: None,
    refine: None,
};

/// Schema registry lookup.
pub fn schema_for(kind: DirectiveKind) -> &'static Schema {
    match kind {
        DirectiveKind::LogMeal => &MEAL,
        DirectiveKind::LogWorkout => &WORKOUT,
        DirectiveKind::LogBody => &BODY,
        DirectiveKind::LogBloodPressure => &BLOOD_PRESSURE,
        DirectiveKind::LogSubstance => &SUBSTANCE_LOG,
        DirectiveKind::SaveTrainingPlan => &TRAINING_PLAN,
        DirectiveKind::SaveProduct => &PRODUCT,
        DirectiveKind::AddSubstance => &TRACKED_SUBSTANCE,
        DirectiveKind::AddReminder => &REMINDER,
        DirectiveKind::UpdateProfile => &PROFILE,
        DirectiveKind::UpdateEquipment => &EQUIPMENT,
        DirectiveKind::SearchProduct => &PRODUCT_SEARCH,
    }
}

fn number(map: &Map<String, Value>, key: &str) -> Option<f64> {
    map.get(key).and_then(Value::as_f64)
}

fn has_value(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).is_some_and(|v| !v.is_null())
}

fn derive_meal_calories(map: &mut Map<String, Value>) {
    if has_value(map, "calories") || !MACROS.iter().any(|m| has_value(map, m)) {
        return;
    }
    let protein = number(map, "protein").unwrap_or(0.0);
    let carbs = number(map, "carbs").unwrap_or(0.0);
    let fat = number(map, "fat").unwrap_or(0.0);
    let calories = (protein * 4.0 + carbs * 4.0 + fat * 9.0).round();
    map.insert("calories".to_string(), Value::from(calories));
}

fn refine_meal(map: &Map<String, Value>, errors: &mut Vec<FieldError>) {
    if !has_value(map, "calories") {
        errors.push(FieldError::new(
            "calories",
            "provide calories or at least one macro (protein, carbs, fat)",
        ));
    }
}

fn refine_body(map: &Map<String, Value>, errors: &mut Vec<FieldError>) {
    if !BODY_MEASUREMENTS.iter().any(|m| has_value(map, m)) {
        errors.push(FieldError::new(
            "measurements",
            format!("at least one of {} is required", BODY_MEASUREMENTS.join(", ")),
        ));
    }
}

fn refine_blood_pressure(map: &Map<String, Value>, errors: &mut Vec<FieldError>) {
    if let (Some(sys), Some(dia)) = (number(map, "systolic"), number(map, "diastolic")) {
        if sys <= dia {
            errors.push(FieldError::new(
                "systolic",
                "must be greater than diastolic",
            ));
        }
    }
}

/// Category per the ACC/AHA blood pressure guideline.
pub fn blood_pressure_category(systolic: i64, diastolic: i64) -> &'static str {
    if systolic > 180 || diastolic > 120 {
        "crisis"
    } else if systolic >= 140 || diastolic >= 90 {
        "high_stage_2"
    } else if systolic >= 130 || diastolic >= 80 {
        "high_stage_1"
    } else if systolic >= 120 {
        "elevated"
    } else {
        "normal"
    }
}

fn derive_blood_pressure_category(map: &mut Map<String, Value>) {
    let sys = map.get("systolic").and_then(Value::as_i64);
    let dia = map.get("diastolic").and_then(Value::as_i64);
    if let (Some(sys), Some(dia)) = (sys, dia) {
        map.insert(
            "category".to_string(),
            Value::from(blood_pressure_category(sys, dia)),
        );
    }
}

fn refine_training_plan(map: &Map<String, Value>, errors: &mut Vec<FieldError>) {
    let Some(exercises) = map.get("exercises").and_then(Value::as_array) else {
        return;
    };
    for (i, exercise) in exercises.iter().enumerate() {
        let Some(ex) = exercise.as_object() else { continue };
        let strength = has_value(ex, "sets") || has_value(ex, "reps");
        let endurance = has_value(ex, "duration_min") || has_value(ex, "distance_km");
        if !strength && !endurance {
            errors.push(FieldError::new(
                format!("exercises[{}]", i),
                "needs sets or reps, or a duration or distance",
            ));
        }
    }
}

fn derive_product_macros(map: &mut Map<String, Value>) {
    for key in ["protein_per_100", "carbs_per_100", "fat_per_100"] {
        if !has_value(map, key) {
            map.insert(key.to_string(), Value::from(0.0));
        }
    }
}

fn refine_profile(map: &Map<String, Value>, errors: &mut Vec<FieldError>) {
    if !PROFILE.fields.iter().any(|f| has_value(map, f.name)) {
        errors.push(FieldError::new("profile", "at least one field must be updated"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_schema() {
        for kind in DirectiveKind::ALL {
            assert_eq!(schema_for(kind).kind, kind);
        }
    }

    #[test]
    fn test_bounds() {
        assert!(Bounds::positive().contains(0.1));
        assert!(!Bounds::positive().contains(0.0));
        assert!(Bounds::non_negative().contains(0.0));
        assert!(!Bounds::range(1.0, 7.0).contains(8.0));
    }

    #[test]
    fn test_blood_pressure_category() {
        assert_eq!(blood_pressure_category(115, 75), "normal");
        assert_eq!(blood_pressure_category(125, 78), "elevated");
        assert_eq!(blood_pressure_category(132, 82), "high_stage_1");
        assert_eq!(blood_pressure_category(150, 95), "high_stage_2");
        assert_eq!(blood_pressure_category(190, 110), "crisis");
    }
}
