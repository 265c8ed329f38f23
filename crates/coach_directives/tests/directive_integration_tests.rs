//! Integration tests for extraction followed by validation.

use chrono::NaiveDate;

use coach_directives::{
    validate, DirectiveData, DirectiveExtractor, DirectiveKind, ValidationContext,
};

fn evening() -> ValidationContext {
    let now = NaiveDate::from_ymd_opt(2024, 5, 2)
        .unwrap()
        .and_hms_opt(19, 15, 0)
        .unwrap();
    ValidationContext::at(now)
}

fn fenced(kind: &str, payload: &str) -> String {
    format!("Alles klar.\n\n```action:{}\n{}\n```\n\nSag Bescheid!", kind, payload)
}

/// Test the meal reply flow end to end.
#[test]
fn test_skyr_meal_reply_yields_one_actionable_directive() {
    let reply = fenced(
        "log_meal",
        r#"{"name":"500g Skyr mit 2 Orangen","type":"snack","calories":430,"protein":52,"carbs":58,"fat":2}"#,
    );

    let directives = DirectiveExtractor::extract_all(&reply);
    assert_eq!(directives.len(), 1);

    let validated = validate(&directives[0], &evening()).unwrap();
    assert!(validated.is_actionable());
    assert_eq!(validated.kind.target_table(), Some("meal_logs"));

    let DirectiveData::LogMeal(meal) = &validated.data else {
        panic!("expected a meal entry, got {:?}", validated.data);
    };
    assert_eq!(meal.name, "500g Skyr mit 2 Orangen");
    // Explicit type wins over the hour-based default
    assert_eq!(meal.meal_type, "snack");
    assert_eq!(meal.calories, 430.0);
    assert_eq!(meal.protein, Some(52.0));
    assert_eq!(meal.carbs, Some(58.0));
    assert_eq!(meal.fat, Some(2.0));
    assert_eq!(meal.fiber, None);
    assert_eq!(meal.date, NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());

    let record = validated.to_record().unwrap();
    let mut keys: Vec<_> = record.as_object().unwrap().keys().cloned().collect();
    keys.sort();
    assert_eq!(
        keys,
        vec!["calories", "carbs", "date", "fat", "name", "protein", "type"]
    );

    assert_eq!(
        DirectiveExtractor::strip(&reply),
        "Alles klar.\n\nSag Bescheid!"
    );
}

/// Test the strength/endurance refinement on plan exercises.
#[test]
fn test_training_plan_exercise_pairs() {
    let neither = fenced(
        "save_training_plan",
        r#"{"name":"Ganzkörper","exercises":[{"name":"Kniebeugen"}]}"#,
    );
    let directive = DirectiveExtractor::extract_first(&neither).unwrap();
    let err = validate(&directive, &evening()).unwrap_err();
    assert_eq!(err.field_errors()[0].field, "exercises[0]");

    let only_sets = fenced(
        "save_training_plan",
        r#"{"name":"Ganzkörper","exercises":[{"name":"Kniebeugen","sets":4}]}"#,
    );
    let directive = DirectiveExtractor::extract_first(&only_sets).unwrap();
    assert!(validate(&directive, &evening()).is_ok());

    let only_reps = fenced(
        "save_training_plan",
        r#"{"name":"Ganzkörper","exercises":[{"name":"Liegestütze","reps":"15-20"}]}"#,
    );
    let directive = DirectiveExtractor::extract_first(&only_reps).unwrap();
    let validated = validate(&directive, &evening()).unwrap();
    let DirectiveData::SaveTrainingPlan(plan) = validated.data else {
        panic!("expected a training plan");
    };
    assert!(!plan.exercises[0].is_endurance());

    let both_kinds = fenced(
        "save_training_plan",
        r#"{"name":"Hybrid","days_per_week":3,"exercises":[
            {"name":"Kniebeugen","sets":4,"reps":"8-12"},
            {"name":"Laufen","duration_min":30},
            {"name":"Rudern","distance_km":"2,5"}
        ]}"#,
    );
    let directive = DirectiveExtractor::extract_first(&both_kinds).unwrap();
    let validated = validate(&directive, &evening()).unwrap();
    let DirectiveData::SaveTrainingPlan(plan) = validated.data else {
        panic!("expected a training plan");
    };
    assert_eq!(plan.exercises.len(), 3);
    assert_eq!(plan.exercises[0].reps.as_deref(), Some("8-12"));
    assert!(!plan.exercises[0].is_endurance());
    assert!(plan.exercises[1].is_endurance());
    assert_eq!(plan.exercises[2].distance_km, Some(2.5));
}

/// Test the at-least-one-measurement refinement.
#[test]
fn test_body_measurement_needs_one_value() {
    let empty = fenced("log_body", r#"{"notes":"nach dem Training"}"#);
    let directive = DirectiveExtractor::extract_first(&empty).unwrap();
    let err = validate(&directive, &evening()).unwrap_err();
    assert_eq!(err.field_errors().len(), 1);
    assert_eq!(err.field_errors()[0].field, "measurements");

    let waist = fenced("log_body", r#"{"waist_cm":"84"}"#);
    let directive = DirectiveExtractor::extract_first(&waist).unwrap();
    let validated = validate(&directive, &evening()).unwrap();
    let DirectiveData::LogBody(body) = validated.data else {
        panic!("expected a body measurement");
    };
    assert_eq!(body.waist_cm, Some(84.0));
    assert_eq!(body.weight_kg, None);
}

/// Test reminder defaults and loose cadence phrasing.
#[test]
fn test_reminder_normalization() {
    let reply = fenced(
        "add_reminder",
        r#"{"title":"Magnesium nehmen","category":"Vitamine","time":"21:30","repeat":"jeden Abend"}"#,
    );
    let directive = DirectiveExtractor::extract_first(&reply).unwrap();
    let err = validate(&directive, &evening()).unwrap_err();
    // "Vitamine" is not a known synonym
    assert_eq!(err.field_errors()[0].field, "category");

    let reply = fenced(
        "add_reminder",
        r#"{"title":"Magnesium nehmen","category":"supplements","time":"21:30","repeat":"every other day"}"#,
    );
    let directive = DirectiveExtractor::extract_first(&reply).unwrap();
    let validated = validate(&directive, &evening()).unwrap();
    let DirectiveData::AddReminder(reminder) = validated.data else {
        panic!("expected a reminder");
    };
    assert_eq!(reminder.category, "supplement");
    assert_eq!(reminder.repeat, "daily");
    assert!(reminder.enabled);

    let reply = fenced("add_reminder", r#"{"title":"Wiegen","time":"7:05"}"#);
    let directive = DirectiveExtractor::extract_first(&reply).unwrap();
    let record = validate(&directive, &evening()).unwrap().to_record().unwrap();
    assert_eq!(record["time"], "07:05");
    assert_eq!(record["repeat"], "daily");
    assert_eq!(record["category"], "other");
}

/// Test that a search directive validates but never becomes an action.
#[test]
fn test_search_directive_is_not_actionable() {
    let reply = fenced("search_product", r#"{"query":"Kölln Hafermüsli Früchte","amount_g":60}"#);
    let directive = DirectiveExtractor::extract_first(&reply).unwrap();
    assert_eq!(directive.kind, DirectiveKind::SearchProduct);

    let validated = validate(&directive, &evening()).unwrap();
    assert!(!validated.is_actionable());
}

/// Test that a reply with several blocks yields each one independently.
#[test]
fn test_mixed_reply_validates_each_block() {
    let reply = "Eingetragen:\n```action:log_body\n{\"weight_kg\": 82.1}\n```\n```action:log_substance\n{\"name\":\"Kreatin\",\"dose\":5,\"unit\":\"gramm\"}\n```\n```action:log_meal\n{\"name\":\"Nichts\"}\n```";
    let ctx = evening();
    let results: Vec<_> = DirectiveExtractor::extract_all(reply)
        .iter()
        .map(|d| validate(d, &ctx))
        .collect();

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert!(results[2].is_err());
    assert_eq!(DirectiveExtractor::strip_all(reply), "Eingetragen:");
}
