//! Mapping of loosely phrased values onto the closed vocabularies.
//!
//! Generators write in whatever language the user writes in, so enum-like
//! fields arrive as "Frühstück", "täglich" or "every other day". Each helper
//! returns the canonical value, or `None` when nothing sensible matches and the
//! validator should report the field.

/// Canonical meal type.
pub fn meal_type(input: &str) -> Option<&'static str> {
    let value = input.trim().to_lowercase();
    let canonical = match value.as_str() {
        "breakfast" | "frühstück" | "fruehstueck" | "morning" | "morgens" => "breakfast",
        "lunch" | "mittag" | "mittagessen" | "midday" => "lunch",
        "dinner" | "abendessen" | "abendbrot" | "abends" | "supper" | "evening" => "dinner",
        "snack" | "zwischenmahlzeit" | "snacks" | "dessert" | "pre-workout" | "post-workout" => {
            "snack"
        }
        _ => return None,
    };
    Some(canonical)
}

/// Meal type implied by the hour of day (0-23).
pub fn meal_type_for_hour(hour: u32) -> &'static str {
    match hour {
        5..=10 => "breakfast",
        11..=14 => "lunch",
        17..=21 => "dinner",
        _ => "snack",
    }
}

/// Canonical dose unit.
pub fn dose_unit(input: &str) -> Option<&'static str> {
    let value = input.trim().to_lowercase();
    let canonical = match value.as_str() {
        "mg" | "milligramm" | "milligram" | "milligrams" => "mg",
        "mcg" | "µg" | "μg" | "ug" | "microgram" | "micrograms" | "mikrogramm" => "mcg",
        "g" | "gramm" | "gram" | "grams" => "g",
        "ml" | "milliliter" | "millilitre" => "ml",
        "iu" | "ie" | "i.e." | "i.u." => "iu",
        "units" | "unit" | "einheiten" | "einheit" | "u" => "units",
        "tablet" | "tablets" | "tablette" | "tabletten" | "pill" | "pills" => "tablet",
        "capsule" | "capsules" | "kapsel" | "kapseln" | "caps" => "capsule",
        _ => return None,
    };
    Some(canonical)
}

/// Canonical repeat cadence for reminders and substance schedules.
///
/// Free-text schedules are mapped onto the closest supported cadence rather
/// than rejected.
pub fn cadence(input: &str) -> Option<&'static str> {
    let value = input.trim().to_lowercase();
    if value.is_empty() {
        return None;
    }

    let exact = match value.as_str() {
        "once" | "einmalig" | "einmal" | "one-time" | "one time" | "never" => Some("once"),
        "daily" | "täglich" | "taeglich" | "every day" | "each day" | "jeden tag" => Some("daily"),
        "weekdays" | "werktags" | "weekday" | "mon-fri" | "montag bis freitag" => {
            Some("weekdays")
        }
        "weekly" | "wöchentlich" | "woechentlich" | "every week" | "jede woche" => Some("weekly"),
        "monthly" | "monatlich" | "every month" | "jeden monat" => Some("monthly"),
        _ => None,
    };
    if exact.is_some() {
        return exact;
    }

    // Closest supported cadence for looser phrasing
    if value.contains("month") || value.contains("monat") {
        Some("monthly")
    } else if value.contains("werktag") || value.contains("weekday") {
        Some("weekdays")
    } else if value.contains("week") || value.contains("woche") || value.contains("wöchentl") {
        Some("weekly")
    } else if value.contains("day")
        || value.contains("tag")
        || value.contains("täglich")
        || value.contains("morning")
        || value.contains("evening")
        || value.contains("night")
        || value.contains("x daily")
    {
        Some("daily")
    } else {
        None
    }
}

/// Canonical reminder category.
pub fn reminder_category(input: &str) -> Option<&'static str> {
    let value = input.trim().to_lowercase();
    let canonical = match value.as_str() {
        "medication" | "medikament" | "medikamente" | "medicine" | "pill" | "pills"
        | "tablette" | "tabletten" | "drug" => "medication",
        "supplement" | "supplements" | "nahrungsergänzung" | "vitamin" | "vitamins" => {
            "supplement"
        }
        "training" | "workout" | "gym" | "exercise" | "sport" => "training",
        "meal" | "food" | "essen" | "mahlzeit" | "eating" => "meal",
        "hydration" | "water" | "wasser" | "trinken" | "drink" => "hydration",
        "measurement" | "weigh-in" | "weigh in" | "wiegen" | "messen" | "blood pressure"
        | "blutdruck" => "measurement",
        "other" | "sonstiges" | "general" => "other",
        _ => return None,
    };
    Some(canonical)
}

/// Canonical category for a trackable substance.
pub fn substance_category(input: &str) -> Option<&'static str> {
    let value = input.trim().to_lowercase();
    let canonical = match value.as_str() {
        "supplement" | "supplements" | "vitamin" | "mineral" | "nahrungsergänzung"
        | "nahrungsergänzungsmittel" => "supplement",
        "medication" | "medikament" | "medicine" | "drug" | "rx" => "medication",
        "peptide" | "peptid" | "peptides" => "peptide",
        "hormone" | "hormon" | "steroid" | "steroids" | "aas" | "trt" => "hormone",
        "other" | "sonstiges" => "other",
        _ => return None,
    };
    Some(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meal_type_synonyms() {
        assert_eq!(meal_type("Frühstück"), Some("breakfast"));
        assert_eq!(meal_type("ABENDESSEN"), Some("dinner"));
        assert_eq!(meal_type("brunch"), None);
    }

    #[test]
    fn test_meal_type_hour_buckets() {
        assert_eq!(meal_type_for_hour(7), "breakfast");
        assert_eq!(meal_type_for_hour(12), "lunch");
        assert_eq!(meal_type_for_hour(16), "snack");
        assert_eq!(meal_type_for_hour(19), "dinner");
        assert_eq!(meal_type_for_hour(23), "snack");
    }

    #[test]
    fn test_cadence_maps_to_closest() {
        assert_eq!(cadence("täglich"), Some("daily"));
        assert_eq!(cadence("every other day"), Some("daily"));
        assert_eq!(cadence("twice a week"), Some("weekly"));
        assert_eq!(cadence("biweekly"), Some("weekly"));
        assert_eq!(cadence("werktags"), Some("weekdays"));
        assert_eq!(cadence("quarterly"), None);
    }

    #[test]
    fn test_reminder_category_synonyms() {
        assert_eq!(reminder_category("Tabletten"), Some("medication"));
        assert_eq!(reminder_category("gym"), Some("training"));
        assert_eq!(reminder_category("Wasser"), Some("hydration"));
    }

    #[test]
    fn test_units() {
        assert_eq!(dose_unit("µg"), Some("mcg"));
        assert_eq!(dose_unit("IE"), Some("iu"));
        assert_eq!(dose_unit("spoon"), None);
    }
}
