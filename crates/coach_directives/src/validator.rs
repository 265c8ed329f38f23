//! Schema validation of extracted directives.
//!
//! Validation runs every field rule of the directive's schema, collecting all
//! failures instead of stopping at the first one. Numeric strings are coerced,
//! absent optional fields receive their defaults, and unknown fields are
//! dropped. Derivations and refinements only run once every field passed.

use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::directive::{Directive, DirectiveKind};
use crate::error::{DirectiveError, DirectiveResult, FieldError};
use crate::normalize;
use crate::records::DirectiveData;
use crate::schema::{schema_for, FieldDefault, FieldRule, FieldType};

/// Clock used for date, time and meal type defaults.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext {
    pub now: NaiveDateTime,
}

impl ValidationContext {
    /// Context at the local wall-clock time.
    pub fn now() -> Self {
        Self {
            now: Local::now().naive_local(),
        }
    }

    pub fn at(now: NaiveDateTime) -> Self {
        Self { now }
    }

    fn today(&self) -> NaiveDate {
        self.now.date()
    }
}

impl Default for ValidationContext {
    fn default() -> Self {
        Self::now()
    }
}

/// A directive that passed its schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedDirective {
    pub kind: DirectiveKind,
    pub data: DirectiveData,
    /// Source block the directive was parsed from
    pub raw: String,
}

impl ValidatedDirective {
    /// Record as written to the kind's target table.
    pub fn to_record(&self) -> DirectiveResult<Value> {
        self.data.to_record()
    }

    pub fn is_actionable(&self) -> bool {
        self.kind.is_actionable()
    }
}

/// Validate a directive against the schema of its kind.
pub fn validate(directive: &Directive, ctx: &ValidationContext) -> DirectiveResult<ValidatedDirective> {
    let schema = schema_for(directive.kind);
    let mut errors = Vec::new();

    let mut fields = check_fields(schema.fields, &directive.payload, ctx, "", &mut errors);

    if errors.is_empty() {
        if let Some(derive) = schema.derive {
            derive(&mut fields);
        }
        if let Some(refine) = schema.refine {
            refine(&fields, &mut errors);
        }
    }

    if !errors.is_empty() {
        debug!(
            "Rejected {} directive with {} field error(s)",
            directive.kind,
            errors.len()
        );
        return Err(DirectiveError::Validation {
            kind: directive.kind.to_string(),
            errors,
        });
    }

    let data = DirectiveData::from_value(directive.kind, Value::Object(fields))?;
    Ok(ValidatedDirective {
        kind: directive.kind,
        data,
        raw: directive.raw.clone(),
    })
}

fn check_fields(
    rules: &[FieldRule],
    payload: &Map<String, Value>,
    ctx: &ValidationContext,
    prefix: &str,
    errors: &mut Vec<FieldError>,
) -> Map<String, Value> {
    let mut out = Map::new();

    for key in payload.keys() {
        if !rules.iter().any(|r| r.name == key) {
            debug!("Dropping unknown field '{}{}'", prefix, key);
        }
    }

    for rule in rules {
        let path = format!("{}{}", prefix, rule.name);
        let value = payload.get(rule.name).filter(|v| !is_blank(v));

        let Some(value) = value else {
            if let Some(default) = rule.default {
                out.insert(rule.name.to_string(), default_value(default, ctx));
            } else if rule.required {
                errors.push(FieldError::new(path, "is required"));
            }
            continue;
        };

        match coerce(rule, value, ctx, &path, errors) {
            Ok(Some(coerced)) => {
                out.insert(rule.name.to_string(), coerced);
            }
            Ok(None) => {}
            Err(message) => errors.push(FieldError::new(path, message)),
        }
    }

    out
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn default_value(default: FieldDefault, ctx: &ValidationContext) -> Value {
    match default {
        FieldDefault::Today => Value::from(ctx.today().format("%Y-%m-%d").to_string()),
        FieldDefault::CurrentTime => Value::from(ctx.now.format("%H:%M").to_string()),
        FieldDefault::MealTypeByHour => Value::from(normalize::meal_type_for_hour(ctx.now.hour())),
        FieldDefault::Text(text) => Value::from(text),
        FieldDefault::Bool(flag) => Value::from(flag),
    }
}

/// Coerce one present value. `Ok(None)` means the nested errors were already
/// pushed and the field is omitted.
fn coerce(
    rule: &FieldRule,
    value: &Value,
    ctx: &ValidationContext,
    path: &str,
    errors: &mut Vec<FieldError>,
) -> Result<Option<Value>, String> {
    let coerced = match rule.ty {
        FieldType::Text => Value::from(as_text(value).ok_or("must be text")?),
        FieldType::Number(bounds) => {
            let n = as_number(value).ok_or("must be a number")?;
            if !bounds.contains(n) {
                return Err(bounds.describe());
            }
            Value::from(n)
        }
        FieldType::Integer { min, max } => {
            let n = as_number(value).ok_or("must be a whole number")?;
            if n.fract() != 0.0 {
                return Err("must be a whole number".to_string());
            }
            let n = n as i64;
            if n < min || n > max {
                return Err(format!("must be between {} and {}", min, max));
            }
            Value::from(n)
        }
        FieldType::Enum(allowed) => {
            let text = as_text(value).ok_or("must be text")?.to_lowercase();
            let canonical = rule
                .normalizer
                .and_then(|f| f(&text))
                .or_else(|| allowed.iter().copied().find(|a| *a == text));
            match canonical {
                Some(c) if allowed.contains(&c) => Value::from(c),
                _ => return Err(format!("must be one of: {}", allowed.join(", "))),
            }
        }
        FieldType::Date => {
            let date = parse_date(value, ctx).ok_or("must be a date (YYYY-MM-DD)")?;
            Value::from(date.format("%Y-%m-%d").to_string())
        }
        FieldType::Time => {
            let time = parse_time(value).ok_or("must be a time (HH:MM)")?;
            Value::from(time.format("%H:%M").to_string())
        }
        FieldType::Bool => Value::from(as_bool(value).ok_or("must be true or false")?),
        FieldType::RepSpec => Value::from(as_rep_spec(value).ok_or("must be a number or a range such as 8-12")?),
        FieldType::TextList { min_items } => {
            let items = as_text_list(value).ok_or("must be a list of text")?;
            if items.len() < min_items {
                return Err(format!("must contain at least {} item(s)", min_items));
            }
            Value::from(items)
        }
        FieldType::ObjectList { fields, min_items } => {
            let items = value.as_array().ok_or("must be a list")?;
            if items.len() < min_items {
                return Err(format!("must contain at least {} item(s)", min_items));
            }
            let before = errors.len();
            let mut checked = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{}[{}]", path, i);
                match item.as_object() {
                    Some(obj) => {
                        let prefix = format!("{}.", item_path);
                        checked.push(Value::Object(check_fields(fields, obj, ctx, &prefix, errors)));
                    }
                    None => errors.push(FieldError::new(item_path, "must be an object")),
                }
            }
            if errors.len() > before {
                return Ok(None);
            }
            Value::Array(checked)
        }
    };
    Ok(Some(coerced))
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "ja" | "on" | "1" => Some(true),
            "false" | "no" | "nein" | "off" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    }
}

fn as_rep_spec(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => {
            let n = n.as_f64()?;
            (n > 0.0 && n.fract() == 0.0).then(|| format!("{}", n as i64))
        }
        Value::String(s) => {
            let s = s.trim();
            let valid = s.chars().any(|c| c.is_ascii_digit())
                && s.chars().all(|c| c.is_ascii_digit() || matches!(c, '-' | '–' | ' ' | 'x' | '/'));
            valid.then(|| s.to_string())
        }
        _ => None,
    }
}

fn as_text_list(value: &Value) -> Option<Vec<String>> {
    let items: Vec<String> = match value {
        Value::Array(items) => items.iter().map(as_text).collect::<Option<Vec<_>>>()?,
        Value::String(s) => s.split(',').map(|p| p.trim().to_string()).collect(),
        _ => return None,
    };
    Some(items.into_iter().filter(|s| !s.is_empty()).collect())
}

fn parse_date(value: &Value, ctx: &ValidationContext) -> Option<NaiveDate> {
    let text = value.as_str()?.trim().to_lowercase();
    match text.as_str() {
        "today" | "heute" => Some(ctx.today()),
        "yesterday" | "gestern" => Some(ctx.today() - Duration::days(1)),
        _ => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(&text, "%d.%m.%Y"))
            .ok(),
    }
}

fn parse_time(value: &Value) -> Option<NaiveTime> {
    let text = value.as_str()?.trim().to_lowercase();
    let text = text.trim_end_matches("uhr").trim();
    NaiveTime::parse_from_str(text, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
        .or_else(|_| NaiveTime::parse_from_str(text, "%H.%M"))
        .ok()
}
