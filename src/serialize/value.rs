//! Scalar coercion between JSON documents, query text and stored values.
//!
//! Stored forms: integers and big integers as JSON numbers, decimals as text with the
//! declared scale, datetimes as `YYYY-MM-DD HH:MM:SS`, dates as `YYYY-MM-DD`.

use crate::schema::{FieldDescriptor, SemanticType, Validator};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{Number, Value};
use std::str::FromStr;

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|d| d.naive_utc()))
        .or_else(|| NaiveDate::parse_from_str(s, DATE_FORMAT).ok().and_then(|d| d.and_hms_opt(0, 0, 0)))
}

/// Decimal from a JSON number or numeric text, exact. Accepts exponent notation.
pub fn parse_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Text at the declared scale, rounding half away from zero.
fn format_decimal(mut d: Decimal, scale: Option<u32>) -> String {
    if let Some(places) = scale {
        d = d.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero);
        d.rescale(places);
    }
    d.to_string()
}

fn decimal_value(value: &Value, scale: Option<u32>) -> Result<Value, String> {
    parse_decimal(value)
        .map(|d| Value::String(format_decimal(d, scale)))
        .ok_or_else(|| "Not a valid number.".to_string())
}

fn integer_from_text(s: &str) -> Result<Value, String> {
    s.trim()
        .parse::<i64>()
        .map(Value::from)
        .map_err(|_| "Not a valid integer.".to_string())
}

/// Coerces an incoming document value to the stored form of `field`.
pub fn load_scalar(field: &FieldDescriptor, value: &Value) -> Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match field.semantic {
        SemanticType::String => match value {
            Value::String(_) => Ok(value.clone()),
            _ => Err("Not a valid string.".into()),
        },
        SemanticType::Integer | SemanticType::BigInteger => match value {
            Value::Number(n) if n.is_i64() => Ok(value.clone()),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => Ok(Value::from(f as i64)),
                _ => Err("Not a valid integer.".into()),
            },
            Value::String(s) => integer_from_text(s),
            _ => Err("Not a valid integer.".into()),
        },
        SemanticType::Decimal => decimal_value(value, field.scale),
        SemanticType::Float => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| "Not a valid number.".to_string()),
            _ => Err("Not a valid number.".into()),
        },
        SemanticType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(n) if n.as_i64() == Some(1) => Ok(Value::Bool(true)),
            Value::Number(n) if n.as_i64() == Some(0) => Ok(Value::Bool(false)),
            Value::String(s) => parse_bool(s),
            _ => Err("Not a valid boolean.".into()),
        },
        SemanticType::DateTime => value
            .as_str()
            .and_then(parse_datetime)
            .map(|d| Value::String(d.format(DATETIME_FORMAT).to_string()))
            .ok_or_else(|| "Not a valid datetime.".to_string()),
        SemanticType::Date => value
            .as_str()
            .and_then(|s| NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok())
            .map(|d| Value::String(d.format(DATE_FORMAT).to_string()))
            .ok_or_else(|| "Not a valid date.".to_string()),
        SemanticType::Uuid => value
            .as_str()
            .and_then(|s| uuid::Uuid::parse_str(s.trim()).ok())
            .map(|u| Value::String(u.to_string()))
            .ok_or_else(|| "Not a valid UUID.".to_string()),
        SemanticType::Json | SemanticType::Raw => Ok(value.clone()),
        SemanticType::Related => Err("Not a scalar field.".into()),
    }
}

fn parse_bool(s: &str) -> Result<Value, String> {
    match s.trim().to_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
        "false" | "f" | "0" | "no" | "off" => Ok(Value::Bool(false)),
        _ => Err("Not a valid boolean.".into()),
    }
}

/// Parses URL or query-string text into the stored form of `field`.
pub fn parse_text(field: &FieldDescriptor, text: &str) -> Result<Value, String> {
    match field.semantic {
        SemanticType::Json => serde_json::from_str(text).or_else(|_| Ok(Value::String(text.to_string()))),
        SemanticType::Raw => Ok(Value::String(text.to_string())),
        _ => load_scalar(field, &Value::String(text.to_string())),
    }
}

/// Stored value to its JSON output form.
pub fn dump_scalar(field: &FieldDescriptor, value: &Value) -> Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match field.semantic {
        SemanticType::BigInteger => match value {
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::String(s) => Ok(Value::String(s.clone())),
            _ => Err(format!("{}: not an integer", field.name)),
        },
        SemanticType::Decimal => decimal_value(value, field.scale).map_err(|e| format!("{}: {}", field.name, e)),
        SemanticType::DateTime => value
            .as_str()
            .and_then(parse_datetime)
            .map(|d| Value::String(d.format(DATETIME_FORMAT).to_string()))
            .ok_or_else(|| format!("{}: not a datetime", field.name)),
        SemanticType::Integer => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => integer_from_text(s).map_err(|e| format!("{}: {}", field.name, e)),
            _ => Err(format!("{}: not an integer", field.name)),
        },
        _ => Ok(value.clone()),
    }
}

/// Messages for every failing validator; `creating` enables `Required`.
pub fn check_validators(field: &FieldDescriptor, value: Option<&Value>, creating: bool) -> Vec<String> {
    let mut errors = Vec::new();
    for v in &field.validators {
        match (v, value) {
            (Validator::Required, None) if creating => {
                errors.push("Missing data for required field.".to_string())
            }
            (Validator::Length { max }, Some(Value::String(s))) if s.chars().count() > *max as usize => {
                errors.push(format!("Longer than maximum length {}.", max))
            }
            (Validator::OneOf(choices), Some(Value::String(s))) if !choices.contains(s) => {
                errors.push(format!("Must be one of: {}.", choices.join(", ")))
            }
            _ => {}
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(semantic: SemanticType) -> FieldDescriptor {
        FieldDescriptor {
            name: "f".into(),
            semantic,
            nullable: true,
            has_default: false,
            default_value: None,
            max_length: None,
            choices: None,
            scale: None,
            sql_type: "text".into(),
            validators: Vec::new(),
            relation: None,
        }
    }

    #[test]
    fn test_big_integers_dump_as_text() {
        let f = field(SemanticType::BigInteger);
        let stored = load_scalar(&f, &json!("9007199254740993")).unwrap();
        assert_eq!(stored, json!(9007199254740993i64));
        assert_eq!(dump_scalar(&f, &stored).unwrap(), json!("9007199254740993"));
    }

    #[test]
    fn test_decimal_keeps_scale() {
        let mut f = field(SemanticType::Decimal);
        f.scale = Some(2);
        assert_eq!(load_scalar(&f, &json!(0.99)).unwrap(), json!("0.99"));
        assert_eq!(load_scalar(&f, &json!("1")).unwrap(), json!("1.00"));
        assert_eq!(dump_scalar(&f, &json!("1.5")).unwrap(), json!("1.50"));
        assert!(load_scalar(&f, &json!("abc")).is_err());
        assert_eq!(load_scalar(&f, &json!("2.345")).unwrap(), json!("2.35"));
        assert_eq!(load_scalar(&f, &json!("1.5e2")).unwrap(), json!("150.00"));
    }

    #[test]
    fn test_decimal_keeps_precision() {
        let mut f = field(SemanticType::Decimal);
        f.scale = Some(2);
        let big = json!("1234567890123456.78");
        assert_eq!(load_scalar(&f, &big).unwrap(), big);
        assert_eq!(dump_scalar(&f, &big).unwrap(), big);
        assert_eq!(dump_scalar(&f, &json!("99999999999999999999.1")).unwrap(), json!("99999999999999999999.10"));
    }

    #[test]
    fn test_integer_out_of_range_rejected() {
        let f = field(SemanticType::Integer);
        assert_eq!(load_scalar(&f, &json!(1e20)).unwrap_err(), "Not a valid integer.");
        assert_eq!(load_scalar(&f, &json!(u64::MAX)).unwrap_err(), "Not a valid integer.");
        assert_eq!(load_scalar(&f, &json!(-1e19)).unwrap_err(), "Not a valid integer.");
        assert_eq!(load_scalar(&f, &json!(3.0)).unwrap(), json!(3));
    }

    #[test]
    fn test_datetime_canonical_text() {
        let f = field(SemanticType::DateTime);
        assert_eq!(
            load_scalar(&f, &json!("2021-03-04T05:06:07Z")).unwrap(),
            json!("2021-03-04 05:06:07")
        );
        assert_eq!(
            load_scalar(&f, &json!("2021-03-04 05:06:07")).unwrap(),
            json!("2021-03-04 05:06:07")
        );
        assert!(load_scalar(&f, &json!(12)).is_err());
    }

    #[test]
    fn test_parse_text_by_type() {
        assert_eq!(parse_text(&field(SemanticType::Integer), "17").unwrap(), json!(17));
        assert!(parse_text(&field(SemanticType::Integer), "abc").is_err());
        assert_eq!(parse_text(&field(SemanticType::Boolean), "true").unwrap(), json!(true));
        assert_eq!(parse_text(&field(SemanticType::String), "17").unwrap(), json!("17"));
    }

    #[test]
    fn test_validators() {
        let mut f = field(SemanticType::String);
        f.validators = vec![
            Validator::Required,
            Validator::Length { max: 3 },
            Validator::OneOf(vec!["a".into(), "abcd".into()]),
        ];
        assert_eq!(check_validators(&f, None, true).len(), 1);
        assert!(check_validators(&f, None, false).is_empty());
        assert_eq!(check_validators(&f, Some(&json!("abcd")), false), vec!["Longer than maximum length 3."]);
        assert_eq!(check_validators(&f, Some(&json!("b")), false).len(), 1);
    }
}
