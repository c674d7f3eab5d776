//! Value model shared by the interpolation pipeline.
//!
//! Everything is a `serde_json::Value`: it is what Handlebars renders from and
//! what `serde` can hand to typed settings. Rendered text is turned back into
//! values by parsing it as YAML, with CloudFormation short-form tags mapped to
//! their long-form intrinsic functions.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Number, Value};
use serde_yaml::value::TaggedValue;

use crate::error::{ConfigError, ConfigResult};

/// Ordered mapping from variable name to resolved value.
pub type Context = Map<String, Value>;

/// Parse rendered text as a YAML document.
///
/// Empty or whitespace-only text yields `Value::Null`. Integers too wide for
/// 64 bits are kept as strings.
pub fn parse_document(text: &str) -> Result<Value, serde_yaml::Error> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    match serde_yaml::from_str::<serde_yaml::Value>(text) {
        Ok(yaml) => yaml_to_json(yaml),
        Err(e) => match quote_wide_integers(text) {
            Some(quoted) => serde_yaml::from_str(&quoted)
                .map_err(|_| e)
                .and_then(yaml_to_json),
            None => Err(e),
        },
    }
}

/// Quote plain integer scalars that overflow 64 bits, if there are any.
fn quote_wide_integers(text: &str) -> Option<String> {
    static LONG_INTEGER: OnceLock<Regex> = OnceLock::new();
    let long = LONG_INTEGER.get_or_init(|| {
        Regex::new(r"(?m)(^|[\s\[{,:])([-+]?[0-9]{19,})([\s\]},]|$)").expect("static pattern")
    });

    let fits = |digits: &str| {
        digits.parse::<i64>().is_ok() || digits.trim_start_matches('+').parse::<u64>().is_ok()
    };
    if long.captures_iter(text).all(|caps| fits(&caps[2])) {
        return None;
    }

    let quoted = long.replace_all(text, |caps: &Captures| {
        if fits(&caps[2]) {
            caps[0].to_string()
        } else {
            format!("{}\"{}\"{}", &caps[1], &caps[2], &caps[3])
        }
    });
    Some(quoted.into_owned())
}

/// Convert a YAML value into the JSON value model.
pub fn yaml_to_json(value: serde_yaml::Value) -> Result<Value, serde_yaml::Error> {
    use serde::de::Error as _;

    Ok(match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                Value::Number(u.into())
            } else {
                n.as_f64()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    // NaN and infinities have no JSON form
                    .unwrap_or_else(|| Value::String(n.to_string()))
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = Map::new();
            for (k, v) in mapping {
                let key = match k {
                    serde_yaml::Value::String(s) => s,
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::Null => "null".to_string(),
                    other => {
                        return Err(serde_yaml::Error::custom(format!(
                            "unsupported mapping key {:?}",
                            other
                        )))
                    }
                };
                map.insert(key, yaml_to_json(v)?);
            }
            Value::Object(map)
        }
        serde_yaml::Value::Tagged(tagged) => intrinsic(*tagged)?,
    })
}

/// Map `!Ref`, `!GetAtt` and friends to their long-form objects.
fn intrinsic(tagged: TaggedValue) -> Result<Value, serde_yaml::Error> {
    let tag = tagged.tag.to_string();
    let name = tag.trim_start_matches('!').to_string();
    let inner = yaml_to_json(tagged.value)?;

    let (key, value) = match name.as_str() {
        "Ref" | "Condition" => (name.clone(), inner),
        "GetAtt" => {
            let value = match inner {
                Value::String(s) => match s.split_once('.') {
                    Some((resource, attribute)) => {
                        Value::Array(vec![resource.into(), attribute.into()])
                    }
                    None => Value::String(s),
                },
                other => other,
            };
            ("Fn::GetAtt".to_string(), value)
        }
        _ => (format!("Fn::{}", name), inner),
    };

    let mut map = Map::new();
    map.insert(key, value);
    Ok(Value::Object(map))
}

/// Accept real booleans and the literal strings `true`/`false` (any case).
pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

/// Render a value as a plain string (strings unquoted, everything else as JSON).
pub fn to_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Snapshot of the process environment, taken once per pipeline run.
pub fn capture_environ() -> Value {
    let mut vars: Vec<(String, String)> = std::env::vars().collect();
    vars.sort();
    Value::Object(
        vars.into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect(),
    )
}

/// Add a pipeline-owned name to a resolved context; resolved names are never overwritten.
pub fn insert_resolved(context: &mut Context, key: &str, value: Value) -> ConfigResult<()> {
    if context.contains_key(key) {
        return Err(ConfigError::ReservedVariable(key.to_string()));
    }
    context.insert(key.to_string(), value);
    Ok(())
}

/// Shallow-merge `overrides` on top of `base`.
pub fn merge_over(base: &Context, overrides: &Context) -> Context {
    let mut merged = base.clone();
    for (k, v) in overrides {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_scalars() {
        assert_eq!(parse_document("true").unwrap(), json!(true));
        assert_eq!(parse_document("123").unwrap(), json!(123));
        assert_eq!(parse_document("1.5").unwrap(), json!(1.5));
        assert_eq!(parse_document("hello").unwrap(), json!("hello"));
        assert_eq!(parse_document("").unwrap(), Value::Null);
        assert_eq!(parse_document("  \n").unwrap(), Value::Null);
        assert_eq!(parse_document("~").unwrap(), Value::Null);
    }

    #[test]
    fn test_wide_integers_become_strings() {
        assert_eq!(
            parse_document("123456789012345678901234").unwrap(),
            json!("123456789012345678901234")
        );
        assert_eq!(
            parse_document("id: -123456789012345678901234\nn: 18446744073709551615\n").unwrap(),
            json!({"id": "-123456789012345678901234", "n": 18446744073709551615u64})
        );
        assert_eq!(
            parse_document("[123456789012345678901234, 1]").unwrap(),
            json!(["123456789012345678901234", 1])
        );
        assert!(parse_document("a: [unclosed").is_err());
    }

    #[test]
    fn test_parse_flow_structures() {
        assert_eq!(parse_document("[1, two]").unwrap(), json!([1, "two"]));
        assert_eq!(
            parse_document("{a: 1, b: [x]}").unwrap(),
            json!({"a": 1, "b": ["x"]})
        );
    }

    #[test]
    fn test_cloudformation_tags() {
        let doc = parse_document(
            "Bucket: !Ref MyBucket\nArn: !GetAtt MyBucket.Arn\nName: !Sub '${AWS::StackName}-x'\n",
        )
        .unwrap();

        assert_eq!(doc["Bucket"], json!({"Ref": "MyBucket"}));
        assert_eq!(doc["Arn"], json!({"Fn::GetAtt": ["MyBucket", "Arn"]}));
        assert_eq!(doc["Name"], json!({"Fn::Sub": "${AWS::StackName}-x"}));
    }

    #[test]
    fn test_numeric_keys_are_stringified() {
        let doc = parse_document("1: one\ntrue: yes").unwrap();
        assert_eq!(doc, json!({"1": "one", "true": "yes"}));
    }

    #[test]
    fn test_coerce_bool() {
        assert_eq!(coerce_bool(&json!(true)), Some(true));
        assert_eq!(coerce_bool(&json!("TRUE")), Some(true));
        assert_eq!(coerce_bool(&json!("false")), Some(false));
        assert_eq!(coerce_bool(&json!("yes")), None);
        assert_eq!(coerce_bool(&json!(1)), None);
    }

    #[test]
    fn test_insert_resolved_never_overwrites() {
        let mut ctx = Context::new();
        insert_resolved(&mut ctx, "params", json!({})).unwrap();
        let err = insert_resolved(&mut ctx, "params", json!({"a": 1})).unwrap_err();
        assert!(matches!(err, ConfigError::ReservedVariable(ref k) if k == "params"));
        assert_eq!(ctx["params"], json!({}));
    }
}
