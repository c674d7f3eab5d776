//! Single-pass interpolation of flat configuration sections.

use std::ops::Deref;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{display_raw, ConfigError, ConfigResult};
use crate::expression::ExpressionRenderer;
use crate::value::{to_plain_string, Context};

/// A section whose values have each been rendered against a complete context.
///
/// Used for sections that never reference each other (params, tags, reference
/// options), so there is no retry: the first failing key aborts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterpolatedMap {
    values: Context,
}

impl InterpolatedMap {
    /// Interpolate `object` against `context`.
    ///
    /// A missing or empty section yields an empty map. A raw `null` is kept as
    /// null, while a value that renders to nothing is dropped.
    pub fn new(
        section: &str,
        object: &Value,
        context: &Context,
        renderer: &ExpressionRenderer,
    ) -> ConfigResult<Self> {
        let entries = match object {
            Value::Null => return Ok(Self::default()),
            Value::Object(entries) => entries,
            other => {
                return Err(ConfigError::InvalidSection {
                    section: section.to_string(),
                    message: format!("expected a mapping, found {}", other),
                })
            }
        };

        let mut values = Map::new();
        for (key, raw) in entries {
            if raw.is_null() {
                values.insert(key.clone(), Value::Null);
                continue;
            }

            let rendered =
                renderer
                    .render(context, raw)
                    .map_err(|e| ConfigError::InterpolatedValue {
                        key: key.clone(),
                        value: display_raw(raw),
                        message: e.to_string(),
                    })?;

            if !rendered.is_null() {
                values.insert(key.clone(), rendered);
            }
        }

        debug!("interpolated {} ({} keys)", section, values.len());
        Ok(Self { values })
    }

    /// Wrap already-resolved values.
    pub fn from_values(values: Context) -> Self {
        Self { values }
    }

    pub fn into_inner(self) -> Context {
        self.values
    }

    pub fn as_map(&self) -> &Context {
        &self.values
    }
}

impl Deref for InterpolatedMap {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.values
    }
}

/// Resource tags applied to the stack and available to templates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tags(InterpolatedMap);

impl Tags {
    pub fn new(object: &Value, context: &Context, renderer: &ExpressionRenderer) -> ConfigResult<Self> {
        InterpolatedMap::new("tags", object, context, renderer).map(Self)
    }

    pub fn from_values(values: Context) -> Self {
        Self(InterpolatedMap::from_values(values))
    }

    /// `[{Key, Value, ..extra_attributes}]`, the shape tag properties take.
    pub fn to_list(&self, extra_attributes: &Context) -> Vec<Value> {
        self.0
            .iter()
            .map(|(k, v)| {
                let mut entry = Map::new();
                entry.insert("Key".to_string(), Value::String(k.clone()));
                entry.insert("Value".to_string(), Value::String(to_plain_string(v)));
                for (ek, ev) in extra_attributes {
                    entry.insert(ek.clone(), ev.clone());
                }
                Value::Object(entry)
            })
            .collect()
    }
}

impl Deref for Tags {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.0
    }
}
