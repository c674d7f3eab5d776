//! Fixed-point resolution of interdependent variables.
//!
//! Variables may reference each other in any order. Each pass renders every
//! pending variable against the context resolved so far; whatever succeeds is
//! committed and becomes visible to the next pass. This mirrors a topological
//! sort without building the dependency graph: a chain of depth N settles in N
//! passes, while cycles and references to names that never appear stop making
//! progress and are reported together.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, error};

use crate::error::{ConfigError, ConfigResult, InterpolationError, InterpolationFailure};
use crate::expression::ExpressionRenderer;
use crate::value::Context;

/// Default bound on resolution passes.
pub const MAX_INTERPOLATION_DEPTH: usize = 10;

/// Resolves a raw variable set into a context.
pub struct VariableResolver<'a> {
    renderer: &'a ExpressionRenderer,
    max_iterations: usize,
}

impl<'a> VariableResolver<'a> {
    pub fn new(renderer: &'a ExpressionRenderer) -> Self {
        Self {
            renderer,
            max_iterations: MAX_INTERPOLATION_DEPTH,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Resolve `raw` on top of the already-resolved `base` variables.
    ///
    /// Names defined in `raw` take precedence over the same names in `base`.
    /// Either every variable resolves or nothing is returned.
    pub fn resolve(&self, base: Context, raw: Context) -> ConfigResult<Context> {
        let mut resolved: Context = base
            .into_iter()
            .filter(|(k, _)| !raw.contains_key(k))
            .collect();

        let mut pending: BTreeMap<String, Value> = raw.into_iter().collect();
        let mut errors: BTreeMap<String, InterpolationError> = BTreeMap::new();
        let mut iterations = 0;
        let mut stalled = false;

        while !pending.is_empty() && iterations < self.max_iterations {
            iterations += 1;

            let mut settled = Vec::new();
            for (key, value) in &pending {
                match self.renderer.render(&resolved, value) {
                    Ok(result) => {
                        errors.remove(key);
                        settled.push((key.clone(), result));
                    }
                    Err(e) => {
                        errors.insert(
                            key.clone(),
                            InterpolationError {
                                key: key.clone(),
                                value: value.clone(),
                                error: e.to_string(),
                            },
                        );
                    }
                }
            }

            debug!(
                "interpolation pass {}: {} resolved, {} pending",
                iterations,
                settled.len(),
                pending.len() - settled.len()
            );

            if settled.is_empty() {
                // Fixed point: another pass would see the same context.
                stalled = true;
                break;
            }

            for (key, result) in settled {
                pending.remove(&key);
                resolved.insert(key, result);
            }
        }

        if pending.is_empty() {
            return Ok(resolved);
        }

        let failure = InterpolationFailure {
            errors: pending
                .keys()
                .filter_map(|k| errors.remove(k))
                .collect(),
            iterations,
            stalled,
        };
        error!("unable to resolve vars:\n{}", failure);
        Err(ConfigError::Interpolation(failure))
    }
}
