//! Offline collaborators.
//!
//! Stand-ins for the cloud credential and stack-state services, used by the
//! CLI when no cloud account is wired in and by tests that need recorded
//! calls without a mocking framework.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context as _};
use parking_lot::RwLock;
use tracing::debug;

use crate::aws::CredentialProvider;
use crate::refs::StackStateProvider;

/// Credentials that always report the same account.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    account_id: String,
    profiles: BTreeSet<String>,
}

impl StaticCredentials {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            profiles: BTreeSet::new(),
        }
    }

    /// Restrict the named profiles that resolve; without any, every profile does.
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profiles.insert(profile.into());
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn account_id(&self, profile: Option<&str>) -> anyhow::Result<String> {
        match profile {
            Some(p) if !self.profiles.is_empty() && !self.profiles.contains(p) => {
                Err(anyhow!("The config profile ({}) could not be found", p))
            }
            _ => Ok(self.account_id.clone()),
        }
    }
}

/// Stack state held in memory: identifier -> published outputs.
#[derive(Clone, Default)]
pub struct StaticStackState {
    stacks: Arc<RwLock<BTreeMap<String, BTreeMap<String, String>>>>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl StaticStackState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a deployed stack and its outputs.
    pub fn with_stack<I, K, V>(self, identifier: impl Into<String>, outputs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.stacks.write().insert(
            identifier.into(),
            outputs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        );
        self
    }

    /// Load `{stack: {output: value}}` from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading stack state {}", path.display()))?;
        let stacks: Option<BTreeMap<String, Option<BTreeMap<String, String>>>> =
            serde_yaml::from_str(&content)
                .with_context(|| format!("parsing stack state {}", path.display()))?;

        let state = Self::new();
        for (identifier, outputs) in stacks.unwrap_or_default() {
            debug!("offline stack {} ({} outputs)", identifier, outputs.as_ref().map_or(0, |o| o.len()));
            state.stacks.write().insert(identifier, outputs.unwrap_or_default());
        }
        Ok(state)
    }

    /// Every provider call made so far, as `method(identifier)`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().clone()
    }

    fn record(&self, method: &str, identifier: &str) {
        self.calls.write().push(format!("{}({})", method, identifier));
    }
}

impl StackStateProvider for StaticStackState {
    fn stack_exists(&self, identifier: &str) -> anyhow::Result<bool> {
        self.record("stack_exists", identifier);
        Ok(self.stacks.read().contains_key(identifier))
    }

    fn stack_outputs(&self, identifier: &str) -> anyhow::Result<BTreeMap<String, String>> {
        self.record("stack_outputs", identifier);
        self.stacks
            .read()
            .get(identifier)
            .cloned()
            .ok_or_else(|| anyhow!("Stack with id {} does not exist", identifier))
    }
}
