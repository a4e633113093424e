//! Apps and their dependency order.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// A named group of migrations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub migrations_folder: PathBuf,
    /// Apps whose migrations must run before this one's.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl AppConfig {
    pub fn new(name: impl Into<String>, migrations_folder: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            migrations_folder: migrations_folder.into(),
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(mut self, app: impl Into<String>) -> Self {
        self.depends_on.push(app.into());
        self
    }
}

/// App names with dependencies first. Independent apps come in name order.
pub fn sorted_app_names(apps: &[AppConfig]) -> Result<Vec<String>> {
    let known: BTreeSet<&str> = apps.iter().map(|a| a.name.as_str()).collect();

    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for app in apps {
        let deps: BTreeSet<&str> = app.depends_on.iter().map(String::as_str).collect();
        for dep in &deps {
            if !known.contains(dep) {
                return Err(MigrateError::Dependency(format!(
                    "app '{}' depends on unknown app '{}'",
                    app.name, dep
                )));
            }
            dependents.entry(*dep).or_default().push(app.name.as_str());
        }
        pending.insert(app.name.as_str(), deps.len());
    }

    let mut ready: BTreeSet<&str> = pending
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(apps.len());

    while let Some(name) = ready.pop_first() {
        order.push(name.to_string());
        for dependent in dependents.get(name).into_iter().flatten() {
            if let Some(n) = pending.get_mut(dependent) {
                *n -= 1;
                if *n == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if order.len() != pending.len() {
        let stuck: Vec<&str> = pending
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(name, _)| *name)
            .collect();
        return Err(MigrateError::Dependency(format!(
            "dependency cycle between {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}
