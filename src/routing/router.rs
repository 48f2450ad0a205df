//! Command registry and endpoint lookup.
//!
//! # Responsibilities
//! - Store commands with their default settings
//! - Store compiled endpoints per command, rejecting equivalent templates
//! - Resolve (command, path) to a handler, extracted variables and settings
//!
//! # Precedence
//! When several templates match one path, the template whose segments become
//! literal earliest wins: segments are compared left to right and a literal
//! segment beats a variable one. Remaining ties go to the template registered
//! first.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use futures_util::future::BoxFuture;

use crate::error::{CepticError, Result};
use crate::message::{Request, Response};
use crate::routing::pattern::{normalize_path, EndpointPattern};

/// Function invoked for a routed request.
pub type EndpointHandler = Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>;

/// Wrap an async function as an [`EndpointHandler`].
pub fn handler<F, Fut>(f: F) -> EndpointHandler
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Response> + Send + 'static,
{
    Arc::new(move |request| Box::pin(f(request)))
}

/// Limits applied to requests for a command or a single endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSettings {
    /// Largest request body accepted.
    pub body_max: Option<usize>,
    /// Advisory time limit in seconds; carried but not enforced.
    pub time_max: Option<u64>,
}

impl CommandSettings {
    pub fn with_body_max(body_max: usize) -> Self {
        Self {
            body_max: Some(body_max),
            time_max: None,
        }
    }

    /// Overlay `updates` onto `self`; unset fields keep the base value.
    pub fn combine(&self, updates: &CommandSettings) -> CommandSettings {
        CommandSettings {
            body_max: updates.body_max.or(self.body_max),
            time_max: updates.time_max.or(self.time_max),
        }
    }
}

/// A registered endpoint.
#[derive(Clone)]
pub struct SavedEndpoint {
    pattern: EndpointPattern,
    handler: EndpointHandler,
    settings: CommandSettings,
}

impl SavedEndpoint {
    pub fn pattern(&self) -> &EndpointPattern {
        &self.pattern
    }

    pub fn settings(&self) -> CommandSettings {
        self.settings
    }
}

impl std::fmt::Debug for SavedEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SavedEndpoint")
            .field("template", &self.pattern.template())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Result of resolving a request path.
#[derive(Clone)]
pub struct EndpointValue {
    pub handler: EndpointHandler,
    pub values: HashMap<String, String>,
    pub settings: CommandSettings,
}

impl std::fmt::Debug for EndpointValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointValue")
            .field("values", &self.values)
            .field("settings", &self.settings)
            .finish()
    }
}

/// Endpoints registered under one command.
#[derive(Debug)]
pub struct CommandEntry {
    command: String,
    settings: CommandSettings,
    endpoints: RwLock<Vec<SavedEndpoint>>,
}

impl CommandEntry {
    fn new(command: String, settings: CommandSettings) -> Self {
        Self {
            command,
            settings,
            endpoints: RwLock::new(Vec::new()),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn settings(&self) -> CommandSettings {
        self.settings
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().map(|e| e.len()).unwrap_or(0)
    }

    fn add_endpoint(
        &self,
        template: &str,
        handler: EndpointHandler,
        settings: Option<CommandSettings>,
    ) -> Result<()> {
        let pattern = EndpointPattern::compile(template)?;
        let mut endpoints = self
            .endpoints
            .write()
            .map_err(|_| CepticError::Endpoint("endpoint table poisoned".to_string()))?;

        if endpoints.iter().any(|saved| saved.pattern.as_str() == pattern.as_str()) {
            return Err(CepticError::Endpoint(format!(
                "endpoint {:?} for command {:?} already exists",
                template, self.command
            )));
        }

        let settings = match settings {
            Some(overrides) => self.settings.combine(&overrides),
            None => self.settings,
        };
        endpoints.push(SavedEndpoint {
            pattern,
            handler,
            settings,
        });
        Ok(())
    }

    fn remove_endpoint(&self, template: &str) -> Option<SavedEndpoint> {
        let pattern = EndpointPattern::compile(template).ok()?;
        let mut endpoints = self.endpoints.write().ok()?;
        let index = endpoints
            .iter()
            .position(|saved| saved.pattern.as_str() == pattern.as_str())?;
        Some(endpoints.remove(index))
    }

    fn get_endpoint(&self, path: &str) -> Result<EndpointValue> {
        let normalized = normalize_path(path)?;
        let endpoints = self
            .endpoints
            .read()
            .map_err(|_| CepticError::Endpoint("endpoint table poisoned".to_string()))?;

        let mut best: Option<(&SavedEndpoint, Vec<(String, String)>)> = None;
        for saved in endpoints.iter() {
            let Some(values) = saved.pattern.captures(&normalized) else {
                continue;
            };
            let better = match &best {
                Some((current, _)) => saved.pattern.segments() < current.pattern.segments(),
                None => true,
            };
            if better {
                best = Some((saved, values));
            }
        }

        let (saved, values) = best.ok_or_else(|| CepticError::NotFound {
            command: self.command.clone(),
            endpoint: normalized.clone(),
        })?;
        Ok(EndpointValue {
            handler: saved.handler.clone(),
            values: values.into_iter().collect(),
            settings: saved.settings,
        })
    }
}

/// Registry of commands and their endpoints.
#[derive(Debug)]
pub struct EndpointManager {
    commands: DashMap<String, Arc<CommandEntry>>,
    default_settings: CommandSettings,
}

impl EndpointManager {
    /// Create an empty registry; commands added without settings use `body_max`.
    pub fn new(body_max: usize) -> Self {
        Self {
            commands: DashMap::new(),
            default_settings: CommandSettings::with_body_max(body_max),
        }
    }

    /// Register a command. Re-registering an existing command keeps its endpoints.
    pub fn add_command(&self, command: &str, settings: Option<CommandSettings>) {
        let settings = match settings {
            Some(overrides) => self.default_settings.combine(&overrides),
            None => self.default_settings,
        };
        self.commands
            .entry(command.to_string())
            .or_insert_with(|| Arc::new(CommandEntry::new(command.to_string(), settings)));
    }

    pub fn get_command(&self, command: &str) -> Option<Arc<CommandEntry>> {
        self.commands.get(command).map(|entry| entry.value().clone())
    }

    pub fn remove_command(&self, command: &str) -> Option<Arc<CommandEntry>> {
        self.commands.remove(command).map(|(_, entry)| entry)
    }

    pub fn add_endpoint(
        &self,
        command: &str,
        template: &str,
        handler: EndpointHandler,
        settings: Option<CommandSettings>,
    ) -> Result<()> {
        let entry = self
            .get_command(command)
            .ok_or_else(|| CepticError::Endpoint(format!("command {:?} not found", command)))?;
        entry.add_endpoint(template, handler, settings)?;
        tracing::debug!(command, template, "Endpoint registered");
        Ok(())
    }

    pub fn remove_endpoint(&self, command: &str, template: &str) -> Option<SavedEndpoint> {
        self.get_command(command)?.remove_endpoint(template)
    }

    /// Resolve a request path for `command`.
    pub fn get_endpoint(&self, command: &str, path: &str) -> Result<EndpointValue> {
        let entry = self.get_command(command).ok_or_else(|| CepticError::NotFound {
            command: command.to_string(),
            endpoint: path.to_string(),
        })?;
        entry.get_endpoint(path)
    }
}
