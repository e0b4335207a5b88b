// SPDX-License-Identifier: MIT OR Apache-2.0
//! runledger-tools
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Real tool handlers used in record and live mode. There is no dynamic
//! module loading here: a "user module" is just another map of handlers
//! the embedding binary builds and passes to [`ToolRegistry::resolve`]
//! alongside the built-ins.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// A real tool implementation.
pub trait ToolHandler: Send + Sync {
    /// Invoke the tool with the given arguments.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message on failure; the case engine wraps
    /// it into the `tool_result.error` field sent back to the agent.
    fn call(&self, args: &Map<String, Value>) -> Result<Value, ToolError>;
}

/// A tool invocation failure.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ToolError(pub String);

impl From<&str> for ToolError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ToolError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

struct FnHandler<F>(F);

impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(&Map<String, Value>) -> Result<Value, ToolError> + Send + Sync,
{
    fn call(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        (self.0)(args)
    }
}

/// Returns two fixed, deterministic hits regardless of the query, so the
/// golden-path scenario suites have something stable to assert against.
fn mock_search_docs(_args: &Map<String, Value>) -> Result<Value, ToolError> {
    Ok(serde_json::json!({
        "hits": [
            {"title": "Reset password", "snippet": "Go to Settings > Security > Reset password."},
            {"title": "Account help", "snippet": "Contact support for account recovery."}
        ]
    }))
}

/// The built-in handlers every suite gets for free, keyed by tool name.
#[must_use]
pub fn builtin_handlers() -> BTreeMap<String, Arc<dyn ToolHandler>> {
    let mut map: BTreeMap<String, Arc<dyn ToolHandler>> = BTreeMap::new();
    let handler: Arc<dyn ToolHandler> = Arc::new(FnHandler(mock_search_docs));
    map.insert("mock_search_docs".to_string(), Arc::clone(&handler));
    map.insert("search_docs".to_string(), handler);
    map
}

/// Errors building or resolving a [`ToolRegistry`].
#[derive(Debug, Error)]
pub enum ToolsError {
    /// One or more allowed tool names have no registered handler in
    /// either the built-ins or the overlay.
    #[error("no handler registered for tool(s): {}", .names.join(", "))]
    MissingHandlers {
        /// The allowed names with no handler.
        names: Vec<String>,
    },
}

/// The set of real tool handlers available for record or live mode.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Resolve a registry covering every name in `allowed`, preferring
    /// `overlay` over the built-ins when a name appears in both.
    ///
    /// # Errors
    ///
    /// Returns [`ToolsError::MissingHandlers`] listing any allowed name
    /// that neither the overlay nor the built-ins can serve.
    pub fn resolve(
        allowed: &std::collections::BTreeSet<String>,
        overlay: Option<BTreeMap<String, Arc<dyn ToolHandler>>>,
    ) -> Result<Self, ToolsError> {
        let mut handlers = builtin_handlers();
        if let Some(overlay) = overlay {
            handlers.extend(overlay);
        }

        let missing: Vec<String> = allowed
            .iter()
            .filter(|name| !handlers.contains_key(*name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ToolsError::MissingHandlers { names: missing });
        }

        handlers.retain(|name, _| allowed.contains(name));
        Ok(Self { handlers })
    }

    /// Look up a handler by tool name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.handlers.get(name)
    }

    /// Invoke a tool by name.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] if no such tool is registered or the handler
    /// itself fails.
    pub fn call(&self, name: &str, args: &Map<String, Value>) -> Result<Value, ToolError> {
        match self.get(name) {
            Some(handler) => handler.call(args),
            None => Err(ToolError(format!("tool {name:?} is not registered"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn resolve_succeeds_when_builtin_covers_allowed_names() {
        let allowed: BTreeSet<String> = ["search_docs".to_string()].into_iter().collect();
        let registry = ToolRegistry::resolve(&allowed, None).unwrap();
        let result = registry.call("search_docs", &Map::new()).unwrap();
        assert!(result["hits"].is_array());
    }

    #[test]
    fn resolve_fails_listing_missing_names() {
        let allowed: BTreeSet<String> = ["nonexistent_tool".to_string()].into_iter().collect();
        let err = ToolRegistry::resolve(&allowed, None).unwrap_err();
        match err {
            ToolsError::MissingHandlers { names } => {
                assert_eq!(names, vec!["nonexistent_tool".to_string()]);
            }
        }
    }

    #[test]
    fn overlay_handler_takes_precedence_over_builtin() {
        let allowed: BTreeSet<String> = ["search_docs".to_string()].into_iter().collect();
        let mut overlay: BTreeMap<String, Arc<dyn ToolHandler>> = BTreeMap::new();
        overlay.insert(
            "search_docs".to_string(),
            Arc::new(FnHandler(|_: &Map<String, Value>| {
                Ok(serde_json::json!({"hits": []}))
            })),
        );
        let registry = ToolRegistry::resolve(&allowed, Some(overlay)).unwrap();
        let result = registry.call("search_docs", &Map::new()).unwrap();
        assert_eq!(result["hits"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn calling_unregistered_tool_fails() {
        let registry = ToolRegistry::default();
        let err = registry.call("anything", &Map::new()).unwrap_err();
        assert!(err.0.contains("not registered"));
    }
}
