use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use data_agent_model::ModelTool;
use serde_json::Value;

use super::{
    Error, FnHandler, Tool, ToolHandler, ToolOutcome, ToolSpec, TypedHandler,
};
use crate::display::DisplayRouter;

/// Why a [`ToolRegistry`] could not be built.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Two tools share a name.
    #[error("tool `{0}` is registered more than once")]
    DuplicateTool(String),
    /// A tool is advertised but nothing executes it.
    #[error("tool `{0}` has a spec but no handler")]
    MissingHandler(String),
    /// A handler exists for a tool the model is never told about.
    #[error("tool `{0}` has a handler but no spec")]
    MissingSpec(String),
    /// The display exclusion set names a tool that does not exist.
    #[error("cannot exclude unknown tool `{0}` from summarization")]
    UnknownExclusion(String),
}

struct Entry {
    spec: ToolSpec,
    handler: Arc<dyn ToolHandler>,
}

/// Maps tool names to their specs and handlers.
///
/// A registry is read-only once built and is meant to be shared between
/// sessions behind an [`Arc`].
pub struct ToolRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    router: DisplayRouter,
}

impl ToolRegistry {
    /// Creates a builder.
    #[inline]
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// Looks up the handler for `name`.
    ///
    /// Repeated lookups of the same name return the same handler.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ToolHandler>, Error> {
        self.index
            .get(name)
            .map(|&idx| Arc::clone(&self.entries[idx].handler))
            .ok_or_else(|| Error::unknown_tool(name))
    }

    /// Returns the spec registered for `name`.
    #[inline]
    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|&idx| &self.entries[idx].spec)
    }

    /// Returns the tool definitions advertised to the model, in
    /// registration order.
    pub fn definitions(&self) -> Vec<ModelTool> {
        self.entries
            .iter()
            .map(|entry| entry.spec.to_model_tool())
            .collect()
    }

    /// Returns the registered tool names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.spec.name.as_str())
    }

    /// Returns whether results of `name` are shown to the user rather than
    /// summarized to the model.
    #[inline]
    pub fn is_excluded(&self, name: &str) -> bool {
        self.router.is_excluded(name)
    }

    /// Returns the router for this registry's exclusion set.
    #[inline]
    pub fn display_router(&self) -> &DisplayRouter {
        &self.router
    }

    /// Returns the number of registered tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no tool is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// [`ToolRegistry`] builder.
///
/// Specs and handlers can be registered together or separately; `build`
/// checks that they pair up exactly.
#[derive(Default)]
pub struct ToolRegistryBuilder {
    specs: Vec<ToolSpec>,
    handlers: Vec<(String, Arc<dyn ToolHandler>)>,
    excluded: BTreeSet<String>,
}

impl ToolRegistryBuilder {
    /// Registers a typed tool.
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        let spec = ToolSpec::new(
            tool.name(),
            tool.description(),
            tool.parameter_schema().clone(),
        );
        let handler: Arc<dyn ToolHandler> = Arc::new(TypedHandler(tool));
        self.handlers.push((spec.name.clone(), handler));
        self.specs.push(spec);
        self
    }

    /// Registers a spec together with an untyped handler.
    pub fn register<F, Fut>(self, spec: ToolSpec, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolOutcome> + Send + 'static,
    {
        let name = spec.name.clone();
        self.with_spec(spec).with_handler(name, handler)
    }

    /// Registers a spec alone; a handler must be added under the same name.
    #[inline]
    pub fn with_spec(mut self, spec: ToolSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Registers a handler alone; a spec must be added under the same name.
    pub fn with_handler<F, Fut>(
        mut self,
        name: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolOutcome> + Send + 'static,
    {
        let handler: Arc<dyn ToolHandler> = Arc::new(FnHandler(handler));
        self.handlers.push((name.into(), handler));
        self
    }

    /// Shows artifacts from `name` to the user instead of feeding them to
    /// the model.
    #[inline]
    pub fn exclude_from_summary(mut self, name: impl Into<String>) -> Self {
        self.excluded.insert(name.into());
        self
    }

    /// Builds the registry, failing on any spec and handler mismatch.
    pub fn build(self) -> Result<ToolRegistry, RegistryError> {
        let Self {
            specs,
            handlers,
            excluded,
        } = self;

        let mut handler_map = HashMap::with_capacity(handlers.len());
        for (name, handler) in handlers {
            if handler_map.insert(name.clone(), handler).is_some() {
                return Err(RegistryError::DuplicateTool(name));
            }
        }

        let mut entries = Vec::with_capacity(specs.len());
        let mut index = HashMap::with_capacity(specs.len());
        for spec in specs {
            if index.contains_key(&spec.name) {
                return Err(RegistryError::DuplicateTool(spec.name));
            }
            let Some(handler) = handler_map.remove(&spec.name) else {
                return Err(RegistryError::MissingHandler(spec.name));
            };
            index.insert(spec.name.clone(), entries.len());
            entries.push(Entry { spec, handler });
        }

        if let Some(name) = handler_map.into_keys().min() {
            return Err(RegistryError::MissingSpec(name));
        }
        if let Some(name) = excluded.iter().find(|name| !index.contains_key(*name))
        {
            return Err(RegistryError::UnknownExclusion(name.clone()));
        }

        debug!(
            "built tool registry with {} tools ({} excluded from summary)",
            entries.len(),
            excluded.len()
        );
        Ok(ToolRegistry {
            entries,
            index,
            router: DisplayRouter::new(excluded),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::future::ready;

    use serde_json::json;

    use super::*;
    use crate::tool::{ErrorKind, ToolOutput};

    fn spec(name: &str) -> ToolSpec {
        ToolSpec::new(name, "test", json!({ "type": "object" }))
    }

    fn echo(args: Value) -> impl Future<Output = ToolOutcome> {
        ready(Ok(ToolOutput::Text(args.to_string())))
    }

    #[test]
    fn test_resolve() {
        let registry = ToolRegistry::builder()
            .register(spec("query_db"), echo)
            .register(spec("plot_chart"), echo)
            .exclude_from_summary("plot_chart")
            .build()
            .unwrap();

        let first = registry.resolve("query_db").unwrap();
        let second = registry.resolve("query_db").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let err = registry.resolve("delete_everything").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnknownTool);

        let names: Vec<_> =
            registry.definitions().into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["query_db", "plot_chart"]);
        assert!(registry.is_excluded("plot_chart"));
        assert!(!registry.is_excluded("query_db"));
    }

    #[test]
    fn test_build_fails_fast() {
        let err = ToolRegistry::builder()
            .register(spec("query_db"), echo)
            .register(spec("query_db"), echo)
            .build()
            .err();
        assert_eq!(err, Some(RegistryError::DuplicateTool("query_db".into())));

        let err = ToolRegistry::builder()
            .with_spec(spec("query_db"))
            .build()
            .err();
        assert_eq!(err, Some(RegistryError::MissingHandler("query_db".into())));

        let err = ToolRegistry::builder()
            .register(spec("query_db"), echo)
            .with_handler("plot_chart", echo)
            .build()
            .err();
        assert_eq!(err, Some(RegistryError::MissingSpec("plot_chart".into())));

        let err = ToolRegistry::builder()
            .register(spec("query_db"), echo)
            .exclude_from_summary("plot_chart")
            .build()
            .err();
        assert_eq!(
            err,
            Some(RegistryError::UnknownExclusion("plot_chart".into()))
        );
    }

    #[test]
    fn test_split_registration() {
        let registry = ToolRegistry::builder()
            .with_handler("query_db", echo)
            .with_spec(spec("query_db"))
            .build()
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.spec("query_db"), Some(&spec("query_db")));
    }
}
