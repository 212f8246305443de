//! Process registry - builds process instances from their kind.

use cellsim_core::error::ProcessFailure;
use cellsim_core::process::Process;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Factory turning a descriptor's opaque configuration into a process.
pub type ProcessFactory =
    Box<dyn Fn(&serde_json::Value) -> Result<Arc<dyn Process>, ProcessFailure> + Send + Sync>;

/// Maps a kind string to the factory that builds it.
#[derive(Default)]
pub struct ProcessRegistry {
    factories: BTreeMap<String, ProcessFactory>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `kind`, replacing any previous entry.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn Process>, ProcessFailure> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn Process>, ProcessFailure> + Send + Sync + 'static,
    {
        self.register(kind, factory);
        self
    }

    /// Register an already-built instance; its configuration is ignored.
    pub fn register_instance(&mut self, kind: impl Into<String>, process: Arc<dyn Process>) {
        self.register(kind, move |_| Ok(Arc::clone(&process)));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build a process. `None` if the kind is unknown.
    pub fn build(
        &self,
        kind: &str,
        config: &serde_json::Value,
    ) -> Option<Result<Arc<dyn Process>, ProcessFailure>> {
        self.factories.get(kind).map(|factory| factory(config))
    }
}

impl std::fmt::Debug for ProcessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRegistry")
            .field("kinds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
