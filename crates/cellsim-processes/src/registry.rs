//! Registry of the reference processes.

use crate::degradation::Degradation;
use crate::growth::Growth;
use crate::metabolism::Metabolism;
use crate::starvation::Starvation;
use crate::transport::Transport;
use cellsim_runtime::registry::ProcessRegistry;
use std::sync::Arc;

/// A registry with every reference process registered under its kind.
pub fn default_registry() -> ProcessRegistry {
    let mut registry = ProcessRegistry::new();
    register_defaults(&mut registry);
    registry
}

/// Add the reference processes to an existing registry, for callers that
/// mix them with their own kinds.
pub fn register_defaults(registry: &mut ProcessRegistry) {
    registry.register(Metabolism::KIND, |config| Ok(Arc::new(Metabolism::from_config(config)?)));
    registry.register(Degradation::KIND, |config| Ok(Arc::new(Degradation::from_config(config)?)));
    registry.register(Transport::KIND, |config| Ok(Arc::new(Transport::from_config(config)?)));
    registry.register(Growth::KIND, |config| Ok(Arc::new(Growth::from_config(config)?)));
    registry.register(Starvation::KIND, |config| Ok(Arc::new(Starvation::from_config(config)?)));
}
