//! Batch-system adapter contract and the concrete adapters: SLURM
//! (illustrative per spec §4.5) and the local-shell default.

pub mod adapter;
pub mod local;
pub mod slurm;

pub use adapter::{AdapterRegistry, BatchAdapter, DirectiveContext};
pub use local::LocalShellHandler;
pub use slurm::SlurmAdapter;

/// Build the default registry: `background` (local shell) and `slurm`.
pub fn default_registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry.register(Box::new(LocalShellHandler));
    registry.register(Box::new(SlurmAdapter));
    registry
}
