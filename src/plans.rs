//! Plan processing.
//!
//! Each reconcile advances the active command of a plan by at most one step.

pub mod checks;
pub mod cmdprovider;
pub mod core;
pub mod reconciler;
pub mod registry;
pub mod selector;

pub use checks::{RemovedApiCheck, UpdateCheck};
pub use self::core::{PlanCommandProvider, Transition};
pub use reconciler::{PlanReconciler, Requeue};
pub use registry::ProviderRegistry;
pub use selector::{OsRandom, RandomSource};
