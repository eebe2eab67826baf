//! Command providers for update-style plan commands.
//!
//! `k0supdate` and `airgapupdate` share discovery and signaling; they differ
//! only in the update item written into the signal.

pub mod airgapupdate;
pub mod k0supdate;
pub mod targets;

pub use airgapupdate::AirgapUpdateProvider;
pub use k0supdate::K0sUpdateProvider;
pub use targets::{TargetEngine, UpdateCommand};
