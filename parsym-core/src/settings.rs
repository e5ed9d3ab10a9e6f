//! Configuration settings for the driver.

/// Driver settings.
///
/// These correspond to the options the surrounding application registers
/// for its linear-solver subsystem; parsing and registration live outside
/// this crate.
#[derive(Debug, Clone, Default)]
pub struct DriverSettings {
    /// Scale the linear system before handing it to the engine.
    /// Requires a scaling method to be configured on the driver.
    pub use_scaling: bool,

    /// Switch scaling on when a quality increase is requested and scaling
    /// is currently off. Only meaningful when a scaling method is
    /// configured.
    pub scaling_on_demand: bool,

    /// Call the engine on every process instead of only on the
    /// coordinator. Gathering is skipped and each rank hands its local
    /// shard to its own engine, which must then be aware of the
    /// distribution itself.
    pub call_on_all_procs: bool,

    /// A problem with the same sparsity structure has been solved before;
    /// the engine may reuse symbolic information across driver instances.
    pub warm_start_same_structure: bool,
}
