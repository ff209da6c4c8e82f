//! Platform glue: routing table, node-id self-identification, and the
//! trusted-subnet configuration vector (spec.md §2 component 8, §6.2–§6.3).
//!
//! The session engine never invents this data; it is supplied once at
//! `init()` time by whatever owns provisioning on the real platform (OTP,
//! an address-translation unit, a build-time config table). This crate only
//! consumes it.

use crate::subnet::TrustedSubnetConfig;

/// Platform-provided identity and subnet configuration.
pub trait Platform: Send + Sync {
    /// This node's own id.
    fn my_node_id(&self) -> u8;

    /// The configured trusted subnets, consumed once at `init()` and handed
    /// to the engine's [`crate::subnet::SubnetTable`].
    fn trusted_subnets(&self) -> Vec<TrustedSubnetConfig>;
}

/// A fixed, in-memory [`Platform`] for tests and the simulation harness.
pub struct StaticPlatform {
    my_node_id: u8,
    subnets: Vec<TrustedSubnetConfig>,
}

impl StaticPlatform {
    /// Build a platform identity from a fixed node id and subnet vector.
    #[must_use]
    pub const fn new(my_node_id: u8, subnets: Vec<TrustedSubnetConfig>) -> Self {
        Self { my_node_id, subnets }
    }
}

impl Platform for StaticPlatform {
    fn my_node_id(&self) -> u8 {
        self.my_node_id
    }

    fn trusted_subnets(&self) -> Vec<TrustedSubnetConfig> {
        self.subnets.clone()
    }
}
