//! Node configuration.

use hydra_addr::RoleDescriptor;
use hydra_directory::DirectoryConfig;
use hydra_quorum::RoundConfig;
use hydra_redundancy::RedundancyConfig;

/// Fixed port replicas receive upstream inputs on.
pub const INPUT_PORT: u16 = 50002;

/// Everything a replica node needs to run one role.
#[derive(Clone)]
pub struct NodeConfig {
    /// The role this replica serves.
    pub role: RoleDescriptor,
    /// Upstream role whose replicas feed this one's voting rounds.
    pub input_role: RoleDescriptor,
    /// Port inputs arrive on.
    pub input_port: u16,
    /// Directory client settings.
    pub directory: DirectoryConfig,
    /// Redundancy controller settings.
    pub redundancy: RedundancyConfig,
    /// Voting round window settings.
    pub round: RoundConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: RoleDescriptor::new(7, 1),
            input_role: RoleDescriptor::new(6, 1),
            input_port: INPUT_PORT,
            directory: DirectoryConfig::default(),
            redundancy: RedundancyConfig::default(),
            round: RoundConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Set the served role.
    #[must_use]
    pub fn with_role(mut self, role: RoleDescriptor) -> Self {
        self.role = role;
        self
    }

    /// Set the upstream input role.
    #[must_use]
    pub fn with_input_role(mut self, role: RoleDescriptor) -> Self {
        self.input_role = role;
        self
    }
}
