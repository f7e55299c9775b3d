//! Replica identities and their deterministic ordering.

use std::fmt;
use std::net::Ipv6Addr;

use crate::codec::CodecError;
use crate::schema::AddressSchema;

/// Identifies a class of interchangeable replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoleDescriptor {
    /// Role type number.
    pub role_type: u64,
    /// Version of the role's behavior; replicas only stand in for peers
    /// of the same version.
    pub role_version: u64,
}

impl RoleDescriptor {
    /// Create a role descriptor.
    pub const fn new(role_type: u64, role_version: u64) -> Self {
        Self {
            role_type,
            role_version,
        }
    }
}

impl fmt::Display for RoleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.role_type, self.role_version)
    }
}

/// Uniquely identifies one running replica.
///
/// An identity exists to be encoded into an address and nothing else —
/// there is no registry keyed by it. Two replicas never share an identity
/// because `(host_id, pid, registered_at)` differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReplicaIdentity {
    /// The role this replica serves.
    pub role: RoleDescriptor,
    /// Operator-assigned host number.
    pub host_id: u64,
    /// OS process id on that host.
    pub pid: u64,
    /// Registration time, centiseconds truncated to 32 bits. Only ever
    /// compared, never read back as wall-clock time.
    pub registered_at: u32,
}

impl ReplicaIdentity {
    /// The values this identity contributes to the schema's variable
    /// fields, in canonical declaration order.
    pub fn to_values(&self) -> [u64; 5] {
        [
            self.role.role_type,
            self.role.role_version,
            self.host_id,
            self.pid,
            self.registered_at as u64,
        ]
    }

    /// Pack this identity into an address under the given schema.
    pub fn encode(&self, schema: &AddressSchema) -> Result<Ipv6Addr, CodecError> {
        if schema.variable_count() != 5 {
            return Err(CodecError::SchemaShape(
                "identity layouts carry exactly 5 variable fields",
            ));
        }
        schema.encode(&self.to_values())
    }

    /// Recover an identity from an address, verifying the schema's fixed
    /// fields along the way.
    pub fn from_address(schema: &AddressSchema, addr: Ipv6Addr) -> Result<Self, CodecError> {
        if schema.variable_count() != 5 {
            return Err(CodecError::SchemaShape(
                "identity layouts carry exactly 5 variable fields",
            ));
        }
        if !schema.owns(addr) {
            return Err(CodecError::FixedMismatch);
        }

        let values = schema.variable_values(&schema.decode(addr));
        Ok(Self {
            role: RoleDescriptor::new(values[0], values[1]),
            host_id: values[2],
            pid: values[3],
            registered_at: values[4] as u32,
        })
    }

    /// The deterministic ordering key: registration time first, host and
    /// pid as tie breakers. Every replica computes the same ordering from
    /// the same directory contents, which is what lets "the lexicographic
    /// minimum acts" replace a lock service.
    pub fn rank(&self) -> (u32, u64, u64) {
        (self.registered_at, self.host_id, self.pid)
    }
}

impl fmt::Display for ReplicaIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "role {} host {} pid {} t{}",
            self.role, self.host_id, self.pid, self.registered_at
        )
    }
}
