//! Hydra Address Codec
//!
//! Replicas in a Hydra fleet have no side database: the only channel that
//! carries a replica's structured identity is its routable address. This
//! crate converts between the two — a schema-described identity record is
//! packed bit-for-bit into a 128-bit address, and any address found in the
//! routing table can be sliced back into its fields.
//!
//! # Schema-driven
//!
//! The field layout is not compiled in. A schema (ordered list of named,
//! bit-width-tagged fields, fixed or variable) is loaded once at startup
//! and immutable afterwards, so the same binary can be repointed at a
//! different layout without rebuilding. Width limits (64 bits per field,
//! 128 bits total) are enforced at load time, never per call.
//!
//! # Prefixes as queries
//!
//! Because the fixed header and the role fields sit at the front of the
//! layout, "every replica of role X" is exactly "every host route under
//! X's address prefix". [`RolePrefix`] captures that mask.

mod codec;
mod identity;
mod prefix;
mod schema;

pub use codec::CodecError;
pub use identity::{ReplicaIdentity, RoleDescriptor};
pub use prefix::RolePrefix;
pub use schema::{AddressSchema, ConfigError, Field, FieldKind, ADDRESS_BITS, MAX_FIELD_BITS};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_schema_round_trips_identity() {
        let schema = AddressSchema::canonical();
        let identity = ReplicaIdentity {
            role: RoleDescriptor::new(7, 1),
            host_id: 3,
            pid: 500,
            registered_at: 12345,
        };

        let addr = identity.encode(&schema).unwrap();
        let back = ReplicaIdentity::from_address(&schema, addr).unwrap();
        assert_eq!(identity, back);
    }
}
