//! Address prefixes as directory queries.
//!
//! "Every replica of role X" is "every host route whose address starts
//! with X's bits". A [`RolePrefix`] is that mask: the schema's leading
//! fixed fields plus the role fields, with everything after them zeroed.

use std::fmt;
use std::net::Ipv6Addr;

use crate::codec::CodecError;
use crate::identity::RoleDescriptor;
use crate::schema::{AddressSchema, FieldKind};

/// A bit-prefix over addresses, used to select all replicas of one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RolePrefix {
    addr: Ipv6Addr,
    len: u8,
}

impl RolePrefix {
    /// Build a prefix from an address and a bit length. Bits past `len`
    /// are cleared so equal prefixes compare equal.
    pub fn new(addr: Ipv6Addr, len: u8) -> Self {
        let len = len.min(128);
        Self {
            addr: Ipv6Addr::from(mask_bits(u128::from(addr), len)),
            len,
        }
    }

    /// The prefix base address (low bits zeroed).
    pub fn addr(&self) -> Ipv6Addr {
        self.addr
    }

    /// Prefix length in bits.
    pub fn len(&self) -> u8 {
        self.len
    }

    /// A zero-length prefix matches everything; callers treat that as a
    /// degenerate query, not a useful one.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether an address falls under this prefix.
    pub fn matches(&self, addr: Ipv6Addr) -> bool {
        mask_bits(u128::from(addr), self.len) == u128::from(self.addr)
    }
}

impl fmt::Display for RolePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

fn mask_bits(bits: u128, len: u8) -> u128 {
    if len == 0 {
        0
    } else if len >= 128 {
        bits
    } else {
        bits & !((1u128 << (128 - len as u32)) - 1)
    }
}

impl AddressSchema {
    /// The prefix covering this schema's leading fields through the first
    /// `variable_fields` variable ones, filled from `values`.
    ///
    /// Trailing variable fields encode as zero and are excluded from the
    /// prefix length, so they never constrain a match.
    pub fn prefix_through(
        &self,
        variable_fields: usize,
        values: &[u64],
    ) -> Result<RolePrefix, CodecError> {
        if values.len() != variable_fields {
            return Err(CodecError::ArityMismatch {
                expected: variable_fields,
                got: values.len(),
            });
        }
        if variable_fields > self.variable_count() {
            return Err(CodecError::SchemaShape(
                "prefix extends past the schema's variable fields",
            ));
        }

        let mut full = values.to_vec();
        full.resize(self.variable_count(), 0);
        let addr = self.encode(&full)?;

        let mut len: u32 = 0;
        let mut seen = 0usize;
        for field in self.fields() {
            if field.kind == FieldKind::Variable {
                if seen == variable_fields {
                    break;
                }
                seen += 1;
            }
            len += field.width as u32;
        }

        Ok(RolePrefix::new(addr, len as u8))
    }

    /// The directory prefix for one role: fixed header plus the two role
    /// fields.
    pub fn role_prefix(&self, role: RoleDescriptor) -> Result<RolePrefix, CodecError> {
        self.prefix_through(2, &[role.role_type, role.role_version])
    }

    /// The broader prefix matching every version of a role type.
    pub fn role_type_prefix(&self, role_type: u64) -> Result<RolePrefix, CodecError> {
        self.prefix_through(1, &[role_type])
    }
}
