//! Bit-exact packing of field values into addresses.
//!
//! Encoding walks the schema fields in declared order, most significant
//! bits first: fixed fields contribute their constant, variable fields
//! consume the low-order bits of the corresponding input value. Unused
//! trailing bits (when a schema is narrower than 128 bits) are zero.
//!
//! Decoding accepts any textual form of an address — shorthand like `::`
//! is expanded to the fully-qualified eight-group form before slicing, so
//! group boundaries always line up with the schema.

use std::net::Ipv6Addr;

use thiserror::Error;

use crate::schema::{AddressSchema, FieldKind};

/// Errors raised at encode/decode call time. Schema-shape problems are
/// caught when the schema is loaded, so these are all about the inputs of
/// one call.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Wrong number of values for the schema's variable fields
    #[error("schema has {expected} variable fields, got {got} values")]
    ArityMismatch { expected: usize, got: usize },

    /// Input string that is not an address at all
    #[error("not a valid address: `{0}`")]
    BadAddress(String),

    /// Address whose fixed fields disagree with the schema
    #[error("address does not carry this schema's fixed fields")]
    FixedMismatch,

    /// Schema does not have the field shape the caller relies on
    #[error("schema shape mismatch: {0}")]
    SchemaShape(&'static str),
}

impl AddressSchema {
    /// Pack one value per variable field into an address.
    ///
    /// Values wider than their field lose their high-order bits; the
    /// in-range portion round-trips exactly through [`decode`].
    ///
    /// [`decode`]: AddressSchema::decode
    pub fn encode(&self, values: &[u64]) -> Result<Ipv6Addr, CodecError> {
        let expected = self.variable_count();
        if values.len() != expected {
            return Err(CodecError::ArityMismatch {
                expected,
                got: values.len(),
            });
        }

        let mut bits: u128 = 0;
        let mut next = values.iter();
        for field in self.fields() {
            let value = match field.kind {
                FieldKind::Fixed(constant) => constant,
                FieldKind::Variable => *next.next().expect("arity checked above"),
            };
            bits = (bits << field.width) | (value & width_mask(field.width)) as u128;
        }

        // Left-align: the first field owns the most significant bits.
        bits <<= 128 - self.total_width() as u32;
        Ok(Ipv6Addr::from(bits))
    }

    /// Slice an address back into one value per schema field, fixed fields
    /// included, in declared order.
    pub fn decode(&self, addr: Ipv6Addr) -> Vec<u64> {
        let bits = u128::from(addr);
        let mut out = Vec::with_capacity(self.fields().len());
        let mut offset: u32 = 0;

        for field in self.fields() {
            let shift = 128 - offset - field.width as u32;
            out.push((bits >> shift) as u64 & width_mask(field.width));
            offset += field.width as u32;
        }
        out
    }

    /// Decode from a textual address, expanding any `::` shorthand first.
    pub fn decode_str(&self, text: &str) -> Result<Vec<u64>, CodecError> {
        let addr: Ipv6Addr = text
            .parse()
            .map_err(|_| CodecError::BadAddress(text.to_string()))?;
        Ok(self.decode(addr))
    }

    /// Whether an address carries this schema's fixed fields — the test
    /// for "is this one of ours" when walking a routing table.
    pub fn owns(&self, addr: Ipv6Addr) -> bool {
        let values = self.decode(addr);
        self.fields()
            .iter()
            .zip(&values)
            .all(|(field, value)| match field.kind {
                FieldKind::Fixed(constant) => constant == *value,
                FieldKind::Variable => true,
            })
    }

    /// Extract just the variable-field values from a full decode, in
    /// declared order.
    pub fn variable_values(&self, field_values: &[u64]) -> Vec<u64> {
        self.fields()
            .iter()
            .zip(field_values)
            .filter(|(field, _)| field.kind == FieldKind::Variable)
            .map(|(_, value)| *value)
            .collect()
    }
}

#[inline]
fn width_mask(width: u16) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use proptest::prelude::*;

    fn canonical() -> AddressSchema {
        AddressSchema::canonical()
    }

    #[test]
    fn encode_walks_fields_in_order() {
        let schema = canonical();
        let addr = schema.encode(&[7, 1, 3, 500, 12345]).unwrap();

        // First group is the fixed prefix verbatim.
        assert_eq!(addr.segments()[0], 0xfcff);
        // Format version 2 sits in the next 5 bits: 00010 000000...
        assert_eq!(addr.segments()[1] >> 11, 2);
    }

    #[test]
    fn decode_returns_fixed_fields_too() {
        let schema = canonical();
        let addr = schema.encode(&[7, 1, 3, 500, 12345]).unwrap();
        let values = schema.decode(addr);

        assert_eq!(values, vec![0xfcff, 2, 7, 1, 3, 500, 12345]);
    }

    #[test]
    fn decode_str_expands_zero_run_shorthand() {
        let schema = canonical();
        let addr = schema.encode(&[7, 1, 0, 0, 0]).unwrap();

        // Render with `::` compression and parse back.
        let shorthand = addr.to_string();
        assert!(shorthand.contains("::"), "expected compressed form");
        let values = schema.decode_str(&shorthand).unwrap();
        assert_eq!(schema.variable_values(&values), vec![7, 1, 0, 0, 0]);
    }

    #[test]
    fn decode_str_rejects_garbage() {
        let err = canonical().decode_str("not-an-address").unwrap_err();
        assert!(matches!(err, CodecError::BadAddress(_)));
    }

    #[test]
    fn encode_checks_arity() {
        let err = canonical().encode(&[7, 1]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::ArityMismatch {
                expected: 5,
                got: 2
            }
        ));
    }

    #[test]
    fn variable_values_consume_low_order_bits() {
        let schema = canonical();
        // pid field is 22 bits; the high bits of an oversized value drop.
        let addr = schema.encode(&[0, 0, 0, u64::MAX, 0]).unwrap();
        let values = schema.decode(addr);
        assert_eq!(values[5], (1 << 22) - 1);
    }

    #[test]
    fn owns_accepts_own_and_rejects_foreign() {
        let schema = canonical();
        let ours = schema.encode(&[7, 1, 3, 500, 12345]).unwrap();
        assert!(schema.owns(ours));
        assert!(!schema.owns("fe80::1".parse().unwrap()));
    }

    #[test]
    fn narrow_schema_zero_fills_trailing_bits() {
        let schema = AddressSchema::new(vec![
            Field::fixed("tag", 8, 0xab),
            Field::variable("id", 8),
        ])
        .unwrap();
        let addr = schema.encode(&[0xcd]).unwrap();
        assert_eq!(addr.segments()[0], 0xabcd);
        assert_eq!(u128::from(addr) & ((1u128 << 112) - 1), 0);
    }

    proptest! {
        #[test]
        fn round_trip_all_in_range_values(
            role_type in 0u64..(1 << 16),
            role_version in 0u64..(1 << 5),
            host_id in 0u64..(1 << 32),
            pid in 0u64..(1 << 22),
            timestamp in 0u64..(1 << 32),
        ) {
            let schema = canonical();
            let values = [role_type, role_version, host_id, pid, timestamp];
            let addr = schema.encode(&values).unwrap();
            let decoded = schema.variable_values(&schema.decode(addr));
            prop_assert_eq!(decoded, values.to_vec());
        }

        #[test]
        fn textual_round_trip_matches_binary(
            host_id in 0u64..(1 << 32),
            pid in 0u64..(1 << 22),
        ) {
            let schema = canonical();
            let addr = schema.encode(&[7, 1, host_id, pid, 0]).unwrap();
            let values = schema.decode_str(&addr.to_string()).unwrap();
            prop_assert_eq!(values, schema.decode(addr));
        }
    }
}
