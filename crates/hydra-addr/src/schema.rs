//! Address field schemas.
//!
//! A schema is an ordered list of fields that together describe how an
//! identity record is packed into an address. Fixed fields contribute a
//! constant; variable fields are filled from caller values at encode time.
//! Schemas are validated in full when loaded — a schema that fails any
//! check is never installed, not even partially.

use thiserror::Error;

/// Maximum width of a single field in bits.
pub const MAX_FIELD_BITS: u16 = 64;

/// Total width of a routable address in bits.
pub const ADDRESS_BITS: u16 = 128;

/// Errors raised while loading a schema. All of these are fatal: a process
/// cannot run without a valid address layout.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A single field wider than 64 bits
    #[error("field `{name}` is {width} bits, fields may be at most {MAX_FIELD_BITS}")]
    FieldTooWide { name: String, width: u16 },

    /// Cumulative width over 128 bits
    #[error("schema is {total} bits wide, addresses hold at most {ADDRESS_BITS}")]
    SchemaTooWide { total: u32 },

    /// Third column must be the literal keyword `fixed`
    #[error("line {line}: expected `fixed`, found `{token}`")]
    ExpectedFixed { line: usize, token: String },

    /// Width or fixed value that does not parse as a number
    #[error("line {line}: malformed literal `{token}`")]
    MalformedLiteral { line: usize, token: String },

    /// Fixed value wider than its declared field
    #[error("line {line}: fixed value {value:#x} does not fit in {width} bits")]
    FixedValueTooWide { line: usize, value: u64, width: u16 },

    /// A field line with a name but no width
    #[error("line {line}: field is missing its width")]
    MissingWidth { line: usize },

    /// An empty schema can address nothing
    #[error("schema has no fields")]
    Empty,
}

/// How a field gets its bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Constant bits, identical in every address under this schema.
    Fixed(u64),
    /// Filled from a caller-supplied value at encode time.
    Variable,
}

/// One named bit range within an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field name, used in diagnostics only.
    pub name: String,
    /// Width in bits, at most 64.
    pub width: u16,
    /// Fixed constant or caller-filled.
    pub kind: FieldKind,
}

impl Field {
    /// A fixed field carrying a constant value.
    pub fn fixed(name: &str, width: u16, value: u64) -> Self {
        Self {
            name: name.to_string(),
            width,
            kind: FieldKind::Fixed(value),
        }
    }

    /// A variable field filled at encode time.
    pub fn variable(name: &str, width: u16) -> Self {
        Self {
            name: name.to_string(),
            width,
            kind: FieldKind::Variable,
        }
    }
}

/// An ordered, validated field layout for a 128-bit address.
///
/// Construction is the only place width limits are checked; once an
/// `AddressSchema` exists it is immutable and every layout invariant holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSchema {
    fields: Vec<Field>,
    total_width: u16,
}

impl AddressSchema {
    /// Validate and install a field list.
    pub fn new(fields: Vec<Field>) -> Result<Self, ConfigError> {
        if fields.is_empty() {
            return Err(ConfigError::Empty);
        }

        let mut total: u32 = 0;
        for field in &fields {
            if field.width > MAX_FIELD_BITS {
                return Err(ConfigError::FieldTooWide {
                    name: field.name.clone(),
                    width: field.width,
                });
            }
            total += field.width as u32;
            if total > ADDRESS_BITS as u32 {
                return Err(ConfigError::SchemaTooWide { total });
            }
        }

        Ok(Self {
            fields,
            total_width: total as u16,
        })
    }

    /// Parse a schema from its textual source.
    ///
    /// One field per line: `<name> <width> [fixed <value>]`, whitespace
    /// separated, blank lines skipped. Values are decimal or `0x` hex.
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let mut fields = Vec::new();

        for (idx, raw) in source.lines().enumerate() {
            let line = idx + 1;
            let mut tokens = raw.split_whitespace();

            let name = match tokens.next() {
                Some(name) => name,
                None => continue,
            };

            let width_token = tokens.next().ok_or(ConfigError::MissingWidth { line })?;
            let width: u16 = width_token
                .parse()
                .map_err(|_| ConfigError::MalformedLiteral {
                    line,
                    token: width_token.to_string(),
                })?;

            let kind = match tokens.next() {
                None => FieldKind::Variable,
                Some(keyword) => {
                    if keyword != "fixed" {
                        return Err(ConfigError::ExpectedFixed {
                            line,
                            token: keyword.to_string(),
                        });
                    }
                    let value_token = tokens.next().ok_or(ConfigError::MalformedLiteral {
                        line,
                        token: String::new(),
                    })?;
                    let value = parse_literal(value_token).ok_or_else(|| {
                        ConfigError::MalformedLiteral {
                            line,
                            token: value_token.to_string(),
                        }
                    })?;
                    if width < MAX_FIELD_BITS && value >= (1u64 << width) {
                        return Err(ConfigError::FixedValueTooWide { line, value, width });
                    }
                    FieldKind::Fixed(value)
                }
            };

            fields.push(Field {
                name: name.to_string(),
                width,
                kind,
            });
        }

        Self::new(fields)
    }

    /// The layout every Hydra deployment ships with unless repointed:
    /// a fixed 16-bit prefix and 5-bit format version, then the role,
    /// host, process, and registration-time fields.
    pub fn canonical() -> Self {
        Self::new(vec![
            Field::fixed("prefix", 16, 0xfcff),
            Field::fixed("format_version", 5, 2),
            Field::variable("role_type", 16),
            Field::variable("role_version", 5),
            Field::variable("host_id", 32),
            Field::variable("pid", 22),
            Field::variable("timestamp", 32),
        ])
        .expect("canonical layout is within width limits")
    }

    /// Fields in declared order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Sum of all field widths in bits.
    pub fn total_width(&self) -> u16 {
        self.total_width
    }

    /// Number of variable fields, i.e. the arity `encode` expects.
    pub fn variable_count(&self) -> usize {
        self.fields
            .iter()
            .filter(|f| f.kind == FieldKind::Variable)
            .count()
    }
}

fn parse_literal(token: &str) -> Option<u64> {
    if let Some(hex) = token.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()
    } else {
        token.parse().ok()
    }
}
