//! Register bindings: one register (or register pair) and the channels it feeds

use crate::channel::ChannelId;
use crate::error::{BmsError, Result};
use crate::scaling::ScalingConverter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    One,
    Two,
}

impl Width {
    pub fn words(&self) -> u16 {
        match self {
            Width::One => 1,
            Width::Two => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signedness {
    Unsigned,
    Signed,
}

/// Order of the two words of a 32-bit value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordOrder {
    /// ABCD: high word at the lower address
    #[default]
    HighFirst,
    /// CDAB: low word at the lower address
    LowFirst,
}

/// Hook dispatched after the binding's task was read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateHook {
    HardwareProbe,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldMapping {
    pub target: ChannelId,
    pub converter: ScalingConverter,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Layout {
    Scalar {
        width: Width,
        signedness: Signedness,
        word_order: WordOrder,
    },
    /// Each listed bit feeds its own channel
    Bits(Vec<(u8, ChannelId)>),
}

/// One register address and the channels decoded from it
///
/// All fields of a scalar binding share the same raw read, each with its own
/// converter (e.g. pack voltage in V and in mV from one word).
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterBinding {
    address: u16,
    layout: Layout,
    fields: Vec<FieldMapping>,
    on_update: Option<UpdateHook>,
}

#[inline]
fn bit_is_set(word: u16, bit: u8) -> bool {
    bit < 16 && (word >> bit) & 1 == 1
}

impl RegisterBinding {
    fn scalar(address: u16, width: Width, signedness: Signedness) -> Self {
        Self {
            address,
            layout: Layout::Scalar {
                width,
                signedness,
                word_order: WordOrder::HighFirst,
            },
            fields: Vec::new(),
            on_update: None,
        }
    }

    pub fn unsigned(address: u16) -> Self {
        Self::scalar(address, Width::One, Signedness::Unsigned)
    }

    pub fn signed(address: u16) -> Self {
        Self::scalar(address, Width::One, Signedness::Signed)
    }

    pub fn double_word(address: u16, signedness: Signedness, word_order: WordOrder) -> Self {
        Self {
            address,
            layout: Layout::Scalar {
                width: Width::Two,
                signedness,
                word_order,
            },
            fields: Vec::new(),
            on_update: None,
        }
    }

    pub fn bits(address: u16) -> Self {
        Self {
            address,
            layout: Layout::Bits(Vec::new()),
            fields: Vec::new(),
            on_update: None,
        }
    }

    /// Add a channel fed from the raw value through `converter`
    pub fn map(mut self, target: ChannelId, converter: ScalingConverter) -> Self {
        self.fields.push(FieldMapping { target, converter });
        self
    }

    /// Add a channel fed from one bit
    pub fn bit(mut self, bit: u8, target: ChannelId) -> Self {
        if let Layout::Bits(bits) = &mut self.layout {
            bits.push((bit, target));
        }
        self
    }

    pub fn on_update(mut self, hook: UpdateHook) -> Self {
        self.on_update = Some(hook);
        self
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn fields(&self) -> &[FieldMapping] {
        &self.fields
    }

    pub fn hook(&self) -> Option<UpdateHook> {
        self.on_update
    }

    pub fn word_count(&self) -> u16 {
        match &self.layout {
            Layout::Scalar { width, .. } => width.words(),
            Layout::Bits(_) => 1,
        }
    }

    /// Last register address covered by this binding
    pub fn end_address(&self) -> u16 {
        self.address.saturating_add(self.word_count() - 1)
    }

    /// Every channel written by this binding
    pub fn targets(&self) -> Vec<ChannelId> {
        match &self.layout {
            Layout::Scalar { .. } => self.fields.iter().map(|f| f.target).collect(),
            Layout::Bits(bits) => bits.iter().map(|(_, t)| *t).collect(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match &self.layout {
            Layout::Scalar { .. } => {
                if self.fields.is_empty() {
                    return Err(BmsError::protocol(format!(
                        "Register 0x{:04X} has no target channel",
                        self.address
                    )));
                }
            },
            Layout::Bits(bits) => {
                if !self.fields.is_empty() {
                    return Err(BmsError::protocol(format!(
                        "Bit register 0x{:04X} cannot carry scaled fields",
                        self.address
                    )));
                }
                for (i, (bit, _)) in bits.iter().enumerate() {
                    if *bit > 15 {
                        return Err(BmsError::protocol(format!(
                            "Register 0x{:04X} bit {} out of range",
                            self.address, bit
                        )));
                    }
                    if bits[..i].iter().any(|(b, _)| b == bit) {
                        return Err(BmsError::protocol(format!(
                            "Register 0x{:04X} bit {} bound twice",
                            self.address, bit
                        )));
                    }
                }
            },
        }
        Ok(())
    }

    /// Raw integer from the words starting at this binding's address
    pub fn raw_value(&self, words: &[u16]) -> Option<i64> {
        match &self.layout {
            Layout::Scalar {
                width: Width::One,
                signedness,
                ..
            } => {
                let w = *words.first()?;
                Some(match signedness {
                    Signedness::Unsigned => i64::from(w),
                    Signedness::Signed => i64::from(w as i16),
                })
            },
            Layout::Scalar {
                width: Width::Two,
                signedness,
                word_order,
            } => {
                let (a, b) = (*words.first()?, *words.get(1)?);
                let (high, low) = match word_order {
                    WordOrder::HighFirst => (a, b),
                    WordOrder::LowFirst => (b, a),
                };
                let combined = (u32::from(high) << 16) | u32::from(low);
                Some(match signedness {
                    Signedness::Unsigned => i64::from(combined),
                    Signedness::Signed => i64::from(combined as i32),
                })
            },
            Layout::Bits(_) => words.first().map(|w| i64::from(*w)),
        }
    }

    /// Decode into (channel, engineering value) pairs
    pub fn decode(&self, words: &[u16]) -> Vec<(ChannelId, f64)> {
        match &self.layout {
            Layout::Scalar { .. } => match self.raw_value(words) {
                Some(raw) => self
                    .fields
                    .iter()
                    .map(|f| (f.target, f.converter.to_value(raw)))
                    .collect(),
                None => Vec::new(),
            },
            Layout::Bits(bits) => match words.first() {
                Some(word) => bits
                    .iter()
                    .map(|(bit, target)| {
                        (*target, if bit_is_set(*word, *bit) { 1.0 } else { 0.0 })
                    })
                    .collect(),
                None => Vec::new(),
            },
        }
    }

    /// Encode an engineering value into register words
    ///
    /// Uses the first field's converter; the whole word is always written.
    pub fn encode(&self, value: f64) -> Result<Vec<u16>> {
        let (width, signedness, word_order) = match &self.layout {
            Layout::Scalar {
                width,
                signedness,
                word_order,
            } => (*width, *signedness, *word_order),
            Layout::Bits(_) => {
                return Err(BmsError::protocol(format!(
                    "Register 0x{:04X} is a bit word; partial-word writes are not supported",
                    self.address
                )))
            },
        };
        let converter = self.fields.first().map(|f| f.converter).ok_or_else(|| {
            BmsError::protocol(format!(
                "Register 0x{:04X} has no converter for writing",
                self.address
            ))
        })?;
        if !value.is_finite() {
            return Err(BmsError::protocol(format!(
                "Cannot write non-finite value to register 0x{:04X}",
                self.address
            )));
        }

        let raw = converter.to_raw(value);
        let (min, max): (i64, i64) = match (width, signedness) {
            (Width::One, Signedness::Unsigned) => (0, i64::from(u16::MAX)),
            (Width::One, Signedness::Signed) => (i64::from(i16::MIN), i64::from(i16::MAX)),
            (Width::Two, Signedness::Unsigned) => (0, i64::from(u32::MAX)),
            (Width::Two, Signedness::Signed) => (i64::from(i32::MIN), i64::from(i32::MAX)),
        };
        if raw < min || raw > max {
            return Err(BmsError::OutOfRange {
                address: self.address,
                value,
                min: converter.to_value(min),
                max: converter.to_value(max),
            });
        }

        Ok(match width {
            Width::One => vec![raw as u16],
            Width::Two => {
                let bits = raw as u32;
                let (high, low) = ((bits >> 16) as u16, (bits & 0xFFFF) as u16);
                match word_order {
                    WordOrder::HighFirst => vec![high, low],
                    WordOrder::LowFirst => vec![low, high],
                }
            },
        })
    }
}
