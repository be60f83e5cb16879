//! Data model for OHCI 1.1 isochronous transmit DMA descriptors.
//!
//! A hardware descriptor is a fixed 16-byte record (32 bytes for the
//! immediate-keyed variants, which carry the CIP header inline in their
//! second 16-byte block). The controller walks chains of these records
//! autonomously, so their layout is a binary contract: see [`codec`] for the
//! byte-exact encoding.

use num_enum::{IntoPrimitive, TryFromPrimitive};

pub(crate) mod codec;

pub use codec::{ControlWord, DescriptorKind, EncodeError};

/// Bytes per descriptor block unit. Addresses and Z values are expressed in
/// multiples of this.
pub const BLOCK_SIZE: usize = 16;

/// 4-bit descriptor command, bits [15:12] of the control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Command {
    OutputMore = 0x0,
    OutputLast = 0x1,
    StoreValue = 0x8,
}

/// 3-bit descriptor key, bits [10:8] of the control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum DescriptorKey {
    Standard = 0x0,
    Immediate = 0x2,
    Store = 0x6,
}

/// 2-bit interrupt control, bits [5:4] of the control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum IrqControl {
    Never = 0x0,
    Always = 0x3,
}

/// 2-bit branch control, bits [3:2] of the control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum BranchControl {
    Never = 0x0,
    Always = 0x3,
}

/// 2-bit wait control, bits [1:0] of the control word. IT contexts never
/// wait, so only the zero encoding is meaningful here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum WaitControl {
    Never = 0x0,
}

/// A branch or skip target: a 16-byte-aligned address with the target
/// block's Z value packed into the low nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BranchPointer {
    pub address: u32,
    pub z: u8,
}

impl BranchPointer {
    /// The unlinked pointer. Hardware treats an all-zero word as "no branch".
    pub const NULL: Self = Self { address: 0, z: 0 };

    pub const fn new(address: u32, z: u8) -> Self {
        Self { address, z }
    }

    pub const fn is_null(self) -> bool {
        self.address == 0 && self.z == 0
    }

    /// Packs the pointer into its hardware word: `(addr & !0xF) | z`.
    ///
    /// Fails rather than silently dropping bits: `MisalignedAddress` when the
    /// address has low bits set, `FieldOverflow` when Z does not fit its
    /// nibble.
    pub fn pack(self) -> Result<u32, EncodeError> {
        if self.address % BLOCK_SIZE as u32 != 0 {
            return Err(EncodeError::MisalignedAddress(self.address));
        }
        if self.z > 0xF {
            return Err(EncodeError::FieldOverflow(self.z as u64));
        }
        Ok(self.address | self.z as u32)
    }

    /// Splits a hardware pointer word back into address and Z. Total: any
    /// word is a valid pointer; disagreement between the nibble and the
    /// target block's true Z is flagged by the validator, not here.
    pub const fn unpack(word: u32) -> Self {
        Self {
            address: word & 0xFFFF_FFF0,
            z: (word & 0xF) as u8,
        }
    }
}

/// The two CIP header quadlets (IEC 61883-1), already encoded by the caller.
///
/// Opaque to this crate: they are embedded big-endian into immediate
/// descriptors and never decoded. The [`crate::cip`] module can produce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipHeader {
    pub q0: u32,
    pub q1: u32,
}

impl CipHeader {
    pub const fn new(q0: u32, q1: u32) -> Self {
        Self { q0, q1 }
    }
}

/// One IT DMA descriptor.
///
/// Closed sum type: hardware defines exactly these variants, and encoding
/// requires exhaustive matching. Request counts are carried as `u32` so that
/// an oversized value is caught at encode time (`FieldOverflow`) instead of
/// being truncated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    /// Writes a 16-bit value to host memory for status polling. Must be the
    /// first descriptor of its block.
    StoreValue {
        value: u16,
        store_address: u32,
        skip: BranchPointer,
        irq: bool,
    },
    /// Intermediate scatter-gather fragment. The branch field is not
    /// interpreted by hardware.
    OutputMore { req_count: u32, data_address: u32 },
    /// Carries the CIP header quadlets inline; 32 bytes. The pointer in its
    /// header is the skip target taken on a lost cycle.
    OutputMoreImmediate {
        quadlets: CipHeader,
        skip: BranchPointer,
        irq_on_skip: bool,
    },
    /// Terminal fragment of a packet.
    OutputLast {
        req_count: u32,
        data_address: u32,
        branch: BranchPointer,
        status_write: bool,
        irq: bool,
    },
    /// Terminal descriptor of the compact NO-DATA form; CIP header inline,
    /// 32 bytes.
    OutputLastImmediate {
        quadlets: CipHeader,
        branch: BranchPointer,
        status_write: bool,
        irq: bool,
    },
    /// Zero-length terminal descriptor marking a deliberate empty cycle.
    OutputLastSkip { branch: BranchPointer, irq: bool },
}

impl Descriptor {
    /// Encoded size in bytes: 16, or 32 for the immediate-keyed variants.
    pub const fn size(&self) -> usize {
        match self {
            Descriptor::OutputMoreImmediate { .. } | Descriptor::OutputLastImmediate { .. } => 32,
            _ => BLOCK_SIZE,
        }
    }

    pub const fn command(&self) -> Command {
        match self {
            Descriptor::StoreValue { .. } => Command::StoreValue,
            Descriptor::OutputMore { .. } | Descriptor::OutputMoreImmediate { .. } => {
                Command::OutputMore
            }
            Descriptor::OutputLast { .. }
            | Descriptor::OutputLastImmediate { .. }
            | Descriptor::OutputLastSkip { .. } => Command::OutputLast,
        }
    }

    pub const fn key(&self) -> DescriptorKey {
        match self {
            Descriptor::StoreValue { .. } => DescriptorKey::Store,
            Descriptor::OutputMoreImmediate { .. } | Descriptor::OutputLastImmediate { .. } => {
                DescriptorKey::Immediate
            }
            _ => DescriptorKey::Standard,
        }
    }

    /// True for the `OutputLast` family, the only legal block terminators.
    pub const fn is_terminal(&self) -> bool {
        matches!(self.command(), Command::OutputLast)
    }

    /// True for the `OutputMore` family (standard and immediate).
    pub const fn is_more(&self) -> bool {
        matches!(self.command(), Command::OutputMore)
    }
}
