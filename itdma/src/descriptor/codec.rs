//! Byte-exact encoding of IT descriptors and decoding of control words.
//!
//! Everything here mirrors the OHCI 1.1 layout the controller consumes:
//! little-endian words, the 16-bit control field in the high half of word 0,
//! `reqCount` in the low half. The two CIP quadlets embedded by
//! immediate-keyed descriptors are big-endian wire data and are stored
//! big-endian, in the second 16-byte block of the 32-byte unit.

use num_enum::TryFromPrimitive;
use strum_macros::Display;
use thiserror::Error;

use super::{BranchControl, Command, Descriptor, DescriptorKey, IrqControl, WaitControl};

/// `reqCount` of an immediate-keyed descriptor: the two embedded quadlets.
pub(crate) const IMMEDIATE_REQ_COUNT: u32 = 8;

/// A caller-supplied value that cannot be represented in the fixed hardware
/// layout. Raised synchronously by the codec and the program builder; never
/// used for structural advisories (those are validator findings).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    #[error("value {0:#x} does not fit its fixed-width descriptor field")]
    FieldOverflow(u64),
    #[error("address {0:#010x} is not 16-byte aligned")]
    MisalignedAddress(u32),
    #[error("fragment of {0} bytes breaks quadlet granularity")]
    UnalignedFragment(u32),
}

/// Decoded fields of a descriptor control word (word 0 of the record).
///
/// Decoding is total: fields come back as raw numbers so that arbitrary
/// memory (a fault dump, say) can be inspected. [`ControlWord::classify`]
/// maps the `(cmd, key)` pair onto a descriptor kind where one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlWord {
    pub command: u8,
    pub status_write: bool,
    pub key: u8,
    pub interrupt: u8,
    pub branch: u8,
    pub wait: u8,
    pub req_count: u16,
}

impl ControlWord {
    /// Splits a 32-bit descriptor word 0 into its control fields.
    pub fn decode(word: u32) -> Self {
        let hi = (word >> 16) as u16;
        Self {
            command: ((hi >> 12) & 0xF) as u8,
            status_write: hi & (1 << 11) != 0,
            key: ((hi >> 8) & 0x7) as u8,
            interrupt: ((hi >> 4) & 0x3) as u8,
            branch: ((hi >> 2) & 0x3) as u8,
            wait: (hi & 0x3) as u8,
            req_count: word as u16,
        }
    }

    /// Maps the command/key pair to a known descriptor kind, if any.
    pub fn classify(&self) -> Option<DescriptorKind> {
        let command = Command::try_from_primitive(self.command).ok()?;
        let key = DescriptorKey::try_from_primitive(self.key).ok()?;
        match (command, key) {
            (Command::OutputMore, DescriptorKey::Standard) => Some(DescriptorKind::OutputMore),
            (Command::OutputMore, DescriptorKey::Immediate) => {
                Some(DescriptorKind::OutputMoreImmediate)
            }
            (Command::OutputLast, DescriptorKey::Standard) => Some(DescriptorKind::OutputLast),
            (Command::OutputLast, DescriptorKey::Immediate) => {
                Some(DescriptorKind::OutputLastImmediate)
            }
            (Command::StoreValue, DescriptorKey::Store) => Some(DescriptorKind::StoreValue),
            _ => None,
        }
    }
}

/// Descriptor kind as recoverable from a control word alone.
///
/// `OutputLastSkip` is indistinguishable from `OutputLast` at this level
/// (same command and key, `reqCount` zero), so it has no entry here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DescriptorKind {
    #[strum(serialize = "OUTPUT_MORE")]
    OutputMore,
    #[strum(serialize = "OUTPUT_MORE-Immediate")]
    OutputMoreImmediate,
    #[strum(serialize = "OUTPUT_LAST")]
    OutputLast,
    #[strum(serialize = "OUTPUT_LAST-Immediate")]
    OutputLastImmediate,
    #[strum(serialize = "STORE_VALUE")]
    StoreValue,
}

/// Assembles the 16-bit control field. Bits 7:6 are reserved and stay zero.
pub(crate) fn make_control(
    command: Command,
    status_write: bool,
    key: DescriptorKey,
    irq: IrqControl,
    branch: BranchControl,
    wait: WaitControl,
) -> u16 {
    let mut control = (u8::from(command) as u16) << 12;
    control |= (status_write as u16) << 11;
    control |= (u8::from(key) as u16) << 8;
    control |= (u8::from(irq) as u16) << 4;
    control |= (u8::from(branch) as u16) << 2;
    control |= u8::from(wait) as u16;
    control
}

/// Word 0 of a record: control in the high half, `reqCount` in the low half.
fn first_word(control: u16, req_count: u32) -> Result<u32, EncodeError> {
    if req_count > 0xFFFF {
        return Err(EncodeError::FieldOverflow(req_count as u64));
    }
    Ok(((control as u32) << 16) | req_count)
}

fn push_words(out: &mut Vec<u8>, words: [u32; 4]) {
    for word in words {
        out.extend_from_slice(&word.to_le_bytes());
    }
}

impl Descriptor {
    /// Appends the descriptor's hardware image (16 or 32 bytes) to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        match *self {
            Descriptor::StoreValue {
                value,
                store_address,
                skip,
                irq,
            } => {
                let control = make_control(
                    Command::StoreValue,
                    false,
                    DescriptorKey::Store,
                    if irq { IrqControl::Always } else { IrqControl::Never },
                    BranchControl::Never,
                    WaitControl::Never,
                );
                push_words(
                    out,
                    [
                        first_word(control, value as u32)?,
                        store_address,
                        skip.pack()?,
                        0,
                    ],
                );
            }
            Descriptor::OutputMore {
                req_count,
                data_address,
            } => {
                let control = make_control(
                    Command::OutputMore,
                    false,
                    DescriptorKey::Standard,
                    IrqControl::Never,
                    BranchControl::Never,
                    WaitControl::Never,
                );
                push_words(out, [first_word(control, req_count)?, data_address, 0, 0]);
            }
            Descriptor::OutputMoreImmediate {
                quadlets,
                skip,
                irq_on_skip,
            } => {
                let control = make_control(
                    Command::OutputMore,
                    false,
                    DescriptorKey::Immediate,
                    if irq_on_skip {
                        IrqControl::Always
                    } else {
                        IrqControl::Never
                    },
                    BranchControl::Never,
                    WaitControl::Never,
                );
                push_words(
                    out,
                    [first_word(control, IMMEDIATE_REQ_COUNT)?, skip.pack()?, 0, 0],
                );
                push_immediate_block(out, quadlets.q0, quadlets.q1);
            }
            Descriptor::OutputLast {
                req_count,
                data_address,
                branch,
                status_write,
                irq,
            } => {
                let control = make_control(
                    Command::OutputLast,
                    status_write,
                    DescriptorKey::Standard,
                    if irq { IrqControl::Always } else { IrqControl::Never },
                    BranchControl::Always,
                    WaitControl::Never,
                );
                push_words(
                    out,
                    [
                        first_word(control, req_count)?,
                        data_address,
                        branch.pack()?,
                        0,
                    ],
                );
            }
            Descriptor::OutputLastImmediate {
                quadlets,
                branch,
                status_write,
                irq,
            } => {
                let control = make_control(
                    Command::OutputLast,
                    status_write,
                    DescriptorKey::Immediate,
                    if irq { IrqControl::Always } else { IrqControl::Never },
                    BranchControl::Always,
                    WaitControl::Never,
                );
                push_words(
                    out,
                    [
                        first_word(control, IMMEDIATE_REQ_COUNT)?,
                        branch.pack()?,
                        0,
                        0,
                    ],
                );
                push_immediate_block(out, quadlets.q0, quadlets.q1);
            }
            Descriptor::OutputLastSkip { branch, irq } => {
                let control = make_control(
                    Command::OutputLast,
                    true,
                    DescriptorKey::Standard,
                    if irq { IrqControl::Always } else { IrqControl::Never },
                    BranchControl::Always,
                    WaitControl::Never,
                );
                push_words(out, [first_word(control, 0)?, 0, branch.pack()?, 0]);
            }
        }
        Ok(())
    }

    /// Convenience wrapper allocating a fresh buffer.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::with_capacity(self.size());
        self.encode_into(&mut out)?;
        Ok(out)
    }
}

/// The second 16-byte block of an immediate descriptor: the two CIP quadlets
/// in big-endian order, padded to a full block.
fn push_immediate_block(out: &mut Vec<u8>, q0: u32, q1: u32) {
    out.extend_from_slice(&q0.to_be_bytes());
    out.extend_from_slice(&q1.to_be_bytes());
    out.extend_from_slice(&[0u8; 8]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{BranchPointer, CipHeader};

    #[test]
    fn control_word_round_trip() {
        for &(command, key) in &[
            (Command::OutputMore, DescriptorKey::Standard),
            (Command::OutputMore, DescriptorKey::Immediate),
            (Command::OutputLast, DescriptorKey::Standard),
            (Command::OutputLast, DescriptorKey::Immediate),
            (Command::StoreValue, DescriptorKey::Store),
        ] {
            for &status_write in &[false, true] {
                for &irq in &[IrqControl::Never, IrqControl::Always] {
                    for &branch in &[BranchControl::Never, BranchControl::Always] {
                        let control =
                            make_control(command, status_write, key, irq, branch, WaitControl::Never);
                        let word = ((control as u32) << 16) | 0x0123;
                        let decoded = ControlWord::decode(word);
                        assert_eq!(decoded.command, u8::from(command));
                        assert_eq!(decoded.status_write, status_write);
                        assert_eq!(decoded.key, u8::from(key));
                        assert_eq!(decoded.interrupt, u8::from(irq));
                        assert_eq!(decoded.branch, u8::from(branch));
                        assert_eq!(decoded.wait, 0);
                        assert_eq!(decoded.req_count, 0x0123);
                    }
                }
            }
        }
    }

    #[test]
    fn decode_known_output_last_immediate() {
        // Reference control word from a known-good OUTPUT_LAST-Immediate
        // quadlet-read descriptor.
        let decoded = ControlWord::decode(0x123C_000C);
        assert_eq!(decoded.command, u8::from(Command::OutputLast));
        assert_eq!(decoded.key, u8::from(DescriptorKey::Immediate));
        assert_eq!(decoded.interrupt, 3);
        assert_eq!(decoded.branch, 3);
        assert_eq!(decoded.req_count, 12);
        assert_eq!(decoded.classify(), Some(DescriptorKind::OutputLastImmediate));
    }

    #[test]
    fn classify_rejects_unknown_codes() {
        // cmd=0xF is not a defined command.
        assert_eq!(ControlWord::decode(0xF000_0000).classify(), None);
        // cmd/key combination that hardware never produces.
        let control = make_control(
            Command::StoreValue,
            false,
            DescriptorKey::Immediate,
            IrqControl::Never,
            BranchControl::Never,
            WaitControl::Never,
        );
        assert_eq!(ControlWord::decode((control as u32) << 16).classify(), None);
    }

    #[test]
    fn pointer_packing() {
        for z in 0..=0xF_u8 {
            let packed = BranchPointer::new(0x8000_0420, z).pack().unwrap();
            assert_eq!(packed & 0xF, z as u32);
            assert_eq!(packed & !0xF, 0x8000_0420);
            assert_eq!(BranchPointer::unpack(packed), BranchPointer::new(0x8000_0420, z));
        }
    }

    #[test]
    fn pointer_packing_rejects_bad_inputs() {
        assert_eq!(
            BranchPointer::new(0x8000_0008, 1).pack(),
            Err(EncodeError::MisalignedAddress(0x8000_0008))
        );
        assert_eq!(
            BranchPointer::new(0x8000_0000, 0x10).pack(),
            Err(EncodeError::FieldOverflow(0x10))
        );
    }

    #[test]
    fn output_last_layout() {
        let desc = Descriptor::OutputLast {
            req_count: 72,
            data_address: 0x8001_0000,
            branch: BranchPointer::new(0x8000_0030, 3),
            status_write: true,
            irq: false,
        };
        let bytes = desc.encode().unwrap();
        assert_eq!(bytes.len(), 16);
        let word0 = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        assert_eq!(word0 & 0xFFFF, 72);
        let decoded = ControlWord::decode(word0);
        assert_eq!(decoded.classify(), Some(DescriptorKind::OutputLast));
        assert!(decoded.status_write);
        assert_eq!(
            u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            0x8001_0000
        );
        assert_eq!(
            u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            0x8000_0033
        );
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), 0);
    }

    #[test]
    fn immediate_layout_carries_big_endian_quadlets() {
        let desc = Descriptor::OutputMoreImmediate {
            quadlets: CipHeader::new(0x3F02_0040, 0x9002_FFFF),
            skip: BranchPointer::new(0x8000_0060, 3),
            irq_on_skip: false,
        };
        let bytes = desc.encode().unwrap();
        assert_eq!(bytes.len(), 32);
        let word0 = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        assert_eq!(word0 & 0xFFFF, IMMEDIATE_REQ_COUNT);
        // Skip pointer sits at +4 for immediate descriptors.
        assert_eq!(
            u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            0x8000_0063
        );
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 0);
        // Quadlets are big-endian in the second block.
        assert_eq!(&bytes[16..20], &[0x3F, 0x02, 0x00, 0x40]);
        assert_eq!(&bytes[20..24], &[0x90, 0x02, 0xFF, 0xFF]);
        assert_eq!(&bytes[24..32], &[0u8; 8]);
    }

    #[test]
    fn store_value_places_value_in_req_count() {
        let desc = Descriptor::StoreValue {
            value: 0xBEEF,
            store_address: 0x8000_FFFC,
            skip: BranchPointer::NULL,
            irq: false,
        };
        let bytes = desc.encode().unwrap();
        let decoded = ControlWord::decode(u32::from_le_bytes(bytes[0..4].try_into().unwrap()));
        assert_eq!(decoded.req_count, 0xBEEF);
        assert_eq!(decoded.classify(), Some(DescriptorKind::StoreValue));
        assert_eq!(
            u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            0x8000_FFFC
        );
    }

    #[test]
    fn req_count_overflow_is_an_error() {
        let desc = Descriptor::OutputMore {
            req_count: 0x1_0000,
            data_address: 0x8001_0000,
        };
        assert_eq!(desc.encode(), Err(EncodeError::FieldOverflow(0x1_0000)));
    }
}
