//! Structural checks over a built (or still-building) program.
//!
//! Violations come back as a findings list, never as errors, so a program
//! can be inspected at any stage of construction. Each check is independent
//! of the others.

use crate::descriptor::{Descriptor, DescriptorKey, BLOCK_SIZE};
use crate::program::DescriptorBlock;

/// Construction sanity bound on `OutputMore`-family descriptors per block.
/// Not a hardware limit; a program exceeding it was almost certainly not
/// built on purpose.
pub const MAX_OUTPUT_MORE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindingKind {
    StoreValueNotFirst,
    TooManyOutputMore,
    MissingTerminal,
    MisalignedBlock,
    ImmediateSizeMismatch,
    ZMismatch,
}

/// One advisory violation, tagged with the offending block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub block: usize,
    pub kind: FindingKind,
    pub message: String,
}

impl Finding {
    fn new(block: usize, kind: FindingKind, message: String) -> Self {
        Self {
            block,
            kind,
            message,
        }
    }
}

/// Walks the program and reports every structural violation of the hardware
/// contract it can see. Runs on empty, partial and fully linked programs
/// alike.
pub fn validate(blocks: &[DescriptorBlock]) -> Vec<Finding> {
    let mut findings = Vec::new();

    for (index, block) in blocks.iter().enumerate() {
        let descriptors = block.descriptors();

        let has_store = descriptors
            .iter()
            .any(|d| matches!(d, Descriptor::StoreValue { .. }));
        if has_store && !matches!(descriptors.first(), Some(Descriptor::StoreValue { .. })) {
            findings.push(Finding::new(
                index,
                FindingKind::StoreValueNotFirst,
                "STORE_VALUE is not the first descriptor of its block".into(),
            ));
        }

        let more_count = descriptors.iter().filter(|d| d.is_more()).count();
        if more_count > MAX_OUTPUT_MORE {
            findings.push(Finding::new(
                index,
                FindingKind::TooManyOutputMore,
                format!("{more_count} OUTPUT_MORE descriptors exceed the sanity bound of {MAX_OUTPUT_MORE}"),
            ));
        }

        if !descriptors.last().is_some_and(|d| d.is_terminal()) {
            findings.push(Finding::new(
                index,
                FindingKind::MissingTerminal,
                "missing terminal OUTPUT_LAST descriptor".into(),
            ));
        }

        if block.address() % BLOCK_SIZE as u32 != 0 {
            findings.push(Finding::new(
                index,
                FindingKind::MisalignedBlock,
                format!("block address {:#010x} is not 16-byte aligned", block.address()),
            ));
        }

        for descriptor in descriptors {
            if matches!(descriptor.key(), DescriptorKey::Immediate) && descriptor.size() != 32 {
                findings.push(Finding::new(
                    index,
                    FindingKind::ImmediateSizeMismatch,
                    format!(
                        "immediate-keyed descriptor reports size {} instead of 32",
                        descriptor.size()
                    ),
                ));
            }
        }

        check_pointer_z(blocks, index, &mut findings);
    }

    findings
}

/// The flag-don't-throw rule for pointer/Z packing: every non-null branch or
/// skip pointer whose target is a block of this program must carry that
/// block's true Z in its low nibble.
fn check_pointer_z(blocks: &[DescriptorBlock], index: usize, findings: &mut Vec<Finding>) {
    for descriptor in blocks[index].descriptors() {
        let (slot, pointer) = match descriptor {
            Descriptor::StoreValue { skip, .. } => ("skip", *skip),
            Descriptor::OutputMoreImmediate { skip, .. } => ("skip", *skip),
            Descriptor::OutputLast { branch, .. }
            | Descriptor::OutputLastImmediate { branch, .. }
            | Descriptor::OutputLastSkip { branch, .. } => ("branch", *branch),
            Descriptor::OutputMore { .. } => continue,
        };
        if pointer.is_null() {
            continue;
        }
        let Some(target) = blocks.iter().find(|b| b.address() == pointer.address) else {
            // Out-of-ring target (e.g. a sentinel); its Z cannot be checked
            // against this program.
            continue;
        };
        if pointer.z != target.z_value() {
            findings.push(Finding::new(
                index,
                FindingKind::ZMismatch,
                format!(
                    "{slot} pointer to {:#010x} carries Z={} but the target block is Z={}",
                    pointer.address,
                    pointer.z,
                    target.z_value()
                ),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{BranchPointer, CipHeader};

    fn more(req: u32) -> Descriptor {
        Descriptor::OutputMore {
            req_count: req,
            data_address: 0x8001_0000,
        }
    }

    fn last(branch: BranchPointer) -> Descriptor {
        Descriptor::OutputLast {
            req_count: 8,
            data_address: 0x8001_0000,
            branch,
            status_write: true,
            irq: false,
        }
    }

    #[test]
    fn missing_terminal_is_flagged() {
        let block = DescriptorBlock::new(0x8000_0000, [more(8)]);
        let findings = validate(&[block]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].block, 0);
        assert_eq!(findings[0].kind, FindingKind::MissingTerminal);
    }

    #[test]
    fn store_value_out_of_position() {
        let store = Descriptor::StoreValue {
            value: 1,
            store_address: 0x8000_FFFC,
            skip: BranchPointer::NULL,
            irq: false,
        };
        let block = DescriptorBlock::new(0x8000_0000, [more(8), store, last(BranchPointer::NULL)]);
        let findings = validate(&[block]);
        assert!(findings
            .iter()
            .any(|f| f.kind == FindingKind::StoreValueNotFirst));
    }

    #[test]
    fn too_many_output_more() {
        let mut descriptors = vec![more(8); MAX_OUTPUT_MORE + 1];
        descriptors.push(last(BranchPointer::NULL));
        let block = DescriptorBlock::new(0x8000_0000, descriptors);
        let findings = validate(&[block]);
        assert!(findings
            .iter()
            .any(|f| f.kind == FindingKind::TooManyOutputMore));
    }

    #[test]
    fn misaligned_block_address() {
        let block = DescriptorBlock::new(0x8000_0008, [last(BranchPointer::NULL)]);
        let findings = validate(&[block]);
        assert!(findings
            .iter()
            .any(|f| f.kind == FindingKind::MisalignedBlock));
    }

    #[test]
    fn z_nibble_disagreement_is_flagged() {
        // Block 1 occupies one unit, but block 0 points at it claiming Z=3.
        let b0 = DescriptorBlock::new(0x8000_0000, [last(BranchPointer::new(0x8000_0010, 3))]);
        let b1 = DescriptorBlock::new(0x8000_0010, [last(BranchPointer::new(0x8000_0000, 1))]);
        let findings = validate(&[b0, b1]);
        let z_findings: Vec<_> = findings
            .iter()
            .filter(|f| f.kind == FindingKind::ZMismatch)
            .collect();
        assert_eq!(z_findings.len(), 1);
        assert_eq!(z_findings[0].block, 0);
    }

    #[test]
    fn immediate_nodata_block_is_clean() {
        let block = DescriptorBlock::new(
            0x8000_0000,
            [Descriptor::OutputLastImmediate {
                quadlets: CipHeader::new(0, 0),
                branch: BranchPointer::NULL,
                status_write: true,
                irq: false,
            }],
        );
        assert!(validate(&[block]).is_empty());
    }

    #[test]
    fn sentinel_pointer_is_not_z_checked() {
        let b0 = DescriptorBlock::new(
            0x8000_0000,
            [Descriptor::OutputMoreImmediate {
                quadlets: CipHeader::new(0, 0),
                skip: BranchPointer::new(0x8000_FF00, 1),
                irq_on_skip: false,
            },
            last(BranchPointer::new(0x8000_0000, 3))],
        );
        assert!(validate(&[b0]).is_empty());
    }
}
