//! Closes a block sequence into a circular hardware program.
//!
//! Terminal branch pointers always target the successor block (including the
//! last-to-first wraparound) so the controller's normal walk traverses the
//! whole ring under every strategy; the skip pointers taken on a lost cycle
//! are what the [`SkipStrategy`] selects.

use strum_macros::{Display, EnumString};
use tracing::debug;

use crate::descriptor::{BranchPointer, Descriptor, EncodeError};

use super::DescriptorBlock;

/// Where a block's skip pointers send the controller when an isochronous
/// cycle is lost. Chosen once per program and applied uniformly.
///
/// Parses from and displays as `next`/`self`/`sentinel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SkipStrategy {
    /// Skip to the successor block: drop the lost cycle's packet.
    Next,
    /// Skip to the same block: retry the packet on the next cycle.
    #[strum(serialize = "self")]
    Retry,
    /// Skip to a fixed out-of-ring recovery address (Z = 1).
    Sentinel,
}

/// Resolves every block's terminal branch and skip pointers in place.
///
/// Idempotent for a fixed strategy and block set; re-linking with another
/// strategy overwrites the previous pointers.
pub fn link_ring(blocks: &mut [DescriptorBlock], strategy: SkipStrategy, sentinel_address: u32) {
    if blocks.is_empty() {
        return;
    }
    // Successors are resolved by index over a snapshot of the block
    // pointers; blocks never hold references to each other.
    let pointers: Vec<BranchPointer> = blocks.iter().map(DescriptorBlock::pointer).collect();
    let count = blocks.len();
    for (index, block) in blocks.iter_mut().enumerate() {
        let next = pointers[(index + 1) % count];
        let skip = match strategy {
            SkipStrategy::Next => next,
            SkipStrategy::Retry => pointers[index],
            SkipStrategy::Sentinel => BranchPointer::new(sentinel_address, 1),
        };
        for descriptor in block.descriptors_mut() {
            match descriptor {
                Descriptor::StoreValue { skip: slot, .. }
                | Descriptor::OutputMoreImmediate { skip: slot, .. } => *slot = skip,
                Descriptor::OutputLast { branch, .. }
                | Descriptor::OutputLastImmediate { branch, .. }
                | Descriptor::OutputLastSkip { branch, .. } => *branch = next,
                Descriptor::OutputMore { .. } => {}
            }
        }
    }
    debug!(blocks = count, %strategy, "linked ring");
}

/// Serializes the linked blocks in address order into one contiguous buffer,
/// directly consumable as the context's DMA region.
pub fn serialize_program(blocks: &[DescriptorBlock]) -> Result<Vec<u8>, EncodeError> {
    let total: usize = blocks.iter().map(|b| b.total_bytes()).sum();
    let mut out = Vec::with_capacity(total);
    for block in blocks {
        block.encode_into(&mut out)?;
    }
    debug_assert_eq!(out.len(), total);
    Ok(out)
}
