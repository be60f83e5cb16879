//! Compiles packet intents into an ordered sequence of descriptor blocks.
//!
//! One [`ProgramBuilder`] owns one program under construction: the block
//! list, the next-block address cursor, the payload allocation cursor and
//! the CIP data-block counter (DBC). Nothing here is shared or global;
//! independent programs get independent builders.

use smallvec::{smallvec, SmallVec};
use tracing::debug;

use crate::descriptor::{BranchPointer, CipHeader, Descriptor, EncodeError, BLOCK_SIZE};

pub(crate) mod alloc;
pub(crate) mod ring;

use alloc::PayloadAllocator;
pub use ring::SkipStrategy;

/// Offset of the payload region above the descriptor base, when the caller
/// does not place it explicitly.
const DEFAULT_PAYLOAD_OFFSET: u32 = 0x1_0000;

/// Offset of the sentinel recovery address above the descriptor base, when
/// the caller does not place it explicitly.
const DEFAULT_SENTINEL_OFFSET: u32 = 0xFF00;

/// Size of the CIP header prefix of every packet payload.
const CIP_HEADER_BYTES: u32 = 8;

/// Intent record for one DATA packet.
///
/// `cip` is the already-encoded IEC 61883-1 header pair; [`crate::cip`] can
/// produce it from raw fields, continuing from [`ProgramBuilder::dbc`].
#[derive(Debug, Clone, Copy)]
pub struct DataPacket {
    pub samples: u32,
    pub channels: u32,
    pub fragments: u32,
    pub cip: CipHeader,
    /// When set, the block leads with a `StoreValue` descriptor writing this
    /// value for host-side progress polling.
    pub store_value: Option<u16>,
    pub irq: bool,
}

impl DataPacket {
    /// A single-fragment packet with no store descriptor and no interrupt.
    pub fn new(samples: u32, channels: u32, cip: CipHeader) -> Self {
        Self {
            samples,
            channels,
            fragments: 1,
            cip,
            store_value: None,
            irq: false,
        }
    }
}

/// One isochronous packet's program unit: a non-empty, bounded run of
/// descriptors at a fixed 16-byte-aligned address, always ending in an
/// `OutputLast`-family terminal when built by [`ProgramBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorBlock {
    descriptors: SmallVec<[Descriptor; 4]>,
    address: u32,
}

impl DescriptorBlock {
    /// Assembles a block from raw descriptors, e.g. to feed the validator a
    /// hand-built or partially-built program.
    pub fn new(address: u32, descriptors: impl IntoIterator<Item = Descriptor>) -> Self {
        Self {
            descriptors: descriptors.into_iter().collect(),
            address,
        }
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub(crate) fn descriptors_mut(&mut self) -> &mut [Descriptor] {
        &mut self.descriptors
    }

    pub fn total_bytes(&self) -> usize {
        self.descriptors.iter().map(Descriptor::size).sum()
    }

    /// Number of 16-byte units this block occupies; also the low nibble of
    /// any pointer targeting it.
    pub fn z_value(&self) -> u8 {
        (self.total_bytes().div_ceil(BLOCK_SIZE)) as u8
    }

    /// The pointer other blocks use to reach this one.
    pub fn pointer(&self) -> BranchPointer {
        BranchPointer::new(self.address, self.z_value())
    }

    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        for descriptor in &self.descriptors {
            descriptor.encode_into(out)?;
        }
        Ok(())
    }
}

/// Splits `payload_len` into `fragments` pieces: equal integer shares with
/// the remainder folded into the last piece. Every piece must keep quadlet
/// granularity, the wire format's unit.
pub fn fragment_sizes(payload_len: u32, fragments: u32) -> Result<Vec<u32>, EncodeError> {
    if fragments == 0 {
        return Err(EncodeError::UnalignedFragment(0));
    }
    let share = payload_len / fragments;
    let last = share + payload_len % fragments;
    if share % 4 != 0 {
        return Err(EncodeError::UnalignedFragment(share));
    }
    if last % 4 != 0 {
        return Err(EncodeError::UnalignedFragment(last));
    }
    let mut sizes = vec![share; fragments as usize];
    *sizes.last_mut().expect("fragments is nonzero") = last;
    Ok(sizes)
}

/// Builds one IT DMA program: packets in, ordered descriptor blocks out.
///
/// Addresses are allocated strictly sequentially from the base; finalizing
/// links the blocks into a ring and serializes them (see [`ring`]).
#[derive(Debug)]
pub struct ProgramBuilder {
    blocks: Vec<DescriptorBlock>,
    base_address: u32,
    payload: PayloadAllocator,
    sentinel_address: u32,
    store_address: u32,
    dbc: u8,
}

impl ProgramBuilder {
    /// Starts an empty program at `base_address` (must be 16-byte aligned).
    ///
    /// The payload region defaults to `base + 0x10000` and the sentinel
    /// recovery address to `base + 0xFF00`; override with
    /// [`with_payload_base`](Self::with_payload_base) /
    /// [`with_sentinel_address`](Self::with_sentinel_address) before adding
    /// packets.
    pub fn new(base_address: u32) -> Result<Self, EncodeError> {
        check_aligned(base_address)?;
        let payload_base = base_address + DEFAULT_PAYLOAD_OFFSET;
        Ok(Self {
            blocks: Vec::new(),
            base_address,
            payload: PayloadAllocator::new(payload_base),
            sentinel_address: base_address + DEFAULT_SENTINEL_OFFSET,
            store_address: payload_base - 4,
            dbc: 0,
        })
    }

    /// Places the payload region. Call before the first packet.
    pub fn with_payload_base(mut self, payload_base: u32) -> Result<Self, EncodeError> {
        check_aligned(payload_base)?;
        self.payload.rebase(payload_base);
        Ok(self)
    }

    /// Places the out-of-ring sentinel the `Sentinel` skip strategy targets.
    pub fn with_sentinel_address(mut self, sentinel_address: u32) -> Result<Self, EncodeError> {
        check_aligned(sentinel_address)?;
        self.sentinel_address = sentinel_address;
        Ok(self)
    }

    /// Host address `StoreValue` descriptors write their doublet to.
    pub fn with_store_address(mut self, store_address: u32) -> Self {
        self.store_address = store_address;
        self
    }

    /// Blocks appended so far, in address order.
    pub fn blocks(&self) -> &[DescriptorBlock] {
        &self.blocks
    }

    /// Current CIP data-block counter. Exposed so callers can encode the
    /// next packet's CIP quadlets with the continuity the wire protocol
    /// requires; this crate never interprets it beyond counting.
    pub fn dbc(&self) -> u8 {
        self.dbc
    }

    fn next_block_address(&self) -> u32 {
        match self.blocks.last() {
            Some(last) => last.address() + last.z_value() as u32 * BLOCK_SIZE as u32,
            None => self.base_address,
        }
    }

    fn push_block(&mut self, descriptors: SmallVec<[Descriptor; 4]>) -> &DescriptorBlock {
        let block = DescriptorBlock {
            descriptors,
            address: self.next_block_address(),
        };
        debug!(
            address = block.address(),
            z = block.z_value(),
            descriptors = block.descriptors().len(),
            "appended block"
        );
        self.blocks.push(block);
        self.blocks.last().expect("block was just pushed")
    }

    /// Appends a DATA packet block: optional `StoreValue`, the CIP header as
    /// an `OutputMoreImmediate`, `fragments - 1` scatter-gather
    /// `OutputMore`s and a terminal `OutputLast`.
    ///
    /// Payload length is `8 + samples * channels * 4`. Fails without
    /// touching any cursor if a fragment would break quadlet granularity
    /// (`UnalignedFragment`) or a field cannot be represented
    /// (`FieldOverflow`); previously added blocks are unaffected either way.
    pub fn add_data_packet(&mut self, packet: &DataPacket) -> Result<&DescriptorBlock, EncodeError> {
        let audio_bytes = packet.samples as u64 * packet.channels as u64 * 4;
        let payload_len = CIP_HEADER_BYTES as u64 + audio_bytes;
        if payload_len > u32::MAX as u64 {
            return Err(EncodeError::FieldOverflow(payload_len));
        }
        let payload_len = payload_len as u32;
        let sizes = fragment_sizes(payload_len, packet.fragments)?;

        let mut descriptors = SmallVec::new();
        if let Some(value) = packet.store_value {
            descriptors.push(Descriptor::StoreValue {
                value,
                store_address: self.store_address,
                skip: BranchPointer::NULL,
                irq: false,
            });
        }
        descriptors.push(Descriptor::OutputMoreImmediate {
            quadlets: packet.cip,
            skip: BranchPointer::NULL,
            irq_on_skip: false,
        });

        let payload_addr = self.payload.alloc(payload_len);
        let mut cursor = payload_addr;
        let (last_size, more_sizes) = sizes.split_last().expect("fragments is nonzero");
        for &size in more_sizes {
            descriptors.push(Descriptor::OutputMore {
                req_count: size,
                data_address: cursor,
            });
            cursor += size;
        }
        descriptors.push(Descriptor::OutputLast {
            req_count: *last_size,
            data_address: cursor,
            branch: BranchPointer::NULL,
            status_write: true,
            irq: packet.irq,
        });

        self.dbc = self.dbc.wrapping_add(packet.samples as u8);
        Ok(self.push_block(descriptors))
    }

    /// Appends a NO-DATA packet block: the CIP header immediate plus an
    /// `OutputLast` covering the 8-byte CIP-only payload.
    pub fn add_nodata_packet(
        &mut self,
        cip: CipHeader,
        irq: bool,
    ) -> Result<&DescriptorBlock, EncodeError> {
        let payload_addr = self.payload.alloc(CIP_HEADER_BYTES);
        let descriptors = smallvec![
            Descriptor::OutputMoreImmediate {
                quadlets: cip,
                skip: BranchPointer::NULL,
                irq_on_skip: false,
            },
            Descriptor::OutputLast {
                req_count: CIP_HEADER_BYTES,
                data_address: payload_addr,
                branch: BranchPointer::NULL,
                status_write: true,
                irq,
            },
        ];
        Ok(self.push_block(descriptors))
    }

    /// Appends the compact NO-DATA form: a single `OutputLastImmediate`
    /// block carrying the CIP header inline, no payload buffer at all.
    pub fn add_nodata_immediate(&mut self, cip: CipHeader, irq: bool) -> &DescriptorBlock {
        let descriptors = smallvec![Descriptor::OutputLastImmediate {
            quadlets: cip,
            branch: BranchPointer::NULL,
            status_write: true,
            irq,
        }];
        self.push_block(descriptors)
    }

    /// Appends a deliberate empty-cycle marker: one zero-length
    /// `OutputLastSkip` block.
    pub fn add_skip_marker(&mut self, irq: bool) -> &DescriptorBlock {
        let descriptors = smallvec![Descriptor::OutputLastSkip {
            branch: BranchPointer::NULL,
            irq,
        }];
        self.push_block(descriptors)
    }

    /// Links the blocks into a circular program under `strategy` and
    /// serializes them in address order.
    ///
    /// Linking is idempotent for a fixed strategy; calling again with a
    /// different strategy overwrites the pointers. Finalize once per program
    /// lifetime and treat the returned buffer as the program.
    pub fn finalize(&mut self, strategy: SkipStrategy) -> Result<Vec<u8>, EncodeError> {
        ring::link_ring(&mut self.blocks, strategy, self.sentinel_address);
        ring::serialize_program(&self.blocks)
    }
}

fn check_aligned(address: u32) -> Result<(), EncodeError> {
    if address % BLOCK_SIZE as u32 != 0 {
        return Err(EncodeError::MisalignedAddress(address));
    }
    Ok(())
}
