//! Compiler and fault diagnoser for OHCI 1.1 isochronous transmit (IT) DMA
//! descriptor programs.
//!
//! A FireWire host controller transmits isochronous packets by walking a
//! circular chain of DMA descriptors without CPU involvement. This crate
//! turns a logical sequence of packet intents (CIP-framed audio payloads or
//! NO-DATA filler cycles) into the byte-exact descriptor program the
//! controller consumes, and, given a runtime trace of controller state,
//! works out why such a walk halted.
//!
//! The pipeline is [`ProgramBuilder`] → [`ProgramBuilder::finalize`] (ring
//! linking + serialization), with [`validate`] available at any stage for
//! structural findings. [`diagnose`] is the independent reverse path over
//! the same binary contract.

pub mod cip;
mod descriptor;
mod diagnose;
mod program;
mod util;
mod validate;

pub use descriptor::{
    BranchControl, BranchPointer, CipHeader, Command, ControlWord, Descriptor, DescriptorKey,
    DescriptorKind, EncodeError, IrqControl, WaitControl, BLOCK_SIZE,
};
pub use diagnose::{diagnose, FaultClass, Report};
pub use program::ring::{link_ring, serialize_program};
pub use program::{fragment_sizes, DataPacket, DescriptorBlock, ProgramBuilder, SkipStrategy};
pub use util::init_logger;
pub use validate::{validate, Finding, FindingKind, MAX_OUTPUT_MORE};
