//! Post-mortem diagnosis of a halted IT DMA context.
//!
//! Correlates a controller trace against the raw descriptor memory it was
//! executing, resolves the halted descriptor index from the context's
//! command pointer, and classifies the fault from the descriptor content.
//! Everything is best-effort: missing inputs degrade the report, they never
//! fail it.

use ahash::AHashMap;
use once_cell::sync::Lazy;
use strum_macros::Display;
use tracing::instrument;

use crate::descriptor::{BranchPointer, Command, ControlWord, DescriptorKey, BLOCK_SIZE};

mod trace;

use trace::{DumpRecord, TraceEvent, TraceScan};

/// Hardware event codes that do not indicate a problem by themselves.
const BENIGN_EVENT_CODES: [u32; 3] = [0x00, 0x02, 0x11];

/// The memory fill pattern left by an allocator in debug builds; a
/// descriptor word equal to it was never written by the driver.
const UNINITIALIZED_PATTERN: u32 = 0xDEDE_DEDE;

static EVENT_NAMES: Lazy<AHashMap<u32, &'static str>> = Lazy::new(|| {
    AHashMap::from_iter([
        (0x00, "evt_no_status"),
        (0x02, "ack_complete"),
        (0x06, "evt_descriptor_read"),
        (0x07, "evt_data_read"),
        (0x0A, "evt_timeout"),
        (0x0E, "evt_unknown"),
        (0x0F, "evt_flushed"),
        (0x11, "ack_pending"),
        (0x21, "evt_skip_overflow"),
    ])
});

fn event_name(code: u32) -> String {
    match EVENT_NAMES.get(&code) {
        Some(name) => (*name).to_string(),
        None => format!("unknown(0x{code:02X})"),
    }
}

/// Terminal classification of a diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FaultClass {
    /// The halted descriptor was never written (fill pattern intact).
    UninitializedDescriptor,
    /// A branch/skip slot carries a Z nibble but a null address: the context
    /// has nowhere to go.
    NullBranchWithNonzeroZ,
    /// A zero-Z terminal: the program ended where it was built to end.
    DeliberateStop,
    /// The halted descriptor looks structurally sound.
    NoFaultDetected,
    /// The command pointer does not resolve to a 16-byte record boundary.
    MisalignedCommandPtr,
    /// Not enough trace or memory data to say anything stronger.
    InsufficientData,
}

/// Ordered human-readable diagnostic lines plus the terminal classification.
/// Plain data; rendering belongs to the caller.
#[derive(Debug, Clone)]
pub struct Report {
    pub lines: Vec<String>,
    pub classification: FaultClass,
}

impl Report {
    fn done(lines: Vec<String>, classification: FaultClass) -> Self {
        Self {
            lines,
            classification,
        }
    }
}

/// Diagnoses a stalled or dead IT context from its trace text, optionally
/// cross-referencing the raw descriptor memory image (starting at the
/// program base) and the program base address. A `base = 0x…` line in the
/// trace overrides the argument: it is the controller's own report.
#[instrument(level = "debug", skip_all)]
pub fn diagnose(trace_text: &str, memory: Option<&[u8]>, base_address: Option<u32>) -> Report {
    let scan = trace::scan(trace_text);
    let mut lines = Vec::new();

    if scan.events.is_empty() {
        lines.push("no isochronous transmit events found in trace".to_string());
        return Report::done(lines, FaultClass::InsufficientData);
    }

    let critical = scan.events.iter().find(|event| is_critical(event));
    let target = critical.unwrap_or_else(|| scan.events.last().expect("events is nonempty"));
    lines.push(format!(
        "{} event(s) scanned, critical event {}",
        scan.events.len(),
        if critical.is_some() { "found" } else { "not found; falling back to the last one" },
    ));
    lines.push(format!("line {}: {}", target.line_no, target.text.trim()));

    if let Some(code) = target.event_code {
        lines.push(format!("event code 0x{code:02X} ({})", event_name(code)));
        match code {
            0x0A => lines.push(
                "timeout: the cycle was lost and the context never recovered; suspect the skip path"
                    .to_string(),
            ),
            0x21 => lines.push("skip processing overflow: consecutive lost cycles".to_string()),
            _ => {}
        }
    }
    if let Some(pointer) = target.command_ptr {
        lines.push(format!("command pointer 0x{pointer:08X}"));
    }
    if target.dead {
        lines.push("context status: dead (hardware halted)".to_string());
    }

    let base = scan.base_address.or(base_address);
    let (Some(command_ptr), Some(base)) = (target.command_ptr, base) else {
        lines.push("missing command pointer or base address; cannot resolve the halted descriptor".to_string());
        return Report::done(lines, FaultClass::InsufficientData);
    };

    let pointer_address = command_ptr & !0xF;
    if pointer_address < base {
        lines.push(format!(
            "command pointer 0x{pointer_address:08X} lies before the program base 0x{base:08X}"
        ));
        return Report::done(lines, FaultClass::InsufficientData);
    }
    let offset = pointer_address - base;
    if offset % BLOCK_SIZE as u32 != 0 {
        lines.push(format!(
            "command pointer offset 0x{offset:X} is not on a 16-byte record boundary"
        ));
        return Report::done(lines, FaultClass::MisalignedCommandPtr);
    }

    let index = offset / BLOCK_SIZE as u32;
    lines.push(format!("halted at descriptor index {index} (offset 0x{offset:X})"));

    if index > 0 {
        if let Some(previous) = record(&scan, memory, index - 1) {
            let control = ControlWord::decode(previous[0]);
            if control.key == u8::from(DescriptorKey::Immediate) {
                lines.push(format!(
                    "index {index} is the second half of the immediate descriptor at index {}",
                    index - 1
                ));
            }
        }
    }

    let Some(words) = record(&scan, memory, index) else {
        lines.push(format!("no descriptor content recorded for index {index}"));
        return Report::done(lines, FaultClass::InsufficientData);
    };
    lines.push(format!(
        "descriptor words: ctl=0x{:08X} dat=0x{:08X} br=0x{:08X}",
        words[0], words[1], words[2]
    ));

    let classification = classify(words, &mut lines);
    Report::done(lines, classification)
}

fn is_critical(event: &TraceEvent) -> bool {
    event.dead
        || event
            .event_code
            .is_some_and(|code| !BENIGN_EVENT_CODES.contains(&code))
}

/// The first three words of the descriptor record at `index`: an inline
/// trace dump takes precedence over the memory image.
fn record(scan: &TraceScan, memory: Option<&[u8]>, index: u32) -> Option<[u32; 3]> {
    if let Some(&DumpRecord {
        control,
        data_address,
        branch,
    }) = scan.dumps.get(&index)
    {
        return Some([control, data_address, branch]);
    }
    let memory = memory?;
    let offset = index as usize * BLOCK_SIZE;
    let bytes = memory.get(offset..offset + BLOCK_SIZE)?;
    Some([
        u32::from_le_bytes(bytes[0..4].try_into().expect("4-byte slice")),
        u32::from_le_bytes(bytes[4..8].try_into().expect("4-byte slice")),
        u32::from_le_bytes(bytes[8..12].try_into().expect("4-byte slice")),
    ])
}

/// Pattern-matches the record against the known fault signatures.
fn classify(words: [u32; 3], lines: &mut Vec<String>) -> FaultClass {
    let control = ControlWord::decode(words[0]);
    match control.classify() {
        Some(kind) => lines.push(format!("type: {kind} (reqCount={})", control.req_count)),
        None => lines.push(format!(
            "type: unrecognized (cmd={:#x} key={:#x})",
            control.command, control.key
        )),
    }

    if words[0] == UNINITIALIZED_PATTERN {
        lines.push(
            "FAULT: uninitialized memory pattern; the descriptor was never written".to_string(),
        );
        return FaultClass::UninitializedDescriptor;
    }

    let standard_more = control.command == u8::from(Command::OutputMore)
        && control.key == u8::from(DescriptorKey::Standard);
    if standard_more {
        lines.push("standard OUTPUT_MORE: hardware does not interpret its branch field".to_string());
        return FaultClass::NoFaultDetected;
    }

    // Immediate-keyed records keep their pointer in the data slot.
    let branch_word = if control.key == u8::from(DescriptorKey::Immediate) {
        words[1]
    } else {
        words[2]
    };
    let pointer = BranchPointer::unpack(branch_word);

    if pointer.z == 0 {
        if control.command == u8::from(Command::OutputLast) {
            lines.push("zero-Z terminal: the context stopped where the program ends".to_string());
            return FaultClass::DeliberateStop;
        }
        lines.push("zero-Z pointer on a non-terminal descriptor".to_string());
        return FaultClass::NoFaultDetected;
    }
    if pointer.address == 0 {
        lines.push(
            "FAULT: null branch address with nonzero Z; the context has nowhere to go".to_string(),
        );
        if control.command == u8::from(Command::OutputMore)
            && control.key == u8::from(DescriptorKey::Immediate)
        {
            lines.push(
                "this is the skip slot of an OUTPUT_MORE-Immediate: the cycle was lost and the recovery address was never linked"
                    .to_string(),
            );
        }
        return FaultClass::NullBranchWithNonzeroZ;
    }

    lines.push(format!(
        "branch pointer 0x{:08X} (Z={}) looks intact",
        pointer.address, pointer.z
    ));
    FaultClass::NoFaultDetected
}
