//! Field extraction from free-form controller trace text.
//!
//! Traces are line-oriented and come from ad hoc logging, so nothing here is
//! a grammar: each field is an independent, optional extraction attempt over
//! the line, and a line contributes whatever fields it happens to carry.
//! Keys are matched case-insensitively, values are `0x` hex or decimal.

use ahash::AHashMap;

/// One trace line that carried at least one field of interest.
#[derive(Debug, Clone)]
pub(crate) struct TraceEvent {
    pub event_code: Option<u32>,
    pub command_ptr: Option<u32>,
    pub dead: bool,
    pub line_no: usize,
    pub text: String,
}

/// An inline descriptor dump: the first three words of a record as logged by
/// the driver (`IT: @index ctl=… dat=… br=…`).
#[derive(Debug, Clone, Copy)]
pub(crate) struct DumpRecord {
    pub control: u32,
    pub data_address: u32,
    pub branch: u32,
}

/// Everything one pass over the trace text yields.
#[derive(Debug)]
pub(crate) struct TraceScan {
    pub events: Vec<TraceEvent>,
    pub dumps: AHashMap<u32, DumpRecord>,
    pub base_address: Option<u32>,
}

pub(crate) fn scan(text: &str) -> TraceScan {
    let mut events = Vec::new();
    let mut dumps = AHashMap::new();
    let mut base_address = None;

    for (index, line) in text.lines().enumerate() {
        let event_code = field_value(line, &["eventcode", "evt", "status"], false);
        let command_ptr = field_value(line, &["commandptr", "cmdptr"], true);
        let dead = dead_flag(line);
        if event_code.is_some() || command_ptr.is_some() || dead {
            events.push(TraceEvent {
                event_code,
                command_ptr,
                dead,
                line_no: index + 1,
                text: line.to_string(),
            });
        }

        if base_address.is_none() {
            base_address = field_value(line, &["baseaddress", "base"], true);
        }

        if let Some((dump_index, record)) = dump_record(line) {
            dumps.insert(dump_index, record);
        }
    }

    TraceScan {
        events,
        dumps,
        base_address,
    }
}

/// Finds the first `key [:=] value` occurrence for any of `keys` and parses
/// the value. With `require_hex`, only `0x`-prefixed values count (addresses
/// are never logged in decimal).
fn field_value(line: &str, keys: &[&str], require_hex: bool) -> Option<u32> {
    let lower = line.to_ascii_lowercase();
    for key in keys {
        let mut search = 0;
        while let Some(pos) = lower[search..].find(key) {
            let at = search + pos;
            if let Some(value) = value_after(line, at + key.len(), require_hex) {
                return Some(value);
            }
            search = at + key.len();
        }
    }
    None
}

/// Parses `[ws] (:|=) [ws] number` starting at byte offset `from`.
fn value_after(line: &str, from: usize, require_hex: bool) -> Option<u32> {
    let bytes = line.as_bytes();
    let mut i = from;
    while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
        i += 1;
    }
    if i >= bytes.len() || (bytes[i] != b':' && bytes[i] != b'=') {
        return None;
    }
    i += 1;
    while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
        i += 1;
    }
    parse_number(&line[i..], require_hex)
}

/// Leading `0x` hex or decimal number at the start of `s`.
fn parse_number(s: &str, require_hex: bool) -> Option<u32> {
    if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        let end = rest
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or(rest.len());
        if end == 0 {
            return None;
        }
        return u32::from_str_radix(&rest[..end], 16).ok();
    }
    if require_hex {
        return None;
    }
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    s[..end].parse().ok()
}

/// `dead [:=] 1` with a word boundary on the left, so `isdead`-style tokens
/// do not trigger.
fn dead_flag(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut search = 0;
    while let Some(pos) = lower[search..].find("dead") {
        let at = search + pos;
        let boundary =
            at == 0 || !(bytes[at - 1].is_ascii_alphanumeric() || bytes[at - 1] == b'_');
        if boundary {
            if value_after(line, at + 4, false) == Some(1) {
                return true;
            }
        }
        search = at + 4;
    }
    false
}

/// `IT: @index ctl=0x… dat=0x… br=0x…`. All four pieces must be present for
/// the line to count as a dump.
fn dump_record(line: &str) -> Option<(u32, DumpRecord)> {
    let lower = line.to_ascii_lowercase();
    let bytes = line.as_bytes();
    let mut search = 0;
    while let Some(pos) = lower[search..].find("it:") {
        let at = search + pos;
        search = at + 3;
        let boundary =
            at == 0 || !(lower.as_bytes()[at - 1].is_ascii_alphanumeric() || bytes[at - 1] == b'_');
        if !boundary {
            continue;
        }
        let mut i = at + 3;
        while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'@' {
            continue;
        }
        i += 1;
        let rest = &line[i..];
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            continue;
        }
        let Ok(index) = rest[..digits].parse::<u32>() else {
            continue;
        };
        let fields = &rest[digits..];
        let control = field_value(fields, &["ctl"], true)?;
        let data_address = field_value(fields, &["dat"], true)?;
        let branch = field_value(fields, &["br"], true)?;
        return Some((
            index,
            DumpRecord {
                control,
                data_address,
                branch,
            },
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_event_fields() {
        let scan = scan("IT ctx 0: eventCode=0x0A CommandPtr=0x80000033 dead=1\n");
        assert_eq!(scan.events.len(), 1);
        let event = &scan.events[0];
        assert_eq!(event.event_code, Some(0x0A));
        assert_eq!(event.command_ptr, Some(0x8000_0033));
        assert!(event.dead);
        assert_eq!(event.line_no, 1);
    }

    #[test]
    fn accepts_alternate_keys_and_decimal_codes() {
        let scan = scan("ctx status: 2\ncmdPtr = 0x80000010\n");
        assert_eq!(scan.events.len(), 2);
        assert_eq!(scan.events[0].event_code, Some(2));
        assert_eq!(scan.events[1].command_ptr, Some(0x8000_0010));
    }

    #[test]
    fn command_ptr_requires_hex() {
        let scan = scan("CommandPtr=12345\n");
        assert!(scan.events.is_empty());
    }

    #[test]
    fn dead_needs_a_word_boundary_and_value_one() {
        assert!(!scan("isdead=1\n").events.iter().any(|e| e.dead));
        assert!(!scan("dead=0\n").events.iter().any(|e| e.dead));
        assert!(scan("ctx dead: 1\n").events[0].dead);
    }

    #[test]
    fn first_base_address_wins() {
        let scan = scan("base = 0x80000000\nbase = 0x90000000\n");
        assert_eq!(scan.base_address, Some(0x8000_0000));
    }

    #[test]
    fn parses_descriptor_dump_lines() {
        let scan = scan("IT: @3 ctl=0x123C0008 dat=0x80010000 br=0x80000033\n");
        let record = scan.dumps.get(&3).expect("dump at index 3");
        assert_eq!(record.control, 0x123C_0008);
        assert_eq!(record.data_address, 0x8001_0000);
        assert_eq!(record.branch, 0x8000_0033);
    }

    #[test]
    fn wait_lines_are_not_dumps() {
        let scan = scan("wait: @3 ctl=0x1 dat=0x2 br=0x3\n");
        assert!(scan.dumps.is_empty());
    }

    #[test]
    fn irrelevant_lines_yield_nothing() {
        let scan = scan("bus reset complete\ncycle timer rolled over\n");
        assert!(scan.events.is_empty());
        assert!(scan.dumps.is_empty());
        assert_eq!(scan.base_address, None);
    }
}
