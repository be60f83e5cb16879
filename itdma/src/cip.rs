//! Construction of CIP header quadlets (IEC 61883-1, AM824 payloads).
//!
//! The program core embeds these quadlets opaquely; this module exists for
//! callers assembling packet intents, typically continuing the data-block
//! counter exposed by [`crate::ProgramBuilder::dbc`]. Both quadlets are
//! produced in wire (big-endian) value form.

use thiserror::Error;

use crate::descriptor::CipHeader;

/// FMT code for the Audio & Music protocol (IEC 61883-6).
pub const FMT_AM824: u8 = 0x10;

/// FDF codes for the common AM824 sample rates.
pub const FDF_AM824_44K: u8 = 0x00;
pub const FDF_AM824_48K: u8 = 0x02;
pub const FDF_AM824_96K: u8 = 0x04;

/// SYT value meaning "no timestamp".
pub const SYT_NONE: u16 = 0xFFFF;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipError {
    #[error("no AM824 FDF code for sample rate {0} Hz")]
    UnsupportedRate(u32),
}

/// The fields of the two CIP quadlets. Defaults follow the usual AM824
/// stream: placeholder source ID (patched by the device), 8-quadlet data
/// blocks, 48 kHz, no timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipFields {
    /// Source node ID (6 bits).
    pub sid: u8,
    /// Data block size in quadlets.
    pub dbs: u8,
    /// Fraction number (2 bits).
    pub fraction: u8,
    /// Quadlet padding count (3 bits).
    pub qpc: u8,
    /// Source packet header present.
    pub sph: bool,
    /// Data block continuity counter.
    pub dbc: u8,
    /// Format ID (6 bits).
    pub fmt: u8,
    /// Format dependent field.
    pub fdf: u8,
    /// Synchronization timestamp.
    pub syt: u16,
}

impl Default for CipFields {
    fn default() -> Self {
        Self {
            sid: 0x3F,
            dbs: 8,
            fraction: 0,
            qpc: 0,
            sph: false,
            dbc: 0,
            fmt: FMT_AM824,
            fdf: FDF_AM824_48K,
            syt: SYT_NONE,
        }
    }
}

impl CipFields {
    /// Quadlet 0: `EOH=00 | SID | DBS | FN | QPC | SPH | rsv | DBC`.
    pub fn quadlet0(&self) -> u32 {
        let mut q0 = 0u32;
        q0 |= (self.sid as u32 & 0x3F) << 24;
        q0 |= (self.dbs as u32) << 16;
        q0 |= (self.fraction as u32 & 0x3) << 14;
        q0 |= (self.qpc as u32 & 0x7) << 11;
        q0 |= (self.sph as u32) << 10;
        q0 |= self.dbc as u32;
        q0
    }

    /// Quadlet 1: `EOH=10 | FMT | FDF | SYT`.
    pub fn quadlet1(&self) -> u32 {
        let mut q1 = 0b10u32 << 30;
        q1 |= (self.fmt as u32 & 0x3F) << 24;
        q1 |= (self.fdf as u32) << 16;
        q1 |= self.syt as u32;
        q1
    }

    /// Both quadlets, ready to embed in a packet intent.
    pub fn header(&self) -> CipHeader {
        CipHeader::new(self.quadlet0(), self.quadlet1())
    }
}

/// FDF code for an AM824 sample rate (IEC 61883-6).
pub fn fdf_for_rate(sample_rate: u32) -> Result<u8, CipError> {
    match sample_rate {
        32_000 => Ok(0x03),
        44_100 => Ok(FDF_AM824_44K),
        48_000 => Ok(FDF_AM824_48K),
        88_200 => Ok(0x01),
        96_000 => Ok(FDF_AM824_96K),
        176_400 => Ok(0x05),
        192_000 => Ok(0x06),
        other => Err(CipError::UnsupportedRate(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quadlet0_packs_the_dbc() {
        let fields = CipFields {
            dbc: 0xA5,
            ..CipFields::default()
        };
        let q0 = fields.quadlet0();
        assert_eq!(q0 & 0xFF, 0xA5);
        // EOH of quadlet 0 is 00.
        assert_eq!(q0 >> 30, 0b00);
        assert_eq!((q0 >> 24) & 0x3F, 0x3F);
        assert_eq!((q0 >> 16) & 0xFF, 8);
    }

    #[test]
    fn quadlet1_packs_fmt_fdf_syt() {
        let fields = CipFields {
            fdf: FDF_AM824_96K,
            syt: 0x1234,
            ..CipFields::default()
        };
        let q1 = fields.quadlet1();
        assert_eq!(q1 >> 30, 0b10);
        assert_eq!((q1 >> 24) & 0x3F, FMT_AM824 as u32);
        assert_eq!((q1 >> 16) & 0xFF, FDF_AM824_96K as u32);
        assert_eq!(q1 & 0xFFFF, 0x1234);
    }

    #[test]
    fn fdf_lookup() {
        assert_eq!(fdf_for_rate(48_000), Ok(FDF_AM824_48K));
        assert_eq!(fdf_for_rate(192_000), Ok(0x06));
        assert_eq!(fdf_for_rate(22_050), Err(CipError::UnsupportedRate(22_050)));
    }
}
