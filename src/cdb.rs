//! CDB framing and the per-call I/O context the host hands to `translate`.

use std::time::Duration;

/// Data-transfer direction for a SCSI command, as conveyed by the host
/// driver alongside the CDB (it is not itself part of the CDB bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    None,
    ToDevice,
    FromDevice,
    Bidirectional,
}

/// A parsed view over a CDB byte slice.
///
/// Opcode is always byte 0. The control byte's offset depends on CDB
/// length: last byte for fixed-length CDBs, byte 1 for the two
/// variable-length opcodes (7Eh, 7Fh) per spec.md §3/§4.3.
#[derive(Debug, Clone, Copy)]
pub struct CdbView<'a> {
    pub bytes: &'a [u8],
}

impl<'a> CdbView<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn opcode(&self) -> u8 {
        self.bytes[0]
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Offset of the control byte within this CDB.
    pub fn control_offset(&self) -> usize {
        match self.opcode() {
            0x7E | 0x7F => 1,
            _ => self.bytes.len().saturating_sub(1),
        }
    }

    pub fn control_byte(&self) -> u8 {
        self.bytes[self.control_offset()]
    }

    pub fn byte(&self, idx: usize) -> u8 {
        self.bytes[idx]
    }
}

/// The CDB length implied by an opcode's SPC-4 group code (bits 7:5 of
/// byte 0). `None` for group codes 3, 6, 7 (reserved/vendor-specific) —
/// SNTL implements no opcode in those groups.
pub fn expected_cdb_len(opcode: u8) -> Option<usize> {
    match opcode >> 5 {
        0b000 => Some(6),
        0b001 | 0b010 => Some(10),
        0b100 => Some(16),
        0b101 => Some(12),
        _ => None,
    }
}

/// The full per-call context a host driver passes to [`crate::dispatch::translate`].
pub struct ScsiIo<'a> {
    pub cdb: &'a [u8],
    pub direction: Direction,
    pub data: &'a mut [u8],
    pub data_len: usize,
    pub sense: &'a mut [u8],
    pub timeout: Duration,
    /// Set by the host for WRITE BUFFER firmware-download segments; SNTL
    /// never infers this (spec.md Design Notes, "final segment").
    pub first_segment: bool,
    pub last_segment: bool,
}

impl<'a> ScsiIo<'a> {
    pub fn cdb_view(&self) -> CdbView<'_> {
        CdbView::new(self.cdb)
    }
}

/// Outcome of a single translation call.
///
/// `status` is the SCSI status byte (`GOOD`, `CHECK_CONDITION`, …, see
/// [`crate::sense::scsi_status`]); sense bytes, when relevant, have
/// already been written into `io.sense` by the handler — or, if the host
/// passed a zero-length `sense` slice, into the device context's
/// `fallback_sense` scratch buffer instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScsiResult {
    pub status: u8,
    /// Number of bytes written into `io.data`, for data-in commands.
    pub data_out_len: usize,
}

impl ScsiResult {
    pub fn good() -> Self {
        Self {
            status: crate::sense::scsi_status::GOOD,
            data_out_len: 0,
        }
    }

    pub fn good_with_len(len: usize) -> Self {
        Self {
            status: crate::sense::scsi_status::GOOD,
            data_out_len: len,
        }
    }

    pub fn check_condition() -> Self {
        Self {
            status: crate::sense::scsi_status::CHECK_CONDITION,
            data_out_len: 0,
        }
    }
}
