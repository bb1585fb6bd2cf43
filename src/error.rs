//! Error types for SNTL translation

use thiserror::Error;

use crate::cdb::CdbView;

/// SNTL errors
///
/// These are reserved for contract violations the translator itself cannot
/// recover from — they are not how SCSI-mappable failures reach the host.
/// A well-formed CDB that hits a mappable NVMe condition always yields
/// `Ok(status)` plus populated sense bytes (see [`crate::sense`]).
#[derive(Debug, Error)]
pub enum SntlError {
    #[error("sense buffer too small: need at least {need} bytes, have {have}")]
    SenseBufferTooSmall { need: usize, have: usize },

    #[error("CDB too short: opcode {opcode:#04x} requires at least {need} bytes, got {got}")]
    CdbTooShort { opcode: u8, need: usize, got: usize },

    #[error("unsupported CDB length {0} bytes")]
    UnsupportedCdbLength(usize),

    #[error("data buffer too small for this command: need {need} bytes, have {have}")]
    DataBufferTooSmall { need: usize, have: usize },

    #[error("transport returned a status SNTL has no mapping table for: SCT={sct:#x} SC={sc:#x}")]
    UnmappedStatus { sct: u8, sc: u8 },

    #[error("identify data not yet cached for this device context")]
    IdentifyNotCached,
}

/// Result type for SNTL operations
pub type SntlResult<T> = Result<T, SntlError>;

/// Reject a CDB shorter than its opcode's group code requires, before any
/// command handler indexes past the bytes actually present.
pub fn check_cdb_len(view: CdbView<'_>, required: usize) -> SntlResult<()> {
    if view.len() < required {
        Err(SntlError::CdbTooShort {
            opcode: view.opcode(),
            need: required,
            got: view.len(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_cdb_is_rejected() {
        let cdb = [0x28, 0, 0, 0]; // READ(10) needs 10 bytes, only 4 given
        let err = check_cdb_len(CdbView::new(&cdb), 10).unwrap_err();
        assert!(matches!(err, SntlError::CdbTooShort { opcode: 0x28, need: 10, got: 4 }));
    }

    #[test]
    fn full_length_cdb_is_accepted() {
        let cdb = [0u8; 10];
        assert!(check_cdb_len(CdbView::new(&cdb), 10).is_ok());
    }
}
