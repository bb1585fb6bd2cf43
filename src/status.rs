//! NVMe-status → sense mapper (C2)
//!
//! Decodes SCT/SC out of an NVMe completion DWord into (sense key, ASC,
//! ASCQ) and writes sense bytes via [`crate::sense`]. Spec.md §4.2.

use crate::sense::{emit_sense, sense_key, SenseDescriptor};
use crate::transport::NvmeCompletion;

/// Generic command status (SCT=0), NVMe Base Specification Figure "Generic
/// Command Status Values".
mod generic {
    pub const SUCCESS: u8 = 0x00;
    pub const INVALID_OPCODE: u8 = 0x01;
    pub const INVALID_FIELD: u8 = 0x02;
    pub const DATA_TRANSFER_ERROR: u8 = 0x04;
    pub const POWER_LOSS_ABORT: u8 = 0x05;
    pub const INTERNAL_ERROR: u8 = 0x06;
    pub const ABORT_REQUESTED: u8 = 0x07;
    pub const ABORT_SQ_DELETED: u8 = 0x08;
    pub const ABORT_FAILED_FUSED: u8 = 0x09;
    pub const ABORT_MISSING_FUSED: u8 = 0x0A;
    pub const LBA_OUT_OF_RANGE: u8 = 0x80;
    pub const NAMESPACE_NOT_READY: u8 = 0x82;
    pub const FORMAT_IN_PROGRESS: u8 = 0x84;
    pub const SANITIZE_IN_PROGRESS: u8 = 0x1D;
    pub const SANITIZE_FAILED: u8 = 0x1C;
}

/// Command-specific status (SCT=1).
mod command_specific {
    pub const INVALID_FORMAT: u8 = 0x0A;
    pub const SELF_TEST_IN_PROGRESS: u8 = 0x1D;
    pub const CONFLICTING_ATTRIBUTES: u8 = 0x80;
    pub const WRITE_TO_RO_RANGE: u8 = 0x82;
}

/// Media and data integrity status (SCT=2).
mod media {
    pub const WRITE_FAULT: u8 = 0x80;
    pub const UNRECOVERED_READ: u8 = 0x81;
    pub const GUARD_CHECK: u8 = 0x82;
    pub const APP_TAG_CHECK: u8 = 0x83;
    pub const REF_TAG_CHECK: u8 = 0x84;
    pub const COMPARE_FAILURE: u8 = 0x85;
    pub const ACCESS_DENIED: u8 = 0x86;
}

/// Map an NVMe completion directly into sense bytes.
pub fn map_status_to_sense(completion: NvmeCompletion, sense_buf: &mut [u8], descriptor_format: bool) {
    let (key, asc, ascq, progress) = classify(completion);
    if let Some(p) = progress {
        emit_sense(
            sense_buf,
            key,
            asc,
            ascq,
            descriptor_format,
            &[SenseDescriptor::Progress { progress: p }],
        );
    } else {
        emit_sense(sense_buf, key, asc, ascq, descriptor_format, &[]);
    }
}

/// Classify a completion into (sense key, ASC, ASCQ, optional progress).
pub fn classify(completion: NvmeCompletion) -> (u8, u8, u8, Option<u16>) {
    if completion.is_success() {
        return (sense_key::NO_SENSE, 0, 0, None);
    }
    let sct = completion.sct();
    let sc = completion.sc();

    if sct == 7 {
        return (sense_key::VENDOR_SPECIFIC, 0, 0, None);
    }

    match sct {
        0 => generic_table(sc, completion.dnr()),
        1 => command_specific_table(sc),
        2 => media_table(sc),
        _ => {
            if sc >= 0xC0 {
                (sense_key::VENDOR_SPECIFIC, 0, 0, None)
            } else {
                (sense_key::ABORTED_COMMAND, 0, 0, None)
            }
        }
    }
}

fn generic_table(sc: u8, dnr: bool) -> (u8, u8, u8, Option<u16>) {
    use generic::*;
    match sc {
        SUCCESS => (sense_key::NO_SENSE, 0, 0, None),
        INVALID_OPCODE => (sense_key::ILLEGAL_REQUEST, 0x20, 0x00, None),
        INVALID_FIELD => (sense_key::ILLEGAL_REQUEST, 0x24, 0x00, None),
        DATA_TRANSFER_ERROR => (sense_key::MEDIUM_ERROR, 0, 0, None),
        POWER_LOSS_ABORT => (sense_key::ABORTED_COMMAND, 0x0B, 0x08, None),
        INTERNAL_ERROR => (sense_key::HARDWARE_ERROR, 0x44, 0x00, None),
        ABORT_REQUESTED | ABORT_SQ_DELETED | ABORT_FAILED_FUSED | ABORT_MISSING_FUSED => {
            (sense_key::ABORTED_COMMAND, 0, 0, None)
        }
        LBA_OUT_OF_RANGE => (sense_key::ILLEGAL_REQUEST, 0x21, 0x00, None),
        NAMESPACE_NOT_READY => {
            if dnr {
                (sense_key::NOT_READY, 0x04, 0x01, None)
            } else {
                (sense_key::NOT_READY, 0x04, 0x00, None)
            }
        }
        FORMAT_IN_PROGRESS => (sense_key::NOT_READY, 0x04, 0x04, None),
        SANITIZE_IN_PROGRESS => (sense_key::NOT_READY, 0x04, 0x1B, None),
        SANITIZE_FAILED => (sense_key::MEDIUM_ERROR, 0x31, 0x03, None),
        sc if sc >= 0xC0 => (sense_key::VENDOR_SPECIFIC, 0, 0, None),
        _ => (sense_key::ABORTED_COMMAND, 0, 0, None),
    }
}

fn command_specific_table(sc: u8) -> (u8, u8, u8, Option<u16>) {
    use command_specific::*;
    match sc {
        INVALID_FORMAT => (sense_key::MEDIUM_ERROR, 0x31, 0x01, None),
        SELF_TEST_IN_PROGRESS => (sense_key::NOT_READY, 0x04, 0x09, None),
        CONFLICTING_ATTRIBUTES => (sense_key::ILLEGAL_REQUEST, 0x24, 0x00, None),
        WRITE_TO_RO_RANGE => (sense_key::DATA_PROTECT, 0x27, 0x00, None),
        sc if sc >= 0xC0 => (sense_key::VENDOR_SPECIFIC, 0, 0, None),
        _ => (sense_key::ABORTED_COMMAND, 0, 0, None),
    }
}

fn media_table(sc: u8) -> (u8, u8, u8, Option<u16>) {
    use media::*;
    match sc {
        WRITE_FAULT => (sense_key::MEDIUM_ERROR, 0x03, 0x00, None),
        UNRECOVERED_READ => (sense_key::MEDIUM_ERROR, 0x11, 0x00, None),
        GUARD_CHECK => (sense_key::MEDIUM_ERROR, 0x10, 0x01, None),
        APP_TAG_CHECK => (sense_key::MEDIUM_ERROR, 0x10, 0x02, None),
        REF_TAG_CHECK => (sense_key::MEDIUM_ERROR, 0x10, 0x03, None),
        COMPARE_FAILURE => (sense_key::MISCOMPARE, 0x1D, 0x00, None),
        ACCESS_DENIED => (sense_key::DATA_PROTECT, 0x20, 0x02, None),
        sc if sc >= 0xC0 => (sense_key::VENDOR_SPECIFIC, 0, 0, None),
        _ => (sense_key::ABORTED_COMMAND, 0, 0, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(sct: u8, sc: u8, dnr: bool) -> NvmeCompletion {
        let mut dw = ((sct as u32 & 0x7) << 25) | ((sc as u32 & 0xFF) << 17);
        if dnr {
            dw |= 1 << 31;
        }
        NvmeCompletion::new(dw, 0)
    }

    #[test]
    fn success_is_no_sense() {
        let c = completion(0, 0, false);
        let mut buf = [0xFFu8; 18];
        map_status_to_sense(c, &mut buf, false);
        assert_eq!(buf[2], sense_key::NO_SENSE);
        assert_eq!(buf[12], 0);
        assert_eq!(buf[13], 0);
    }

    #[test]
    fn invalid_opcode_maps_to_illegal_request() {
        let (key, asc, ascq, _) = classify(completion(0, generic::INVALID_OPCODE, false));
        assert_eq!(key, sense_key::ILLEGAL_REQUEST);
        assert_eq!(asc, 0x20);
        assert_eq!(ascq, 0x00);
    }

    #[test]
    fn namespace_not_ready_dnr_changes_ascq() {
        let (_, asc, ascq_no_dnr, _) = classify(completion(0, generic::NAMESPACE_NOT_READY, false));
        let (_, _, ascq_dnr, _) = classify(completion(0, generic::NAMESPACE_NOT_READY, true));
        assert_eq!(asc, 0x04);
        assert_eq!(ascq_no_dnr, 0x00);
        assert_eq!(ascq_dnr, 0x01);
    }

    #[test]
    fn vendor_specific_sct_is_always_vendor_specific() {
        let (key, asc, ascq, _) = classify(completion(7, 0x55, false));
        assert_eq!(key, sense_key::VENDOR_SPECIFIC);
        assert_eq!(asc, 0);
        assert_eq!(ascq, 0);
    }

    #[test]
    fn media_guard_check_maps_correctly() {
        let (key, asc, ascq, _) = classify(completion(2, media::GUARD_CHECK, false));
        assert_eq!(key, sense_key::MEDIUM_ERROR);
        assert_eq!(asc, 0x10);
        assert_eq!(ascq, 0x01);
    }

    #[test]
    fn compare_failure_is_miscompare() {
        let (key, asc, ascq, _) = classify(completion(2, media::COMPARE_FAILURE, false));
        assert_eq!(key, sense_key::MISCOMPARE);
        assert_eq!(asc, 0x1D);
        assert_eq!(ascq, 0x00);
    }

    #[test]
    fn high_sc_values_fall_to_vendor_specific() {
        let (key, ..) = classify(completion(3, 0xC5, false));
        assert_eq!(key, sense_key::VENDOR_SPECIFIC);
    }
}
