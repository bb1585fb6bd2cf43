//! Report-supported-op-codes generator (C8, spec §4.5.11)
//!
//! Reached through MAINTENANCE IN (A3h) service action 0Ch. Walks a fixed
//! table of everything SNTL's dispatcher recognizes rather than probing
//! NVMe feature flags — every opcode in the table is unconditionally
//! implemented, so there is nothing to probe.

use crate::cdb::{CdbView, ScsiResult};
use crate::endian::put_be_u16;
use crate::sense::emit_invalid_field_in_cdb;
use crate::validate::validate_control_byte;

pub const MAINTENANCE_IN: u8 = 0xA3;
pub const REPORT_SUPPORTED_OPERATION_CODES: u8 = 0x0C;

mod reporting_option {
    pub const ALL: u8 = 0x00;
    pub const ONE_COMMAND: u8 = 0x01;
    pub const ONE_COMMAND_AND_SA: u8 = 0x02;
    pub const ONE_COMMAND_OR_SA: u8 = 0x03;
}

/// One row of the supported-opcode table: opcode, optional service action,
/// and the CDB length SNTL expects for it.
struct Entry {
    opcode: u8,
    service_action: Option<u16>,
    cdb_len: u8,
}

const fn op(opcode: u8, cdb_len: u8) -> Entry {
    Entry { opcode, service_action: None, cdb_len }
}

const fn op_sa(opcode: u8, sa: u16, cdb_len: u8) -> Entry {
    Entry { opcode, service_action: Some(sa), cdb_len }
}

/// Ascending by opcode then service action, matching spec.md §4.5.11.
const TABLE: &[Entry] = &[
    op(0x00, 6),  // TEST UNIT READY
    op(0x03, 6),  // REQUEST SENSE
    op(0x08, 6),  // READ(6)
    op(0x0A, 6),  // WRITE(6)
    op(0x12, 6),  // INQUIRY
    op(0x15, 6),  // MODE SELECT(6)
    op(0x1A, 6),  // MODE SENSE(6)
    op(0x1B, 6),  // START STOP UNIT
    op(0x1D, 6),  // SEND DIAGNOSTIC
    op(0x28, 10), // READ(10)
    op(0x2A, 10), // WRITE(10)
    op(0x2F, 10), // VERIFY(10)
    op(0x35, 10), // SYNCHRONIZE CACHE(10)
    op(0x3B, 10), // WRITE BUFFER
    op(0x3F, 10), // WRITE LONG(10)
    op(0x42, 10), // UNMAP
    op(0x4D, 10), // LOG SENSE
    op(0x55, 10), // MODE SELECT(10)
    op(0x5A, 10), // MODE SENSE(10)
    op(0x5E, 10), // PERSISTENT RESERVE IN
    op(0x5F, 10), // PERSISTENT RESERVE OUT
    op(0x88, 16), // READ(16)
    op(0x8A, 16), // WRITE(16)
    op(0x8F, 16), // VERIFY(16)
    op(0x91, 16), // SYNCHRONIZE CACHE(16)
    op(0x9E, 16), // READ CAPACITY(16)
    op(0xA0, 12), // REPORT LUNS
    op(0xA2, 12), // SECURITY PROTOCOL IN
    op_sa(0xA3, 0x0C, 12), // MAINTENANCE IN / REPORT SUPPORTED OPERATION CODES
    op(0xB5, 12), // SECURITY PROTOCOL OUT
];

fn find_entry(opcode: u8, service_action: Option<u16>) -> Option<&'static Entry> {
    TABLE.iter().find(|e| e.opcode == opcode && e.service_action == service_action)
}

fn write_descriptor(buf: &mut [u8], entry: &Entry) {
    if buf.len() < 8 {
        return;
    }
    buf[0] = entry.opcode;
    buf[1] = 0;
    let (sa, sa_valid) = match entry.service_action {
        Some(sa) => (sa, 1u8),
        None => (0, 0u8),
    };
    put_be_u16(&mut buf[2..4], sa);
    buf[4] = 0;
    buf[5] = sa_valid;
    put_be_u16(&mut buf[6..8], entry.cdb_len as u16);
}

/// Option 00h: walk the whole table. Returns the number of bytes written
/// (header + one 8-byte descriptor, +12 more when RCTD requests a timeout
/// descriptor, per command).
fn write_all(data: &mut [u8], rctd: bool) -> usize {
    let stride = if rctd { 20 } else { 8 };
    let mut offset = 4;
    for entry in TABLE {
        if offset + stride > data.len() {
            break;
        }
        write_descriptor(&mut data[offset..offset + 8], entry);
        if rctd {
            data[offset + 5] |= 0x02; // CTDP
            // 12-byte timeout descriptor; all-zero (no command-specific
            // timeout information to report).
        }
        offset += stride;
    }
    let command_data_length = (offset - 4) as u32;
    if data.len() >= 4 {
        put_be_u16(&mut data[2..4], (command_data_length & 0xFFFF) as u16);
        put_be_u16(&mut data[0..2], ((command_data_length >> 16) & 0xFFFF) as u16);
    }
    offset
}

/// Options 01h/02h/03h: a single opcode's CDB-mask descriptor.
fn write_one_command(data: &mut [u8], opcode: u8, service_action: Option<u16>, requested_option: u8) -> Option<usize> {
    let entry = find_entry(opcode, service_action)?;
    if data.len() < 4 {
        return Some(0);
    }
    let support = match requested_option {
        reporting_option::ONE_COMMAND_OR_SA if entry.service_action.is_none() && service_action.is_some() => 0b001,
        _ => 0b011,
    };
    data[1] = support;
    let cdb_len = entry.cdb_len as usize;
    put_be_u16(&mut data[2..4], cdb_len as u16);
    let mask_start = 4;
    if data.len() >= mask_start + cdb_len {
        let mask = &mut data[mask_start..mask_start + cdb_len];
        mask[0] = 0xFF;
        for b in mask.iter_mut().take(cdb_len - 1).skip(1) {
            *b = 0xFF;
        }
        mask[cdb_len - 1] = 0x07; // control byte: only vendor-specific/NACA/flag bits vary
        Some(mask_start + cdb_len)
    } else {
        Some(mask_start)
    }
}

pub fn report_supported_operation_codes(
    view: CdbView<'_>,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
) -> ScsiResult {
    if let Some(v) = validate_control_byte(view) {
        emit_invalid_field_in_cdb(sense, descriptor_format, v.field_pointer, v.bit_pointer);
        return ScsiResult::check_condition();
    }
    let reporting_option = view.byte(2) & 0x07;
    let requested_opcode = view.byte(3);
    let requested_sa = crate::endian::be_u16(&view.bytes[4..6]);
    let rctd = view.byte(2) & 0x80 != 0;

    for b in data.iter_mut() {
        *b = 0;
    }

    match reporting_option {
        reporting_option::ALL => {
            let len = write_all(data, rctd);
            ScsiResult::good_with_len(len)
        }
        reporting_option::ONE_COMMAND => {
            match write_one_command(data, requested_opcode, None, reporting_option) {
                Some(len) => ScsiResult::good_with_len(len),
                None => {
                    emit_invalid_field_in_cdb(sense, descriptor_format, 3, 7);
                    ScsiResult::check_condition()
                }
            }
        }
        reporting_option::ONE_COMMAND_AND_SA | reporting_option::ONE_COMMAND_OR_SA => {
            match write_one_command(data, requested_opcode, Some(requested_sa), reporting_option) {
                Some(len) => ScsiResult::good_with_len(len),
                None => {
                    emit_invalid_field_in_cdb(sense, descriptor_format, 3, 7);
                    ScsiResult::check_condition()
                }
            }
        }
        _ => {
            emit_invalid_field_in_cdb(sense, descriptor_format, 2, 2);
            ScsiResult::check_condition()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cdb(option: u8, opcode: u8, sa: u16, rctd: bool) -> [u8; 12] {
        let mut c = [0u8; 12];
        c[0] = MAINTENANCE_IN;
        c[1] = REPORT_SUPPORTED_OPERATION_CODES;
        c[2] = option | if rctd { 0x80 } else { 0 };
        c[3] = opcode;
        put_be_u16(&mut c[4..6], sa);
        c
    }

    #[test]
    fn option_all_walks_entire_table() {
        let cdb = cdb(reporting_option::ALL, 0, 0, false);
        let mut data = [0u8; 512];
        let mut sense = [0u8; 18];
        let r = report_supported_operation_codes(CdbView::new(&cdb), &mut data, &mut sense, false);
        assert_eq!(r.status, crate::sense::scsi_status::GOOD);
        let expected_bytes = TABLE.len() * 8;
        assert_eq!(crate::endian::be_u32(&data[0..4]) as usize, expected_bytes);
        assert_eq!(data[4], 0x00); // first entry: TEST UNIT READY
    }

    #[test]
    fn option_all_with_rctd_appends_timeout_descriptors() {
        let cdb = cdb(reporting_option::ALL, 0, 0, true);
        let mut data = [0u8; 1024];
        let mut sense = [0u8; 18];
        let r = report_supported_operation_codes(CdbView::new(&cdb), &mut data, &mut sense, false);
        assert_eq!(r.status, crate::sense::scsi_status::GOOD);
        assert_eq!(data[4 + 5] & 0x02, 0x02); // CTDP set on first descriptor
    }

    #[test]
    fn option_one_command_reports_cdb_mask_for_inquiry() {
        let cdb = cdb(reporting_option::ONE_COMMAND, 0x12, 0, false);
        let mut data = [0u8; 32];
        let mut sense = [0u8; 18];
        let r = report_supported_operation_codes(CdbView::new(&cdb), &mut data, &mut sense, false);
        assert_eq!(r.status, crate::sense::scsi_status::GOOD);
        assert_eq!(data[1] & 0x03, 0x03);
        assert_eq!(crate::endian::be_u16(&data[2..4]), 6);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let cdb = cdb(reporting_option::ONE_COMMAND, 0xFE, 0, false);
        let mut data = [0u8; 32];
        let mut sense = [0u8; 18];
        let r = report_supported_operation_codes(CdbView::new(&cdb), &mut data, &mut sense, false);
        assert_eq!(r.status, crate::sense::scsi_status::CHECK_CONDITION);
    }

    #[test]
    fn maintenance_in_with_service_action_is_found_in_table() {
        assert!(find_entry(MAINTENANCE_IN, Some(REPORT_SUPPORTED_OPERATION_CODES as u16)).is_some());
    }
}
