//! REQUEST SENSE (C5, spec §4.5.5)
//!
//! SNTL carries no autosense buffer of its own — each REQUEST SENSE probes
//! live controller state in priority order rather than replaying a stored
//! sense from the command that preceded it (spec.md §4.5.5).

use std::time::Duration;

use crate::cdb::{CdbView, ScsiResult};
use crate::endian::le_u16;
use crate::identify::DeviceCtx;
use crate::log_sense::{nvme_log, read_log_page};
use crate::sense::{emit_sense, sense_key, SenseDescriptor};
use crate::transport::{admin_opcode, BufDir, NvmeTransport};
use crate::validate::validate_control_byte;

pub const REQUEST_SENSE: u8 = 0x03;

pub fn request_sense<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    view: CdbView<'_>,
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    if let Some(v) = validate_control_byte(view) {
        crate::sense::emit_invalid_field_in_cdb(sense, descriptor_format, v.field_pointer, v.bit_pointer);
        return ScsiResult::check_condition();
    }

    let _ = ctx;

    let mut sanitize_log = [0u8; 32];
    read_log_page(transport, nvme_log::SANITIZE_STATUS, &mut sanitize_log, timeout);
    let sstat = le_u16(&sanitize_log[2..4]) & 0x07;
    if sstat == 0x02 {
        let sprog = le_u16(&sanitize_log[0..2]);
        emit_sense(
            sense,
            sense_key::NOT_READY,
            0x04,
            0x1B,
            descriptor_format,
            &[SenseDescriptor::Progress { progress: sprog }],
        );
        return ScsiResult::good();
    }
    if sstat == 0x03 {
        emit_sense(sense, sense_key::MEDIUM_ERROR, 0x31, 0x03, descriptor_format, &[]);
        return ScsiResult::good();
    }

    let mut self_test_log = [0u8; 4];
    read_log_page(transport, nvme_log::DEVICE_SELF_TEST, &mut self_test_log, timeout);
    if self_test_log[0] != 0 {
        let percent = self_test_log[1].min(100) as u32;
        let progress = (656u32.saturating_mul(percent)).min(0xFFFF) as u16;
        emit_sense(
            sense,
            sense_key::NOT_READY,
            0x04,
            0x09,
            descriptor_format,
            &[SenseDescriptor::Progress { progress }],
        );
        return ScsiResult::good();
    }

    let completion = transport.issue_admin(
        admin_opcode::GET_FEATURES,
        0,
        [0x02, 0, 0, 0, 0, 0],
        BufDir::None,
        timeout,
    );
    if completion.result_dword != 0 {
        emit_sense(sense, sense_key::NO_SENSE, 0x5E, 0x00, descriptor_format, &[]);
    } else {
        emit_sense(sense, sense_key::NO_SENSE, 0x00, 0x00, descriptor_format, &[]);
    }
    ScsiResult::good()
}
