//! WRITE BUFFER (C5, spec §4.5.7)
//!
//! Modes 05h/0Dh/0Eh/0Fh are the firmware-download/activate surface; every
//! other mode SNTL declines since NVMe has no general-purpose buffer-write
//! equivalent.

use std::time::Duration;

use crate::cdb::{CdbView, ScsiResult};
use crate::endian::be_u24;
use crate::identify::DeviceCtx;
use crate::sense::{emit_invalid_field_in_cdb, emit_sense, sense_key};
use crate::status::map_status_to_sense;
use crate::transport::{admin_opcode, BufDir, NvmeTransport, ResetKind};
use crate::validate::validate_control_byte;

pub const WRITE_BUFFER: u8 = 0x3B;

pub mod mode {
    pub const DOWNLOAD_AND_ACTIVATE: u8 = 0x05;
    pub const DOWNLOAD_OFFSETS_SAVE: u8 = 0x0D;
    pub const DOWNLOAD_OFFSETS: u8 = 0x0E;
    pub const ACTIVATE_DEFERRED: u8 = 0x0F;
}

fn granularity_bytes(fwug: u8) -> u32 {
    match fwug {
        0x00 => 4096,
        0xFF => 1,
        n => (n as u32) * 4096,
    }
}

pub fn write_buffer<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    view: CdbView<'_>,
    data: &[u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    if let Some(v) = validate_control_byte(view) {
        emit_invalid_field_in_cdb(sense, descriptor_format, v.field_pointer, v.bit_pointer);
        return ScsiResult::check_condition();
    }
    let buffer_mode = view.byte(1) & 0x1F;
    let buffer_id = view.byte(2);
    let offset = be_u24(&view.bytes[3..6]);
    let length = be_u24(&view.bytes[6..9]);

    match buffer_mode {
        mode::DOWNLOAD_AND_ACTIVATE => download_and_activate(ctx, transport, offset, length, data, sense, descriptor_format, timeout),
        mode::DOWNLOAD_OFFSETS_SAVE | mode::DOWNLOAD_OFFSETS => {
            download_only(ctx, transport, offset, length, data, sense, descriptor_format, timeout)
        }
        mode::ACTIVATE_DEFERRED => activate_deferred(ctx, transport, buffer_id, sense, descriptor_format, timeout),
        _ => {
            emit_invalid_field_in_cdb(sense, descriptor_format, 1, 4);
            ScsiResult::check_condition()
        }
    }
}

fn download_and_activate<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    offset: u32,
    length: u32,
    data: &[u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    let numd = (length / 4).saturating_sub(1);
    let completion = transport.issue_admin(
        admin_opcode::FIRMWARE_IMAGE_DOWNLOAD,
        0,
        [numd, offset / 4, 0, 0, 0, 0],
        BufDir::Out(data),
        timeout,
    );
    if !completion.is_success() {
        map_status_to_sense(completion, sense, descriptor_format);
        return ScsiResult::check_condition();
    }

    let action = if ctx.controller.firmware_activate_without_reset() {
        0x03 // activate immediate, image already resident at the target slot
    } else {
        0x01 // replace image, activate on next reset
    };
    let commit = transport.issue_admin(
        admin_opcode::FIRMWARE_COMMIT,
        0,
        [action, 0, 0, 0, 0, 0],
        BufDir::None,
        timeout,
    );
    if !commit.is_success() {
        map_status_to_sense(commit, sense, descriptor_format);
        return ScsiResult::check_condition();
    }
    if matches!(commit.sc(), 0x20 | 0x21) {
        transport.reset(ResetKind::Controller);
    }
    ScsiResult::good()
}

fn download_only<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    offset: u32,
    length: u32,
    data: &[u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    let granularity = granularity_bytes(ctx.controller.fwug);
    if offset % granularity != 0 || length % granularity != 0 {
        emit_sense(sense, sense_key::ILLEGAL_REQUEST, 0x24, 0x00, descriptor_format, &[]);
        return ScsiResult::check_condition();
    }
    let numd = (length / 4).saturating_sub(1);
    let completion = transport.issue_admin(
        admin_opcode::FIRMWARE_IMAGE_DOWNLOAD,
        0,
        [numd, offset / 4, 0, 0, 0, 0],
        BufDir::Out(data),
        timeout,
    );
    if completion.is_success() {
        ScsiResult::good()
    } else {
        map_status_to_sense(completion, sense, descriptor_format);
        ScsiResult::check_condition()
    }
}

fn activate_deferred<T: NvmeTransport>(
    _ctx: &DeviceCtx,
    transport: &mut T,
    buffer_id: u8,
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    let slot = (buffer_id & 0x07) as u32;
    let completion = transport.issue_admin(
        admin_opcode::FIRMWARE_COMMIT,
        0,
        [0x01 | (slot << 3), 0, 0, 0, 0, 0],
        BufDir::None,
        timeout,
    );
    if !completion.is_success() {
        map_status_to_sense(completion, sense, descriptor_format);
        return ScsiResult::check_condition();
    }
    if matches!(completion.sc(), 0x20 | 0x21) {
        transport.reset(ResetKind::Controller);
    }
    ScsiResult::good()
}
