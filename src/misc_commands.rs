//! The trivial-pattern commands (spec.md §4.5): TEST UNIT READY,
//! SYNCHRONIZE CACHE, REPORT LUNS, SEND DIAGNOSTIC, SECURITY PROTOCOL
//! IN/OUT, WRITE LONG. Each is a thin, single-purpose translation that
//! doesn't earn its own module.

use std::time::Duration;

use crate::cdb::{CdbView, ScsiResult};
use crate::endian::{be_u16, be_u32, put_be_u32};
use crate::identify::DeviceCtx;
use crate::sense::emit_invalid_field_in_cdb;
use crate::status::map_status_to_sense;
use crate::transport::{admin_opcode, io_opcode, BufDir, NvmeTransport};
use crate::validate::validate_control_byte;

pub const TEST_UNIT_READY: u8 = 0x00;
pub const SYNCHRONIZE_CACHE_10: u8 = 0x35;
pub const SYNCHRONIZE_CACHE_16: u8 = 0x91;
pub const REPORT_LUNS: u8 = 0xA0;
pub const SEND_DIAGNOSTIC: u8 = 0x1D;
pub const SECURITY_PROTOCOL_IN: u8 = 0xA2;
pub const SECURITY_PROTOCOL_OUT: u8 = 0xB5;
pub const WRITE_LONG_10: u8 = 0x3F;

pub fn test_unit_ready(view: CdbView<'_>, sense: &mut [u8], descriptor_format: bool) -> ScsiResult {
    if let Some(v) = validate_control_byte(view) {
        emit_invalid_field_in_cdb(sense, descriptor_format, v.field_pointer, v.bit_pointer);
        return ScsiResult::check_condition();
    }
    ScsiResult::good()
}

pub fn synchronize_cache<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    view: CdbView<'_>,
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    if let Some(v) = validate_control_byte(view) {
        emit_invalid_field_in_cdb(sense, descriptor_format, v.field_pointer, v.bit_pointer);
        return ScsiResult::check_condition();
    }
    let completion = transport.issue_io(io_opcode::FLUSH, ctx.nsid, [0; 6], BufDir::None, timeout);
    if completion.is_success() {
        ScsiResult::good()
    } else {
        map_status_to_sense(completion, sense, descriptor_format);
        ScsiResult::check_condition()
    }
}

/// Single-namespace target: SNTL always reports exactly one LUN (spec.md
/// §3, one `DeviceCtx` per namespace).
pub fn report_luns(view: CdbView<'_>, data: &mut [u8], sense: &mut [u8], descriptor_format: bool) -> ScsiResult {
    if let Some(v) = validate_control_byte(view) {
        emit_invalid_field_in_cdb(sense, descriptor_format, v.field_pointer, v.bit_pointer);
        return ScsiResult::check_condition();
    }
    let total = 8 + 8;
    for b in data.iter_mut() {
        *b = 0;
    }
    if data.len() >= 4 {
        put_be_u32(&mut data[0..4], 8);
    }
    // LUN 0, peripheral device addressing method.
    ScsiResult::good_with_len(total.min(data.len()))
}

pub fn send_diagnostic<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    view: CdbView<'_>,
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    if let Some(v) = validate_control_byte(view) {
        emit_invalid_field_in_cdb(sense, descriptor_format, v.field_pointer, v.bit_pointer);
        return ScsiResult::check_condition();
    }
    let self_test_code = (view.byte(1) >> 5) & 0x07;
    let self_test = view.byte(1) & 0x04 != 0;
    if !self_test {
        // PF/device-online diagnostics have no NVMe counterpart worth
        // issuing a command for; report success without action.
        return ScsiResult::good();
    }
    let stc = match self_test_code {
        0b001 => 1, // background short self-test
        0b010 => 2, // background extended self-test
        _ => 1,
    };
    let completion = transport.issue_admin(
        admin_opcode::DEVICE_SELF_TEST,
        ctx.nsid,
        [stc, 0, 0, 0, 0, 0],
        BufDir::None,
        timeout,
    );
    if completion.is_success() {
        ScsiResult::good()
    } else {
        map_status_to_sense(completion, sense, descriptor_format);
        ScsiResult::check_condition()
    }
}

pub fn security_protocol_in<T: NvmeTransport>(
    transport: &mut T,
    view: CdbView<'_>,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    if let Some(v) = validate_control_byte(view) {
        emit_invalid_field_in_cdb(sense, descriptor_format, v.field_pointer, v.bit_pointer);
        return ScsiResult::check_condition();
    }
    let protocol = view.byte(1) as u32;
    let sp_specific = be_u16(&view.bytes[2..4]) as u32;
    let cdw10 = protocol | (sp_specific << 8);
    let completion = transport.issue_admin(admin_opcode::SECURITY_RECEIVE, 0, [cdw10, 0, 0, 0, 0, 0], BufDir::In(data), timeout);
    if completion.is_success() {
        ScsiResult::good_with_len(data.len())
    } else {
        map_status_to_sense(completion, sense, descriptor_format);
        ScsiResult::check_condition()
    }
}

pub fn security_protocol_out<T: NvmeTransport>(
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
    let protocol = view.byte(1) as u32;
    let sp_specific = be_u16(&view.bytes[2..4]) as u32;
    let cdw10 = protocol | (sp_specific << 8);
    let completion = transport.issue_admin(admin_opcode::SECURITY_SEND, 0, [cdw10, 0, 0, 0, 0, 0], BufDir::Out(data), timeout);
    if completion.is_success() {
        ScsiResult::good()
    } else {
        map_status_to_sense(completion, sense, descriptor_format);
        ScsiResult::check_condition()
    }
}

/// WRITE LONG has no NVMe counterpart carrying host-supplied ECC; SNTL
/// writes the logical-block payload only and ignores the protection
/// information bytes the host appended (spec.md §4.5, trivial-pattern).
pub fn write_long_10<T: NvmeTransport>(
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
    let lba = be_u32(&view.bytes[2..6]) as u64;
    if lba > ctx.max_lba() {
        crate::sense::emit_sense(sense, crate::sense::sense_key::ILLEGAL_REQUEST, 0x21, 0x00, descriptor_format, &[]);
        return ScsiResult::check_condition();
    }
    let block_size = ctx.block_size() as usize;
    let payload = &data[..data.len().min(block_size)];
    let cdw = [lba as u32, (lba >> 32) as u32, 0, 0, 0, 0];
    let completion = transport.issue_io(io_opcode::WRITE, ctx.nsid, cdw, BufDir::Out(payload), timeout);
    if completion.is_success() {
        ScsiResult::good()
    } else {
        map_status_to_sense(completion, sense, descriptor_format);
        ScsiResult::check_condition()
    }
}
