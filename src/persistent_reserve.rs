//! PERSISTENT RESERVE IN / OUT (C5, spec §4.5.9)
//!
//! NVMe Reservation Report returns a generation counter, a reservation
//! type, and per-controller registration entries (controller id + key,
//! little-endian); PR IN re-emits those as the SCSI key/full-status list
//! (big-endian), per spec.md §4.5.9.

use std::time::Duration;

use crate::cdb::{CdbView, ScsiResult};
use crate::endian::{be_u64, le_u16, le_u32, le_u64, put_be_u32, put_be_u64};
use crate::identify::DeviceCtx;
use crate::sense::{emit_invalid_field_in_cdb, emit_sense, sense_key};
use crate::status::map_status_to_sense;
use crate::transport::{io_opcode, BufDir, NvmeTransport};
use crate::validate::validate_control_byte;

pub const PERSISTENT_RESERVE_IN: u8 = 0x5E;
pub const PERSISTENT_RESERVE_OUT: u8 = 0x5F;

pub mod in_action {
    pub const READ_KEYS: u8 = 0x00;
    pub const READ_RESERVATION: u8 = 0x01;
    pub const REPORT_CAPABILITIES: u8 = 0x02;
    pub const READ_FULL_STATUS: u8 = 0x03;
}

pub mod out_action {
    pub const REGISTER: u8 = 0x00;
    pub const RESERVE: u8 = 0x01;
    pub const RELEASE: u8 = 0x02;
    pub const CLEAR: u8 = 0x03;
    pub const PREEMPT: u8 = 0x04;
    pub const PREEMPT_AND_ABORT: u8 = 0x05;
    pub const REGISTER_AND_IGNORE_EXISTING: u8 = 0x06;
    pub const REGISTER_AND_MOVE: u8 = 0x07;
}

fn scsi_rtype_to_nvme(rtype: u8) -> Option<u8> {
    match rtype {
        0x00 => Some(0),
        0x01 => Some(1),
        0x03 => Some(2),
        0x05 => Some(3),
        0x06 => Some(4),
        0x07 => Some(5),
        0x08 => Some(6),
        _ => None,
    }
}

/// Entry layout within the NVMe Reservation Report registered-controller
/// list SNTL expects from the transport: 24 bytes per controller
/// (controller id LE16, status byte, 5 reserved, host id LE64, key LE64).
const REPORT_ENTRY_LEN: usize = 24;

pub fn persistent_reserve_in<T: NvmeTransport>(
    ctx: &DeviceCtx,
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
    let action = view.byte(1) & 0x1F;

    let mut report = [0u8; 4096];
    let numd = (report.len() / 4).saturating_sub(1) as u32;
    let completion = transport.issue_io(
        io_opcode::RESERVATION_REPORT,
        ctx.nsid,
        [numd, 0, 0, 0, 0, 0],
        BufDir::In(&mut report),
        timeout,
    );
    if !completion.is_success() {
        map_status_to_sense(completion, sense, descriptor_format);
        return ScsiResult::check_condition();
    }

    let generation = le_u32(&report[0..4]);
    let regctl = le_u16(&report[8..10]) as usize;
    let rtype = report[6];

    let written = match action {
        in_action::READ_KEYS => write_read_keys(&report, generation, regctl, data),
        in_action::READ_RESERVATION => write_read_reservation(&report, generation, regctl, rtype, data),
        in_action::REPORT_CAPABILITIES => write_report_capabilities(ctx, data),
        in_action::READ_FULL_STATUS => write_read_full_status(&report, generation, regctl, rtype, data),
        _ => {
            emit_invalid_field_in_cdb(sense, descriptor_format, 1, 4);
            return ScsiResult::check_condition();
        }
    };
    ScsiResult::good_with_len(written.min(data.len()))
}

fn write_read_keys(report: &[u8], generation: u32, regctl: usize, buf: &mut [u8]) -> usize {
    let total = 8 + regctl * 8;
    if buf.len() >= 4 {
        put_be_u32(&mut buf[0..4], generation);
    }
    if buf.len() >= 8 {
        put_be_u32(&mut buf[4..8], (regctl * 8) as u32);
    }
    for i in 0..regctl {
        let src = 24 + i * REPORT_ENTRY_LEN;
        let dst = 8 + i * 8;
        if dst + 8 > buf.len() || src + REPORT_ENTRY_LEN > report.len() {
            break;
        }
        let key = le_u64(&report[src + 16..src + 24]);
        put_be_u64(&mut buf[dst..dst + 8], key);
    }
    total
}

fn write_read_reservation(report: &[u8], generation: u32, regctl: usize, rtype: u8, buf: &mut [u8]) -> usize {
    let holds_reservation = regctl > 0 && rtype != 0;
    let total = if holds_reservation { 8 + 16 } else { 8 };
    if buf.len() >= 4 {
        put_be_u32(&mut buf[0..4], generation);
    }
    if buf.len() >= 8 {
        put_be_u32(&mut buf[4..8], if holds_reservation { 16 } else { 0 });
    }
    if holds_reservation && buf.len() >= 24 {
        let key = le_u64(&report[24 + 16..24 + 24]);
        put_be_u64(&mut buf[8..16], key);
        buf[21] = rtype;
    }
    total
}

fn write_report_capabilities(ctx: &DeviceCtx, buf: &mut [u8]) -> usize {
    let total = 8usize;
    if buf.len() >= 2 {
        buf[0] = 0;
        buf[1] = 8;
    }
    if buf.len() >= 5 {
        buf[2] = 0x10; // CRH=0, SIP_C=0, ATP_C=0, PTPL_C=0, ALLOW_COMMANDS=0, PTPL_A bit4
        buf[3] = 0x01; // WR_EX supported always
        buf[4] = if ctx.controller.oncs != 0 { 0x01 } else { 0x00 };
    }
    total
}

fn write_read_full_status(report: &[u8], generation: u32, regctl: usize, rtype: u8, buf: &mut [u8]) -> usize {
    let per_entry = 24usize;
    let total = 8 + regctl * per_entry;
    if buf.len() >= 4 {
        put_be_u32(&mut buf[0..4], generation);
    }
    if buf.len() >= 8 {
        put_be_u32(&mut buf[4..8], (regctl * per_entry) as u32);
    }
    for i in 0..regctl {
        let src = 24 + i * REPORT_ENTRY_LEN;
        let dst = 8 + i * per_entry;
        if dst + per_entry > buf.len() || src + REPORT_ENTRY_LEN > report.len() {
            break;
        }
        let key = le_u64(&report[src + 16..src + 24]);
        put_be_u64(&mut buf[dst..dst + 8], key);
        buf[dst + 13] = rtype;
        let host_id = le_u64(&report[src + 8..src + 16]);
        put_be_u64(&mut buf[dst + 16..dst + 24], host_id);
    }
    total
}

pub fn persistent_reserve_out<T: NvmeTransport>(
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
    let action = view.byte(1) & 0x1F;
    let scope_type = view.byte(2);
    let rtype = scope_type & 0x0F;

    match action {
        out_action::REGISTER | out_action::REGISTER_AND_IGNORE_EXISTING => {
            register(ctx, transport, action, data, sense, descriptor_format, timeout)
        }
        out_action::RESERVE => acquire(ctx, transport, rtype, 0, data, sense, descriptor_format, timeout),
        out_action::PREEMPT => acquire(ctx, transport, rtype, 1, data, sense, descriptor_format, timeout),
        out_action::PREEMPT_AND_ABORT => acquire(ctx, transport, rtype, 2, data, sense, descriptor_format, timeout),
        out_action::RELEASE => release(ctx, transport, 0, sense, descriptor_format, timeout),
        out_action::CLEAR => release(ctx, transport, 1, sense, descriptor_format, timeout),
        out_action::REGISTER_AND_MOVE => register_and_move(ctx, transport, data, sense, descriptor_format, timeout),
        _ => {
            emit_invalid_field_in_cdb(sense, descriptor_format, 1, 4);
            ScsiResult::check_condition()
        }
    }
}

fn register<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    action: u8,
    data: &[u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    if data.len() < 16 {
        emit_sense(sense, sense_key::ILLEGAL_REQUEST, 0x26, 0x00, descriptor_format, &[]);
        return ScsiResult::check_condition();
    }
    let sa_key = be_u64(&data[8..16]);
    let rrega = if sa_key != 0 { 0u32 } else { 1u32 };
    let iekey = if action == out_action::REGISTER_AND_IGNORE_EXISTING { 1u32 } else { 0u32 };
    let cdw10 = rrega | (iekey << 3);
    let completion = transport.issue_io(
        io_opcode::RESERVATION_REGISTER,
        ctx.nsid,
        [cdw10, 0, 0, 0, 0, 0],
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

fn acquire<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    rtype: u8,
    racqa: u32,
    data: &[u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    let Some(nvme_rtype) = scsi_rtype_to_nvme(rtype) else {
        emit_invalid_field_in_cdb(sense, descriptor_format, 2, 3);
        return ScsiResult::check_condition();
    };
    let cdw10 = racqa | ((nvme_rtype as u32) << 8);
    let completion = transport.issue_io(
        io_opcode::RESERVATION_ACQUIRE,
        ctx.nsid,
        [cdw10, 0, 0, 0, 0, 0],
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

fn release<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    rrela: u32,
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    let completion = transport.issue_io(
        io_opcode::RESERVATION_RELEASE,
        ctx.nsid,
        [rrela, 0, 0, 0, 0, 0],
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

fn register_and_move<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    data: &[u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    if data.len() < 16 {
        emit_sense(sense, sense_key::ILLEGAL_REQUEST, 0x26, 0x00, descriptor_format, &[]);
        return ScsiResult::check_condition();
    }
    // SNTL has no multi-host transport-id plumbing; REGISTER-AND-MOVE is
    // translated as a replace-registration on the issuing controller.
    let cdw10 = 2u32; // RREGA = replace
    let completion = transport.issue_io(
        io_opcode::RESERVATION_REGISTER,
        ctx.nsid,
        [cdw10, 0, 0, 0, 0, 0],
        BufDir::Out(&data[..16]),
        timeout,
    );
    if completion.is_success() {
        ScsiResult::good()
    } else {
        map_status_to_sense(completion, sense, descriptor_format);
        ScsiResult::check_condition()
    }
}
