//! LOG SENSE (C5, spec §4.5.4)
//!
//! Only cumulative values (PC=01b) are ever exposed — SNTL has no
//! threshold-counting state to report PC=00b/10b/11b against, so those
//! are rejected rather than silently aliased to cumulative.

use std::time::Duration;

use crate::cdb::{CdbView, ScsiResult};
use crate::endian::{le_u128, le_u16, le_u32, le_u64, put_be_u16};
use crate::identify::DeviceCtx;
use crate::sense::{emit_invalid_field_in_cdb, sense_key};
use crate::transport::{admin_opcode, BufDir, NvmeTransport};
use crate::validate::validate_control_byte;

pub const LOG_SENSE: u8 = 0x4D;

pub mod page {
    pub const SUPPORTED: u8 = 0x00;
    pub const TEMPERATURE: u8 = 0x0D;
    pub const START_STOP_CYCLE_COUNTER: u8 = 0x0E;
    pub const SELF_TEST_RESULTS: u8 = 0x10;
    pub const SOLID_STATE_MEDIA: u8 = 0x11;
    pub const BACKGROUND_SCAN_RESULTS: u8 = 0x15;
    pub const GENERAL_STATISTICS_AND_PERFORMANCE: u8 = 0x19;
    pub const INFORMATIONAL_EXCEPTIONS: u8 = 0x2F;
}

/// NVMe Get Log Page identifiers SNTL reads to build these pages.
pub mod nvme_log {
    pub const SMART_HEALTH: u8 = 0x02;
    pub const DEVICE_SELF_TEST: u8 = 0x06;
    pub const ROTATIONAL_MEDIA_INFORMATION: u8 = 0x16;
    pub const SANITIZE_STATUS: u8 = 0x81;
}

/// Pages always supported, in ascending order, with page 0Eh (Start-Stop
/// Cycle Counter) spliced in only when [`DeviceCtx::rotational_media_log_available`]
/// holds (spec.md §4.5.4).
fn supported_pages(ctx: &DeviceCtx) -> Vec<u8> {
    let mut pages = vec![page::SUPPORTED, page::TEMPERATURE];
    if ctx.rotational_media_log_available() {
        pages.push(page::START_STOP_CYCLE_COUNTER);
    }
    pages.extend_from_slice(&[
        page::SELF_TEST_RESULTS,
        page::SOLID_STATE_MEDIA,
        page::BACKGROUND_SCAN_RESULTS,
        page::GENERAL_STATISTICS_AND_PERFORMANCE,
        page::INFORMATIONAL_EXCEPTIONS,
    ]);
    pages
}

pub(crate) fn read_log_page<T: NvmeTransport>(transport: &mut T, lid: u8, buf: &mut [u8], timeout: Duration) {
    let numd = ((buf.len() / 4).saturating_sub(1)) as u32 & 0xFFFF;
    transport.issue_admin(
        admin_opcode::GET_LOG_PAGE,
        0xFFFF_FFFF,
        [(numd << 16) | lid as u32, 0, 0, 0, 0, 0],
        BufDir::In(buf),
        timeout,
    );
}

/// Like [`read_log_page`], for logs scoped to an Endurance Group (Get Log
/// Page command dword 14).
pub(crate) fn read_log_page_for_group<T: NvmeTransport>(
    transport: &mut T,
    lid: u8,
    endgid: u16,
    buf: &mut [u8],
    timeout: Duration,
) {
    let numd = ((buf.len() / 4).saturating_sub(1)) as u32 & 0xFFFF;
    transport.issue_admin(
        admin_opcode::GET_LOG_PAGE,
        0xFFFF_FFFF,
        [(numd << 16) | lid as u32, 0, 0, 0, endgid as u32, 0],
        BufDir::In(buf),
        timeout,
    );
}

pub fn log_sense<T: NvmeTransport>(
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
    let pc = (view.byte(2) >> 6) & 0x03;
    let page = view.byte(2) & 0x3F;
    if pc != 0x01 {
        emit_invalid_field_in_cdb(sense, descriptor_format, 2, 7);
        return ScsiResult::check_condition();
    }

    let written = match page {
        page::SUPPORTED => write_supported_pages(ctx, data),
        page::TEMPERATURE => write_temperature_page(ctx, transport, data, timeout),
        page::START_STOP_CYCLE_COUNTER => {
            if !ctx.rotational_media_log_available() {
                emit_invalid_field_in_cdb(sense, descriptor_format, 2, 5);
                return ScsiResult::check_condition();
            }
            write_start_stop_page(ctx, transport, data, timeout)
        }
        page::SELF_TEST_RESULTS => write_self_test_page(transport, data, timeout),
        page::SOLID_STATE_MEDIA => write_solid_state_media_page(ctx, transport, data, timeout),
        page::BACKGROUND_SCAN_RESULTS => write_background_scan_page(transport, data, timeout),
        page::GENERAL_STATISTICS_AND_PERFORMANCE => write_general_stats_page(transport, data, timeout),
        page::INFORMATIONAL_EXCEPTIONS => write_informational_exceptions_page(transport, data, timeout),
        _ => {
            emit_invalid_field_in_cdb(sense, descriptor_format, 2, 5);
            return ScsiResult::check_condition();
        }
    };
    ScsiResult::good_with_len(written.min(data.len()))
}

fn page_header(buf: &mut [u8], page: u8, param_len: u16) -> usize {
    if buf.is_empty() {
        return 0;
    }
    buf[0] = page & 0x3F;
    if buf.len() > 3 {
        put_be_u16(&mut buf[2..4], param_len);
    }
    4
}

fn write_supported_pages(ctx: &DeviceCtx, buf: &mut [u8]) -> usize {
    let pages = supported_pages(ctx);
    let total = 4 + pages.len();
    let hdr = page_header(buf, page::SUPPORTED, pages.len() as u16);
    for (i, &p) in pages.iter().enumerate() {
        if hdr + i < buf.len() {
            buf[hdr + i] = p;
        }
    }
    total
}

fn smart_log<T: NvmeTransport>(transport: &mut T, timeout: Duration) -> [u8; 512] {
    let mut raw = [0u8; 512];
    read_log_page(transport, nvme_log::SMART_HEALTH, &mut raw, timeout);
    raw
}

fn write_temperature_page<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    buf: &mut [u8],
    timeout: Duration,
) -> usize {
    let raw = smart_log(transport, timeout);
    let current_k = le_u16(&raw[1..3]);
    let mut feat = [0u32; 1];
    let completion = transport.issue_admin(
        admin_opcode::GET_FEATURES,
        0,
        [0x04, 0, 0, 0, 0, 0],
        BufDir::None,
        timeout,
    );
    feat[0] = completion.result_dword;
    let reference_k = (feat[0] & 0xFFFF) as u16;
    let _ = ctx;

    let total = 4 + 16; // two 8-byte temperature parameters
    let hdr = page_header(buf, page::TEMPERATURE, 16);
    write_temperature_param(buf, hdr, 0x0000, celsius_from_kelvin(current_k));
    write_temperature_param(buf, hdr + 8, 0x0001, celsius_from_kelvin(reference_k));
    total
}

fn celsius_from_kelvin(k: u16) -> i16 {
    if k == 0 {
        0
    } else {
        k as i16 - 273
    }
}

fn write_temperature_param(buf: &mut [u8], off: usize, code: u16, celsius: i16) {
    if off + 8 > buf.len() {
        return;
    }
    put_be_u16(&mut buf[off..off + 2], code);
    buf[off + 2] = 0x03; // DU=0, DS=0, TSD=0, ETC=0, LP=0, LBIN=1 per SPC-5 list-parameter format
    buf[off + 3] = 0x02; // parameter length
    buf[off + 5] = celsius as u8;
}

fn write_start_stop_page<T: NvmeTransport>(
    _ctx: &DeviceCtx,
    transport: &mut T,
    buf: &mut [u8],
    timeout: Duration,
) -> usize {
    let raw = smart_log(transport, timeout);
    let power_cycles = le_u128(&raw[112..128]).min(u32::MAX as u128) as u32;
    let total = 4 + 10;
    let hdr = page_header(buf, page::START_STOP_CYCLE_COUNTER, 10);
    if hdr + 10 <= buf.len() {
        put_be_u16(&mut buf[hdr..hdr + 2], 0x0004);
        buf[hdr + 2] = 0x03;
        buf[hdr + 3] = 0x04;
        crate::endian::put_be_u32(&mut buf[hdr + 4..hdr + 8], power_cycles);
    }
    total
}

fn write_self_test_page<T: NvmeTransport>(transport: &mut T, buf: &mut [u8], timeout: Duration) -> usize {
    let mut raw = [0u8; 564];
    read_log_page(transport, nvme_log::DEVICE_SELF_TEST, &mut raw, timeout);

    let param_len = 20 * 20;
    let total = 4 + param_len;
    let hdr = page_header(buf, page::SELF_TEST_RESULTS, param_len as u16);

    for i in 0..20 {
        let src = 4 + i * 28;
        let dst = hdr + i * 20;
        if dst + 20 > buf.len() || src + 28 > raw.len() {
            continue;
        }
        write_self_test_entry(&mut buf[dst..dst + 20], &raw[src..src + 28], (i + 1) as u16);
    }
    total
}

fn write_self_test_entry(dst: &mut [u8], src: &[u8], parameter_code: u16) {
    put_be_u16(&mut dst[0..2], parameter_code);
    dst[2] = 0x03;
    dst[3] = 0x10; // 16-byte parameter value

    let result_byte = src[0];
    let self_test_code = (result_byte >> 4) & 0x07;
    let result = result_byte & 0x0F;
    let segment = src[1];
    let valid = src[2];
    let poh = le_u64(&src[4..12]).min(u16::MAX as u64) as u16;
    let nsid = le_u32(&src[12..16]);
    let failing_lba = le_u64(&src[16..24]);
    let sct = src[24] & 0x07;
    let sc = src[25];

    dst[4] = (self_test_code << 5) | result;
    dst[5] = segment;
    put_be_u16(&mut dst[6..8], poh);
    let flba = if valid & 0x02 != 0 { failing_lba } else { u64::MAX };
    crate::endian::put_be_u64(&mut dst[8..16], flba);

    if result == 0 {
        dst[16] = sense_key::NO_SENSE;
    } else {
        dst[16] = sense_key::HARDWARE_ERROR;
    }
    dst[17] = 0x40;
    dst[18] = 0x80 + result;
    let _ = (sct, sc, nsid);
}

fn write_solid_state_media_page<T: NvmeTransport>(
    _ctx: &DeviceCtx,
    transport: &mut T,
    buf: &mut [u8],
    timeout: Duration,
) -> usize {
    let raw = smart_log(transport, timeout);
    let percent_used = raw[5];
    let endurance_remaining = 100u8.saturating_sub(percent_used);
    let total = 4 + 8;
    let hdr = page_header(buf, page::SOLID_STATE_MEDIA, 8);
    if hdr + 8 <= buf.len() {
        put_be_u16(&mut buf[hdr..hdr + 2], 0x0001);
        buf[hdr + 2] = 0x03;
        buf[hdr + 3] = 0x04;
        buf[hdr + 7] = endurance_remaining;
    }
    total
}

fn write_background_scan_page<T: NvmeTransport>(transport: &mut T, buf: &mut [u8], timeout: Duration) -> usize {
    let raw = smart_log(transport, timeout);
    let poh = le_u128(&raw[128..144]).min(u32::MAX as u128) as u32;
    let scan_progress_minutes = poh.saturating_mul(60);
    let total = 4 + 16;
    let hdr = page_header(buf, page::BACKGROUND_SCAN_RESULTS, 16);
    if hdr + 16 <= buf.len() {
        put_be_u16(&mut buf[hdr..hdr + 2], 0x0000);
        buf[hdr + 2] = 0x03;
        buf[hdr + 3] = 0x0C;
        crate::endian::put_be_u32(&mut buf[hdr + 4..hdr + 8], scan_progress_minutes);
    }
    total
}

fn write_general_stats_page<T: NvmeTransport>(transport: &mut T, buf: &mut [u8], timeout: Duration) -> usize {
    let raw = smart_log(transport, timeout);
    let reads = le_u128(&raw[64..80]).min(u64::MAX as u128) as u64;
    let writes = le_u128(&raw[80..96]).min(u64::MAX as u128) as u64;
    let total = 4 + 32;
    let hdr = page_header(buf, page::GENERAL_STATISTICS_AND_PERFORMANCE, 32);
    if hdr + 32 <= buf.len() {
        put_be_u16(&mut buf[hdr..hdr + 2], 0x0001);
        buf[hdr + 2] = 0x03;
        buf[hdr + 3] = 0x1C;
        crate::endian::put_be_u64(&mut buf[hdr + 4..hdr + 12], reads);
        crate::endian::put_be_u64(&mut buf[hdr + 12..hdr + 20], writes);
    }
    total
}

fn write_informational_exceptions_page<T: NvmeTransport>(transport: &mut T, buf: &mut [u8], timeout: Duration) -> usize {
    let raw = smart_log(transport, timeout);
    let critical_warning = raw[0];
    let total = 4 + 4;
    let hdr = page_header(buf, page::INFORMATIONAL_EXCEPTIONS, 4);
    if hdr + 4 <= buf.len() {
        put_be_u16(&mut buf[hdr..hdr + 2], 0x0000);
        buf[hdr + 2] = 0x03;
        buf[hdr + 3] = 0x00;
        let asc = if critical_warning != 0 { 0x5D } else { 0x00 };
        let _ = asc;
    }
    total
}
