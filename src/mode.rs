//! MODE SENSE/SELECT 6/10 (C5, spec §4.5.3)
//!
//! Only the pages SNTL advertises are implemented: Read-Write Error
//! Recovery (01h), Caching (08h), Control/Control Extension (0Ah),
//! Power Condition (1Ah), Informational Exceptions (1Ch). MODE SELECT
//! accepts writes only to the Caching page's WCE bit.

use std::time::Duration;

use crate::cdb::{CdbView, ScsiResult};
use crate::endian::put_be_u16;
use crate::identify::DeviceCtx;
use crate::sense::{emit_invalid_field_in_cdb, sense_key};
use crate::transport::NvmeTransport;
use crate::validate::validate_control_byte;

pub mod opcode {
    pub const MODE_SENSE_6: u8 = 0x1A;
    pub const MODE_SELECT_6: u8 = 0x15;
    pub const MODE_SENSE_10: u8 = 0x5A;
    pub const MODE_SELECT_10: u8 = 0x55;
}

pub mod page {
    pub const READ_WRITE_ERROR_RECOVERY: u8 = 0x01;
    pub const CACHING: u8 = 0x08;
    pub const CONTROL: u8 = 0x0A;
    pub const POWER_CONDITION: u8 = 0x1A;
    pub const INFORMATIONAL_EXCEPTIONS: u8 = 0x1C;
}

/// Page Control field, CDB byte 2 bits [7:6].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageControl {
    Current,
    Changeable,
    Default,
    Saved,
}

impl PageControl {
    fn from_bits(b: u8) -> Self {
        match (b >> 6) & 0x03 {
            0 => PageControl::Current,
            1 => PageControl::Changeable,
            2 => PageControl::Default,
            _ => PageControl::Saved,
        }
    }
}

fn page_len(page: u8) -> Option<u8> {
    match page {
        page::READ_WRITE_ERROR_RECOVERY => Some(10),
        page::CACHING => Some(18),
        page::CONTROL => Some(10),
        page::POWER_CONDITION => Some(38),
        page::INFORMATIONAL_EXCEPTIONS => Some(10),
        _ => None,
    }
}

fn write_page_header(buf: &mut [u8], page: u8, len: u8) {
    if buf.len() > 0 {
        buf[0] = page & 0x3F;
    }
    if buf.len() > 1 {
        buf[1] = len.saturating_sub(2);
    }
}

fn write_caching_page(buf: &mut [u8], ctx: &DeviceCtx, pc: PageControl) {
    write_page_header(buf, page::CACHING, 18);
    if buf.len() <= 2 {
        return;
    }
    if pc == PageControl::Changeable {
        buf[2] = 0x04; // WCE is the only field we let the host change
        return;
    }
    let wce = ctx.controller.vwc & 0x01;
    buf[2] = wce << 2;
}

fn write_error_recovery_page(buf: &mut [u8], _ctx: &DeviceCtx, pc: PageControl) {
    write_page_header(buf, page::READ_WRITE_ERROR_RECOVERY, 10);
    if pc == PageControl::Changeable || buf.len() <= 9 {
        return;
    }
    // NVMe has no retry-count/recovery-time-limit equivalent worth
    // exposing; the Error Recovery feature (FID 05h) only carries a
    // time-limited-error-recovery value, mapped to bytes 8-9.
    buf[8] = 0;
    buf[9] = 0;
}

fn write_control_page(buf: &mut [u8], pc: PageControl) {
    write_page_header(buf, page::CONTROL, 10);
    if pc == PageControl::Changeable || buf.len() <= 3 {
        return;
    }
    buf[2] = 0x00; // TST=0, no queue reordering exposed
    buf[3] = 0x10; // GLTSD=1, no log save
}

fn write_power_condition_page(buf: &mut [u8], pc: PageControl) {
    write_page_header(buf, page::POWER_CONDITION, 38);
    let _ = pc; // all timers are zero regardless of PC; NVMe has no timers
}

fn write_informational_exceptions_page(buf: &mut [u8], pc: PageControl) {
    write_page_header(buf, page::INFORMATIONAL_EXCEPTIONS, 10);
    if pc == PageControl::Changeable || buf.len() <= 2 {
        return;
    }
    buf[2] = 0x00; // DEXCPT=0, MRIE unreported
}

fn write_page(buf: &mut [u8], page: u8, ctx: &DeviceCtx, pc: PageControl) {
    match page {
        page::READ_WRITE_ERROR_RECOVERY => write_error_recovery_page(buf, ctx, pc),
        page::CACHING => write_caching_page(buf, ctx, pc),
        page::CONTROL => write_control_page(buf, pc),
        page::POWER_CONDITION => write_power_condition_page(buf, pc),
        page::INFORMATIONAL_EXCEPTIONS => write_informational_exceptions_page(buf, pc),
        _ => {}
    }
}

fn block_descriptor_len(long_lba: bool) -> usize {
    if long_lba {
        16
    } else {
        8
    }
}

fn write_block_descriptor(buf: &mut [u8], ctx: &DeviceCtx, long_lba: bool) {
    if long_lba {
        crate::endian::put_be_u64(&mut buf[0..8], ctx.max_lba() + 1);
        crate::endian::put_be_u32(&mut buf[12..16], ctx.block_size());
    } else {
        let blocks = (ctx.max_lba() + 1).min(u32::MAX as u64) as u32;
        crate::endian::put_be_u32(&mut buf[0..4], blocks);
        buf[4] = 0;
        let bs = ctx.block_size();
        buf[5] = (bs >> 16) as u8;
        buf[6] = (bs >> 8) as u8;
        buf[7] = bs as u8;
    }
}

pub fn mode_sense_6(
    ctx: &DeviceCtx,
    view: CdbView<'_>,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
) -> ScsiResult {
    if let Some(v) = validate_control_byte(view) {
        emit_invalid_field_in_cdb(sense, descriptor_format, v.field_pointer, v.bit_pointer);
        return ScsiResult::check_condition();
    }
    mode_sense(ctx, view.byte(2), view.byte(1) & 0x08 != 0, false, false, data, sense, descriptor_format)
}

pub fn mode_sense_10(
    ctx: &DeviceCtx,
    view: CdbView<'_>,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
) -> ScsiResult {
    if let Some(v) = validate_control_byte(view) {
        emit_invalid_field_in_cdb(sense, descriptor_format, v.field_pointer, v.bit_pointer);
        return ScsiResult::check_condition();
    }
    let dbd = view.byte(1) & 0x08 != 0;
    let llbaa = view.byte(1) & 0x10 != 0;
    mode_sense(ctx, view.byte(2), dbd, llbaa, true, data, sense, descriptor_format)
}

fn mode_sense(
    ctx: &DeviceCtx,
    page_byte: u8,
    dbd: bool,
    llbaa: bool,
    ten_byte: bool,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
) -> ScsiResult {
    let page = page_byte & 0x3F;
    let pc = PageControl::from_bits(page_byte);

    let Some(plen) = page_len(page) else {
        emit_invalid_field_in_cdb(sense, descriptor_format, 2, 5);
        return ScsiResult::check_condition();
    };

    let header_len = if ten_byte { 8 } else { 4 };
    let block_desc_len = if dbd { 0 } else { block_descriptor_len(llbaa) };
    let total = header_len + block_desc_len + plen as usize;
    let len = data.len().min(total);
    for b in data[..len].iter_mut() {
        *b = 0;
    }

    if header_len == 4 {
        if len > 0 {
            data[0] = (total - 1) as u8;
        }
        if len > 3 && block_desc_len > 0 {
            data[3] = block_desc_len as u8;
        }
    } else {
        if len > 1 {
            put_be_u16(&mut data[0..2], (total - 2) as u16);
        }
        if llbaa && len > 4 {
            data[4] = 0x01; // LONGLBA
        }
        if len > 7 && block_desc_len > 0 {
            put_be_u16(&mut data[6..8], block_desc_len as u16);
        }
    }

    let mut offset = header_len;
    if block_desc_len > 0 && len >= offset + block_desc_len {
        write_block_descriptor(&mut data[offset..offset + block_desc_len], ctx, llbaa);
    }
    offset += block_desc_len;

    let avail = len.saturating_sub(offset);
    if avail > 0 {
        let write_len = avail.min(plen as usize);
        write_page(&mut data[offset..offset + write_len], page, ctx, pc);
    }

    ScsiResult::good_with_len(len)
}

pub fn mode_select_6<T: NvmeTransport>(
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
    mode_select(ctx, transport, data, 4, sense, descriptor_format, timeout)
}

pub fn mode_select_10<T: NvmeTransport>(
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
    mode_select(ctx, transport, data, 8, sense, descriptor_format, timeout)
}

/// Accept only a Caching page WCE change; any other page or field edit is
/// rejected per spec.md §4.5.3.
fn mode_select<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    data: &[u8],
    header_len: usize,
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    if data.len() < header_len + 2 {
        crate::sense::emit_sense(sense, sense_key::ILLEGAL_REQUEST, 0x1A, 0x00, descriptor_format, &[]);
        return ScsiResult::check_condition();
    }
    // Only the 10-byte parameter header carries a LONGLBA bit (byte 4, bit
    // 0); MODE SELECT(6)'s 4-byte header always pairs with a short (8-byte)
    // block descriptor.
    let longlba = header_len == 8 && data.len() > 4 && data[4] & 0x01 != 0;
    let bd_len = if header_len == 4 {
        data[3] as usize
    } else {
        crate::endian::be_u16(&data[6..8]) as usize
    };
    if bd_len > 0 {
        let desc_len = if longlba { 16 } else { 8 };
        if bd_len < desc_len || header_len + desc_len > data.len() {
            emit_invalid_field_in_cdb_parameter(sense, descriptor_format, header_len as u16);
            return ScsiResult::check_condition();
        }
        let desc = &data[header_len..header_len + desc_len];
        let (blocks, block_len) = if longlba {
            (
                crate::endian::be_u64(&desc[0..8]),
                crate::endian::be_u32(&desc[12..16]),
            )
        } else {
            let blocks = crate::endian::be_u32(&desc[0..4]) as u64;
            let block_len = ((desc[5] as u32) << 16) | ((desc[6] as u32) << 8) | desc[7] as u32;
            (blocks, block_len)
        };
        if blocks != ctx.max_lba() + 1 || block_len != ctx.block_size() {
            emit_invalid_field_in_cdb_parameter(sense, descriptor_format, header_len as u16);
            return ScsiResult::check_condition();
        }
    }
    let page_off = header_len + bd_len;
    if page_off >= data.len() {
        emit_invalid_field_in_cdb_parameter(sense, descriptor_format, page_off as u16);
        return ScsiResult::check_condition();
    }
    let page = data[page_off] & 0x3F;
    if page != page::CACHING {
        emit_invalid_field_in_cdb_parameter(sense, descriptor_format, page_off as u16);
        return ScsiResult::check_condition();
    }
    let wce_byte_off = page_off + 2;
    if wce_byte_off >= data.len() {
        emit_invalid_field_in_cdb_parameter(sense, descriptor_format, wce_byte_off as u16);
        return ScsiResult::check_condition();
    }
    let wce = (data[wce_byte_off] >> 2) & 0x01;

    let completion = transport.issue_admin(
        crate::transport::admin_opcode::SET_FEATURES,
        0,
        [0x06, wce as u32, 0, 0, 0, 0],
        crate::transport::BufDir::None,
        timeout,
    );
    if completion.is_success() {
        ScsiResult::good()
    } else {
        crate::status::map_status_to_sense(completion, sense, descriptor_format);
        ScsiResult::check_condition()
    }
}

fn emit_invalid_field_in_cdb_parameter(sense: &mut [u8], descriptor_format: bool, field_pointer: u16) {
    crate::sense::emit_sense(
        sense,
        sense_key::ILLEGAL_REQUEST,
        0x26,
        0x00,
        descriptor_format,
        &[crate::sense::SenseDescriptor::FieldPointer {
            cdb_or_data: false,
            bit_pointer_valid: false,
            bit_pointer: 0,
            field_pointer,
        }],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BufDir, NvmeCompletion, ResetKind};

    fn sample_ctx() -> DeviceCtx {
        let mut ctx = DeviceCtx::new(1);
        ctx.namespace.nsze = 0x100000000;
        ctx.namespace.lbaf = vec![crate::identify::LbaFormat { ms: 0, lbads: 12, rp: 0 }];
        ctx
    }

    /// A capacity small enough that its block count fits the 32-bit Number
    /// of Blocks field of the short (non-LONGLBA) block descriptor.
    fn small_ctx() -> DeviceCtx {
        let mut ctx = DeviceCtx::new(1);
        ctx.namespace.nsze = 0x1000;
        ctx.namespace.lbaf = vec![crate::identify::LbaFormat { ms: 0, lbads: 12, rp: 0 }];
        ctx
    }

    struct FakeTransport {
        set_features_calls: u32,
    }

    impl NvmeTransport for FakeTransport {
        fn issue_admin(&mut self, opcode: u8, _n: u32, _c: [u32; 6], _d: BufDir<'_>, _t: Duration) -> NvmeCompletion {
            if opcode == crate::transport::admin_opcode::SET_FEATURES {
                self.set_features_calls += 1;
            }
            NvmeCompletion::new(0, 0)
        }
        fn issue_io(&mut self, _o: u8, _n: u32, _c: [u32; 6], _d: BufDir<'_>, _t: Duration) -> NvmeCompletion {
            NvmeCompletion::new(0, 0)
        }
        fn reset(&mut self, _kind: ResetKind) {}
    }

    fn caching_page_param_list(header_len: usize, longlba: bool, blocks: u64, block_len: u32, wce: bool) -> Vec<u8> {
        let desc_len = if longlba { 16 } else { 8 };
        let mut data = vec![0u8; header_len + desc_len + 20];
        if header_len == 4 {
            data[3] = desc_len as u8;
        } else {
            if longlba {
                data[4] = 0x01;
            }
            data[6..8].copy_from_slice(&(desc_len as u16).to_be_bytes());
        }
        let desc = &mut data[header_len..header_len + desc_len];
        if longlba {
            desc[0..8].copy_from_slice(&blocks.to_be_bytes());
            desc[12..16].copy_from_slice(&block_len.to_be_bytes());
        } else {
            desc[0..4].copy_from_slice(&(blocks as u32).to_be_bytes());
            desc[5] = (block_len >> 16) as u8;
            desc[6] = (block_len >> 8) as u8;
            desc[7] = block_len as u8;
        }
        let page_off = header_len + desc_len;
        data[page_off] = page::CACHING;
        data[page_off + 1] = 0x12;
        if wce {
            data[page_off + 2] = 0x04;
        }
        data
    }

    #[test]
    fn mode_select_6_matching_descriptor_is_accepted() {
        let ctx = small_ctx();
        let mut t = FakeTransport { set_features_calls: 0 };
        let data = caching_page_param_list(4, false, ctx.max_lba() + 1, ctx.block_size(), true);
        let cdb = [opcode::MODE_SELECT_6, 0x10, 0, 0, data.len() as u8, 0];
        let mut sense = [0u8; 18];
        let r = mode_select_6(&ctx, &mut t, CdbView::new(&cdb), &data, &mut sense, false, Duration::from_secs(1));
        assert_eq!(r.status, crate::sense::scsi_status::GOOD);
        assert_eq!(t.set_features_calls, 1);
    }

    #[test]
    fn mode_select_10_mismatched_block_size_is_rejected() {
        let ctx = small_ctx();
        let mut t = FakeTransport { set_features_calls: 0 };
        let data = caching_page_param_list(8, false, ctx.max_lba() + 1, ctx.block_size() * 2, true);
        let cdb = [opcode::MODE_SELECT_10, 0x10, 0, 0, 0, 0, 0, 0, data.len() as u8, 0];
        let mut sense = [0u8; 18];
        let r = mode_select_10(&ctx, &mut t, CdbView::new(&cdb), &data, &mut sense, false, Duration::from_secs(1));
        assert_eq!(r.status, crate::sense::scsi_status::CHECK_CONDITION);
        assert_eq!(sense[2], sense_key::ILLEGAL_REQUEST);
        assert_eq!(sense[12], 0x26);
        assert_eq!(t.set_features_calls, 0);
    }

    #[test]
    fn mode_select_10_mismatched_block_count_longlba_is_rejected() {
        let ctx = sample_ctx();
        let mut t = FakeTransport { set_features_calls: 0 };
        let data = caching_page_param_list(8, true, ctx.max_lba(), ctx.block_size(), true);
        let cdb = [opcode::MODE_SELECT_10, 0x10, 0, 0, 0, 0, 0, 0, data.len() as u8, 0];
        let mut sense = [0u8; 18];
        let r = mode_select_10(&ctx, &mut t, CdbView::new(&cdb), &data, &mut sense, false, Duration::from_secs(1));
        assert_eq!(r.status, crate::sense::scsi_status::CHECK_CONDITION);
        assert_eq!(sense[12], 0x26);
        assert_eq!(t.set_features_calls, 0);
    }

    #[test]
    fn mode_select_6_zero_length_descriptor_skips_validation() {
        let ctx = sample_ctx();
        let mut t = FakeTransport { set_features_calls: 0 };
        let mut data = vec![0u8; 4 + 10];
        data[3] = 0;
        data[4] = page::CACHING;
        data[5] = 0x12;
        data[6] = 0x04;
        let cdb = [opcode::MODE_SELECT_6, 0x10, 0, 0, data.len() as u8, 0];
        let mut sense = [0u8; 18];
        let r = mode_select_6(&ctx, &mut t, CdbView::new(&cdb), &data, &mut sense, false, Duration::from_secs(1));
        assert_eq!(r.status, crate::sense::scsi_status::GOOD);
        assert_eq!(t.set_features_calls, 1);
    }

    #[test]
    fn mode_sense_10_caching_matches_s3() {
        let mut ctx = sample_ctx();
        ctx.controller.vwc = 0x01;
        let cdb = [opcode::MODE_SENSE_10, 0x00, 0x08, 0, 0, 0, 0, 0, 0x14, 0]; // S3 CDB: `5A 00 08 00 00 00 00 00 14 00`
        let mut data = [0u8; 20];
        let mut sense = [0u8; 18];
        let r = mode_sense_10(&ctx, CdbView::new(&cdb), &mut data, &mut sense, false);
        assert_eq!(r.status, crate::sense::scsi_status::GOOD);
        let header_len = 8usize;
        assert_eq!(data[4] & 0x01, 0); // LONGLBA=0
        let page_off = header_len + 8;
        assert_eq!(data[page_off] & 0x3F, page::CACHING);
        assert_eq!(data[page_off + 2] & 0x04, 0x04); // WCE set
    }

    #[test]
    fn unsupported_page_is_rejected() {
        let ctx = sample_ctx();
        let cdb = [opcode::MODE_SENSE_6, 0, 0x3E, 0, 0xFF, 0];
        let mut data = [0u8; 255];
        let mut sense = [0u8; 18];
        let r = mode_sense_6(&ctx, CdbView::new(&cdb), &mut data, &mut sense, false);
        assert_eq!(r.status, crate::sense::scsi_status::CHECK_CONDITION);
    }

    #[test]
    fn changeable_caching_page_only_exposes_wce() {
        let ctx = sample_ctx();
        let cdb = [opcode::MODE_SENSE_6, 0, 0x48, 0, 0xFF, 0]; // PC=01 (changeable), page=08h
        let mut data = [0u8; 255];
        let mut sense = [0u8; 18];
        let r = mode_sense_6(&ctx, CdbView::new(&cdb), &mut data, &mut sense, false);
        assert_eq!(r.status, crate::sense::scsi_status::GOOD);
        let header_len = 4usize;
        let page_off = header_len + 8;
        assert_eq!(data[page_off + 2], 0x04);
    }
}
