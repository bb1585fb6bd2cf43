//! READ / WRITE / VERIFY 6/10/12/16 (C5, spec §4.5.2)
//!
//! Hot-path commands: parsed and issued without touching the identify
//! cache (it is populated once by the dispatcher before any of these
//! run, per spec.md invariant "populated exactly once").

use std::time::Duration;

use crate::cdb::{CdbView, ScsiResult};
use crate::endian::{be_u16, be_u24, be_u32, be_u64};
use crate::identify::DeviceCtx;
use crate::sense::emit_invalid_field_in_cdb;
use crate::status::map_status_to_sense;
use crate::transport::{io_opcode, BufDir, NvmeTransport};
use crate::validate::{rf, scan_reserved, validate_control_byte, ReservedField};

pub mod opcode {
    pub const READ_6: u8 = 0x08;
    pub const WRITE_6: u8 = 0x0A;
    pub const READ_10: u8 = 0x28;
    pub const WRITE_10: u8 = 0x2A;
    pub const VERIFY_10: u8 = 0x2F;
    pub const READ_12: u8 = 0xA8;
    pub const WRITE_12: u8 = 0xAA;
    pub const VERIFY_12: u8 = 0xAF;
    pub const READ_16: u8 = 0x88;
    pub const WRITE_16: u8 = 0x8A;
    pub const VERIFY_16: u8 = 0x8F;
}

/// RDPROTECT/WRPROTECT/VRPROTECT (0..5) -> NVMe PRINFO nibble (PRACT bit3,
/// PRCHK bits2:0), per spec.md §4.5.2.
const PRINFO_TABLE: [u8; 6] = [0xF, 0x7, 0x3, 0x0, 0x4, 0x7];

fn prinfo_for(protect: u8) -> Option<u8> {
    PRINFO_TABLE.get(protect as usize).copied()
}

struct Parsed {
    lba: u64,
    blocks: u32,
    protect: u8,
    fua: bool,
    /// BYTCHK field, VERIFY only.
    bytchk: u8,
}

const RESERVED_6: [ReservedField; 1] = [rf(1, 0xE0)];
const RESERVED_10_12: [ReservedField; 2] = [rf(1, 0x06), rf(6, 0xE0)];
const RESERVED_16: [ReservedField; 2] = [rf(1, 0x06), rf(14, 0xE0)];

/// VERIFY's byte 1 bits [2:1] carry BYTCHK rather than being reserved, so
/// only bit 0 (obsolete RELADR) is checked here.
const RESERVED_VERIFY_10_12: [ReservedField; 2] = [rf(1, 0x01), rf(6, 0xE0)];
const RESERVED_VERIFY_16: [ReservedField; 2] = [rf(1, 0x01), rf(14, 0xE0)];

fn parse_6(view: CdbView<'_>) -> Parsed {
    let lba = be_u24(&view.bytes[1..4]) as u64 & 0x001F_FFFF;
    let raw_len = view.byte(4);
    let blocks = if raw_len == 0 { 256 } else { raw_len as u32 };
    Parsed {
        lba,
        blocks,
        protect: 0,
        fua: false,
        bytchk: 0,
    }
}

fn parse_10(view: CdbView<'_>) -> Parsed {
    let b1 = view.byte(1);
    Parsed {
        lba: be_u32(&view.bytes[2..6]) as u64,
        blocks: be_u16(&view.bytes[7..9]) as u32,
        protect: (b1 >> 5) & 0x07,
        fua: b1 & 0x08 != 0,
        bytchk: (b1 >> 1) & 0x03,
    }
}

fn parse_12(view: CdbView<'_>) -> Parsed {
    let b1 = view.byte(1);
    Parsed {
        lba: be_u32(&view.bytes[2..6]) as u64,
        blocks: be_u32(&view.bytes[6..10]),
        protect: (b1 >> 5) & 0x07,
        fua: b1 & 0x08 != 0,
        bytchk: (b1 >> 1) & 0x03,
    }
}

fn parse_16(view: CdbView<'_>) -> Parsed {
    let b1 = view.byte(1);
    Parsed {
        lba: be_u64(&view.bytes[2..10]),
        blocks: be_u32(&view.bytes[10..14]),
        protect: (b1 >> 5) & 0x07,
        fua: b1 & 0x08 != 0,
        bytchk: (b1 >> 1) & 0x03,
    }
}

fn validate_common(view: CdbView<'_>, table: &[ReservedField]) -> Option<(u16, u8)> {
    if let Some(v) = validate_control_byte(view) {
        return Some((v.field_pointer, v.bit_pointer));
    }
    if let Some(v) = scan_reserved(view.bytes, table) {
        return Some((v.field_pointer, v.bit_pointer));
    }
    None
}

enum RwOp {
    Read,
    Write,
}

fn do_rw<T: NvmeTransport>(
    op: RwOp,
    ctx: &DeviceCtx,
    transport: &mut T,
    view: CdbView<'_>,
    table: &[ReservedField],
    parsed: Parsed,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    if let Some((fp, bp)) = validate_common(view, table) {
        emit_invalid_field_in_cdb(sense, descriptor_format, fp, bp);
        return ScsiResult::check_condition();
    }
    let Some(prinfo) = prinfo_for(parsed.protect) else {
        emit_invalid_field_in_cdb(sense, descriptor_format, 1, 7);
        return ScsiResult::check_condition();
    };
    if parsed.blocks > 65536 {
        emit_invalid_field_in_cdb(sense, descriptor_format, 7, 7);
        return ScsiResult::check_condition();
    }
    if parsed.blocks == 0 {
        return ScsiResult::good();
    }
    if parsed.lba > ctx.max_lba() || parsed.lba + parsed.blocks as u64 - 1 > ctx.max_lba() {
        crate::sense::emit_sense(
            sense,
            crate::sense::sense_key::ILLEGAL_REQUEST,
            0x21,
            0x00,
            descriptor_format,
            &[],
        );
        return ScsiResult::check_condition();
    }

    let nlb = (parsed.blocks - 1) & 0xFFFF;
    let cdw12 = nlb as u32
        | ((prinfo as u32) << 26)
        | if parsed.fua { 1 << 30 } else { 0 };
    let cdw = [parsed.lba as u32, (parsed.lba >> 32) as u32, cdw12, 0, 0, 0];

    let opcode = match op {
        RwOp::Read => io_opcode::READ,
        RwOp::Write => io_opcode::WRITE,
    };
    let buf_dir = match op {
        RwOp::Read => BufDir::In(data),
        RwOp::Write => BufDir::Out(data),
    };
    let completion = transport.issue_io(opcode, ctx.nsid, cdw, buf_dir, timeout);
    if completion.is_success() {
        let len = match op {
            RwOp::Read => (parsed.blocks as usize) * ctx.block_size() as usize,
            RwOp::Write => 0,
        };
        ScsiResult::good_with_len(len)
    } else {
        map_status_to_sense(completion, sense, descriptor_format);
        ScsiResult::check_condition()
    }
}

pub fn read_6<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    view: CdbView<'_>,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    let parsed = parse_6(view);
    do_rw(RwOp::Read, ctx, transport, view, &RESERVED_6, parsed, data, sense, descriptor_format, timeout)
}

pub fn write_6<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    view: CdbView<'_>,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    let parsed = parse_6(view);
    do_rw(RwOp::Write, ctx, transport, view, &RESERVED_6, parsed, data, sense, descriptor_format, timeout)
}

pub fn read_10<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    view: CdbView<'_>,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    let parsed = parse_10(view);
    do_rw(RwOp::Read, ctx, transport, view, &RESERVED_10_12, parsed, data, sense, descriptor_format, timeout)
}

pub fn write_10<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    view: CdbView<'_>,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    let parsed = parse_10(view);
    do_rw(RwOp::Write, ctx, transport, view, &RESERVED_10_12, parsed, data, sense, descriptor_format, timeout)
}

pub fn read_12<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    view: CdbView<'_>,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    let parsed = parse_12(view);
    do_rw(RwOp::Read, ctx, transport, view, &RESERVED_10_12, parsed, data, sense, descriptor_format, timeout)
}

pub fn write_12<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    view: CdbView<'_>,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    let parsed = parse_12(view);
    do_rw(RwOp::Write, ctx, transport, view, &RESERVED_10_12, parsed, data, sense, descriptor_format, timeout)
}

pub fn read_16<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    view: CdbView<'_>,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    let parsed = parse_16(view);
    do_rw(RwOp::Read, ctx, transport, view, &RESERVED_16, parsed, data, sense, descriptor_format, timeout)
}

pub fn write_16<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    view: CdbView<'_>,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    let parsed = parse_16(view);
    do_rw(RwOp::Write, ctx, transport, view, &RESERVED_16, parsed, data, sense, descriptor_format, timeout)
}

fn verify_common<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    view: CdbView<'_>,
    table: &[ReservedField],
    parsed: Parsed,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    if let Some((fp, bp)) = validate_common(view, table) {
        emit_invalid_field_in_cdb(sense, descriptor_format, fp, bp);
        return ScsiResult::check_condition();
    }
    if parsed.bytchk >= 2 {
        // BYTCHK 10b/11b: unsupported per spec.md Design Notes and Open
        // Question (b).
        emit_invalid_field_in_cdb(sense, descriptor_format, 1, 2);
        return ScsiResult::check_condition();
    }
    if parsed.blocks == 0 {
        return ScsiResult::good();
    }
    if parsed.lba > ctx.max_lba() || parsed.lba + parsed.blocks as u64 - 1 > ctx.max_lba() {
        crate::sense::emit_sense(
            sense,
            crate::sense::sense_key::ILLEGAL_REQUEST,
            0x21,
            0x00,
            descriptor_format,
            &[],
        );
        return ScsiResult::check_condition();
    }

    let nlb = (parsed.blocks - 1) & 0xFFFF;
    let cdw12 = nlb as u32;
    let cdw = [parsed.lba as u32, (parsed.lba >> 32) as u32, cdw12, 0, 0, 0];

    let completion = if parsed.bytchk == 1 {
        transport.issue_io(io_opcode::COMPARE, ctx.nsid, cdw, BufDir::Out(data), timeout)
    } else if ctx.controller.verify_supported() {
        transport.issue_io(io_opcode::VERIFY, ctx.nsid, cdw, BufDir::None, timeout)
    } else {
        emit_invalid_field_in_cdb(sense, descriptor_format, 0, 7);
        return ScsiResult::check_condition();
    };

    if completion.is_success() {
        ScsiResult::good()
    } else {
        map_status_to_sense(completion, sense, descriptor_format);
        ScsiResult::check_condition()
    }
}

pub fn verify_10<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    view: CdbView<'_>,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    let parsed = parse_10(view);
    verify_common(ctx, transport, view, &RESERVED_VERIFY_10_12, parsed, data, sense, descriptor_format, timeout)
}

pub fn verify_12<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    view: CdbView<'_>,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    let parsed = parse_12(view);
    verify_common(ctx, transport, view, &RESERVED_VERIFY_10_12, parsed, data, sense, descriptor_format, timeout)
}

pub fn verify_16<T: NvmeTransport>(
    ctx: &DeviceCtx,
    transport: &mut T,
    view: CdbView<'_>,
    data: &mut [u8],
    sense: &mut [u8],
    descriptor_format: bool,
    timeout: Duration,
) -> ScsiResult {
    let parsed = parse_16(view);
    verify_common(ctx, transport, view, &RESERVED_VERIFY_16, parsed, data, sense, descriptor_format, timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{NvmeCompletion, ResetKind};

    struct FakeTransport {
        last_opcode: Option<u8>,
        calls: u32,
    }

    impl NvmeTransport for FakeTransport {
        fn issue_admin(&mut self, _o: u8, _n: u32, _c: [u32; 6], _d: BufDir<'_>, _t: Duration) -> NvmeCompletion {
            NvmeCompletion::new(0, 0)
        }
        fn issue_io(&mut self, opcode: u8, _n: u32, _c: [u32; 6], _d: BufDir<'_>, _t: Duration) -> NvmeCompletion {
            self.last_opcode = Some(opcode);
            self.calls += 1;
            NvmeCompletion::new(0, 0)
        }
        fn reset(&mut self, _kind: ResetKind) {}
    }

    fn ctx_with_capacity() -> DeviceCtx {
        let mut ctx = DeviceCtx::new(1);
        ctx.namespace.nsze = 0x10000;
        ctx.namespace.nlbaf = 0;
        ctx.namespace.flbas = 0;
        ctx.namespace.lbaf = vec![crate::identify::LbaFormat { ms: 0, lbads: 12, rp: 0 }];
        ctx
    }

    #[test]
    fn zero_length_transfer_is_a_success_noop() {
        let ctx = ctx_with_capacity();
        let mut t = FakeTransport { last_opcode: None, calls: 0 };
        let cdb = [opcode::READ_10, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut data = [0u8; 0];
        let mut sense = [0u8; 18];
        let r = read_10(&ctx, &mut t, CdbView::new(&cdb), &mut data, &mut sense, false, Duration::from_secs(1));
        assert_eq!(r.status, crate::sense::scsi_status::GOOD);
        assert_eq!(t.calls, 0);
    }

    #[test]
    fn lba_past_max_lba_is_rejected() {
        let ctx = ctx_with_capacity();
        let mut t = FakeTransport { last_opcode: None, calls: 0 };
        let mut cdb = [opcode::READ_10, 0, 0, 0, 0, 0, 0, 0, 1, 0];
        cdb[2..6].copy_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
        let mut data = [0u8; 4096];
        let mut sense = [0u8; 18];
        let r = read_10(&ctx, &mut t, CdbView::new(&cdb), &mut data, &mut sense, false, Duration::from_secs(1));
        assert_eq!(r.status, crate::sense::scsi_status::CHECK_CONDITION);
        assert_eq!(sense[12], 0x21);
    }

    #[test]
    fn verify_bytchk_11_is_unsupported() {
        let ctx = ctx_with_capacity();
        let mut t = FakeTransport { last_opcode: None, calls: 0 };
        let cdb = [opcode::VERIFY_10, 0b0000_0110, 0, 0, 0, 0, 0, 0, 1, 0]; // BYTCHK=11
        let mut data = [0u8; 0];
        let mut sense = [0u8; 252];
        let r = verify_10(&ctx, &mut t, CdbView::new(&cdb), &mut data, &mut sense, true, Duration::from_secs(1));
        assert_eq!(r.status, crate::sense::scsi_status::CHECK_CONDITION);
        assert_eq!(sense[1], crate::sense::sense_key::ILLEGAL_REQUEST);
        assert_eq!(sense[2], 0x24);
    }

    #[test]
    fn read_6_zero_length_means_256_blocks() {
        let parsed = parse_6(CdbView::new(&[opcode::READ_6, 0, 0, 0, 0, 0]));
        assert_eq!(parsed.blocks, 256);
    }

    #[test]
    fn protect_field_maps_to_prinfo_table() {
        assert_eq!(prinfo_for(0), Some(0xF));
        assert_eq!(prinfo_for(3), Some(0x0));
        assert_eq!(prinfo_for(6), None);
    }
}
