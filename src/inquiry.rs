//! INQUIRY (12h) — C5, spec §4.5.1
//!
//! Standard inquiry data plus the EVPD pages SNTL advertises: Supported
//! VPD Pages (00h), Unit Serial Number (80h), Device Identification
//! (83h), Extended INQUIRY Data (86h), Block Limits (B0h), Block Device
//! Characteristics (B1h), Logical Block Provisioning (B2h).

use crate::cdb::{CdbView, ScsiResult};
use crate::endian::{copy_space_padded, put_be_u16, put_be_u32};
use crate::identify::DeviceCtx;
use crate::sense::emit_invalid_field_in_cdb;
use crate::validate::{rf, scan_reserved, validate_control_byte};

pub const INQUIRY: u8 = 0x12;

pub mod page {
    pub const SUPPORTED: u8 = 0x00;
    pub const UNIT_SERIAL_NUMBER: u8 = 0x80;
    pub const DEVICE_IDENTIFICATION: u8 = 0x83;
    pub const EXTENDED_INQUIRY: u8 = 0x86;
    pub const BLOCK_LIMITS: u8 = 0xB0;
    pub const BLOCK_DEVICE_CHARACTERISTICS: u8 = 0xB1;
    pub const LOGICAL_BLOCK_PROVISIONING: u8 = 0xB2;
}

const SUPPORTED_PAGES: [u8; 7] = [
    page::SUPPORTED,
    page::UNIT_SERIAL_NUMBER,
    page::DEVICE_IDENTIFICATION,
    page::EXTENDED_INQUIRY,
    page::BLOCK_LIMITS,
    page::BLOCK_DEVICE_CHARACTERISTICS,
    page::LOGICAL_BLOCK_PROVISIONING,
];

/// Reserved bits in byte 1 of the INQUIRY CDB: only bit 0 (EVPD) is
/// defined; CMDDT (bit 1) was obsoleted by SPC-3 and is treated as
/// reserved here.
const RESERVED: [crate::validate::ReservedField; 1] = [rf(1, 0xFE)];

pub fn inquiry(
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
    if let Some(v) = scan_reserved(view.bytes, &RESERVED) {
        emit_invalid_field_in_cdb(sense, descriptor_format, v.field_pointer, v.bit_pointer);
        return ScsiResult::check_condition();
    }

    let evpd = view.byte(1) & 0x01 != 0;
    let page_code = view.byte(2);

    if !evpd {
        if page_code != 0 {
            emit_invalid_field_in_cdb(sense, descriptor_format, 2, 7);
            return ScsiResult::check_condition();
        }
        let len = standard_inquiry(ctx, data);
        return ScsiResult::good_with_len(len);
    }

    let len = match page_code {
        page::SUPPORTED => vpd_supported(data),
        page::UNIT_SERIAL_NUMBER => vpd_unit_serial_number(ctx, data),
        page::DEVICE_IDENTIFICATION => vpd_device_identification(ctx, data),
        page::EXTENDED_INQUIRY => vpd_extended_inquiry(ctx, data),
        page::BLOCK_LIMITS => vpd_block_limits(ctx, data),
        page::BLOCK_DEVICE_CHARACTERISTICS => vpd_block_device_characteristics(ctx, data),
        page::LOGICAL_BLOCK_PROVISIONING => vpd_logical_block_provisioning(ctx, data),
        _ => {
            emit_invalid_field_in_cdb(sense, descriptor_format, 2, 7);
            return ScsiResult::check_condition();
        }
    };
    ScsiResult::good_with_len(len)
}

mod version {
    pub const SAM5: u16 = 0x00A0;
    pub const SPC4: u16 = 0x0460;
    pub const SBC3: u16 = 0x0600;
}

fn standard_inquiry(ctx: &DeviceCtx, data: &mut [u8]) -> usize {
    let len = data.len().min(96);
    for b in data[..len].iter_mut() {
        *b = 0;
    }
    if len < 5 {
        return len;
    }
    data[0] = 0x00; // peripheral qualifier 0, device type 0 (direct-access)
    data[2] = 0x06; // VERSION: SPC-4
    data[3] = 0x12; // response data format=2, HISUP=1
    data[4] = 92; // additional length
    if len > 7 {
        data[7] = 0x02; // CmdQue
    }
    if len > 15 {
        copy_space_padded(&mut data[8..16], b"NVMe");
    }
    if len > 31 {
        copy_space_padded(&mut data[16..32], &ctx.controller.model_number[..16]);
    }
    if len > 35 {
        let fr = &ctx.controller.firmware_revision;
        let trimmed_len = fr.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
        let trimmed = &fr[..trimmed_len];
        let tail = &trimmed[trimmed.len().saturating_sub(4)..];
        let dst_start = 36 - tail.len();
        data[dst_start..36].copy_from_slice(tail);
        for b in &mut data[32..dst_start] {
            *b = b' ';
        }
    }
    if len > 55 {
        copy_space_padded(&mut data[36..56], &ctx.controller.serial_number);
    }
    if len > 61 {
        put_be_u16(&mut data[56..58], version::SAM5);
        put_be_u16(&mut data[58..60], version::SPC4);
        put_be_u16(&mut data[60..62], version::SBC3);
    }
    len
}

fn vpd_supported(data: &mut [u8]) -> usize {
    let need = 4 + SUPPORTED_PAGES.len();
    let len = data.len().min(need);
    for b in data[..len].iter_mut() {
        *b = 0;
    }
    if len > 1 {
        data[1] = page::SUPPORTED;
    }
    if len > 3 {
        put_be_u16(&mut data[2..4], SUPPORTED_PAGES.len() as u16);
    }
    for (i, &p) in SUPPORTED_PAGES.iter().enumerate() {
        let off = 4 + i;
        if off < len {
            data[off] = p;
        }
    }
    len
}

/// 8-digit uppercase hex NSID, as spec §4.5.1 "80h" requires.
fn nsid_hex8(nsid: u32) -> [u8; 8] {
    let s = format!("{:08X}", nsid);
    let mut out = [0u8; 8];
    out.copy_from_slice(s.as_bytes());
    out
}

fn vpd_unit_serial_number(ctx: &DeviceCtx, data: &mut [u8]) -> usize {
    let ns = &ctx.namespace;
    let body: Vec<u8> = if ns.eui64 != 0 && ns.nguid == 0 {
        underscored_hex_groups(&ns.eui64.to_be_bytes())
    } else if ns.nguid != 0 {
        underscored_hex_groups(&ns.nguid.to_be_bytes())
    } else {
        let mut v = Vec::with_capacity(30);
        v.extend_from_slice(&ctx.controller.serial_number);
        v.push(b'_');
        v.extend_from_slice(&nsid_hex8(ctx.nsid));
        v.push(b'.');
        v
    };

    let need = 4 + body.len();
    let len = data.len().min(need);
    for b in data[..len].iter_mut() {
        *b = 0;
    }
    if len > 1 {
        data[1] = page::UNIT_SERIAL_NUMBER;
    }
    if len > 3 {
        put_be_u16(&mut data[2..4], body.len() as u16);
    }
    let copy_len = len.saturating_sub(4).min(body.len());
    data[4..4 + copy_len].copy_from_slice(&body[..copy_len]);
    len
}

/// Groups of 4 lowercase hex nibbles joined by `_`, with a trailing `.`.
fn underscored_hex_groups(be_bytes: &[u8]) -> Vec<u8> {
    let hex = hex::encode(be_bytes);
    let mut out = Vec::with_capacity(hex.len() + hex.len() / 4 + 1);
    for (i, chunk) in hex.as_bytes().chunks(4).enumerate() {
        if i > 0 {
            out.push(b'_');
        }
        out.extend_from_slice(chunk);
    }
    out.push(b'.');
    out
}

/// Deterministic synthesis used once NGUID and EUI64 are both zero
/// (pre-NVMe-1.1 controllers). Folds PCI VID, the first six bytes of the
/// serial number, and NSID into a pseudo-EUI64.
fn synthesize_pseudo_eui64(vid: u16, serial_number: &[u8; 20], nsid: u32) -> u64 {
    let mut acc = (vid as u64) << 48;
    for &b in &serial_number[..6] {
        acc = acc.rotate_left(8) ^ (b as u64);
    }
    acc ^ nsid as u64
}

fn vpd_device_identification(ctx: &DeviceCtx, data: &mut [u8]) -> usize {
    let ns = &ctx.namespace;
    let needs_synthesis = ns.nguid == 0 && ns.eui64 == 0;
    let eui64 = if needs_synthesis {
        synthesize_pseudo_eui64(ctx.controller.vid, &ctx.controller.serial_number, ctx.nsid)
    } else {
        ns.eui64
    };

    let mut body = Vec::with_capacity(96);
    push_naa_extended(&mut body, ctx.controller.vid, eui64);
    push_naa_locally_assigned(&mut body, eui64);
    push_t10_vendor_id(&mut body, ctx, eui64, needs_synthesis);
    push_scsi_name_string(&mut body, ns.nguid, ns.eui64);
    push_eui64_binary(&mut body, ns.nguid, ns.eui64);

    let need = 4 + body.len();
    let len = data.len().min(need);
    for b in data[..len].iter_mut() {
        *b = 0;
    }
    if len > 1 {
        data[1] = page::DEVICE_IDENTIFICATION;
    }
    if len > 3 {
        put_be_u16(&mut data[2..4], body.len() as u16);
    }
    let copy_len = len.saturating_sub(4).min(body.len());
    data[4..4 + copy_len].copy_from_slice(&body[..copy_len]);
    len
}

/// Designator header: binary code set, PIV=1, LUN association, given type.
fn designator_header(out: &mut Vec<u8>, designator_type: u8, value_len: u8) {
    out.push(0x01); // PROTOCOL_IDENTIFIER=0, CODE_SET=1 (binary)
    out.push(0x80 | (designator_type & 0x0F)); // PIV=1, ASSOCIATION=0 (LUN)
    out.push(0x00);
    out.push(value_len);
}

const NAA_TYPE: u8 = 0x03;

/// NAA extended format 6: 16 bytes — top nibble 6, VID folded into the
/// OUI/vendor-specific-id field, EUI64 as the vendor-id extension.
fn push_naa_extended(out: &mut Vec<u8>, vid: u16, eui64: u64) {
    designator_header(out, NAA_TYPE, 16);
    let mut value = [0u8; 16];
    value[0] = 0x60 | ((vid >> 12) as u8 & 0x0F);
    value[1] = (vid >> 4) as u8;
    value[2] = ((vid << 4) as u8) & 0xF0;
    value[3..8].copy_from_slice(&[0u8; 5]);
    value[8..16].copy_from_slice(&eui64.to_be_bytes());
    out.extend_from_slice(&value);
}

/// NAA locally-assigned format 3: 8 bytes — top nibble 3, low 60 bits of
/// EUI64.
fn push_naa_locally_assigned(out: &mut Vec<u8>, eui64: u64) {
    designator_header(out, NAA_TYPE, 8);
    let value: u64 = (0x3u64 << 60) | (eui64 & 0x0FFF_FFFF_FFFF_FFFF);
    out.extend_from_slice(&value.to_be_bytes());
}

const T10_VENDOR_ID_TYPE: u8 = 0x01;

fn push_t10_vendor_id(out: &mut Vec<u8>, ctx: &DeviceCtx, eui64: u64, needs_synthesis: bool) {
    let mut value = [0u8; 44];
    copy_space_padded(&mut value[0..8], b"NVMe");
    copy_space_padded(&mut value[8..24], &ctx.controller.model_number[..16]);

    let ns = &ctx.namespace;
    if ns.nguid != 0 {
        let hex = hex::encode(ns.nguid.to_be_bytes());
        let n = hex.len().min(20);
        value[24..24 + n].copy_from_slice(&hex.as_bytes()[..n]);
    } else if ns.eui64 != 0 {
        let hex = hex::encode(ns.eui64.to_be_bytes());
        value[24..24 + hex.len()].copy_from_slice(hex.as_bytes());
        for b in &mut value[24 + hex.len()..44] {
            *b = b' ';
        }
    } else {
        debug_assert!(needs_synthesis);
        let vid_hex = format!("{:04x}", ctx.controller.vid);
        value[24..28].copy_from_slice(vid_hex.as_bytes());
        value[28..35].copy_from_slice(&ctx.controller.serial_number[..7]);
        for b in &mut value[35..43] {
            *b = b' ';
        }
        // Legacy NSID-nibble placement (spec.md Design Notes, open
        // question (a)): one hex nibble of NSID at the buffer's final
        // byte, not the truncated offset the original source used.
        let nibble = (ctx.nsid & 0x0F) as u8;
        value[43] = core::char::from_digit(nibble as u32, 16)
            .unwrap()
            .to_ascii_uppercase() as u8;
        let _ = eui64;
    }

    designator_header(out, T10_VENDOR_ID_TYPE, value.len() as u8);
    out.extend_from_slice(&value);
}

const SCSI_NAME_STRING_TYPE: u8 = 0x08;

fn push_scsi_name_string(out: &mut Vec<u8>, nguid: u128, eui64: u64) {
    if nguid != 0 {
        let mut value = Vec::with_capacity(36);
        value.extend_from_slice(b"eui.");
        value.extend_from_slice(hex::encode_upper(nguid.to_be_bytes()).as_bytes());
        designator_header(out, SCSI_NAME_STRING_TYPE, value.len() as u8);
        out.extend_from_slice(&value);
    }
    if eui64 != 0 {
        let mut value = Vec::with_capacity(20);
        value.extend_from_slice(b"eui.");
        value.extend_from_slice(hex::encode_upper(eui64.to_be_bytes()).as_bytes());
        designator_header(out, SCSI_NAME_STRING_TYPE, value.len() as u8);
        out.extend_from_slice(&value);
    }
}

const EUI64_BINARY_TYPE: u8 = 0x02;

fn push_eui64_binary(out: &mut Vec<u8>, nguid: u128, eui64: u64) {
    if nguid != 0 {
        designator_header(out, EUI64_BINARY_TYPE, 16);
        out.extend_from_slice(&nguid.to_be_bytes());
    }
    if eui64 != 0 {
        designator_header(out, EUI64_BINARY_TYPE, 8);
        out.extend_from_slice(&eui64.to_be_bytes());
    }
}

/// DPC (1..7) -> SPT (0,2,1,4,3,5,7), spec §4.5.1 "86h".
fn dpc_to_spt(dpc: u8) -> u8 {
    match dpc {
        1 => 0,
        2 => 2,
        3 => 1,
        4 => 4,
        5 => 3,
        6 => 5,
        7 => 7,
        _ => 0,
    }
}

fn vpd_extended_inquiry(ctx: &DeviceCtx, data: &mut [u8]) -> usize {
    let len = data.len().min(64);
    for b in data[..len].iter_mut() {
        *b = 0;
    }
    if len > 1 {
        data[1] = page::EXTENDED_INQUIRY;
    }
    if len > 3 {
        put_be_u16(&mut data[2..4], 60);
    }
    let protection_type = ctx.namespace.protection_type();
    if len > 4 {
        let spt = if protection_type != 0 {
            dpc_to_spt(protection_type)
        } else {
            0
        };
        let mut b = spt << 3;
        if protection_type != 0 {
            b |= 0x07; // GRD_CHK | APP_CHK | REF_CHK
        }
        data[4] = b;
    }
    if len > 5 {
        data[5] = 0x01; // UASK_SUP
    }
    if len > 6 {
        let mut b = 0u8;
        if ctx.controller.write_uncorrectable_supported() {
            b |= 0x08 | 0x01; // WU_SUP, CRD_SUP
        }
        data[6] = b;
    }
    if len > 7 {
        data[7] = ctx.controller.vwc & 0x01; // WCE
    }
    if len > 8 {
        data[8] = 0x01; // LUICLR
    }
    len
}

fn vpd_block_limits(ctx: &DeviceCtx, data: &mut [u8]) -> usize {
    let len = data.len().min(64);
    for b in data[..len].iter_mut() {
        *b = 0;
    }
    if len > 1 {
        data[1] = page::BLOCK_LIMITS;
    }
    if len > 3 {
        put_be_u16(&mut data[2..4], 60);
    }
    let max_transfer = if ctx.controller.mdts == 0 {
        0
    } else {
        1u32.checked_shl(ctx.controller.mdts as u32).unwrap_or(0)
    };
    if len > 11 {
        put_be_u32(&mut data[8..12], max_transfer);
    }
    let block_size = ctx.block_size().max(1);
    let optimal = 65536u32 / block_size;
    if len > 15 {
        put_be_u32(&mut data[12..16], optimal);
    }
    if ctx.controller.dsm_supported() {
        if len > 23 {
            put_be_u32(&mut data[20..24], u32::MAX);
        }
        if len > 27 {
            put_be_u32(&mut data[24..28], 256);
        }
    }
    len
}

fn vpd_block_device_characteristics(ctx: &DeviceCtx, data: &mut [u8]) -> usize {
    let len = data.len().min(64);
    for b in data[..len].iter_mut() {
        *b = 0;
    }
    if len > 1 {
        data[1] = page::BLOCK_DEVICE_CHARACTERISTICS;
    }
    if len > 3 {
        put_be_u16(&mut data[2..4], 60);
    }
    if len > 5 {
        // 0001h (non-rotating) unless the Rotational Media Information log
        // is available and returned a value (spec.md §4.5.1).
        put_be_u16(&mut data[4..6], ctx.rotation_rate);
    }
    len
}

fn vpd_logical_block_provisioning(ctx: &DeviceCtx, data: &mut [u8]) -> usize {
    let len = data.len().min(8);
    for b in data[..len].iter_mut() {
        *b = 0;
    }
    if len > 1 {
        data[1] = page::LOGICAL_BLOCK_PROVISIONING;
    }
    if len > 3 {
        put_be_u16(&mut data[2..4], 4);
    }
    if len > 5 {
        let mut b5 = 0u8;
        if ctx.controller.dsm_supported() {
            b5 |= 0x80; // LBPU
        }
        if ctx.namespace.dlfeat & 0x07 == 1 {
            b5 |= 0x04; // LBPRZ
        }
        data[5] = b5;
    }
    if len > 6 {
        let provisioning_type = if ctx.namespace.nsfeat & 0x01 != 0 {
            2
        } else if ctx.controller.dsm_supported() {
            1
        } else {
            0
        };
        data[6] = provisioning_type;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identify::{ControllerIdentify, NamespaceIdentify};

    fn sample_ctx() -> DeviceCtx {
        let mut ctx = DeviceCtx::new(1);
        ctx.controller.model_number[..19].copy_from_slice(b"ACME WIDGET NVMe SS");
        ctx.controller.model_number[19] = b'D';
        for b in &mut ctx.controller.model_number[20..] {
            *b = b' ';
        }
        ctx.controller.firmware_revision[..5].copy_from_slice(b"1.2.3");
        for b in &mut ctx.controller.firmware_revision[5..] {
            *b = b' ';
        }
        ctx.controller.serial_number[..8].copy_from_slice(b"SN123456");
        for b in &mut ctx.controller.serial_number[8..] {
            *b = b' ';
        }
        ctx
    }

    #[test]
    fn standard_inquiry_matches_s1() {
        let ctx = sample_ctx();
        let mut data = [0u8; 96];
        let cdb = [0x12, 0x00, 0x00, 0x00, 0x60, 0x00];
        let mut sense = [0u8; 18];
        let r = inquiry(&ctx, CdbView::new(&cdb), &mut data, &mut sense, false);
        assert_eq!(r.status, crate::sense::scsi_status::GOOD);
        assert_eq!(&data[8..16], b"NVMe    ");
        assert_eq!(&data[16..32], b"ACME WIDGET NVMe");
        assert_eq!(&data[32..36], b".2.3"); // last 4 chars of "1.2.3"
        assert_eq!(&data[36..44], b"SN123456");
    }

    #[test]
    fn block_device_characteristics_defaults_to_non_rotating() {
        let ctx = sample_ctx();
        let mut data = [0u8; 64];
        let n = vpd_block_device_characteristics(&ctx, &mut data);
        assert_eq!(n, 64);
        assert_eq!(crate::endian::be_u16(&data[4..6]), 0x0001);
    }

    #[test]
    fn block_device_characteristics_reports_cached_rotation_rate() {
        let mut ctx = sample_ctx();
        ctx.rotation_rate = 0x1538; // 5432 RPM
        let mut data = [0u8; 64];
        vpd_block_device_characteristics(&ctx, &mut data);
        assert_eq!(crate::endian::be_u16(&data[4..6]), 0x1538);
    }

    #[test]
    fn vpd_supported_lists_seven_pages() {
        let mut data = [0u8; 16];
        let n = vpd_supported(&mut data);
        assert_eq!(n, 11);
        assert_eq!(&data[4..11], &SUPPORTED_PAGES);
    }

    #[test]
    fn unit_serial_number_prefers_nguid_over_eui64() {
        let mut ctx = sample_ctx();
        ctx.namespace.eui64 = 0x1122334455667788;
        ctx.namespace.nguid = 0x1111_2222_3333_4444_5555_6666_7777_8888;
        let mut data = [0u8; 64];
        let n = vpd_unit_serial_number(&ctx, &mut data);
        assert_eq!(data[1], page::UNIT_SERIAL_NUMBER);
        assert_eq!(n, 4 + 40);
        assert_eq!(data[4 + 39], b'.');
    }

    #[test]
    fn unit_serial_number_falls_back_to_sn_nsid() {
        let ctx = sample_ctx();
        let mut data = [0u8; 64];
        let n = vpd_unit_serial_number(&ctx, &mut data);
        assert_eq!(data[n - 1], b'.');
        assert!(data[4..n].windows(1).any(|w| w[0] == b'_'));
    }

    #[test]
    fn t10_designator_legacy_nsid_placement() {
        let ctx = sample_ctx(); // NGUID=0, EUI64=0 -> synthesis branch
        let mut out = Vec::new();
        push_t10_vendor_id(&mut out, &ctx, 0, true);
        // header(4) + 44-byte value; NSID=1 -> nibble '1' at the buffer's
        // last byte, not truncated into the header as the source's typo
        // would have done.
        let value = &out[4..48];
        assert_eq!(value.len(), 44);
        assert_eq!(value[43], b'1');
        assert_eq!(&value[0..8], b"NVMe    ");
    }

    #[test]
    fn device_identification_includes_all_designator_families() {
        let mut ctx = sample_ctx();
        ctx.namespace.eui64 = 0xAABBCCDDEEFF0011;
        let mut data = [0u8; 256];
        let mut sense = [0u8; 18];
        let cdb = [0x12, 0x01, 0x83, 0x00, 0xFF, 0x00];
        let r = inquiry(&ctx, CdbView::new(&cdb), &mut data, &mut sense, false);
        assert_eq!(r.status, crate::sense::scsi_status::GOOD);
        assert_eq!(data[1], page::DEVICE_IDENTIFICATION);
        // At least one SCSI Name String ("eui.") designator is present.
        assert!(data[..r.data_out_len]
            .windows(4)
            .any(|w| w == b"eui."));
    }

    #[test]
    fn unsupported_evpd_page_is_rejected() {
        let ctx = sample_ctx();
        let mut data = [0u8; 64];
        let mut sense = [0u8; 252];
        let cdb = [0x12, 0x01, 0xEE, 0x00, 0xFF, 0x00];
        let r = inquiry(&ctx, CdbView::new(&cdb), &mut data, &mut sense, true);
        assert_eq!(r.status, crate::sense::scsi_status::CHECK_CONDITION);
        assert_eq!(sense[1], crate::sense::sense_key::ILLEGAL_REQUEST);
    }
}
