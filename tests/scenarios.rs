//! End-to-end scenarios S1-S6, driven through the public `translate` entry
//! point against a fake transport double.

use std::time::Duration;

use sntl::cdb::Direction;
use sntl::transport::{admin_opcode, io_opcode, BufDir, NvmeCompletion, NvmeTransport, ResetKind};
use sntl::{translate, DeviceCtx, ScsiIo};

/// A transport double whose identify payloads and log pages are
/// pre-seeded per scenario.
struct FakeTransport {
    controller_raw: Vec<u8>,
    namespace_raw: Vec<u8>,
    sanitize_log: Vec<u8>,
}

impl FakeTransport {
    fn new() -> Self {
        Self {
            controller_raw: vec![0u8; 4096],
            namespace_raw: vec![0u8; 4096],
            sanitize_log: vec![0u8; 32],
        }
    }
}

impl NvmeTransport for FakeTransport {
    fn issue_admin(&mut self, opcode: u8, _nsid: u32, cdw: [u32; 6], data: BufDir<'_>, _timeout: Duration) -> NvmeCompletion {
        match opcode {
            admin_opcode::IDENTIFY => {
                if let BufDir::In(buf) = data {
                    let cns = cdw[0];
                    let src = if cns == sntl::transport::cns::CONTROLLER {
                        &self.controller_raw
                    } else {
                        &self.namespace_raw
                    };
                    buf[..src.len().min(buf.len())].copy_from_slice(&src[..src.len().min(buf.len())]);
                }
            }
            admin_opcode::GET_LOG_PAGE => {
                if let BufDir::In(buf) = data {
                    let lid = cdw[0] & 0xFF;
                    if lid as u8 == sntl::log_sense::nvme_log::SANITIZE_STATUS {
                        let n = buf.len().min(self.sanitize_log.len());
                        buf[..n].copy_from_slice(&self.sanitize_log[..n]);
                    }
                }
            }
            _ => {}
        }
        NvmeCompletion::new(0, 0)
    }

    fn issue_io(&mut self, _opcode: u8, _nsid: u32, _cdw: [u32; 6], _data: BufDir<'_>, _timeout: Duration) -> NvmeCompletion {
        NvmeCompletion::new(0, 0)
    }

    fn reset(&mut self, _kind: ResetKind) {}
}

fn pad_ascii(dst: &mut [u8], s: &[u8]) {
    let n = s.len().min(dst.len());
    dst[..n].copy_from_slice(&s[..n]);
    for b in dst[n..].iter_mut() {
        *b = b' ';
    }
}

fn make_io<'a>(cdb: &'a [u8], data: &'a mut [u8], sense: &'a mut [u8]) -> ScsiIo<'a> {
    ScsiIo {
        cdb,
        direction: Direction::FromDevice,
        data,
        data_len: 0,
        sense,
        timeout: Duration::from_secs(1),
        first_segment: true,
        last_segment: true,
    }
}

#[test]
fn s1_inquiry_standard() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut transport = FakeTransport::new();
    pad_ascii(&mut transport.controller_raw[4..24], b"SN123456");
    pad_ascii(&mut transport.controller_raw[24..64], b"ACME WIDGET NVMe SSD");
    pad_ascii(&mut transport.controller_raw[64..72], b"1.2.3");
    transport.namespace_raw[128 + 2] = 9; // LBADS, one LBA format present

    let mut ctx = DeviceCtx::new(1);
    let cdb = [0x12, 0x00, 0x00, 0x00, 0x60, 0x00];
    let mut data = [0u8; 96];
    let mut sense = [0u8; 18];
    let mut io = make_io(&cdb, &mut data, &mut sense);
    let result = translate(&mut ctx, &mut transport, &mut io);

    assert_eq!(result.status, sntl::sense::scsi_status::GOOD);
    assert_eq!(&data[8..16], b"NVMe    ");
    assert_eq!(&data[16..32], b"ACME WIDGET NVMe");
    assert_eq!(&data[32..36], b".2.3");
    assert_eq!(&data[36..44], b"SN123456");
}

#[test]
fn s2_read_capacity_16() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut transport = FakeTransport::new();
    transport.namespace_raw[0..8].copy_from_slice(&0x1_0000_0000u64.to_le_bytes());
    transport.namespace_raw[128 + 2] = 12; // LBADS = 12 -> 4096-byte blocks

    let mut ctx = DeviceCtx::new(1);
    let mut cdb = [0u8; 16];
    cdb[0] = 0x9E;
    cdb[1] = 0x10;
    cdb[13] = 0x20;
    let mut data = [0u8; 32];
    let mut sense = [0u8; 18];
    let mut io = make_io(&cdb, &mut data, &mut sense);
    let result = translate(&mut ctx, &mut transport, &mut io);

    assert_eq!(result.status, sntl::sense::scsi_status::GOOD);
    assert_eq!(sntl::endian::be_u64(&data[0..8]), 0xFFFFFFFF);
    assert_eq!(sntl::endian::be_u32(&data[8..12]), 0x1000);
}

#[test]
fn s3_mode_sense_10_caching_vwc_enabled() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut transport = FakeTransport::new();
    transport.controller_raw[525] = 0x01; // VWC
    transport.namespace_raw[128 + 2] = 9;

    let mut ctx = DeviceCtx::new(1);
    let cdb = [0x5A, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x14, 0x00];
    let mut data = [0u8; 20];
    let mut sense = [0u8; 18];
    let mut io = make_io(&cdb, &mut data, &mut sense);
    let result = translate(&mut ctx, &mut transport, &mut io);

    assert_eq!(result.status, sntl::sense::scsi_status::GOOD);
    assert_eq!(data[4], 0x00); // LONGLBA clear (LLBAA not requested)
    assert_eq!(data[16], 0x08); // Caching page code, after the 8-byte header + 8-byte block descriptor
    assert_eq!(data[18] & 0x04, 0x04); // WCE set from VWC
}

#[test]
fn s4_invalid_opcode() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut transport = FakeTransport::new();
    let mut ctx = DeviceCtx::new(1).with_descriptor_sense(true);
    let cdb = [0xAB, 0x00, 0x00, 0x00, 0x00, 0x00];
    let mut data = [0u8; 0];
    let mut sense = [0u8; 18];
    let mut io = make_io(&cdb, &mut data, &mut sense);
    let result = translate(&mut ctx, &mut transport, &mut io);

    assert_eq!(result.status, sntl::sense::scsi_status::CHECK_CONDITION);
    assert_eq!(sense[0], 0x72);
    assert_eq!(sense[1], sntl::sense::sense_key::ILLEGAL_REQUEST);
    assert_eq!(sense[2], 0x20);
    assert_eq!(sense[3], 0x00);
    assert_eq!(sense[8], sntl::sense::descriptor_type::SENSE_KEY_SPECIFIC);
    assert_eq!(sense[12] & 0xC0, 0xC0); // VALID + CD
    assert_eq!(sntl::endian::be_u16(&sense[13..15]), 0);
}

#[test]
fn s5_unmap_rejects_over_max_lba() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut transport = FakeTransport::new();
    transport.namespace_raw[0..8].copy_from_slice(&0x10000u64.to_le_bytes()); // NSZE -> max LBA 0xFFFF
    transport.namespace_raw[128 + 2] = 9;

    let mut ctx = DeviceCtx::new(1);
    let cdb = [0x42, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
    let mut data = [0u8; 24];
    data[2..4].copy_from_slice(&16u16.to_be_bytes()); // block descriptor data length = 16 (one descriptor)
    data[8..16].copy_from_slice(&0x10000u64.to_be_bytes()); // LBA beyond MaxLBA
    data[16..20].copy_from_slice(&1u32.to_be_bytes()); // count
    let mut sense = [0u8; 18];
    let mut io = make_io(&cdb, &mut data, &mut sense);
    let result = translate(&mut ctx, &mut transport, &mut io);

    assert_eq!(result.status, sntl::sense::scsi_status::CHECK_CONDITION);
    assert_eq!(sense[2], sntl::sense::sense_key::ILLEGAL_REQUEST);
    assert_eq!(sense[12], 0x21);
    assert_eq!(sense[13], 0x00);
    assert_eq!(sntl::endian::be_u16(&sense[16..18]), 8);
}

#[test]
fn s6_request_sense_during_sanitize_in_progress() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut transport = FakeTransport::new();
    transport.namespace_raw[128 + 2] = 9;
    transport.sanitize_log[2..4].copy_from_slice(&0x0002u16.to_le_bytes()); // sstat = in progress
    transport.sanitize_log[0..2].copy_from_slice(&0x4000u16.to_le_bytes()); // sprog

    let mut ctx = DeviceCtx::new(1);
    let cdb = [0x03, 0x00, 0x00, 0x00, 0x00, 0x00];
    let mut data = [0u8; 0];
    let mut sense = [0u8; 18];
    let mut io = make_io(&cdb, &mut data, &mut sense);
    let result = translate(&mut ctx, &mut transport, &mut io);

    assert_eq!(result.status, sntl::sense::scsi_status::GOOD);
    assert_eq!(sense[2], sntl::sense::sense_key::NOT_READY);
    assert_eq!(sense[12], 0x04);
    assert_eq!(sense[13], 0x1B);
    assert_eq!(sntl::endian::be_u16(&sense[16..18]), 0x4000);
}

#[test]
fn zero_length_sense_buffer_is_captured_in_fallback() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut transport = FakeTransport::new();
    let mut ctx = DeviceCtx::new(1);
    let cdb = [0xAB, 0x00, 0x00, 0x00, 0x00, 0x00]; // unknown opcode, same as S4
    let mut data = [0u8; 0];
    let mut sense: [u8; 0] = [];
    let mut io = make_io(&cdb, &mut data, &mut sense);
    let result = translate(&mut ctx, &mut transport, &mut io);

    assert_eq!(result.status, sntl::sense::scsi_status::CHECK_CONDITION);
    assert_eq!(ctx.fallback_sense[2], sntl::sense::sense_key::ILLEGAL_REQUEST);
    assert_eq!(ctx.fallback_sense[12], 0x20);
}
