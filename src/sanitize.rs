//! SANITIZE extension (C5, spec §4.5.10)
//!
//! When IMMED=0 the host expects SANITIZE to block until the operation
//! finishes; SNTL polls the Sanitize Status log every five seconds, the
//! cadence NVMe vendors converge on for this log (spec.md §4.5.10).

use std::thread::sleep;
use std::time::Duration;

use crate::cdb::{CdbView, ScsiResult};
use crate::endian::le_u16;
use crate::identify::DeviceCtx;
use crate::log_sense::{nvme_log, read_log_page};
use crate::sense::{emit_invalid_field_in_cdb, emit_sense, sense_key};
use crate::status::map_status_to_sense;
use crate::transport::{admin_opcode, BufDir, NvmeTransport};
use crate::validate::validate_control_byte;

pub const SANITIZE: u8 = 0x48;

pub mod service_action {
    pub const OVERWRITE: u8 = 0x01;
    pub const BLOCK_ERASE: u8 = 0x02;
    pub const CRYPTO_ERASE: u8 = 0x03;
    pub const EXIT_FAILURE_MODE: u8 = 0x1F;
}

mod sanicap_bit {
    pub const CRYPTO_ERASE: u8 = 0x01;
    pub const BLOCK_ERASE: u8 = 0x02;
    pub const OVERWRITE: u8 = 0x04;
}

const SANITIZE_STATUS_IN_PROGRESS: u16 = 0x02;
const SANITIZE_STATUS_FAILED: u16 = 0x03;
const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub fn sanitize<T: NvmeTransport>(
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
    let immed = view.byte(1) & 0x80 != 0;

    let cdw10 = match action {
        service_action::OVERWRITE => {
            if ctx.controller.sanicap & sanicap_bit::OVERWRITE == 0 {
                emit_invalid_field_in_cdb(sense, descriptor_format, 1, 4);
                return ScsiResult::check_condition();
            }
            if data.len() != 8 {
                emit_sense(sense, sense_key::ILLEGAL_REQUEST, 0x26, 0x00, descriptor_format, &[]);
                return ScsiResult::check_condition();
            }
            let passes = (data[0] & 0x0F).clamp(1, 16) as u32;
            let invert = data[0] & 0x80 != 0;
            3 | (passes << 4) | ((invert as u32) << 8)
        }
        service_action::BLOCK_ERASE => {
            if ctx.controller.sanicap & sanicap_bit::BLOCK_ERASE == 0 {
                emit_invalid_field_in_cdb(sense, descriptor_format, 1, 4);
                return ScsiResult::check_condition();
            }
            2
        }
        service_action::CRYPTO_ERASE => {
            if ctx.controller.sanicap & sanicap_bit::CRYPTO_ERASE == 0 {
                emit_invalid_field_in_cdb(sense, descriptor_format, 1, 4);
                return ScsiResult::check_condition();
            }
            4
        }
        service_action::EXIT_FAILURE_MODE => {
            if ctx.controller.sanicap == 0 {
                emit_invalid_field_in_cdb(sense, descriptor_format, 1, 4);
                return ScsiResult::check_condition();
            }
            1
        }
        _ => {
            emit_invalid_field_in_cdb(sense, descriptor_format, 1, 4);
            return ScsiResult::check_condition();
        }
    };

    let cdw11 = if action == service_action::OVERWRITE {
        crate::endian::be_u32(&data[4..8])
    } else {
        0
    };

    let completion = transport.issue_admin(admin_opcode::SANITIZE, 0, [cdw10, cdw11, 0, 0, 0, 0], BufDir::None, timeout);
    if !completion.is_success() {
        map_status_to_sense(completion, sense, descriptor_format);
        return ScsiResult::check_condition();
    }

    if !immed {
        loop {
            let mut log = [0u8; 32];
            read_log_page(transport, nvme_log::SANITIZE_STATUS, &mut log, timeout);
            let sstat = le_u16(&log[2..4]) & 0x07;
            if sstat == SANITIZE_STATUS_FAILED {
                emit_sense(sense, sense_key::MEDIUM_ERROR, 0x31, 0x03, descriptor_format, &[]);
                return ScsiResult::check_condition();
            }
            if sstat != SANITIZE_STATUS_IN_PROGRESS {
                break;
            }
            sleep(POLL_INTERVAL);
        }
    }

    ScsiResult::good()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{NvmeCompletion, ResetKind};

    struct FakeTransport {
        sanitize_cdw10: Option<u32>,
        sstat: u16,
    }

    impl NvmeTransport for FakeTransport {
        fn issue_admin(&mut self, opcode: u8, _n: u32, cdw: [u32; 6], data: BufDir<'_>, _t: Duration) -> NvmeCompletion {
            if opcode == admin_opcode::SANITIZE {
                self.sanitize_cdw10 = Some(cdw[0]);
            } else if opcode == admin_opcode::GET_LOG_PAGE {
                if let BufDir::In(buf) = data {
                    buf[2..4].copy_from_slice(&self.sstat.to_le_bytes());
                }
            }
            NvmeCompletion::new(0, 0)
        }
        fn issue_io(&mut self, _o: u8, _n: u32, _c: [u32; 6], _d: BufDir<'_>, _t: Duration) -> NvmeCompletion {
            NvmeCompletion::new(0, 0)
        }
        fn reset(&mut self, _kind: ResetKind) {}
    }

    fn ctx_with_sanicap(sanicap: u8) -> DeviceCtx {
        let mut ctx = DeviceCtx::new(1);
        ctx.controller.sanicap = sanicap;
        ctx
    }

    #[test]
    fn crypto_erase_requires_sanicap_bit0() {
        let ctx = ctx_with_sanicap(0);
        let mut t = FakeTransport { sanitize_cdw10: None, sstat: 0 };
        let cdb = [SANITIZE, 0x03, 0, 0, 0, 0]; // IMMED=0, action=CRYPTO_ERASE
        let mut sense = [0u8; 18];
        let r = sanitize(&ctx, &mut t, CdbView::new(&cdb), &[], &mut sense, false, Duration::from_secs(1));
        assert_eq!(r.status, crate::sense::scsi_status::CHECK_CONDITION);
        assert_eq!(t.sanitize_cdw10, None);
    }

    #[test]
    fn crypto_erase_immed_skips_polling() {
        let ctx = ctx_with_sanicap(sanicap_bit::CRYPTO_ERASE);
        let mut t = FakeTransport { sanitize_cdw10: None, sstat: SANITIZE_STATUS_IN_PROGRESS };
        let cdb = [SANITIZE, 0x83, 0, 0, 0, 0]; // IMMED=1, action=CRYPTO_ERASE
        let mut sense = [0u8; 18];
        let r = sanitize(&ctx, &mut t, CdbView::new(&cdb), &[], &mut sense, false, Duration::from_secs(1));
        assert_eq!(r.status, crate::sense::scsi_status::GOOD);
        assert_eq!(t.sanitize_cdw10, Some(4));
    }

    #[test]
    fn block_erase_polls_until_complete() {
        let ctx = ctx_with_sanicap(sanicap_bit::BLOCK_ERASE);
        let mut t = FakeTransport { sanitize_cdw10: None, sstat: 0x01 }; // already "completed"
        let cdb = [SANITIZE, 0x02, 0, 0, 0, 0]; // IMMED=0
        let mut sense = [0u8; 18];
        let r = sanitize(&ctx, &mut t, CdbView::new(&cdb), &[], &mut sense, false, Duration::from_secs(1));
        assert_eq!(r.status, crate::sense::scsi_status::GOOD);
        assert_eq!(t.sanitize_cdw10, Some(2));
    }
}
