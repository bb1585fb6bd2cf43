//! Sense-data builder (C1)
//!
//! Builds a typed descriptor list, then serializes it to either fixed
//! (70h/71h) or descriptor (72h/73h) format at emit time, per Design Note
//! "Dual-format sense data". Descriptor types with no fixed-format
//! equivalent (another-progress, forwarded-sense) are silently dropped on
//! fixed-format emit.

/// SCSI status codes (spec.md §7).
pub mod scsi_status {
    pub const GOOD: u8 = 0x00;
    pub const CHECK_CONDITION: u8 = 0x02;
    pub const CONDITION_MET: u8 = 0x04;
    pub const BUSY: u8 = 0x08;
    pub const RESERVATION_CONFLICT: u8 = 0x18;
    pub const TASK_SET_FULL: u8 = 0x28;
    pub const ACA_ACTIVE: u8 = 0x30;
    pub const TASK_ABORTED: u8 = 0x40;
}

/// Sense key values (`scsi_helper.h` `eSenseKeyValuesEnum`).
pub mod sense_key {
    pub const NO_SENSE: u8 = 0x00;
    pub const RECOVERED_ERROR: u8 = 0x01;
    pub const NOT_READY: u8 = 0x02;
    pub const MEDIUM_ERROR: u8 = 0x03;
    pub const HARDWARE_ERROR: u8 = 0x04;
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    pub const UNIT_ATTENTION: u8 = 0x06;
    pub const DATA_PROTECT: u8 = 0x07;
    pub const BLANK_CHECK: u8 = 0x08;
    pub const VENDOR_SPECIFIC: u8 = 0x09;
    pub const ABORTED_COMMAND: u8 = 0x0B;
    pub const VOLUME_OVERFLOW: u8 = 0x0D;
    pub const MISCOMPARE: u8 = 0x0E;
}

/// Response codes (`scsi_helper.h` `eSenseFormatEnum`).
pub mod response_code {
    pub const FIXED_CURRENT: u8 = 0x70;
    pub const FIXED_DEFERRED: u8 = 0x71;
    pub const DESC_CURRENT: u8 = 0x72;
    pub const DESC_DEFERRED: u8 = 0x73;
}

/// Sense descriptor type values (`scsi_helper.h` `eSenseDescriptorTypeEnum`).
pub mod descriptor_type {
    pub const INFORMATION: u8 = 0x00;
    pub const COMMAND_SPECIFIC: u8 = 0x01;
    pub const SENSE_KEY_SPECIFIC: u8 = 0x02;
    pub const FIELD_REPLACEABLE_UNIT: u8 = 0x03;
    pub const STREAM_COMMANDS: u8 = 0x04;
    pub const BLOCK_COMMANDS: u8 = 0x05;
    pub const ATA_STATUS_RETURN: u8 = 0x09;
    pub const ANOTHER_PROGRESS_INDICATION: u8 = 0x0A;
    pub const USER_DATA_SEGMENT_REFERRAL: u8 = 0x0B;
    pub const FORWARDED_SENSE_DATA: u8 = 0x0C;
    pub const DIRECT_ACCESS_BLOCK_DEVICE: u8 = 0x0D;
    pub const DEVICE_DESIGNATION: u8 = 0x0E;
    pub const MICROCODE_ACTIVATION: u8 = 0x0F;
}

/// A single typed sense descriptor, built by command handlers and either
/// serialized verbatim (descriptor format) or folded into the fixed
/// 18-byte layout (fixed format).
#[derive(Debug, Clone)]
pub enum SenseDescriptor {
    Information { info: u64 },
    CommandSpecific { info: u64 },
    FieldPointer {
        cdb_or_data: bool, // true = CDB, false = parameter data
        bit_pointer_valid: bool,
        bit_pointer: u8,
        field_pointer: u16,
    },
    Progress { progress: u16 },
    Fru { fru: u8 },
    Stream { filemark: bool, eom: bool, ili: bool },
    Block { ili: bool },
    AtaStatusReturn {
        extend: bool,
        error: u8,
        count: u16,
        lba: u64,
        device: u8,
        status: u8,
    },
    DirectAccessBlock {
        ili: bool,
        eom: bool,
        filemark: bool,
        fru: u8,
        info: u32,
        cmd_specific: u32,
    },
}

impl SenseDescriptor {
    fn type_code(&self) -> u8 {
        match self {
            SenseDescriptor::Information { .. } => descriptor_type::INFORMATION,
            SenseDescriptor::CommandSpecific { .. } => descriptor_type::COMMAND_SPECIFIC,
            SenseDescriptor::FieldPointer { .. } => descriptor_type::SENSE_KEY_SPECIFIC,
            SenseDescriptor::Progress { .. } => descriptor_type::SENSE_KEY_SPECIFIC,
            SenseDescriptor::Fru { .. } => descriptor_type::FIELD_REPLACEABLE_UNIT,
            SenseDescriptor::Stream { .. } => descriptor_type::STREAM_COMMANDS,
            SenseDescriptor::Block { .. } => descriptor_type::BLOCK_COMMANDS,
            SenseDescriptor::AtaStatusReturn { .. } => descriptor_type::ATA_STATUS_RETURN,
            SenseDescriptor::DirectAccessBlock { .. } => descriptor_type::DIRECT_ACCESS_BLOCK_DEVICE,
        }
    }

    /// Serialize this one descriptor (type+length+payload) into `buf`,
    /// returning the number of bytes written, or 0 if it didn't fit.
    fn write_descriptor_format(&self, buf: &mut [u8]) -> usize {
        match self {
            SenseDescriptor::Information { info } => {
                if buf.len() < 12 {
                    return 0;
                }
                buf[0] = self.type_code();
                buf[1] = 0x0A;
                buf[2] = 0x80; // VALID bit
                crate::endian::put_be_u64(&mut buf[4..12], *info);
                12
            }
            SenseDescriptor::CommandSpecific { info } => {
                if buf.len() < 12 {
                    return 0;
                }
                buf[0] = self.type_code();
                buf[1] = 0x0A;
                crate::endian::put_be_u64(&mut buf[4..12], *info);
                12
            }
            SenseDescriptor::FieldPointer {
                cdb_or_data,
                bit_pointer_valid,
                bit_pointer,
                field_pointer,
            } => {
                if buf.len() < 8 {
                    return 0;
                }
                buf[0] = self.type_code();
                buf[1] = 0x06;
                let mut b4 = bit_pointer & 0x07;
                if *bit_pointer_valid {
                    b4 |= 0x08;
                }
                if *cdb_or_data {
                    b4 |= 0x40;
                }
                b4 |= 0x80;
                buf[4] = b4;
                crate::endian::put_be_u16(&mut buf[5..7], *field_pointer);
                8
            }
            SenseDescriptor::Progress { progress } => {
                if buf.len() < 8 {
                    return 0;
                }
                buf[0] = self.type_code();
                buf[1] = 0x06;
                buf[4] = 0x80;
                crate::endian::put_be_u16(&mut buf[5..7], *progress);
                8
            }
            SenseDescriptor::Fru { fru } => {
                if buf.len() < 3 {
                    return 0;
                }
                buf[0] = self.type_code();
                buf[1] = 0x01;
                buf[2] = *fru;
                3
            }
            SenseDescriptor::Stream { filemark, eom, ili } => {
                if buf.len() < 3 {
                    return 0;
                }
                buf[0] = self.type_code();
                buf[1] = 0x01;
                let mut b = 0u8;
                if *filemark {
                    b |= 0x80;
                }
                if *eom {
                    b |= 0x40;
                }
                if *ili {
                    b |= 0x20;
                }
                buf[2] = b;
                3
            }
            SenseDescriptor::Block { ili } => {
                if buf.len() < 3 {
                    return 0;
                }
                buf[0] = self.type_code();
                buf[1] = 0x01;
                buf[2] = if *ili { 0x20 } else { 0 };
                3
            }
            SenseDescriptor::AtaStatusReturn {
                extend,
                error,
                count,
                lba,
                device,
                status,
            } => {
                if buf.len() < 14 {
                    return 0;
                }
                buf[0] = self.type_code();
                buf[1] = 0x0C;
                buf[2] = if *extend { 0x01 } else { 0 };
                buf[3] = *error;
                buf[4] = (*count & 0xFF) as u8;
                buf[5] = (*count >> 8) as u8;
                let lba_bytes = lba.to_le_bytes();
                // LBA(7:0), LBA(15:8), LBA(23:16), then the extended
                // upper three bytes, per SAT-3 Table 226.
                buf[6] = lba_bytes[0];
                buf[7] = lba_bytes[1];
                buf[8] = lba_bytes[2];
                buf[9] = lba_bytes[3];
                buf[10] = lba_bytes[4];
                buf[11] = lba_bytes[5];
                buf[12] = *device;
                buf[13] = *status;
                14
            }
            SenseDescriptor::DirectAccessBlock {
                ili,
                eom,
                filemark,
                fru,
                info,
                cmd_specific,
            } => {
                if buf.len() < 12 {
                    return 0;
                }
                buf[0] = self.type_code();
                buf[1] = 0x0A;
                let mut b2 = 0u8;
                if *filemark {
                    b2 |= 0x80;
                }
                if *eom {
                    b2 |= 0x40;
                }
                if *ili {
                    b2 |= 0x20;
                }
                buf[2] = b2;
                buf[3] = *fru;
                crate::endian::put_be_u32(&mut buf[4..8], *info);
                crate::endian::put_be_u32(&mut buf[8..12], *cmd_specific);
                12
            }
        }
    }
}

/// Emit sense data into `sense_buf`, in descriptor or fixed format
/// according to `descriptor_format`. Silently truncates to `sense_buf`'s
/// length; never fails (spec.md §4.1).
pub fn emit_sense(
    sense_buf: &mut [u8],
    key: u8,
    asc: u8,
    ascq: u8,
    descriptor_format: bool,
    descriptors: &[SenseDescriptor],
) {
    for b in sense_buf.iter_mut() {
        *b = 0;
    }
    if sense_buf.is_empty() {
        return;
    }
    if descriptor_format {
        emit_descriptor_format(sense_buf, key, asc, ascq, descriptors);
    } else {
        emit_fixed_format(sense_buf, key, asc, ascq, descriptors);
    }
}

fn emit_descriptor_format(buf: &mut [u8], key: u8, asc: u8, ascq: u8, descriptors: &[SenseDescriptor]) {
    if buf.len() < 8 {
        buf[0] = response_code::DESC_CURRENT;
        return;
    }
    buf[0] = response_code::DESC_CURRENT;
    buf[1] = key & 0x0F;
    buf[2] = asc;
    buf[3] = ascq;
    let mut offset = 8usize;
    for d in descriptors {
        if offset >= buf.len() {
            break;
        }
        let written = d.write_descriptor_format(&mut buf[offset..]);
        offset += written;
    }
    let additional_len = offset.saturating_sub(8).min(u8::MAX as usize);
    buf[7] = additional_len as u8;
}

fn emit_fixed_format(buf: &mut [u8], key: u8, asc: u8, ascq: u8, descriptors: &[SenseDescriptor]) {
    let len = buf.len().min(18);
    buf[0] = response_code::FIXED_CURRENT;
    if len > 2 {
        buf[2] = key & 0x0F;
    }
    if len > 7 {
        buf[7] = 10;
    }
    if len > 13 {
        buf[12] = asc;
        buf[13] = ascq;
    }
    for d in descriptors {
        match d {
            SenseDescriptor::Information { info } => {
                if len > 6 {
                    let clamped = (*info).min(u32::MAX as u64) as u32;
                    crate::endian::put_be_u32(&mut buf[3..7], clamped);
                    set_valid_bit(buf);
                }
            }
            SenseDescriptor::CommandSpecific { info } => {
                if len > 11 {
                    let clamped = (*info).min(u32::MAX as u64) as u32;
                    crate::endian::put_be_u32(&mut buf[8..12], clamped);
                }
            }
            SenseDescriptor::FieldPointer {
                cdb_or_data,
                bit_pointer_valid,
                bit_pointer,
                field_pointer,
            } => {
                if len > 17 {
                    let mut b15 = bit_pointer & 0x07;
                    if *bit_pointer_valid {
                        b15 |= 0x08;
                    }
                    if *cdb_or_data {
                        b15 |= 0x40;
                    }
                    b15 |= 0x80;
                    buf[15] = b15;
                    crate::endian::put_be_u16(&mut buf[16..18], *field_pointer);
                }
            }
            SenseDescriptor::Progress { progress } => {
                if len > 17 {
                    buf[15] = 0x80;
                    crate::endian::put_be_u16(&mut buf[16..18], *progress);
                }
            }
            SenseDescriptor::Fru { fru } => {
                if len > 14 {
                    buf[14] = *fru;
                }
            }
            SenseDescriptor::Stream { filemark, eom, ili } => {
                if len > 2 {
                    if *filemark {
                        buf[2] |= 0x80;
                    }
                    if *eom {
                        buf[2] |= 0x40;
                    }
                    if *ili {
                        buf[2] |= 0x20;
                    }
                }
            }
            SenseDescriptor::Block { ili } => {
                if len > 2 && *ili {
                    buf[2] |= 0x20;
                }
            }
            SenseDescriptor::AtaStatusReturn {
                extend,
                error,
                count,
                lba,
                device,
                status,
            } => {
                if len > 11 {
                    let lba_bytes = lba.to_le_bytes();
                    buf[3] = *error;
                    buf[4] = (*count & 0xFF) as u8;
                    buf[5] = lba_bytes[0];
                    buf[6] = lba_bytes[1];
                    buf[7] = lba_bytes[2];
                    let mut b8 = lba_bytes[3];
                    if *extend {
                        b8 |= 0x80;
                    }
                    let upper_nonzero = lba_bytes[4..].iter().any(|&x| x != 0) || lba_bytes[3] & 0x80 != 0;
                    if upper_nonzero {
                        b8 |= 0x20;
                    }
                    if (*count >> 8) != 0 {
                        b8 |= 0x40;
                    }
                    buf[8] = b8;
                    if buf.len() > 9 {
                        buf[9] = *device;
                    }
                    if buf.len() > 10 {
                        buf[10] = *status;
                    }
                }
            }
            SenseDescriptor::DirectAccessBlock {
                ili,
                eom,
                filemark,
                fru,
                info,
                cmd_specific,
            } => {
                if len > 2 {
                    if *filemark {
                        buf[2] |= 0x80;
                    }
                    if *eom {
                        buf[2] |= 0x40;
                    }
                    if *ili {
                        buf[2] |= 0x20;
                    }
                }
                if len > 6 {
                    crate::endian::put_be_u32(&mut buf[3..7], *info);
                    set_valid_bit(buf);
                }
                if len > 11 {
                    crate::endian::put_be_u32(&mut buf[8..12], *cmd_specific);
                }
                if len > 14 {
                    buf[14] = *fru;
                }
            }
        }
    }
}

/// Sets the VALID bit (byte 0 bit 7) that marks the information field as
/// meaningful, per SPC-5.
fn set_valid_bit(buf: &mut [u8]) {
    buf[0] |= 0x80;
}

/// Emit a sense-key-specific field-pointer descriptor directly.
pub fn emit_field_pointer_descriptor(buf: &mut [u8], cd: bool, bpv: bool, bit_pointer: u8, field_pointer: u16) {
    if buf.len() < 7 {
        return;
    }
    buf[0] = descriptor_type::SENSE_KEY_SPECIFIC;
    buf[1] = 0x06;
    let mut b4 = bit_pointer & 0x07;
    if bpv {
        b4 |= 0x08;
    }
    if cd {
        b4 |= 0x40;
    }
    b4 |= 0x80;
    buf[4] = b4;
    crate::endian::put_be_u16(&mut buf[5..7], field_pointer);
}

/// Emit a sense-key-specific progress-indication descriptor directly.
pub fn emit_progress_descriptor(buf: &mut [u8], progress: u16) {
    if buf.len() < 7 {
        return;
    }
    buf[0] = descriptor_type::SENSE_KEY_SPECIFIC;
    buf[1] = 0x06;
    buf[4] = 0x80;
    crate::endian::put_be_u16(&mut buf[5..7], progress);
}

/// Convenience: emit ILLEGAL REQUEST / INVALID FIELD IN CDB with a field
/// pointer descriptor. This is the validator's single failure path.
pub fn emit_invalid_field_in_cdb(sense_buf: &mut [u8], descriptor_format: bool, field_pointer: u16, bit_pointer: u8) {
    emit_sense(
        sense_buf,
        sense_key::ILLEGAL_REQUEST,
        0x24,
        0x00,
        descriptor_format,
        &[SenseDescriptor::FieldPointer {
            cdb_or_data: true,
            bit_pointer_valid: true,
            bit_pointer,
            field_pointer,
        }],
    );
}

/// Convenience: emit ILLEGAL REQUEST / INVALID COMMAND OPERATION CODE —
/// the dispatcher's unknown-opcode path (spec.md §4.7, §7), distinct from
/// [`emit_invalid_field_in_cdb`]'s 24h/00h.
pub fn emit_invalid_opcode(sense_buf: &mut [u8], descriptor_format: bool) {
    emit_sense(
        sense_buf,
        sense_key::ILLEGAL_REQUEST,
        0x20,
        0x00,
        descriptor_format,
        &[SenseDescriptor::FieldPointer {
            cdb_or_data: true,
            bit_pointer_valid: true,
            bit_pointer: 7,
            field_pointer: 0,
        }],
    );
}
