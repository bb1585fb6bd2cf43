//! SNTL — a stateless SCSI-to-NVMe translation layer
//!
//! This crate implements the translation core described for SCSI-over-NVMe
//! bridges: it turns SCSI CDBs into NVMe Admin/IO commands and synthesizes
//! SCSI sense data and response buffers from NVMe completions and Identify
//! data. It owns no device handle and runs no I/O of its own — callers
//! supply an [`NvmeTransport`](transport::NvmeTransport) implementation and
//! drive everything through [`dispatch::translate`].
//!
//! # Example
//!
//! ```no_run
//! use sntl::dispatch::translate;
//! use sntl::identify::DeviceCtx;
//! use sntl::cdb::{ScsiIo, Direction};
//! use sntl::transport::{NvmeTransport, NvmeCompletion, BufDir, ResetKind};
//! use std::time::Duration;
//!
//! struct MyTransport;
//! impl NvmeTransport for MyTransport {
//!     fn issue_admin(&mut self, _o: u8, _n: u32, _c: [u32; 6], _d: BufDir<'_>, _t: Duration) -> NvmeCompletion {
//!         NvmeCompletion::new(0, 0)
//!     }
//!     fn issue_io(&mut self, _o: u8, _n: u32, _c: [u32; 6], _d: BufDir<'_>, _t: Duration) -> NvmeCompletion {
//!         NvmeCompletion::new(0, 0)
//!     }
//!     fn reset(&mut self, _kind: ResetKind) {}
//! }
//!
//! let mut ctx = DeviceCtx::new(1);
//! let mut transport = MyTransport;
//! let cdb = [0x00u8, 0, 0, 0, 0, 0]; // TEST UNIT READY
//! let mut data = [0u8; 0];
//! let mut sense = [0u8; 18];
//! let mut io = ScsiIo {
//!     cdb: &cdb,
//!     direction: Direction::None,
//!     data: &mut data,
//!     data_len: 0,
//!     sense: &mut sense,
//!     timeout: Duration::from_secs(1),
//!     first_segment: true,
//!     last_segment: true,
//! };
//! let result = translate(&mut ctx, &mut transport, &mut io);
//! ```

pub mod capacity;
pub mod cdb;
pub mod dispatch;
pub mod endian;
pub mod error;
pub mod identify;
pub mod inquiry;
pub mod log_sense;
pub mod misc_commands;
pub mod mode;
pub mod persistent_reserve;
pub mod read_write;
pub mod report_opcodes;
pub mod request_sense;
pub mod sanitize;
pub mod sense;
pub mod start_stop;
pub mod status;
pub mod transport;
pub mod unmap;
pub mod validate;
pub mod write_buffer;

pub use cdb::{CdbView, Direction, ScsiIo, ScsiResult};
pub use dispatch::translate;
pub use error::{SntlError, SntlResult};
pub use identify::DeviceCtx;
pub use transport::{BufDir, NvmeCompletion, NvmeTransport, ResetKind};

/// Version of this library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
