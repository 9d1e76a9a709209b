// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register access through a VME master window device.
//!
//! The bridge driver maps a window of A24 space onto a character device;
//! a positional read or write of four bytes at offset N is one bus cycle at
//! address N. A cycle nobody answers comes back as an I/O error.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use byteorder::{BigEndian, ByteOrder};
use drv_vme_api::{RegisterPort, BUS_NOT_READY};

pub struct DevicePort {
    file: File,
    path: PathBuf,
    bus_errors: u64,
}

impl DevicePort {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        Ok(Self {
            file,
            path: path.to_owned(),
            bus_errors: 0,
        })
    }

    /// Cycles that failed, other than probes.
    pub fn bus_errors(&self) -> u64 {
        self.bus_errors
    }

    fn cycle_read(&self, addr: u32) -> std::io::Result<u32> {
        let mut buf = [0; 4];
        self.file.read_exact_at(&mut buf, u64::from(addr))?;
        Ok(BigEndian::read_u32(&buf))
    }
}

impl RegisterPort for DevicePort {
    fn read32(&mut self, addr: u32) -> u32 {
        match self.cycle_read(addr) {
            Ok(v) => v,
            Err(e) => {
                self.bus_errors += 1;
                log::debug!("{}: read {addr:#08x}: {e}", self.path.display());
                BUS_NOT_READY
            }
        }
    }

    fn write32(&mut self, addr: u32, value: u32) {
        let mut buf = [0; 4];
        BigEndian::write_u32(&mut buf, value);
        if let Err(e) = self.file.write_all_at(&buf, u64::from(addr)) {
            self.bus_errors += 1;
            log::warn!("{}: write {addr:#08x}: {e}", self.path.display());
        }
    }

    fn probe(&mut self, addr: u32) -> bool {
        self.cycle_read(addr).is_ok()
    }
}
