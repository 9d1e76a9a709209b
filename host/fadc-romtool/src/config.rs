// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use drv_fadc_api::{FirmwareVersion, ROM_CAPACITY_BYTES, WORD_SIZE_BYTES};
use drv_fadc_rom::UpdateConfig;
use drv_vme_api::Slot;
use serde::Deserialize;

/// Where the kernel exposes the A24 master window.
pub const DEFAULT_DEVICE: &str = "/dev/bus/vme/m0";

/// A `RawConfig` is a crate description as deserialized from TOML, before
/// any of it has been checked.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawConfig {
    device: Option<PathBuf>,
    #[serde(default)]
    slots: Vec<u32>,
    target_version: RawVersion,
    image_size_bytes: Option<usize>,
    #[serde(default)]
    budgets: RawBudgets,
    #[serde(default)]
    timing: RawTiming,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVersion {
    control: u16,
    processing: u16,
}

#[derive(Copy, Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawBudgets {
    ready_tries: Option<u32>,
    command_ready_tries: Option<u32>,
    erase_tries: Option<u32>,
    page_tries: Option<u32>,
    reboot_tries: Option<u32>,
}

#[derive(Copy, Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawTiming {
    reset_settle_ms: Option<u64>,
    write_poll_interval_ms: Option<u64>,
    reboot_settle_ms: Option<u64>,
    reboot_poll_interval_ms: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub device: PathBuf,
    /// Slots to consider; empty means every slot that answers.
    pub slots: BTreeSet<Slot>,
    pub update: UpdateConfig,
}

impl Default for Config {
    /// With no crate description there's no known-good firmware, so nothing
    /// will be skipped.
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            slots: BTreeSet::new(),
            update: UpdateConfig::new(FirmwareVersion::new(0, 0)),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(text)?;
        let mut cfg = Config::default();

        if let Some(device) = raw.device {
            cfg.device = device;
        }

        for n in raw.slots {
            let slot = Slot::try_from(n)?;
            if !cfg.slots.insert(slot) {
                bail!("slot {slot} listed twice");
            }
        }

        let update = &mut cfg.update;
        let v = raw.target_version;
        update.target = FirmwareVersion::new(v.control, v.processing);

        if let Some(size) = raw.image_size_bytes {
            if size == 0
                || size % WORD_SIZE_BYTES != 0
                || size > ROM_CAPACITY_BYTES
            {
                bail!(
                    "image-size-bytes must be a nonzero multiple of \
                     {WORD_SIZE_BYTES} no larger than {ROM_CAPACITY_BYTES}"
                );
            }
            update.image_size_bytes = size;
        }

        let b = &mut update.budgets;
        let r = raw.budgets;
        b.ready_tries = r.ready_tries.unwrap_or(b.ready_tries);
        b.command_ready_tries =
            r.command_ready_tries.unwrap_or(b.command_ready_tries);
        b.erase_tries = r.erase_tries.unwrap_or(b.erase_tries);
        b.page_tries = r.page_tries.unwrap_or(b.page_tries);
        b.reboot_tries = r.reboot_tries.unwrap_or(b.reboot_tries);

        let t = &mut update.timing;
        let r = raw.timing;
        let ms = Duration::from_millis;
        t.reset_settle = r.reset_settle_ms.map_or(t.reset_settle, ms);
        t.write_poll_interval =
            r.write_poll_interval_ms.map_or(t.write_poll_interval, ms);
        t.reboot_settle = r.reboot_settle_ms.map_or(t.reboot_settle, ms);
        t.reboot_poll_interval =
            r.reboot_poll_interval_ms.map_or(t.reboot_poll_interval, ms);

        Ok(cfg)
    }
}
