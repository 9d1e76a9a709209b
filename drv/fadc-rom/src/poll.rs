// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded polling of the ROM command engine.
//!
//! Both loops here are bounded by an iteration count, not a clock, and
//! neither can be cancelled. A budget of zero times out without touching the
//! bus.

use core::time::Duration;

use drv_fadc_api::{RomOpcode, RomStatus1};
use drv_vme_api::RegisterPort;

use crate::error::RomError;
use crate::protocol::{RomCommand, RomProtocol};

/// Polls the ready bit up to `tries` times. Returns the number of polls it
/// took to see it set.
pub fn wait_ready<P: RegisterPort>(
    proto: &RomProtocol<'_, P>,
    tries: u32,
) -> Result<u32, RomError> {
    for i in 0..tries {
        if proto.ready() {
            return Ok(i + 1);
        }
    }
    Err(RomError::ReadyTimeout { tries })
}

/// Issues Read-Status-1 up to `tries` times until the write-in-progress bit
/// clears. Returns the number of status reads it took.
///
/// `on_tick` is called after every read that still showed a write in
/// progress, and is followed by a sleep of `interval`. Each status read waits
/// for the command engine with a budget of `ready_tries`; running out of that
/// ends the whole wait.
pub fn wait_write_complete<P: RegisterPort>(
    proto: &RomProtocol<'_, P>,
    tries: u32,
    ready_tries: u32,
    interval: Duration,
    on_tick: &mut dyn FnMut(),
) -> Result<u32, RomError> {
    for i in 0..tries {
        let status = read_status1(proto, ready_tries)?;
        if !status.contains(RomStatus1::WIP) {
            log::trace!("write complete after {} polls", i + 1);
            return Ok(i + 1);
        }
        on_tick();
        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }
    Err(RomError::WriteTimeout { tries })
}

/// Runs Read-Status-1 and returns the ROM's status register.
pub fn read_status1<P: RegisterPort>(
    proto: &RomProtocol<'_, P>,
    ready_tries: u32,
) -> Result<RomStatus1, RomError> {
    wait_ready(proto, ready_tries)?;
    proto.issue(RomCommand::new(RomOpcode::ReadStatus1));
    wait_ready(proto, ready_tries)?;
    Ok(RomStatus1::from_bits_retain(proto.read_status()))
}
