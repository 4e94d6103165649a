// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Busy-waiting in memory clocks, using the RW manager's idle loops.
//!
//! The instruction ROM holds two nested idle loops:
//!
//! ```text
//! IDLE_LOOP2: jnz cntr0, TARGET_A
//! IDLE_LOOP1: jnz cntr1, TARGET_B
//!             return
//! ```
//!
//! Short waits jump straight into `IDLE_LOOP1` and only need counter 1.
//! Longer ones nest both loops, and anything past 2^16 AFI clocks repeats
//! the nested program from software. Every loop runs once more than its
//! counter value.

use regbus::RegBus;

use crate::regs::rw_mgr;
use crate::Sequencer;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct LoopCounts {
    pub inner: u8,
    pub outer: u8,
    /// Extra software repeats of the nested program.
    pub c_loop: u16,
}

impl LoopCounts {
    pub fn for_afi_clocks(afi_clocks: u32) -> Self {
        if afi_clocks == 0 {
            Self::default()
        } else if afi_clocks <= 0x100 {
            Self {
                inner: (afi_clocks - 1) as u8,
                ..Self::default()
            }
        } else if afi_clocks <= 0x1_0000 {
            Self {
                inner: 0xff,
                outer: ((afi_clocks - 1) >> 8) as u8,
                c_loop: 0,
            }
        } else {
            Self {
                inner: 0xff,
                outer: 0xff,
                c_loop: ((afi_clocks - 1) >> 16) as u16,
            }
        }
    }
}

impl<B: RegBus> Sequencer<'_, B> {
    /// Waits at least `clocks` memory clocks.
    pub(crate) fn delay_for_n_mem_clocks(&self, clocks: u32) {
        let p = &self.cfg.program;
        let afi_clocks = clocks.div_ceil(self.cfg.afi_rate_ratio);
        let n = LoopCounts::for_afi_clocks(afi_clocks);
        let mask = self.skip_delay_mask;

        if afi_clocks <= 0x100 {
            self.bus.write32(rw_mgr::load_cntr(1), u32::from(n.inner) & mask);
            self.bus.write32(rw_mgr::load_jump(1), p.idle_loop1);
            self.bus.write32(rw_mgr::RUN_SINGLE_GROUP, p.idle_loop1);
        } else {
            self.bus.write32(rw_mgr::load_cntr(0), u32::from(n.inner) & mask);
            self.bus.write32(rw_mgr::load_cntr(1), u32::from(n.outer) & mask);
            self.bus.write32(rw_mgr::load_jump(0), p.idle_loop2);
            self.bus.write32(rw_mgr::load_jump(1), p.idle_loop2);

            for _ in 0..=n.c_loop {
                self.bus.write32(rw_mgr::RUN_SINGLE_GROUP, p.idle_loop2);
            }
        }
    }
}
