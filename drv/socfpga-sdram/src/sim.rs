// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A simulated PHY for host tests.
//!
//! Plain registers are a sparse map. The scan chain keeps two copies of its
//! delay arrays: the staged values written by the sequencer, and the live
//! values that an `update` strobe latches, keyed by the group counter at
//! the time of the update. Only elements named by a scan-enable write since
//! the previous update are latched. Test programs launched through the RW manager
//! are handed to an oracle, which sees the whole simulated state (including
//! the live delays and the VFIFO position) and returns the per-bit pass
//! mask; the RW manager status register then reads back its complement.

use std::cell::{Ref, RefCell};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use regbus::{word, RegBus};

use crate::config::{RwMgrProgram, SeqConfig};
use crate::regs::{phy_mgr, rw_mgr, scc};
use crate::scc::ALL;

/// A test program the sequencer asked the RW manager to run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Probe {
    GuaranteedRead { group: u32 },
    Read { group: u32, all_groups: bool },
    Write { group: u32, dm: bool },
}

/// Scan enables written since the last update.
#[derive(Default)]
struct Enabled {
    dqs: BTreeSet<u32>,
    dqs_io: bool,
    dq: BTreeSet<u32>,
    dm: BTreeSet<u32>,
}

fn picks(set: &BTreeSet<u32>, id: u32) -> bool {
    set.contains(&id) || set.contains(&ALL)
}

#[derive(Default)]
pub struct SimState {
    regs: BTreeMap<u32, u32>,
    live: BTreeMap<(u32, u32), u32>,
    enabled: Enabled,
    dq_pins: u32,
    writes: Vec<(u32, u32)>,
    status: u32,
    vfifo: u32,
    vfifo_size: u32,
    pub tests: usize,
    pub updates: usize,
}

impl SimState {
    pub fn reg(&self, addr: u32) -> u32 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    pub fn group(&self) -> u32 {
        self.reg(scc::GROUP_COUNTER)
    }

    pub fn live(&self, group: u32, addr: u32) -> u32 {
        self.live.get(&(group, addr)).copied().unwrap_or(0)
    }

    pub fn live_dq_in(&self, group: u32, pin: u32) -> u32 {
        self.live(group, scc::IO_IN_DELAY + word(pin))
    }

    pub fn live_dq_out1(&self, group: u32, pin: u32) -> u32 {
        self.live(group, scc::IO_OUT1_DELAY + word(pin))
    }

    pub fn live_dqs_in(&self, group: u32, read_group: u32) -> u32 {
        self.live(group, scc::DQS_IN_DELAY + word(read_group))
    }

    pub fn live_dqs_en_phase(&self, group: u32, read_group: u32) -> u32 {
        self.live(group, scc::DQS_EN_PHASE + word(read_group))
    }

    pub fn live_dqs_en_delay(&self, group: u32, read_group: u32) -> u32 {
        self.live(group, scc::DQS_EN_DELAY + word(read_group))
    }

    /// VFIFO position, modulo the FIFO size.
    pub fn vfifo(&self) -> u32 {
        self.vfifo
    }

    pub fn writes(&self) -> &[(u32, u32)] {
        &self.writes
    }

    /// Values written to `addr`, oldest first.
    pub fn writes_to(&self, addr: u32) -> Vec<u32> {
        self.writes
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, v)| *v)
            .collect()
    }

    /// Instructions launched through the RW manager, with the group they
    /// were launched on (`None` for all groups).
    pub fn runs(&self) -> Vec<(u32, Option<u32>)> {
        self.writes
            .iter()
            .filter_map(|&(a, v)| run_target(a).map(|g| (v, g)))
            .collect()
    }

    /// Whether a staged scan-chain register is covered by the current
    /// enables. The I/O arrays hold the DQ pins, then the DQS pin, then
    /// the DM pins; everything below them is per DQS group.
    fn is_enabled(&self, addr: u32) -> bool {
        let en = &self.enabled;
        let io_base = if addr >= scc::IO_IN_DELAY {
            scc::IO_IN_DELAY
        } else if addr >= scc::IO_OUT1_DELAY {
            scc::IO_OUT1_DELAY
        } else {
            return picks(&en.dqs, (addr & 0xff) >> 2);
        };
        let pin = (addr - io_base) >> 2;
        match pin.cmp(&self.dq_pins) {
            Ordering::Less => picks(&en.dq, pin),
            Ordering::Equal => en.dqs_io,
            Ordering::Greater => picks(&en.dm, pin - self.dq_pins - 1),
        }
    }

    fn commit(&mut self) {
        let group = self.group();
        let staged: Vec<(u32, u32)> = self
            .regs
            .range(scc::DQS_IN_DELAY..scc::HHP_GLOBALS)
            .filter(|(a, _)| self.is_enabled(**a))
            .map(|(a, v)| (*a, *v))
            .collect();
        for (addr, v) in staged {
            self.live.insert((group, addr), v);
        }
        self.enabled = Enabled::default();
        self.updates += 1;
    }
}

/// Decodes an RW manager launch address: `Some(Some(group))` for a single
/// group, `Some(None)` for all groups.
fn run_target(addr: u32) -> Option<Option<u32>> {
    if (rw_mgr::RUN_SINGLE_GROUP..rw_mgr::RUN_ALL_GROUPS).contains(&addr) {
        Some(Some((addr - rw_mgr::RUN_SINGLE_GROUP) >> 2))
    } else if (rw_mgr::RUN_ALL_GROUPS..rw_mgr::LOAD_CNTR).contains(&addr) {
        Some(None)
    } else {
        None
    }
}

type Oracle = Box<dyn Fn(&SimState, Probe) -> u32>;

pub struct SimPhy {
    state: RefCell<SimState>,
    program: RwMgrProgram,
    oracle: Oracle,
}

impl SimPhy {
    pub fn new(
        cfg: &SeqConfig,
        oracle: impl Fn(&SimState, Probe) -> u32 + 'static,
    ) -> Self {
        Self {
            state: RefCell::new(SimState {
                vfifo_size: cfg.vfifo_size,
                dq_pins: cfg.dq_per_write_dqs,
                ..Default::default()
            }),
            program: cfg.program,
            oracle: Box::new(oracle),
        }
    }

    pub fn state(&self) -> Ref<'_, SimState> {
        self.state.borrow()
    }

    /// Sets a register without logging a write.
    pub fn poke(&self, addr: u32, value: u32) {
        self.state.borrow_mut().regs.insert(addr, value);
    }

    /// Sets a scan-chain register as if it had already been staged and
    /// latched in the current group.
    pub fn preset(&self, addr: u32, value: u32) {
        let mut s = self.state.borrow_mut();
        let group = s.group();
        s.regs.insert(addr, value);
        s.live.insert((group, addr), value);
    }

    fn classify(&self, instr: u32, group: Option<u32>) -> Option<Probe> {
        let p = &self.program;
        let g = group.unwrap_or(0);
        if instr == p.guaranteed_read {
            Some(Probe::GuaranteedRead { group: g })
        } else if instr == p.read_b2b {
            Some(Probe::Read {
                group: g,
                all_groups: group.is_none(),
            })
        } else if instr == p.lfsr.entry || instr == p.lfsr.wl_1 {
            Some(Probe::Write { group: g, dm: false })
        } else if instr == p.lfsr_dm.entry || instr == p.lfsr_dm.wl_1 {
            Some(Probe::Write { group: g, dm: true })
        } else {
            None
        }
    }
}

impl RegBus for SimPhy {
    fn read32(&self, addr: u32) -> u32 {
        let s = self.state.borrow();
        if addr == rw_mgr::STATUS {
            s.status
        } else {
            s.reg(addr)
        }
    }

    fn write32(&self, addr: u32, value: u32) {
        let mut s = self.state.borrow_mut();
        s.writes.push((addr, value));

        if let Some(group) = run_target(addr) {
            if let Some(probe) = self.classify(value, group) {
                let pass = (self.oracle)(&*s, probe);
                s.status = !pass;
                s.tests += 1;
            }
            return;
        }

        match addr {
            scc::UPDATE => s.commit(),
            scc::DQS_ENA => {
                s.enabled.dqs.insert(value);
            }
            scc::DQS_IO_ENA => s.enabled.dqs_io = true,
            scc::DQ_ENA => {
                s.enabled.dq.insert(value);
            }
            scc::DM_ENA => {
                s.enabled.dm.insert(value);
            }
            phy_mgr::INC_VFIFO_HARD_PHY => {
                s.vfifo = (s.vfifo + 1) % s.vfifo_size.max(1);
            }
            _ => {
                s.regs.insert(addr, value);
            }
        }
    }
}
