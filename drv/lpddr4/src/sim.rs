// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A simulated controller register file for host tests.
//!
//! Interrupt status is scripted: a test names a register write that raises
//! an interrupt, and how many reads of the status register go by before
//! the bit shows up. Ack registers clear the status bits written to them.

use std::cell::RefCell;
use std::collections::BTreeMap;

use embedded_hal::blocking::delay::DelayUs;
use regbus::{word, RegBus};

use crate::layout::{Block, Layout, RwMasks, AM64};

pub const TEST_LAYOUT: Layout = Layout {
    masks: RwMasks {
        ctl: &[0xffff_ffff, 0x0000_00ff],
        ..RwMasks::NONE
    },
    ..AM64
};

#[derive(Copy, Clone)]
struct Pending {
    trigger: u32,
    status: u32,
    mask: u32,
    reads: u32,
}

#[derive(Default)]
struct State {
    regs: BTreeMap<u32, u32>,
    writes: Vec<(u32, u32)>,
    scripts: Vec<Pending>,
    armed: Vec<Pending>,
}

pub struct SimCtl {
    state: RefCell<State>,
}

fn addr(block: Block, reg: u16) -> u32 {
    TEST_LAYOUT.base(block) + word(u32::from(reg))
}

impl SimCtl {
    /// Creates a register file holding the expected controller ID.
    pub fn new() -> Self {
        let sim = Self {
            state: RefCell::new(State::default()),
        };
        let id = TEST_LAYOUT.ctl.controller_id;
        sim.poke(
            addr(Block::Ctl, id.reg),
            id.set(0, u32::from(TEST_LAYOUT.product_id)),
        );
        sim
    }

    /// Sets a register without logging a write.
    pub fn poke(&self, addr: u32, value: u32) {
        self.state.borrow_mut().regs.insert(addr, value);
    }

    pub fn reg(&self, addr: u32) -> u32 {
        self.state.borrow().regs.get(&addr).copied().unwrap_or(0)
    }

    pub fn writes_to(&self, addr: u32) -> Vec<u32> {
        self.state
            .borrow()
            .writes
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, v)| *v)
            .collect()
    }

    /// Every write to `trigger` raises interrupt `bit` of `block` once
    /// `reads` further reads of its status register have gone by.
    pub fn raise_on_write(
        &self,
        trigger: u32,
        block: Block,
        bit: u8,
        reads: u32,
    ) {
        let l = &TEST_LAYOUT;
        let (status, bit) = match block {
            Block::Ctl => (
                addr(Block::Ctl, l.ctl.int_status[usize::from(bit / 32)]),
                bit % 32,
            ),
            Block::Pi => (addr(Block::Pi, l.pi.int_status), bit),
            Block::Phy => panic!("the PHY block has no interrupts"),
        };
        self.state.borrow_mut().scripts.push(Pending {
            trigger,
            status,
            mask: 1 << bit,
            reads,
        });
    }

    /// Returns the status register a write to `addr` acknowledges, if any.
    fn acked_status(addr: u32) -> Option<u32> {
        let l = &TEST_LAYOUT;
        if addr == self::addr(Block::Pi, l.pi.int_ack) {
            return Some(self::addr(Block::Pi, l.pi.int_status));
        }
        l.ctl
            .int_ack
            .iter()
            .position(|&r| self::addr(Block::Ctl, r) == addr)
            .map(|i| self::addr(Block::Ctl, l.ctl.int_status[i]))
    }
}

impl RegBus for SimCtl {
    fn read32(&self, addr: u32) -> u32 {
        let mut s = self.state.borrow_mut();
        let mut raised = 0;
        s.armed.retain_mut(|p| {
            if p.status != addr {
                return true;
            }
            if p.reads == 0 {
                raised |= p.mask;
                false
            } else {
                p.reads -= 1;
                true
            }
        });
        let v = s.regs.entry(addr).or_default();
        *v |= raised;
        *v
    }

    fn write32(&self, addr: u32, value: u32) {
        let mut s = self.state.borrow_mut();
        s.writes.push((addr, value));
        if let Some(status) = Self::acked_status(addr) {
            *s.regs.entry(status).or_default() &= !value;
        } else {
            s.regs.insert(addr, value);
        }

        let fired: Vec<Pending> = s
            .scripts
            .iter()
            .filter(|p| p.trigger == addr)
            .copied()
            .collect();
        s.armed.extend(fired);
    }
}

/// A delay that only counts how often it was asked to wait.
#[derive(Default)]
pub struct Ticks {
    pub polls: u32,
}

impl DelayUs<u32> for Ticks {
    fn delay_us(&mut self, _us: u32) {
        self.polls += 1;
    }
}
