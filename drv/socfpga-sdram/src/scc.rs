// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scan-chain manager.
//!
//! Delay and phase settings are written in two steps. The `set_*` calls only
//! stage a value in the scan-chain shadow registers. [`ScanChain::update`]
//! then takes a [`Selection`] naming the DQS, DQ and DM elements to latch,
//! writes their scan enables and strobes the update. Nothing staged is
//! visible to the memory interface until it is part of an update, and one
//! update may carry many staged values.
//!
//! The `apply_*` helpers stage a group-wide setting and hand back the
//! selection that commits it.

use core::ops::Range;

use regbus::{word, RegBus};

use crate::config::SeqConfig;
use crate::regs::scc;

/// `hhp_extras`: DQS and DQ bypass, rfifo mode 1, rfifo clock select 1.
const HHP_EXTRAS_VALUE: u32 = (1 << 5) | (1 << 2) | (1 << 1) | (1 << 0);

/// Broadcast index for the enable registers.
pub const ALL: u32 = 0xff;

/// Set over the 8-bit index space of one enable register.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct Ids([u32; 8]);

impl Ids {
    fn with(mut self, id: u32) -> Self {
        let id = id & 0xff;
        self.0[(id / 32) as usize] |= 1 << (id % 32);
        self
    }

    fn union(mut self, other: Self) -> Self {
        for (a, b) in self.0.iter_mut().zip(other.0) {
            *a |= b;
        }
        self
    }

    /// Yields the members in ascending order, so a broadcast comes last.
    fn iter(self) -> impl Iterator<Item = u32> {
        self.0.into_iter().enumerate().flat_map(|(w, mut bits)| {
            core::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let b = bits.trailing_zeros();
                bits &= bits - 1;
                Some(w as u32 * 32 + b)
            })
        })
    }
}

/// Scan-chain elements latched by one [`ScanChain::update`].
///
/// DQS entries are DQS group numbers; DQ and DM entries are pin positions
/// inside the group picked by the group counter. [`ALL`] picks every
/// element of its kind.
#[must_use]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    dqs: Ids,
    dqs_io: bool,
    dq: Ids,
    dm: Ids,
}

impl Selection {
    pub const NONE: Self = Self {
        dqs: Ids([0; 8]),
        dqs_io: false,
        dq: Ids([0; 8]),
        dm: Ids([0; 8]),
    };

    pub fn dqs(mut self, group: u32) -> Self {
        self.dqs = self.dqs.with(group);
        self
    }

    pub fn dqs_groups(self, groups: Range<u32>) -> Self {
        groups.fold(self, Self::dqs)
    }

    /// The DQS pin's own I/O delays.
    pub fn dqs_io(mut self) -> Self {
        self.dqs_io = true;
        self
    }

    pub fn dq(mut self, pin: u32) -> Self {
        self.dq = self.dq.with(pin);
        self
    }

    pub fn dm(mut self, dm: u32) -> Self {
        self.dm = self.dm.with(dm);
        self
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            dqs: self.dqs.union(other.dqs),
            dqs_io: self.dqs_io || other.dqs_io,
            dq: self.dq.union(other.dq),
            dm: self.dm.union(other.dm),
        }
    }
}

pub struct ScanChain<'a, B> {
    bus: &'a B,
    cfg: &'a SeqConfig,
}

impl<'a, B: RegBus> ScanChain<'a, B> {
    pub fn new(bus: &'a B, cfg: &'a SeqConfig) -> Self {
        Self { bus, cfg }
    }

    fn read_groups(&self, write_group: u32) -> Range<u32> {
        self.cfg.first_read_group(write_group)..self.cfg.end_read_group(write_group)
    }

    /// Index of the DQS pin in the per-write-group I/O arrays; it sits right
    /// after the DQ pins, followed by the DM pins.
    fn dqs_pin(&self) -> u32 {
        self.cfg.dq_per_write_dqs
    }

    //
    // Staging
    //

    pub fn set_dqs_bus_in_delay(&self, read_group: u32, delay: u32) {
        self.bus.write32(scc::DQS_IN_DELAY + word(read_group), delay);
    }

    pub fn set_dqs_io_in_delay(&self, delay: u32) {
        self.bus.write32(scc::IO_IN_DELAY + word(self.dqs_pin()), delay);
    }

    pub fn set_dqs_en_phase(&self, read_group: u32, phase: u32) {
        self.bus.write32(scc::DQS_EN_PHASE + word(read_group), phase);
    }

    pub fn set_dqdqs_output_phase(&self, write_group: u32, phase: u32) {
        self.bus.write32(scc::DQDQS_OUT_PHASE + word(write_group), phase);
    }

    pub fn set_dqs_en_delay(&self, read_group: u32, delay: u32) {
        self.bus.write32(
            scc::DQS_EN_DELAY + word(read_group),
            delay + self.cfg.io.dqs_en_delay_offset,
        );
    }

    /// OCT delay lives in the DQS logic block, which exists once per read
    /// group, so it is staged for every read group in the write group.
    pub fn set_oct_out1_delay(&self, write_group: u32, delay: u32) {
        for rg in self.read_groups(write_group) {
            self.bus.write32(scc::OCT_OUT1_DELAY + word(rg), delay);
        }
    }

    pub fn set_dq_out1_delay(&self, dq_in_group: u32, delay: u32) {
        self.bus.write32(scc::IO_OUT1_DELAY + word(dq_in_group), delay);
    }

    pub fn set_dq_in_delay(&self, dq_in_group: u32, delay: u32) {
        self.bus.write32(scc::IO_IN_DELAY + word(dq_in_group), delay);
    }

    pub fn set_dqs_out1_delay(&self, delay: u32) {
        self.bus.write32(scc::IO_OUT1_DELAY + word(self.dqs_pin()), delay);
    }

    pub fn set_dm_out1_delay(&self, dm: u32, delay: u32) {
        self.bus.write32(
            scc::IO_OUT1_DELAY + word(self.dqs_pin() + 1 + dm),
            delay,
        );
    }

    pub fn set_hhp_extras(&self) {
        self.bus.write32(scc::HHP_EXTRAS, HHP_EXTRAS_VALUE);
    }

    //
    // Read-back of staged values
    //

    pub fn dqs_bus_in_delay(&self, read_group: u32) -> u32 {
        self.bus.read32(scc::DQS_IN_DELAY + word(read_group))
    }

    pub fn dqs_en_delay(&self, read_group: u32) -> u32 {
        self.bus
            .read32(scc::DQS_EN_DELAY + word(read_group))
            .wrapping_sub(self.cfg.io.dqs_en_delay_offset)
    }

    pub fn dq_in_delay(&self, dq_in_group: u32) -> u32 {
        self.bus.read32(scc::IO_IN_DELAY + word(dq_in_group))
    }

    pub fn dq_out1_delay(&self, dq_in_group: u32) -> u32 {
        self.bus.read32(scc::IO_OUT1_DELAY + word(dq_in_group))
    }

    pub fn dqs_out1_delay(&self) -> u32 {
        self.bus.read32(scc::IO_OUT1_DELAY + word(self.dqs_pin()))
    }

    //
    // Commit
    //

    /// Scans the selected elements in and latches them.
    pub fn update(&self, sel: &Selection) {
        for dq in sel.dq.iter() {
            self.bus.write32(scc::DQ_ENA, dq);
        }
        for dm in sel.dm.iter() {
            self.bus.write32(scc::DM_ENA, dm);
        }
        if sel.dqs_io {
            self.bus.write32(scc::DQS_IO_ENA, 0);
        }
        for dqs in sel.dqs.iter() {
            self.bus.write32(scc::DQS_ENA, dqs);
        }
        self.bus.write32(scc::UPDATE, 0);
    }

    pub fn select_group(&self, group: u32) {
        self.bus.write32(scc::GROUP_COUNTER, group);
    }

    //
    // Composite operations
    //

    /// Phases are not really per shadow register, but the scan-chain model
    /// keeps one copy per set; they are kept in sync and only the first set
    /// triggers a scan.
    pub fn set_dqs_en_phase_all_ranks(&self, read_group: u32, phase: u32) {
        for (sr, _) in self.cfg.shadow_sets() {
            self.set_dqs_en_phase(read_group, phase);
            if sr == 0 {
                self.update(&Selection::NONE.dqs(read_group));
            }
        }
    }

    pub fn set_dqdqs_output_phase_all_ranks(&self, write_group: u32, phase: u32) {
        for (sr, _) in self.cfg.shadow_sets() {
            self.set_dqdqs_output_phase(write_group, phase);
            if sr == 0 {
                self.update(&Selection::NONE.dqs(write_group));
            }
        }
    }

    pub fn set_dqs_en_delay_all_ranks(&self, read_group: u32, delay: u32) {
        for _ in self.cfg.shadow_sets() {
            self.set_dqs_en_delay(read_group, delay);
            self.update(&Selection::NONE.dqs(read_group));
        }
    }

    /// Zeroes every DQS setting in every group and shadow register set.
    pub fn zero_all(&self) {
        let io = &self.cfg.io;
        for _ in self.cfg.shadow_sets() {
            for rg in 0..self.cfg.if_read_dqs_width {
                self.set_dqs_bus_in_delay(rg, io.dqs_in_reserve);
                self.set_dqs_en_phase(rg, 0);
                self.set_dqs_en_delay(rg, 0);
            }
            for wg in 0..self.cfg.if_write_dqs_width {
                self.set_dqdqs_output_phase(wg, 0);
                self.set_oct_out1_delay(wg, io.dqs_out_reserve);
            }
        }
        self.update(&Selection::NONE.dqs(ALL));
    }

    /// Puts the group's I/O in full-rate bypass.
    pub fn set_bypass_mode(&self, write_group: u32) {
        if write_group == 0 {
            self.set_hhp_extras();
        }
        self.update(
            &Selection::NONE.dq(ALL).dm(ALL).dqs_io().dqs(write_group),
        );
    }

    /// Zeroes the DQ, DM and DQS settings of one write group. With
    /// `out_only`, the input delays are left alone.
    pub fn zero_group(&self, write_group: u32, out_only: bool) {
        let io = &self.cfg.io;
        for _ in self.cfg.shadow_sets() {
            for pin in 0..self.cfg.dq_per_write_dqs {
                self.set_dq_out1_delay(pin, 0);
                if !out_only {
                    self.set_dq_in_delay(pin, 0);
                }
            }
            for dm in 0..self.cfg.num_dm_per_write_group {
                self.set_dm_out1_delay(dm, 0);
            }
            if !out_only {
                self.set_dqs_io_in_delay(0);
            }
            self.set_dqs_out1_delay(io.dqs_out_reserve);
            self.set_oct_out1_delay(write_group, io.dqs_out_reserve);

            self.update(
                &Selection::NONE
                    .dq(ALL)
                    .dm(ALL)
                    .dqs_io()
                    .dqs_groups(self.read_groups(write_group)),
            );
        }
    }

    /// Stages one input delay for the DQ pins of a read group, starting at
    /// pin `group_bgn` of the write group.
    pub fn apply_group_dq_in_delay(&self, group_bgn: u32, delay: u32) -> Selection {
        let mut sel = Selection::NONE;
        for p in group_bgn..group_bgn + self.cfg.dq_per_read_dqs {
            self.set_dq_in_delay(p, delay);
            sel = sel.dq(p);
        }
        sel
    }

    pub fn apply_group_dq_out1_delay(&self, delay: u32) -> Selection {
        let mut sel = Selection::NONE;
        for pin in 0..self.cfg.dq_per_write_dqs {
            self.set_dq_out1_delay(pin, delay);
            sel = sel.dq(pin);
        }
        sel
    }

    pub fn apply_group_dm_out1_delay(&self, delay: u32) -> Selection {
        let mut sel = Selection::NONE;
        for dm in 0..self.cfg.num_dm_per_write_group {
            self.set_dm_out1_delay(dm, delay);
            sel = sel.dm(dm);
        }
        sel
    }

    pub fn apply_group_dqs_io_and_oct_out1(
        &self,
        write_group: u32,
        delay: u32,
    ) -> Selection {
        self.set_dqs_out1_delay(delay);
        self.set_oct_out1_delay(write_group, delay);
        Selection::NONE
            .dqs_io()
            .dqs_groups(self.read_groups(write_group))
    }

    /// Adds `delay` to the whole output side of a write group.
    ///
    /// The addition lands on the out2 chains, which start at zero on this
    /// PHY. Anything past `io_out2_delay_max` is dropped for DQ and DM, and
    /// spills into the out1 chain for DQS and OCT.
    pub fn apply_group_all_out_delay_add(
        &self,
        write_group: u32,
        delay: u32,
    ) -> Selection {
        let spill = delay.saturating_sub(self.cfg.io.io_out2_delay_max);
        if spill > 0 {
            self.set_dqs_out1_delay(spill);
            self.set_oct_out1_delay(write_group, spill);
        }

        let pins = 0..self.cfg.dq_per_write_dqs;
        let dms = 0..self.cfg.num_dm_per_write_group;
        let sel = pins.fold(Selection::NONE, Selection::dq);
        dms.fold(sel, Selection::dm)
            .dqs_io()
            .dqs_groups(self.read_groups(write_group))
    }

    pub fn apply_group_all_out_delay_add_all_ranks(&self, write_group: u32, delay: u32) {
        for _ in self.cfg.shadow_sets() {
            let sel = self.apply_group_all_out_delay_add(write_group, delay);
            self.update(&sel);
        }
    }

    /// Clears the HPS register file behind the scan chain.
    pub fn clear_hhp_rfile(&self) {
        for i in 0..scc::HHP_RFILE_DEPTH {
            self.bus.write32(scc::HHP_RFILE + word(i), 0);
        }
    }
}
