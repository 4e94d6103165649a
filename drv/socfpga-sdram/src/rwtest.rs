// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test primitives: read and write bursts issued through the RW manager,
//! returning per-bit pass masks.
//!
//! The RW manager status register reads back a failure bit per DQ of the
//! group that was just tested. Every primitive here accumulates those over
//! virtual groups and ranks into a `bit_chk` mask where a set bit means the
//! pin passed on every rank tested.

use regbus::{word, RegBus};

use crate::regs::{phy_mgr, rw_mgr};
use crate::Sequencer;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum OdtMode {
    Off,
    ReadWrite,
}

/// What a test needs in order to count as a pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum PassMode {
    /// Every bit of the group passed.
    AllBits,
    /// At least one bit passed.
    AnyBit,
}

impl PassMode {
    fn judge(self, bit_chk: u32, correct_mask: u32) -> bool {
        match self {
            PassMode::AllBits => bit_chk == correct_mask,
            PassMode::AnyBit => bit_chk != 0,
        }
    }
}

/// Which ranks a test covers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Ranks {
    /// The ranks sharing one shadow register set, starting at the given
    /// rank.
    ShadowSet(u32),
    All,
}

/// Returns `(odt_mask_read, odt_mask_write)` for a rank.
pub(crate) fn odt_masks(
    ranks: u32,
    cs_per_dimm: u32,
    rank: u32,
    mode: OdtMode,
) -> (u32, u32) {
    if mode == OdtMode::Off {
        return (0, 0);
    }
    match ranks {
        // Read: no ODT. Write: ODT on the only rank.
        1 => (0x0, 0x1),
        // Dual-slot single-rank (or an RDIMM with two chip selects each):
        // reads terminate on the other rank, writes on both.
        2 if cs_per_dimm == 1 => (0x3 & !(1 << rank), 0x3),
        // Single-slot dual-rank: reads unterminated, writes on the target.
        2 => (0x0, 0x3 & (1 << rank)),
        _ => match rank {
            0 => (0x4, 0x5),
            1 => (0x8, 0xa),
            2 => (0x1, 0x5),
            _ => (0x2, 0xa),
        },
    }
}

impl<B: RegBus> Sequencer<'_, B> {
    fn rank_range(&self, ranks: Ranks) -> core::ops::Range<u32> {
        let n = self.cfg.number_of_ranks;
        match ranks {
            Ranks::All => 0..n,
            Ranks::ShadowSet(bgn) => {
                bgn..(bgn + self.cfg.ranks_per_shadow_reg).min(n)
            }
        }
    }

    /// Selects `rank` for the next RW manager program and sets its ODT.
    pub(crate) fn set_rank_and_odt_mask(&self, rank: u32, mode: OdtMode) {
        let (odt0, odt1) = odt_masks(
            self.cfg.number_of_ranks,
            self.cfg.number_of_cs_per_dimm,
            rank,
            mode,
        );
        let mask = (0xff & !(1 << rank))
            | ((0xff & odt0) << 8)
            | ((0xff & odt1) << 16);
        self.bus.write32(rw_mgr::SET_CS_AND_ODT_MASK, mask);
    }

    fn read_status(&self) -> u32 {
        self.bus.read32(rw_mgr::STATUS)
    }

    /// Guaranteed read of the fixed pattern. Passes only if every bit of
    /// the group reads back correctly on every rank.
    pub(crate) fn read_test_patterns(
        &self,
        group: u32,
        ranks: Ranks,
    ) -> (bool, u32) {
        let cfg = self.cfg;
        let p = &cfg.program;
        let vgs = cfg.virtual_groups_per_read_dqs;
        let mut bit_chk = self.param.read_correct_mask;

        for r in self.rank_range(ranks) {
            if self.rank_skipped(r) {
                continue;
            }
            self.set_rank_and_odt_mask(r, OdtMode::ReadWrite);

            self.bus.write32(rw_mgr::load_cntr(0), 0x20);
            self.bus.write32(rw_mgr::load_jump(0), p.guaranteed_read);
            self.bus.write32(rw_mgr::load_cntr(1), 0x20);
            self.bus.write32(rw_mgr::load_jump(1), p.guaranteed_read_cont);

            let mut tmp = 0;
            for vg in (0..vgs).rev() {
                self.bus.write32(phy_mgr::FIFO_RESET, 0);
                self.bus.write32(rw_mgr::RESET_READ_DATAPATH, 0);

                tmp <<= cfg.dq_per_read_dqs / vgs;
                self.bus.write32(
                    rw_mgr::RUN_SINGLE_GROUP + word(group * vgs + vg),
                    p.guaranteed_read,
                );
                tmp |= self.param.read_correct_mask_vg & !self.read_status();
            }
            bit_chk &= tmp;
        }

        self.bus
            .write32(rw_mgr::RUN_SINGLE_GROUP + word(group), p.clear_dqs_enable);
        self.set_rank_and_odt_mask(0, OdtMode::Off);

        (bit_chk == self.param.read_correct_mask, bit_chk)
    }

    /// Writes the guaranteed-read pattern into every rank.
    pub(crate) fn read_load_patterns(&self, ranks: Ranks) {
        let p = &self.cfg.program;
        for r in self.rank_range(ranks) {
            if self.rank_skipped(r) {
                continue;
            }
            self.set_rank_and_odt_mask(r, OdtMode::ReadWrite);

            let counts = [0x20, 0x20, 0x04, 0x04];
            for (n, (&count, &wait)) in counts
                .iter()
                .zip(p.guaranteed_write_wait.iter())
                .enumerate()
            {
                self.bus.write32(rw_mgr::load_cntr(n as u32), count);
                self.bus.write32(rw_mgr::load_jump(n as u32), wait);
            }

            self.bus
                .write32(rw_mgr::RUN_SINGLE_GROUP, p.guaranteed_write);
        }
        self.set_rank_and_odt_mask(0, OdtMode::Off);
    }

    /// Back-to-back reads with dummy reads mixed in to align DQS enable.
    /// With `all_groups`, every DQS group is read in one burst.
    pub(crate) fn read_test(
        &self,
        group: u32,
        mode: PassMode,
        all_groups: bool,
        ranks: Ranks,
    ) -> (bool, u32) {
        let cfg = self.cfg;
        let p = &cfg.program;
        let vgs = cfg.virtual_groups_per_read_dqs;
        let mut bit_chk = self.param.read_correct_mask;

        for r in self.rank_range(ranks) {
            if self.rank_skipped(r) {
                continue;
            }
            self.set_rank_and_odt_mask(r, OdtMode::ReadWrite);

            self.bus.write32(rw_mgr::load_cntr(1), 0x10);
            self.bus.write32(rw_mgr::load_jump(1), p.read_b2b_wait1);
            self.bus.write32(rw_mgr::load_cntr(2), 0x10);
            self.bus.write32(rw_mgr::load_jump(2), p.read_b2b_wait2);

            // Quick mode still needs two reads to catch a failure.
            let reads = if cfg.quick_read_mode() {
                0x1
            } else if all_groups {
                0x06
            } else {
                0x32
            };
            self.bus.write32(rw_mgr::load_cntr(0), reads);
            self.bus.write32(rw_mgr::load_jump(0), p.read_b2b);

            let groups = if all_groups {
                cfg.if_read_dqs_width * vgs - 1
            } else {
                0
            };
            self.bus.write32(rw_mgr::load_cntr(3), groups);
            self.bus.write32(rw_mgr::load_jump(3), p.read_b2b);

            let run = if all_groups {
                rw_mgr::RUN_ALL_GROUPS
            } else {
                rw_mgr::RUN_SINGLE_GROUP
            };

            let mut tmp = 0;
            for vg in (0..vgs).rev() {
                self.bus.write32(phy_mgr::FIFO_RESET, 0);
                self.bus.write32(rw_mgr::RESET_READ_DATAPATH, 0);

                tmp <<= cfg.dq_per_read_dqs / vgs;
                self.bus.write32(run + word(group * vgs + vg), p.read_b2b);
                tmp |= self.param.read_correct_mask_vg & !self.read_status();
            }
            bit_chk &= tmp;
        }

        self.bus
            .write32(rw_mgr::RUN_SINGLE_GROUP + word(group), p.clear_dqs_enable);
        self.set_rank_and_odt_mask(0, OdtMode::Off);

        (mode.judge(bit_chk, self.param.read_correct_mask), bit_chk)
    }

    /// Loads the NOP sequencing between write command and data and issues
    /// one LFSR write/read-back program on `group`.
    fn write_test_issue(&self, group: u32, test_dm: bool) {
        let cfg = self.cfg;
        let lfsr = if test_dm {
            &cfg.program.lfsr_dm
        } else {
            &cfg.program.lfsr
        };

        let nop = self.gbl.rw_wl_nop_cycles;
        let instruction = if nop == -1 {
            // DQS comes up with the write command; jump straight to data.
            self.bus.write32(rw_mgr::load_cntr(2), 0xff);
            self.bus.write32(rw_mgr::load_jump(2), lfsr.data);
            self.bus.write32(rw_mgr::load_jump(3), lfsr.nop);
            lfsr.wl_1
        } else if nop == 0 {
            // Skip the NOP and go straight to DQS enable.
            self.bus.write32(rw_mgr::load_cntr(2), 0xff);
            self.bus.write32(rw_mgr::load_jump(2), lfsr.dqs);
            lfsr.entry
        } else {
            // Fall through counter 2 and loop on NOPs with counter 3.
            self.bus.write32(rw_mgr::load_cntr(2), 0);
            self.bus.write32(rw_mgr::load_jump(2), 0);
            self.bus.write32(rw_mgr::load_cntr(3), (nop - 1) as u32);
            self.bus.write32(rw_mgr::load_jump(3), lfsr.nop);
            lfsr.entry
        };

        self.bus.write32(rw_mgr::RESET_READ_DATAPATH, 0);

        let writes = if cfg.quick_write_mode() { 0x08 } else { 0x40 };
        self.bus.write32(rw_mgr::load_cntr(0), writes);
        self.bus.write32(rw_mgr::load_jump(0), instruction);

        // Counter 1 leaves time for the read data to come back.
        self.bus.write32(rw_mgr::load_cntr(1), 0x30);
        self.bus.write32(rw_mgr::load_jump(1), lfsr.wait);

        self.bus
            .write32(rw_mgr::RUN_SINGLE_GROUP + word(group), instruction);
    }

    /// LFSR write and read-back on one write group.
    pub(crate) fn write_test(
        &self,
        write_group: u32,
        use_dm: bool,
        mode: PassMode,
        ranks: Ranks,
    ) -> (bool, u32) {
        let cfg = self.cfg;
        let vgs = cfg.virtual_groups_per_write_dqs;
        let mut bit_chk = self.param.write_correct_mask;

        for r in self.rank_range(ranks) {
            if self.rank_skipped(r) {
                continue;
            }
            self.set_rank_and_odt_mask(r, OdtMode::ReadWrite);

            let mut tmp = 0;
            for vg in (0..vgs).rev() {
                self.bus.write32(phy_mgr::FIFO_RESET, 0);

                tmp <<= cfg.dq_per_write_dqs / vgs;
                self.write_test_issue(write_group * vgs + vg, use_dm);
                tmp |= self.param.write_correct_mask_vg & !self.read_status();
            }
            bit_chk &= tmp;
        }

        self.set_rank_and_odt_mask(0, OdtMode::Off);

        (mode.judge(bit_chk, self.param.write_correct_mask), bit_chk)
    }

    pub(crate) fn incr_vfifo(&self, group: u32, v: &mut u32) {
        self.bus.write32(phy_mgr::INC_VFIFO_HARD_PHY, group);
        *v += 1;
    }

    /// The VFIFO only counts up; decrementing goes all the way around.
    pub(crate) fn decr_vfifo(&self, group: u32, v: &mut u32) {
        for _ in 0..self.cfg.vfifo_size - 1 {
            self.incr_vfifo(group, v);
        }
    }
}
