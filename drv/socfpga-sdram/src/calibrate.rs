// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stage orchestration.
//!
//! Every write group runs through the same pipeline: VFIFO calibration of
//! each of its read groups, write deskew per shadow register set, then a
//! second read centering now that writes are trustworthy. Once every group
//! has passed, the read latency is trimmed for the interface as a whole.
//!
//! A failing stage records where it failed and returns `Err`. Unless the
//! debug flags ask to sweep all groups, the first failure ends the run.

use drv_sdram_cal_api::{
    CalStage, CalSubstage, CalibSteps, FailingStage, PhyDebugFlags, NO_GROUP,
};
use regbus::RegBus;
use ringbuf::*;

use crate::config::low_bits;
use crate::regs::{data_mgr, phy_mgr, rw_mgr};
use crate::rwtest::{OdtMode, PassMode, Ranks};
use crate::scc::{Selection, ALL};
use crate::{Sequencer, StageFailed, Step, Trace};

/// Margin added to the lowest read latency that still passed.
const READ_LATENCY_MARGIN: u32 = 2;

/// Bus-in delay used for every read group in skip-calibration mode.
const SKIP_CAL_DQS_IN_DELAY: u32 = 10;

impl<B: RegBus> Sequencer<'_, B> {
    /// Precharges all banks, then activates row 0 in the first and last
    /// bank of every rank.
    pub(crate) fn precharge_and_activate(&self) {
        let p = &self.cfg.program;
        for r in 0..self.cfg.number_of_ranks {
            if self.rank_skipped(r) {
                continue;
            }
            self.set_rank_and_odt_mask(r, OdtMode::Off);

            self.bus.write32(rw_mgr::RUN_SINGLE_GROUP, p.precharge_all);

            self.bus.write32(rw_mgr::load_cntr(0), 0x0f);
            self.bus.write32(rw_mgr::load_jump(0), p.activate_0_and_1_wait1);
            self.bus.write32(rw_mgr::load_cntr(1), 0x0f);
            self.bus.write32(rw_mgr::load_jump(1), p.activate_0_and_1_wait2);

            self.bus.write32(rw_mgr::RUN_SINGLE_GROUP, p.activate_0_and_1);
        }
    }

    /// Reads the generated latencies and programs the starting read and
    /// write latency.
    pub(crate) fn mem_config(&mut self) {
        // One extra clock for the address/command mux delay.
        let wlat = self
            .bus
            .read32(data_mgr::T_WL_ADD)
            .saturating_add(self.bus.read32(data_mgr::MEM_T_ADD))
            .saturating_add(1);
        let rlat = self.bus.read32(data_mgr::T_RL_ADD);

        self.gbl.rw_wl_nop_cycles = wlat as i32 - 2;

        // The hard PHY adds one more cycle of write latency.
        let wlat = wlat.saturating_add(1);

        // Start high; the LFIFO stage brings it down.
        self.gbl.curr_read_lat =
            rlat.saturating_add(16).min(self.cfg.max_latency());
        self.bus.write32(phy_mgr::PHY_RLAT, self.gbl.curr_read_lat);

        self.gbl.curr_write_lat = wlat;
        self.bus.write32(phy_mgr::AFI_WLAT, wlat - 2);

        self.precharge_and_activate();
    }

    /// Programs fixed, instant-on settings instead of calibrating.
    pub(crate) fn mem_skip_calibrate(&mut self) {
        let cfg = self.cfg;
        let scc = self.scc();

        // DQS lines up with CK after 720 - 90 - 180 - 2 ptaps worth of
        // degrees, which comes to 1.25 * chain length - 2 ptaps.
        let out_phase = (5 * cfg.io.dll_chain_length / 4).saturating_sub(2);

        for _ in cfg.shadow_sets() {
            for rg in 0..cfg.if_read_dqs_width {
                scc.set_dqs_en_phase(rg, 0);
                scc.set_dqdqs_output_phase(rg, out_phase);
            }
            for wg in 0..cfg.if_write_dqs_width {
                scc.select_group(wg);
            }
            scc.update(&Selection::NONE.dqs(ALL).dqs_io().dq(ALL).dm(ALL));
        }

        for rg in 0..cfg.if_read_dqs_width {
            scc.set_dqs_bus_in_delay(rg, SKIP_CAL_DQS_IN_DELAY);
        }
        scc.update(&Selection::NONE.dqs_groups(0..cfg.if_read_dqs_width));

        // The hard VFIFO can only be positioned by incrementing it.
        for _ in 0..cfg.calib_vfifo_offset {
            self.bus.write32(phy_mgr::INC_VFIFO_HARD_PHY, 0xff);
        }
        self.bus.write32(phy_mgr::FIFO_RESET, 0);

        self.gbl.curr_read_lat = cfg.calib_lfifo_offset;
        self.bus.write32(phy_mgr::PHY_RLAT, self.gbl.curr_read_lat);
    }

    /// Finds a DQS-enable setting and centres the read window of
    /// `read_group`, pushing the whole output side of the group out by two
    /// delay taps at a time if no output phase gives a guaranteed read.
    pub(crate) fn vfifo(&mut self, read_group: u32, test_bgn: u32) -> Step {
        let cfg = self.cfg;
        let write_group = read_group * cfg.if_write_dqs_width / cfg.if_read_dqs_width;
        let dtaps = cfg.dtaps_per_ptap(cfg.io.delay_per_dqs_en_dchain_tap);
        let guaranteed_read = !self
            .debug_flags()
            .contains(PhyDebugFlags::DISABLE_GUARANTEED_READ);

        self.enter_stage(CalStage::Vfifo, CalSubstage::GuaranteedRead, read_group);

        let mut failed_substage = CalSubstage::GuaranteedRead;
        let mut calibrated_at = None;

        'delay: for d in (0..=dtaps).step_by(2) {
            if d > 0 {
                self.scc()
                    .apply_group_all_out_delay_add_all_ranks(write_group, d);
            }

            for p in 0..=cfg.io.dqdqs_out_phase_max {
                self.scc().set_dqdqs_output_phase_all_ranks(read_group, p);

                self.read_load_patterns(Ranks::All);
                if guaranteed_read
                    && !self.read_test_patterns(read_group, Ranks::All).0
                {
                    break;
                }

                let mut calibrated = true;
                if self.sweep_dq_in_delay(read_group, test_bgn) {
                    for (sr, rank_bgn) in cfg.shadow_sets() {
                        if self.param.skip_shadow_regs[sr] {
                            continue;
                        }
                        // The figure of merit is taken after writes.
                        if !self.vfifo_center(
                            rank_bgn,
                            write_group,
                            read_group,
                            test_bgn,
                            true,
                            false,
                        ) {
                            calibrated = false;
                            failed_substage = CalSubstage::VfifoCenter;
                        }
                    }
                } else {
                    calibrated = false;
                    failed_substage = CalSubstage::DqsEnPhase;
                }

                if calibrated {
                    calibrated_at = Some(d);
                    break 'delay;
                }
            }
        }

        match calibrated_at {
            None => Err(self.fail(read_group, CalStage::Vfifo, failed_substage)),
            Some(d) => {
                if d > 0 {
                    self.scc().zero_group(write_group, true);
                }
                Ok(())
            }
        }
    }

    /// Re-centres the read window of `read_group` using write and
    /// read-back tests, now that the write side is calibrated.
    pub(crate) fn vfifo_end(&mut self, read_group: u32, test_bgn: u32) -> Step {
        let cfg = self.cfg;
        let write_group = read_group * cfg.if_write_dqs_width / cfg.if_read_dqs_width;

        self.enter_stage(
            CalStage::VfifoAfterWrites,
            CalSubstage::VfifoCenter,
            read_group,
        );

        let mut calibrated = true;
        for (sr, rank_bgn) in cfg.shadow_sets() {
            if self.param.skip_shadow_regs[sr] {
                continue;
            }
            if !self.vfifo_center(
                rank_bgn,
                write_group,
                read_group,
                test_bgn,
                false,
                true,
            ) {
                calibrated = false;
            }
        }

        if calibrated {
            Ok(())
        } else {
            Err(self.fail(
                read_group,
                CalStage::VfifoAfterWrites,
                CalSubstage::VfifoCenter,
            ))
        }
    }

    /// Walks the read latency down until reads across all groups start
    /// failing, then settles a fixed margin above the lowest latency that
    /// passed.
    pub(crate) fn lfifo(&mut self) -> Step {
        self.enter_stage(
            CalStage::Lfifo,
            CalSubstage::ReadLatency,
            u32::from(NO_GROUP),
        );

        self.read_load_patterns(Ranks::All);

        let mut lat = self.gbl.curr_read_lat;
        let mut lowest_passing = None;
        loop {
            self.bus.write32(phy_mgr::PHY_RLAT, lat);
            if !self.read_test(0, PassMode::AllBits, true, Ranks::All).0 {
                break;
            }
            lowest_passing = Some(lat);
            match lat.checked_sub(1) {
                Some(l) if l > 0 => lat = l,
                _ => break,
            }
        }

        // Put the FIFO pointers back in a known state.
        self.bus.write32(phy_mgr::FIFO_RESET, 0);

        let Some(lowest) = lowest_passing else {
            return Err(self.fail(
                u32::from(NO_GROUP),
                CalStage::Lfifo,
                CalSubstage::ReadLatency,
            ));
        };

        self.gbl.curr_read_lat = lowest + READ_LATENCY_MARGIN;
        self.bus.write32(phy_mgr::PHY_RLAT, self.gbl.curr_read_lat);
        ringbuf_entry_root!(Trace::ReadLatency(self.gbl.curr_read_lat));
        Ok(())
    }

    /// Write deskew of one write group for the ranks of one shadow
    /// register set.
    pub(crate) fn writes(
        &mut self,
        rank_bgn: u32,
        write_group: u32,
        test_bgn: u32,
    ) -> Step {
        self.enter_stage(CalStage::Writes, CalSubstage::WritesCenter, write_group);

        if self.writes_center(rank_bgn, write_group, test_bgn) {
            Ok(())
        } else {
            Err(self.fail(write_group, CalStage::Writes, CalSubstage::WritesCenter))
        }
    }

    /// Runs the per-group pipeline for one write group.
    fn calibrate_write_group(&mut self, write_group: u32, write_test_bgn: u32) -> Step {
        let cfg = self.cfg;
        let steps = cfg.steps;
        let read_groups = cfg.first_read_group(write_group)..cfg.end_read_group(write_group);

        if !steps.contains(CalibSteps::SKIP_VFIFO) {
            for (i, rg) in read_groups.clone().enumerate() {
                self.vfifo(rg, i as u32 * cfg.dq_per_read_dqs)?;
            }
        }

        // Quick mode does without write deskew.
        if !steps.contains(CalibSteps::SKIP_WRITES)
            && !steps.contains(CalibSteps::SKIP_DELAY_SWEEPS)
        {
            let mut failed = false;
            for (sr, rank_bgn) in cfg.shadow_sets() {
                if self.param.skip_shadow_regs[sr] {
                    continue;
                }
                if self.writes(rank_bgn, write_group, write_test_bgn).is_err() {
                    if !self.sweep_all_groups() {
                        return Err(StageFailed);
                    }
                    failed = true;
                }
            }
            if failed {
                return Err(StageFailed);
            }
        }

        if !steps.contains(CalibSteps::SKIP_WRITES) {
            for (i, rg) in read_groups.enumerate() {
                self.vfifo_end(rg, i as u32 * cfg.dq_per_read_dqs)?;
            }
        }

        Ok(())
    }

    /// One full pass over every group that is not skipped, followed by
    /// the read latency search.
    fn calibrate_groups(&mut self) -> Step {
        let cfg = self.cfg;
        let per_wg = cfg.num_dqs_per_write_group;

        self.scc().zero_all();

        let mut run_groups = !self.param.skip_groups;
        let mut failing_groups = 0;

        for wg in 0..cfg.if_write_dqs_width {
            let current_run = run_groups & low_bits(per_wg);
            run_groups >>= per_wg;
            if current_run == 0 {
                continue;
            }

            self.scc().select_group(wg);
            self.scc().zero_group(wg, false);

            if self
                .calibrate_write_group(wg, wg * cfg.dq_per_write_dqs)
                .is_err()
            {
                if !self.sweep_all_groups() {
                    return Err(StageFailed);
                }
                failing_groups += 1;
            }
        }

        if failing_groups != 0 {
            return Err(StageFailed);
        }

        // Latency is shared by every group, so it is only trimmed when all
        // of them took part.
        if !cfg.steps.contains(CalibSteps::SKIP_LFIFO) && self.param.skip_groups == 0 {
            self.lfifo()?;
        }

        Ok(())
    }

    /// Calibrates the interface from a freshly initialized memory.
    pub(crate) fn mem_calibrate(&mut self) -> Step {
        let cfg = self.cfg;

        self.gbl.error = FailingStage::NONE;
        self.gbl.fom_in = 0;
        self.gbl.fom_out = 0;

        self.mem_config();

        for rg in 0..cfg.if_read_dqs_width {
            self.scc().select_group(rg);
            self.scc().set_bypass_mode(rg);
        }

        if cfg.steps.contains(CalibSteps::SKIP_ALL) {
            self.mem_skip_calibrate();
        } else {
            for _ in 0..cfg.num_calib_repeat {
                self.calibrate_groups()?;
            }
        }
        Ok(())
    }
}
