// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bring-up and handoff around the calibration pipeline: register file and
//! tracking setup, ROM load, memory initialization, and the final handoff
//! of the PHY to the controller.

use drv_sdram_cal_api::{
    CalDebugInfo, CalStage, CalStatus, CalSubstage, CalibSteps, Fom,
    PhyDebugFlags, REG_FILE_INIT_SEQ_SIGNATURE,
};
use regbus::{word, RegBus};
use ringbuf::*;

use crate::config::MrsProgram;
use crate::regs::{
    phy_mgr, reg_file, rw_mgr, sdr_ctrl, CtrlCfg, PhyCtrl0, PhyCtrl1,
    PhyCtrl2, SAMPLECOUNT_LOW_WIDTH,
};
use crate::rwtest::OdtMode;
use crate::{CalError, Sequencer, Trace};

/// Tracking-manager sample count between DQS-enable adjustments.
const TRK_SAMPLE_COUNT: u32 = 7500;

/// Long-idle outer loop count in the upper half, sample count in the lower.
const TRK_LONG_IDLE_SAMPLE_COUNT: u32 = (10 << 16) | 100;

/// Tracking delays, most significant first: tRFC (933MHz 4Gb worst case),
/// tRCD, VFIFO wait and mux delay, in memory clocks.
const TRK_DELAYS: u32 = (243 << 24) | (14 << 16) | (10 << 8) | 4;

/// Refresh interval handed to the tracking manager.
const TRK_REFRESH_INTERVAL: u32 = 1000;

impl<B: RegBus> Sequencer<'_, B> {
    pub(crate) fn reg_file_set_group(&self, group: u32) {
        self.bus
            .clear_set32(reg_file::CUR_STAGE, 0xffff_0000, group << 16);
    }

    pub(crate) fn reg_file_set_stage(&self, stage: CalStage) {
        self.bus
            .clear_set32(reg_file::CUR_STAGE, 0xffff, stage as u32 & 0xff);
    }

    pub(crate) fn reg_file_set_sub_stage(&self, substage: CalSubstage) {
        self.bus.clear_set32(
            reg_file::CUR_STAGE,
            0xff00,
            (substage as u32 & 0xff) << 8,
        );
    }

    /// Publishes the stage about to run so that a debugger can see where
    /// calibration stopped.
    pub(crate) fn enter_stage(
        &self,
        stage: CalStage,
        substage: CalSubstage,
        group: u32,
    ) {
        self.reg_file_set_group(group);
        self.reg_file_set_stage(stage);
        self.reg_file_set_sub_stage(substage);
        ringbuf_entry_root!(Trace::Stage { stage, group });
    }

    /// Takes the PHY away from the controller and clears the published
    /// status.
    fn initialize(&self) {
        self.bus.write32(phy_mgr::MUX_SEL, 0x3);
        self.bus.write32(phy_mgr::RESET_MEM_STBL, 0);
        self.bus.write32(phy_mgr::CAL_STATUS, CalStatus::Reset as u32);
        self.bus.write32(phy_mgr::CAL_DEBUG_INFO, 0);
    }

    /// Makes counter 0 jump straight to a return, so that a single
    /// instruction can be run as a subroutine.
    fn set_jump_as_return(&self) {
        self.bus.write32(rw_mgr::load_cntr(0), 0xff);
        self.bus.write32(rw_mgr::load_jump(0), self.cfg.program.ret);
    }

    fn run_subroutine(&self, instr: u32) {
        self.set_jump_as_return();
        self.bus.write32(rw_mgr::RUN_SINGLE_GROUP, instr);
    }

    fn mode_registers(&self, rank: u32) -> &MrsProgram {
        let p = &self.cfg.program;
        if (self.cfg.address_mirroring >> rank) & 1 != 0 {
            &p.mrs_mirrored
        } else {
            &p.mrs
        }
    }

    /// Programs MR2, MR3 and MR1 of the selected rank, then MR0 with `mr0`.
    fn program_mode_registers(&self, mrs: &MrsProgram, mr0: u32) {
        for mr in [mrs.mrs2, mrs.mrs3, mrs.mrs1] {
            self.run_subroutine(mr);
            self.delay_for_n_mem_clocks(4);
        }
        self.run_subroutine(mr0);
    }

    fn load_init_counters(&self, cntr: &[u32; 3], instr: u32) {
        let mask = self.skip_delay_mask;
        for (n, &c) in (0..).zip(cntr) {
            self.bus.write32(rw_mgr::load_cntr(n), c & mask);
        }
        for n in 0..3 {
            self.bus.write32(rw_mgr::load_jump(n), instr);
        }
        self.bus.write32(rw_mgr::RUN_SINGLE_GROUP, instr);
    }

    /// Takes the memories through reset, clock enable, mode register
    /// programming and ZQ calibration.
    pub(crate) fn rw_mem_initialize(&self) {
        let cfg = self.cfg;
        let p = &cfg.program;

        // Reset and CKE are broadcast to every rank.
        self.bus.write32(rw_mgr::SET_CS_AND_ODT_MASK, rw_mgr::RANK_ALL);

        // Hold RESET low for tINIT, then declare the clock stable.
        self.load_init_counters(&cfg.tinit_cntr, p.init_reset_0_cke_0);
        self.bus.write32(phy_mgr::RESET_MEM_STBL, 1);

        // Release RESET and wait tRESET with CKE still low.
        self.load_init_counters(&cfg.treset_cntr, p.init_reset_1_cke_0);

        // tXPR.
        self.delay_for_n_mem_clocks(250);

        for r in 0..cfg.number_of_ranks {
            if self.rank_skipped(r) {
                continue;
            }
            self.set_rank_and_odt_mask(r, OdtMode::Off);

            let mrs = self.mode_registers(r);
            self.program_mode_registers(mrs, mrs.mrs0_dll_reset);

            self.run_subroutine(p.zqcl);

            // tZQinit, which also covers tDLLK.
            self.delay_for_n_mem_clocks(512);
        }
    }

    /// Restores the user mode register settings before the controller
    /// takes over.
    fn handoff(&self) {
        let p = &self.cfg.program;
        for r in 0..self.cfg.number_of_ranks {
            if self.rank_skipped(r) {
                continue;
            }
            self.set_rank_and_odt_mask(r, OdtMode::Off);

            self.bus.write32(rw_mgr::RUN_SINGLE_GROUP, p.precharge_all);

            let mrs = self.mode_registers(r);
            self.program_mode_registers(mrs, mrs.mrs0_user);
        }
    }

    fn initialize_reg_file(&self) {
        self.bus
            .write32(reg_file::SIGNATURE, REG_FILE_INIT_SEQ_SIGNATURE);
        for addr in [
            reg_file::DEBUG_DATA_ADDR,
            reg_file::CUR_STAGE,
            reg_file::FOM,
            reg_file::FAILING_STAGE,
            reg_file::DEBUG1,
            reg_file::DEBUG2,
        ] {
            self.bus.write32(addr, 0);
        }
    }

    /// Programs the tracking sample counts into the HPS PHY controls.
    fn initialize_hps_phy(&self) {
        let mut ctrl0 = PhyCtrl0(0);
        ctrl0.set_acdelayen(2);
        ctrl0.set_dqdelayen(1);
        ctrl0.set_dqsdelayen(1);
        ctrl0.set_dqslogicdelayen(1);
        ctrl0.set_resetdelayen(false);
        ctrl0.set_lpddrdis(true);
        ctrl0.set_addlatsel(false);
        ctrl0.set_samplecount_19_0(TRK_SAMPLE_COUNT);
        self.bus.write32(sdr_ctrl::PHY_CTRL0, ctrl0.0);

        let mut ctrl1 = PhyCtrl1(0);
        ctrl1.set_samplecount_31_20(TRK_SAMPLE_COUNT >> SAMPLECOUNT_LOW_WIDTH);
        ctrl1.set_longidle_19_0(TRK_LONG_IDLE_SAMPLE_COUNT);
        self.bus.write32(sdr_ctrl::PHY_CTRL1, ctrl1.0);

        let mut ctrl2 = PhyCtrl2(0);
        ctrl2.set_longidle_31_20(
            TRK_LONG_IDLE_SAMPLE_COUNT >> SAMPLECOUNT_LOW_WIDTH,
        );
        self.bus.write32(sdr_ctrl::PHY_CTRL2, ctrl2.0);
    }

    /// Leaves the constants the tracking manager needs in the register
    /// file.
    fn initialize_tracking(&self) {
        let cfg = self.cfg;
        let p = &cfg.program;

        let rw_mgr_addr = ((p.idle & 0xff) << 24)
            | ((p.activate_1 & 0xff) << 16)
            | ((p.sgle_read & 0xff) << 8)
            | (p.precharge_all & 0xff);
        let refresh = ((p.refresh_all & 0xff) << 24) | TRK_REFRESH_INTERVAL;

        self.bus.write32(
            reg_file::DTAPS_PER_PTAP,
            cfg.dtaps_per_ptap(cfg.io.delay_per_dchain_tap),
        );
        self.bus.write32(reg_file::TRK_SAMPLE_COUNT, TRK_SAMPLE_COUNT);
        self.bus
            .write32(reg_file::TRK_LONGIDLE, TRK_LONG_IDLE_SAMPLE_COUNT);
        self.bus.write32(reg_file::DELAYS, TRK_DELAYS);
        self.bus.write32(reg_file::TRK_RW_MGR_ADDR, rw_mgr_addr);
        self.bus
            .write32(reg_file::TRK_READ_DQS_WIDTH, cfg.if_read_dqs_width);
        self.bus.write32(reg_file::TRK_RFSH, refresh);
    }

    /// Loads the RW manager's instruction and address/command ROMs.
    fn load_rom(&self) {
        for (i, &w) in (0..).zip(self.cfg.inst_rom) {
            self.bus.write32(rw_mgr::INST_ROM_WRITE + word(i), w);
        }
        for (i, &w) in (0..).zip(self.cfg.ac_rom) {
            self.bus.write32(rw_mgr::AC_ROM_WRITE + word(i), w);
        }
    }

    /// Initializes the memories, calibrates, hands the PHY back and
    /// publishes the outcome. Returns whether calibration passed.
    fn run_mem_calibrate(&mut self) -> bool {
        self.bus.write32(phy_mgr::CAL_STATUS, CalStatus::Reset as u32);

        // Tracking must not move DQS enable under the sequencer.
        let ctrl_cfg = self.bus.read32(sdr_ctrl::CTRL_CFG);
        let mut stopped = CtrlCfg(ctrl_cfg);
        stopped.set_dqstrken(false);
        self.bus.write32(sdr_ctrl::CTRL_CFG, stopped.0);

        self.initialize();
        self.rw_mem_initialize();

        let pass = self.mem_calibrate().is_ok();

        self.precharge_and_activate();
        self.bus.write32(phy_mgr::FIFO_RESET, 0);

        // A debugger keeps the PHY.
        if !self.debug_flags().contains(PhyDebugFlags::IN_DEBUG_MODE) {
            self.handoff();
            self.bus.write32(phy_mgr::MUX_SEL, 0x2);
        }

        self.bus.write32(sdr_ctrl::CTRL_CFG, ctrl_cfg);

        if pass {
            let fom = self.report().fom;
            let info = CalDebugInfo::from_fom(fom);
            self.bus.write32(reg_file::FOM, info.0);
            self.bus.write32(phy_mgr::CAL_DEBUG_INFO, info.0);
            self.bus.write32(phy_mgr::CAL_STATUS, CalStatus::Success as u32);
            ringbuf_entry_root!(Trace::CalibrationPassed {
                fom_in: fom.fom_in,
                fom_out: fom.fom_out,
            });
        } else {
            let info = CalDebugInfo::from_failure(self.gbl.error);
            self.bus.write32(phy_mgr::CAL_DEBUG_INFO, info.0);
            self.bus.write32(phy_mgr::CAL_STATUS, CalStatus::Fail as u32);
            self.bus.write32(reg_file::FAILING_STAGE, info.0);
            ringbuf_entry_root!(Trace::CalibrationFailed(self.gbl.error));
        }

        pass
    }

    /// Runs the whole flow: register file and tracking setup, ROM load,
    /// memory initialization, calibration and handoff.
    pub fn calibrate_full(&mut self) -> Result<Fom, CalError> {
        let cfg = self.cfg;
        ringbuf_entry_root!(Trace::Start);

        let mut flags = self.debug_flags() | PhyDebugFlags::ENABLE_CAL_RPT;
        if cfg.disable_guaranteed_read {
            flags |= PhyDebugFlags::DISABLE_GUARANTEED_READ;
        }
        self.set_debug_flags(flags);

        self.initialize_reg_file();
        self.initialize_hps_phy();
        self.scc().clear_hhp_rfile();
        self.initialize_tracking();
        self.load_rom();

        self.reg_file_set_stage(CalStage::Nil);
        self.reg_file_set_group(0);

        self.skip_delay_mask = if cfg.steps.contains(CalibSteps::SKIP_DELAY_LOOPS)
        {
            0
        } else {
            0xff
        };

        if self.run_mem_calibrate() {
            Ok(self.report().fom)
        } else {
            Err(CalError::Failed(self.gbl.error))
        }
    }
}
