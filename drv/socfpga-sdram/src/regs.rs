// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Address map of the SDRAM PHY and controller register groups.
//!
//! Offsets are relative to the base of the SDR block. The RW manager, PHY
//! manager and scan-chain manager drop the two low address bits, so every
//! per-item array below is indexed with [`regbus::word`].

use bitfield::bitfield;
use core::mem::offset_of;
use drv_sdram_cal_api::RegFile;
use static_assertions::{const_assert, const_assert_eq};

pub const SCC_BASE: u32 = 0x0000;
pub const PHY_MGR_BASE: u32 = 0x1000;
pub const RW_MGR_BASE: u32 = 0x2000;
pub const DATA_MGR_BASE: u32 = 0x4000;
pub const REG_FILE_BASE: u32 = 0x4800;
pub const SDR_CTRL_BASE: u32 = 0x5000;

/// Scan-chain manager.
pub mod scc {
    use super::SCC_BASE;

    pub const GROUP_COUNTER: u32 = SCC_BASE | 0x000;
    pub const DQS_IN_DELAY: u32 = SCC_BASE | 0x100;
    pub const DQS_EN_PHASE: u32 = SCC_BASE | 0x200;
    pub const DQS_EN_DELAY: u32 = SCC_BASE | 0x300;
    pub const DQDQS_OUT_PHASE: u32 = SCC_BASE | 0x400;
    pub const OCT_OUT1_DELAY: u32 = SCC_BASE | 0x500;
    pub const IO_OUT1_DELAY: u32 = SCC_BASE | 0x700;
    pub const IO_IN_DELAY: u32 = SCC_BASE | 0x900;
    pub const HHP_GLOBALS: u32 = SCC_BASE | 0xa00;
    pub const HHP_EXTRAS: u32 = HHP_GLOBALS | 0x4;
    pub const HHP_RFILE: u32 = SCC_BASE | 0xb00;

    /// Entries in the HPS register file behind the scan chain.
    pub const HHP_RFILE_DEPTH: u32 = 16;

    // Scan enables and the update strobe.
    pub const DQS_ENA: u32 = SCC_BASE | 0xe00;
    pub const DQS_IO_ENA: u32 = SCC_BASE | 0xe04;
    pub const DQ_ENA: u32 = SCC_BASE | 0xe08;
    pub const DM_ENA: u32 = SCC_BASE | 0xe0c;
    pub const UPDATE: u32 = SCC_BASE | 0xe20;
}

/// PHY manager command and configuration registers.
pub mod phy_mgr {
    use super::PHY_MGR_BASE;

    pub const INC_VFIFO_FR: u32 = PHY_MGR_BASE | 0x00;
    pub const INC_VFIFO_HARD_PHY: u32 = PHY_MGR_BASE | 0x04;
    pub const FIFO_RESET: u32 = PHY_MGR_BASE | 0x08;
    pub const INC_VFIFO_FR_HR: u32 = PHY_MGR_BASE | 0x0c;
    pub const INC_VFIFO_QR: u32 = PHY_MGR_BASE | 0x10;

    pub const PHY_RLAT: u32 = PHY_MGR_BASE | 0x40;
    pub const RESET_MEM_STBL: u32 = PHY_MGR_BASE | 0x44;
    pub const MUX_SEL: u32 = PHY_MGR_BASE | 0x48;
    pub const CAL_STATUS: u32 = PHY_MGR_BASE | 0x4c;
    pub const CAL_DEBUG_INFO: u32 = PHY_MGR_BASE | 0x50;
    pub const VFIFO_RD_EN_OVRD: u32 = PHY_MGR_BASE | 0x54;
    pub const AFI_WLAT: u32 = PHY_MGR_BASE | 0x58;
    pub const AFI_RLAT: u32 = PHY_MGR_BASE | 0x5c;
}

/// Read/write manager: the micro-sequencer that issues memory commands.
pub mod rw_mgr {
    use super::RW_MGR_BASE;

    /// Reading the base returns the per-bit failure status of the last
    /// test program; writing it runs a program for group 0.
    pub const STATUS: u32 = RW_MGR_BASE;
    pub const RUN_SINGLE_GROUP: u32 = RW_MGR_BASE | 0x0000;
    pub const RUN_ALL_GROUPS: u32 = RW_MGR_BASE | 0x0400;
    pub const LOAD_CNTR: u32 = RW_MGR_BASE | 0x0800;
    pub const LOAD_JUMP_ADD: u32 = RW_MGR_BASE | 0x0c00;
    pub const RESET_READ_DATAPATH: u32 = RW_MGR_BASE | 0x1000;
    pub const SET_CS_AND_ODT_MASK: u32 = RW_MGR_BASE | 0x1400;
    pub const INST_ROM_WRITE: u32 = RW_MGR_BASE | 0x1800;
    pub const AC_ROM_WRITE: u32 = RW_MGR_BASE | 0x1c00;

    /// Chip-select masks for [`SET_CS_AND_ODT_MASK`].
    pub const RANK_ALL: u32 = 0x00;
    pub const RANK_NONE: u32 = 0xff;

    pub const fn load_cntr(n: u32) -> u32 {
        LOAD_CNTR + regbus::word(n)
    }

    pub const fn load_jump(n: u32) -> u32 {
        LOAD_JUMP_ADD + regbus::word(n)
    }
}

/// Latency settings generated into the data manager.
pub mod data_mgr {
    use super::DATA_MGR_BASE;

    pub const T_WL_ADD: u32 = DATA_MGR_BASE | 0x0;
    pub const MEM_T_ADD: u32 = DATA_MGR_BASE | 0x4;
    pub const T_RL_ADD: u32 = DATA_MGR_BASE | 0x8;
}

/// Sequencer register file, laid out as [`RegFile`].
pub mod reg_file {
    use super::{offset_of, RegFile, REG_FILE_BASE};

    pub const SIGNATURE: u32 = REG_FILE_BASE + offset_of!(RegFile, signature) as u32;
    pub const DEBUG_DATA_ADDR: u32 =
        REG_FILE_BASE + offset_of!(RegFile, debug_data_addr) as u32;
    pub const CUR_STAGE: u32 = REG_FILE_BASE + offset_of!(RegFile, cur_stage) as u32;
    pub const FOM: u32 = REG_FILE_BASE + offset_of!(RegFile, fom) as u32;
    pub const FAILING_STAGE: u32 =
        REG_FILE_BASE + offset_of!(RegFile, failing_stage) as u32;
    pub const DEBUG1: u32 = REG_FILE_BASE + offset_of!(RegFile, debug1) as u32;
    pub const DEBUG2: u32 = REG_FILE_BASE + offset_of!(RegFile, debug2) as u32;
    pub const DTAPS_PER_PTAP: u32 =
        REG_FILE_BASE + offset_of!(RegFile, dtaps_per_ptap) as u32;
    pub const TRK_SAMPLE_COUNT: u32 =
        REG_FILE_BASE + offset_of!(RegFile, trk_sample_count) as u32;
    pub const TRK_LONGIDLE: u32 =
        REG_FILE_BASE + offset_of!(RegFile, trk_longidle) as u32;
    pub const DELAYS: u32 = REG_FILE_BASE + offset_of!(RegFile, delays) as u32;
    pub const TRK_RW_MGR_ADDR: u32 =
        REG_FILE_BASE + offset_of!(RegFile, trk_rw_mgr_addr) as u32;
    pub const TRK_READ_DQS_WIDTH: u32 =
        REG_FILE_BASE + offset_of!(RegFile, trk_read_dqs_width) as u32;
    pub const TRK_RFSH: u32 = REG_FILE_BASE + offset_of!(RegFile, trk_rfsh) as u32;
}

/// SDRAM controller registers touched by the sequencer.
pub mod sdr_ctrl {
    use super::SDR_CTRL_BASE;

    pub const CTRL_CFG: u32 = SDR_CTRL_BASE | 0x000;
    pub const PHY_CTRL0: u32 = SDR_CTRL_BASE | 0x150;
    pub const PHY_CTRL1: u32 = SDR_CTRL_BASE | 0x154;
    pub const PHY_CTRL2: u32 = SDR_CTRL_BASE | 0x158;
}

const_assert_eq!(reg_file::TRK_RFSH, REG_FILE_BASE + 0x34);
const_assert_eq!(rw_mgr::STATUS, rw_mgr::RUN_SINGLE_GROUP);
const_assert!(rw_mgr::AC_ROM_WRITE < DATA_MGR_BASE);

bitfield! {
    /// Controller configuration. Only the field the sequencer needs is
    /// described here.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct CtrlCfg(u32);
    impl Debug;
    /// Lets the tracking manager adjust the DQS-enable settings while the
    /// controller owns the PHY.
    pub dqstrken, set_dqstrken: 22;
}

bitfield! {
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct PhyCtrl0(u32);
    impl Debug;
    pub u32, acdelayen, set_acdelayen: 1, 0;
    pub u32, dqdelayen, set_dqdelayen: 3, 2;
    pub u32, dqsdelayen, set_dqsdelayen: 5, 4;
    pub u32, dqslogicdelayen, set_dqslogicdelayen: 7, 6;
    pub resetdelayen, set_resetdelayen: 8;
    pub lpddrdis, set_lpddrdis: 9;
    pub addlatsel, set_addlatsel: 10;
    /// Tracking sample count, bits 19:0.
    pub u32, samplecount_19_0, set_samplecount_19_0: 31, 12;
}

bitfield! {
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct PhyCtrl1(u32);
    impl Debug;
    /// Tracking sample count, bits 31:20.
    pub u32, samplecount_31_20, set_samplecount_31_20: 11, 0;
    /// Long-idle sample count, bits 19:0.
    pub u32, longidle_19_0, set_longidle_19_0: 31, 12;
}

bitfield! {
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct PhyCtrl2(u32);
    impl Debug;
    /// Long-idle sample count, bits 31:20.
    pub u32, longidle_31_20, set_longidle_31_20: 11, 0;
}

/// Width of the low half of a sample count split across two registers.
pub const SAMPLECOUNT_LOW_WIDTH: u32 = 20;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dqstrken_is_bit_22() {
        let mut c = CtrlCfg(u32::MAX);
        c.set_dqstrken(false);
        assert_eq!(c.0, 0xffbf_ffff);
    }

    #[test]
    fn phy_ctrl0_fields() {
        let mut r = PhyCtrl0(0);
        r.set_acdelayen(2);
        r.set_dqdelayen(1);
        r.set_lpddrdis(true);
        r.set_samplecount_19_0(7500);
        assert_eq!(r.0, (7500 << 12) | (1 << 9) | (1 << 2) | 2);
    }

    #[test]
    fn load_manager_registers_are_word_strided() {
        assert_eq!(rw_mgr::load_cntr(3), RW_MGR_BASE | 0x80c);
        assert_eq!(rw_mgr::load_jump(1), RW_MGR_BASE | 0xc04);
    }
}
