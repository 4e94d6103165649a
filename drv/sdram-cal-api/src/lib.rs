// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared vocabulary for the SoCFPGA SDRAM calibration sequencer.
//!
//! These types describe what the sequencer publishes to the outside world:
//! the stage it is in, where it failed, and the figure of merit it achieved.
//! Debug tooling and later boot stages can decode the same layouts from the
//! PHY manager's `cal_debug_info` register and from the sequencer register
//! file.

#![cfg_attr(not(test), no_std)]

use bitfield::bitfield;
use bitflags::bitflags;
use num_derive::FromPrimitive;
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Top-level calibration stage, as reported in the register file.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum CalStage {
    Nil = 0,
    Vfifo = 1,
    Wlevel = 2,
    Lfifo = 3,
    Writes = 4,
    FullTest = 5,
    Refresh = 6,
    Skipped = 7,
    Aborted = 8,
    VfifoAfterWrites = 9,
}

/// Finer-grained step within a [`CalStage`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum CalSubstage {
    Nil = 0,
    GuaranteedRead = 1,
    DqsEnPhase = 2,
    VfifoCenter = 3,
    WorkingDelay = 4,
    LastWorkingDelay = 5,
    WlevelCopy = 6,
    WritesCenter = 7,
    ReadLatency = 8,
    Refresh = 9,
}

/// Value of the PHY manager `cal_status` register.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u32)]
pub enum CalStatus {
    Reset = 0,
    Success = 1,
    Fail = 2,
}

/// Group value reported when no group has failed yet.
pub const NO_GROUP: u16 = 0xff;

/// Location of a calibration failure.
///
/// Depending on the stage, `group` is either a DQS group number or a
/// flattened `group * dq_per_dqs + bit` index pointing at an individual
/// data pin.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FailingStage {
    pub group: u16,
    pub stage: CalStage,
    pub substage: CalSubstage,
}

impl FailingStage {
    pub const NONE: Self = Self {
        group: NO_GROUP,
        stage: CalStage::Nil,
        substage: CalSubstage::Nil,
    };

    pub fn is_none(&self) -> bool {
        self.stage == CalStage::Nil
    }
}

impl Default for FailingStage {
    fn default() -> Self {
        Self::NONE
    }
}

bitfield! {
    /// Layout of the register file's `cur_stage` word, which is updated as
    /// calibration progresses so that a debugger can see where it stopped.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct CurStage(u32);
    impl Debug;
    pub u16, group, set_group: 31, 16;
    pub u8, substage, set_substage: 15, 8;
    pub u8, stage, set_stage: 7, 0;
}

bitfield! {
    /// Layout of `cal_debug_info` (mirrored into the register file).
    ///
    /// After a successful calibration the low two bytes hold the input and
    /// output figures of merit. After a failure the word holds the failing
    /// stage, substage and group in the same positions as [`CurStage`].
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct CalDebugInfo(u32);
    impl Debug;
    pub u8, fom_in, set_fom_in: 7, 0;
    pub u8, fom_out, set_fom_out: 15, 8;
    pub u8, stage, set_stage: 7, 0;
    pub u8, substage, set_substage: 15, 8;
    pub u16, group, set_group: 31, 16;
}

impl CalDebugInfo {
    pub fn from_fom(fom: Fom) -> Self {
        let mut d = CalDebugInfo(0);
        d.set_fom_in(fom.fom_in);
        d.set_fom_out(fom.fom_out);
        d
    }

    pub fn from_failure(f: FailingStage) -> Self {
        let mut d = CalDebugInfo(0);
        d.set_stage(f.stage as u8);
        d.set_substage(f.substage as u8);
        d.set_group(f.group);
        d
    }

    /// Decodes the failure view, returning `None` for values that do not
    /// correspond to a known stage.
    pub fn failure(&self) -> Option<FailingStage> {
        use num_traits::FromPrimitive;
        Some(FailingStage {
            group: self.group(),
            stage: CalStage::from_u8(self.stage())?,
            substage: CalSubstage::from_u8(self.substage())?,
        })
    }
}

/// Figure of merit: sums of per-bit margins from read and write centering,
/// halved and clamped to a byte when published.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Fom {
    pub fom_in: u8,
    pub fom_out: u8,
}

bitflags! {
    /// Debug-mode switches for a calibration run.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct PhyDebugFlags: u32 {
        const ENABLE_CAL_RPT = 1 << 0;
        const ENABLE_MARGIN_RPT = 1 << 1;
        /// Keep calibrating later groups after a failure, for diagnostic
        /// coverage. The first failure is still the one reported.
        const SWEEP_ALL_GROUPS = 1 << 2;
        const DISABLE_GUARANTEED_READ = 1 << 3;
        const ENABLE_NON_DESTRUCTIVE_CALIBRATION = 1 << 4;
        /// Leave the PHY under sequencer control after calibration.
        const IN_DEBUG_MODE = 1 << 31;
    }
}

bitflags! {
    /// Calibration steps to skip, selected per board at build time.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct CalibSteps: u16 {
        const SKIP_DELAY_LOOPS = 1 << 0;
        const SKIP_ALL_BITS_CHK = 1 << 1;
        const SKIP_DELAY_SWEEPS = 1 << 2;
        const SKIP_VFIFO = 1 << 3;
        const SKIP_LFIFO = 1 << 4;
        const SKIP_WLEVEL = 1 << 5;
        const SKIP_WRITES = 1 << 6;
        const SKIP_FULL_TEST = 1 << 7;
        const SKIP_ALL = Self::SKIP_VFIFO.bits()
            | Self::SKIP_LFIFO.bits()
            | Self::SKIP_WLEVEL.bits()
            | Self::SKIP_WRITES.bits()
            | Self::SKIP_FULL_TEST.bits();
        const IN_RTL_SIM = 1 << 8;
    }
}

/// Signature written to the register file before calibration starts.
pub const REG_FILE_INIT_SEQ_SIGNATURE: u32 = 0x5555_0496;

/// The sequencer register file, as laid out in the PHY's address space.
///
/// Debug tooling can read the block as raw words and decode it with
/// zerocopy; the sequencer uses the field offsets to address it.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(C)]
pub struct RegFile {
    pub signature: u32,
    pub debug_data_addr: u32,
    pub cur_stage: u32,
    pub fom: u32,
    pub failing_stage: u32,
    pub debug1: u32,
    pub debug2: u32,
    pub dtaps_per_ptap: u32,
    pub trk_sample_count: u32,
    pub trk_longidle: u32,
    pub delays: u32,
    pub trk_rw_mgr_addr: u32,
    pub trk_read_dqs_width: u32,
    pub trk_rfsh: u32,
}

impl RegFile {
    pub fn cur_stage(&self) -> CurStage {
        CurStage(self.cur_stage)
    }

    /// Returns the recorded failure, if the register file holds one.
    pub fn failure(&self) -> Option<FailingStage> {
        CalDebugInfo(self.failing_stage)
            .failure()
            .filter(|f| !f.is_none())
    }

    pub fn fom(&self) -> Fom {
        let d = CalDebugInfo(self.fom);
        Fom {
            fom_in: d.fom_in(),
            fom_out: d.fom_out(),
        }
    }
}
