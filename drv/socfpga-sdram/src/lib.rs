// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Calibration sequencer for the SoCFPGA hard SDRAM PHY.
//!
//! The sequencer owns the PHY from reset until handoff. It initializes the
//! memories, then walks every DQS group through a fixed pipeline of searches
//! (VFIFO and DQS-enable phase, per-bit read deskew, write deskew, read
//! re-centering, and finally read latency) before handing the PHY to the
//! controller.
//!
//! All per-run state lives in a [`Sequencer`], which holds the register
//! bus and the board's [`SeqConfig`] for the duration of one calibration
//! run.

#![cfg_attr(not(test), no_std)]

mod calibrate;
mod center;
pub mod config;
mod delay;
mod init;
pub mod regs;
mod rwtest;
mod scc;
mod search;

#[cfg(test)]
mod sim;

use drv_sdram_cal_api::{
    CalStage, CalSubstage, FailingStage, Fom, PhyDebugFlags,
};
use regbus::RegBus;
use ringbuf::*;

pub use config::{ConfigError, SeqConfig};

use config::{low_bits, MAX_RANKS, MAX_SHADOW_REGS};
use scc::ScanChain;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Start,
    ConfigRejected(ConfigError),
    Stage {
        stage: CalStage,
        group: u32,
    },
    Failure(FailingStage),
    VfifoNeverFailed {
        group: u32,
        v: u32,
    },
    DqsEnWindow {
        group: u32,
        work_bgn: u32,
        work_end: u32,
        dtaps_per_ptap: u32,
    },
    ReadCentered {
        group: u32,
        dqs: u32,
        dq_margin: i32,
        dqs_margin: i32,
    },
    WriteCentered {
        group: u32,
        dqs: u32,
        dq_margin: i32,
        dqs_margin: i32,
        dm_margin: i32,
    },
    ReadLatency(u32),
    CalibrationPassed {
        fom_in: u8,
        fom_out: u8,
    },
    CalibrationFailed(FailingStage),
}

ringbuf!(Trace, 32, Trace::None);

/// Ways a calibration run can end without a usable interface.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CalError {
    InvalidConfig(ConfigError),
    /// Carries the first failure recorded during the run.
    Failed(FailingStage),
}

impl From<ConfigError> for CalError {
    fn from(e: ConfigError) -> Self {
        CalError::InvalidConfig(e)
    }
}

/// Marker returned by a stage that has already recorded its failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct StageFailed;

pub(crate) type Step<T = ()> = Result<T, StageFailed>;

/// Calibration parameters fixed for the whole run.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Params {
    pub read_correct_mask: u32,
    pub read_correct_mask_vg: u32,
    pub write_correct_mask: u32,
    pub write_correct_mask_vg: u32,
    pub dm_correct_mask: u32,
    pub skip_ranks: [bool; MAX_RANKS],
    pub skip_shadow_regs: [bool; MAX_SHADOW_REGS],
    /// Bit `n` set skips DQS group `n`.
    pub skip_groups: u32,
}

impl Params {
    fn new(cfg: &SeqConfig) -> Self {
        Self {
            read_correct_mask: low_bits(cfg.dq_per_read_dqs),
            read_correct_mask_vg: low_bits(
                cfg.dq_per_read_dqs / cfg.virtual_groups_per_read_dqs,
            ),
            write_correct_mask: low_bits(cfg.dq_per_write_dqs),
            write_correct_mask_vg: low_bits(
                cfg.dq_per_write_dqs / cfg.virtual_groups_per_write_dqs,
            ),
            dm_correct_mask: low_bits(cfg.data_width / cfg.data_mask_width),
            skip_ranks: [false; MAX_RANKS],
            skip_shadow_regs: [false; MAX_SHADOW_REGS],
            skip_groups: 0,
        }
    }
}

/// State that evolves over the run and is read back at the end.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Globals {
    pub curr_read_lat: u32,
    pub curr_write_lat: u32,
    /// NOPs between the write command and write data; `-1` means data is
    /// issued one cycle before the command completes.
    pub rw_wl_nop_cycles: i32,
    pub phy_debug_mode_flags: PhyDebugFlags,
    pub error: FailingStage,
    pub fom_in: i32,
    pub fom_out: i32,
}

impl Globals {
    fn new() -> Self {
        Self {
            curr_read_lat: 0,
            curr_write_lat: 0,
            rw_wl_nop_cycles: 0,
            phy_debug_mode_flags: PhyDebugFlags::empty(),
            error: FailingStage::NONE,
            fom_in: 0,
            fom_out: 0,
        }
    }
}

/// What a finished run leaves behind, for debug tooling and later boot
/// stages.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub read_latency: u32,
    pub write_latency: u32,
    pub fom: Fom,
    pub failure: Option<FailingStage>,
}

pub struct Sequencer<'a, B: RegBus> {
    bus: B,
    cfg: &'a SeqConfig,
    param: Params,
    gbl: Globals,
    /// ANDed into every delay-loop counter; zero when delay loops are
    /// skipped.
    skip_delay_mask: u32,
}

impl<'a, B: RegBus> Sequencer<'a, B> {
    pub fn new(bus: B, cfg: &'a SeqConfig) -> Result<Self, ConfigError> {
        if let Err(e) = cfg.validate() {
            ringbuf_entry!(Trace::ConfigRejected(e));
            return Err(e);
        }
        Ok(Self {
            bus,
            cfg,
            param: Params::new(cfg),
            gbl: Globals::new(),
            skip_delay_mask: 0xff,
        })
    }

    pub fn set_debug_flags(&mut self, flags: PhyDebugFlags) {
        self.gbl.phy_debug_mode_flags = flags;
    }

    pub fn debug_flags(&self) -> PhyDebugFlags {
        self.gbl.phy_debug_mode_flags
    }

    /// Excludes a rank from every test. Out-of-range ranks are ignored.
    pub fn skip_rank(&mut self, rank: usize) {
        if let Some(r) = self.param.skip_ranks.get_mut(rank) {
            *r = true;
        }
    }

    pub fn skip_shadow_reg(&mut self, sr: usize) {
        if let Some(s) = self.param.skip_shadow_regs.get_mut(sr) {
            *s = true;
        }
    }

    /// Excludes DQS groups from calibration; bit `n` is group `n`. Skipping
    /// any group also skips the latency search.
    pub fn skip_groups(&mut self, mask: u32) {
        self.param.skip_groups = mask;
    }

    pub fn report(&self) -> Report {
        let err = self.gbl.error;
        Report {
            read_latency: self.gbl.curr_read_lat,
            write_latency: self.gbl.curr_write_lat,
            fom: Fom {
                fom_in: clamp_fom(self.gbl.fom_in),
                fom_out: clamp_fom(self.gbl.fom_out),
            },
            failure: if err.is_none() { None } else { Some(err) },
        }
    }

    fn scc(&self) -> ScanChain<'_, B> {
        ScanChain::new(&self.bus, self.cfg)
    }

    /// Records a failure and returns the marker to propagate. Only the
    /// first failure of a run is kept.
    fn fail(
        &mut self,
        group: u32,
        stage: CalStage,
        substage: CalSubstage,
    ) -> StageFailed {
        if self.gbl.error.is_none() {
            let f = FailingStage {
                group: group as u16,
                stage,
                substage,
            };
            ringbuf_entry!(Trace::Failure(f));
            self.gbl.error = f;
        }
        StageFailed
    }

    fn rank_skipped(&self, rank: u32) -> bool {
        self.param.skip_ranks[rank as usize]
    }

    fn sweep_all_groups(&self) -> bool {
        self.gbl
            .phy_debug_mode_flags
            .contains(PhyDebugFlags::SWEEP_ALL_GROUPS)
    }
}

/// Halves a margin sum and fits it into the published byte.
fn clamp_fom(sum: i32) -> u8 {
    (sum / 2).clamp(0, 0xff) as u8
}

/// Runs the whole calibration flow: register file and tracking setup, ROM
/// load, memory initialization, calibration and handoff.
///
/// On success, returns the published figures of merit.
pub fn sdram_calibration_full<B: RegBus>(
    bus: B,
    cfg: &SeqConfig,
) -> Result<Fom, CalError> {
    let mut seq = Sequencer::new(bus, cfg)?;
    seq.calibrate_full()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SMALL;
    use crate::sim::SimPhy;

    #[test]
    fn masks_match_group_widths() {
        let p = Params::new(&SMALL);
        assert_eq!(p.read_correct_mask.count_ones(), SMALL.dq_per_read_dqs);
        assert_eq!(p.write_correct_mask.count_ones(), SMALL.dq_per_write_dqs);
        assert_eq!(p.dm_correct_mask, 0xf);
    }

    #[test]
    fn virtual_group_masks_split_the_group() {
        let cfg = SeqConfig {
            dq_per_read_dqs: 8,
            dq_per_write_dqs: 8,
            virtual_groups_per_read_dqs: 2,
            virtual_groups_per_write_dqs: 4,
            ..SMALL
        };
        let p = Params::new(&cfg);
        assert_eq!(p.read_correct_mask, 0xff);
        assert_eq!(p.read_correct_mask_vg, 0xf);
        assert_eq!(p.write_correct_mask_vg, 0x3);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let sim = SimPhy::new(&SMALL, |_, _| 0);
        let cfg = SeqConfig {
            vfifo_size: 0,
            ..SMALL
        };
        assert_eq!(
            sdram_calibration_full(&sim, &cfg),
            Err(CalError::InvalidConfig(ConfigError::ZeroVfifo))
        );
        assert!(sim.state().writes().is_empty());
    }

    #[test]
    fn first_failure_is_kept() {
        let sim = SimPhy::new(&SMALL, |_, _| 0);
        let mut seq = Sequencer::new(&sim, &SMALL).unwrap();
        let _ = seq.fail(3, CalStage::Vfifo, CalSubstage::VfifoCenter);
        let _ = seq.fail(5, CalStage::Writes, CalSubstage::WritesCenter);
        assert_eq!(
            seq.report().failure,
            Some(FailingStage {
                group: 3,
                stage: CalStage::Vfifo,
                substage: CalSubstage::VfifoCenter,
            })
        );
    }

    #[test]
    fn fom_is_halved_and_clamped() {
        assert_eq!(clamp_fom(-4), 0);
        assert_eq!(clamp_fom(21), 10);
        assert_eq!(clamp_fom(1000), 0xff);
    }
}
