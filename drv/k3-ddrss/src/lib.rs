// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bring-up of the K3 DDR subsystem.
//!
//! The DDR subsystem wraps an LPDDR4 controller whose register map differs
//! between SoCs. This driver only knows the order in which things happen:
//! probe the controller, initialize it, load the board's CTL, PI, and PHY
//! register tables, start it, and check what training reported. It reaches
//! the controller through [`Lpddr4`], so the same sequence serves every
//! [`Layout`](drv_lpddr4::Layout).

#![cfg_attr(not(test), no_std)]

use drv_lpddr4::{
    Block, CtlInterrupt, DebugInfo, Lpddr4, Lpddr4Config, Lpddr4Error,
    RegValue,
};
use ringbuf::*;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Step(Step),
    AlreadyInitialized,
    Training(DebugInfo),
    Failed(DdrssError),
    Up,
}

ringbuf!(Trace, 16, Trace::None);

/// Stage of bring-up that an error came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Step {
    Probe,
    Init,
    CtlConfig,
    PiConfig,
    PhyConfig,
    Verify,
    PreStart,
    Start,
    PostStart,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DdrssError {
    pub step: Step,
    pub cause: Lpddr4Error,
}

/// Board description of one DDR subsystem instance.
#[derive(Copy, Clone, Debug)]
pub struct DdrssConfig {
    pub lpddr4: Lpddr4Config,
    pub ctl: &'static [RegValue],
    pub pi: &'static [RegValue],
    pub phy: &'static [RegValue],
    /// Read back every loaded register before starting the controller.
    pub verify: bool,
}

pub struct Ddrss<'a> {
    ctl: &'a mut dyn Lpddr4,
    cfg: &'a DdrssConfig,
    training: DebugInfo,
}

impl<'a> Ddrss<'a> {
    pub fn new(ctl: &'a mut dyn Lpddr4, cfg: &'a DdrssConfig) -> Self {
        Self {
            ctl,
            cfg,
            training: DebugInfo::empty(),
        }
    }

    /// Training errors found by the last [`Ddrss::start`].
    pub fn training(&self) -> DebugInfo {
        self.training
    }

    /// Runs the whole bring-up sequence.
    pub fn bring_up(&mut self) -> Result<(), DdrssError> {
        let r = self.run();
        match r {
            Ok(()) => ringbuf_entry!(Trace::Up),
            Err(e) => ringbuf_entry!(Trace::Failed(e)),
        }
        r
    }

    fn run(&mut self) -> Result<(), DdrssError> {
        self.init()?;
        self.load_config()?;
        self.start()
    }

    pub fn init(&mut self) -> Result<(), DdrssError> {
        let lpddr4 = self.cfg.lpddr4;
        step(Step::Probe, self.ctl.probe(&lpddr4))?;
        step(Step::Init, self.ctl.init(&lpddr4))
    }

    /// Writes the board's register tables, CTL first.
    pub fn load_config(&mut self) -> Result<(), DdrssError> {
        let cfg = self.cfg;
        step(Step::CtlConfig, self.ctl.write_ctl_config(cfg.ctl))?;
        step(Step::PiConfig, self.ctl.write_phy_indep_config(cfg.pi))?;
        step(Step::PhyConfig, self.ctl.write_phy_config(cfg.phy))?;

        if cfg.verify {
            let tables = [
                (Block::Ctl, cfg.ctl),
                (Block::Pi, cfg.pi),
                (Block::Phy, cfg.phy),
            ];
            for (block, regs) in tables {
                let r = self.ctl.deferred_reg_verify(block, regs);
                step(Step::Verify, r)?;
            }
        }
        Ok(())
    }

    /// Starts the controller and checks the training results.
    ///
    /// A controller that already reports init-done is restarted on
    /// purpose, so that training always runs against the tables just
    /// loaded.
    pub fn start(&mut self) -> Result<(), DdrssError> {
        let done = step(
            Step::PreStart,
            self.ctl.check_ctl_interrupt(CtlInterrupt::McInitDone),
        )?;
        if done {
            ringbuf_entry!(Trace::AlreadyInitialized);
        }

        step(Step::Start, self.ctl.start())?;

        let mut info = DebugInfo::empty();
        let r = self.ctl.get_debug_init_info(&mut info);
        self.training = info;
        ringbuf_entry!(Trace::Training(info));
        step(Step::PostStart, r)
    }
}

/// Records that `s` ran and tags its error, if any.
fn step<T>(s: Step, r: Result<T, Lpddr4Error>) -> Result<T, DdrssError> {
    ringbuf_entry!(Trace::Step(s));
    r.map_err(|cause| DdrssError { step: s, cause })
}
