// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver interface for Cadence LPDDR4 memory controllers.
//!
//! The controller is reached through three register blocks: the memory
//! controller itself (CTL), the PHY-independent initiator (PI) that runs the
//! training sequences, and the PHY. The [`Lpddr4`] trait is the capability
//! table that SoC integration code drives; [`CadenceLpddr4`] implements it
//! for any SoC whose register map is described by a [`Layout`].

#![cfg_attr(not(test), no_std)]

mod cadence;
pub mod layout;

#[cfg(test)]
mod sim;

use bitflags::bitflags;
use num_derive::FromPrimitive;
use ringbuf::*;

pub use cadence::CadenceLpddr4;
pub use layout::{Block, Layout, AM64, J721E};

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Probed,
    Initialized { id: u16 },
    WrongController { id: u16 },
    RegWrite { block: Block, offset: u16, value: u32 },
    Started,
    PollTimeout(Interrupt),
    MrrError(u32),
    MrwStatus(u32),
    VerifyMismatch {
        block: Block,
        offset: u16,
        expected: u32,
        actual: u32,
    },
    InitInfo(DebugInfo),
}

ringbuf!(Trace, 64, Trace::None);

/// Errors returned by an [`Lpddr4`] implementation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Lpddr4Error {
    /// An argument was out of range for this controller.
    InvalidParam,
    /// A hardware status bit never came up within the configured poll limit.
    Timeout,
    /// The controller reported an error, or a read-back did not match.
    Io,
    /// The controller is not the one this driver was built for.
    Unsupported,
    /// Training finished with errors; see [`DebugInfo`].
    Protocol,
    /// An operation was attempted before [`Lpddr4::init`].
    NotInitialized,
}

/// Events reported to the integration layer while the controller starts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InfoType {
    /// The PI has been started and the SoC may now switch the DDR PLL to
    /// its operating frequency.
    SocPllUpdate,
}

pub type InfoHandler = fn(InfoType);

/// Run-time configuration for a controller instance.
#[derive(Copy, Clone, Debug)]
pub struct Lpddr4Config {
    pub info_handler: Option<InfoHandler>,
    /// Number of times an init-done interrupt is polled before giving up.
    pub poll_limit: u32,
    /// Spacing between polls, in microseconds.
    pub poll_interval_us: u32,
    /// Poll limit for mode-register read and write completion.
    pub mode_reg_poll_limit: u32,
    /// Number of polls spent watching for a mode-register read error after
    /// the read completes.
    pub mrr_error_poll_limit: u32,
}

impl Lpddr4Config {
    pub const DEFAULT: Self = Self {
        info_handler: None,
        poll_limit: 1_000_000,
        poll_interval_us: 1,
        mode_reg_poll_limit: 1000,
        mrr_error_poll_limit: 100,
    };
}

/// Named memory-controller interrupts. `Raw` reaches any other bit of the
/// controller's interrupt status.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CtlInterrupt {
    McInitDone,
    MrReadDone,
    MrWriteDone,
    MrrError,
    Raw(u8),
}

/// Named PHY-independent interrupts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PhyIndepInterrupt {
    InitDone,
    Raw(u8),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Interrupt {
    Ctl(CtlInterrupt),
    PhyIndep(PhyIndepInterrupt),
}

/// Frequency set point.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Fsp {
    F0 = 0,
    F1 = 1,
    F2 = 2,
}

/// Low-power wake-up timers, one set per [`Fsp`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum LpiWakeUp {
    PowerDown = 0,
    SelfRefreshShort = 1,
    SelfRefreshLong = 2,
    SelfRefreshLongMcClkGate = 3,
    SelfRefreshPowerDownShort = 4,
    SelfRefreshPowerDownLong = 5,
    SelfRefreshPowerDownLongMcClkGate = 6,
}

/// Largest value a wake-up timer field holds.
pub const LPI_WAKEUP_MAX: u32 = 0xf;

#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u32)]
pub enum EccEnable {
    Disabled = 0,
    Enabled = 1,
    ErrorDetect = 2,
    ErrorDetectCorrect = 3,
}

/// Data-path width reduction.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u32)]
pub enum ReducMode {
    Full = 0,
    Half = 1,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DbiMode {
    ReadOn,
    ReadOff,
    WriteOn,
    WriteOff,
}

/// Refresh timing for one frequency set point, in controller clocks.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RefreshRate {
    pub tref: u32,
    pub tras_max: u32,
}

bitflags! {
    /// Training and calibration errors found after start.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct DebugInfo: u8 {
        const PLL_ERROR = 1 << 0;
        const IO_CALIB_ERROR = 1 << 1;
        const RX_OFFSET_ERROR = 1 << 2;
        const CA_TRAINING_ERROR = 1 << 3;
        const WR_LVL_ERROR = 1 << 4;
        const GATE_LVL_ERROR = 1 << 5;
        const READ_LVL_ERROR = 1 << 6;
        const DQ_TRAINING_ERROR = 1 << 7;
    }
}

/// A register number and its value, as carried by a board's controller
/// configuration tables.
pub type RegValue = (u16, u32);

/// Capability table of an LPDDR4 controller.
///
/// Operations that wait on the hardware take `&mut self`; everything else
/// is a plain register access. Every operation other than `probe` and
/// `init` returns [`Lpddr4Error::NotInitialized`] until `init` succeeds.
pub trait Lpddr4 {
    /// Checks that `cfg` can drive this controller.
    fn probe(&self, cfg: &Lpddr4Config) -> Result<(), Lpddr4Error>;

    /// Verifies the controller identity and adopts `cfg`.
    fn init(&mut self, cfg: &Lpddr4Config) -> Result<(), Lpddr4Error>;

    /// Starts the PI and the controller, then waits for both to report
    /// init-done.
    fn start(&mut self) -> Result<(), Lpddr4Error>;

    fn read_reg(&self, block: Block, offset: u16) -> Result<u32, Lpddr4Error>;
    fn write_reg(
        &self,
        block: Block,
        offset: u16,
        value: u32,
    ) -> Result<(), Lpddr4Error>;

    /// Issues a mode-register read and returns the data it produced.
    fn get_mmr_register(
        &mut self,
        read_mode_reg: u32,
    ) -> Result<u64, Lpddr4Error>;

    /// Issues a mode-register write and checks its status.
    fn set_mmr_register(
        &mut self,
        write_mode_reg: u32,
    ) -> Result<(), Lpddr4Error>;

    fn write_ctl_config(&self, regs: &[RegValue]) -> Result<(), Lpddr4Error>;
    fn write_phy_indep_config(
        &self,
        regs: &[RegValue],
    ) -> Result<(), Lpddr4Error>;
    fn write_phy_config(&self, regs: &[RegValue]) -> Result<(), Lpddr4Error>;

    /// Fills in the value of every register named in `regs`.
    fn read_ctl_config(&self, regs: &mut [RegValue])
        -> Result<(), Lpddr4Error>;
    fn read_phy_indep_config(
        &self,
        regs: &mut [RegValue],
    ) -> Result<(), Lpddr4Error>;
    fn read_phy_config(&self, regs: &mut [RegValue])
        -> Result<(), Lpddr4Error>;

    /// Reads back every register in `regs` and compares the writable bits
    /// against the expected values.
    fn deferred_reg_verify(
        &self,
        block: Block,
        regs: &[RegValue],
    ) -> Result<(), Lpddr4Error>;

    fn check_ctl_interrupt(
        &self,
        intr: CtlInterrupt,
    ) -> Result<bool, Lpddr4Error>;
    fn ack_ctl_interrupt(&self, intr: CtlInterrupt) -> Result<(), Lpddr4Error>;
    fn get_ctl_interrupt_mask(&self) -> Result<u64, Lpddr4Error>;
    fn set_ctl_interrupt_mask(&self, mask: u64) -> Result<(), Lpddr4Error>;

    fn check_phy_indep_interrupt(
        &self,
        intr: PhyIndepInterrupt,
    ) -> Result<bool, Lpddr4Error>;
    fn ack_phy_indep_interrupt(
        &self,
        intr: PhyIndepInterrupt,
    ) -> Result<(), Lpddr4Error>;
    fn get_phy_indep_interrupt_mask(&self) -> Result<u32, Lpddr4Error>;
    fn set_phy_indep_interrupt_mask(
        &self,
        mask: u32,
    ) -> Result<(), Lpddr4Error>;

    /// Collects training results into `info`. Returns
    /// [`Lpddr4Error::Protocol`] if any error flag was set.
    fn get_debug_init_info(
        &self,
        info: &mut DebugInfo,
    ) -> Result<(), Lpddr4Error>;

    fn get_lpi_wakeup_time(
        &self,
        param: LpiWakeUp,
        fsp: Fsp,
    ) -> Result<u32, Lpddr4Error>;
    fn set_lpi_wakeup_time(
        &self,
        param: LpiWakeUp,
        fsp: Fsp,
        cycles: u32,
    ) -> Result<(), Lpddr4Error>;

    fn get_ecc_enable(&self) -> Result<EccEnable, Lpddr4Error>;
    fn set_ecc_enable(&self, mode: EccEnable) -> Result<(), Lpddr4Error>;

    fn get_reduc_mode(&self) -> Result<ReducMode, Lpddr4Error>;
    fn set_reduc_mode(&self, mode: ReducMode) -> Result<(), Lpddr4Error>;

    fn get_dbi_read_mode(&self) -> Result<bool, Lpddr4Error>;
    fn get_dbi_write_mode(&self) -> Result<bool, Lpddr4Error>;
    fn set_dbi_mode(&self, mode: DbiMode) -> Result<(), Lpddr4Error>;

    fn get_refresh_rate(&self, fsp: Fsp) -> Result<RefreshRate, Lpddr4Error>;
    fn set_refresh_rate(
        &self,
        fsp: Fsp,
        rate: RefreshRate,
    ) -> Result<(), Lpddr4Error>;

    /// Programs the interval between per-chip-select refresh commands.
    fn refresh_per_chip_select(
        &self,
        tref_interval: u32,
    ) -> Result<(), Lpddr4Error>;
}
