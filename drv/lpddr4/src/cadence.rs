// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`Lpddr4`] for the Cadence controller.

use embedded_hal::blocking::delay::DelayUs;
use num_traits::FromPrimitive;
use regbus::{word, RegBus};
use ringbuf::*;

use crate::layout::{Block, Field, Layout};
use crate::{
    CtlInterrupt, DbiMode, DebugInfo, EccEnable, Fsp, Interrupt, LpiWakeUp,
    Lpddr4, Lpddr4Config, Lpddr4Error, PhyIndepInterrupt, ReducMode,
    RefreshRate, RegValue, Trace,
};

const NIBBLE_MASK: u32 = 0xf;
const BYTE_MASK: u32 = 0xff;

const PLL_READY: u32 = 0x3;
const IO_CALIB_DONE: u32 = 1 << 23;
const IO_CALIB_FIELD: u32 = NIBBLE_MASK << 28;
const IO_CALIB_STATE: u32 = 0xb << 28;
const RX_CAL_DONE: u32 = 1 << 4;
const CA_TRAIN_RL: u32 = (1 << 5) | (1 << 4);
const WR_LVL_ERROR_FIELDS: u32 = 0x3;
const GATE_LVL_ERROR_FIELDS: u32 = (1 << 7) | (1 << 6);
const READ_LVL_ERROR_FIELDS: u32 = (NIBBLE_MASK << 28) | (BYTE_MASK << 16);
const DQ_LVL_STATUS: u32 = (1 << 26) | (BYTE_MASK << 18);

/// A Cadence LPDDR4 controller reached over `B`, using `D` to space out
/// status polls.
pub struct CadenceLpddr4<B, D> {
    bus: B,
    delay: D,
    layout: &'static Layout,
    cfg: Option<Lpddr4Config>,
}

impl<B: RegBus, D: DelayUs<u32>> CadenceLpddr4<B, D> {
    pub fn new(bus: B, delay: D, layout: &'static Layout) -> Self {
        Self {
            bus,
            delay,
            layout,
            cfg: None,
        }
    }

    fn cfg(&self) -> Result<Lpddr4Config, Lpddr4Error> {
        self.cfg.ok_or(Lpddr4Error::NotInitialized)
    }

    fn ready(&self) -> Result<(), Lpddr4Error> {
        self.cfg().map(|_| ())
    }

    fn addr(&self, block: Block, offset: u16) -> u32 {
        self.layout.base(block) + word(u32::from(offset))
    }

    fn read(&self, block: Block, offset: u16) -> u32 {
        self.bus.read32(self.addr(block, offset))
    }

    fn write(&self, block: Block, offset: u16, value: u32) {
        ringbuf_entry_root!(Trace::RegWrite {
            block,
            offset,
            value
        });
        self.bus.write32(self.addr(block, offset), value);
    }

    fn read_field(&self, block: Block, f: Field) -> u32 {
        f.get(self.read(block, f.reg))
    }

    fn write_field(&self, block: Block, f: Field, value: u32) {
        let v = self.read(block, f.reg);
        self.write(block, f.reg, f.set(v, value));
    }

    /// Writes a field after checking that `value` fits in it.
    fn update_field(
        &self,
        block: Block,
        f: Field,
        value: u32,
    ) -> Result<(), Lpddr4Error> {
        if value > f.max() {
            return Err(Lpddr4Error::InvalidParam);
        }
        self.write_field(block, f, value);
        Ok(())
    }

    fn checked(&self, block: Block, offset: u16) -> Result<(), Lpddr4Error> {
        if offset >= self.layout.regs(block) {
            Err(Lpddr4Error::InvalidParam)
        } else {
            Ok(())
        }
    }

    fn write_config(
        &self,
        block: Block,
        regs: &[RegValue],
    ) -> Result<(), Lpddr4Error> {
        self.ready()?;
        for &(offset, value) in regs {
            self.checked(block, offset)?;
            self.write(block, offset, value);
        }
        Ok(())
    }

    fn read_config(
        &self,
        block: Block,
        regs: &mut [RegValue],
    ) -> Result<(), Lpddr4Error> {
        self.ready()?;
        for (offset, value) in regs.iter_mut() {
            self.checked(block, *offset)?;
            *value = self.read(block, *offset);
        }
        Ok(())
    }

    /// Returns the status register and bit of a controller interrupt.
    fn ctl_bit(
        &self,
        intr: CtlInterrupt,
    ) -> Result<(u16, u16, u32), Lpddr4Error> {
        let bit = self.layout.ctl_irq.bit(intr);
        if bit >= self.layout.ctl_irq.count {
            return Err(Lpddr4Error::InvalidParam);
        }
        let i = usize::from(bit / 32);
        Ok((
            self.layout.ctl.int_status[i],
            self.layout.ctl.int_ack[i],
            1 << (bit % 32),
        ))
    }

    fn pi_bit(&self, intr: PhyIndepInterrupt) -> Result<u32, Lpddr4Error> {
        let bit = self.layout.pi_irq.bit(intr);
        if bit >= self.layout.pi_irq.count {
            return Err(Lpddr4Error::InvalidParam);
        }
        Ok(1 << bit)
    }

    /// Polls `done` up to `limit` times.
    fn poll(
        &mut self,
        intr: Interrupt,
        limit: u32,
        done: impl Fn(&Self) -> Result<bool, Lpddr4Error>,
    ) -> Result<(), Lpddr4Error> {
        let interval = self.cfg()?.poll_interval_us;
        for _ in 0..limit {
            if done(self)? {
                return Ok(());
            }
            self.delay.delay_us(interval);
        }
        ringbuf_entry_root!(Trace::PollTimeout(intr));
        Err(Lpddr4Error::Timeout)
    }

    fn poll_ctl(
        &mut self,
        intr: CtlInterrupt,
        limit: u32,
    ) -> Result<(), Lpddr4Error> {
        self.poll(Interrupt::Ctl(intr), limit, |c| {
            c.check_ctl_interrupt(intr)
        })
    }

    fn poll_pi(
        &mut self,
        intr: PhyIndepInterrupt,
        limit: u32,
    ) -> Result<(), Lpddr4Error> {
        self.poll(Interrupt::PhyIndep(intr), limit, |c| {
            c.check_phy_indep_interrupt(intr)
        })
    }

    fn phy_core(&self, reg: u16) -> u32 {
        self.read(Block::Phy, self.layout.phy_core_reg(reg))
    }

    fn data_slices(&self, reg: u16) -> impl Iterator<Item = u32> + '_ {
        (0..self.layout.data_slices).map(move |s| {
            self.read(Block::Phy, self.layout.data_slice_reg(s, reg))
        })
    }

    fn address_slices(&self, reg: u16) -> impl Iterator<Item = u32> + '_ {
        (0..self.layout.address_slices).map(move |s| {
            self.read(Block::Phy, self.layout.address_slice_reg(s, reg))
        })
    }

    fn pll_error(&self) -> bool {
        let obs = self.layout.phy.pll_obs;
        obs.iter()
            .any(|&r| self.phy_core(r) & PLL_READY != PLL_READY)
    }

    fn io_calib_error(&self) -> bool {
        let [r0, r2, r3] = self.layout.phy.cal_result_obs;
        self.phy_core(r0) & IO_CALIB_DONE == 0
            || self.phy_core(r2) & IO_CALIB_DONE == 0
            || self.phy_core(r3) & IO_CALIB_FIELD != IO_CALIB_STATE
    }

    /// Latches the observation registers of every slice.
    fn snapshot(&self) {
        let phy = &self.layout.phy;
        for s in 0..self.layout.data_slices {
            let f = Field {
                reg: self.layout.data_slice_reg(s, phy.snap_obs.reg),
                ..phy.snap_obs
            };
            self.write_field(Block::Phy, f, 1);
        }
        for s in 0..self.layout.address_slices {
            let f = Field {
                reg: self.layout.address_slice_reg(s, phy.adr_snap_obs.reg),
                ..phy.adr_snap_obs
            };
            self.write_field(Block::Phy, f, 1);
        }
    }

    fn rx_offset_error(&self) -> bool {
        self.data_slices(self.layout.phy.rx_cal_obs)
            .any(|v| v & (RX_CAL_DONE | NIBBLE_MASK) != RX_CAL_DONE)
    }

    fn ca_training_error(&self) -> bool {
        self.address_slices(self.layout.phy.adr_calvl_obs1)
            .any(|v| v & (CA_TRAIN_RL | NIBBLE_MASK) != CA_TRAIN_RL)
    }

    fn data_slice_error(&self, reg: u16, fields: u32) -> bool {
        self.data_slices(reg).any(|v| v & fields != 0)
    }
}

impl<B: RegBus, D: DelayUs<u32>> Lpddr4 for CadenceLpddr4<B, D> {
    fn probe(&self, cfg: &Lpddr4Config) -> Result<(), Lpddr4Error> {
        if cfg.poll_limit == 0
            || cfg.mode_reg_poll_limit == 0
            || !self.layout.validate()
        {
            return Err(Lpddr4Error::InvalidParam);
        }
        ringbuf_entry_root!(Trace::Probed);
        Ok(())
    }

    fn init(&mut self, cfg: &Lpddr4Config) -> Result<(), Lpddr4Error> {
        self.probe(cfg)?;
        let id = self.read_field(Block::Ctl, self.layout.ctl.controller_id)
            as u16;
        if id != self.layout.product_id {
            ringbuf_entry_root!(Trace::WrongController { id });
            return Err(Lpddr4Error::Unsupported);
        }
        self.cfg = Some(*cfg);
        ringbuf_entry_root!(Trace::Initialized { id });
        Ok(())
    }

    fn start(&mut self) -> Result<(), Lpddr4Error> {
        let cfg = self.cfg()?;
        let l = self.layout;

        self.write_field(Block::Pi, l.pi.init_lvl_en, 1);
        self.write_field(Block::Pi, l.pi.normal_lvl_seq, 1);

        self.write_field(Block::Pi, l.pi.start, 1);
        self.write_field(Block::Ctl, l.ctl.start, 1);
        if let Some(handler) = cfg.info_handler {
            handler(crate::InfoType::SocPllUpdate);
        }

        self.poll_pi(PhyIndepInterrupt::InitDone, cfg.poll_limit)?;
        self.ack_phy_indep_interrupt(PhyIndepInterrupt::InitDone)?;
        self.poll_ctl(CtlInterrupt::McInitDone, cfg.poll_limit)?;
        self.ack_ctl_interrupt(CtlInterrupt::McInitDone)?;

        ringbuf_entry_root!(Trace::Started);
        Ok(())
    }

    fn read_reg(&self, block: Block, offset: u16) -> Result<u32, Lpddr4Error> {
        self.ready()?;
        self.checked(block, offset)?;
        Ok(self.read(block, offset))
    }

    fn write_reg(
        &self,
        block: Block,
        offset: u16,
        value: u32,
    ) -> Result<(), Lpddr4Error> {
        self.ready()?;
        self.checked(block, offset)?;
        self.write(block, offset, value);
        Ok(())
    }

    fn get_mmr_register(
        &mut self,
        read_mode_reg: u32,
    ) -> Result<u64, Lpddr4Error> {
        let cfg = self.cfg()?;
        let ctl = self.layout.ctl;

        self.update_field(Block::Ctl, ctl.read_modereg, read_mode_reg)?;
        self.poll_ctl(CtlInterrupt::MrReadDone, cfg.mode_reg_poll_limit)?;

        // An error, if any, shows up shortly after the read completes.
        if self
            .poll_ctl(CtlInterrupt::MrrError, cfg.mrr_error_poll_limit)
            .is_ok()
        {
            let status = self.read_field(Block::Ctl, ctl.mrr_error_status);
            ringbuf_entry_root!(Trace::MrrError(status));
            return Err(Lpddr4Error::Io);
        }

        let lo = self.read(Block::Ctl, ctl.mrr_data[0]);
        let hi = self.read(Block::Ctl, ctl.mrr_data[1]);
        self.ack_ctl_interrupt(CtlInterrupt::MrReadDone)?;
        Ok((u64::from(hi) << 32) | u64::from(lo))
    }

    fn set_mmr_register(
        &mut self,
        write_mode_reg: u32,
    ) -> Result<(), Lpddr4Error> {
        let cfg = self.cfg()?;
        let ctl = self.layout.ctl;

        self.update_field(Block::Ctl, ctl.write_modereg, write_mode_reg)?;
        self.poll_ctl(CtlInterrupt::MrWriteDone, cfg.mode_reg_poll_limit)?;
        self.ack_ctl_interrupt(CtlInterrupt::MrWriteDone)?;

        let status = self.read_field(Block::Ctl, ctl.mrw_status);
        if status != 0 {
            ringbuf_entry_root!(Trace::MrwStatus(status));
            return Err(Lpddr4Error::Io);
        }
        Ok(())
    }

    fn write_ctl_config(&self, regs: &[RegValue]) -> Result<(), Lpddr4Error> {
        self.write_config(Block::Ctl, regs)
    }

    fn write_phy_indep_config(
        &self,
        regs: &[RegValue],
    ) -> Result<(), Lpddr4Error> {
        self.write_config(Block::Pi, regs)
    }

    fn write_phy_config(&self, regs: &[RegValue]) -> Result<(), Lpddr4Error> {
        self.write_config(Block::Phy, regs)
    }

    fn read_ctl_config(
        &self,
        regs: &mut [RegValue],
    ) -> Result<(), Lpddr4Error> {
        self.read_config(Block::Ctl, regs)
    }

    fn read_phy_indep_config(
        &self,
        regs: &mut [RegValue],
    ) -> Result<(), Lpddr4Error> {
        self.read_config(Block::Pi, regs)
    }

    fn read_phy_config(
        &self,
        regs: &mut [RegValue],
    ) -> Result<(), Lpddr4Error> {
        self.read_config(Block::Phy, regs)
    }

    fn deferred_reg_verify(
        &self,
        block: Block,
        regs: &[RegValue],
    ) -> Result<(), Lpddr4Error> {
        self.ready()?;
        for &(offset, expected) in regs {
            self.checked(block, offset)?;
            let mask = self.layout.rw_mask(block, offset);
            let actual = self.read(block, offset);
            if (actual ^ expected) & mask != 0 {
                ringbuf_entry_root!(Trace::VerifyMismatch {
                    block,
                    offset,
                    expected,
                    actual,
                });
                return Err(Lpddr4Error::Io);
            }
        }
        Ok(())
    }

    fn check_ctl_interrupt(
        &self,
        intr: CtlInterrupt,
    ) -> Result<bool, Lpddr4Error> {
        self.ready()?;
        let (status, _, bit) = self.ctl_bit(intr)?;
        Ok(self.read(Block::Ctl, status) & bit != 0)
    }

    fn ack_ctl_interrupt(&self, intr: CtlInterrupt) -> Result<(), Lpddr4Error> {
        self.ready()?;
        let (_, ack, bit) = self.ctl_bit(intr)?;
        self.write(Block::Ctl, ack, bit);
        Ok(())
    }

    fn get_ctl_interrupt_mask(&self) -> Result<u64, Lpddr4Error> {
        self.ready()?;
        let [m0, m1] = self.layout.ctl.int_mask;
        let lo = self.read(Block::Ctl, m0);
        let hi = self.read(Block::Ctl, m1);
        Ok((u64::from(hi) << 32) | u64::from(lo))
    }

    fn set_ctl_interrupt_mask(&self, mask: u64) -> Result<(), Lpddr4Error> {
        self.ready()?;
        let count = u32::from(self.layout.ctl_irq.count);
        if count < 64 && mask >> count != 0 {
            return Err(Lpddr4Error::InvalidParam);
        }
        let [m0, m1] = self.layout.ctl.int_mask;
        self.write(Block::Ctl, m0, mask as u32);
        self.write(Block::Ctl, m1, (mask >> 32) as u32);
        Ok(())
    }

    fn check_phy_indep_interrupt(
        &self,
        intr: PhyIndepInterrupt,
    ) -> Result<bool, Lpddr4Error> {
        self.ready()?;
        let bit = self.pi_bit(intr)?;
        Ok(self.read(Block::Pi, self.layout.pi.int_status) & bit != 0)
    }

    fn ack_phy_indep_interrupt(
        &self,
        intr: PhyIndepInterrupt,
    ) -> Result<(), Lpddr4Error> {
        self.ready()?;
        let bit = self.pi_bit(intr)?;
        self.write(Block::Pi, self.layout.pi.int_ack, bit);
        Ok(())
    }

    fn get_phy_indep_interrupt_mask(&self) -> Result<u32, Lpddr4Error> {
        self.ready()?;
        Ok(self.read_field(Block::Pi, self.layout.pi.int_mask))
    }

    fn set_phy_indep_interrupt_mask(
        &self,
        mask: u32,
    ) -> Result<(), Lpddr4Error> {
        self.ready()?;
        self.update_field(Block::Pi, self.layout.pi.int_mask, mask)
    }

    fn get_debug_init_info(
        &self,
        info: &mut DebugInfo,
    ) -> Result<(), Lpddr4Error> {
        self.ready()?;
        let phy = self.layout.phy;

        // Each check only runs while nothing has failed, so the first
        // flag set is the one that matters.
        let checks: [(DebugInfo, &dyn Fn() -> bool); 8] = [
            (DebugInfo::PLL_ERROR, &|| self.pll_error()),
            (DebugInfo::IO_CALIB_ERROR, &|| self.io_calib_error()),
            (DebugInfo::RX_OFFSET_ERROR, &|| {
                self.snapshot();
                self.rx_offset_error()
            }),
            (DebugInfo::CA_TRAINING_ERROR, &|| self.ca_training_error()),
            (DebugInfo::WR_LVL_ERROR, &|| {
                self.data_slice_error(phy.wrlvl_error_obs, WR_LVL_ERROR_FIELDS)
            }),
            (DebugInfo::GATE_LVL_ERROR, &|| {
                self.data_slice_error(
                    phy.gtlvl_status_obs,
                    GATE_LVL_ERROR_FIELDS,
                )
            }),
            (DebugInfo::READ_LVL_ERROR, &|| {
                self.data_slice_error(
                    phy.rdlvl_status_obs,
                    READ_LVL_ERROR_FIELDS,
                )
            }),
            (DebugInfo::DQ_TRAINING_ERROR, &|| {
                self.data_slice_error(phy.wdqlvl_status_obs, DQ_LVL_STATUS)
            }),
        ];

        *info = DebugInfo::empty();
        for (flag, failed) in checks {
            if failed() {
                info.insert(flag);
                break;
            }
        }

        ringbuf_entry_root!(Trace::InitInfo(*info));
        if info.is_empty() {
            Ok(())
        } else {
            Err(Lpddr4Error::Protocol)
        }
    }

    fn get_lpi_wakeup_time(
        &self,
        param: LpiWakeUp,
        fsp: Fsp,
    ) -> Result<u32, Lpddr4Error> {
        self.ready()?;
        Ok(self.read_field(Block::Ctl, self.layout.ctl.lpi(param, fsp)))
    }

    fn set_lpi_wakeup_time(
        &self,
        param: LpiWakeUp,
        fsp: Fsp,
        cycles: u32,
    ) -> Result<(), Lpddr4Error> {
        self.ready()?;
        if cycles > crate::LPI_WAKEUP_MAX {
            return Err(Lpddr4Error::InvalidParam);
        }
        self.update_field(Block::Ctl, self.layout.ctl.lpi(param, fsp), cycles)
    }

    fn get_ecc_enable(&self) -> Result<EccEnable, Lpddr4Error> {
        self.ready()?;
        let v = self.read_field(Block::Ctl, self.layout.ctl.ecc_enable);
        EccEnable::from_u32(v).ok_or(Lpddr4Error::Io)
    }

    fn set_ecc_enable(&self, mode: EccEnable) -> Result<(), Lpddr4Error> {
        self.ready()?;
        self.update_field(Block::Ctl, self.layout.ctl.ecc_enable, mode as u32)
    }

    fn get_reduc_mode(&self) -> Result<ReducMode, Lpddr4Error> {
        self.ready()?;
        let v = self.read_field(Block::Ctl, self.layout.ctl.reduc);
        ReducMode::from_u32(v).ok_or(Lpddr4Error::Io)
    }

    fn set_reduc_mode(&self, mode: ReducMode) -> Result<(), Lpddr4Error> {
        self.ready()?;
        self.update_field(Block::Ctl, self.layout.ctl.reduc, mode as u32)
    }

    fn get_dbi_read_mode(&self) -> Result<bool, Lpddr4Error> {
        self.ready()?;
        Ok(self.read_field(Block::Ctl, self.layout.ctl.rd_dbi_en) != 0)
    }

    fn get_dbi_write_mode(&self) -> Result<bool, Lpddr4Error> {
        self.ready()?;
        Ok(self.read_field(Block::Ctl, self.layout.ctl.wr_dbi_en) != 0)
    }

    fn set_dbi_mode(&self, mode: DbiMode) -> Result<(), Lpddr4Error> {
        self.ready()?;
        let ctl = &self.layout.ctl;
        let (f, on) = match mode {
            DbiMode::ReadOn => (ctl.rd_dbi_en, 1),
            DbiMode::ReadOff => (ctl.rd_dbi_en, 0),
            DbiMode::WriteOn => (ctl.wr_dbi_en, 1),
            DbiMode::WriteOff => (ctl.wr_dbi_en, 0),
        };
        self.write_field(Block::Ctl, f, on);
        Ok(())
    }

    fn get_refresh_rate(&self, fsp: Fsp) -> Result<RefreshRate, Lpddr4Error> {
        self.ready()?;
        let ctl = &self.layout.ctl;
        let i = fsp as usize;
        Ok(RefreshRate {
            tref: self.read_field(Block::Ctl, ctl.tref[i]),
            tras_max: self.read_field(Block::Ctl, ctl.tras_max[i]),
        })
    }

    fn set_refresh_rate(
        &self,
        fsp: Fsp,
        rate: RefreshRate,
    ) -> Result<(), Lpddr4Error> {
        self.ready()?;
        let ctl = &self.layout.ctl;
        let i = fsp as usize;
        if rate.tref > ctl.tref[i].max()
            || rate.tras_max > ctl.tras_max[i].max()
        {
            return Err(Lpddr4Error::InvalidParam);
        }
        self.write_field(Block::Ctl, ctl.tref[i], rate.tref);
        self.write_field(Block::Ctl, ctl.tras_max[i], rate.tras_max);
        Ok(())
    }

    fn refresh_per_chip_select(
        &self,
        tref_interval: u32,
    ) -> Result<(), Lpddr4Error> {
        self.ready()?;
        self.update_field(
            Block::Ctl,
            self.layout.ctl.tref_interval,
            tref_interval,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimCtl, Ticks, TEST_LAYOUT};
    use crate::InfoType;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Ctl<'a> = CadenceLpddr4<&'a SimCtl, Ticks>;

    fn ready(sim: &SimCtl) -> Ctl<'_> {
        let mut c = CadenceLpddr4::new(sim, Ticks::default(), &TEST_LAYOUT);
        c.init(&Lpddr4Config::DEFAULT).unwrap();
        c
    }

    fn ctl_addr(reg: u16) -> u32 {
        word(u32::from(reg))
    }

    fn pi_addr(reg: u16) -> u32 {
        TEST_LAYOUT.pi_base + word(u32::from(reg))
    }

    fn phy_addr(reg: u16) -> u32 {
        TEST_LAYOUT.phy_base + word(u32::from(reg))
    }

    #[test]
    fn init_checks_the_controller_id() {
        let sim = SimCtl::new();
        sim.poke(ctl_addr(0), 0x1234 << 16);
        let mut c = CadenceLpddr4::new(&sim, Ticks::default(), &TEST_LAYOUT);
        assert_eq!(
            c.init(&Lpddr4Config::DEFAULT),
            Err(Lpddr4Error::Unsupported)
        );
        assert_eq!(
            c.read_reg(Block::Ctl, 0),
            Err(Lpddr4Error::NotInitialized)
        );
    }

    #[test]
    fn probe_rejects_zero_poll_limits() {
        let sim = SimCtl::new();
        let c = CadenceLpddr4::new(&sim, Ticks::default(), &TEST_LAYOUT);
        let cfg = Lpddr4Config {
            poll_limit: 0,
            ..Lpddr4Config::DEFAULT
        };
        assert_eq!(c.probe(&cfg), Err(Lpddr4Error::InvalidParam));
        assert_eq!(c.probe(&Lpddr4Config::DEFAULT), Ok(()));
    }

    #[test]
    fn register_offsets_are_bounded_per_block() {
        let sim = SimCtl::new();
        let c = ready(&sim);
        let l = &TEST_LAYOUT;
        assert_eq!(
            c.read_reg(Block::Ctl, l.ctl_regs),
            Err(Lpddr4Error::InvalidParam)
        );
        assert_eq!(
            c.write_reg(Block::Pi, l.pi_regs, 0),
            Err(Lpddr4Error::InvalidParam)
        );
        c.write_reg(Block::Phy, l.phy_regs - 1, 0x55).unwrap();
        assert_eq!(sim.reg(phy_addr(l.phy_regs - 1)), 0x55);
    }

    #[test]
    fn config_tables_land_in_their_blocks() {
        let sim = SimCtl::new();
        let c = ready(&sim);
        c.write_ctl_config(&[(3, 0x11), (4, 0x22)]).unwrap();
        c.write_phy_indep_config(&[(3, 0x33)]).unwrap();
        c.write_phy_config(&[(3, 0x44)]).unwrap();

        assert_eq!(sim.reg(ctl_addr(3)), 0x11);
        assert_eq!(sim.reg(ctl_addr(4)), 0x22);
        assert_eq!(sim.reg(pi_addr(3)), 0x33);
        assert_eq!(sim.reg(phy_addr(3)), 0x44);

        let mut back = [(4, 0), (3, 0)];
        c.read_ctl_config(&mut back).unwrap();
        assert_eq!(back, [(4, 0x22), (3, 0x11)]);

        let mut pi = [(3, 0)];
        c.read_phy_indep_config(&mut pi).unwrap();
        assert_eq!(pi, [(3, 0x33)]);

        let mut phy = [(3, 0)];
        c.read_phy_config(&mut phy).unwrap();
        assert_eq!(phy, [(3, 0x44)]);
    }

    #[test]
    fn bad_offset_stops_a_config_load() {
        let sim = SimCtl::new();
        let c = ready(&sim);
        let bad = TEST_LAYOUT.ctl_regs;
        assert_eq!(
            c.write_ctl_config(&[(1, 1), (bad, 2), (2, 3)]),
            Err(Lpddr4Error::InvalidParam)
        );
        assert_eq!(sim.reg(ctl_addr(1)), 1);
        assert_eq!(sim.reg(ctl_addr(2)), 0);
    }

    #[test]
    fn verify_only_compares_writable_bits() {
        let sim = SimCtl::new();
        let c = ready(&sim);
        // The test layout makes CTL 1 writable in its low byte only.
        sim.poke(ctl_addr(1), 0xabcd_0012);
        assert_eq!(
            c.deferred_reg_verify(Block::Ctl, &[(1, 0x0000_0012)]),
            Ok(())
        );
        assert_eq!(
            c.deferred_reg_verify(Block::Ctl, &[(1, 0x0000_0013)]),
            Err(Lpddr4Error::Io)
        );
        // No mask entry: nothing to compare.
        assert_eq!(c.deferred_reg_verify(Block::Ctl, &[(9, 0x1)]), Ok(()));
    }

    static PLL_UPDATES: AtomicUsize = AtomicUsize::new(0);

    fn count_pll_update(info: InfoType) {
        assert_eq!(info, InfoType::SocPllUpdate);
        PLL_UPDATES.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn start_waits_for_pi_then_controller() {
        let sim = SimCtl::new();
        let l = &TEST_LAYOUT;
        sim.raise_on_write(pi_addr(l.pi.start.reg), Block::Pi, 0, 3);
        sim.raise_on_write(ctl_addr(l.ctl.start.reg), Block::Ctl, 9, 5);

        let mut c = CadenceLpddr4::new(&sim, Ticks::default(), l);
        let cfg = Lpddr4Config {
            info_handler: Some(count_pll_update),
            ..Lpddr4Config::DEFAULT
        };
        c.init(&cfg).unwrap();

        let before = PLL_UPDATES.load(Ordering::SeqCst);
        c.start().unwrap();
        assert_eq!(PLL_UPDATES.load(Ordering::SeqCst), before + 1);

        assert_eq!(sim.reg(pi_addr(4)) & 0x101, 0x101);
        assert_eq!(sim.reg(pi_addr(0)) & 1, 1);
        assert_eq!(sim.reg(ctl_addr(0)) & 1, 1);
        // Both interrupts were acknowledged.
        assert_eq!(sim.reg(pi_addr(l.pi.int_status)), 0);
        assert_eq!(sim.reg(ctl_addr(l.ctl.int_status[0])), 0);
        assert_eq!(c.delay.polls, 3 + 5);
    }

    #[test]
    fn start_times_out_when_pi_never_finishes() {
        let sim = SimCtl::new();
        let mut c = CadenceLpddr4::new(&sim, Ticks::default(), &TEST_LAYOUT);
        let cfg = Lpddr4Config {
            poll_limit: 10,
            ..Lpddr4Config::DEFAULT
        };
        c.init(&cfg).unwrap();
        assert_eq!(c.start(), Err(Lpddr4Error::Timeout));
        assert_eq!(c.delay.polls, 10);
    }

    #[test]
    fn start_requires_init() {
        let sim = SimCtl::new();
        let mut c = CadenceLpddr4::new(&sim, Ticks::default(), &TEST_LAYOUT);
        assert_eq!(c.start(), Err(Lpddr4Error::NotInitialized));
    }

    #[test]
    fn mode_register_read_returns_both_data_words() {
        let sim = SimCtl::new();
        let l = &TEST_LAYOUT;
        sim.raise_on_write(ctl_addr(l.ctl.read_modereg.reg), Block::Ctl, 27, 0);
        sim.poke(ctl_addr(l.ctl.mrr_data[0]), 0x1122_3344);
        sim.poke(ctl_addr(l.ctl.mrr_data[1]), 0x55);

        let mut c = ready(&sim);
        assert_eq!(c.get_mmr_register(0x0102), Ok(0x55_1122_3344));
        assert_eq!(sim.reg(ctl_addr(l.ctl.read_modereg.reg)), 0x0102);
        // MR_READ_DONE is bit 27, in the low status word.
        assert_eq!(sim.reg(ctl_addr(l.ctl.int_status[0])), 0);
        // The error watch ran to its limit.
        assert_eq!(
            c.delay.polls,
            Lpddr4Config::DEFAULT.mrr_error_poll_limit
        );
    }

    #[test]
    fn mode_register_read_error_is_reported() {
        let sim = SimCtl::new();
        let l = &TEST_LAYOUT;
        sim.raise_on_write(ctl_addr(l.ctl.read_modereg.reg), Block::Ctl, 27, 0);
        sim.raise_on_write(ctl_addr(l.ctl.read_modereg.reg), Block::Ctl, 19, 0);
        sim.poke(ctl_addr(l.ctl.mrr_error_status.reg), 0x2);

        let mut c = ready(&sim);
        assert_eq!(c.get_mmr_register(0x0102), Err(Lpddr4Error::Io));
    }

    #[test]
    fn mode_register_read_times_out() {
        let sim = SimCtl::new();
        let mut c = ready(&sim);
        assert_eq!(c.get_mmr_register(0x0102), Err(Lpddr4Error::Timeout));
        assert_eq!(
            c.delay.polls,
            Lpddr4Config::DEFAULT.mode_reg_poll_limit
        );
    }

    #[test]
    fn mode_register_write_checks_status() {
        let sim = SimCtl::new();
        let l = &TEST_LAYOUT;
        let trigger = ctl_addr(l.ctl.write_modereg.reg);
        sim.raise_on_write(trigger, Block::Ctl, 34, 1);

        let mut c = ready(&sim);
        assert_eq!(c.set_mmr_register(0x0203), Ok(()));
        // MR_WRITE_DONE is bit 2 of the high status word, acked there.
        assert_eq!(sim.reg(ctl_addr(l.ctl.int_status[1])), 0);
        assert!(sim.writes_to(ctl_addr(l.ctl.int_ack[1])).contains(&(1 << 2)));

        sim.poke(ctl_addr(l.ctl.mrw_status.reg), 0x4);
        assert_eq!(c.set_mmr_register(0x0203), Err(Lpddr4Error::Io));
    }

    #[test]
    fn mode_register_value_must_fit() {
        let sim = SimCtl::new();
        let mut c = ready(&sim);
        assert_eq!(
            c.set_mmr_register(1 << 27),
            Err(Lpddr4Error::InvalidParam)
        );
    }

    #[test]
    fn ctl_interrupts_span_two_registers() {
        let sim = SimCtl::new();
        let l = &TEST_LAYOUT;
        let c = ready(&sim);
        sim.poke(ctl_addr(l.ctl.int_status[1]), 1 << 2);
        assert_eq!(c.check_ctl_interrupt(CtlInterrupt::MrWriteDone), Ok(true));
        assert_eq!(c.check_ctl_interrupt(CtlInterrupt::Raw(2)), Ok(false));
        assert_eq!(
            c.check_ctl_interrupt(CtlInterrupt::Raw(l.ctl_irq.count)),
            Err(Lpddr4Error::InvalidParam)
        );

        c.ack_ctl_interrupt(CtlInterrupt::Raw(32)).unwrap();
        assert_eq!(sim.writes_to(ctl_addr(l.ctl.int_ack[1])), vec![1]);
        c.ack_ctl_interrupt(CtlInterrupt::Raw(31)).unwrap();
        assert_eq!(sim.writes_to(ctl_addr(l.ctl.int_ack[0])), vec![1 << 31]);
    }

    #[test]
    fn ctl_mask_is_bounded_by_interrupt_count() {
        let sim = SimCtl::new();
        let c = ready(&sim);
        let count = TEST_LAYOUT.ctl_irq.count;
        let top = 1u64 << (count - 1);
        c.set_ctl_interrupt_mask(top | 1).unwrap();
        assert_eq!(c.get_ctl_interrupt_mask(), Ok(top | 1));
        assert_eq!(
            c.set_ctl_interrupt_mask(1u64 << count),
            Err(Lpddr4Error::InvalidParam)
        );
    }

    #[test]
    fn pi_interrupts() {
        let sim = SimCtl::new();
        let l = &TEST_LAYOUT;
        let c = ready(&sim);
        sim.poke(pi_addr(l.pi.int_status), 1 << 4);
        assert_eq!(
            c.check_phy_indep_interrupt(PhyIndepInterrupt::Raw(4)),
            Ok(true)
        );
        assert_eq!(
            c.check_phy_indep_interrupt(PhyIndepInterrupt::InitDone),
            Ok(false)
        );
        c.ack_phy_indep_interrupt(PhyIndepInterrupt::Raw(4)).unwrap();
        assert_eq!(sim.reg(pi_addr(l.pi.int_status)), 0);
        assert_eq!(
            c.ack_phy_indep_interrupt(PhyIndepInterrupt::Raw(l.pi_irq.count)),
            Err(Lpddr4Error::InvalidParam)
        );

        c.set_phy_indep_interrupt_mask(0x1ff_ffff).unwrap();
        assert_eq!(c.get_phy_indep_interrupt_mask(), Ok(0x1ff_ffff));
        assert_eq!(
            c.set_phy_indep_interrupt_mask(1 << 25),
            Err(Lpddr4Error::InvalidParam)
        );
    }

    #[test]
    fn wakeup_times_share_registers_without_clobbering() {
        let sim = SimCtl::new();
        let c = ready(&sim);
        c.set_lpi_wakeup_time(LpiWakeUp::PowerDown, Fsp::F1, 0xa)
            .unwrap();
        c.set_lpi_wakeup_time(LpiWakeUp::PowerDown, Fsp::F2, 0x5)
            .unwrap();
        assert_eq!(
            c.get_lpi_wakeup_time(LpiWakeUp::PowerDown, Fsp::F1),
            Ok(0xa)
        );
        assert_eq!(
            c.get_lpi_wakeup_time(LpiWakeUp::PowerDown, Fsp::F2),
            Ok(0x5)
        );
        assert_eq!(
            c.get_lpi_wakeup_time(LpiWakeUp::PowerDown, Fsp::F0),
            Ok(0)
        );
        assert_eq!(
            c.set_lpi_wakeup_time(LpiWakeUp::SelfRefreshLong, Fsp::F0, 0x10),
            Err(Lpddr4Error::InvalidParam)
        );
    }

    #[test]
    fn ecc_reduc_and_dbi() {
        let sim = SimCtl::new();
        let c = ready(&sim);
        c.set_ecc_enable(EccEnable::ErrorDetectCorrect).unwrap();
        assert_eq!(c.get_ecc_enable(), Ok(EccEnable::ErrorDetectCorrect));
        c.set_reduc_mode(ReducMode::Half).unwrap();
        assert_eq!(c.get_reduc_mode(), Ok(ReducMode::Half));

        c.set_dbi_mode(DbiMode::WriteOn).unwrap();
        assert_eq!(c.get_dbi_write_mode(), Ok(true));
        assert_eq!(c.get_dbi_read_mode(), Ok(false));
        c.set_dbi_mode(DbiMode::ReadOn).unwrap();
        c.set_dbi_mode(DbiMode::WriteOff).unwrap();
        assert_eq!(c.get_dbi_read_mode(), Ok(true));
        assert_eq!(c.get_dbi_write_mode(), Ok(false));
    }

    #[test]
    fn refresh_rate_per_fsp() {
        let sim = SimCtl::new();
        let c = ready(&sim);
        let r = RefreshRate {
            tref: 0x1_2345,
            tras_max: 0x1_0000,
        };
        c.set_refresh_rate(Fsp::F1, r).unwrap();
        assert_eq!(c.get_refresh_rate(Fsp::F1), Ok(r));
        assert_eq!(c.get_refresh_rate(Fsp::F0), Ok(RefreshRate::default()));
        assert_eq!(
            c.set_refresh_rate(
                Fsp::F2,
                RefreshRate {
                    tref: 1 << 20,
                    tras_max: 0
                }
            ),
            Err(Lpddr4Error::InvalidParam)
        );

        c.refresh_per_chip_select(0x40).unwrap();
        let f = TEST_LAYOUT.ctl.tref_interval;
        assert_eq!(f.get(sim.reg(ctl_addr(f.reg))), 0x40);
    }

    fn train_cleanly(sim: &SimCtl) {
        let l = &TEST_LAYOUT;
        let p = &l.phy;
        for r in p.pll_obs {
            sim.poke(phy_addr(l.phy_core_reg(r)), PLL_READY);
        }
        let [r0, r2, r3] = p.cal_result_obs;
        sim.poke(phy_addr(l.phy_core_reg(r0)), IO_CALIB_DONE);
        sim.poke(phy_addr(l.phy_core_reg(r2)), IO_CALIB_DONE);
        sim.poke(phy_addr(l.phy_core_reg(r3)), IO_CALIB_STATE);
        for s in 0..l.data_slices {
            sim.poke(phy_addr(l.data_slice_reg(s, p.rx_cal_obs)), RX_CAL_DONE);
        }
        for s in 0..l.address_slices {
            sim.poke(
                phy_addr(l.address_slice_reg(s, p.adr_calvl_obs1)),
                CA_TRAIN_RL,
            );
        }
    }

    #[test]
    fn clean_training_reports_nothing() {
        let sim = SimCtl::new();
        train_cleanly(&sim);
        let c = ready(&sim);
        let mut info = DebugInfo::all();
        assert_eq!(c.get_debug_init_info(&mut info), Ok(()));
        assert_eq!(info, DebugInfo::empty());

        // Every slice was asked for a snapshot.
        let l = &TEST_LAYOUT;
        for s in 0..l.data_slices {
            let f = l.phy.snap_obs;
            let v = sim.reg(phy_addr(l.data_slice_reg(s, f.reg)));
            assert_eq!(f.get(v), 1);
        }
        let f = l.phy.adr_snap_obs;
        let v = sim.reg(phy_addr(l.address_slice_reg(0, f.reg)));
        assert_eq!(f.get(v), 1);
    }

    #[test]
    fn pll_error_stops_further_checks() {
        let sim = SimCtl::new();
        train_cleanly(&sim);
        let l = &TEST_LAYOUT;
        sim.poke(phy_addr(l.phy_core_reg(l.phy.pll_obs[1])), 0x1);
        // Would also fail, but is never reached.
        sim.poke(phy_addr(l.data_slice_reg(0, l.phy.gtlvl_status_obs)), 1 << 6);

        let c = ready(&sim);
        let mut info = DebugInfo::empty();
        assert_eq!(
            c.get_debug_init_info(&mut info),
            Err(Lpddr4Error::Protocol)
        );
        assert_eq!(info, DebugInfo::PLL_ERROR);
        // No snapshot was taken.
        let f = l.phy.snap_obs;
        assert_eq!(sim.reg(phy_addr(l.data_slice_reg(0, f.reg))), 0);
    }

    #[test]
    fn each_training_error_is_attributed() {
        let l = &TEST_LAYOUT;
        let p = &l.phy;
        let last = l.data_slices - 1;
        let cases = [
            (
                l.phy_core_reg(p.cal_result_obs[2]),
                0x3 << 28,
                DebugInfo::IO_CALIB_ERROR,
            ),
            (
                l.data_slice_reg(last, p.rx_cal_obs),
                RX_CAL_DONE | 1,
                DebugInfo::RX_OFFSET_ERROR,
            ),
            (
                l.address_slice_reg(0, p.adr_calvl_obs1),
                CA_TRAIN_RL | 2,
                DebugInfo::CA_TRAINING_ERROR,
            ),
            (
                l.data_slice_reg(last, p.wrlvl_error_obs),
                0x2,
                DebugInfo::WR_LVL_ERROR,
            ),
            (
                l.data_slice_reg(0, p.gtlvl_status_obs),
                1 << 7,
                DebugInfo::GATE_LVL_ERROR,
            ),
            (
                l.data_slice_reg(0, p.rdlvl_status_obs),
                1 << 17,
                DebugInfo::READ_LVL_ERROR,
            ),
            (
                l.data_slice_reg(last, p.wdqlvl_status_obs),
                1 << 26,
                DebugInfo::DQ_TRAINING_ERROR,
            ),
        ];
        for (reg, value, flag) in cases {
            let sim = SimCtl::new();
            train_cleanly(&sim);
            sim.poke(phy_addr(reg), value);
            let c = ready(&sim);
            let mut info = DebugInfo::empty();
            assert_eq!(
                c.get_debug_init_info(&mut info),
                Err(Lpddr4Error::Protocol)
            );
            assert_eq!(info, flag);
        }
    }

    proptest! {
        #[test]
        fn polls_never_exceed_their_limit(limit in 1u32..200) {
            let sim = SimCtl::new();
            let mut c =
                CadenceLpddr4::new(&sim, Ticks::default(), &TEST_LAYOUT);
            let cfg = Lpddr4Config {
                mode_reg_poll_limit: limit,
                ..Lpddr4Config::DEFAULT
            };
            c.init(&cfg).unwrap();
            prop_assert_eq!(c.set_mmr_register(0), Err(Lpddr4Error::Timeout));
            prop_assert_eq!(c.delay.polls, limit);
        }
    }
}
