// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Build-time description of the memory interface being calibrated.
//!
//! Everything the sequencer needs to know about a board is captured in a
//! [`SeqConfig`], which boards construct as a `const` and check at build
//! time:
//!
//! ```ignore
//! const BOARD: SeqConfig = SeqConfig { .. };
//! static_assertions::const_assert!(BOARD.is_valid());
//! ```

use drv_sdram_cal_api::{CalibSteps, NO_GROUP};

/// Largest rank count the ODT tables cover.
pub const MAX_RANKS: usize = 4;

/// Largest number of shadow register sets.
pub const MAX_SHADOW_REGS: usize = 4;

/// Largest DQS group count; the per-group scan-chain arrays hold 64
/// entries.
pub const MAX_DQS_GROUPS: u32 = 64;

/// Largest number of DQ pins in one DQS group. Pass/fail masks are `u32`.
pub const MAX_DQ_PER_DQS: usize = 32;

/// Entry points of the micro-programs in the RW manager instruction ROM for
/// the write/read LFSR test. There is one set for plain data and one set
/// that also exercises the data mask.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LfsrProgram {
    pub entry: u32,
    pub data: u32,
    pub dqs: u32,
    pub nop: u32,
    pub wait: u32,
    pub wl_1: u32,
}

/// Mode-register programming sequences for one address layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MrsProgram {
    pub mrs0_dll_reset: u32,
    pub mrs0_user: u32,
    pub mrs1: u32,
    pub mrs2: u32,
    pub mrs3: u32,
}

/// Instruction-ROM addresses generated alongside the ROM images.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RwMgrProgram {
    pub activate_0_and_1: u32,
    pub activate_0_and_1_wait1: u32,
    pub activate_0_and_1_wait2: u32,
    pub activate_1: u32,
    pub clear_dqs_enable: u32,
    pub guaranteed_read: u32,
    pub guaranteed_read_cont: u32,
    pub guaranteed_write: u32,
    pub guaranteed_write_wait: [u32; 4],
    pub idle: u32,
    pub idle_loop1: u32,
    pub idle_loop2: u32,
    pub init_reset_0_cke_0: u32,
    pub init_reset_1_cke_0: u32,
    pub lfsr: LfsrProgram,
    pub lfsr_dm: LfsrProgram,
    pub mrs: MrsProgram,
    /// Variants used for odd ranks when address mirroring is on.
    pub mrs_mirrored: MrsProgram,
    pub precharge_all: u32,
    pub read_b2b: u32,
    pub read_b2b_wait1: u32,
    pub read_b2b_wait2: u32,
    pub refresh_all: u32,
    pub ret: u32,
    pub sgle_read: u32,
    pub zqcl: u32,
}

/// Delay-chain and phase resolution of the I/O elements.
///
/// Delays are in picoseconds; everything ending in `_max` is the largest
/// programmable tap value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IoDelays {
    pub delay_per_opa_tap: u32,
    pub delay_per_dchain_tap: u32,
    pub delay_per_dqs_en_dchain_tap: u32,
    pub dll_chain_length: u32,
    pub dqdqs_out_phase_max: u32,
    pub dqs_en_delay_max: u32,
    pub dqs_en_delay_offset: u32,
    pub dqs_en_phase_max: u32,
    pub dqs_in_delay_max: u32,
    pub dqs_in_reserve: u32,
    pub dqs_out_reserve: u32,
    pub io_in_delay_max: u32,
    pub io_out1_delay_max: u32,
    pub io_out2_delay_max: u32,
    /// Move DQS-enable along with DQS during read centering.
    pub shift_dqs_en_when_shift_dqs: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SeqConfig {
    pub number_of_ranks: u32,
    pub number_of_cs_per_dimm: u32,
    pub if_read_dqs_width: u32,
    pub if_write_dqs_width: u32,
    pub dq_per_read_dqs: u32,
    pub dq_per_write_dqs: u32,
    pub data_width: u32,
    pub data_mask_width: u32,
    pub virtual_groups_per_read_dqs: u32,
    pub virtual_groups_per_write_dqs: u32,
    pub num_dqs_per_write_group: u32,
    pub num_dm_per_write_group: u32,
    /// Bit `r` set means rank `r` uses mirrored addressing.
    pub address_mirroring: u32,
    pub ranks_per_shadow_reg: u32,
    pub num_shadow_regs: u32,

    pub io: IoDelays,

    pub afi_rate_ratio: u32,
    pub max_latency_count_width: u32,
    pub calib_vfifo_offset: u32,
    pub calib_lfifo_offset: u32,
    pub vfifo_size: u32,
    pub num_calib_repeat: u32,

    /// Loop counters for the tINIT and tRESET waits during memory init.
    pub tinit_cntr: [u32; 3],
    pub treset_cntr: [u32; 3],

    pub steps: CalibSteps,
    pub super_quick_calibration: bool,
    pub disable_guaranteed_read: bool,

    pub program: RwMgrProgram,
    pub inst_rom: &'static [u32],
    pub ac_rom: &'static [u32],
}

/// Reasons a [`SeqConfig`] cannot be calibrated.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    RankCount,
    ShadowRegs,
    GroupRatio,
    MaskWidth,
    VirtualGroups,
    DmWidth,
    WriteGroupSize,
    ZeroTapDelay,
    ZeroRateRatio,
    ZeroVfifo,
    LatencyWidth,
    PhaseMax,
}

impl SeqConfig {
    /// Checks the relationships between interface constants that the
    /// sequencer depends on. Usable in `const` context.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.number_of_ranks == 0
            || self.number_of_ranks as usize > MAX_RANKS
        {
            return Err(ConfigError::RankCount);
        }
        if self.ranks_per_shadow_reg == 0
            || self.num_shadow_regs == 0
            || self.num_shadow_regs as usize > MAX_SHADOW_REGS
            || self.num_shadow_regs * self.ranks_per_shadow_reg
                < self.number_of_ranks
        {
            return Err(ConfigError::ShadowRegs);
        }
        if self.if_write_dqs_width == 0
            || self.if_read_dqs_width > MAX_DQS_GROUPS
            || self.if_read_dqs_width < self.if_write_dqs_width
            || self.if_read_dqs_width % self.if_write_dqs_width != 0
        {
            return Err(ConfigError::GroupRatio);
        }
        // Edge sweeps need at least two pins to spread DQ delays across.
        if self.dq_per_read_dqs < 2
            || self.dq_per_read_dqs as usize > MAX_DQ_PER_DQS
            || self.dq_per_write_dqs == 0
            || self.dq_per_write_dqs as usize > MAX_DQ_PER_DQS
            || self.dq_per_read_dqs > self.dq_per_write_dqs
        {
            return Err(ConfigError::MaskWidth);
        }
        // Failures may name a single DQ pin as `group * dq_per_dqs + bit`,
        // which must stay clear of the no-group marker.
        if self.if_read_dqs_width * self.dq_per_read_dqs >= NO_GROUP as u32
            || self.if_write_dqs_width * self.dq_per_write_dqs
                >= NO_GROUP as u32
        {
            return Err(ConfigError::GroupRatio);
        }
        if self.virtual_groups_per_read_dqs == 0
            || self.virtual_groups_per_write_dqs == 0
            || self.dq_per_read_dqs % self.virtual_groups_per_read_dqs != 0
            || self.dq_per_write_dqs % self.virtual_groups_per_write_dqs != 0
        {
            return Err(ConfigError::VirtualGroups);
        }
        if self.data_mask_width == 0
            || self.data_width / self.data_mask_width > 32
        {
            return Err(ConfigError::DmWidth);
        }
        if self.num_dqs_per_write_group == 0
            || self.num_dqs_per_write_group >= 32
        {
            return Err(ConfigError::WriteGroupSize);
        }
        if self.io.delay_per_opa_tap == 0
            || self.io.delay_per_dchain_tap == 0
            || self.io.delay_per_dqs_en_dchain_tap == 0
        {
            return Err(ConfigError::ZeroTapDelay);
        }
        if self.afi_rate_ratio == 0 {
            return Err(ConfigError::ZeroRateRatio);
        }
        if self.vfifo_size == 0 {
            return Err(ConfigError::ZeroVfifo);
        }
        if self.max_latency_count_width == 0
            || self.max_latency_count_width > 31
        {
            return Err(ConfigError::LatencyWidth);
        }
        if self.io.dqs_en_phase_max == 0 {
            return Err(ConfigError::PhaseMax);
        }
        Ok(())
    }

    pub const fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Number of read groups that share one write group.
    pub const fn read_groups_per_write_group(&self) -> u32 {
        self.if_read_dqs_width / self.if_write_dqs_width
    }

    /// First read group belonging to `write_group`.
    pub const fn first_read_group(&self, write_group: u32) -> u32 {
        write_group * self.if_read_dqs_width / self.if_write_dqs_width
    }

    /// One past the last read group belonging to `write_group`.
    pub const fn end_read_group(&self, write_group: u32) -> u32 {
        (write_group + 1) * self.if_read_dqs_width / self.if_write_dqs_width
    }

    /// Whole delay-chain taps in one output phase tap, rounded down.
    pub const fn dtaps_per_ptap(&self, dchain_tap: u32) -> u32 {
        let mut taps = 0;
        let mut delay = 0;
        while delay < self.io.delay_per_opa_tap {
            taps += 1;
            delay += dchain_tap;
        }
        taps - 1
    }

    /// Yields `(shadow_reg, first_rank)` for every shadow register set in
    /// use.
    pub fn shadow_sets(&self) -> impl Iterator<Item = (usize, u32)> {
        (0..self.number_of_ranks)
            .step_by(self.ranks_per_shadow_reg as usize)
            .enumerate()
    }

    pub const fn max_latency(&self) -> u32 {
        (1 << self.max_latency_count_width) - 1
    }

    pub(crate) fn quick_read_mode(&self) -> bool {
        self.super_quick_calibration
            && self.steps.contains(CalibSteps::SKIP_DELAY_SWEEPS)
    }

    pub(crate) fn quick_write_mode(&self) -> bool {
        self.super_quick_calibration
            && self.steps.contains(CalibSteps::SKIP_WRITES)
    }
}

/// Returns a mask with the low `bits` bits set.
pub(crate) const fn low_bits(bits: u32) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1 << bits) - 1
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use static_assertions::const_assert;

    const fn lfsr(base: u32) -> LfsrProgram {
        LfsrProgram {
            entry: base,
            data: base + 1,
            dqs: base + 2,
            nop: base + 3,
            wait: base + 4,
            wl_1: base + 5,
        }
    }

    const fn mrs(base: u32) -> MrsProgram {
        MrsProgram {
            mrs0_dll_reset: base,
            mrs0_user: base + 1,
            mrs1: base + 2,
            mrs2: base + 3,
            mrs3: base + 4,
        }
    }

    /// Instruction addresses are arbitrary but distinct, so that the
    /// simulated PHY can tell the programs apart.
    pub const PROGRAM: RwMgrProgram = RwMgrProgram {
        activate_0_and_1: 0x01,
        activate_0_and_1_wait1: 0x02,
        activate_0_and_1_wait2: 0x03,
        activate_1: 0x04,
        clear_dqs_enable: 0x05,
        guaranteed_read: 0x06,
        guaranteed_read_cont: 0x07,
        guaranteed_write: 0x08,
        guaranteed_write_wait: [0x09, 0x0a, 0x0b, 0x0c],
        idle: 0x0d,
        idle_loop1: 0x0e,
        idle_loop2: 0x0f,
        init_reset_0_cke_0: 0x10,
        init_reset_1_cke_0: 0x11,
        lfsr: lfsr(0x20),
        lfsr_dm: lfsr(0x30),
        mrs: mrs(0x40),
        mrs_mirrored: mrs(0x48),
        precharge_all: 0x50,
        read_b2b: 0x51,
        read_b2b_wait1: 0x52,
        read_b2b_wait2: 0x53,
        refresh_all: 0x54,
        ret: 0x55,
        sgle_read: 0x56,
        zqcl: 0x57,
    };

    pub const INST_ROM: [u32; 4] = [0x1111, 0x2222, 0x3333, 0x4444];
    pub const AC_ROM: [u32; 2] = [0xaaaa, 0xbbbb];

    /// A small single-rank interface: two write groups, one read group
    /// each, four DQ per group.
    pub const SMALL: SeqConfig = SeqConfig {
        number_of_ranks: 1,
        number_of_cs_per_dimm: 1,
        if_read_dqs_width: 2,
        if_write_dqs_width: 2,
        dq_per_read_dqs: 4,
        dq_per_write_dqs: 4,
        data_width: 8,
        data_mask_width: 2,
        virtual_groups_per_read_dqs: 1,
        virtual_groups_per_write_dqs: 1,
        num_dqs_per_write_group: 1,
        num_dm_per_write_group: 1,
        address_mirroring: 0,
        ranks_per_shadow_reg: 1,
        num_shadow_regs: 1,
        io: IoDelays {
            delay_per_opa_tap: 416,
            delay_per_dchain_tap: 25,
            delay_per_dqs_en_dchain_tap: 25,
            dll_chain_length: 8,
            dqdqs_out_phase_max: 0,
            dqs_en_delay_max: 31,
            dqs_en_delay_offset: 0,
            dqs_en_phase_max: 7,
            dqs_in_delay_max: 15,
            dqs_in_reserve: 4,
            dqs_out_reserve: 4,
            io_in_delay_max: 15,
            io_out1_delay_max: 15,
            io_out2_delay_max: 0,
            shift_dqs_en_when_shift_dqs: false,
        },
        afi_rate_ratio: 1,
        max_latency_count_width: 5,
        calib_vfifo_offset: 10,
        calib_lfifo_offset: 7,
        vfifo_size: 4,
        num_calib_repeat: 1,
        tinit_cntr: [0, 0x6a, 0xff],
        treset_cntr: [0, 0x83, 0xff],
        steps: CalibSteps::SKIP_FULL_TEST,
        super_quick_calibration: false,
        disable_guaranteed_read: false,
        program: PROGRAM,
        inst_rom: &INST_ROM,
        ac_rom: &AC_ROM,
    };

    const_assert!(SMALL.is_valid());

    #[test]
    fn small_config_is_valid() {
        assert_eq!(SMALL.validate(), Ok(()));
    }

    #[test]
    fn read_groups_must_divide_evenly() {
        let cfg = SeqConfig {
            if_read_dqs_width: 3,
            if_write_dqs_width: 2,
            ..SMALL
        };
        assert_eq!(cfg.validate(), Err(ConfigError::GroupRatio));
    }

    #[test]
    fn shadow_regs_must_cover_ranks() {
        let cfg = SeqConfig {
            number_of_ranks: 4,
            ranks_per_shadow_reg: 1,
            num_shadow_regs: 2,
            ..SMALL
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ShadowRegs));
    }

    #[test]
    fn failing_pins_fit_below_the_no_group_marker() {
        let too_many_groups = SeqConfig {
            if_read_dqs_width: 65,
            if_write_dqs_width: 65,
            ..SMALL
        };
        assert_eq!(too_many_groups.validate(), Err(ConfigError::GroupRatio));

        // 32 groups of 8 pins would flatten pin 255 onto the marker.
        let too_many_pins = SeqConfig {
            if_read_dqs_width: 32,
            if_write_dqs_width: 32,
            dq_per_read_dqs: 8,
            dq_per_write_dqs: 8,
            ..SMALL
        };
        assert_eq!(too_many_pins.validate(), Err(ConfigError::GroupRatio));

        let widest = SeqConfig {
            if_read_dqs_width: 31,
            if_write_dqs_width: 31,
            dq_per_read_dqs: 8,
            dq_per_write_dqs: 8,
            ..SMALL
        };
        assert_eq!(widest.validate(), Ok(()));
    }

    #[test]
    fn masks_wider_than_a_word_are_rejected() {
        let cfg = SeqConfig {
            dq_per_read_dqs: 40,
            dq_per_write_dqs: 40,
            ..SMALL
        };
        assert_eq!(cfg.validate(), Err(ConfigError::MaskWidth));
    }

    #[test]
    fn dtaps_per_ptap_rounds_down() {
        // 416 / 25 = 16.64
        assert_eq!(SMALL.dtaps_per_ptap(25), 16);
        // An exact multiple still counts one fewer tap than the quotient.
        assert_eq!(SMALL.dtaps_per_ptap(26), 15);
    }

    #[test]
    fn write_group_maps_to_read_groups() {
        let cfg = SeqConfig {
            if_read_dqs_width: 4,
            if_write_dqs_width: 2,
            ..SMALL
        };
        assert_eq!(cfg.read_groups_per_write_group(), 2);
        assert_eq!(cfg.first_read_group(1), 2);
        assert_eq!(cfg.end_read_group(1), 4);
    }

    #[test]
    fn shadow_sets_step_by_ranks_per_set() {
        let cfg = SeqConfig {
            number_of_ranks: 4,
            ranks_per_shadow_reg: 2,
            num_shadow_regs: 2,
            ..SMALL
        };
        let sets: Vec<_> = cfg.shadow_sets().collect();
        assert_eq!(sets, [(0, 0), (1, 2)]);
    }

    #[test]
    fn low_bits_saturates() {
        assert_eq!(low_bits(0), 0);
        assert_eq!(low_bits(4), 0xf);
        assert_eq!(low_bits(32), u32::MAX);
    }
}
