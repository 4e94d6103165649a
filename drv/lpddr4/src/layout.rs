// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-SoC description of the controller register map.
//!
//! The Cadence controller is instantiated with different data widths on
//! different SoCs. The sequencing logic is shared; what changes is the
//! number of PHY slices, the size of each register block, and where in
//! those blocks each field ended up. A [`Layout`] captures all of that.
//!
//! The read/write mask tables are generated from the controller's register
//! description and are large, so the layouts shipped here carry none.
//! Boards that want [`Lpddr4::deferred_reg_verify`] to check anything
//! supply their tables with struct update syntax:
//!
//! ```ignore
//! const BOARD: Layout = Layout { masks: BOARD_MASKS, ..J721E };
//! ```
//!
//! [`Lpddr4::deferred_reg_verify`]: crate::Lpddr4::deferred_reg_verify

use static_assertions::const_assert;

use crate::{CtlInterrupt, Fsp, LpiWakeUp, PhyIndepInterrupt};

/// One of the controller's three register blocks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Block {
    Ctl,
    Pi,
    Phy,
}

/// A bit field within one register.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Field {
    pub reg: u16,
    pub shift: u8,
    pub width: u8,
}

impl Field {
    pub const fn new(reg: u16, shift: u8, width: u8) -> Self {
        Self { reg, shift, width }
    }

    pub const fn bit(reg: u16, shift: u8) -> Self {
        Self::new(reg, shift, 1)
    }

    /// Largest value the field holds.
    pub const fn max(&self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            (1 << self.width) - 1
        }
    }

    pub const fn mask(&self) -> u32 {
        self.max() << self.shift
    }

    pub const fn get(&self, reg: u32) -> u32 {
        (reg & self.mask()) >> self.shift
    }

    pub const fn set(&self, reg: u32, value: u32) -> u32 {
        (reg & !self.mask()) | ((value << self.shift) & self.mask())
    }
}

/// Memory-controller fields.
#[derive(Copy, Clone, Debug)]
pub struct CtlFields {
    pub start: Field,
    pub controller_id: Field,
    pub int_status: [u16; 2],
    pub int_ack: [u16; 2],
    pub int_mask: [u16; 2],
    pub read_modereg: Field,
    pub write_modereg: Field,
    pub mrw_status: Field,
    pub mrr_error_status: Field,
    pub mrr_data: [u16; 2],
    pub ecc_enable: Field,
    pub reduc: Field,
    pub rd_dbi_en: Field,
    pub wr_dbi_en: Field,
    pub tref: [Field; 3],
    pub tras_max: [Field; 3],
    pub tref_interval: Field,
    pub lpi_wakeup: [[Field; 3]; 7],
}

impl CtlFields {
    pub const fn lpi(&self, param: LpiWakeUp, fsp: Fsp) -> Field {
        self.lpi_wakeup[param as usize][fsp as usize]
    }
}

/// PHY-independent initiator fields.
#[derive(Copy, Clone, Debug)]
pub struct PiFields {
    pub start: Field,
    pub init_lvl_en: Field,
    pub normal_lvl_seq: Field,
    pub int_status: u16,
    pub int_ack: u16,
    pub int_mask: Field,
}

/// PHY fields. Data- and address-slice registers are numbered from the
/// start of their slice; core registers from the start of the PHY core.
#[derive(Copy, Clone, Debug)]
pub struct PhyFields {
    pub pll_obs: [u16; 2],
    pub cal_result_obs: [u16; 3],
    pub snap_obs: Field,
    pub rx_cal_obs: u16,
    pub wrlvl_error_obs: u16,
    pub gtlvl_status_obs: u16,
    pub rdlvl_status_obs: u16,
    pub wdqlvl_status_obs: u16,
    pub adr_snap_obs: Field,
    pub adr_calvl_obs1: u16,
}

/// Bit numbers of the controller's named interrupts.
#[derive(Copy, Clone, Debug)]
pub struct CtlIrqMap {
    pub mc_init_done: u8,
    pub mr_read_done: u8,
    pub mr_write_done: u8,
    pub mrr_error: u8,
    pub count: u8,
}

impl CtlIrqMap {
    pub const fn bit(&self, intr: CtlInterrupt) -> u8 {
        match intr {
            CtlInterrupt::McInitDone => self.mc_init_done,
            CtlInterrupt::MrReadDone => self.mr_read_done,
            CtlInterrupt::MrWriteDone => self.mr_write_done,
            CtlInterrupt::MrrError => self.mrr_error,
            CtlInterrupt::Raw(b) => b,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct PiIrqMap {
    pub init_done: u8,
    pub count: u8,
}

impl PiIrqMap {
    pub const fn bit(&self, intr: PhyIndepInterrupt) -> u8 {
        match intr {
            PhyIndepInterrupt::InitDone => self.init_done,
            PhyIndepInterrupt::Raw(b) => b,
        }
    }
}

/// Writable-bit masks, indexed by register number. A register past the end
/// of its table has no bits that can be verified.
#[derive(Copy, Clone, Debug)]
pub struct RwMasks {
    pub ctl: &'static [u32],
    pub pi: &'static [u32],
    pub data_slice: &'static [u32],
    pub address_slice: &'static [u32],
    pub phy_core: &'static [u32],
}

impl RwMasks {
    pub const NONE: Self = Self {
        ctl: &[],
        pi: &[],
        data_slice: &[],
        address_slice: &[],
        phy_core: &[],
    };
}

#[derive(Copy, Clone, Debug)]
pub struct Layout {
    pub product_id: u16,
    pub data_slices: u16,
    pub address_slices: u16,
    /// Registers per PHY slice.
    pub slice_width: u16,
    pub ctl_regs: u16,
    pub pi_regs: u16,
    pub phy_regs: u16,
    /// Byte offsets of the PI and PHY blocks from the controller base.
    pub pi_base: u32,
    pub phy_base: u32,
    pub ctl: CtlFields,
    pub pi: PiFields,
    pub phy: PhyFields,
    pub ctl_irq: CtlIrqMap,
    pub pi_irq: PiIrqMap,
    pub masks: RwMasks,
}

impl Layout {
    pub const fn regs(&self, block: Block) -> u16 {
        match block {
            Block::Ctl => self.ctl_regs,
            Block::Pi => self.pi_regs,
            Block::Phy => self.phy_regs,
        }
    }

    pub const fn base(&self, block: Block) -> u32 {
        match block {
            Block::Ctl => 0,
            Block::Pi => self.pi_base,
            Block::Phy => self.phy_base,
        }
    }

    pub const fn data_slice_reg(&self, slice: u16, reg: u16) -> u16 {
        slice * self.slice_width + reg
    }

    pub const fn address_slice_reg(&self, slice: u16, reg: u16) -> u16 {
        (self.data_slices + slice) * self.slice_width + reg
    }

    pub const fn phy_core_reg(&self, reg: u16) -> u16 {
        (self.data_slices + self.address_slices) * self.slice_width + reg
    }

    /// Returns the writable-bit mask of a register.
    pub fn rw_mask(&self, block: Block, offset: u16) -> u32 {
        let (table, index) = match block {
            Block::Ctl => (self.masks.ctl, offset),
            Block::Pi => (self.masks.pi, offset),
            Block::Phy => {
                let w = self.slice_width;
                let data_end = self.data_slices * w;
                let addr_end = self.phy_core_reg(0);
                if offset < data_end {
                    (self.masks.data_slice, offset % w)
                } else if offset < addr_end {
                    (self.masks.address_slice, (offset - data_end) % w)
                } else {
                    (self.masks.phy_core, offset - addr_end)
                }
            }
        };
        table.get(usize::from(index)).copied().unwrap_or(0)
    }

    /// Checks the relationships the driver relies on.
    pub const fn validate(&self) -> bool {
        self.slice_width != 0
            && self.data_slices != 0
            && self.phy_core_reg(0) < self.phy_regs
            && self.ctl_irq.count <= 64
            && self.ctl_irq.mc_init_done < self.ctl_irq.count
            && self.ctl_irq.mr_read_done < self.ctl_irq.count
            && self.ctl_irq.mr_write_done < self.ctl_irq.count
            && self.ctl_irq.mrr_error < self.ctl_irq.count
            && self.pi_irq.count <= 32
            && self.pi_irq.init_done < self.pi_irq.count
            && self.pi.int_mask.width == self.pi_irq.count
            && self.pi_base >= (self.ctl_regs as u32) << 2
            && self.phy_base >= self.pi_base + ((self.pi_regs as u32) << 2)
    }
}

/// Builds the wake-up timer table: 4-bit fields packed one per byte,
/// parameter-major, starting at register `base`.
const fn lpi_wakeup_fields(base: u16) -> [[Field; 3]; 7] {
    let mut t = [[Field::new(0, 0, 0); 3]; 7];
    let mut p = 0;
    while p < 7 {
        let mut f = 0;
        while f < 3 {
            let n = (p * 3 + f) as u16;
            t[p][f] = Field::new(base + n / 4, ((n % 4) * 8) as u8, 4);
            f += 1;
        }
        p += 1;
    }
    t
}

/// J721E: 32-bit interface, four data slices and three address slices.
pub const J721E: Layout = Layout {
    product_id: 0x2040,
    data_slices: 4,
    address_slices: 3,
    slice_width: 256,
    ctl_regs: 459,
    pi_regs: 300,
    phy_regs: 1920,
    pi_base: 0x2000,
    phy_base: 0x4000,
    ctl: CtlFields {
        start: Field::bit(0, 0),
        controller_id: Field::new(0, 16, 16),
        int_status: [292, 293],
        int_ack: [294, 295],
        int_mask: [296, 297],
        read_modereg: Field::new(160, 0, 24),
        write_modereg: Field::new(161, 0, 27),
        mrw_status: Field::new(162, 0, 8),
        mrr_error_status: Field::new(163, 0, 2),
        mrr_data: [164, 165],
        ecc_enable: Field::new(91, 8, 2),
        reduc: Field::bit(236, 0),
        rd_dbi_en: Field::bit(239, 16),
        wr_dbi_en: Field::bit(239, 24),
        tref: [
            Field::new(56, 0, 20),
            Field::new(57, 0, 20),
            Field::new(58, 0, 20),
        ],
        tras_max: [
            Field::new(29, 0, 17),
            Field::new(31, 0, 17),
            Field::new(33, 0, 17),
        ],
        tref_interval: Field::new(59, 0, 20),
        lpi_wakeup: lpi_wakeup_fields(120),
    },
    pi: PiFields {
        start: Field::bit(0, 0),
        init_lvl_en: Field::bit(4, 0),
        normal_lvl_seq: Field::bit(4, 8),
        int_status: 77,
        int_ack: 78,
        int_mask: Field::new(79, 0, 25),
    },
    phy: PhyFields {
        pll_obs: [2, 3],
        cal_result_obs: [16, 17, 18],
        snap_obs: Field::bit(8, 24),
        rx_cal_obs: 50,
        wrlvl_error_obs: 55,
        gtlvl_status_obs: 60,
        rdlvl_status_obs: 62,
        wdqlvl_status_obs: 70,
        adr_snap_obs: Field::bit(4, 24),
        adr_calvl_obs1: 20,
    },
    ctl_irq: CtlIrqMap {
        mc_init_done: 9,
        mrr_error: 19,
        mr_read_done: 27,
        mr_write_done: 34,
        count: 45,
    },
    pi_irq: PiIrqMap {
        init_done: 0,
        count: 25,
    },
    masks: RwMasks::NONE,
};

/// AM64: 16-bit interface with two data slices and one address slice. The
/// controller and PI maps match J721E.
pub const AM64: Layout = Layout {
    data_slices: 2,
    address_slices: 1,
    ctl_regs: 423,
    pi_regs: 345,
    phy_regs: 896,
    ..J721E
};

const_assert!(J721E.validate());
const_assert!(AM64.validate());
