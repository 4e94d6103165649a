// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! 32-bit register access for memory-mapped controller and PHY blocks.
//!
//! Drivers in this tree are written against [`RegBus`] rather than raw
//! pointers, so that the same sequencing logic can run against real hardware
//! (via [`Mmio`]) or against a simulated register file in host tests.

#![cfg_attr(not(test), no_std)]

/// Abstracts over the ways a driver can reach a block of 32-bit registers.
///
/// Addresses are byte addresses relative to whatever the implementation
/// considers its base. Accesses have side effects only; there is no error
/// path, since a missing or unmapped block is not something a boot-time
/// driver can recover from.
pub trait RegBus {
    fn read32(&self, addr: u32) -> u32;
    fn write32(&self, addr: u32, value: u32);

    /// Performs a read-modify-write of a single register.
    fn modify32<F>(&self, addr: u32, f: F)
    where
        F: FnOnce(u32) -> u32,
        Self: Sized,
    {
        let v = self.read32(addr);
        self.write32(addr, f(v));
    }

    /// Clears the bits in `clear`, then sets the bits in `set`.
    fn clear_set32(&self, addr: u32, clear: u32, set: u32) {
        let v = self.read32(addr);
        self.write32(addr, (v & !clear) | set);
    }
}

impl<T: RegBus + ?Sized> RegBus for &T {
    fn read32(&self, addr: u32) -> u32 {
        (**self).read32(addr)
    }

    fn write32(&self, addr: u32, value: u32) {
        (**self).write32(addr, value)
    }
}

/// Returns the byte offset of the `index`th word in a register array.
#[inline(always)]
pub const fn word(index: u32) -> u32 {
    index << 2
}

/// Volatile access to a physically-mapped register block.
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// Creates a handle for the register block at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be the address of a mapped register block that is large
    /// enough for every offset the driver will touch, and nothing else may
    /// be accessing that block for the lifetime of the handle.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    fn ptr(&self, addr: u32) -> *mut u32 {
        (self.base + addr as usize) as *mut u32
    }
}

impl RegBus for Mmio {
    #[inline(always)]
    fn read32(&self, addr: u32) -> u32 {
        // Safety: the caller of `Mmio::new` vouched for the mapping.
        unsafe { self.ptr(addr).read_volatile() }
    }

    #[inline(always)]
    fn write32(&self, addr: u32, value: u32) {
        // Safety: the caller of `Mmio::new` vouched for the mapping.
        unsafe { self.ptr(addr).write_volatile(value) }
    }
}
