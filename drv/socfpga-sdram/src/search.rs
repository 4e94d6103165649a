// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! DQS-enable search: finding the VFIFO position, phase and delay at which
//! the read-enable window opens and closes, then parking in its middle.
//!
//! Positions are tracked in picoseconds along one axis that strings
//! together VFIFO cycles, phase taps and DQS-enable delay taps. Every loop
//! here is bounded by the VFIFO size or a tap maximum.

use drv_sdram_cal_api::CalSubstage;
use regbus::RegBus;
use ringbuf::*;

use crate::regs::reg_file;
use crate::rwtest::{PassMode, Ranks};
use crate::scc::Selection;
use crate::{Sequencer, Trace};

/// Cursor shared by the steps of the DQS-enable search.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct PhaseSearch {
    /// VFIFO increments issued so far.
    v: u32,
    /// DQS-enable delay tap.
    d: u32,
    /// DQS-enable phase tap.
    p: u32,
    /// VFIFO cycles tried while looking for an edge.
    i: u32,
    work_bgn: u32,
    work_end: u32,
}

impl<B: RegBus> Sequencer<'_, B> {
    /// A read with at least one correct bit, on every rank.
    fn dqs_en_probe(&self, grp: u32) -> bool {
        self.read_test(grp, PassMode::AnyBit, false, Ranks::All).0
    }

    /// Pushes the VFIFO until two reads have failed, so the later sweeps
    /// start from a known-bad rotation. If that never happens within one
    /// lap of the FIFO the position reached is used anyway.
    fn find_vfifo_read(&self, grp: u32) -> u32 {
        let mut v = 0;
        let mut fail_cnt = 0;

        while v < self.cfg.vfifo_size {
            if !self.dqs_en_probe(grp) {
                fail_cnt += 1;
                if fail_cnt == 2 {
                    break;
                }
            }
            self.incr_vfifo(grp, &mut v);
        }

        if v >= self.cfg.vfifo_size {
            ringbuf_entry_root!(Trace::VfifoNeverFailed { group: grp, v });
        }
        v
    }

    /// Finds the first passing combination, sweeping phase fastest, then
    /// VFIFO, then delay.
    fn find_working_phase(
        &self,
        grp: u32,
        s: &mut PhaseSearch,
        dtaps_per_ptap: u32,
    ) -> bool {
        let io = &self.cfg.io;
        let mut tmp_delay = 0;

        s.d = 0;
        while s.d <= dtaps_per_ptap {
            s.work_bgn = tmp_delay;
            self.scc().set_dqs_en_delay_all_ranks(grp, s.d);

            s.i = 0;
            while s.i < self.cfg.vfifo_size {
                s.p = 0;
                while s.p <= io.dqs_en_phase_max {
                    self.scc().set_dqs_en_phase_all_ranks(grp, s.p);
                    if self.dqs_en_probe(grp) {
                        return true;
                    }
                    s.p += 1;
                    s.work_bgn += io.delay_per_opa_tap;
                }

                self.incr_vfifo(grp, &mut s.v);
                s.i += 1;
            }

            s.d += 1;
            tmp_delay += io.delay_per_dqs_en_dchain_tap;
        }
        false
    }

    /// Steps back by one phase, borrowing a VFIFO cycle at phase zero.
    fn back_up_one_phase(&self, grp: u32, s: &mut PhaseSearch) {
        if s.p == 0 {
            s.p = self.cfg.io.dqs_en_phase_max;
            self.decr_vfifo(grp, &mut s.v);
        } else {
            s.p -= 1;
        }
    }

    /// From a working phase found at delay zero, backs up one phase and
    /// sweeps delay taps to see whether the window opens earlier. Leaves the
    /// phase and VFIFO where they were and the delay at zero.
    fn backup_phase(&self, grp: u32, s: &mut PhaseSearch) {
        let io = &self.cfg.io;

        self.back_up_one_phase(grp, s);
        self.scc().set_dqs_en_phase_all_ranks(grp, s.p);

        s.d = 0;
        if let Some(mut tmp_delay) = s.work_bgn.checked_sub(io.delay_per_opa_tap) {
            while s.d <= io.dqs_en_delay_max && tmp_delay < s.work_bgn {
                self.scc().set_dqs_en_delay_all_ranks(grp, s.d);
                if self.dqs_en_probe(grp) {
                    s.work_bgn = tmp_delay;
                    break;
                }
                s.d += 1;
                tmp_delay += io.delay_per_dqs_en_dchain_tap;
            }
        }

        s.p += 1;
        if s.p > io.dqs_en_phase_max {
            s.p = 0;
            self.incr_vfifo(grp, &mut s.v);
        }

        self.scc().set_dqs_en_delay_all_ranks(grp, 0);
    }

    /// Walks forward in phase taps until a read fails, marking the end of
    /// the window at phase granularity.
    fn nonworking_phase(&self, grp: u32, s: &mut PhaseSearch) -> bool {
        let io = &self.cfg.io;

        s.p += 1;
        s.work_end += io.delay_per_opa_tap;
        if s.p > io.dqs_en_phase_max {
            s.p = 0;
            self.incr_vfifo(grp, &mut s.v);
        }

        while s.i < self.cfg.vfifo_size + 1 {
            while s.p <= io.dqs_en_phase_max {
                self.scc().set_dqs_en_phase_all_ranks(grp, s.p);
                if !self.dqs_en_probe(grp) {
                    return true;
                }
                s.p += 1;
                s.work_end += io.delay_per_opa_tap;
            }

            self.incr_vfifo(grp, &mut s.v);
            s.p = 0;
            s.i += 1;
        }
        false
    }

    /// Parks DQS enable in the middle of `[work_bgn, work_end]`, then
    /// nudges the VFIFO until a read passes there.
    fn find_window_centre(&self, grp: u32, s: &mut PhaseSearch) -> bool {
        let io = &self.cfg.io;
        let opa = io.delay_per_opa_tap as i32;
        let tap = io.delay_per_dqs_en_dchain_tap as i32;

        // Reduce to less than one VFIFO cycle.
        let cycle = (io.dqs_en_phase_max + 1) * io.delay_per_opa_tap;
        let mut work_mid = (s.work_bgn + s.work_end) / 2;
        while work_mid > cycle {
            work_mid -= cycle;
        }
        let work_mid = work_mid as i32;

        let mut tmp_delay = 0;
        s.p = 0;
        while s.p <= io.dqs_en_phase_max && tmp_delay < work_mid {
            s.p += 1;
            tmp_delay += opa;
        }
        tmp_delay -= opa;

        s.d = 0;
        while s.d <= io.dqs_en_delay_max && tmp_delay < work_mid {
            s.d += 1;
            tmp_delay += tap;
        }

        self.scc()
            .set_dqs_en_phase_all_ranks(grp, s.p.saturating_sub(1));
        self.scc().set_dqs_en_delay_all_ranks(grp, s.d);

        // The centre may sit in a different VFIFO rotation from the one the
        // edges were measured in.
        for _ in 0..self.cfg.vfifo_size {
            if self.dqs_en_probe(grp) {
                return true;
            }
            self.incr_vfifo(grp, &mut s.v);
        }
        false
    }

    /// Finds a DQS-enable setting in the middle of the read window for
    /// `grp`, measuring the delay taps per phase tap along the way.
    pub(crate) fn find_dqs_en_phase(&self, grp: u32) -> bool {
        let io = &self.cfg.io;

        self.reg_file_set_sub_stage(CalSubstage::VfifoCenter);

        self.scc().set_dqs_en_delay_all_ranks(grp, 0);
        self.scc().set_dqs_en_phase_all_ranks(grp, 0);

        let mut dtaps_per_ptap =
            io.delay_per_opa_tap / io.delay_per_dqs_en_dchain_tap;

        let mut s = PhaseSearch {
            v: self.find_vfifo_read(grp),
            ..Default::default()
        };

        if !self.find_working_phase(grp, &mut s, dtaps_per_ptap) {
            return false;
        }
        s.work_end = s.work_bgn;

        if s.d == 0 {
            // The window covers a whole phase tap: look for its start a
            // phase earlier, find its end in phase taps, then back off one
            // phase and finish in delay taps.
            self.backup_phase(grp, &mut s);
            if !self.nonworking_phase(grp, &mut s) {
                return false;
            }
            self.back_up_one_phase(grp, &mut s);
            s.work_end -= io.delay_per_opa_tap;
            self.scc().set_dqs_en_phase_all_ranks(grp, s.p);
            s.d = 0;
        }

        while s.d <= io.dqs_en_delay_max {
            self.scc().set_dqs_en_delay_all_ranks(grp, s.d);
            if !self.dqs_en_probe(grp) {
                break;
            }
            s.d += 1;
            s.work_end += io.delay_per_dqs_en_dchain_tap;
        }
        if s.d != 0 {
            s.work_end =
                s.work_end.saturating_sub(io.delay_per_dqs_en_dchain_tap);
        }

        if s.work_end < s.work_bgn {
            return false;
        }

        // Measure dtaps per ptap: back up one phase and find the window's
        // edge again in delay taps.
        self.back_up_one_phase(grp, &mut s);
        self.scc().set_dqs_en_phase_all_ranks(grp, s.p);

        let initial_failing_dtap = s.d;
        let mut found_passing_read = false;
        let mut found_failing_read = false;

        while s.d <= io.dqs_en_delay_max {
            self.scc().set_dqs_en_delay_all_ranks(grp, s.d);
            if self.dqs_en_probe(grp) {
                found_passing_read = true;
                break;
            }
            s.d += 1;
        }

        if found_passing_read {
            s.d += 1;
            while s.d <= io.dqs_en_delay_max {
                self.scc().set_dqs_en_delay_all_ranks(grp, s.d);
                if !self.dqs_en_probe(grp) {
                    found_failing_read = true;
                    break;
                }
                s.d += 1;
            }
        }

        // Otherwise d ran off the end and the static estimate stands.
        if found_passing_read && found_failing_read {
            dtaps_per_ptap = s.d - initial_failing_dtap;
        }
        self.bus.write32(reg_file::DTAPS_PER_PTAP, dtaps_per_ptap);

        ringbuf_entry_root!(Trace::DqsEnWindow {
            group: grp,
            work_bgn: s.work_bgn,
            work_end: s.work_end,
            dtaps_per_ptap,
        });

        self.find_window_centre(grp, &mut s)
    }

    /// Runs the DQS-enable search with the group's DQ input delays spread
    /// across their range, since the DQ path is shorter than DQS. The input
    /// delays are zeroed again afterwards.
    pub(crate) fn sweep_dq_in_delay(&self, read_group: u32, test_bgn: u32) -> bool {
        let cfg = self.cfg;
        let step = cfg.io.io_in_delay_max / (cfg.dq_per_read_dqs - 1);
        let pins = test_bgn..test_bgn + cfg.dq_per_read_dqs;

        let sel = pins.clone().fold(Selection::NONE, Selection::dq);

        for _ in cfg.shadow_sets() {
            for (i, p) in pins.clone().enumerate() {
                self.scc().set_dq_in_delay(p, i as u32 * step);
            }
            self.scc().update(&sel);
        }

        let found = self.find_dqs_en_phase(read_group);

        for _ in cfg.shadow_sets() {
            for p in pins.clone() {
                self.scc().set_dq_in_delay(p, 0);
            }
            self.scc().update(&sel);
        }

        found
    }
}
