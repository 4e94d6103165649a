// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-bit deskew and centering.
//!
//! Each DQ pin of a group gets its own window, measured in delay taps
//! relative to the group's current DQS setting: the left edge is found by
//! delaying DQ, the right edge by delaying DQS. DQS is shared by the whole
//! group, so it is moved by half the narrowest window and every pin is then
//! shifted by how far its own window centre sits from that one.
//!
//! Edges are `None` until a sweep finds them. A pin that ends up without
//! both edges fails the group.

use drv_sdram_cal_api::{CalStage, CalSubstage};
use regbus::RegBus;
use ringbuf::*;

use crate::config::MAX_DQ_PER_DQS;
use crate::rwtest::{PassMode, Ranks};
use crate::scc::Selection;
use crate::{Sequencer, Trace};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct Edge {
    left: Option<i32>,
    right: Option<i32>,
}

impl Edge {
    fn window(&self) -> Option<(i32, i32)> {
        Some((self.left?, self.right?))
    }
}

/// Records one step of the DQ-delay sweep. A pass moves the left edge out;
/// a failure before any pass means the window starts further right.
fn record_left(edges: &mut [Edge], d: i32, mut bit_chk: u32) {
    for e in edges {
        if bit_chk & 1 != 0 {
            e.left = Some(d);
        } else if e.left.is_none() {
            e.right = Some(-(d + 1));
        }
        bit_chk >>= 1;
    }
}

/// Records one step of the DQS-delay sweep.
fn record_right(edges: &mut [Edge], d: i32, mut bit_chk: u32) {
    for e in edges {
        if bit_chk & 1 != 0 {
            e.right = Some(d);
        } else if d == 0 && e.right.is_none() && e.left.is_some() {
            mark_marginal(e);
        } else if e.right.is_none() {
            e.left = Some(-(d + 1));
        }
        bit_chk >>= 1;
    }
}

/// The pin failed at zero DQS delay but passed during the DQ sweep, so its
/// right edge sits just before zero.
fn mark_marginal(e: &mut Edge) {
    if e.right.is_none() && e.left.is_some() {
        e.right = Some(-1);
    }
}

/// A right edge recorded before any left edge was seen is meaningless.
fn drop_unanchored(edges: &mut [Edge]) {
    for e in edges.iter_mut().filter(|e| e.left.is_none()) {
        e.right = None;
    }
}

fn sticky_mask(edges: &[Edge], pred: impl Fn(&Edge) -> bool) -> u32 {
    edges
        .iter()
        .enumerate()
        .filter(|(_, e)| pred(e))
        .fold(0, |m, (i, _)| m | 1 << i)
}

/// Resolved windows, or the index of the first pin that has none.
fn windows(
    edges: &[Edge],
) -> Result<[(i32, i32); MAX_DQ_PER_DQS], usize> {
    let mut win = [(0, 0); MAX_DQ_PER_DQS];
    for (i, e) in edges.iter().enumerate() {
        win[i] = e.window().ok_or(i)?;
    }
    Ok(win)
}

/// Finds the narrowest window. Returns its index, and half of its
/// `left - right`, rounded towards the right.
fn narrowest(win: &[(i32, i32)]) -> (usize, i32) {
    let mut min_index = 0;
    let mut mid_min = win[0].0 - win[0].1;
    for (i, &(l, r)) in win.iter().enumerate().skip(1) {
        if l - r < mid_min {
            mid_min = l - r;
            min_index = i;
        }
    }
    if mid_min > 0 {
        mid_min += 1;
    }
    (min_index, mid_min / 2)
}

/// Per-pin shift that lines its window centre up with the narrowest one,
/// clamped so the resulting delay stays within `0..=max`.
fn pin_shift(
    win: (i32, i32),
    narrowest: (i32, i32),
    bias: i32,
    current: i32,
    max: i32,
) -> i32 {
    let shift = (win.0 - win.1 - (narrowest.0 - narrowest.1)) / 2 + bias;
    if shift + current > max {
        max - current
    } else if shift + current < 0 {
        -current
    } else {
        shift
    }
}

/// Best contiguous passing run seen by the data-mask search.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct DmWindow {
    curr: Option<(i32, i32)>,
    best: Option<(i32, i32)>,
    best_width: i32,
}

impl DmWindow {
    fn pass(&mut self, pos: i32) {
        let bgn = self.curr.map_or(pos, |(b, _)| b);
        self.curr = Some((bgn, pos));
        let width = pos - bgn + 1;
        if width > self.best_width {
            self.best_width = width;
            self.best = Some((bgn, pos));
        }
    }

    fn miss(&mut self) {
        self.curr = None;
    }
}

impl<B: RegBus> Sequencer<'_, B> {
    /// One sample of a read-window sweep. Returns whether the sweep may
    /// stop here (no bit passed) and the per-bit pass mask of `read_group`.
    fn read_window_probe(
        &self,
        rank_bgn: u32,
        write_group: u32,
        read_group: u32,
        use_read_test: bool,
    ) -> (bool, u32) {
        let ranks = Ranks::ShadowSet(rank_bgn);
        if use_read_test {
            let (pass, bits) =
                self.read_test(read_group, PassMode::AnyBit, false, ranks);
            (!pass, bits)
        } else {
            let (_, bits) =
                self.write_test(write_group, false, PassMode::AnyBit, ranks);
            let rg_in_wg = read_group - self.cfg.first_read_group(write_group);
            let bits = (bits >> (self.cfg.dq_per_read_dqs * rg_in_wg))
                & self.param.read_correct_mask;
            (bits == 0, bits)
        }
    }

    /// Deskews the DQ inputs of `read_group` and centres its DQS input
    /// delay in the combined window, using either read tests or write and
    /// read-back tests. With `update_fom`, the margins are added to the
    /// read figure of merit.
    pub(crate) fn vfifo_center(
        &mut self,
        rank_bgn: u32,
        write_group: u32,
        read_group: u32,
        test_bgn: u32,
        use_read_test: bool,
        update_fom: bool,
    ) -> bool {
        let cfg = self.cfg;
        let io = &cfg.io;
        let n = cfg.dq_per_read_dqs as usize;
        let io_in_max = io.io_in_delay_max as i32;
        let shift_en = io.shift_dqs_en_when_shift_dqs;

        let start_dqs = self.scc().dqs_bus_in_delay(read_group) as i32;
        let start_dqs_en = self.scc().dqs_en_delay(read_group) as i32;

        let mut edges = [Edge::default(); MAX_DQ_PER_DQS];
        let edges = &mut edges[..n];
        let mut sticky = 0;

        for d in 0..=io_in_max {
            let sel = self.scc().apply_group_dq_in_delay(test_bgn, d as u32);
            self.scc().update(&sel);

            let (stop, bit_chk) = self.read_window_probe(
                rank_bgn,
                write_group,
                read_group,
                use_read_test,
            );
            sticky |= bit_chk;
            if stop && sticky == self.param.read_correct_mask {
                break;
            }
            record_left(edges, d, bit_chk);
        }

        let sel = self.scc().apply_group_dq_in_delay(test_bgn, 0);
        self.scc().update(&sel);
        drop_unanchored(edges);
        sticky = sticky_mask(edges, |e| e.window().is_some());

        let dqs_span = (io.dqs_in_delay_max as i32 - start_dqs).max(0);
        for d in 0..=dqs_span {
            self.scc()
                .set_dqs_bus_in_delay(read_group, (d + start_dqs) as u32);
            if shift_en {
                let delay = ((d + start_dqs_en) as u32).min(io.dqs_en_delay_max);
                self.scc().set_dqs_en_delay(read_group, delay);
            }
            self.scc().update(&Selection::NONE.dqs(read_group));

            let (stop, bit_chk) = self.read_window_probe(
                rank_bgn,
                write_group,
                read_group,
                use_read_test,
            );
            sticky |= bit_chk;
            if stop && sticky == self.param.read_correct_mask {
                break;
            }
            record_right(edges, d, bit_chk);
        }

        let win = match windows(edges) {
            Ok(win) => win,
            Err(i) => {
                // Put DQS back so the caller can retry at another phase.
                self.scc().set_dqs_bus_in_delay(read_group, start_dqs as u32);
                if shift_en {
                    self.scc()
                        .set_dqs_en_delay(read_group, start_dqs_en as u32);
                }
                self.scc().update(&Selection::NONE.dqs(read_group));

                let stage = if use_read_test {
                    CalStage::Vfifo
                } else {
                    CalStage::VfifoAfterWrites
                };
                let _ = self.fail(
                    read_group * cfg.dq_per_read_dqs + i as u32,
                    stage,
                    CalSubstage::VfifoCenter,
                );
                return false;
            }
        };
        let win = &win[..n];

        let (min_index, orig_mid_min) = narrowest(win);

        // DQS moves by -mid_min, as far as its own range (and the enable
        // delay that moves with it) allows.
        let new_dqs =
            (start_dqs - orig_mid_min).clamp(0, io.dqs_in_delay_max as i32);
        let mut mid_min = start_dqs - new_dqs;
        if shift_en {
            let en_max = io.dqs_en_delay_max as i32;
            if start_dqs_en - mid_min > en_max {
                mid_min += start_dqs_en - mid_min - en_max;
            } else if start_dqs_en - mid_min < 0 {
                mid_min += start_dqs_en - mid_min;
            }
        }
        let new_dqs = start_dqs - mid_min;

        let mut dq_margin = io_in_max + 1;
        let mut dqs_margin = io_in_max + 1;
        let mut sel = Selection::NONE.dqs(read_group);

        for (i, &w) in win.iter().enumerate() {
            let p = test_bgn + i as u32;
            let current = self.scc().dq_in_delay(p) as i32;
            let shift = pin_shift(
                w,
                win[min_index],
                orig_mid_min - mid_min,
                current,
                io_in_max,
            );
            self.scc().set_dq_in_delay(p, (current + shift) as u32);
            sel = sel.dq(p);

            dq_margin = dq_margin.min(w.0 - shift - mid_min);
            dqs_margin = dqs_margin.min(w.1 + shift + mid_min);
        }

        if shift_en {
            self.scc()
                .set_dqs_en_delay(read_group, (start_dqs_en - mid_min) as u32);
        }
        self.scc().set_dqs_bus_in_delay(read_group, new_dqs as u32);
        self.scc().update(&sel);

        if update_fom {
            self.gbl.fom_in += dq_margin + dqs_margin;
        }

        ringbuf_entry_root!(Trace::ReadCentered {
            group: read_group,
            dqs: new_dqs as u32,
            dq_margin,
            dqs_margin,
        });

        dq_margin >= 0 && dqs_margin >= 0
    }

    /// Deskews the DQ outputs of `write_group` against its DQS output, then
    /// centres the data-mask outputs. DQS itself stays where it is. The
    /// margins always count towards the write figure of merit.
    pub(crate) fn writes_center(
        &mut self,
        rank_bgn: u32,
        write_group: u32,
        test_bgn: u32,
    ) -> bool {
        let cfg = self.cfg;
        let n = cfg.dq_per_write_dqs as usize;
        let max = cfg.io.io_out1_delay_max as i32;
        let ranks = Ranks::ShadowSet(rank_bgn);
        let mask = self.param.write_correct_mask;

        let start_dqs = self.scc().dqs_out1_delay() as i32;

        let mut edges = [Edge::default(); MAX_DQ_PER_DQS];
        let edges = &mut edges[..n];
        let mut sticky = 0;

        for d in 0..=max {
            let sel = self.scc().apply_group_dq_out1_delay(d as u32);
            self.scc().update(&sel);

            let (pass, bit_chk) =
                self.write_test(write_group, false, PassMode::AnyBit, ranks);
            sticky |= bit_chk;
            if !pass && sticky == mask {
                break;
            }
            record_left(edges, d, bit_chk);
        }

        let sel = self.scc().apply_group_dq_out1_delay(0);
        self.scc().update(&sel);
        drop_unanchored(edges);
        sticky = sticky_mask(edges, |e| e.left.is_some());

        for d in 0..=(max - start_dqs).max(0) {
            let sel = self
                .scc()
                .apply_group_dqs_io_and_oct_out1(write_group, (d + start_dqs) as u32);
            self.scc().update(&sel);

            let (pass, bit_chk) =
                self.write_test(write_group, false, PassMode::AnyBit, ranks);
            sticky |= bit_chk;
            if !pass && sticky == mask {
                if d == 0 {
                    edges.iter_mut().for_each(mark_marginal);
                }
                break;
            }
            record_right(edges, d, bit_chk);
        }

        let win = match windows(edges) {
            Ok(win) => win,
            Err(i) => {
                let _ = self.fail(
                    test_bgn + i as u32,
                    CalStage::Writes,
                    CalSubstage::WritesCenter,
                );
                return false;
            }
        };
        let win = &win[..n];

        // DQS does not move on the write side; the whole correction goes
        // into the DQ delays.
        let (min_index, orig_mid_min) = narrowest(win);
        let new_dqs = start_dqs;

        let mut dq_margin = max + 1;
        let mut dqs_margin = max + 1;
        let mut sel = Selection::NONE;

        for (i, &w) in win.iter().enumerate() {
            let pin = i as u32;
            let current = self.scc().dq_out1_delay(pin) as i32;
            let shift =
                pin_shift(w, win[min_index], orig_mid_min, current, max);
            self.scc().set_dq_out1_delay(pin, (current + shift) as u32);
            sel = sel.dq(pin);

            dq_margin = dq_margin.min(w.0 - shift);
            dqs_margin = dqs_margin.min(w.1 + shift);
        }

        let sel = sel.union(
            self.scc()
                .apply_group_dqs_io_and_oct_out1(write_group, new_dqs as u32),
        );
        self.scc().update(&sel);

        let dm_margin = self.center_dm(write_group, new_dqs, ranks);

        self.gbl.fom_out += dq_margin + dqs_margin;

        ringbuf_entry_root!(Trace::WriteCentered {
            group: write_group,
            dqs: new_dqs as u32,
            dq_margin,
            dqs_margin,
            dm_margin,
        });

        dq_margin >= 0 && dqs_margin >= 0 && dm_margin >= 0
    }

    /// Centres the data-mask output delay. The window is searched first by
    /// delaying DM against the fixed DQS, then by delaying DQS against an
    /// undelayed DM; a run that reaches zero DM delay carries over into the
    /// second pass. Returns the DM margin, or -1 if no window was found.
    fn center_dm(&self, write_group: u32, new_dqs: i32, ranks: Ranks) -> i32 {
        let max = self.cfg.io.io_out1_delay_max as i32;
        let dm_test = |this: &Self| {
            this.write_test(write_group, true, PassMode::AllBits, ranks).0
        };

        let mut w = DmWindow::default();

        for d in (0..=max).rev() {
            let sel = self.scc().apply_group_dm_out1_delay(d as u32);
            self.scc().update(&sel);
            if dm_test(self) {
                w.pass(-d);
            } else {
                w.miss();
            }
        }

        let sel = self.scc().apply_group_dm_out1_delay(0);
        self.scc().update(&sel);

        if !matches!(w.curr, Some((_, 0))) {
            w.miss();
        }

        for d in 0..=(max - new_dqs).max(0) {
            let sel = self
                .scc()
                .apply_group_dqs_io_and_oct_out1(write_group, (d + new_dqs) as u32);
            self.scc().update(&sel);
            if dm_test(self) {
                w.pass(d);
            } else {
                w.miss();
                // Nothing left to sweep can beat the best run.
                if w.best_width - 1 > max - new_dqs - d {
                    break;
                }
            }
        }

        let restore = self
            .scc()
            .apply_group_dqs_io_and_oct_out1(write_group, new_dqs as u32);

        // DM only moves right, since DQ and DQS stay put.
        let (mid, dm_margin) = match w.best {
            Some((bgn, end)) => {
                let (left, right) = (-bgn, end);
                let mid = ((left - right) / 2).max(0);
                (mid, left - mid)
            }
            None => (0, -1),
        };

        let sel = self.scc().apply_group_dm_out1_delay(mid as u32);
        self.scc().update(&restore.union(sel));

        dm_margin
    }
}
