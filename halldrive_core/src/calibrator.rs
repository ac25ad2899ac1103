//! Sector calibrator: learns and applies per-magnet period corrections.
//!
//! The magnets on a Hall wheel are never perfectly spaced, so the raw
//! period measured at sector `k` carries a systematic bias. This module
//! owns a correction LUT per travel direction (`s[k]`, multiplicative),
//! the normalized expected-shape pattern derived from it, and the phase
//! offset between the running sector index and that pattern. All of it is
//! persisted through a `KvStore` and survives power cycles; on boot the
//! offset is re-learned by circular pattern matching (alignment).
//!
//! ## Persistence layout (per wheel namespace)
//!
//! - `use_fwd`, `use_rev`: 1 byte, 0/1
//! - `off_fwd`, `off_rev`: u16 little-endian
//! - `lut_fwd`, `lut_rev`: PPR x f32 little-endian, contiguous
//! - legacy `lut` + `use_lut`: recognized on read for migration only

use crate::error::StartError;
use halldrive_traits::KvStore;
use tracing::{debug, info, warn};

const KEY_USE_FWD: &str = "use_fwd";
const KEY_USE_REV: &str = "use_rev";
const KEY_OFF_FWD: &str = "off_fwd";
const KEY_OFF_REV: &str = "off_rev";
const KEY_LUT_FWD: &str = "lut_fwd";
const KEY_LUT_REV: &str = "lut_rev";
const KEY_LEGACY_LUT: &str = "lut";
const KEY_LEGACY_USE: &str = "use_lut";

/// A pattern carries structure once its raw range exceeds this.
const PATTERN_READY_RANGE: f32 = 1e-3;

#[derive(Debug, Clone)]
pub struct CalibratorCfg {
    /// Wheel namespace, e.g. "encR" / "encL". Informational here; the store
    /// handed in is already scoped to it.
    pub namespace: String,
    /// Sectors per revolution.
    pub ppr: u16,
    /// Upper bound on laps per run (buffer arena is ppr x max_laps).
    pub max_laps: u8,
    /// Use flag applied when nothing is persisted yet.
    pub use_lut_by_default: bool,
}

impl Default for CalibratorCfg {
    fn default() -> Self {
        Self {
            namespace: "enc".to_string(),
            ppr: 8,
            max_laps: 12,
            use_lut_by_default: true,
        }
    }
}

/// Travel direction selecting which LUT/pattern/offset applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LutDir {
    Forward,
    Reverse,
}

impl LutDir {
    #[inline]
    pub fn from_step(step_dir: i8) -> Self {
        if step_dir >= 0 {
            LutDir::Forward
        } else {
            LutDir::Reverse
        }
    }
}

#[derive(Debug)]
struct LutSide {
    lut: Vec<f32>,
    pattern: Vec<f32>,
    pattern_ready: bool,
    use_lut: bool,
    offset: u16,
}

impl LutSide {
    fn neutral(ppr: u16, use_lut: bool) -> Self {
        Self {
            lut: vec![1.0; ppr as usize],
            pattern: vec![1.0; ppr as usize],
            pattern_ready: false,
            use_lut,
            offset: 0,
        }
    }
}

#[derive(Debug, Default)]
struct RunState {
    active: bool,
    target: u8,
    lap: u8,
}

/// Owns the dual LUTs, patterns, offsets and the calibration/alignment
/// state machines. The estimator feeds it raw periods; the wheel starts and
/// polls runs.
pub struct SectorCalibrator {
    cfg: CalibratorCfg,
    store: Box<dyn KvStore>,

    fwd: LutSide,
    rev: LutSide,

    calib: RunState,
    calib_dir: LutDir,
    dt_buf: Vec<f32>,    // [ppr x max_laps]
    dt_filled: Vec<bool>, // [ppr x max_laps]

    align: RunState,
    align_dir: LutDir,
    align_buf: Vec<f32>, // [ppr x max_laps]
}

impl std::fmt::Debug for SectorCalibrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectorCalibrator")
            .field("namespace", &self.cfg.namespace)
            .field("ppr", &self.cfg.ppr)
            .field("use_fwd", &self.fwd.use_lut)
            .field("use_rev", &self.rev.use_lut)
            .field("calibrating", &self.calib.active)
            .field("aligning", &self.align.active)
            .finish()
    }
}

#[inline]
fn cell(k: u16, lap: u8, ppr: u16) -> usize {
    k as usize + lap as usize * ppr as usize
}

impl SectorCalibrator {
    /// The buffer arenas are sized once here; nothing reallocates later.
    /// `max_laps` is clamped to 1..=12 (the arena bound).
    pub fn new(cfg: CalibratorCfg, store: Box<dyn KvStore>) -> Self {
        let ppr = cfg.ppr.max(1);
        let max_laps = cfg.max_laps.clamp(1, 12);
        let cells = ppr as usize * max_laps as usize;
        let use_default = cfg.use_lut_by_default;
        Self {
            cfg: CalibratorCfg { ppr, max_laps, ..cfg },
            store,
            fwd: LutSide::neutral(ppr, use_default),
            rev: LutSide::neutral(ppr, use_default),
            calib: RunState::default(),
            calib_dir: LutDir::Forward,
            dt_buf: vec![0.0; cells],
            dt_filled: vec![false; cells],
            align: RunState::default(),
            align_dir: LutDir::Forward,
            align_buf: vec![0.0; cells],
        }
    }

    // ---------------- persistence ----------------

    /// Populate LUTs, flags and offsets from the store. Never fails the
    /// boot path: store errors and wrong-sized records degrade to neutral
    /// values. Recognizes the legacy single-LUT layout and migrates it in
    /// memory (the legacy keys are never written back).
    pub fn load(&mut self) {
        let ppr = self.cfg.ppr;
        let use_default = self.cfg.use_lut_by_default;

        let lut_fwd = self.read_lut(KEY_LUT_FWD);
        let lut_rev = self.read_lut(KEY_LUT_REV);

        if lut_fwd.is_none() && lut_rev.is_none() {
            if let Some(legacy) = self.read_lut(KEY_LEGACY_LUT) {
                let legacy_use = self.read_bool(KEY_LEGACY_USE).unwrap_or(use_default);
                self.fwd = LutSide::neutral(ppr, legacy_use);
                self.fwd.lut = legacy;
                self.rev = LutSide::neutral(ppr, legacy_use);
                self.rebuild_pattern(LutDir::Forward);
                self.rebuild_pattern(LutDir::Reverse);
                info!(
                    namespace = %self.cfg.namespace,
                    "migrated legacy single-LUT layout into forward direction"
                );
                return;
            }
        }

        self.fwd.lut = lut_fwd.unwrap_or_else(|| vec![1.0; ppr as usize]);
        self.rev.lut = lut_rev.unwrap_or_else(|| vec![1.0; ppr as usize]);
        self.fwd.use_lut = self.read_bool(KEY_USE_FWD).unwrap_or(use_default);
        self.rev.use_lut = self.read_bool(KEY_USE_REV).unwrap_or(use_default);
        self.fwd.offset = self.read_u16(KEY_OFF_FWD).map(|o| o % ppr).unwrap_or(0);
        self.rev.offset = self.read_u16(KEY_OFF_REV).map(|o| o % ppr).unwrap_or(0);
        self.rebuild_pattern(LutDir::Forward);
        self.rebuild_pattern(LutDir::Reverse);
        debug!(
            namespace = %self.cfg.namespace,
            use_fwd = self.fwd.use_lut,
            use_rev = self.rev.use_lut,
            off_fwd = self.fwd.offset,
            off_rev = self.rev.offset,
            "calibration state loaded"
        );
    }

    /// Persist LUTs, use flags and offsets, then rebuild both patterns.
    pub fn save(&mut self) -> crate::error::Result<()> {
        let res = self.write_all();
        self.rebuild_pattern(LutDir::Forward);
        self.rebuild_pattern(LutDir::Reverse);
        res
    }

    fn write_all(&mut self) -> crate::error::Result<()> {
        self.put_bool(KEY_USE_FWD, self.fwd.use_lut)?;
        self.put_bool(KEY_USE_REV, self.rev.use_lut)?;
        self.put_u16(KEY_OFF_FWD, self.fwd.offset)?;
        self.put_u16(KEY_OFF_REV, self.rev.offset)?;
        let lut_fwd = self.fwd.lut.clone();
        let lut_rev = self.rev.lut.clone();
        self.put_lut(KEY_LUT_FWD, &lut_fwd)?;
        self.put_lut(KEY_LUT_REV, &lut_rev)?;
        Ok(())
    }

    /// Back to factory state: neutral LUTs, flags off, offsets zero,
    /// persisted.
    pub fn clear(&mut self) -> crate::error::Result<()> {
        let ppr = self.cfg.ppr;
        self.fwd = LutSide::neutral(ppr, false);
        self.rev = LutSide::neutral(ppr, false);
        info!(namespace = %self.cfg.namespace, "calibration cleared");
        self.save()
    }

    // ---------------- correction ----------------

    /// Correct a raw period measured at sector `k`: `dt * s[(k + off) % ppr]`
    /// for the LUT selected by `step_dir`, or the input unchanged when that
    /// direction's use flag is off.
    #[inline]
    pub fn correct_dt(&self, k: u16, dt_us: f32, step_dir: i8) -> f32 {
        let side = self.side(LutDir::from_step(step_dir));
        if !side.use_lut {
            return dt_us;
        }
        let idx = (u32::from(k) + u32::from(side.offset)) % u32::from(self.cfg.ppr);
        dt_us * side.lut[idx as usize]
    }

    // ---------------- state queries ----------------

    pub fn is_calibrating(&self) -> bool {
        self.calib.active
    }

    pub fn is_aligning(&self) -> bool {
        self.align.active
    }

    pub fn pattern_ready(&self, step_dir: i8) -> bool {
        self.side(LutDir::from_step(step_dir)).pattern_ready
    }

    pub fn use_lut(&self, step_dir: i8) -> bool {
        self.side(LutDir::from_step(step_dir)).use_lut
    }

    pub fn set_use_lut(&mut self, step_dir: i8, on: bool) {
        self.side_mut(LutDir::from_step(step_dir)).use_lut = on;
    }

    pub fn lut(&self, step_dir: i8) -> &[f32] {
        &self.side(LutDir::from_step(step_dir)).lut
    }

    pub fn pattern(&self, step_dir: i8) -> &[f32] {
        &self.side(LutDir::from_step(step_dir)).pattern
    }

    pub fn offset(&self, step_dir: i8) -> u16 {
        self.side(LutDir::from_step(step_dir)).offset
    }

    pub fn ppr(&self) -> u16 {
        self.cfg.ppr
    }

    pub fn max_laps(&self) -> u8 {
        self.cfg.max_laps
    }

    // ---------------- calibration ----------------

    /// Arm a multi-lap calibration in the given direction.
    pub fn start_calibration(&mut self, laps: u8, step_dir: i8) -> Result<(), StartError> {
        if self.calib.active {
            return Err(StartError::Busy);
        }
        if laps == 0 || laps > self.cfg.max_laps {
            return Err(StartError::InvalidLaps);
        }
        self.calib_dir = LutDir::from_step(step_dir);
        self.calib = RunState {
            active: true,
            target: laps,
            lap: 0,
        };
        let cells = self.cfg.ppr as usize * laps as usize;
        self.dt_buf[..cells].fill(0.0);
        self.dt_filled[..cells].fill(false);
        debug!(laps, dir = ?self.calib_dir, "calibration start");
        Ok(())
    }

    /// Arm a multi-lap alignment. Requires the direction's pattern.
    pub fn start_alignment(&mut self, laps: u8, step_dir: i8) -> Result<(), StartError> {
        if self.align.active {
            return Err(StartError::Busy);
        }
        if laps == 0 || laps > self.cfg.max_laps {
            return Err(StartError::InvalidLaps);
        }
        let dir = LutDir::from_step(step_dir);
        if !self.side(dir).pattern_ready {
            return Err(StartError::PatternNotReady);
        }
        self.align_dir = dir;
        self.align = RunState {
            active: true,
            target: laps,
            lap: 0,
        };
        let cells = self.cfg.ppr as usize * laps as usize;
        self.align_buf[..cells].fill(0.0);
        debug!(laps, dir = ?self.align_dir, "alignment start");
        Ok(())
    }

    /// Store one raw period sample for sector `k`; services whichever state
    /// machines are active. A lap completes when the last sector is seen.
    pub fn feed_period(&mut self, k: u16, dt_us: f32) {
        if k >= self.cfg.ppr {
            warn!(k, ppr = self.cfg.ppr, "sector index out of range; sample dropped");
            return;
        }
        let last = self.cfg.ppr - 1;

        if self.calib.active && self.calib.lap < self.calib.target {
            let id = cell(k, self.calib.lap, self.cfg.ppr);
            self.dt_buf[id] = dt_us;
            self.dt_filled[id] = true;
            if k == last {
                self.calib.lap += 1;
                debug!(lap = self.calib.lap, target = self.calib.target, "calibration lap");
            }
        }

        if self.align.active && self.align.lap < self.align.target {
            let id = cell(k, self.align.lap, self.cfg.ppr);
            self.align_buf[id] = dt_us;
            if k == last {
                self.align.lap += 1;
                debug!(lap = self.align.lap, target = self.align.target, "alignment lap");
            }
        }
    }

    /// Once all laps are in: trimmed mean per sector, LUT = global mean /
    /// sector mean, pattern rebuild, persist. Returns true when the LUT was
    /// updated; a run with zero usable samples aborts without touching it.
    pub fn finish_calibration_if_ready(&mut self) -> bool {
        if !self.calib.active || self.calib.lap < self.calib.target {
            return false;
        }
        let ppr = self.cfg.ppr;
        let target = self.calib.target;
        self.calib.active = false;

        let mut sector_mean = vec![0.0f32; ppr as usize];
        let mut global_sum = 0.0f32;
        let mut global_count = 0u32;
        let mut samples = [0.0f32; 16]; // max_laps <= 12
        for k in 0..ppr {
            let mut n = 0usize;
            for lap in 0..target {
                let id = cell(k, lap, ppr);
                if self.dt_filled[id] {
                    samples[n] = self.dt_buf[id];
                    n += 1;
                }
            }
            let mk = trimmed_mean(&samples[..n]);
            sector_mean[k as usize] = mk;
            if mk > 0.0 {
                global_sum += mk;
                global_count += 1;
            }
        }

        if global_count == 0 {
            warn!("calibration finished with no usable samples; LUT untouched");
            return false;
        }

        let global_mean = global_sum / global_count as f32;
        let dir = self.calib_dir;
        {
            let side = self.side_mut(dir);
            for k in 0..ppr as usize {
                let mk = if sector_mean[k] > 0.0 {
                    sector_mean[k]
                } else {
                    global_mean
                };
                side.lut[k] = global_mean / mk;
            }
        }
        self.rebuild_pattern(dir);
        if let Err(e) = self.save() {
            warn!(error = %e, "calibration computed but persisting failed");
        }

        let side = self.side(dir);
        let (mut minv, mut maxv, mut sum) = (f32::INFINITY, f32::NEG_INFINITY, 0.0f32);
        for &s in &side.lut {
            minv = minv.min(s);
            maxv = maxv.max(s);
            sum += s;
        }
        info!(
            dir = ?dir,
            min = minv,
            max = maxv,
            mean = sum / ppr as f32,
            "calibration complete, LUT saved"
        );
        true
    }

    // ---------------- alignment ----------------

    /// Once all laps are in: per-lap circular shift search, plurality vote
    /// across laps (ties fall back to the best single-lap shift), persist
    /// the offset. Returns `(offset, best_score)`; a run where every lap
    /// had a zero sum aborts without touching the offset.
    pub fn finish_alignment_if_ready(&mut self) -> Option<(u16, f32)> {
        if !self.align.active || self.align.lap < self.align.target {
            return None;
        }
        let ppr = self.cfg.ppr;
        let target = self.align.target;
        self.align.active = false;

        let mut votes = vec![0u16; ppr as usize];
        let mut best_global_off = 0u16;
        let mut best_global_score = f32::INFINITY;
        let mut any = false;
        for lap in 0..target {
            if let Some((off, score)) = self.best_offset_single_lap(lap) {
                votes[off as usize] += 1;
                if score < best_global_score {
                    best_global_score = score;
                    best_global_off = off;
                }
                any = true;
                debug!(lap = lap + 1, off, score, "alignment lap result");
            }
        }

        if !any {
            warn!("alignment finished with no usable laps; offset untouched");
            return None;
        }

        let max_votes = votes.iter().copied().max().unwrap_or(0);
        let winners = votes.iter().filter(|&&v| v == max_votes).count();
        let final_off = if winners == 1 {
            votes
                .iter()
                .position(|&v| v == max_votes)
                .map(|i| i as u16)
                .unwrap_or(best_global_off)
        } else {
            best_global_off
        };

        let dir = self.align_dir;
        self.side_mut(dir).offset = final_off;
        if let Err(e) = self.save() {
            warn!(error = %e, "alignment computed but persisting failed");
        }
        info!(dir = ?dir, offset = final_off, score = best_global_score, "alignment complete");
        Some((final_off, best_global_score))
    }

    /// Normalize one recorded lap by its mean and find the circular shift
    /// of the pattern that minimizes per-sector L1 distance.
    fn best_offset_single_lap(&self, lap: u8) -> Option<(u16, f32)> {
        let ppr = self.cfg.ppr;
        let pattern = &self.side(self.align_dir).pattern;

        let mut sum = 0.0f32;
        for k in 0..ppr {
            sum += self.align_buf[cell(k, lap, ppr)];
        }
        if sum <= 0.0 {
            return None;
        }
        let mean = sum / ppr as f32;

        let mut best_off = 0u16;
        let mut best_score = f32::INFINITY;
        for shift in 0..ppr {
            let mut err = 0.0f32;
            for k in 0..ppr {
                let win = self.align_buf[cell(k, lap, ppr)] / mean;
                let expect = pattern[((k + shift) % ppr) as usize];
                err += (win - expect).abs();
            }
            let score = err / ppr as f32;
            if score < best_score {
                best_score = score;
                best_off = shift;
            }
        }
        Some((best_off, best_score))
    }

    // ---------------- pattern ----------------

    /// pattern[k] = (1/s[k]) / mean(1/s[.]); readiness comes from the raw
    /// reciprocal range so a neutral LUT never reads as having structure.
    fn rebuild_pattern(&mut self, dir: LutDir) {
        let ppr = self.cfg.ppr;
        let side = self.side_mut(dir);
        let mut sum = 0.0f32;
        let mut minv = f32::INFINITY;
        let mut maxv = f32::NEG_INFINITY;
        for k in 0..ppr as usize {
            let s = side.lut[k];
            let p = if s != 0.0 { 1.0 / s } else { 1.0 };
            side.pattern[k] = p;
            sum += p;
            minv = minv.min(p);
            maxv = maxv.max(p);
        }
        let mut mean = if sum > 0.0 { sum / ppr as f32 } else { 1.0 };
        if mean <= 0.0 {
            mean = 1.0;
        }
        for p in &mut side.pattern {
            *p /= mean;
        }
        side.pattern_ready = (maxv - minv) > PATTERN_READY_RANGE;
        debug!(dir = ?dir, ready = side.pattern_ready, range = maxv - minv, "pattern rebuilt");
    }

    // ---------------- store helpers ----------------

    fn side(&self, dir: LutDir) -> &LutSide {
        match dir {
            LutDir::Forward => &self.fwd,
            LutDir::Reverse => &self.rev,
        }
    }

    fn side_mut(&mut self, dir: LutDir) -> &mut LutSide {
        match dir {
            LutDir::Forward => &mut self.fwd,
            LutDir::Reverse => &mut self.rev,
        }
    }

    fn read_raw(&mut self, key: &str) -> Option<Vec<u8>> {
        match self.store.get(key) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "store read failed; using defaults");
                None
            }
        }
    }

    fn read_bool(&mut self, key: &str) -> Option<bool> {
        let bytes = self.read_raw(key)?;
        match bytes.as_slice() {
            [b] => Some(*b != 0),
            _ => {
                warn!(key, len = bytes.len(), "wrong-sized bool record ignored");
                None
            }
        }
    }

    fn read_u16(&mut self, key: &str) -> Option<u16> {
        let bytes = self.read_raw(key)?;
        match bytes.as_slice() {
            [a, b] => Some(u16::from_le_bytes([*a, *b])),
            _ => {
                warn!(key, len = bytes.len(), "wrong-sized u16 record ignored");
                None
            }
        }
    }

    fn read_lut(&mut self, key: &str) -> Option<Vec<f32>> {
        let want = self.cfg.ppr as usize * 4;
        let bytes = self.read_raw(key)?;
        if bytes.len() != want {
            if !bytes.is_empty() {
                warn!(key, len = bytes.len(), want, "wrong-sized LUT record ignored");
            }
            return None;
        }
        Some(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    fn put_bool(&mut self, key: &str, v: bool) -> crate::error::Result<()> {
        self.store
            .put(key, &[u8::from(v)])
            .map_err(|e| eyre::Report::msg(format!("store write {key}: {e}")))
    }

    fn put_u16(&mut self, key: &str, v: u16) -> crate::error::Result<()> {
        self.store
            .put(key, &v.to_le_bytes())
            .map_err(|e| eyre::Report::msg(format!("store write {key}: {e}")))
    }

    fn put_lut(&mut self, key: &str, lut: &[f32]) -> crate::error::Result<()> {
        let mut bytes = Vec::with_capacity(lut.len() * 4);
        for v in lut {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        self.store
            .put(key, &bytes)
            .map_err(|e| eyre::Report::msg(format!("store write {key}: {e}")))
    }
}

/// Robust per-sector aggregate: plain mean up to two samples, otherwise the
/// single minimum and single maximum are discarded first.
fn trimmed_mean(vals: &[f32]) -> f32 {
    let n = vals.len();
    if n == 0 {
        return 0.0;
    }
    if n <= 2 {
        return vals.iter().sum::<f32>() / n as f32;
    }
    let mut i_min = 0usize;
    let mut i_max = 0usize;
    for (i, &v) in vals.iter().enumerate().skip(1) {
        if v < vals[i_min] {
            i_min = i;
        }
        if v > vals[i_max] {
            i_max = i;
        }
    }
    let mut sum = 0.0f32;
    let mut cnt = 0u32;
    for (i, &v) in vals.iter().enumerate() {
        if i == i_min || i == i_max {
            continue;
        }
        sum += v;
        cnt += 1;
    }
    if cnt > 0 {
        sum / cnt as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trimmed_mean_drops_single_extremes() {
        assert_eq!(trimmed_mean(&[]), 0.0);
        assert_eq!(trimmed_mean(&[4.0]), 4.0);
        assert_eq!(trimmed_mean(&[4.0, 6.0]), 5.0);
        // min=1, max=100 dropped; mean of {10, 12}
        assert_eq!(trimmed_mean(&[1.0, 10.0, 12.0, 100.0]), 11.0);
        // duplicated extremes: only one of each is dropped
        assert_eq!(trimmed_mean(&[1.0, 1.0, 1.0]), 1.0);
    }

    #[test]
    fn lut_dir_from_step_sign() {
        assert_eq!(LutDir::from_step(1), LutDir::Forward);
        assert_eq!(LutDir::from_step(0), LutDir::Forward);
        assert_eq!(LutDir::from_step(-1), LutDir::Reverse);
    }
}
