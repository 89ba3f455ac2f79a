//! Click-free joining of consecutive speech clips.
//!
//! The last `tail_len` samples of each clip are held back instead of being
//! written. When the next clip arrives, the held tail and the clip's head are
//! blended with complementary linear ramps, so each boundary costs exactly
//! the overlap length. If no clip follows, [`CrossFader::flush`] releases
//! the tail unblended.

/// Running cross-fade state between clips.
#[derive(Debug, Clone)]
pub struct CrossFader {
    tail_len: usize,
    held: Vec<i16>,
}

impl CrossFader {
    /// `tail_len` is the cross-fade length in samples (0 disables blending).
    pub fn new(tail_len: usize) -> Self {
        Self {
            tail_len,
            held: Vec::with_capacity(tail_len),
        }
    }

    pub fn tail_len(&self) -> usize {
        self.tail_len
    }

    /// Samples currently held back for the next boundary.
    pub fn held(&self) -> &[i16] {
        &self.held
    }

    /// Joins `clip` onto the stream and returns the samples ready to play.
    ///
    /// The overlap is clamped to the shorter of the held tail, the clip and
    /// the configured tail length, so short clips never index past their end.
    pub fn join(&mut self, clip: &[i16]) -> Vec<i16> {
        if clip.is_empty() {
            return Vec::new();
        }
        let overlap = self.held.len().min(clip.len()).min(self.tail_len);
        let lead = self.held.len() - overlap;

        let mut out = Vec::with_capacity(lead + clip.len());
        out.extend_from_slice(&self.held[..lead]);
        out.extend(blend(&self.held[lead..], &clip[..overlap]));

        let rest = &clip[overlap..];
        let keep = self.tail_len.min(rest.len());
        let split = rest.len() - keep;
        out.extend_from_slice(&rest[..split]);

        self.held.clear();
        if keep > 0 {
            self.held.extend_from_slice(&rest[split..]);
        } else if overlap > 0 {
            // The clip was swallowed by the blend; keep the blended end as the tail
            let blended_start = out.len() - overlap;
            self.held.extend(out.drain(blended_start..));
        }
        out
    }

    /// Releases the held tail unblended and empties the state.
    pub fn flush(&mut self) -> Vec<i16> {
        std::mem::take(&mut self.held)
    }

    /// Drops the held tail, so the next clip starts fresh.
    pub fn reset(&mut self) {
        self.held.clear();
    }
}

/// Linear cross-fade: `old` ramps 1→0 while `new` ramps 0→1.
///
/// Each output sample is a convex combination of its inputs, so it always
/// lies between them and cannot overflow.
pub fn blend(old: &[i16], new: &[i16]) -> impl Iterator<Item = i16> {
    let n = old.len().min(new.len());
    (0..n).map(move |i| {
        let w = i as f32 / n as f32;
        let mixed = f32::from(old[i]) * (1.0 - w) + f32::from(new[i]) * w;
        mixed.round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
    })
}
