//! Time to decoded-offset index for seeking.

use crate::mp4::{fullbox_header, read_u16, read_u32, read_u64};
use crate::Result;

/// A position playback can resume from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekPoint {
    /// Presentation time in seconds.
    pub time_secs: f64,
    /// Decoded-stream offset of the fragment (or segment) starting there.
    pub offset: u64,
}

/// Known resume points, ordered by offset.
///
/// Filled from `sidx` boxes and from every fragment the demuxer has seen.
#[derive(Debug, Clone, Default)]
pub struct SeekIndex {
    points: Vec<SeekPoint>,
}

impl SeekIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resume point. Duplicate offsets keep the first time seen.
    pub fn insert(&mut self, time_secs: f64, offset: u64) {
        match self.points.binary_search_by_key(&offset, |p| p.offset) {
            Ok(_) => {}
            Err(pos) => self.points.insert(pos, SeekPoint { time_secs, offset }),
        }
    }

    /// Add the subsegments referenced by a `sidx` box.
    ///
    /// `sidx_offset` is the decoded offset of the box and `sidx_len` its
    /// full length; references are anchored at the first byte after it.
    /// Hierarchical references (to other `sidx` boxes) are skipped.
    pub fn insert_sidx(&mut self, sidx_body: &[u8], sidx_offset: u64, sidx_len: u64) -> Result<()> {
        let (version, _) = fullbox_header(sidx_body)?;
        let timescale = read_u32(sidx_body, 8)?;
        if timescale == 0 {
            return Ok(());
        }

        let (earliest, first_offset, mut pos) = if version == 0 {
            (
                read_u32(sidx_body, 12)? as u64,
                read_u32(sidx_body, 16)? as u64,
                20,
            )
        } else {
            (read_u64(sidx_body, 12)?, read_u64(sidx_body, 20)?, 28)
        };

        // reserved(2) + reference_count(2)
        let count = read_u16(sidx_body, pos + 2)?;
        pos += 4;

        let mut offset = sidx_offset + sidx_len + first_offset;
        let mut time = earliest;
        for _ in 0..count {
            let reference = read_u32(sidx_body, pos)?;
            let duration = read_u32(sidx_body, pos + 4)?;
            pos += 12;

            let is_index = reference & 0x8000_0000 != 0;
            if !is_index {
                self.insert(time as f64 / timescale as f64, offset);
            }
            offset += (reference & 0x7FFF_FFFF) as u64;
            time += duration as u64;
        }

        Ok(())
    }

    /// Resume point for `time_secs`.
    ///
    /// Picks the latest point starting at or before the time. Times before
    /// the first point map to the first point; times past the last known
    /// point map to the last one.
    pub fn lookup(&self, time_secs: f64) -> Option<SeekPoint> {
        let first = *self.points.first()?;
        let found = self
            .points
            .iter()
            .filter(|p| p.time_secs <= time_secs)
            .max_by(|a, b| a.time_secs.total_cmp(&b.time_secs).then(a.offset.cmp(&b.offset)));
        Some(found.copied().unwrap_or(first))
    }

    /// Number of known points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether no point is known yet.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmp4::writer;

    #[test]
    fn test_lookup_picks_latest_point_before_time() {
        let mut index = SeekIndex::new();
        index.insert(0.0, 1_000);
        index.insert(2.0, 5_000);
        index.insert(4.0, 9_000);

        assert_eq!(index.lookup(3.9).unwrap().offset, 5_000);
        assert_eq!(index.lookup(4.0).unwrap().offset, 9_000);
        assert_eq!(index.lookup(0.5).unwrap().offset, 1_000);
    }

    #[test]
    fn test_lookup_past_end_uses_last_point() {
        let mut index = SeekIndex::new();
        index.insert(0.0, 1_000);
        index.insert(2.0, 5_000);
        assert_eq!(index.lookup(600.0).unwrap().offset, 5_000);
    }

    #[test]
    fn test_lookup_before_first_point() {
        let mut index = SeekIndex::new();
        index.insert(1.0, 1_000);
        assert_eq!(index.lookup(0.0).unwrap().offset, 1_000);
        assert!(SeekIndex::new().lookup(1.0).is_none());
    }

    #[test]
    fn test_duplicate_offsets_are_ignored() {
        let mut index = SeekIndex::new();
        index.insert(2.0, 5_000);
        index.insert(7.0, 5_000);
        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup(3.0).unwrap().time_secs, 2.0);
    }

    #[test]
    fn test_sidx_references() {
        let sidx = writer::write_sidx(1, 1000, 0, &[(400, 2000), (300, 2000), (500, 2000)]);
        let mut index = SeekIndex::new();
        index
            .insert_sidx(&sidx[8..], 100, sidx.len() as u64)
            .unwrap();

        let anchor = 100 + sidx.len() as u64;
        assert_eq!(index.len(), 3);
        assert_eq!(index.lookup(0.0).unwrap().offset, anchor);
        assert_eq!(index.lookup(2.5).unwrap().offset, anchor + 400);
        assert_eq!(index.lookup(5.0).unwrap().offset, anchor + 700);
    }
}
