//! Tracks the multiset of active read timestamps. The watermark is the
//! oldest read any live transaction may still need; undo records entirely
//! below it are unreachable and collectible.

use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct Watermark {
    current_reads: BTreeMap<u64, u32>,
    commit_ts: u64,
    watermark: u64,
}

impl Watermark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the latest commit timestamp; it becomes the watermark
    /// whenever no reader is active.
    pub fn update_commit_ts(&mut self, commit_ts: u64) {
        debug_assert!(commit_ts >= self.commit_ts);
        self.commit_ts = commit_ts;
    }

    pub fn add_txn(&mut self, read_ts: u64) {
        debug_assert!(
            read_ts >= self.watermark(),
            "new reader at ts {read_ts} behind watermark"
        );
        *self.current_reads.entry(read_ts).or_insert(0) += 1;
    }

    pub fn remove_txn(&mut self, read_ts: u64) {
        let count = self
            .current_reads
            .get_mut(&read_ts)
            .expect("removal of untracked read ts");
        *count -= 1;
        if *count == 0 {
            self.current_reads.remove(&read_ts);
        }
    }

    /// Oldest active read timestamp, or the last commit timestamp when no
    /// reader is active. Non-decreasing over time.
    pub fn watermark(&mut self) -> u64 {
        let current = match self.current_reads.keys().next() {
            Some(&oldest) => oldest,
            None => self.commit_ts,
        };
        self.watermark = self.watermark.max(current);
        self.watermark
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_the_minimum_active_read() {
        let mut wm = Watermark::new();
        wm.update_commit_ts(3);
        assert_eq!(wm.watermark(), 3);

        wm.add_txn(3);
        wm.add_txn(5);
        wm.add_txn(5);
        assert_eq!(wm.watermark(), 3);

        wm.remove_txn(3);
        assert_eq!(wm.watermark(), 5);
        wm.remove_txn(5);
        assert_eq!(wm.watermark(), 5);
        wm.remove_txn(5);
        wm.update_commit_ts(9);
        assert_eq!(wm.watermark(), 9);
    }

    #[test]
    fn watermark_is_monotonic() {
        let mut wm = Watermark::new();
        wm.update_commit_ts(4);
        let mut last = 0;
        for read_ts in [4, 4, 5, 6] {
            wm.add_txn(read_ts);
            let now = wm.watermark();
            assert!(now >= last);
            last = now;
        }
        for read_ts in [4, 4, 5, 6] {
            wm.remove_txn(read_ts);
            let now = wm.watermark();
            assert!(now >= last);
            last = now;
        }
    }
}
