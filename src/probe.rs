//! Triangular-number probe sequence over groups, working modulo an
//! arbitrary group count rather than only a power-of-two mask, since
//! `PrimeFmod` sizes are not powers of two.
//!
//! For a power-of-two group count this still visits every group exactly
//! once before repeating (triangular numbers mod 2^n); for a prime group
//! count the coverage guarantee doesn't hold in general, but the
//! sequence is still bounded by `groups` steps, which is what the table
//! relies on to detect "no free slot anywhere" and fall back to a
//! rehash.

pub(crate) struct ProbeSeq {
    groups: usize,
    pos: usize,
    stride: usize,
    visited: usize,
}

impl ProbeSeq {
    #[inline]
    pub(crate) fn new(start_group: usize, groups: usize) -> Self {
        debug_assert!(groups > 0);
        Self { groups, pos: start_group % groups, stride: 0, visited: 0 }
    }
}

impl Iterator for ProbeSeq {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        if self.visited >= self.groups {
            return None;
        }
        let result = self.pos;
        self.stride += 1;
        self.pos = (self.pos + self.stride) % self.groups;
        self.visited += 1;
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visits_every_group_exactly_once_for_power_of_two() {
        for groups in [1usize, 2, 4, 8, 16, 64, 1024] {
            for start in 0..groups {
                let mut seen = vec![false; groups];
                let mut count = 0;
                for g in ProbeSeq::new(start, groups) {
                    assert!(g < groups);
                    assert!(!seen[g], "group {g} visited twice (groups={groups}, start={start})");
                    seen[g] = true;
                    count += 1;
                }
                assert_eq!(count, groups);
                assert!(seen.iter().all(|&b| b));
            }
        }
    }

    #[test]
    fn bounded_by_group_count_for_prime_sizes() {
        for groups in [13usize, 29, 53, 97] {
            let count = ProbeSeq::new(0, groups).count();
            assert_eq!(count, groups);
        }
    }

    #[test]
    fn single_group_table_probes_once() {
        let mut it = ProbeSeq::new(0, 1);
        assert_eq!(it.next(), Some(0));
        assert_eq!(it.next(), None);
    }
}
