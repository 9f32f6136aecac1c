use serde_json::Value;

use super::frame::WindowFrameState;
use super::WindowFunction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankKind {
    /// Peers share a rank and the next group skips ahead (1, 1, 3)
    Rank,
    /// Peers share a rank and the next group follows on (1, 1, 2)
    DenseRank,
}

/// Ranking derived from frame boundaries. Rows whose frame ends at the same
/// position are peers.
///
/// Holds per-partition state, so one instance must not be driven by two
/// partitions at the same time.
#[derive(Debug)]
pub struct RankFunction {
    kind: RankKind,
    rank: i64,
    seen_last_upper_bound: usize,
}

impl RankFunction {
    pub fn new(kind: RankKind) -> Self {
        Self {
            kind,
            rank: 0,
            seen_last_upper_bound: 0,
        }
    }

    pub fn rank() -> Self {
        Self::new(RankKind::Rank)
    }

    pub fn dense_rank() -> Self {
        Self::new(RankKind::DenseRank)
    }

    fn advance(&self) -> i64 {
        match self.kind {
            RankKind::Rank => self.seen_last_upper_bound as i64 + 1,
            RankKind::DenseRank => self.rank + 1,
        }
    }
}

impl WindowFunction for RankFunction {
    fn name(&self) -> &'static str {
        match self.kind {
            RankKind::Rank => "rank",
            RankKind::DenseRank => "dense_rank",
        }
    }

    fn execute(&mut self, idx_in_partition: usize, frame: &WindowFrameState) -> Value {
        let upper_bound = frame.upper_bound_exclusive();
        if idx_in_partition == 0 {
            self.rank = 1;
            self.seen_last_upper_bound = upper_bound;
        } else if self.seen_last_upper_bound != upper_bound {
            self.rank = self.advance();
            self.seen_last_upper_bound = upper_bound;
        }
        Value::from(self.rank)
    }
}

/// Position of the row inside its partition, starting at 1
#[derive(Debug, Default)]
pub struct RowNumber;

impl WindowFunction for RowNumber {
    fn name(&self) -> &'static str {
        "row_number"
    }

    fn execute(&mut self, idx_in_partition: usize, _frame: &WindowFrameState) -> Value {
        Value::from(idx_in_partition as i64 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(function: &mut dyn WindowFunction, upper_bounds: &[usize]) -> Vec<i64> {
        let size = upper_bounds.len();
        upper_bounds
            .iter()
            .enumerate()
            .map(|(idx, ub)| {
                let frame = WindowFrameState::new(*ub, size);
                function.execute(idx, &frame).as_i64().unwrap()
            })
            .collect()
    }

    #[test]
    fn test_rank_leaves_gaps_for_ties() {
        let mut rank = RankFunction::rank();
        assert_eq!(run(&mut rank, &[3, 3, 3, 5, 5, 6]), vec![1, 1, 1, 4, 4, 6]);
    }

    #[test]
    fn test_dense_rank_has_no_gaps() {
        let mut dense = RankFunction::dense_rank();
        assert_eq!(run(&mut dense, &[3, 3, 3, 5, 5, 6]), vec![1, 1, 1, 2, 2, 3]);
    }

    #[test]
    fn test_reset_at_partition_start() {
        let mut rank = RankFunction::rank();
        run(&mut rank, &[1, 2, 3, 4]);

        // a new partition starts over regardless of previous state
        assert_eq!(run(&mut rank, &[2, 2, 3]), vec![1, 1, 3]);

        let mut dense = RankFunction::dense_rank();
        run(&mut dense, &[1, 2, 3, 4]);
        assert_eq!(run(&mut dense, &[2, 2, 3]), vec![1, 1, 2]);
    }

    #[test]
    fn test_rank_advances_by_tie_group_size() {
        let bounds = [2, 2, 5, 5, 5, 6, 8, 8];
        let ranks = run(&mut RankFunction::rank(), &bounds);
        let dense = run(&mut RankFunction::dense_rank(), &bounds);

        assert_eq!(ranks, vec![1, 1, 3, 3, 3, 6, 7, 7]);
        assert_eq!(dense, vec![1, 1, 2, 2, 2, 3, 4, 4]);
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_row_number() {
        assert_eq!(run(&mut RowNumber, &[3, 3, 3]), vec![1, 2, 3]);
    }
}
