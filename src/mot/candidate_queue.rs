use std::cmp::Ordering;
use std::collections::BinaryHeap;

// Cost of one candidate region and its position in the candidate list.
// Ordered so that a BinaryHeap pops the cheapest candidate first; on equal
// cost the earlier candidate wins.
#[derive(Debug, Clone, Copy)]
pub struct CostCandidate {
    pub cost: f32,
    pub index: usize,
}

impl PartialEq for CostCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CostCandidate {}

impl PartialOrd for CostCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CostCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // other.cost < self.cost means self ranks lower
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.index.cmp(&self.index))
    }
}

/// Min-cost ranking of candidate regions for one event
#[derive(Debug, Default)]
pub struct CandidateQueue {
    heap: BinaryHeap<CostCandidate>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        CandidateQueue::default()
    }
    pub fn push(&mut self, index: usize, cost: f32) {
        self.heap.push(CostCandidate { cost, index });
    }
    pub fn best(&self) -> Option<CostCandidate> {
        self.heap.peek().copied()
    }
}
