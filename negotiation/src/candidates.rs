use call_core::IceCandidate;
use log::debug;
use std::collections::VecDeque;

/// Remote candidates held back until both descriptions are set.
///
/// Append-only until drained. The drain happens once; afterwards the queue
/// stays empty and further drains return nothing.
#[derive(Debug, Default)]
pub struct CandidateQueue {
    pending: VecDeque<IceCandidate>,
    drained: bool,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        self.pending.push_back(candidate);
    }

    /// Take every queued candidate in arrival order.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        if self.drained {
            return Vec::new();
        }
        self.drained = true;
        debug!("Draining {} queued remote candidates", self.pending.len());
        self.pending.drain(..).collect()
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u16) -> IceCandidate {
        IceCandidate::new(
            format!("candidate:{} 1 udp 2122260223 192.168.1.{} 5000 typ host", n, n),
            Some("0".to_string()),
            Some(0),
        )
    }

    #[test]
    fn drains_in_arrival_order() {
        let mut queue = CandidateQueue::new();
        for n in 1..=3 {
            queue.push(candidate(n));
        }
        assert_eq!(queue.len(), 3);

        let drained = queue.drain();
        assert_eq!(drained, vec![candidate(1), candidate(2), candidate(3)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn second_drain_is_a_no_op() {
        let mut queue = CandidateQueue::new();
        queue.push(candidate(1));
        assert_eq!(queue.drain().len(), 1);
        assert!(queue.is_drained());
        assert!(queue.drain().is_empty());
    }
}
