use interconnect_proto::PushFrame;

const DEFAULT_MAX_KEPT: usize = 32;

/// A bounded free list of frame carriers.
///
/// Packing frames each pass would otherwise allocate fresh vpi/request
/// vectors per push; recycling the carriers keeps the steady state
/// allocation-free. Pools are per-engine and never shared: they encode the
/// engine's single-thread invariant.
#[derive(Debug)]
pub(crate) struct FramePool {
    free: Vec<PushFrame>,
    max_kept: usize,
}

impl Default for FramePool {
    fn default() -> Self {
        FramePool {
            free: Vec::new(),
            max_kept: DEFAULT_MAX_KEPT,
        }
    }
}

impl FramePool {
    pub(crate) fn acquire(&mut self) -> PushFrame {
        self.free.pop().unwrap_or_default()
    }

    /// Return a carrier. Beyond the keep cap the carrier is simply dropped.
    pub(crate) fn release(&mut self, mut frame: PushFrame) {
        if self.free.len() < self.max_kept {
            frame.clear();
            self.free.push(frame);
        }
    }

    /// Drop all kept carriers (session teardown).
    pub(crate) fn release_all(&mut self) {
        self.free.clear();
        self.free.shrink_to_fit();
    }

    #[cfg(test)]
    pub(crate) fn kept(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use interconnect_proto::Vpi;

    use super::*;

    #[test]
    fn released_carriers_come_back_cleared() {
        let mut pool = FramePool::default();
        let mut frame = pool.acquire();
        frame.seq = 9;
        frame.vpis.push(Vpi::add_name("x", None));
        pool.release(frame);

        let frame = pool.acquire();
        assert_eq!(frame, PushFrame::default());
        assert_eq!(pool.kept(), 0);
    }

    #[test]
    fn keep_cap_is_enforced() {
        let mut pool = FramePool::default();
        for _ in 0..100 {
            pool.release(PushFrame::default());
        }
        assert_eq!(pool.kept(), DEFAULT_MAX_KEPT);
    }
}
