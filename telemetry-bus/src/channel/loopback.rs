//! In-memory broadcast bus
//!
//! Every frame transmitted by one endpoint is delivered to all other
//! endpoints, like a real CAN bus without the arbitration. Used for tests,
//! demos and dry runs without hardware.

use super::FrameTransport;
use crate::types::Frame;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct BusState {
    queues: Vec<Option<VecDeque<Frame>>>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<BusState>,
    arrived: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle to an in-memory bus; cheap to clone and safe to share across threads
#[derive(Clone, Default)]
pub struct LoopbackBus {
    shared: Arc<Shared>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new endpoint to the bus
    pub fn endpoint(&self) -> LoopbackEndpoint {
        let mut state = self.shared.lock();
        state.queues.push(Some(VecDeque::new()));
        LoopbackEndpoint {
            shared: Arc::clone(&self.shared),
            index: state.queues.len() - 1,
        }
    }

    /// Deliver a frame to every attached endpoint, as if sent by an external node
    pub fn inject(&self, frame: Frame) {
        let mut state = self.shared.lock();
        for queue in state.queues.iter_mut().flatten() {
            queue.push_back(frame.clone());
        }
        self.shared.arrived.notify_all();
    }

    /// Number of endpoints still attached
    pub fn endpoint_count(&self) -> usize {
        self.shared.lock().queues.iter().flatten().count()
    }
}

/// One node attached to a [`LoopbackBus`]
pub struct LoopbackEndpoint {
    shared: Arc<Shared>,
    index: usize,
}

impl FrameTransport for LoopbackEndpoint {
    fn transmit(&mut self, frame: &Frame) -> io::Result<()> {
        let mut state = self.shared.lock();
        if state.queues[self.index].is_none() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "endpoint detached"));
        }

        for (index, queue) in state.queues.iter_mut().enumerate() {
            if index == self.index {
                continue;
            }
            if let Some(queue) = queue {
                queue.push_back(frame.clone());
            }
        }
        self.shared.arrived.notify_all();
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> io::Result<Option<Frame>> {
        let index = self.index;
        let state = self.shared.lock();
        let (mut state, _) = self
            .shared
            .arrived
            .wait_timeout_while(state, timeout, |state| {
                matches!(&state.queues[index], Some(queue) if queue.is_empty())
            })
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match state.queues[index].as_mut() {
            Some(queue) => Ok(queue.pop_front()),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "endpoint detached")),
        }
    }

    fn shutdown(&mut self) {
        self.shared.lock().queues[self.index] = None;
    }
}

impl Drop for LoopbackEndpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}
