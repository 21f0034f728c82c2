//! Scoped ownership of model input tensors
//!
//! Every tensor the preprocessor creates is wrapped in an [`InputTensor`] and
//! counted by a shared [`TensorTracker`]. The count drops when the wrapper is
//! dropped, on success, failure and cancellation alike, so the number of live
//! input tensors returns to zero after each classification.

use candle_core::Tensor;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts live input tensors
#[derive(Clone, Default)]
pub struct TensorTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Default)]
struct TrackerInner {
    live: AtomicUsize,
    peak: AtomicUsize,
    allocated: AtomicU64,
    released: AtomicU64,
}

impl TensorTracker {
    /// Create a new tracker
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self) {
        let live = self.inner.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(live, Ordering::SeqCst);
        self.inner.allocated.fetch_add(1, Ordering::Relaxed);
    }

    fn release(&self) {
        self.inner.live.fetch_sub(1, Ordering::SeqCst);
        self.inner.released.fetch_add(1, Ordering::Relaxed);
    }

    /// Tensors currently alive
    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Highest number of tensors alive at once
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    /// Get current statistics
    pub fn snapshot(&self) -> TensorStats {
        TensorStats {
            live: self.live(),
            peak: self.peak(),
            allocated: self.inner.allocated.load(Ordering::Relaxed),
            released: self.inner.released.load(Ordering::Relaxed),
        }
    }
}

/// Tracker statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TensorStats {
    pub live: usize,
    pub peak: usize,
    pub allocated: u64,
    pub released: u64,
}

/// A model input tensor that is released when dropped
pub struct InputTensor {
    tensor: Tensor,
    tracker: TensorTracker,
}

impl InputTensor {
    /// Take ownership of `tensor` and count it against `tracker`
    pub fn new(tensor: Tensor, tracker: &TensorTracker) -> Self {
        tracker.acquire();
        Self {
            tensor,
            tracker: tracker.clone(),
        }
    }

    /// Borrow the underlying tensor
    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    /// Tensor dims
    pub fn dims(&self) -> &[usize] {
        self.tensor.dims()
    }
}

impl Drop for InputTensor {
    fn drop(&mut self) {
        self.tracker.release();
    }
}

impl std::fmt::Debug for InputTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputTensor")
            .field("dims", &self.dims())
            .finish()
    }
}
