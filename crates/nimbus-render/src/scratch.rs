//! Frame-scoped scratch targets.

use nimbus_gpu::{GpuError, TargetAllocator, TargetDesc, TargetView};

/// Owns every scratch target acquired through it.
///
/// Targets are released in reverse acquisition order, either explicitly by
/// [`ScratchScope::finish`] or when the scope is dropped, so an early return
/// cannot leak a target into the next frame.
pub struct ScratchScope<'a, A: TargetAllocator + ?Sized> {
    allocator: &'a mut A,
    acquired: Vec<TargetView>,
}

impl<'a, A: TargetAllocator + ?Sized> ScratchScope<'a, A> {
    pub fn new(allocator: &'a mut A) -> Self {
        Self {
            allocator,
            acquired: Vec::with_capacity(2),
        }
    }

    /// Acquire a target that lives until the scope ends.
    pub fn acquire(&mut self, desc: &TargetDesc) -> nimbus_gpu::Result<TargetView> {
        let target = self.allocator.acquire(desc)?;
        self.acquired.push(target);
        Ok(target)
    }

    /// Targets currently held, in acquisition order.
    pub fn acquired(&self) -> &[TargetView] {
        &self.acquired
    }

    /// Release everything now.
    ///
    /// Every target is released even if an earlier release fails; the first
    /// failure is returned.
    pub fn finish(mut self) -> nimbus_gpu::Result<()> {
        self.release_all()
    }

    fn release_all(&mut self) -> nimbus_gpu::Result<()> {
        let mut first_error: Option<GpuError> = None;
        while let Some(target) = self.acquired.pop() {
            if let Err(e) = self.allocator.release(target.id) {
                tracing::warn!("Failed to release scratch target {:?}: {e}", target.id);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<A: TargetAllocator + ?Sized> Drop for ScratchScope<'_, A> {
    fn drop(&mut self) {
        // Errors were already logged.
        let _ = self.release_all();
    }
}
