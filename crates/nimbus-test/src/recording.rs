//! Backend that records every call the renderer makes.
//!
//! Allocator, evaluator and blitter share one ordered command log, so tests
//! can assert on the exact sequence of acquisitions, passes and releases.
//! Faults can be injected at a given acquisition or pass.

use std::collections::BTreeSet;
use std::sync::Arc;

use nimbus_gpu::{
    Blitter, Extent2d, FilterMode, GpuError, PixelFormat, TargetAllocator, TargetDesc, TargetId,
    TargetView,
};
use nimbus_render::{
    CloudEvaluator, EvaluatorInputSet, FrameTargets, LowResClouds, LowResDepth, PassStage,
    RenderServices,
};
use parking_lot::Mutex;

/// First id handed out for scratch targets.
const SCRATCH_BASE: u64 = 1000;

/// One recorded backend call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Acquire {
        label: &'static str,
        id: TargetId,
        extent: Extent2d,
        format: PixelFormat,
        filter: FilterMode,
    },
    AcquireFailed {
        label: &'static str,
    },
    Release(TargetId),
    DownsampleDepth {
        source: TargetId,
        target: TargetId,
    },
    Evaluate {
        depth: TargetId,
        target: TargetId,
    },
    Composite {
        depth: TargetId,
        clouds: TargetId,
        destination: TargetId,
    },
    Blit {
        source: TargetId,
        destination: TargetId,
    },
}

impl Command {
    pub const fn is_pass(&self) -> bool {
        matches!(
            self,
            Self::DownsampleDepth { .. } | Self::Evaluate { .. } | Self::Composite { .. }
        )
    }
}

#[derive(Default)]
struct State {
    commands: Vec<Command>,
    live: BTreeSet<TargetId>,
    acquisitions: usize,
    last_inputs: Option<EvaluatorInputSet>,
}

type Shared = Arc<Mutex<State>>;

/// Scratch allocator half of [`RecordingBackend`].
pub struct RecordingAllocator {
    state: Shared,
    next_id: u64,
    fail_at: Option<usize>,
}

impl TargetAllocator for RecordingAllocator {
    fn acquire(&mut self, desc: &TargetDesc) -> nimbus_gpu::Result<TargetView> {
        let mut state = self.state.lock();
        let attempt = state.acquisitions;
        state.acquisitions += 1;

        if self.fail_at == Some(attempt) {
            state.commands.push(Command::AcquireFailed { label: desc.label });
            return Err(GpuError::UnsupportedFormat(format!(
                "{:?} for {}",
                desc.format, desc.label
            )));
        }

        let id = TargetId(self.next_id);
        self.next_id += 1;
        state.live.insert(id);
        state.commands.push(Command::Acquire {
            label: desc.label,
            id,
            extent: desc.extent,
            format: desc.format,
            filter: desc.filter,
        });
        Ok(TargetView {
            id,
            extent: desc.extent,
            format: desc.format,
            filter: desc.filter,
        })
    }

    fn release(&mut self, id: TargetId) -> nimbus_gpu::Result<()> {
        let mut state = self.state.lock();
        if !state.live.remove(&id) {
            return Err(GpuError::ResourceNotFound(format!("{id:?}")));
        }
        state.commands.push(Command::Release(id));
        Ok(())
    }
}

/// Evaluator half of [`RecordingBackend`].
pub struct RecordingEvaluator {
    state: Shared,
    fail_stage: Option<PassStage>,
}

impl RecordingEvaluator {
    fn record(
        &self,
        stage: PassStage,
        inputs: &EvaluatorInputSet,
        reads: &[TargetId],
        command: Command,
    ) -> nimbus_gpu::Result<()> {
        let mut state = self.state.lock();
        if let Some(id) = reads.iter().find(|id| !state.live.contains(id)) {
            return Err(GpuError::ResourceNotFound(format!(
                "{stage} read released target {id:?}"
            )));
        }
        state.commands.push(command);
        state.last_inputs = Some(inputs.clone());

        if self.fail_stage == Some(stage) {
            return Err(GpuError::Other(format!("injected {stage} failure")));
        }
        Ok(())
    }
}

impl CloudEvaluator for RecordingEvaluator {
    fn downsample_depth(
        &mut self,
        inputs: &EvaluatorInputSet,
        frame: &FrameTargets,
        target: &TargetView,
    ) -> nimbus_gpu::Result<()> {
        self.record(
            PassStage::DepthDownsample,
            inputs,
            &[target.id],
            Command::DownsampleDepth {
                source: frame.source_depth.id,
                target: target.id,
            },
        )
    }

    fn evaluate(
        &mut self,
        inputs: &EvaluatorInputSet,
        _frame: &FrameTargets,
        depth: &LowResDepth,
        target: &TargetView,
    ) -> nimbus_gpu::Result<()> {
        self.record(
            PassStage::CloudEvaluate,
            inputs,
            &[depth.target().id, target.id],
            Command::Evaluate {
                depth: depth.target().id,
                target: target.id,
            },
        )
    }

    fn composite(
        &mut self,
        inputs: &EvaluatorInputSet,
        frame: &FrameTargets,
        depth: &LowResDepth,
        clouds: &LowResClouds,
    ) -> nimbus_gpu::Result<()> {
        self.record(
            PassStage::Composite,
            inputs,
            &[depth.target().id, clouds.target().id],
            Command::Composite {
                depth: depth.target().id,
                clouds: clouds.target().id,
                destination: frame.destination.id,
            },
        )
    }
}

/// Blitter half of [`RecordingBackend`].
pub struct RecordingBlitter {
    state: Shared,
}

impl Blitter for RecordingBlitter {
    fn blit(&mut self, source: &TargetView, destination: &TargetView) -> nimbus_gpu::Result<()> {
        self.state.lock().commands.push(Command::Blit {
            source: source.id,
            destination: destination.id,
        });
        Ok(())
    }
}

/// Allocator, evaluator and blitter recording into one log.
pub struct RecordingBackend {
    state: Shared,
    pub allocator: RecordingAllocator,
    pub evaluator: RecordingEvaluator,
    pub blitter: RecordingBlitter,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        let state = Shared::default();
        Self {
            allocator: RecordingAllocator {
                state: state.clone(),
                next_id: SCRATCH_BASE,
                fail_at: None,
            },
            evaluator: RecordingEvaluator {
                state: state.clone(),
                fail_stage: None,
            },
            blitter: RecordingBlitter {
                state: state.clone(),
            },
            state,
        }
    }

    /// Fail the `attempt`-th acquisition, counting from zero across frames.
    #[must_use]
    pub fn fail_acquisition(mut self, attempt: usize) -> Self {
        self.allocator.fail_at = Some(attempt);
        self
    }

    /// Fail every invocation of `stage`.
    #[must_use]
    pub fn fail_stage(mut self, stage: PassStage) -> Self {
        self.evaluator.fail_stage = Some(stage);
        self
    }

    pub fn services(&mut self) -> RenderServices<'_> {
        RenderServices {
            allocator: &mut self.allocator,
            evaluator: &mut self.evaluator,
            blitter: &mut self.blitter,
        }
    }

    pub fn commands(&self) -> Vec<Command> {
        self.state.lock().commands.clone()
    }

    /// Drop the log while keeping live targets.
    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Scratch targets acquired and not yet released.
    pub fn live_targets(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Input set seen by the most recent pass.
    pub fn last_inputs(&self) -> Option<EvaluatorInputSet> {
        self.state.lock().last_inputs.clone()
    }

    pub fn acquire_count(&self) -> usize {
        self.count(|command| matches!(command, Command::Acquire { .. }))
    }

    pub fn release_count(&self) -> usize {
        self.count(|command| matches!(command, Command::Release(_)))
    }

    pub fn pass_count(&self) -> usize {
        self.count(Command::is_pass)
    }

    fn count(&self, predicate: impl Fn(&Command) -> bool) -> usize {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|command| predicate(command))
            .count()
    }
}
