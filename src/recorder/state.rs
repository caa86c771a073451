//! The recording state machine.
//!
//! Recorders make most illegal sequences unrepresentable through borrows and types. The
//! remaining transitions (begin, end, pass scopes, reset, submission) are checked at runtime
//! against [`transition`], which is a pure function of the buffer level, the current state and
//! the requested operation.

use std::fmt::{Display, Formatter};

use ash::vk;

use crate::error::{post_error, Error};
use crate::objects::descriptor::DescriptorResource;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum LevelKind {
    Primary,
    Secondary,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum PassState {
    NoPass,
    Render,
    Compute,
    Transfer,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BufferState {
    Initial,
    Recording(PassState),
    Ended,
}

/// The kind of a command recorded between begin and end.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum CommandKind {
    /// Draws and graphics state. Only inside render passes.
    Graphics,
    /// Dispatches. Only inside compute passes.
    Compute,
    /// Copies and blits. Only inside transfer passes.
    Transfer,
    /// Descriptor set binds and push constants. Inside render and compute passes.
    Descriptor,
    /// Barriers and queries. Anywhere while recording.
    Sync,
    /// Executing secondary buffers. Primary buffers outside of passes or inside render passes.
    ExecuteCommands,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum RecordOp {
    Begin,
    BeginRenderPass,
    BeginComputePass,
    BeginTransferPass,
    EndPass,
    End,
    Reset,
    /// Submission to a queue.
    Submit,
    /// Execution from within a primary buffer.
    Execute,
    Command(CommandKind),
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ProtocolError {
    InvalidTransition {
        level: LevelKind,
        state: BufferState,
        operation: RecordOp,
    },
    /// Secondary buffers were executed inside a render pass with inline contents.
    InlineRenderPass,
    /// Commands were recorded directly into a render pass begun with secondary contents.
    SecondaryContentsPass,
    /// The command pool was not created with `RESET_COMMAND_BUFFER`.
    ResetNotAllowed,
    UnknownBinding {
        binding: u32,
    },
    BindingOutOfBounds {
        binding: u32,
        element: u32,
        count: u32,
    },
    NotDynamic {
        binding: u32,
    },
    DescriptorTypeMismatch {
        binding: u32,
        declared: vk::DescriptorType,
        written: DescriptorResource,
    },
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::InvalidTransition { level, state, operation } => {
                write!(f, "{:?} can not be performed on a {:?} command buffer in state {:?}", operation, level, state)
            }
            ProtocolError::InlineRenderPass => {
                write!(f, "secondary command buffers can only be executed in render passes begun with secondary contents")
            }
            ProtocolError::SecondaryContentsPass => {
                write!(f, "render passes begun with secondary contents only accept executing secondary command buffers")
            }
            ProtocolError::ResetNotAllowed => {
                write!(f, "command pool does not allow resetting individual command buffers")
            }
            ProtocolError::UnknownBinding { binding } => {
                write!(f, "descriptor binding {} is not part of the layout", binding)
            }
            ProtocolError::BindingOutOfBounds { binding, element, count } => {
                write!(f, "element {} of descriptor binding {} is out of bounds (count {})", element, binding, count)
            }
            ProtocolError::NotDynamic { binding } => {
                write!(f, "descriptor binding {} has no dynamic offset", binding)
            }
            ProtocolError::DescriptorTypeMismatch { binding, declared, written } => {
                write!(f, "descriptor binding {} is declared as {:?} but {:?} was written", binding, declared, written)
            }
        }
    }
}

impl std::error::Error for ProtocolError {
}

/// Computes the state after `operation`. Fails if the operation is not valid in `state`.
pub fn transition(level: LevelKind, state: BufferState, operation: RecordOp) -> Result<BufferState, ProtocolError> {
    use BufferState::*;
    use PassState::*;

    let next = match (level, state, operation) {
        (_, _, RecordOp::Reset) => Some(Initial),

        (LevelKind::Primary, Initial, RecordOp::Begin) => Some(Recording(NoPass)),
        (LevelKind::Primary, Recording(NoPass), RecordOp::BeginRenderPass) => Some(Recording(Render)),
        (LevelKind::Primary, Recording(NoPass), RecordOp::BeginComputePass) => Some(Recording(Compute)),
        (LevelKind::Primary, Recording(NoPass), RecordOp::BeginTransferPass) => Some(Recording(Transfer)),
        (LevelKind::Primary, Recording(NoPass), RecordOp::End) => Some(Ended),
        (LevelKind::Primary, Recording(NoPass), RecordOp::EndPass) => None,
        (LevelKind::Primary, Recording(_), RecordOp::EndPass) => Some(Recording(NoPass)),
        (LevelKind::Primary, Ended, RecordOp::Submit) => Some(Ended),

        // The render pass of a secondary buffer spans its whole recording
        (LevelKind::Secondary, Initial, RecordOp::BeginRenderPass) => Some(Recording(Render)),
        (LevelKind::Secondary, Recording(Render), RecordOp::EndPass | RecordOp::End) => Some(Ended),
        (LevelKind::Secondary, Ended, RecordOp::Execute) => Some(Ended),

        (_, Recording(pass), RecordOp::Command(kind)) => {
            let allowed = match kind {
                CommandKind::Graphics => pass == Render,
                CommandKind::Compute => pass == Compute,
                CommandKind::Transfer => pass == Transfer,
                CommandKind::Descriptor => matches!(pass, Render | Compute),
                CommandKind::Sync => true,
                CommandKind::ExecuteCommands => level == LevelKind::Primary && matches!(pass, NoPass | Render),
            };
            if allowed { Some(state) } else { None }
        }

        _ => None,
    };

    next.ok_or(ProtocolError::InvalidTransition { level, state, operation })
}

/// Tracks the state of one command buffer.
///
/// The epoch of the owning pool is captured whenever the state changes. A pool reset moves all
/// of its buffers back to [`BufferState::Initial`], which is detected by comparing epochs.
#[derive(Copy, Clone, Debug)]
pub struct StateTracker {
    level: LevelKind,
    state: BufferState,
    epoch: u64,
}

impl StateTracker {
    pub fn new(level: LevelKind, epoch: u64) -> Self {
        Self {
            level,
            state: BufferState::Initial,
            epoch,
        }
    }

    pub fn level(&self) -> LevelKind {
        self.level
    }

    pub fn state(&self, pool_epoch: u64) -> BufferState {
        if self.epoch == pool_epoch {
            self.state
        } else {
            BufferState::Initial
        }
    }

    /// Validates the operation without changing the state.
    pub fn check(&self, operation: RecordOp, pool_epoch: u64) -> Result<BufferState, Error> {
        match transition(self.level, self.state(pool_epoch), operation) {
            Ok(next) => Ok(next),
            Err(err) => {
                log::error!("Command buffer protocol violation: {}", err);
                post_error(err.into())
            }
        }
    }

    pub fn apply(&mut self, operation: RecordOp, pool_epoch: u64) -> Result<(), Error> {
        self.state = self.check(operation, pool_epoch)?;
        self.epoch = pool_epoch;
        Ok(())
    }
}
