//! Resume actions and exception pause policy

use serde::{Deserialize, Serialize};

/// How execution continues after a pause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResumeAction {
    /// Run until the next breakpoint
    #[default]
    Continue,
    /// Stop at the next position in the current frame or, on return, its caller
    StepOver,
    /// Stop in the caller once the current frame returns
    StepOut,
    /// Stop at the next position anywhere
    SingleStep,
}

/// When a thrown exception pauses execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExceptionPauseInfo {
    /// Never
    #[default]
    NoPauseOnExceptions,
    /// When no frame on the stack handles it
    PauseOnUnhandled,
    /// Always
    PauseOnAll,
}

impl ExceptionPauseInfo {
    /// Whether an exception pauses, given whether some frame handles it
    pub fn should_pause(self, handled: bool) -> bool {
        match self {
            ExceptionPauseInfo::NoPauseOnExceptions => false,
            ExceptionPauseInfo::PauseOnUnhandled => !handled,
            ExceptionPauseInfo::PauseOnAll => true,
        }
    }
}

/// Stepping state kept between a step request and the pause that ends it
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SteppingState {
    pub(crate) action: ResumeAction,
    /// Physical frames at and below the frame the step started in
    pub(crate) height: Option<usize>,
}

impl SteppingState {
    /// Whether an internal breakpoint hit by a frame `height` frames from the
    /// bottom of the stack ends the step
    pub(crate) fn stops_at(&self, height: usize) -> bool {
        match (self.action, self.height) {
            (ResumeAction::StepOver, Some(h)) => height <= h,
            (ResumeAction::StepOut, Some(h)) => height < h,
            _ => true,
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = SteppingState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_policy() {
        assert!(!ExceptionPauseInfo::NoPauseOnExceptions.should_pause(false));
        assert!(ExceptionPauseInfo::PauseOnUnhandled.should_pause(false));
        assert!(!ExceptionPauseInfo::PauseOnUnhandled.should_pause(true));
        assert!(ExceptionPauseInfo::PauseOnAll.should_pause(true));
    }

    #[test]
    fn test_step_depth_rules() {
        let over = SteppingState {
            action: ResumeAction::StepOver,
            height: Some(3),
        };
        assert!(over.stops_at(3));
        assert!(over.stops_at(2));
        assert!(!over.stops_at(4));

        let out = SteppingState {
            action: ResumeAction::StepOut,
            height: Some(3),
        };
        assert!(!out.stops_at(3));
        assert!(out.stops_at(2));

        let mut state = out;
        state.reset();
        assert_eq!(state.action, ResumeAction::Continue);
        assert!(state.stops_at(10));
    }
}
