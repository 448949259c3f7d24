// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::BcpdError;
use crate::control::{CancelToken, ProgressSink};

/// Optional hooks passed through a sampling run.
#[derive(Clone, Copy, Default)]
pub struct ExecutionContext<'a> {
    pub cancel: Option<&'a CancelToken>,
    pub progress: Option<&'a dyn ProgressSink>,
}

impl<'a> ExecutionContext<'a> {
    /// Creates a context with no optional hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the optional cancellation token.
    pub fn with_cancel(mut self, cancel: &'a CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Sets an optional progress sink.
    pub fn with_progress_sink(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Returns true when cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancelToken::is_cancelled)
    }

    /// Returns a cancelled error when cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<(), BcpdError> {
        if self.is_cancelled() {
            return Err(BcpdError::cancelled());
        }
        Ok(())
    }

    /// Checks cancellation every `every` iterations.
    ///
    /// When `every` is zero, it is treated as one (always poll).
    pub fn check_cancelled_every(&self, iteration: usize, every: usize) -> Result<(), BcpdError> {
        let every = every.max(1);
        if iteration % every != 0 {
            return Ok(());
        }
        self.check_cancelled()
    }

    /// Emits clamped progress to the sink, if configured.
    pub fn report_progress(&self, chain: usize, fraction: f32) {
        if !fraction.is_finite() {
            return;
        }

        if let Some(sink) = self.progress {
            sink.on_progress(chain, fraction.clamp(0.0, 1.0));
        }
    }
}
