//! Driver step: advance the multiplexer, drain completions, apply the
//! retry-or-finish policy.

use crate::error::{InternalError, Result};
use crate::multiplexer::{Message, Multiplexer, Readiness, Socket, TransferStatus};
use crate::retry::{self, CompletionAction};
use crate::transfer::TransferId;

use super::TransferRegistry;

/// Upper bound on back-to-back perform calls in one step when the engine
/// keeps asking to be called again.
const MAX_PERFORM_ROUNDS: usize = 16;

impl<M: Multiplexer> TransferRegistry<M> {
    /// One driver step for a ready descriptor, or for the timer when `socket`
    /// is `None`.
    pub fn drive(&mut self, socket: Option<Socket>, readiness: Readiness) -> Result<()> {
        self.check_poisoned()?;
        self.step(socket, readiness).map_err(|e| self.poison(e))
    }

    /// Timer expiry. Disarms the timer, drives, and re-arms from the engine's
    /// hint (or the fallback) if the step left transfers but no deadline.
    pub fn on_timer(&mut self) -> Result<()> {
        self.check_poisoned()?;
        self.timer.cancel();
        self.timer_step().map_err(|e| self.poison(e))
    }

    /// Fire the timer if it is due at the cached time. Returns whether it fired.
    pub fn fire_timer_if_due(&mut self) -> Result<bool> {
        self.check_poisoned()?;
        if !self.timer.fire(self.clock.now()) {
            return Ok(false);
        }
        self.timer_step().map_err(|e| self.poison(e))?;
        Ok(true)
    }

    fn timer_step(&mut self) -> std::result::Result<(), InternalError> {
        self.step(None, Readiness::NONE)?;
        // Some engines occasionally forget to report a new deadline.
        if !self.transfers.is_empty() && !self.timer.is_queued() {
            tracing::debug!("engine left no deadline; polling its timeout");
            self.arm_from_hint()?;
        }
        Ok(())
    }

    fn step(
        &mut self,
        mut socket: Option<Socket>,
        mut readiness: Readiness,
    ) -> std::result::Result<(), InternalError> {
        for _ in 0..MAX_PERFORM_ROUNDS {
            let status = self.multi.perform(socket, readiness)?;
            // Completions below may close the descriptor.
            socket = None;
            readiness = Readiness::NONE;

            if status.running != Some(self.active) {
                self.drain_completions()?;
            }
            if !status.call_again {
                break;
            }
        }
        self.apply_hook_events();
        if self.transfers.is_empty() {
            self.timer.cancel();
        }
        Ok(())
    }

    /// Read completion messages until the engine has none left.
    pub(crate) fn drain_completions(&mut self) -> std::result::Result<(), InternalError> {
        while let Some(message) = self.multi.next_message() {
            match message {
                Message::Done { token, status } => {
                    self.complete(TransferId::from_token(token), status)?
                }
                Message::Other { token } => {
                    return Err(InternalError::UnexpectedMessage(token.unwrap_or(usize::MAX)))
                }
            }
        }
        Ok(())
    }

    fn complete(
        &mut self,
        id: TransferId,
        status: TransferStatus,
    ) -> std::result::Result<(), InternalError> {
        let idx = self
            .position(id)
            .ok_or(InternalError::UnknownTransfer(id))?;
        let already_retried = self.transfers[idx].is_using_ipv6();

        match retry::decide(status, already_retried) {
            CompletionAction::RetryAlternateFamily => {
                tracing::warn!(%id, "name resolution failed; retrying over IPv6");
                let transfer = &mut self.transfers[idx];
                transfer.detach(&mut self.multi)?;
                transfer.retry_ipv6()?;
                transfer.attach(&mut self.multi)?;
            }
            CompletionAction::Succeed => {
                let mut transfer = self.deregister(idx)?;
                let body = transfer.take_body();
                tracing::info!(%id, bytes = body.len(), "transfer done");
                transfer.trigger_done(body)?;
            }
            CompletionAction::Fail(message) => {
                let mut transfer = self.deregister(idx)?;
                tracing::warn!(%id, url = transfer.url(), "transfer failed: {}", message);
                transfer.trigger_failed(message)?;
            }
        }
        Ok(())
    }
}
