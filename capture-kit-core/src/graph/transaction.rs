use crate::models::error::CaptureError;
use crate::models::graph::TransactionState;
use crate::traits::capture_hardware::CaptureHardware;

/// An open begin/commit configuration bracket.
///
/// Beginning fails with `TransactionInProgress` if another bracket is open.
/// The bracket is committed when the scope is dropped, so every exit path
/// (including errors in the body) commits exactly once.
pub struct ConfigurationScope<'a> {
    hardware: &'a mut Box<dyn CaptureHardware>,
    state: &'a mut TransactionState,
}

impl<'a> ConfigurationScope<'a> {
    pub fn begin(
        hardware: &'a mut Box<dyn CaptureHardware>,
        state: &'a mut TransactionState,
    ) -> Result<Self, CaptureError> {
        if *state == TransactionState::InProgress {
            return Err(CaptureError::TransactionInProgress);
        }
        *state = TransactionState::InProgress;
        hardware.begin_configuration();
        log::debug!("Configuration transaction begun");
        Ok(Self { hardware, state })
    }

    pub fn hardware(&mut self) -> &mut dyn CaptureHardware {
        self.hardware.as_mut()
    }

    /// Commit now instead of at end of scope.
    pub fn commit(self) {}
}

impl Drop for ConfigurationScope<'_> {
    fn drop(&mut self) {
        self.hardware.commit_configuration();
        *self.state = TransactionState::Idle;
        log::debug!("Configuration transaction committed");
    }
}
