use std::sync::Arc;

use crate::commands::CommandTable;
use crate::perception::{LabelVerifier, Labels};
use crate::platform::Platform;
use crate::settings::Settings;
use crate::sleep::Clock;
use crate::timing::TimingModel;

/// Everything the delivery components share: collaborators, the position
/// cache and timing history. Owned by the control loop and lent out to a
/// session or channel for the duration of one call.
pub struct Engine {
    pub platform: Platform,
    pub verifier: LabelVerifier,
    pub timing: TimingModel,
    pub table: CommandTable,
    pub clock: Arc<dyn Clock>,
    pub settings: Settings,
}

impl Engine {
    pub fn new(platform: Platform, settings: Settings, clock: Arc<dyn Clock>) -> Self {
        Self {
            platform,
            verifier: LabelVerifier::new(Labels::new(&settings.labels), &settings.perception),
            timing: TimingModel::new(),
            table: CommandTable::from_settings(&settings),
            clock,
            settings,
        }
    }

    /// Forget every learned position and latency.
    pub fn reset(&mut self) {
        self.verifier.reset();
        self.timing.reset();
    }
}
