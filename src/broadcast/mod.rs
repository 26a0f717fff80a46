pub mod dispatcher;
pub mod wizard;

pub use dispatcher::{broadcast, report_to_operator, spawn_broadcast, BroadcastReport};
pub use wizard::{advance, BroadcastShape, BroadcastWizard, WizardInput, WizardOutcome, WizardState};
