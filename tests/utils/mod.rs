pub mod assertions;
pub mod mocks;
pub mod setup;

// Re-export main utilities for use by test files
#[allow(unused_imports)]
pub use assertions::ViewerAssertion;
#[allow(unused_imports)]
pub use mocks::{FlakyCallback, RecordingFailureSink};
#[allow(unused_imports)]
pub use setup::{PipelineSetup, PipelineSetupBuilder, TestSetup, TestSetupBuilder, Viewer};
