//! Beacon builds: flavors, callback URLs and the build runner.

mod flavor;
mod manager;

pub use flavor::{BeaconFlavor, CallbackEndpoint, UnknownFlavor};
pub use manager::{BeaconBuilder, BuildArtifact, BuildError, BuildFailure};
