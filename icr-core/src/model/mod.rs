//! Pipeline entities and their state machines.
//!
//! Entities are plain data with guarded transition methods; persistence lives
//! behind [`crate::repository`].

mod scan;
mod stitched;

pub use scan::{GradedCardScan, MatchingStatus, ScanStatus, VerificationFlags};
pub use stitched::{
    DistributionMetrics, NewStitchedLabel, StitchStatus, StitchedLabel, StitchedOcr,
};
