//! jobnodes-trigger — fast review on queue changes.
//!
//! Provisioners tick on a fixed interval. When an item enters the queue
//! as buildable or waiting, the trigger asks the provisioner of the item's
//! label to review right away so a node can be requested without waiting
//! for the next interval.
//!
//! # Flow
//!
//! ```text
//! host queue
//!   │  on_enter_buildable / on_enter_waiting
//!   ▼
//! FastReviewTrigger
//!   │  ProvisionerLookup::review_target(assigned label)
//!   ▼
//! NodeProvisioner::suggest_review_now
//! ```

pub mod review;

pub use review::{FastReviewTrigger, ProvisionerLookup, QueueItem, QueueListener, ReviewTarget};
