//! Types that describe a fleet and the outcomes of operations run against it.

pub mod endpoint;
pub mod inventory;
pub mod outcome;

#[doc(inline)]
pub use endpoint::{home_dir, Endpoint, EndpointGroup, RemotePath};

#[doc(inline)]
pub use inventory::Inventory;

#[doc(inline)]
pub use outcome::{
    CommandOutput, Completion, EndpointResult, Outcome, RemoteOperationResult, Summary,
};
