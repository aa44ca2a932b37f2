//! Network side of the cache: gap fetching and request scheduling.

pub mod fetcher;
pub mod scheduler;

pub use fetcher::{Fetcher, StreamData};
pub use scheduler::{Job, RequestId, RequestScheduler, Submission};
