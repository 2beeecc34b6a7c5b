//! Domain value objects.

mod backoff_policy;

pub use backoff_policy::BackoffPolicy;
