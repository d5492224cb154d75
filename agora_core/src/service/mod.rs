//! RPC services. Each service exposes its operations as inherent `_method`
//! functions taking an explicit [`Session`](crate::session::Session), and
//! wraps them in a zel service trait for remote callers.

pub(crate) mod cascade;
pub mod comments;
pub mod posts;
pub mod profiles;
pub mod votes;
