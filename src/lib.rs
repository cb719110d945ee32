pub mod calendar;
pub mod config;
pub mod crypto;
pub mod delay;
pub mod models;
pub mod normalize;
pub mod notify;
pub mod observability;
pub mod phase;
pub mod prediction;
pub mod recommendation;
pub mod remote;
pub mod session;
pub mod share;
pub mod storage;
pub mod sync;
