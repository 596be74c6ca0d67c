//! Portable, exact attention kernels.
//!
//! These paths favour clarity over absolute performance and give the
//! multi-head wrapper a kernel whose numerics are easy to check by hand.

pub mod exact;

pub use exact::ExactAttention;
