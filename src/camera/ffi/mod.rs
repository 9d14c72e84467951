//! Vendor SDK bindings. Only compiled when the matching feature is enabled.
#![allow(unsafe_code)]

#[cfg(feature = "epix")]
pub mod epix;
#[cfg(feature = "thorlabs")]
pub mod thorlabs;
