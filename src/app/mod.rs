//! Application lifecycle.

pub mod delegate;
