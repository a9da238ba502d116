//! Menu bar UI components.
//!
//! Provides the status item, its dropdown menu, and the presenter that
//! keeps them in sync with the session.

pub mod builder;
pub mod delegate;
pub mod state;
pub mod updates;
