//! Demo instruments served by the bridge.
pub mod echo;
pub mod identity;
