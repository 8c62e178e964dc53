//! The rewrite passes, grouped by pipeline stage.
//!
//! Every pass is a pure function over the model. Validation passes take
//! the diagnostic bag and return the model unchanged; rewrite passes
//! never fail (programmer errors panic).

pub mod asset_lower;
pub mod asset_update;
pub mod check;
pub mod containers;
pub mod control;
pub mod dates;
pub mod entrypoints;
pub mod enums;
pub mod extract;
pub mod keys;
pub mod normalize;
pub mod rational;
pub mod storage;
