pub mod attendance;
pub mod core;
pub mod recalc;
pub mod reports;
pub mod schemes;
pub mod scores;
pub mod setup;

mod helpers;
