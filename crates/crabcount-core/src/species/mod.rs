pub mod label;
pub mod roster;

pub use label::ClassLabel;
pub use roster::{Roster, Species};
