// tablecast-common: shared wire protocol and diff machinery for the
// Tablecast workspace.

pub mod diff;
pub mod protocol;
