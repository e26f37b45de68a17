pub mod protect;
pub mod reaper;
pub mod trace;
