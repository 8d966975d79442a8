pub mod events;
pub mod format;
pub mod providers;
pub mod show;
pub mod sync;
