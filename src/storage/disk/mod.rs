mod disk_manager;
mod disk_scheduler;

pub use disk_manager::DiskManager;
pub use disk_scheduler::{DiskRequest, DiskRequestKind, DiskScheduler};
