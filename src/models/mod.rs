mod device;
mod history;
mod license;
mod stats;

pub use device::*;
pub use history::*;
pub use license::*;
pub use stats::*;
