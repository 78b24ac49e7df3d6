pub mod sink;
pub mod timeline;
pub mod tracking;
pub mod vitals;

pub use sink::*;
pub use timeline::*;
pub use tracking::*;
pub use vitals::*;
