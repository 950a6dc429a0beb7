//! CLI command implementations

pub mod irq;
pub mod list;

pub use irq::irq;
pub use list::list;
