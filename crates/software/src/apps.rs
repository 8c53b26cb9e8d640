//! The applications the device can run, each implementing [`App`](crate::app::App).

mod clock_source_live;
pub use clock_source_live::*;

mod delay;
pub use delay::*;

mod tanpura;
pub use tanpura::*;
