pub mod runs;

pub use runs::*;
