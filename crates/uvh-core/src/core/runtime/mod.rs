pub(crate) mod effects;
pub(crate) mod process;

mod facade;

pub use facade::*;

pub(crate) const UVH_VERSION: &str = env!("CARGO_PKG_VERSION");
