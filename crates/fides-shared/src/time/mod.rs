mod duration;
mod serde_impl;
mod time_impl;

pub use duration::*;
