pub mod cache;
pub mod config;
pub mod err;
pub mod fs;
pub mod global_var;
pub mod net;
pub mod utilities;

pub use cache::CacheProvider;
pub use err::{CacheError, Result};
