//! Cache module: storage backends and the fetch-or-populate engine.

mod layer;
mod memory;
mod object;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use memory::MemoryStorage;
pub use object::ObjectStorage;
pub use storage::CacheStorage;
pub use traits::{CacheResult, CacheSource};
