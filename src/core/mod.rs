// Resource engine and the repository contract it drives

pub mod bulk;
pub mod engine;
pub mod traits;

// Re-export commonly used items
pub use bulk::{BulkFailure, BulkReport};
pub use engine::ResourceEngine;
pub use traits::Repository;
