//! Raw entity access: the repository trait, an in-memory store and CSV loading

pub mod csv_loader;
pub mod history;
pub mod memory;
pub mod store;

// Re-export commonly used types
pub use csv_loader::load_fleet_dir;
pub use history::{BikeHistory, DataWatermark};
pub use memory::InMemoryStore;
pub use store::RawEntityStore;
