mod memory;

pub use memory::MemoryDatabaseManager;
