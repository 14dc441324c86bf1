//! Adapters for the domain ports

pub mod kubernetes;
pub mod memory;

pub use kubernetes::KubeObjects;
pub use memory::MemoryStore;
