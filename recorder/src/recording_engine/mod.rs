pub mod engine;
pub mod error;
pub mod finalization;
pub mod launcher;
pub mod process_handle;
pub mod process_registry;
pub mod recovery;
pub mod rotation;
pub mod segments;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;
