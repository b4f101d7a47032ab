//! Local model cache: one directory per task, one sub-directory per component.

mod loader;
mod source;

pub use loader::{CachedModelBundle, ComponentHandle, ModelCacheLoader};
pub use source::{ComponentSource, HubSource};

#[cfg(test)]
pub(crate) use loader::tests::FakeSource;
