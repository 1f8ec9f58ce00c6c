mod events;
mod registry;
mod snapshots;

pub use events::EventRepository;
pub use registry::RegistryRepository;
pub use snapshots::SnapshotRepository;
