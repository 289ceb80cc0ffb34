pub mod container;

pub use container::{ContainerProcessor, ContainerProperties, ContainerStatus};
