pub mod statestore;

pub use statestore::{DaprStateStoreProcessor, DaprStateStoreProperties, DaprStateStoreStatus};
