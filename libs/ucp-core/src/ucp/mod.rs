pub mod plane;
pub mod proxy;
pub mod resourcegroup;

pub use plane::{Plane, PlaneRegistry};
pub use proxy::ProxyRouter;
pub use resourcegroup::{ResourceGroup, ResourceGroupRegistry};
