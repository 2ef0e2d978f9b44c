mod resource;

pub use resource::{default_name, Resource, ResourceKind, ResourceStatus, ResourceStatusUpdate};
