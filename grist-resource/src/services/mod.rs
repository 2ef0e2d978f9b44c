mod completion;
mod resources;

pub use completion::CompletionConsumer;
pub use resources::{IngestFrame, ResourceService, SaveResourceRequest, UpdateResourceRequest};
