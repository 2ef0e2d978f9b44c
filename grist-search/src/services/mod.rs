mod answer;
mod indexer;
mod prompt;

pub use answer::{AnswerEvent, AnswerService, Reference};
pub use indexer::IndexerService;
pub use prompt::build_prompt;
