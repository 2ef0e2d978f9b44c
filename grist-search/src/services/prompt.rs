use std::fmt::Write as _;

use super::Reference;

/// Compose the grounded-answer prompt: retrieved context first, then the
/// question. The generator is told to stay inside the context.
pub fn build_prompt(question: &str, references: &[Reference]) -> String {
    let mut prompt = String::from(
        "Answer the question using only the context below. \
         If the context does not contain the answer, say that you do not know.\n\nContext:\n",
    );
    for (n, reference) in references.iter().enumerate() {
        let _ = writeln!(prompt, "[{}] {}", n + 1, reference.content);
    }
    let _ = write!(prompt, "\nQuestion: {question}\nAnswer:");
    prompt
}
