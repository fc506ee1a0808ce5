//! Prompt construction.
//!
//! Pure functions mapping a query and retrieved documents to chat
//! messages. Deterministic given identical inputs; no I/O.

use serde::{Deserialize, Serialize};

use ladle_retrieval::Document;

/// Chat message sent to the completion upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

const SYSTEM_PROMPT: &str = "\
You are a warm, knowledgeable cooking advisor. Keep a friendly, \
conversational tone while citing facts strictly from the retrieved \
documents. If the documents do not contain enough information or are \
unrelated to the question, answer \"I don't know\" rather than \
inventing content. Where helpful, add a short cooking tip.";

const ANSWER_RULES: &str = "\
Answer rules:
1. Understand the question first, then answer naturally and concisely.
2. Synthesize across documents instead of quoting them verbatim.
3. Cite the supporting document at the end of a sentence as (Doc-<number> or its title).
4. If the document list is empty, insufficient, or unrelated, reply \"I don't know\".
5. Never fabricate details that the documents do not state.";

const EMPTY_CONTEXT: &str = "(no documents were retrieved; reply \"I don't know\")";

/// Format one document for inclusion in the prompt context block.
fn format_document(doc: &Document, rank: usize) -> String {
    let label = doc
        .title
        .as_deref()
        .or(doc.id.as_deref())
        .map(String::from)
        .unwrap_or_else(|| format!("Doc-{rank}"));
    let snippet = doc.content.trim().replace('\n', " ");
    format!("[{rank}] {label} (score={:.3})\n{snippet}", doc.score)
}

/// Build the grounded chat messages from a query and its documents.
pub fn build_messages(query: &str, documents: &[Document]) -> Vec<ChatMessage> {
    let context = if documents.is_empty() {
        EMPTY_CONTEXT.to_string()
    } else {
        documents
            .iter()
            .enumerate()
            .map(|(i, doc)| format_document(doc, i + 1))
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    let user_prompt = format!(
        "Answer the user's question using only the retrieved documents below.\n\n\
         [Question]\n{}\n\n\
         [Retrieved documents]\n{}\n\n\
         {}",
        query.trim(),
        context,
        ANSWER_RULES,
    );

    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(user_prompt),
    ]
}

const REWRITER_SYSTEM_PROMPT: &str = "\
Rewrite the user's query into a form better suited for recipe knowledge-base \
retrieval: keep the original intent exactly (including negative attributes), \
remove conversational filler, and add concrete recipe-related attributes \
(ingredients, cooking method, flavor) where they sharpen the search. When the \
query contains an explicit negation of a concrete item (\"no mushrooms\", \
\"avoid frying\"), replace the rejected item with a same-category alternative \
and phrase the result positively, without negation words. If the query is not \
about recipes at all, output it unchanged.

Output format:
<rewrite>the rewritten query</rewrite>";

/// Build the messages for the query-rewrite call.
pub fn build_rewriter_messages(query: &str) -> Vec<ChatMessage> {
    let user_prompt = format!(
        "Original user query: {}\n\
         Respect the user's original intent. Output only the rewrite block.",
        query.trim(),
    );
    vec![
        ChatMessage::system(REWRITER_SYSTEM_PROMPT),
        ChatMessage::user(user_prompt),
    ]
}

/// Extract the `<rewrite>...</rewrite>` span from rewriter output.
///
/// Returns `None` when the span is missing or empty, so the caller can
/// fall back to the original query.
pub fn extract_rewrite(content: &str) -> Option<String> {
    let after = content.split("<rewrite>").nth(1)?;
    let inner = after.rsplit_once("</rewrite>").map(|(s, _)| s).unwrap_or(after);
    let trimmed = inner.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, title: Option<&str>, content: &str, score: f64) -> Document {
        Document {
            id: Some(id.into()),
            title: title.map(Into::into),
            content: content.into(),
            score,
        }
    }

    #[test]
    fn builds_system_then_user_message() {
        let messages = build_messages("vegan curry substitute", &[]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert!(messages[1].content.contains("vegan curry substitute"));
    }

    #[test]
    fn identical_inputs_yield_identical_prompts() {
        let docs = vec![
            doc("1", Some("Coconut Curry"), "Use coconut milk.", 0.88),
            doc("2", None, "Swap paneer for tofu.", 0.86),
        ];
        let a = build_messages("vegan curry substitute", &docs);
        let b = build_messages("vegan curry substitute", &docs);
        assert_eq!(a, b);
    }

    #[test]
    fn documents_are_ranked_and_labeled() {
        let docs = vec![
            doc("1", Some("Coconut Curry"), "Use coconut\nmilk.", 0.88),
            doc("2", None, "Swap paneer for tofu.", 0.86),
        ];
        let messages = build_messages("q", &docs);
        let prompt = &messages[1].content;
        assert!(prompt.contains("[1] Coconut Curry (score=0.880)"));
        // No title: falls back to the id.
        assert!(prompt.contains("[2] 2 (score=0.860)"));
        // Newlines inside content are flattened.
        assert!(prompt.contains("Use coconut milk."));
    }

    #[test]
    fn empty_document_list_uses_placeholder() {
        let messages = build_messages("q", &[]);
        assert!(messages[1].content.contains("no documents were retrieved"));
    }

    #[test]
    fn rewrite_span_is_extracted() {
        let content = "</think>reasoning</think>\n<rewrite>light vegetable recipes</rewrite>";
        assert_eq!(
            extract_rewrite(content).as_deref(),
            Some("light vegetable recipes")
        );
    }

    #[test]
    fn unterminated_rewrite_span_still_extracts() {
        assert_eq!(
            extract_rewrite("<rewrite> tofu stir fry").as_deref(),
            Some("tofu stir fry")
        );
    }

    #[test]
    fn missing_or_empty_span_yields_none() {
        assert!(extract_rewrite("no markers here").is_none());
        assert!(extract_rewrite("<rewrite>   </rewrite>").is_none());
    }
}
