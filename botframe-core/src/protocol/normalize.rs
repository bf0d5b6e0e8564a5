//! Multi-turn message normalization
//!
//! Pure, composable transforms over a [`QueryRequest`]: attachment
//! contents become synthesized system messages, runs of same-role
//! messages collapse for providers that require role alternation, and
//! multi-bot histories combine into labelled single turns. Every
//! transform is idempotent: applying it twice produces the same result
//! as applying it once.

use serde::{Deserialize, Serialize};

use crate::protocol::types::{Attachment, MessageRole, ProtocolMessage, QueryRequest};

const TEXT_ATTACHMENT_TEMPLATE: &str = "Your response must be in the language of the relevant \
queries related to the document.\nBelow is the content of {attachment_name}:\n\n{content}";

const URL_ATTACHMENT_TEMPLATE: &str = "Assume you can access the external URL \
{attachment_name}. Your response must be in the language of the relevant queries related to \
the URL.\nUse the URL's content below to respond to the queries:\n\n{content}";

const IMAGE_ATTACHMENT_TEMPLATE: &str = "I have uploaded an image ({attachment_name}). Assume \
that you can see the attached image. First, read the image analysis:\n\n\
<image_analysis>{content}</image_analysis>\n\nUse any relevant parts to inform your response. \
Do NOT reference the image analysis in your response. Respond in the same language as my next \
message.";

const UNPARSED_ATTACHMENT_TEMPLATE: &str = "The user attached a file named {attachment_name} \
of type {content}. Its contents are not available.";

/// Which roles are exempt from alternation collapsing.
///
/// Some deployments treat system messages as framing that must survive
/// as-is; that is a policy choice, not protocol behavior, so it lives in
/// configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizePolicy {
    #[serde(default)]
    pub exempt_roles: Vec<MessageRole>,
}

impl NormalizePolicy {
    /// Exempt system messages from collapsing
    pub fn exempt_system() -> Self {
        Self {
            exempt_roles: vec![MessageRole::System],
        }
    }

    fn is_exempt(&self, role: MessageRole) -> bool {
        self.exempt_roles.contains(&role)
    }
}

fn fill(template: &str, name: &str, content: &str) -> String {
    template
        .replace("{attachment_name}", name)
        .replace("{content}", content)
}

fn render_attachment(attachment: &Attachment) -> String {
    match &attachment.parsed_content {
        Some(parsed) => {
            if attachment.content_type == "text/html" {
                fill(URL_ATTACHMENT_TEMPLATE, &attachment.name, parsed)
            } else if attachment.content_type.contains("image") {
                // Image analyses arrive as "filename***description".
                let description = parsed.split_once("***").map(|(_, d)| d).unwrap_or(parsed);
                fill(IMAGE_ATTACHMENT_TEMPLATE, &attachment.name, description)
            } else {
                fill(TEXT_ATTACHMENT_TEMPLATE, &attachment.name, parsed)
            }
        }
        None => fill(
            UNPARSED_ATTACHMENT_TEMPLATE,
            &attachment.name,
            &attachment.content_type,
        ),
    }
}

/// Insert a synthesized system message for each attachment on the final
/// message, immediately before that message and in attachment order.
///
/// The final element of the returned query is still the most recent user
/// turn. Re-applying detects the already-inserted block and is a no-op.
pub fn insert_attachment_messages(request: &QueryRequest) -> QueryRequest {
    let Some(last) = request.query.last() else {
        return request.clone();
    };
    if last.attachments.is_empty() {
        return request.clone();
    }

    let synthesized: Vec<ProtocolMessage> = last
        .attachments
        .iter()
        .map(|attachment| ProtocolMessage::system(render_attachment(attachment)))
        .collect();

    let preceding = &request.query[..request.query.len() - 1];
    if preceding.len() >= synthesized.len() {
        let tail = &preceding[preceding.len() - synthesized.len()..];
        let already_inserted = tail
            .iter()
            .zip(&synthesized)
            .all(|(existing, wanted)| existing.role == wanted.role && existing.content == wanted.content);
        if already_inserted {
            return request.clone();
        }
    }

    let mut query = Vec::with_capacity(request.query.len() + synthesized.len());
    query.extend_from_slice(preceding);
    query.extend(synthesized);
    query.push(last.clone());

    QueryRequest {
        query,
        ..request.clone()
    }
}

fn merge_attachments(earlier: &[Attachment], later: &[Attachment]) -> Vec<Attachment> {
    let mut merged: Vec<Attachment> = Vec::with_capacity(earlier.len() + later.len());
    for attachment in earlier.iter().chain(later) {
        if !merged.iter().any(|a| a.url == attachment.url) {
            merged.push(attachment.clone());
        }
    }
    merged
}

/// Collapse runs of consecutive same-role messages into one message,
/// contents joined by a newline, carrying the earliest message's
/// identifier and timestamp. Roles named by `policy` are left untouched.
pub fn enforce_role_alternation(request: &QueryRequest, policy: &NormalizePolicy) -> QueryRequest {
    let mut merged: Vec<ProtocolMessage> = Vec::with_capacity(request.query.len());
    for message in &request.query {
        match merged.last_mut() {
            Some(previous)
                if previous.role == message.role && !policy.is_exempt(message.role) =>
            {
                previous.content = format!("{}\n{}", previous.content, message.content);
                previous.attachments =
                    merge_attachments(&previous.attachments, &message.attachments);
                previous.feedback.extend(message.feedback.iter().cloned());
            }
            _ => merged.push(message.clone()),
        }
    }

    QueryRequest {
        query: merged,
        ..request.clone()
    }
}

/// Combine runs of consecutive bot messages into one bot turn.
///
/// When a run spans multiple senders, each piece is prefixed with its
/// sender identifier so the peer model can tell the voices apart.
pub fn combine_bot_messages(request: &QueryRequest) -> QueryRequest {
    let mut combined: Vec<ProtocolMessage> = Vec::with_capacity(request.query.len());
    let mut run: Vec<ProtocolMessage> = Vec::new();

    let flush = |run: &mut Vec<ProtocolMessage>, out: &mut Vec<ProtocolMessage>| {
        if run.is_empty() {
            return;
        }
        if run.len() == 1 {
            out.extend(run.drain(..));
            return;
        }
        let mut senders: Vec<&str> = run
            .iter()
            .filter_map(|m| m.sender_id.as_deref())
            .collect();
        senders.dedup();
        let multi_sender = senders.len() > 1;
        let content = run
            .iter()
            .map(|m| match (&m.sender_id, multi_sender) {
                (Some(sender), true) => format!("{sender}: {}", m.content),
                _ => m.content.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n");
        let mut attachments = Vec::new();
        let mut feedback = Vec::new();
        for message in run.iter() {
            attachments = merge_attachments(&attachments, &message.attachments);
            feedback.extend(message.feedback.iter().cloned());
        }
        let earliest = &run[0];
        let mut message = ProtocolMessage::bot(content)
            .with_message_id(earliest.message_id.clone())
            .with_timestamp(earliest.timestamp);
        message.attachments = attachments;
        message.feedback = feedback;
        out.push(message);
        run.clear();
    };

    for message in &request.query {
        if message.role == MessageRole::Bot {
            run.push(message.clone());
        } else {
            flush(&mut run, &mut combined);
            combined.push(message.clone());
        }
    }
    flush(&mut run, &mut combined);

    QueryRequest {
        query: combined,
        ..request.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::ContentType;

    fn request(query: Vec<ProtocolMessage>) -> QueryRequest {
        let mut request = QueryRequest::new(query);
        request.user_id = "u1".to_string();
        request.conversation_id = "c1".to_string();
        request.message_id = "m1".to_string();
        request
    }

    fn text_attachment(name: &str, parsed: Option<&str>) -> Attachment {
        Attachment {
            url: format!("https://files.example/{name}"),
            content_type: "text/plain".to_string(),
            name: name.to_string(),
            parsed_content: parsed.map(str::to_string),
            inline_ref: None,
        }
    }

    #[test]
    fn alternation_example_from_the_protocol_docs() {
        let input = request(vec![
            ProtocolMessage::user("hi"),
            ProtocolMessage::user("there"),
            ProtocolMessage::bot("hello"),
        ]);
        let normalized = enforce_role_alternation(&input, &NormalizePolicy::default());
        assert_eq!(normalized.query.len(), 2);
        assert_eq!(normalized.query[0].content, "hi\nthere");
        assert_eq!(normalized.query[0].role, MessageRole::User);
        assert_eq!(normalized.query[1].content, "hello");
    }

    #[test]
    fn alternation_keeps_earliest_identity() {
        let input = request(vec![
            ProtocolMessage::user("first").with_message_id("a").with_timestamp(1),
            ProtocolMessage::user("second").with_message_id("b").with_timestamp(2),
        ]);
        let normalized = enforce_role_alternation(&input, &NormalizePolicy::default());
        assert_eq!(normalized.query[0].message_id, "a");
        assert_eq!(normalized.query[0].timestamp, 1);
    }

    #[test]
    fn alternation_respects_exempt_roles() {
        let input = request(vec![
            ProtocolMessage::system("rules"),
            ProtocolMessage::system("more rules"),
            ProtocolMessage::user("hi"),
        ]);
        let normalized = enforce_role_alternation(&input, &NormalizePolicy::exempt_system());
        assert_eq!(normalized.query.len(), 3);

        let collapsed = enforce_role_alternation(&input, &NormalizePolicy::default());
        assert_eq!(collapsed.query.len(), 2);
        assert_eq!(collapsed.query[0].content, "rules\nmore rules");
    }

    #[test]
    fn alternation_merges_attachments_without_duplicates() {
        let shared = text_attachment("notes.txt", None);
        let mut first = ProtocolMessage::user("a");
        first.attachments = vec![shared.clone()];
        let mut second = ProtocolMessage::user("b");
        second.attachments = vec![shared.clone(), text_attachment("other.txt", None)];

        let normalized =
            enforce_role_alternation(&request(vec![first, second]), &NormalizePolicy::default());
        assert_eq!(normalized.query[0].attachments.len(), 2);
    }

    #[test]
    fn attachment_insertion_precedes_final_message() {
        let mut last = ProtocolMessage::user("summarize this");
        last.attachments = vec![text_attachment("report.txt", Some("quarterly numbers"))];
        let input = request(vec![ProtocolMessage::user("hello"), last]);

        let normalized = insert_attachment_messages(&input);
        assert_eq!(normalized.query.len(), 3);
        assert_eq!(normalized.query[1].role, MessageRole::System);
        assert!(normalized.query[1].content.contains("report.txt"));
        assert!(normalized.query[1].content.contains("quarterly numbers"));
        // The final element is still the most recent user turn.
        assert_eq!(normalized.query[2].content, "summarize this");
    }

    #[test]
    fn attachment_insertion_without_parsed_content_uses_placeholder() {
        let mut last = ProtocolMessage::user("what is this?");
        last.attachments = vec![text_attachment("data.bin", None)];
        let normalized = insert_attachment_messages(&request(vec![last]));
        assert!(normalized.query[0].content.contains("data.bin"));
        assert!(normalized.query[0].content.contains("not available"));
    }

    #[test]
    fn attachment_insertion_is_idempotent() {
        let mut last = ProtocolMessage::user("look");
        last.attachments = vec![
            text_attachment("one.txt", Some("first")),
            text_attachment("two.txt", Some("second")),
        ];
        let input = request(vec![last]);
        let once = insert_attachment_messages(&input);
        let twice = insert_attachment_messages(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn alternation_is_idempotent() {
        let input = request(vec![
            ProtocolMessage::user("a"),
            ProtocolMessage::user("b"),
            ProtocolMessage::bot("c"),
            ProtocolMessage::bot("d"),
        ]);
        let once = enforce_role_alternation(&input, &NormalizePolicy::default());
        let twice = enforce_role_alternation(&once, &NormalizePolicy::default());
        assert_eq!(once, twice);
    }

    #[test]
    fn combine_bot_messages_labels_multiple_senders() {
        let input = request(vec![
            ProtocolMessage::user("question"),
            ProtocolMessage::bot("first answer").with_sender_id("alpha"),
            ProtocolMessage::bot("second answer").with_sender_id("beta"),
        ]);
        let combined = combine_bot_messages(&input);
        assert_eq!(combined.query.len(), 2);
        assert_eq!(
            combined.query[1].content,
            "alpha: first answer\nbeta: second answer"
        );
    }

    #[test]
    fn combine_bot_messages_carries_feedback_forward() {
        use crate::protocol::types::{FeedbackType, MessageFeedback};

        let mut first = ProtocolMessage::bot("part one");
        first.feedback = vec![MessageFeedback {
            kind: FeedbackType::Like,
            reason: None,
        }];
        let mut second = ProtocolMessage::bot("part two");
        second.feedback = vec![MessageFeedback {
            kind: FeedbackType::Dislike,
            reason: Some("too long".to_string()),
        }];

        let combined = combine_bot_messages(&request(vec![first, second]));
        assert_eq!(combined.query.len(), 1);
        let feedback = &combined.query[0].feedback;
        assert_eq!(feedback.len(), 2);
        assert_eq!(feedback[0].kind, FeedbackType::Like);
        assert_eq!(feedback[1].kind, FeedbackType::Dislike);
    }

    #[test]
    fn combine_bot_messages_single_sender_is_unlabelled() {
        let input = request(vec![
            ProtocolMessage::bot("part one").with_sender_id("alpha"),
            ProtocolMessage::bot("part two").with_sender_id("alpha"),
        ]);
        let combined = combine_bot_messages(&input);
        assert_eq!(combined.query[0].content, "part one\npart two");
    }

    #[test]
    fn transforms_preserve_request_fields() {
        let mut input = request(vec![ProtocolMessage::user("hi")]);
        input.temperature = 0.2;
        input.stop_sequences = vec!["END".to_string()];
        let normalized = enforce_role_alternation(&input, &NormalizePolicy::default());
        assert_eq!(normalized.temperature, 0.2);
        assert_eq!(normalized.stop_sequences, vec!["END".to_string()]);
        assert_eq!(normalized.query[0].content_type, ContentType::Markdown);
    }
}
