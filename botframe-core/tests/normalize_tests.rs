//! Normalization transform tests, including idempotence properties

use proptest::prelude::*;

use botframe_core::protocol::{
    combine_bot_messages, enforce_role_alternation, insert_attachment_messages, Attachment,
    MessageRole, NormalizePolicy, ProtocolMessage, QueryRequest,
};

fn request(query: Vec<ProtocolMessage>) -> QueryRequest {
    QueryRequest::new(query)
}

#[test]
fn alternation_and_attachment_insertion_compose() {
    let mut last = ProtocolMessage::user("what does the file say?");
    last.attachments = vec![Attachment {
        url: "https://files.example/notes.txt".to_string(),
        content_type: "text/plain".to_string(),
        name: "notes.txt".to_string(),
        parsed_content: Some("remember the milk".to_string()),
        inline_ref: None,
    }];
    let input = request(vec![
        ProtocolMessage::user("hello"),
        ProtocolMessage::user("again"),
        last,
    ]);

    let inserted = insert_attachment_messages(&input);
    let normalized = enforce_role_alternation(&inserted, &NormalizePolicy::exempt_system());

    // user+user collapse, synthesized system message survives
    assert_eq!(normalized.query.len(), 3);
    assert_eq!(normalized.query[0].content, "hello\nagain");
    assert_eq!(normalized.query[1].role, MessageRole::System);
    assert!(normalized.query[1].content.contains("remember the milk"));
    assert_eq!(normalized.query[2].content, "what does the file say?");
}

fn arb_role() -> impl Strategy<Value = MessageRole> {
    prop_oneof![
        Just(MessageRole::System),
        Just(MessageRole::User),
        Just(MessageRole::Bot),
    ]
}

fn arb_message() -> impl Strategy<Value = ProtocolMessage> {
    (arb_role(), "[a-z ]{0,12}", any::<u32>()).prop_map(|(role, content, stamp)| {
        let mut message = match role {
            MessageRole::System => ProtocolMessage::system(content),
            MessageRole::User => ProtocolMessage::user(content),
            MessageRole::Bot => ProtocolMessage::bot(content),
        };
        message = message
            .with_message_id(format!("m{stamp}"))
            .with_timestamp(i64::from(stamp));
        message
    })
}

proptest! {
    #[test]
    fn alternation_is_idempotent(query in proptest::collection::vec(arb_message(), 0..12)) {
        let input = request(query);
        let once = enforce_role_alternation(&input, &NormalizePolicy::default());
        let twice = enforce_role_alternation(&once, &NormalizePolicy::default());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn alternation_never_leaves_adjacent_same_role_pairs(
        query in proptest::collection::vec(arb_message(), 0..12),
    ) {
        let normalized = enforce_role_alternation(&request(query), &NormalizePolicy::default());
        for pair in normalized.query.windows(2) {
            prop_assert_ne!(pair[0].role, pair[1].role);
        }
    }

    #[test]
    fn combine_bot_messages_is_idempotent(
        query in proptest::collection::vec(arb_message(), 0..12),
    ) {
        let input = request(query);
        let once = combine_bot_messages(&input);
        let twice = combine_bot_messages(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn transforms_never_change_non_query_fields(
        query in proptest::collection::vec(arb_message(), 0..12),
        temperature in 0.0f32..2.0,
    ) {
        let mut input = request(query);
        input.temperature = temperature;
        input.user_id = "u-fixed".to_string();
        let normalized = enforce_role_alternation(&input, &NormalizePolicy::default());
        prop_assert_eq!(normalized.temperature, temperature);
        prop_assert_eq!(normalized.user_id, "u-fixed");
    }
}
