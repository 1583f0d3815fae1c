//! SSE assembly for both dialects.
//!
//! The mediator's event stream carries only final-channel deltas plus one
//! terminal event; this module dresses it in each dialect's wire framing.

use std::{
    convert::Infallible,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use axum::response::sse::Event;
use futures::{Stream, StreamExt, stream};
use harmony::FinishReason;
use inference::StreamHandle;

use crate::protocol::{
    anthropic::{self, MessageStart, StreamFrame, TextDelta, Usage},
    openai::{ChatCompletionChunk, Delta},
};

fn data_event<T: serde::Serialize>(payload: &T) -> Event {
    let json = serde_json::to_string(payload).unwrap_or_else(|error| {
        log::error!("failed to serialize SSE payload: {error}");
        r#"{"error":"serialization failed"}"#.to_string()
    });

    Event::default().data(json)
}

/// OpenAI chunk framing: a role chunk, content chunks, an empty-delta chunk
/// carrying the finish reason, then `[DONE]`.
pub fn openai_events(
    handle: StreamHandle,
    id: String,
    created: u64,
    model: String,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let head = {
        let chunk = ChatCompletionChunk::new(&id, created, &model, Delta::role(), None);
        stream::once(async move { Ok(data_event(&chunk)) })
    };

    let body = handle.events.map(move |event| {
        let chunk = match event.finish_reason {
            Some(reason) => ChatCompletionChunk::new(&id, created, &model, Delta::default(), Some(reason.to_string())),
            None => ChatCompletionChunk::new(&id, created, &model, Delta::content(event.delta), None),
        };

        Ok(data_event(&chunk))
    });

    let done = stream::once(async { Ok(Event::default().data("[DONE]")) });

    head.chain(body).chain(done)
}

/// Anthropic event framing: `message_start`, one text content block fed by
/// deltas, then `message_delta` with usage and `message_stop`. No `[DONE]`
/// marker in this dialect.
pub fn anthropic_events(
    handle: StreamHandle,
    id: String,
    model: String,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let input_tokens = handle.prompt_tokens;
    // The dialect reports output tokens in the closing frame; counting
    // forwarded deltas approximates it without another tokenizer pass.
    let output_tokens = Arc::new(AtomicUsize::new(0));

    let head = {
        let frames = [
            StreamFrame::MessageStart {
                message: MessageStart {
                    id,
                    r#type: "message".to_string(),
                    role: "assistant".to_string(),
                    content: Vec::new(),
                    model,
                    usage: Usage {
                        input_tokens,
                        output_tokens: 0,
                    },
                },
            },
            StreamFrame::ContentBlockStart {
                index: 0,
                content_block: anthropic::ResponseBlock::text(""),
            },
        ];

        stream::iter(frames.into_iter().map(|frame| Ok(data_event(&frame))))
    };

    let counter = Arc::clone(&output_tokens);
    let body = handle.events.flat_map(move |event| {
        let frames = match event.finish_reason {
            Some(FinishReason::Error) => vec![StreamFrame::Error {
                error: anthropic::ErrorDetails {
                    error_type: "api_error".to_string(),
                    message: "generation failed".to_string(),
                },
            }],
            Some(reason) => vec![
                StreamFrame::ContentBlockStop { index: 0 },
                StreamFrame::MessageDelta {
                    delta: anthropic::MessageDelta {
                        stop_reason: Some(anthropic::stop_reason(reason).to_string()),
                        stop_sequence: None,
                    },
                    usage: Usage {
                        input_tokens,
                        output_tokens: counter.load(Ordering::Relaxed),
                    },
                },
                StreamFrame::MessageStop,
            ],
            None => {
                counter.fetch_add(1, Ordering::Relaxed);
                vec![StreamFrame::ContentBlockDelta {
                    index: 0,
                    delta: TextDelta::new(event.delta),
                }]
            }
        };

        stream::iter(frames.into_iter().map(|frame| Ok(data_event(&frame))))
    });

    head.chain(body)
}

#[cfg(test)]
mod tests {
    use futures::channel::mpsc;
    use harmony::StreamEvent;

    use super::*;

    fn handle_with(events: Vec<StreamEvent>, prompt_tokens: usize) -> StreamHandle {
        let (tx, rx) = mpsc::unbounded();
        for event in events {
            tx.unbounded_send(event).expect("send");
        }
        drop(tx);

        StreamHandle {
            prompt_tokens,
            events: rx,
        }
    }

    fn delta(text: &str) -> StreamEvent {
        StreamEvent {
            channel: "final".to_string(),
            delta: text.to_string(),
            is_final: true,
            finish_reason: None,
        }
    }

    fn terminal(reason: FinishReason) -> StreamEvent {
        StreamEvent {
            channel: "final".to_string(),
            delta: String::new(),
            is_final: true,
            finish_reason: Some(reason),
        }
    }

    async fn render<S: Stream<Item = Result<Event, Infallible>>>(stream: S) -> Vec<String> {
        stream
            .map(|event| format!("{:?}", event.expect("infallible")))
            .collect()
            .await
    }

    #[tokio::test]
    async fn openai_stream_is_role_content_finish_done() {
        let handle = handle_with(
            vec![delta("2 + 2"), delta(" = 4"), terminal(FinishReason::Stop)],
            10,
        );

        let frames = render(openai_events(handle, "chatcmpl-test".into(), 1, "gpt-oss-20b".into())).await;

        assert_eq!(frames.len(), 5);
        assert!(frames[0].contains("assistant"));
        assert!(frames[1].contains("2 + 2"));
        assert!(frames[2].contains(" = 4"));
        assert!(frames[3].contains("finish_reason"));
        assert!(frames[3].contains("stop"));
        assert!(frames[4].contains("[DONE]"));
    }

    #[tokio::test]
    async fn anthropic_stream_frames_the_message_lifecycle() {
        let handle = handle_with(vec![delta("hello"), terminal(FinishReason::Length)], 7);

        let frames = render(anthropic_events(handle, "msg_test".into(), "gpt-oss-20b".into())).await;

        assert_eq!(frames.len(), 6);
        assert!(frames[0].contains("message_start"));
        assert!(frames[0].contains("input_tokens"));
        assert!(frames[1].contains("content_block_start"));
        assert!(frames[2].contains("text_delta"));
        assert!(frames[2].contains("hello"));
        assert!(frames[3].contains("content_block_stop"));
        assert!(frames[4].contains("max_tokens"));
        assert!(frames[4].contains("output_tokens"));
        assert!(frames[5].contains("message_stop"));
    }

    #[tokio::test]
    async fn anthropic_stream_error_emits_an_error_frame() {
        let handle = handle_with(vec![terminal(FinishReason::Error)], 3);

        let frames = render(anthropic_events(handle, "msg_test".into(), "gpt-oss-20b".into())).await;

        assert_eq!(frames.len(), 3);
        assert!(frames[2].contains("api_error"));
    }
}
