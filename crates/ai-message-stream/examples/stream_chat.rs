use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ai_message_stream::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), StreamError> {
    init_observability();
    let prompt = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let prompt = if prompt.trim().is_empty() {
        "Stream a greeting.".to_string()
    } else {
        prompt
    };

    let client = StreamClient::from_env()?;
    let printed = Arc::new(AtomicUsize::new(0));
    let cursor = printed.clone();
    let _subscription = client.subscribe(move |message: &Message| {
        let text = message.text();
        let start = cursor.load(Ordering::SeqCst).min(text.len());
        if let Some(fresh) = text.get(start..) {
            print!("{fresh}");
        }
        cursor.store(text.len(), Ordering::SeqCst);
        if message.streaming_state == Some(StreamingState::Done) {
            println!();
            for tool in message.parts.iter().filter_map(Part::as_tool) {
                println!("[tool {} {:?}] input={:?}", tool.tool_name, tool.status, tool.input);
            }
            cursor.store(0, Ordering::SeqCst);
        }
    });

    client.send(SendInput::text(prompt)).await;
    if client.state() == RequestState::Error {
        eprintln!("request failed");
    }
    Ok(())
}
