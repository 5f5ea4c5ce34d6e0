use std::io::BufRead as _;

use ai_message_stream::prelude::*;

/// Folds a JSONL event log from stdin and prints the resulting messages.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut events = Vec::new();
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        events.push(serde_json::from_str::<Event>(&line)?);
    }

    let assembler = MessageAssembler::replay(&events);
    for message in assembler.get_all_messages() {
        if let Some(done) = assembler.get_final_message(&message.id) {
            println!("{}", serde_json::to_string_pretty(&done)?);
        }
    }
    Ok(())
}
