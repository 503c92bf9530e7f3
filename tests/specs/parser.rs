// SPDX-License-Identifier: MIT

//! S6: malformed lines are tolerated and counted.

use relay_adapters::{ClaudeParser, EngineParser, OpenCodeParser};
use relay_core::{EngineEvent, RunOutcome};

#[test]
fn claude_parser_survives_malformed_lines() {
    let mut parser = ClaudeParser::new();
    let input = concat!(
        "{\"type\":\"system\",\"subtype\":\"init\"}\n",
        "{bad json}\n",
        "{\"type\":\"stream_event\",\"event\":{\"type\":\"content_block_delta\",",
        "\"delta\":{\"type\":\"text_delta\",\"text\":\"ok\"}}}\n",
    );
    let mut events = parser.push(input.as_bytes());
    events.extend(parser.finish(RunOutcome::Success));

    let types: Vec<&str> = events.iter().map(|event| event.event_type()).collect();
    assert_eq!(types, vec!["engine_meta", "text_delta", "run_finished"]);
    assert_eq!(parser.malformed_lines(), 1);
    assert!(matches!(
        events.last(),
        Some(EngineEvent::RunFinished {
            status: RunOutcome::Success
        })
    ));
}

#[test]
fn opencode_parser_survives_malformed_lines() {
    let mut parser = OpenCodeParser::new();
    let input = concat!(
        "{\"type\":\"started\"}\n",
        "{bad json}\n",
        "{\"type\":\"text\",\"part\":{\"text\":\"ok\"}}\n",
    );
    let mut events = parser.push(input.as_bytes());
    events.extend(parser.finish(RunOutcome::Success));

    let types: Vec<&str> = events.iter().map(|event| event.event_type()).collect();
    assert_eq!(types, vec!["run_started", "text_delta", "run_finished"]);
    assert_eq!(parser.malformed_lines(), 1);
}

#[test]
fn terminal_event_is_unique_across_push_and_finish() {
    let mut parser = ClaudeParser::new();
    let events = parser.push(
        b"{\"type\":\"result\",\"subtype\":\"success\"}\n{\"type\":\"result\",\"subtype\":\"success\"}\n",
    );
    let terminals = events.iter().filter(|event| event.is_terminal()).count();
    assert_eq!(terminals, 1);
    assert!(parser.finish(RunOutcome::Unknown).is_empty());
}
