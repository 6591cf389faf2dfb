use super::*;

const STREAM: &str = "event: session\ndata: {\"session_id\":\"kyc-session-1\"}\n\n\
event: text\ndata: {\"text\":\"Hello\"}\n\n\
event: text\ndata: {\"text\":\" wörld ✓\"}\n\n\
event: error\ndata: upstream timed out\n\n\
event: stop\ndata: {\"reason\":\"end_turn\"}\n\n";

fn event_names(frames: &[SseFrame]) -> Vec<&str> {
    frames.iter().map(|frame| frame.event.as_str()).collect()
}

#[test]
fn decodes_frames_in_order() {
    let frames = decode_all(STREAM);
    assert_eq!(
        event_names(&frames),
        vec!["session", "text", "text", "error", "stop"]
    );
    assert_eq!(
        frames[3].payload,
        FramePayload::Text("upstream timed out".into())
    );
    assert_eq!(
        frames[1].payload,
        FramePayload::Json(serde_json::json!({"text": "Hello"}))
    );
}

#[test]
fn any_chunk_split_matches_unchunked_decoding() {
    let expected = decode_all(STREAM);
    let boundaries: Vec<usize> = STREAM.char_indices().map(|(index, _)| index).collect();
    for &split in &boundaries {
        let mut decoder = SseDecoder::new();
        let mut frames = decoder.push(&STREAM[..split]);
        frames.extend(decoder.push(&STREAM[split..]));
        frames.extend(decoder.flush());
        assert_eq!(frames, expected, "split at byte {split}");
    }
}

#[test]
fn byte_chunks_split_inside_multibyte_characters() {
    let expected = decode_all(STREAM);
    let bytes = STREAM.as_bytes();
    for size in [1, 2, 3, 5, 7] {
        let mut decoder = SseDecoder::new();
        let mut frames = Vec::new();
        for chunk in bytes.chunks(size) {
            frames.extend(decoder.push_bytes(chunk));
        }
        frames.extend(decoder.flush());
        assert_eq!(frames, expected, "chunk size {size}");
    }
}

#[test]
fn crlf_framing_decodes_like_lf() {
    let crlf = STREAM.replace('\n', "\r\n");
    assert_eq!(decode_all(&crlf), decode_all(STREAM));

    let mut decoder = SseDecoder::new();
    let mut frames = decoder.push("event: text\r");
    frames.extend(decoder.push("\ndata: {\"text\":\"a\"}\r"));
    frames.extend(decoder.push("\n\r\n"));
    assert_eq!(event_names(&frames), vec!["text"]);
}

#[test]
fn flush_emits_frame_without_trailing_blank_line() {
    let mut decoder = SseDecoder::new();
    let frames = decoder.push("event: stop\ndata: {\"reason\":\"cut\"}");
    assert!(frames.is_empty());
    let last = decoder.flush().expect("pending frame");
    assert_eq!(last.event, "stop");
    assert!(decoder.flush().is_none());
}

#[test]
fn incomplete_frames_are_dropped() {
    let frames = decode_all(
        "event: text\n\ndata: {\"text\":\"orphan\"}\n\n\n\n\
         event: warning\ndata: {\"message\":\"kept\"}\n\n",
    );
    assert_eq!(event_names(&frames), vec!["warning"]);
}

#[test]
fn repeated_blank_lines_are_noops() {
    let frames = decode_all("\n\n\nevent: text\ndata: {\"text\":\"x\"}\n\n\n\n");
    assert_eq!(frames.len(), 1);
}

#[test]
fn ignores_comments_and_unknown_fields() {
    let frames = decode_all(": keep-alive\nid: 7\nretry: 1000\nevent: init\ndata: {}\n\n");
    assert_eq!(event_names(&frames), vec!["init"]);
}

#[test]
fn multiple_data_lines_join_with_newline() {
    let frames = decode_all("event: error\ndata: first\ndata: second\n\n");
    assert_eq!(
        frames[0].payload,
        FramePayload::Text("first\nsecond".into())
    );
}

#[test]
fn utf8_prefix_holds_back_partial_sequences() {
    let check = "✓".as_bytes();
    assert_eq!(complete_utf8_prefix(&check[..1]), 0);
    assert_eq!(complete_utf8_prefix(&check[..2]), 0);
    assert_eq!(complete_utf8_prefix(check), 3);
    assert_eq!(complete_utf8_prefix(b"abc"), 3);
}
