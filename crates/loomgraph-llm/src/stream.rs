/// Parse a single SSE line from an upstream provider's streaming response.
/// SSE format: `event: <type>\ndata: <json>\n\n`
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_and_data_lines() {
        match parse_sse_line("event: message_start").unwrap() {
            SseParsed::Event(e) => assert_eq!(e, "message_start"),
            _ => panic!("expected event"),
        }
        match parse_sse_line("data: {\"a\":1}").unwrap() {
            SseParsed::Data(d) => assert_eq!(d, "{\"a\":1}"),
            _ => panic!("expected data"),
        }
    }

    #[test]
    fn ignores_unrelated_lines() {
        assert!(parse_sse_line("").is_none());
        assert!(parse_sse_line(": comment").is_none());
    }
}
