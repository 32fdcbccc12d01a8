use bytes::Bytes;
use tracing::{debug, info};
use zsocket::{CloseReason, Session, SessionHandler};

/// Prints whatever the server sends.
pub struct ConsoleHandler;

impl SessionHandler for ConsoleHandler {
    fn on_connect(&self, session: &Session) {
        info!("Session {} connected", session.id());
    }

    fn on_close(&self, session: &Session, reason: CloseReason) {
        info!("Session {} closed: {}", session.id(), reason);
        println!("\n[closed] {}", reason);
    }

    fn on_data(&self, _session: &Session, data: Bytes) {
        println!("[bytes] {:?}", data);
    }

    fn on_text(&self, _session: &Session, text: String) {
        println!("[text] {}", text);
    }

    fn on_pack(&self, _session: &Session, pack: serde_json::Value) {
        match serde_json::to_string_pretty(&pack) {
            Ok(pretty) => println!("[pack] {}", pretty),
            Err(e) => debug!("Failed to format pack: {}", e),
        }
    }
}

/// One line of user input
#[derive(Debug, PartialEq)]
pub enum Input {
    Quit,
    Text(String),
    Bytes(Vec<u8>),
    Pack(serde_json::Value),
}

/// Parses a line typed at the prompt.
///
/// `/pack <json>` sends a pack, `/bytes <text>` sends raw bytes, `quit`
/// exits, anything else is sent as text.
pub fn parse_input(line: &str) -> Result<Option<Input>, String> {
    let input = line.trim();

    if input.is_empty() {
        return Ok(None);
    }

    if input == "quit" || input == "exit" {
        return Ok(Some(Input::Quit));
    }

    if let Some(rest) = input.strip_prefix("/pack") {
        let pack = serde_json::from_str(rest.trim())
            .map_err(|e| format!("Invalid JSON for /pack: {}", e))?;
        return Ok(Some(Input::Pack(pack)));
    }

    if let Some(rest) = input.strip_prefix("/bytes") {
        return Ok(Some(Input::Bytes(rest.trim().as_bytes().to_vec())));
    }

    Ok(Some(Input::Text(input.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_text() {
        assert_eq!(
            parse_input("hello\n").unwrap(),
            Some(Input::Text("hello".to_string()))
        );
        assert_eq!(parse_input("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_quit() {
        assert_eq!(parse_input("quit").unwrap(), Some(Input::Quit));
        assert_eq!(parse_input("exit").unwrap(), Some(Input::Quit));
    }

    #[test]
    fn test_parse_pack() {
        assert_eq!(
            parse_input(r#"/pack {"cmd": "PING"}"#).unwrap(),
            Some(Input::Pack(json!({"cmd": "PING"})))
        );
        assert!(parse_input("/pack {oops").is_err());
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(
            parse_input("/bytes abc").unwrap(),
            Some(Input::Bytes(b"abc".to_vec()))
        );
    }
}
