use std::io::{self, Write};

use crate::channel::NotificationMessage;

/// Render a received notification for stdout.
///
/// - `json = true`: one compact JSON object per line (`{"event":..,"path":..}`).
/// - `json = false`: the wire line as received, without the trailing newline.
pub fn format_message(message: &NotificationMessage, json: bool) -> String {
    if json {
        match serde_json::to_string(message) {
            Ok(s) => s,
            Err(e) => format!("{{\"error\": \"serialising message: {e}\"}}"),
        }
    } else {
        message.to_string()
    }
}

/// Print one notification and flush, so a piped consumer sees it immediately.
pub fn print_message(out: &mut impl Write, message: &NotificationMessage, json: bool) -> io::Result<()> {
    writeln!(out, "{}", format_message(message, json))?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_output_matches_wire_line() {
        let msg = NotificationMessage::new("created", "/abs/path/note1_output");
        assert_eq!(format_message(&msg, false), "created /abs/path/note1_output");
    }

    #[test]
    fn test_json_output() {
        let msg = NotificationMessage::new("created", "/abs/path/note1_output");
        let value: serde_json::Value = serde_json::from_str(&format_message(&msg, true)).unwrap();
        assert_eq!(value["event"], "created");
        assert_eq!(value["path"], "/abs/path/note1_output");
    }

    #[test]
    fn test_print_message_appends_newline() {
        let mut buf = Vec::new();
        let msg = NotificationMessage::new("created", "/x");
        print_message(&mut buf, &msg, false).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "created /x\n");
    }
}
