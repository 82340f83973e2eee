//! Wire codec
//!
//! Pure conversions between raw byte buffers and [`Notification`]/[`Command`]
//! records. No I/O, no state.
//!
//! ## Record format
//!
//! One UTF-8 line of `|`-separated fields:
//!
//! ```text
//! notification: deviceId|notificationId|TYPE|contents[|data]
//! command:      deviceId|commandId|TYPE|data1|data2
//! ```
//!
//! Field values are escaped by the producer: `\\` for a backslash, `\|` for the
//! delimiter, `\n` and `\r` for line breaks. A record may end with one `\n`
//! (or `\r\n`) terminator, which decoding ignores.
//!
//! ## Example
//!
//! ```rust
//! use notifier_bridge_core::protocol::codec;
//! use notifier_bridge_core::protocol::{Notification, NotificationType};
//!
//! let n = Notification::new("phone", "42", NotificationType::Sms, "a|b");
//! let bytes = codec::encode_notification(&n);
//! assert_eq!(bytes, b"phone|42|SMS|a\\|b");
//! assert_eq!(codec::decode_notification(&bytes).unwrap(), n);
//! ```

use crate::error::DecodeError;
use crate::protocol::{Command, CommandType, Notification, NotificationType};

/// Field separator
pub const FIELD_DELIMITER: char = '|';

/// Escape character for field values
pub const ESCAPE_CHAR: char = '\\';

/// Line terminator appended by the `*_line` encoders
pub const RECORD_TERMINATOR: u8 = b'\n';

/// Fields in a notification without data
pub const NOTIFICATION_MIN_FIELDS: usize = 4;

/// Fields in a notification with data
pub const NOTIFICATION_MAX_FIELDS: usize = 5;

/// Fields in every command
pub const COMMAND_FIELDS: usize = 5;

// deviceId, id and type must be present before the type can be checked
const TYPE_FIELD_INDEX: usize = 2;

/// Decode one notification record
pub fn decode_notification(bytes: &[u8]) -> Result<Notification, DecodeError> {
    let fields = record_fields(bytes, NOTIFICATION_MIN_FIELDS)?;
    let notification_type: NotificationType = fields[TYPE_FIELD_INDEX].parse()?;
    check_field_count(&fields, NOTIFICATION_MIN_FIELDS, NOTIFICATION_MAX_FIELDS)?;

    let mut fields = fields.into_iter();
    let device_id = next_field(&mut fields);
    let notification_id = next_field(&mut fields);
    let _type = fields.next();
    let contents = next_field(&mut fields);
    let data = fields.next();

    Ok(Notification {
        device_id,
        notification_id,
        notification_type,
        contents,
        data,
    })
}

/// Encode a notification record (no terminator)
pub fn encode_notification(notification: &Notification) -> Vec<u8> {
    let mut fields = vec![
        notification.device_id.as_str(),
        notification.notification_id.as_str(),
        notification.notification_type.as_str(),
        notification.contents.as_str(),
    ];
    if let Some(data) = &notification.data {
        fields.push(data.as_str());
    }
    join_fields(&fields)
}

/// Encode a notification record followed by the line terminator
pub fn encode_notification_line(notification: &Notification) -> Vec<u8> {
    let mut bytes = encode_notification(notification);
    bytes.push(RECORD_TERMINATOR);
    bytes
}

/// Decode one command record
pub fn decode_command(bytes: &[u8]) -> Result<Command, DecodeError> {
    let fields = record_fields(bytes, COMMAND_FIELDS)?;
    let command_type: CommandType = fields[TYPE_FIELD_INDEX].parse()?;
    check_field_count(&fields, COMMAND_FIELDS, COMMAND_FIELDS)?;

    let mut fields = fields.into_iter();
    let device_id = next_field(&mut fields);
    let command_id = next_field(&mut fields);
    let _type = fields.next();
    let data1 = next_field(&mut fields);
    let data2 = next_field(&mut fields);

    Ok(Command {
        device_id,
        command_id,
        command_type,
        data1,
        data2,
    })
}

/// Encode a command record (no terminator)
pub fn encode_command(command: &Command) -> Vec<u8> {
    join_fields(&[
        command.device_id.as_str(),
        command.command_id.as_str(),
        command.command_type.as_str(),
        command.data1.as_str(),
        command.data2.as_str(),
    ])
}

/// Encode a command record followed by the line terminator
pub fn encode_command_line(command: &Command) -> Vec<u8> {
    let mut bytes = encode_command(command);
    bytes.push(RECORD_TERMINATOR);
    bytes
}

/// Escape a single field value
pub fn escape_field(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ESCAPE_CHAR => out.push_str("\\\\"),
            FIELD_DELIMITER => out.push_str("\\|"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Split a record into unescaped fields
pub fn split_fields(record: &str) -> Result<Vec<String>, DecodeError> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = record.chars();

    while let Some(c) = chars.next() {
        match c {
            ESCAPE_CHAR => match chars.next() {
                Some(ESCAPE_CHAR) => current.push(ESCAPE_CHAR),
                Some(FIELD_DELIMITER) => current.push(FIELD_DELIMITER),
                Some('n') => current.push('\n'),
                Some('r') => current.push('\r'),
                Some(other) => {
                    return Err(DecodeError::MalformedField(format!(
                        "invalid escape sequence '\\{}' in field {}",
                        other,
                        fields.len()
                    )))
                }
                None => {
                    return Err(DecodeError::MalformedField(format!(
                        "dangling escape at end of field {}",
                        fields.len()
                    )))
                }
            },
            FIELD_DELIMITER => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);

    Ok(fields)
}

fn join_fields(fields: &[&str]) -> Vec<u8> {
    let mut out = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(FIELD_DELIMITER);
        }
        out.push_str(&escape_field(field));
    }
    out.into_bytes()
}

/// UTF-8 check, terminator strip and split; guarantees the type field exists
fn record_fields(bytes: &[u8], expected: usize) -> Result<Vec<String>, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|e| {
        DecodeError::MalformedField(format!("record is not valid UTF-8: {}", e))
    })?;
    let text = strip_terminator(text);

    let fields = split_fields(text)?;
    if fields.len() <= TYPE_FIELD_INDEX {
        return Err(DecodeError::Truncated {
            expected,
            found: fields.len(),
        });
    }
    Ok(fields)
}

fn check_field_count(fields: &[String], min: usize, max: usize) -> Result<(), DecodeError> {
    if fields.len() < min {
        return Err(DecodeError::Truncated {
            expected: min,
            found: fields.len(),
        });
    }
    if fields.len() > max {
        return Err(DecodeError::MalformedField(format!(
            "expected at most {} fields, found {}",
            max,
            fields.len()
        )));
    }
    Ok(())
}

fn strip_terminator(text: &str) -> &str {
    let text = text.strip_suffix('\n').unwrap_or(text);
    text.strip_suffix('\r').unwrap_or(text)
}

fn next_field(fields: &mut impl Iterator<Item = String>) -> String {
    fields.next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_notification_without_data() {
        let n = decode_notification(b"phone|abc|RING|Incoming call").unwrap();
        assert_eq!(n.device_id, "phone");
        assert_eq!(n.notification_id, "abc");
        assert_eq!(n.notification_type, NotificationType::Ring);
        assert_eq!(n.contents, "Incoming call");
        assert_eq!(n.data, None);
    }

    #[test]
    fn test_decode_notification_with_data() {
        let n = decode_notification(b"phone|abc|BATTERY|Charging|85\n").unwrap();
        assert_eq!(n.contents, "Charging");
        assert_eq!(n.data.as_deref(), Some("85"));
    }

    #[test]
    fn test_empty_data_is_kept() {
        let n = decode_notification(b"phone|abc|PING||").unwrap();
        assert_eq!(n.contents, "");
        assert_eq!(n.data.as_deref(), Some(""));
        assert_eq!(encode_notification(&n), b"phone|abc|PING||");
    }

    #[test]
    fn test_unknown_type_checked_before_count() {
        let err = decode_notification(b"deviceA|bogusType|hello").unwrap_err();
        assert_eq!(err, DecodeError::UnknownType("hello".to_string()));

        let err = decode_notification(b"deviceA|n1|bogusType|hello").unwrap_err();
        assert_eq!(err, DecodeError::UnknownType("bogusType".to_string()));
    }

    #[test]
    fn test_truncated() {
        assert_eq!(
            decode_notification(b"deviceA|n1").unwrap_err(),
            DecodeError::Truncated {
                expected: 4,
                found: 2
            }
        );
        assert_eq!(
            decode_notification(b"deviceA|n1|SMS").unwrap_err(),
            DecodeError::Truncated {
                expected: 4,
                found: 3
            }
        );
        assert_eq!(
            decode_command(b"deviceA|c1|DIAL|555").unwrap_err(),
            DecodeError::Truncated {
                expected: 5,
                found: 4
            }
        );
        assert!(matches!(
            decode_notification(b""),
            Err(DecodeError::Truncated { found: 1, .. })
        ));
    }

    #[test]
    fn test_too_many_fields() {
        assert!(matches!(
            decode_notification(b"d|n|SMS|a|b|c"),
            Err(DecodeError::MalformedField(_))
        ));
        assert!(matches!(
            decode_command(b"d|c|QUERY|||"),
            Err(DecodeError::MalformedField(_))
        ));
    }

    #[test]
    fn test_bad_escapes() {
        assert!(matches!(
            decode_notification(b"d|n|SMS|bad \\x escape"),
            Err(DecodeError::MalformedField(_))
        ));
        assert!(matches!(
            decode_notification(b"d|n|SMS|dangling\\"),
            Err(DecodeError::MalformedField(_))
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        assert!(matches!(
            decode_notification(&[b'd', b'|', 0xff, 0xfe]),
            Err(DecodeError::MalformedField(_))
        ));
    }

    #[test]
    fn test_escaping_round_trip() {
        let n = Notification::new(
            "dev|ice",
            "id\\1",
            NotificationType::Sms,
            "line one\nline two\r\n| pipe",
        )
        .with_data("+1 555");
        let encoded = encode_notification(&n);
        assert!(!encoded.contains(&b'\n'));
        assert_eq!(decode_notification(&encoded).unwrap(), n);

        let line = encode_notification_line(&n);
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(decode_notification(&line).unwrap(), n);
    }

    #[test]
    fn test_command_round_trip() {
        let cmd = Command::with_id("phone", "c-1", CommandType::SendSms, "555", "see you | soon");
        let encoded = encode_command(&cmd);
        assert_eq!(encoded, b"phone|c-1|SEND_SMS|555|see you \\| soon");
        assert_eq!(decode_command(&encoded).unwrap(), cmd);

        let hangup = Command::with_id("phone", "c-2", CommandType::Hangup, "", "");
        assert_eq!(encode_command(&hangup), b"phone|c-2|HANGUP||");
        assert_eq!(decode_command(&encode_command_line(&hangup)).unwrap(), hangup);
    }

    const AWKWARD_VALUES: [&str; 8] = [
        "",
        "|",
        "\\",
        "\n",
        "\r\n",
        "a|b\\c\nd\re",
        "\\|",
        "ünï|cødé 設備",
    ];

    #[test]
    fn test_every_notification_type_round_trips() {
        for notification_type in NotificationType::ALL {
            for value in AWKWARD_VALUES {
                let bare = Notification::new(value, value, notification_type, value);
                let with_data = bare.clone().with_data(value);

                for n in [bare, with_data] {
                    assert_eq!(decode_notification(&encode_notification(&n)).unwrap(), n);
                    assert_eq!(decode_notification(&encode_notification_line(&n)).unwrap(), n);
                }
            }
        }
    }

    #[test]
    fn test_every_command_type_round_trips() {
        for command_type in CommandType::ALL {
            for value in AWKWARD_VALUES {
                for other in AWKWARD_VALUES {
                    let cmd = Command::with_id(value, other, command_type, value, other);
                    assert_eq!(decode_command(&encode_command(&cmd)).unwrap(), cmd);
                    assert_eq!(decode_command(&encode_command_line(&cmd)).unwrap(), cmd);
                }
            }
        }
    }

    #[test]
    fn test_device_id_is_opaque() {
        let n = decode_notification("設備|1|USER|ünïcode".as_bytes()).unwrap();
        assert_eq!(n.device_id, "設備");
        assert_eq!(n.contents, "ünïcode");
    }
}
