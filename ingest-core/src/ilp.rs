//! A concrete [`LineParser`] for the influx-style line protocol this
//! ingestion scheduler is designed to accept:
//!
//! ```text
//! measurement,tag1=value1,tag2=value2 field1=1.5,field2=2i,field3="str" 1465839830100400200
//! ```
//!
//! Tags and the trailing timestamp are optional; at least one field is
//! required. Field values are typed by suffix/quoting: a trailing `i` means
//! a 64-bit integer, double quotes mean a string, bare `t`/`f`/`true`/`false`
//! mean a boolean, and anything else parses as a float. This is a
//! deliberately small, permissive parser: it is the thing that is replaced
//! wholesale by a real wire-format integration in a production deployment,
//! not a piece of business logic worth hardening against adversarial
//! input.

use ingest_errors::{internal, IngestResult};

use crate::facade::{EntityType, LineParser, ParsedEntity, ParsedMeasurement, ParsedValue};

/// Parses influx-style line-protocol text out of a byte buffer, one
/// newline-terminated line at a time.
#[derive(Debug, Default)]
pub struct IlpLineParser;

impl IlpLineParser {
    pub fn new() -> Self {
        IlpLineParser
    }
}

impl LineParser for IlpLineParser {
    fn parse_next(&mut self, buf: &mut Vec<u8>) -> IngestResult<Option<ParsedMeasurement>> {
        let Some(newline_pos) = buf.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let line_bytes: Vec<u8> = buf.drain(..=newline_pos).collect();
        let line = std::str::from_utf8(&line_bytes[..line_bytes.len() - 1])
            .map_err(|source| ingest_errors::IngestError::Utf8Decode {
                context: "line-protocol line",
                source,
            })?
            .trim_end_matches('\r');
        if line.trim().is_empty() {
            return Ok(None);
        }
        parse_line(line).map(Some)
    }
}

fn parse_line(line: &str) -> IngestResult<ParsedMeasurement> {
    let (head, rest) = split_unescaped(line, ' ').ok_or_else(|| internal!("line missing fields section: {line:?}"))?;
    let (table, tag_section) = match split_unescaped(head, ',') {
        Some((table, tags)) => (table, Some(tags)),
        None => (head, None),
    };
    if table.is_empty() {
        return Err(internal!("empty measurement name in line: {line:?}"));
    }

    let mut entities = Vec::new();
    if let Some(tags) = tag_section {
        for pair in split_all_unescaped(tags, ',') {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| internal!("malformed tag pair {pair:?} in line: {line:?}"))?;
            entities.push(ParsedEntity {
                name: unescape(name),
                entity_type: EntityType::Tag,
                value: ParsedValue::Tag(unescape(value)),
            });
        }
    }

    let (field_section, ts_section) = match split_unescaped(rest, ' ') {
        Some((fields, ts)) => (fields, Some(ts)),
        None => (rest, None),
    };
    for pair in split_all_unescaped(field_section, ',') {
        let (name, raw_value) = pair
            .split_once('=')
            .ok_or_else(|| internal!("malformed field pair {pair:?} in line: {line:?}"))?;
        entities.push(ParsedEntity {
            name: unescape(name),
            entity_type: field_entity_type(raw_value),
            value: parse_field_value(raw_value)?,
        });
    }

    let timestamp = match ts_section {
        Some(ts) if !ts.trim().is_empty() => Some(
            ts.trim()
                .parse::<i64>()
                .map_err(|_| internal!("malformed timestamp {ts:?} in line: {line:?}"))?,
        ),
        _ => None,
    };

    Ok(ParsedMeasurement {
        table: unescape(table),
        timestamp,
        entities,
    })
}

fn field_entity_type(raw: &str) -> EntityType {
    if raw.starts_with('"') {
        EntityType::String
    } else if raw.ends_with('i') && raw[..raw.len() - 1].parse::<i64>().is_ok() {
        EntityType::Integer
    } else if raw == "t" || raw == "f" || raw == "true" || raw == "false" {
        EntityType::Boolean
    } else {
        EntityType::Float
    }
}

fn parse_field_value(raw: &str) -> IngestResult<ParsedValue> {
    if let Some(stripped) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Ok(ParsedValue::Str(unescape(stripped)));
    }
    if let Some(digits) = raw.strip_suffix('i') {
        if let Ok(v) = digits.parse::<i64>() {
            return Ok(ParsedValue::Integer(v));
        }
    }
    match raw {
        "t" | "true" => return Ok(ParsedValue::Boolean(true)),
        "f" | "false" => return Ok(ParsedValue::Boolean(false)),
        _ => {}
    }
    raw.parse::<f64>()
        .map(ParsedValue::Float)
        .map_err(|_| internal!("unparsable field value {raw:?}"))
}

/// Splits `s` on the first unescaped occurrence of `sep`, returning
/// `(before, after)` with `after` excluding the separator. Returns `None`
/// if `sep` never appears unescaped.
fn split_unescaped(s: &str, sep: char) -> Option<(&str, &str)> {
    let bytes = s.as_bytes();
    let mut escaped = false;
    for (i, ch) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if ch == sep {
            let _ = bytes;
            return Some((&s[..i], &s[i + ch.len_utf8()..]));
        }
    }
    None
}

/// Splits `s` on every unescaped occurrence of `sep`.
fn split_all_unescaped(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = s;
    while let Some((head, tail)) = split_unescaped(rest, sep) {
        parts.push(head);
        rest = tail;
    }
    if !rest.is_empty() || parts.is_empty() {
        parts.push(rest);
    }
    parts
}

/// Removes backslash escapes from a tag/field key or string value.
fn unescape(s: &str) -> String {
    if !s.contains('\\') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> ParsedMeasurement {
        let mut buf = format!("{line}\n").into_bytes();
        let mut parser = IlpLineParser::new();
        parser.parse_next(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn parses_tags_fields_and_timestamp() {
        let m = parse("cpu,host=web01,region=us usage=3.5,cores=4i 1465839830100400200");
        assert_eq!(m.table, "cpu");
        assert_eq!(m.timestamp, Some(1465839830100400200));
        assert_eq!(m.entities.len(), 4);
        assert!(matches!(
            &m.entities[0].value,
            ParsedValue::Tag(v) if v == "web01"
        ));
        assert!(matches!(&m.entities[2].value, ParsedValue::Float(v) if (*v - 3.5).abs() < 1e-9));
        assert!(matches!(&m.entities[3].value, ParsedValue::Integer(4)));
    }

    #[test]
    fn timestamp_and_tags_are_optional() {
        let m = parse("cpu usage=1.0");
        assert_eq!(m.table, "cpu");
        assert_eq!(m.timestamp, None);
        assert_eq!(m.entities.len(), 1);
    }

    #[test]
    fn parses_string_and_boolean_fields() {
        let m = parse(r#"events msg="disk full",alarm=t"#);
        assert!(matches!(&m.entities[0].value, ParsedValue::Str(v) if v == "disk full"));
        assert!(matches!(&m.entities[1].value, ParsedValue::Boolean(true)));
    }

    #[test]
    fn partial_line_returns_none_without_consuming() {
        let mut buf = b"cpu,host=web01 usage=3.5".to_vec();
        let mut parser = IlpLineParser::new();
        assert!(parser.parse_next(&mut buf).unwrap().is_none());
        assert!(!buf.is_empty());
    }

    #[test]
    fn escaped_comma_in_tag_value_is_preserved() {
        let m = parse(r"cpu,host=web\,01 usage=1.0");
        assert!(matches!(&m.entities[0].value, ParsedValue::Tag(v) if v == "web,01"));
    }

    #[test]
    fn rejects_line_with_no_fields_section() {
        let mut buf = b"cpu,host=web01\n".to_vec();
        let mut parser = IlpLineParser::new();
        assert!(parser.parse_next(&mut buf).is_err());
    }
}
