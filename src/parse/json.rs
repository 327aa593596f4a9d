//! JSON decoding that reports where an upstream payload went wrong.

use serde::de::DeserializeOwned;

use super::ParseError;

/// Characters of context shown on each side of a decode failure.
const SNIPPET_RADIUS: usize = 12;

/// Deserialize `body`; on failure the error names the serde path, the
/// expected/actual types and quotes the offending spot.
pub fn parse_json_with_context<T: DeserializeOwned>(body: &str) -> Result<T, ParseError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let path = err.path().to_string();
        let inner = err.into_inner();
        ParseError::Malformed(describe(&path, &inner, body))
    })
}

fn describe(path: &str, err: &serde_json::Error, body: &str) -> String {
    let (line, column) = (err.line(), err.column());
    let message = err.to_string();
    let message = message
        .strip_suffix(&format!(" at line {line} column {column}"))
        .unwrap_or(&message);

    let location = match path {
        "" | "." => String::new(),
        path => format!("at '{path}': "),
    };
    format!(
        "{location}{} (line {line} col {column})\n{}",
        reword(message),
        excerpt(body, line, column)
    )
}

/// "invalid type: null, expected a string" reads better as
/// "expected a string, got null".
fn reword(message: &str) -> String {
    message
        .strip_prefix("invalid type: ")
        .and_then(|rest| rest.split_once(", expected "))
        .map(|(actual, expected)| format!("expected {expected}, got {actual}"))
        .unwrap_or_else(|| message.to_owned())
}

/// A window of the failing line with a caret under the failing column.
fn excerpt(body: &str, line: usize, column: usize) -> String {
    let Some(text) = body.lines().nth(line.saturating_sub(1)).filter(|l| !l.is_empty()) else {
        return "(empty line)".to_owned();
    };

    // serde_json columns count bytes; walk chars so Cyrillic names don't split.
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let at = chars
        .iter()
        .position(|(offset, _)| *offset >= column.saturating_sub(1))
        .unwrap_or(chars.len());
    let from = at.saturating_sub(SNIPPET_RADIUS);
    let to = (at + SNIPPET_RADIUS).min(chars.len());

    let window: String = chars[from..to].iter().map(|(_, c)| c).collect();
    format!("...{window}...\n   {}^", " ".repeat(at - from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::Payload;

    #[test]
    fn reword_swaps_type_mismatch() {
        assert_eq!(
            reword("invalid type: null, expected a string"),
            "expected a string, got null"
        );
    }

    #[test]
    fn reword_leaves_other_messages() {
        assert_eq!(reword("expected value"), "expected value");
    }

    #[test]
    fn columns_must_be_strings() {
        let json = r#"{"marketdata": {"columns": ["LAST", null], "data": [[1.0, 2.0]]}}"#;
        let err = parse_json_with_context::<Payload>(json).unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("marketdata.columns[1]"), "{msg}");
        assert!(msg.contains("expected a string, got null"), "{msg}");
    }

    #[test]
    fn html_error_page_is_malformed() {
        let err = parse_json_with_context::<Payload>("<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }

    #[test]
    fn excerpt_points_at_failing_column() {
        let snippet = excerpt("{\"a\": tru}", 1, 8);
        let mut lines = snippet.lines();
        let window = lines.next().unwrap();
        let caret = lines.next().unwrap();
        assert_eq!(window, "...{\"a\": tru}...");
        assert_eq!(caret.find('^'), Some(3 + 7));
    }

    #[test]
    fn excerpt_survives_multibyte_text() {
        let json = "{\"securities\": {\"columns\": [\"SHORTNAME\"], \"data\": [[\"Сбербанк\" 1]]}}";
        let err = parse_json_with_context::<Payload>(json).unwrap_err();
        assert!(err.to_string().contains("Сбербанк"));
    }
}
