//! MIME multipart encoding of instance user data.
//!
//! Parts are typed the way cloud-init dispatches them, from the first line of
//! their content.

use std::fmt::Write as _;

use serde_json::Value;

const BOUNDARY: &str = "===============stk-user-data==";

/// Content type cloud-init expects for a part, from its first line.
pub fn content_type(content: &str) -> &'static str {
    const PREFIXES: &[(&str, &str)] = &[
        ("#include", "text/x-include-url"),
        ("#!", "text/x-shellscript"),
        ("#cloud-config-archive", "text/cloud-config-archive"),
        ("#cloud-config", "text/cloud-config"),
        ("#upstart-job", "text/upstart-job"),
        ("#part-handler", "text/part-handler"),
        ("#cloud-boothook", "text/cloud-boothook"),
    ];

    PREFIXES
        .iter()
        .find(|(prefix, _)| content.starts_with(prefix))
        .map(|(_, content_type)| *content_type)
        .unwrap_or("text/plain")
}

/// Encode `(filename, content)` parts, in the given order, as one
/// `multipart/mixed` message.
pub fn encode(parts: &[(String, String)]) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(out, "Content-Type: multipart/mixed; boundary=\"{}\"", BOUNDARY);
    let _ = writeln!(out, "MIME-Version: 1.0");
    out.push('\n');

    for (name, content) in parts {
        let encoding = if content.is_ascii() { "7bit" } else { "8bit" };
        let _ = writeln!(out, "--{}", BOUNDARY);
        let _ = writeln!(out, "Content-Type: {}; charset=\"utf-8\"", content_type(content));
        let _ = writeln!(out, "MIME-Version: 1.0");
        let _ = writeln!(out, "Content-Transfer-Encoding: {}", encoding);
        let _ = writeln!(out, "Content-Disposition: attachment; filename=\"{}\"", name);
        out.push('\n');
        out.push_str(content);
        if !content.ends_with('\n') {
            out.push('\n');
        }
    }

    let _ = writeln!(out, "--{}--", BOUNDARY);
    out
}

/// Split a line into text and the JSON fragments embedded in `<<...>>`.
///
/// `"hello <<{"Ref": "bar"}>> there"` becomes
/// `["hello ", {"Ref": "bar"}, " there"]`. Text pieces are kept even when
/// empty so the pieces alternate.
pub fn split_fragments(line: &str) -> anyhow::Result<Vec<Value>> {
    let mut pieces = Vec::new();
    let mut rest = line;

    while let Some(open) = rest.find("<<") {
        let body = &rest[open + 2..];
        let Some(close) = closing_delimiter(body) else {
            break;
        };

        let fragment = &body[..close];
        let value: Value = serde_json::from_str(fragment)
            .map_err(|e| anyhow::anyhow!("invalid JSON fragment <<{}>>: {}", fragment, e))?;

        pieces.push(Value::String(rest[..open].to_string()));
        pieces.push(value);
        rest = &body[close + 2..];
    }

    pieces.push(Value::String(rest.to_string()));
    Ok(pieces)
}

/// Index of the first `>>` that closes a non-empty fragment and is not
/// followed by another `>`.
fn closing_delimiter(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    (1..bytes.len().saturating_sub(1)).find(|&i| {
        bytes[i] == b'>' && bytes[i + 1] == b'>' && bytes.get(i + 2) != Some(&b'>')
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("#!/bin/bash\necho"), "text/x-shellscript");
        assert_eq!(content_type("#cloud-config\npackages: []"), "text/cloud-config");
        assert_eq!(content_type("#cloud-config-archive\n- a"), "text/cloud-config-archive");
        assert_eq!(content_type("just text"), "text/plain");
    }

    #[test]
    fn test_encode() {
        let encoded = encode(&[
            ("a.sh".to_string(), "#!/bin/sh\necho a\n".to_string()),
            ("b.cfg".to_string(), "#cloud-config\nruncmd: []".to_string()),
        ]);

        assert!(encoded.starts_with("Content-Type: multipart/mixed; boundary=\""));
        assert!(encoded.ends_with(&format!("--{}--\n", BOUNDARY)));
        assert_eq!(encoded.matches(&format!("--{}\n", BOUNDARY)).count(), 2);

        let a = encoded.find("filename=\"a.sh\"").unwrap();
        let b = encoded.find("filename=\"b.cfg\"").unwrap();
        assert!(a < b);
        assert!(encoded.contains("Content-Type: text/x-shellscript; charset=\"utf-8\""));
        assert!(encoded.contains("#cloud-config\nruncmd: []\n--"));
    }

    #[test]
    fn test_split_fragments() {
        assert_eq!(
            split_fragments("hello <<{\"Ref\": \"bar\"}>> there <<{}>>\n").unwrap(),
            vec![json!("hello "), json!({"Ref": "bar"}), json!(" there "), json!({}), json!("\n")]
        );
        assert_eq!(split_fragments("plain\n").unwrap(), vec![json!("plain\n")]);
        assert_eq!(split_fragments("a << b").unwrap(), vec![json!("a << b")]);
        assert!(split_fragments("x <<not json>> y").is_err());
    }

    #[test]
    fn test_fragment_with_angle_brackets() {
        assert_eq!(
            split_fragments("if <<{\"Fn::Sub\": \"a > b\"}>> fi").unwrap(),
            vec![json!("if "), json!({"Fn::Sub": "a > b"}), json!(" fi")]
        );
    }
}
