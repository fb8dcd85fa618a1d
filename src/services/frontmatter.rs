//! YAML front matter at the top of markdown files.

use serde_json::Value;
use std::collections::BTreeMap;

/// Parsed front matter plus the markdown that follows it.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontMatter<'a> {
    pub fields: BTreeMap<String, Value>,
    pub body: &'a str,
}

impl FrontMatter<'_> {
    /// String value of a field. Numbers and booleans are stringified.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.fields.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Split front matter off `input`.
///
/// The block must open on the first line with `---` (a leading BOM is
/// skipped) and close with `---` or `...`. Without an opening delimiter the
/// whole input is body. An unterminated block or YAML that is not a mapping
/// is an error.
pub fn split_front_matter(input: &str) -> Result<FrontMatter<'_>, String> {
    let input = input.trim_start_matches('\u{feff}');

    let Some(first_end) = input.find('\n') else {
        return Ok(no_front_matter(input));
    };
    if input[..first_end].trim_end() != "---" {
        return Ok(no_front_matter(input));
    }

    let mut offset = first_end + 1;
    let mut yaml_lines: Vec<&str> = Vec::new();
    let mut body_start = None;

    for line in input[offset..].split_inclusive('\n') {
        offset += line.len();
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            body_start = Some(offset);
            break;
        }
        yaml_lines.push(line);
    }

    let body_start = body_start.ok_or_else(|| "unterminated front matter block".to_string())?;
    let body = &input[body_start..];

    let raw_yaml = yaml_lines.concat();
    if raw_yaml.trim().is_empty() {
        return Ok(FrontMatter {
            fields: BTreeMap::new(),
            body,
        });
    }

    let fields = parse_yaml_to_json_map(&raw_yaml)?;
    Ok(FrontMatter { fields, body })
}

fn no_front_matter(input: &str) -> FrontMatter<'_> {
    FrontMatter {
        fields: BTreeMap::new(),
        body: input,
    }
}

/// Parse YAML into a JSON-compatible map for uniform downstream handling.
fn parse_yaml_to_json_map(yaml: &str) -> Result<BTreeMap<String, Value>, String> {
    let yaml_value: serde_yaml::Value =
        serde_yaml::from_str(yaml).map_err(|e| format!("invalid front matter: {}", e))?;
    let json_value: Value =
        serde_json::to_value(yaml_value).map_err(|e| format!("invalid front matter: {}", e))?;

    match json_value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err("front matter is not a mapping".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_front_matter() {
        let fm = split_front_matter("---\ntitle: Intro\nposition: 3\n---\n# Heading\nBody").unwrap();
        assert_eq!(fm.get_str("title").as_deref(), Some("Intro"));
        assert_eq!(fm.get_i64("position"), Some(3));
        assert_eq!(fm.body, "# Heading\nBody");
    }

    #[test]
    fn dots_close_and_bom_is_skipped() {
        let fm = split_front_matter("\u{feff}---\nslug: hello\n...\ntext").unwrap();
        assert_eq!(fm.get_str("slug").as_deref(), Some("hello"));
        assert_eq!(fm.body, "text");
    }

    #[test]
    fn no_front_matter_is_all_body() {
        let fm = split_front_matter("# Title\nBody").unwrap();
        assert!(fm.fields.is_empty());
        assert_eq!(fm.body, "# Title\nBody");
    }

    #[test]
    fn empty_block() {
        let fm = split_front_matter("---\n---\nbody").unwrap();
        assert!(fm.fields.is_empty());
        assert_eq!(fm.body, "body");
    }

    #[test]
    fn crlf_line_endings() {
        let fm = split_front_matter("---\r\ntitle: Win\r\n---\r\nbody").unwrap();
        assert_eq!(fm.get_str("title").as_deref(), Some("Win"));
        assert_eq!(fm.body, "body");
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(split_front_matter("---\ntitle: [unclosed\n---\n").is_err());
        assert!(split_front_matter("---\n- a\n- b\n---\n").is_err());
        assert!(split_front_matter("---\ntitle: x\n").is_err());
    }

    #[test]
    fn blank_strings_read_as_missing() {
        let fm = split_front_matter("---\nauthor: \"  \"\n---\n").unwrap();
        assert!(fm.get_str("author").is_none());
    }
}
