//! XML property-list wire format.
//!
//! Emits and parses the plist subset the document model needs: `dict`,
//! `array`, `string`, `integer`, `true`/`false`, and base64 `data`.
//! Attributes other than the `plist` version are ignored on input.

use crate::value::Value;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use valise_core::{Error, Result};

const HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<!DOCTYPE plist PUBLIC \"-//Apple Computer//DTD PLIST 1.0//EN\" \
\"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n\
<plist version=\"1.0\">\n";
const FOOTER: &str = "</plist>\n";

/// Serialize a value to plist bytes.
pub fn emit(value: &Value) -> Vec<u8> {
    let mut out = String::with_capacity(256);
    out.push_str(HEADER);
    emit_value(value, 0, &mut out);
    out.push_str(FOOTER);
    out.into_bytes()
}

fn indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push('\t');
    }
}

fn emit_value(value: &Value, depth: usize, out: &mut String) {
    indent(depth, out);
    match value {
        Value::Map(map) => {
            if map.is_empty() {
                out.push_str("<dict/>\n");
                return;
            }
            out.push_str("<dict>\n");
            for (key, member) in map {
                indent(depth + 1, out);
                out.push_str("<key>");
                escape_into(key, out);
                out.push_str("</key>\n");
                emit_value(member, depth + 1, out);
            }
            indent(depth, out);
            out.push_str("</dict>\n");
        }
        Value::Seq(seq) => {
            if seq.is_empty() {
                out.push_str("<array/>\n");
                return;
            }
            out.push_str("<array>\n");
            for member in seq {
                emit_value(member, depth + 1, out);
            }
            indent(depth, out);
            out.push_str("</array>\n");
        }
        Value::Str(s) => {
            out.push_str("<string>");
            escape_into(s, out);
            out.push_str("</string>\n");
        }
        Value::Int(n) => {
            out.push_str("<integer>");
            out.push_str(&n.to_string());
            out.push_str("</integer>\n");
        }
        Value::Bool(true) => out.push_str("<true/>\n"),
        Value::Bool(false) => out.push_str("<false/>\n"),
        Value::Bytes(bytes) => {
            out.push_str("<data>");
            out.push_str(&BASE64.encode(bytes));
            out.push_str("</data>\n");
        }
    }
}

fn escape_into(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

/// Parse plist bytes into a value.
pub fn parse(bytes: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::parse("plist", format!("invalid utf-8: {e}")))?;
    let mut parser = Parser { input: text, pos: 0 };
    parser.skip_prolog()?;
    let tag = parser.next_tag()?;
    if !matches!(&tag, Tag::Open(name) if *name == "plist") {
        return Err(parser.error("expected <plist>"));
    }
    let root_tag = parser.next_tag()?;
    let value = parser.parse_value(&root_tag)?;
    match parser.next_tag()? {
        Tag::Close("plist") => Ok(value),
        _ => Err(parser.error("expected </plist>")),
    }
}

#[derive(Debug)]
enum Tag<'a> {
    Open(&'a str),
    Close(&'a str),
    SelfClose(&'a str),
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> Error {
        Error::parse("plist", format!("{message} at byte {}", self.pos))
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    /// Skip the XML declaration, doctype, and comments before the root.
    fn skip_prolog(&mut self) -> Result<()> {
        loop {
            self.skip_ws();
            let rest = self.rest();
            if rest.starts_with("<?") {
                let end = rest.find("?>").ok_or_else(|| self.error("unterminated <?"))?;
                self.pos += end + 2;
            } else if rest.starts_with("<!--") {
                let end = rest.find("-->").ok_or_else(|| self.error("unterminated comment"))?;
                self.pos += end + 3;
            } else if rest.starts_with("<!") {
                let end = rest.find('>').ok_or_else(|| self.error("unterminated <!"))?;
                self.pos += end + 1;
            } else {
                return Ok(());
            }
        }
    }

    fn next_tag(&mut self) -> Result<Tag<'a>> {
        self.skip_ws();
        let rest = self.rest();
        if !rest.starts_with('<') {
            return Err(self.error("expected a tag"));
        }
        let end = rest.find('>').ok_or_else(|| self.error("unterminated tag"))?;
        let inner = &rest[1..end];
        self.pos += end + 1;
        if let Some(name) = inner.strip_prefix('/') {
            return Ok(Tag::Close(name.trim()));
        }
        let self_closing = inner.ends_with('/');
        let inner = inner.strip_suffix('/').unwrap_or(inner);
        // Attributes are irrelevant to the document model.
        let name = inner.split_whitespace().next().unwrap_or("");
        if self_closing {
            Ok(Tag::SelfClose(name))
        } else {
            Ok(Tag::Open(name))
        }
    }

    /// Collect text content up to the next `<`, decoding entities.
    fn take_text(&mut self) -> Result<String> {
        let rest = self.rest();
        let end = rest.find('<').ok_or_else(|| self.error("unterminated text"))?;
        let raw = &rest[..end];
        self.pos += end;
        unescape(raw).map_err(|msg| self.error(&msg))
    }

    fn expect_close(&mut self, name: &str) -> Result<()> {
        match self.next_tag()? {
            Tag::Close(found) if found == name => Ok(()),
            _ => Err(self.error(&format!("expected </{name}>"))),
        }
    }

    fn parse_value(&mut self, tag: &Tag<'a>) -> Result<Value> {
        match tag {
            Tag::SelfClose("true") => Ok(Value::Bool(true)),
            Tag::SelfClose("false") => Ok(Value::Bool(false)),
            Tag::SelfClose("dict") => Ok(Value::map()),
            Tag::SelfClose("array") => Ok(Value::seq()),
            Tag::SelfClose("string") => Ok(Value::Str(String::new())),
            Tag::SelfClose("data") => Ok(Value::Bytes(Vec::new())),
            Tag::Open("dict") => self.parse_dict(),
            Tag::Open("array") => self.parse_array(),
            Tag::Open("string") => {
                let text = self.take_text()?;
                self.expect_close("string")?;
                Ok(Value::Str(text))
            }
            Tag::Open("integer") => {
                let text = self.take_text()?;
                self.expect_close("integer")?;
                let n = text
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| self.error(&format!("bad integer '{text}': {e}")))?;
                Ok(Value::Int(n))
            }
            Tag::Open("data") => {
                let text = self.take_text()?;
                self.expect_close("data")?;
                let packed: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                let bytes = BASE64
                    .decode(packed.as_bytes())
                    .map_err(|e| self.error(&format!("bad base64 data: {e}")))?;
                Ok(Value::Bytes(bytes))
            }
            Tag::Open("true") => {
                self.expect_close("true")?;
                Ok(Value::Bool(true))
            }
            Tag::Open("false") => {
                self.expect_close("false")?;
                Ok(Value::Bool(false))
            }
            Tag::Open(other) | Tag::SelfClose(other) => {
                Err(self.error(&format!("unexpected element <{other}>")))
            }
            Tag::Close(other) => Err(self.error(&format!("unexpected </{other}>"))),
        }
    }

    fn parse_dict(&mut self) -> Result<Value> {
        let mut map = std::collections::BTreeMap::new();
        loop {
            match self.next_tag()? {
                Tag::Close("dict") => return Ok(Value::Map(map)),
                Tag::Open("key") => {
                    let key = self.take_text()?;
                    self.expect_close("key")?;
                    let value_tag = self.next_tag()?;
                    let value = self.parse_value(&value_tag)?;
                    map.insert(key, value);
                }
                Tag::SelfClose("key") => {
                    let value_tag = self.next_tag()?;
                    let value = self.parse_value(&value_tag)?;
                    map.insert(String::new(), value);
                }
                _ => return Err(self.error("expected <key> or </dict>")),
            }
        }
    }

    fn parse_array(&mut self) -> Result<Value> {
        let mut seq = Vec::new();
        loop {
            let tag = self.next_tag()?;
            if matches!(tag, Tag::Close("array")) {
                return Ok(Value::Seq(seq));
            }
            seq.push(self.parse_value(&tag)?);
        }
    }
}

fn unescape(raw: &str) -> std::result::Result<String, String> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx..];
        let end = rest.find(';').ok_or_else(|| "unterminated entity".to_string())?;
        let entity = &rest[1..end];
        match entity {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            _ => {
                let code = entity
                    .strip_prefix("#x")
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .or_else(|| entity.strip_prefix('#').map(str::parse::<u32>))
                    .ok_or_else(|| format!("unknown entity '&{entity};'"))?
                    .map_err(|e| format!("bad character reference '&{entity};': {e}"))?;
                out.push(char::from_u32(code).ok_or_else(|| "invalid codepoint".to_string())?);
            }
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn escaping_roundtrip() {
        let mut doc = Value::map();
        doc.insert("desc", Value::from("a < b && c > d"));
        let bytes = emit(&doc);
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("a &lt; b &amp;&amp; c &gt; d"));
        assert_eq!(parse(&bytes).unwrap(), doc);
    }

    #[test]
    fn parses_foreign_whitespace_and_comments() {
        let text = r#"<?xml version="1.0"?>
<!DOCTYPE plist PUBLIC "-//Apple Computer//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<!-- generated -->
<plist version="1.0">
  <dict>
    <key>pkgver</key> <string>gawk-5.0_1</string>
    <key>automatic-install</key><true/>
    <key>empty</key><dict/>
  </dict>
</plist>"#;
        let doc = parse(text.as_bytes()).unwrap();
        assert_eq!(doc.get_str("pkgver"), Some("gawk-5.0_1"));
        assert!(doc.get_bool("automatic-install"));
        assert_eq!(doc.get("empty"), Some(&Value::map()));
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(parse(b"<plist><dict>").is_err());
        assert!(parse(b"not xml at all").is_err());
        assert!(parse(b"<?xml?><plist><integer>twelve</integer></plist>").is_err());
    }

    #[test]
    fn numeric_entities() {
        let text = "<?xml?><plist><string>&#x41;&#66;&amp;</string></plist>";
        assert_eq!(parse(text.as_bytes()).unwrap(), Value::from("AB&"));
    }
}
