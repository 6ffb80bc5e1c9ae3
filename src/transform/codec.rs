//! Codec operators: digests, JSON, XML, base64 and form data.
//!
//! XML mapping convention: attributes are keyed `@name`, text content is
//! `#text`, repeated sibling tags fold into arrays. Elements carrying
//! only text collapse to a plain string.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::Md5;
use quick_xml::events::Event;
use serde_json::{Map, Value};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::transform::{decode_args, require_str, value_to_string};
use crate::{Error, Result};

// ── hash ────────────────────────────────────────────────────────────────

#[derive(serde::Deserialize)]
struct HashArgs {
    #[serde(default = "default_algorithm")]
    algorithm: String,
    #[serde(default = "default_encoding")]
    encoding: String,
}

fn default_algorithm() -> String {
    "md5".to_string()
}

fn default_encoding() -> String {
    "hex".to_string()
}

pub(crate) fn op_hash(arg: &Value, input: &Value) -> Result<Value> {
    let args: HashArgs = decode_args("hash", arg)?;
    let material = match input {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other)?,
    };

    let digest = match args.algorithm.as_str() {
        "md5" => Md5::digest(material.as_bytes()).to_vec(),
        "sha1" => Sha1::digest(material.as_bytes()).to_vec(),
        "sha256" => Sha256::digest(material.as_bytes()).to_vec(),
        "sha512" => Sha512::digest(material.as_bytes()).to_vec(),
        other => {
            return Err(Error::invalid_argument(
                "hash",
                format!("unsupported algorithm '{other}'"),
            ))
        }
    };

    match args.encoding.as_str() {
        "hex" => Ok(Value::String(hex::encode(digest))),
        "base64" => Ok(Value::String(BASE64.encode(digest))),
        other => Err(Error::invalid_argument(
            "hash",
            format!("unsupported encoding '{other}'"),
        )),
    }
}

// ── json ────────────────────────────────────────────────────────────────

pub(crate) fn op_from_json(input: &Value) -> Result<Value> {
    let s = require_str("fromJson", input)?;
    serde_json::from_str(s).map_err(|e| Error::invalid_argument("fromJson", e.to_string()))
}

pub(crate) fn op_to_json(input: &Value) -> Result<Value> {
    Ok(Value::String(serde_json::to_string(input)?))
}

// ── base64 ──────────────────────────────────────────────────────────────

pub(crate) fn op_from_base64(input: &Value) -> Result<Value> {
    let s = require_str("fromBase64", input)?;
    let bytes = BASE64
        .decode(s)
        .map_err(|e| Error::invalid_argument("fromBase64", e.to_string()))?;
    String::from_utf8(bytes)
        .map(Value::String)
        .map_err(|e| Error::invalid_argument("fromBase64", e.to_string()))
}

pub(crate) fn op_to_base64(input: &Value) -> Result<Value> {
    let material = match input {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other)?,
    };
    Ok(Value::String(BASE64.encode(material.as_bytes())))
}

// ── form data ───────────────────────────────────────────────────────────

pub(crate) fn op_to_form_data(input: &Value) -> Result<Value> {
    let map = input
        .as_object()
        .ok_or_else(|| Error::invalid_argument("toFormData", "input must be an object"))?;
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in map {
        serializer.append_pair(key, &value_to_string(value));
    }
    Ok(Value::String(serializer.finish()))
}

pub(crate) fn op_from_form_data(input: &Value) -> Result<Value> {
    let s = require_str("fromFormData", input)?;
    let mut out = Map::new();
    for (key, value) in form_urlencoded::parse(s.as_bytes()) {
        out.insert(key.into_owned(), Value::String(value.into_owned()));
    }
    Ok(Value::Object(out))
}

// ── xml ─────────────────────────────────────────────────────────────────

/// Attach a child value, folding repeated keys into arrays.
fn insert_child(parent: &mut Map<String, Value>, name: String, value: Value) {
    match parent.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            parent.insert(name, value);
        }
    }
}

/// Collapse a finished element node.
fn finish_node(mut node: Map<String, Value>) -> Value {
    if node.is_empty() {
        return Value::Null;
    }
    if node.len() == 1 && node.contains_key("#text") {
        return node.remove("#text").unwrap();
    }
    Value::Object(node)
}

fn element_node(e: &quick_xml::events::BytesStart<'_>) -> Result<Map<String, Value>> {
    let mut node = Map::new();
    for attribute in e.attributes() {
        let attribute =
            attribute.map_err(|err| Error::invalid_argument("fromXml", err.to_string()))?;
        let key = format!("@{}", String::from_utf8_lossy(attribute.key.as_ref()));
        let value = attribute
            .unescape_value()
            .map_err(|err| Error::invalid_argument("fromXml", err.to_string()))?;
        node.insert(key, Value::String(value.into_owned()));
    }
    Ok(node)
}

pub(crate) fn op_from_xml(input: &Value) -> Result<Value> {
    let s = require_str("fromXml", input)?;
    let mut reader = quick_xml::Reader::from_str(s);
    reader.config_mut().trim_text(true);

    // Stack of open elements; the sentinel root collects the document.
    let mut stack: Vec<(String, Map<String, Value>)> = vec![(String::new(), Map::new())];

    loop {
        match reader
            .read_event()
            .map_err(|e| Error::invalid_argument("fromXml", e.to_string()))?
        {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let node = element_node(&e)?;
                stack.push((name, node));
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let node = element_node(&e)?;
                let value = finish_node(node);
                insert_child(&mut stack.last_mut().unwrap().1, name, value);
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::invalid_argument("fromXml", e.to_string()))?;
                if !text.is_empty() {
                    let top = &mut stack.last_mut().unwrap().1;
                    match top.get_mut("#text") {
                        Some(Value::String(existing)) => existing.push_str(&text),
                        _ => {
                            top.insert("#text".to_string(), Value::String(text.into_owned()));
                        }
                    }
                }
            }
            Event::CData(t) => {
                let text = String::from_utf8_lossy(&t).into_owned();
                let top = &mut stack.last_mut().unwrap().1;
                match top.get_mut("#text") {
                    Some(Value::String(existing)) => existing.push_str(&text),
                    _ => {
                        top.insert("#text".to_string(), Value::String(text));
                    }
                }
            }
            Event::End(_) => {
                let (name, node) = stack.pop().unwrap();
                let value = finish_node(node);
                insert_child(&mut stack.last_mut().unwrap().1, name, value);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let (_, document) = stack.pop().unwrap();
    Ok(Value::Object(document))
}

fn write_element(name: &str, value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            for item in items {
                write_element(name, item, out);
            }
        }
        Value::Object(map) => {
            out.push('<');
            out.push_str(name);
            for (key, attr) in map {
                if let Some(attr_name) = key.strip_prefix('@') {
                    out.push(' ');
                    out.push_str(attr_name);
                    out.push_str("=\"");
                    out.push_str(&quick_xml::escape::escape(&*value_to_string(attr)));
                    out.push('"');
                }
            }
            let has_content = map.keys().any(|k| !k.starts_with('@'));
            if !has_content {
                out.push_str("/>");
                return;
            }
            out.push('>');
            for (key, child) in map {
                if key == "#text" {
                    out.push_str(&quick_xml::escape::escape(&*value_to_string(child)));
                } else if !key.starts_with('@') {
                    write_element(key, child, out);
                }
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        Value::Null => {
            out.push('<');
            out.push_str(name);
            out.push_str("/>");
        }
        scalar => {
            out.push('<');
            out.push_str(name);
            out.push('>');
            out.push_str(&quick_xml::escape::escape(&*value_to_string(scalar)));
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
    }
}

pub(crate) fn op_to_xml(input: &Value) -> Result<Value> {
    let map = input
        .as_object()
        .ok_or_else(|| Error::invalid_argument("toXml", "input must be an object"))?;
    let mut out = String::new();
    for (name, value) in map {
        write_element(name, value, &mut out);
    }
    Ok(Value::String(out))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::transform::Transformation;

    fn run(template: Value, input: Value) -> Result<Value> {
        Transformation::new(&template)?.transform(&input)
    }

    // ── hash ────────────────────────────────────────────────────────────

    #[test]
    fn hash_md5_matches_reference() {
        assert_eq!(
            run(json!({"hash": {}}), json!("abc")).unwrap(),
            json!("900150983cd24fb0d6963f7d28e17f72")
        );
    }

    #[test]
    fn hash_sha256_matches_reference() {
        assert_eq!(
            run(json!({"hash": {"algorithm": "sha256"}}), json!("abc")).unwrap(),
            json!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn hash_is_deterministic() {
        let a = run(json!({"hash": {"algorithm": "sha1"}}), json!("weft")).unwrap();
        let b = run(json!({"hash": {"algorithm": "sha1"}}), json!("weft")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn hash_serializes_non_string_input() {
        let from_object = run(json!({"hash": {}}), json!({"a": 1})).unwrap();
        let from_text = run(json!({"hash": {}}), json!("{\"a\":1}")).unwrap();
        assert_eq!(from_object, from_text);
    }

    #[test]
    fn hash_base64_encoding() {
        assert_eq!(
            run(json!({"hash": {"algorithm": "md5", "encoding": "base64"}}), json!("abc"))
                .unwrap(),
            json!("kAFQmDzST7DWlj99KOF/cg==")
        );
    }

    #[test]
    fn hash_rejects_unknown_algorithm() {
        assert!(run(json!({"hash": {"algorithm": "crc32"}}), json!("x")).is_err());
    }

    // ── json ────────────────────────────────────────────────────────────

    #[test]
    fn json_roundtrip_is_identity() {
        let value = json!({"a": [1, 2, {"b": null}], "c": "x"});
        let out = run(json!({"toJson": {}, "fromJson": {}}), value.clone()).unwrap();
        assert_eq!(out, value);
    }

    #[test]
    fn from_json_rejects_garbage() {
        assert!(run(json!({"fromJson": {}}), json!("{nope")).is_err());
    }

    // ── base64 ──────────────────────────────────────────────────────────

    #[test]
    fn base64_roundtrip() {
        let out = run(json!({"toBase64": {}, "fromBase64": {}}), json!("héllo")).unwrap();
        assert_eq!(out, json!("héllo"));
    }

    #[test]
    fn to_base64_reference_value() {
        assert_eq!(
            run(json!({"toBase64": {}}), json!("weft")).unwrap(),
            json!("d2VmdA==")
        );
    }

    // ── form data ───────────────────────────────────────────────────────

    #[test]
    fn form_data_roundtrip() {
        let out = run(
            json!({"toFormData": {}}),
            json!({"name": "a b", "n": 2}),
        )
        .unwrap();
        assert_eq!(out, json!("name=a+b&n=2"));
        let back = run(json!({"fromFormData": {}}), out).unwrap();
        assert_eq!(back, json!({"name": "a b", "n": "2"}));
    }

    // ── xml ─────────────────────────────────────────────────────────────

    #[test]
    fn from_xml_attributes_and_text() {
        let out = run(
            json!({"fromXml": {}}),
            json!("<item id=\"1\">body</item>"),
        )
        .unwrap();
        assert_eq!(out, json!({"item": {"@id": "1", "#text": "body"}}));
    }

    #[test]
    fn from_xml_text_only_collapses_to_string() {
        let out = run(json!({"fromXml": {}}), json!("<name>Ada</name>")).unwrap();
        assert_eq!(out, json!({"name": "Ada"}));
    }

    #[test]
    fn from_xml_repeated_tags_fold_into_array() {
        let out = run(
            json!({"fromXml": {}}),
            json!("<list><i>1</i><i>2</i><i>3</i></list>"),
        )
        .unwrap();
        assert_eq!(out, json!({"list": {"i": ["1", "2", "3"]}}));
    }

    #[test]
    fn from_xml_entities_unescaped() {
        let out = run(json!({"fromXml": {}}), json!("<v>a &amp; b</v>")).unwrap();
        assert_eq!(out, json!({"v": "a & b"}));
    }

    #[test]
    fn to_xml_renders_attributes_text_and_children() {
        let out = run(
            json!({"toXml": {}}),
            json!({"item": {"@id": "1", "#text": "x", "name": "Ada"}}),
        )
        .unwrap();
        assert_eq!(out, json!("<item id=\"1\">x<name>Ada</name></item>"));
    }

    #[test]
    fn to_xml_escapes_content() {
        let out = run(json!({"toXml": {}}), json!({"v": "a < b"})).unwrap();
        assert_eq!(out, json!("<v>a &lt; b</v>"));
    }

    #[test]
    fn xml_roundtrip_structure() {
        let xml = "<doc><row id=\"1\">x</row><row id=\"2\">y</row></doc>";
        let parsed = run(json!({"fromXml": {}}), json!(xml)).unwrap();
        let rendered = run(json!({"toXml": {}}), parsed).unwrap();
        assert_eq!(rendered, json!(xml));
    }
}
