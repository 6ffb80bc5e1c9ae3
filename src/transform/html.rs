//! HTML operators: CSS-selector queries against an HTML string.

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use crate::transform::{decode_args, require_str};
use crate::{Error, Result};

fn parse_selector(operator: &str, selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| Error::invalid_argument(operator, e.to_string()))
}

/// Accept a bare selector string or `{selector: …}`.
fn selector_arg(operator: &str, arg: &Value) -> Result<Selector> {
    let raw = match arg {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map
            .get("selector")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_argument(operator, "expected a selector"))?,
        _ => return Err(Error::invalid_argument(operator, "expected a selector")),
    };
    parse_selector(operator, raw)
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>()
}

/// Shared dispatcher for the tag/text selection operators.
pub(crate) fn op_select(name: &str, arg: &Value, input: &Value) -> Result<Value> {
    let selector = selector_arg(name, arg)?;
    let html = require_str(name, input)?;
    let document = Html::parse_document(html);
    let mut matches = document.select(&selector);

    match name {
        "htmlTag" => Ok(matches
            .next()
            .map(|e| Value::String(e.html()))
            .unwrap_or(Value::Null)),
        "htmlTags" => Ok(Value::Array(
            matches.map(|e| Value::String(e.html())).collect(),
        )),
        "htmlTagText" => Ok(matches
            .next()
            .map(|e| Value::String(text_of(e)))
            .unwrap_or(Value::Null)),
        "htmlTagsText" => Ok(Value::Array(
            matches.map(|e| Value::String(text_of(e))).collect(),
        )),
        other => Err(Error::UnknownOperator(other.to_string())),
    }
}

#[derive(serde::Deserialize)]
struct AttributeArgs {
    selector: String,
    attribute: String,
}

pub(crate) fn op_attribute(arg: &Value, input: &Value) -> Result<Value> {
    let args: AttributeArgs = decode_args("htmlAttribute", arg)?;
    let selector = parse_selector("htmlAttribute", &args.selector)?;
    let html = require_str("htmlAttribute", input)?;
    let document = Html::parse_document(html);

    Ok(document
        .select(&selector)
        .next()
        .and_then(|e| e.value().attr(&args.attribute))
        .map(|v| Value::String(v.to_string()))
        .unwrap_or(Value::Null))
}

#[derive(serde::Deserialize)]
struct TableArgs {
    #[serde(default = "default_table_selector")]
    selector: String,
    cell: usize,
    text: String,
    #[serde(default, rename = "returnCell")]
    return_cell: Option<usize>,
}

fn default_table_selector() -> String {
    "table".to_string()
}

/// Locate a table row by the trimmed, case-insensitive content of one of
/// its cells. Returns the requested cell, or the whole row as an array.
pub(crate) fn op_table(arg: &Value, input: &Value) -> Result<Value> {
    let args: TableArgs = decode_args("htmlTable", arg)?;
    let table_selector = parse_selector("htmlTable", &args.selector)?;
    let row_selector = parse_selector("htmlTable", "tr")?;
    let cell_selector = parse_selector("htmlTable", "td, th")?;
    let html = require_str("htmlTable", input)?;
    let document = Html::parse_document(html);

    let needle = args.text.trim().to_lowercase();
    for table in document.select(&table_selector) {
        for row in table.select(&row_selector) {
            let cells: Vec<String> = row
                .select(&cell_selector)
                .map(|c| text_of(c).trim().to_string())
                .collect();
            let Some(probe) = cells.get(args.cell) else {
                continue;
            };
            if probe.to_lowercase() != needle {
                continue;
            }
            return Ok(match args.return_cell {
                Some(index) => cells
                    .get(index)
                    .map(|c| Value::String(c.clone()))
                    .unwrap_or(Value::Null),
                None => Value::Array(cells.into_iter().map(Value::String).collect()),
            });
        }
    }
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::transform::Transformation;

    fn run(template: Value, input: Value) -> Value {
        Transformation::new(&template)
            .unwrap()
            .transform(&input)
            .unwrap()
    }

    const PAGE: &str = "<html><body>\
        <h1 class=\"title\">Hello</h1>\
        <ul><li>one</li><li>two</li></ul>\
        <a href=\"/next\">more</a>\
        </body></html>";

    #[test]
    fn html_tag_returns_outer_html() {
        assert_eq!(
            run(json!({"htmlTag": "h1.title"}), json!(PAGE)),
            json!("<h1 class=\"title\">Hello</h1>")
        );
    }

    #[test]
    fn html_tag_miss_is_null() {
        assert_eq!(run(json!({"htmlTag": "h2"}), json!(PAGE)), Value::Null);
    }

    #[test]
    fn html_tags_text_collects_all() {
        assert_eq!(
            run(json!({"htmlTagsText": "li"}), json!(PAGE)),
            json!(["one", "two"])
        );
    }

    #[test]
    fn html_tag_text_takes_first() {
        assert_eq!(run(json!({"htmlTagText": "li"}), json!(PAGE)), json!("one"));
    }

    #[test]
    fn html_attribute() {
        assert_eq!(
            run(
                json!({"htmlAttribute": {"selector": "a", "attribute": "href"}}),
                json!(PAGE)
            ),
            json!("/next")
        );
    }

    const TABLE: &str = "<table>\
        <tr><th>Name</th><th>Total</th></tr>\
        <tr><td>Alpha</td><td>10</td></tr>\
        <tr><td>Beta</td><td>20</td></tr>\
        </table>";

    #[test]
    fn html_table_returns_matching_row() {
        assert_eq!(
            run(
                json!({"htmlTable": {"cell": 0, "text": "beta"}}),
                json!(TABLE)
            ),
            json!(["Beta", "20"])
        );
    }

    #[test]
    fn html_table_return_cell() {
        assert_eq!(
            run(
                json!({"htmlTable": {"cell": 0, "text": " Alpha ", "returnCell": 1}}),
                json!(TABLE)
            ),
            json!("10")
        );
    }

    #[test]
    fn html_table_miss_is_null() {
        assert_eq!(
            run(
                json!({"htmlTable": {"cell": 0, "text": "Gamma"}}),
                json!(TABLE)
            ),
            Value::Null
        );
    }
}
