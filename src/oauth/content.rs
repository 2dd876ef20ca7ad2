//! Token response bodies by content type
//!
//! Token endpoints answer in JSON, `application/x-www-form-urlencoded`
//! (GitHub without an `Accept` header) or flat XML. Every body is turned into
//! a JSON object first so the typed deserialization is the same for all
//! three.

use quick_xml::Reader;
use quick_xml::events::Event;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Turns a response body into a JSON value
pub trait ResponseParser: Send + Sync {
    /// Parse `body` according to `content_type`
    fn parse_value(&self, body: &str, content_type: Option<&str>) -> Result<Value>;
}

/// Parse `body` into `T` with the given parser
pub fn parse_as<T: DeserializeOwned>(
    parser: &dyn ResponseParser,
    body: &str,
    content_type: Option<&str>,
) -> Result<T> {
    let value = parser.parse_value(body, content_type)?;
    serde_json::from_value(value).map_err(|e| Error::Deserialization(e.to_string()))
}

/// Wire formats understood by [`ContentNegotiator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    /// `application/json` and `+json` types
    Json,
    /// `application/xml`, `text/xml` and `+xml` types
    Xml,
    /// `application/x-www-form-urlencoded`
    Form,
}

impl BodyFormat {
    /// Format for a content type; `None` for wildcards and unknown types
    #[must_use]
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if essence == "application/json" || essence.ends_with("+json") || essence == "text/json" {
            Some(Self::Json)
        } else if essence == "application/xml" || essence == "text/xml" || essence.ends_with("+xml") {
            Some(Self::Xml)
        } else if essence == "application/x-www-form-urlencoded" {
            Some(Self::Form)
        } else {
            None
        }
    }

    /// Guess the format from the body itself
    #[must_use]
    pub fn sniff(body: &str) -> Self {
        match body.trim_start().chars().next() {
            Some('{' | '[') => Self::Json,
            Some('<') => Self::Xml,
            _ => Self::Form,
        }
    }

    /// Parse `body` in this format
    pub fn parse(self, body: &str) -> Result<Value> {
        match self {
            Self::Json => {
                serde_json::from_str(body).map_err(|e| Error::Deserialization(format!("Invalid JSON body: {e}")))
            }
            Self::Form => parse_form(body),
            Self::Xml => parse_xml(body),
        }
    }
}

/// Default parser: dispatch on content type, sniff the body for wildcards
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentNegotiator;

impl ResponseParser for ContentNegotiator {
    fn parse_value(&self, body: &str, content_type: Option<&str>) -> Result<Value> {
        let format = content_type
            .and_then(BodyFormat::from_content_type)
            .unwrap_or_else(|| BodyFormat::sniff(body));
        format.parse(body)
    }
}

fn parse_form(body: &str) -> Result<Value> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(body.trim())
        .map_err(|e| Error::Deserialization(format!("Invalid form body: {e}")))?;
    if pairs.is_empty() {
        return Err(Error::Deserialization("Empty form body".to_string()));
    }

    let mut object = Map::new();
    for (key, value) in pairs {
        object.entry(key).or_insert(Value::String(value));
    }
    Ok(Value::Object(object))
}

/// Flat XML: the root element's children become string fields.
///
/// Anything nested deeper than one level is ignored.
fn parse_xml(body: &str) -> Result<Value> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut object = Map::new();
    let mut depth = 0usize;
    let mut field: Option<(String, String)> = None;
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                depth += 1;
                saw_root = true;
                if depth == 2 {
                    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                    field = Some((name, String::new()));
                }
            }
            Ok(Event::Empty(empty)) => {
                saw_root = true;
                if depth == 1 {
                    let name = String::from_utf8_lossy(empty.local_name().as_ref()).into_owned();
                    object.entry(name).or_insert(Value::Null);
                }
            }
            Ok(Event::Text(text)) => {
                if depth == 2 {
                    let decoded = text
                        .decode()
                        .map_err(|e| Error::Deserialization(format!("Invalid XML text: {e}")))?;
                    let unescaped = quick_xml::escape::unescape(&decoded)
                        .map_err(|e| Error::Deserialization(format!("Invalid XML text: {e}")))?;
                    if let Some((_, value)) = field.as_mut() {
                        value.push_str(&unescaped);
                    }
                }
            }
            Ok(Event::CData(data)) => {
                if depth == 2 {
                    if let Some((_, value)) = field.as_mut() {
                        value.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
            }
            Ok(Event::GeneralRef(reference)) => {
                if depth == 2 {
                    let resolved = resolve_reference(&reference)?;
                    if let Some((_, value)) = field.as_mut() {
                        value.push_str(&resolved);
                    }
                }
            }
            Ok(Event::End(_)) => {
                if depth == 2 {
                    if let Some((name, value)) = field.take() {
                        object.entry(name).or_insert(Value::String(value));
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(Error::Deserialization(format!(
                    "Invalid XML body at position {}: {e}",
                    reader.error_position()
                )));
            }
        }
    }

    if !saw_root {
        return Err(Error::Deserialization("XML body has no root element".to_string()));
    }
    Ok(Value::Object(object))
}

fn resolve_reference(reference: &quick_xml::events::BytesRef<'_>) -> Result<String> {
    if let Some(ch) = reference
        .resolve_char_ref()
        .map_err(|e| Error::Deserialization(format!("Invalid XML character reference: {e}")))?
    {
        return Ok(ch.to_string());
    }

    let name = reference
        .decode()
        .map_err(|e| Error::Deserialization(format!("Invalid XML entity: {e}")))?;
    quick_xml::escape::resolve_predefined_entity(&name)
        .map(str::to_string)
        .ok_or_else(|| Error::Deserialization(format!("Unknown XML entity: &{name};")))
}
