//! Payload decoding for the request builder's terminal operations.

use crate::errors::DecodeError;
use crate::transport::HttpResponse;
use encoding_rs::{Encoding, UTF_8};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Returns the encoding declared by a `Content-Type` header, if recognised.
#[must_use]
pub fn declared_encoding(content_type: Option<&str>) -> Option<&'static Encoding> {
    let mime = content_type?.parse::<mime::Mime>().ok()?;
    let charset = mime.get_param(mime::CHARSET)?;
    Encoding::for_label(charset.as_str().as_bytes())
}

/// Decodes `body` with `encoding`, stripping a byte-order mark.
///
/// Malformed input is an error rather than being replaced.
pub fn decode_text(body: &[u8], encoding: &'static Encoding) -> Result<String, DecodeError> {
    let (text, had_errors) = encoding.decode_with_bom_removal(body);
    if had_errors {
        return Err(DecodeError::new(
            "text",
            format!("body is not valid {}", encoding.name()),
        ));
    }
    Ok(text.into_owned())
}

/// Decodes the response body using its declared charset, defaulting to UTF-8.
pub fn response_text(response: &HttpResponse) -> Result<String, DecodeError> {
    let encoding = declared_encoding(response.content_type()).unwrap_or(UTF_8);
    decode_text(&response.body, encoding)
}

/// Parses the body as any JSON value.
pub fn json_value(body: &[u8]) -> Result<Value, DecodeError> {
    serde_json::from_slice(body).map_err(|e| DecodeError::new("json", e.to_string()))
}

/// Parses the body as a JSON object.
pub fn json_object(body: &[u8]) -> Result<Map<String, Value>, DecodeError> {
    match json_value(body)? {
        Value::Object(map) => Ok(map),
        other => Err(DecodeError::new(
            "json object",
            format!("expected an object, found {}", json_kind(&other)),
        )),
    }
}

/// Deserializes the body into `T`.
pub fn typed<T: DeserializeOwned>(body: &[u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(body)
        .map_err(|e| DecodeError::new(std::any::type_name::<T>(), e.to_string()))
}

/// Runs a caller-supplied decoder, flattening its error chain.
pub fn with_decoder<T, F>(body: &[u8], decoder: F) -> Result<T, DecodeError>
where
    F: FnOnce(&[u8]) -> anyhow::Result<T>,
{
    decoder(body).map_err(|e| DecodeError::new("custom", format!("{e:#}")))
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(feature = "document")]
pub use document::Document;

#[cfg(feature = "document")]
mod document {
    use crate::errors::DecodeError;
    use reqwest::Url;
    use scraper::{Html, Selector};

    /// A decoded HTML document.
    ///
    /// Holds the decoded markup and parses it on demand, so the document can
    /// cross task boundaries.
    #[derive(Debug, Clone)]
    pub struct Document {
        url: Url,
        html: String,
    }

    impl Document {
        /// Creates a document from decoded markup.
        #[must_use]
        pub const fn new(url: Url, html: String) -> Self {
            Self { url, html }
        }

        /// The URL the document was served from.
        #[must_use]
        pub const fn url(&self) -> &Url {
            &self.url
        }

        /// The raw markup.
        #[must_use]
        pub fn html(&self) -> &str {
            &self.html
        }

        /// Parses the markup.
        #[must_use]
        pub fn parse(&self) -> Html {
            Html::parse_document(&self.html)
        }

        /// Returns the text content of every element matching `selector`.
        pub fn select(&self, selector: &str) -> Result<Vec<String>, DecodeError> {
            let selector = parse_selector(selector)?;
            Ok(self
                .parse()
                .select(&selector)
                .map(|element| element.text().collect::<String>().trim().to_string())
                .collect())
        }

        /// Returns the `attr` attribute of every element matching `selector`.
        pub fn select_attr(&self, selector: &str, attr: &str) -> Result<Vec<String>, DecodeError> {
            let selector = parse_selector(selector)?;
            Ok(self
                .parse()
                .select(&selector)
                .filter_map(|element| element.value().attr(attr).map(str::to_string))
                .collect())
        }

        /// The document title.
        #[must_use]
        pub fn title(&self) -> Option<String> {
            self.select("title").ok()?.into_iter().next()
        }
    }

    fn parse_selector(selector: &str) -> Result<Selector, DecodeError> {
        Selector::parse(selector).map_err(|e| DecodeError::new("selector", e.to_string()))
    }
}
