//! Telegram login callback payload.
//!
//! Telegram delivers the login result in one of two shapes: a JSON object
//! posted by the widget, or the same keys as flat form fields re-posted from
//! a redirect. [`CallbackPayload`] is the single shape both are reduced to
//! before being handed downstream as the `tgAuthResult` form field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use super::form::FormFields;

/// Form field carrying the whole serialized payload.
pub const COMPOSITE_FIELD: &str = "tgAuthResult";

/// Flat field names recognized when assembling a payload from form data.
pub const FLAT_FIELDS: [&str; 7] = [
    "id",
    "first_name",
    "last_name",
    "username",
    "photo_url",
    "auth_date",
    "hash",
];

/// A single payload value.
///
/// The widget posts `id` and `auth_date` as JSON numbers while form re-posts
/// carry everything as text; both are kept as received. Any other JSON value
/// (`null`, booleans, nested data) is carried verbatim in `Json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(Number),
    Json(Value),
}

impl FieldValue {
    /// Text rendering of the value, as the downstream consumer reads it.
    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Json(v) => v.to_string(),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => FieldValue::Text(s),
            Value::Number(n) => FieldValue::Number(n),
            other => FieldValue::Json(other),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

/// Login callback payload with one optional slot per recognized key.
///
/// Keys outside the recognized set that arrive in a JSON body are kept in
/// `extra` so the downstream integrity check sees the full signed field set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_date: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<FieldValue>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CallbackPayload {
    /// Decode a JSON object body.
    ///
    /// Any JSON object decodes; a recognized key counts as present whatever
    /// its value type. Anything that is not a JSON object yields `None`.
    pub fn from_json_body(body: &[u8]) -> Option<Self> {
        let mut object: Map<String, Value> = serde_json::from_slice(body).ok()?;
        let mut take = |name: &str| object.remove(name).map(FieldValue::from);

        let id = take("id");
        let first_name = take("first_name");
        let last_name = take("last_name");
        let username = take("username");
        let photo_url = take("photo_url");
        let auth_date = take("auth_date");
        let hash = take("hash");

        Some(Self {
            id,
            first_name,
            last_name,
            username,
            photo_url,
            auth_date,
            hash,
            extra: object,
        })
    }

    /// Decode the value of an existing composite field.
    pub fn from_composite(value: &str) -> Option<Self> {
        Self::from_json_body(value.as_bytes())
    }

    /// Assemble a payload from flat form fields, skipping missing keys.
    pub fn from_form(fields: &FormFields) -> Self {
        let pick = |name: &str| fields.get(name).map(FieldValue::from);
        Self {
            id: pick("id"),
            first_name: pick("first_name"),
            last_name: pick("last_name"),
            username: pick("username"),
            photo_url: pick("photo_url"),
            auth_date: pick("auth_date"),
            hash: pick("hash"),
            extra: Map::new(),
        }
    }

    /// True when no key at all is present.
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
            && self.username.is_none()
            && self.photo_url.is_none()
            && self.auth_date.is_none()
            && self.hash.is_none()
            && self.extra.is_empty()
    }

    /// True when at least one of `id`, `hash`, `auth_date` is present.
    pub fn has_proof(&self) -> bool {
        self.id.is_some() || self.hash.is_some() || self.auth_date.is_some()
    }

    /// Serialize for the composite field. Non-ASCII text is written as-is.
    pub fn to_composite_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Whether an existing composite field value should stop normalization.
///
/// Empty values, the literal `false` (any case, left behind by older
/// clients), and values opening a JSON object that does not parse all count
/// as absent.
pub fn composite_is_usable(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("false") {
        return false;
    }
    if trimmed.starts_with('{') {
        return serde_json::from_str::<Map<String, Value>>(trimmed).is_ok();
    }
    true
}

/// Trimmed bytes start with `{` and end with `}`.
pub fn looks_like_object(raw: &[u8]) -> bool {
    let trimmed = raw.trim_ascii();
    trimmed.starts_with(b"{") && trimmed.ends_with(b"}")
}
