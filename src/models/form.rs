//! Parsed form view of a request body.
//!
//! A request body is parsed as `application/x-www-form-urlencoded` at most
//! once, on first read, and the result is held in a [`FormCache`]. Once a
//! stage rewrites the body, the cached view is stale and must be dropped with
//! [`FormCache::invalidate`] so the next read parses the new body.
//!
//! Stages that parse the form before the callback normalizer runs can share
//! their view through the [`CachedForm`] request extension; the normalizer
//! seeds its cache from it and removes it when it rewrites the body.

use std::cell::OnceCell;

use axum::http::Request;

/// Content type of a form-encoded body.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Decoded form fields in body order. Repeated names are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields(Vec<(String, String)>);

impl FormFields {
    /// Decode an urlencoded body (`+` as space, percent escapes, lossy UTF-8).
    pub fn parse(body: &[u8]) -> Self {
        Self(form_urlencoded::parse(body).into_owned().collect())
    }

    /// Last value for `name`, matching how repeated keys resolve in a query dict.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for FormFields
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Request extension carrying a form view parsed by an earlier stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedForm(pub FormFields);

/// Extension trait for the shared form view on requests.
pub trait RequestFormExt {
    /// Form view cached by an earlier stage, if any.
    fn cached_form(&self) -> Option<&FormFields>;

    /// Store a parsed form view for later stages.
    fn cache_form(&mut self, fields: FormFields);
}

impl<B> RequestFormExt for Request<B> {
    fn cached_form(&self) -> Option<&FormFields> {
        self.extensions().get::<CachedForm>().map(|c| &c.0)
    }

    fn cache_form(&mut self, fields: FormFields) {
        self.extensions_mut().insert(CachedForm(fields));
    }
}

/// Lazily computed form view with explicit reset.
#[derive(Debug, Default)]
pub struct FormCache {
    cell: OnceCell<FormFields>,
}

impl FormCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache that already holds `fields`, as if parsed earlier.
    pub fn seeded(fields: FormFields) -> Self {
        Self {
            cell: OnceCell::from(fields),
        }
    }

    pub fn is_populated(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Cached view, parsing `body` on first use.
    ///
    /// Bodies that are not form-encoded (per `content_type`) produce an
    /// empty view rather than an error.
    pub fn get_or_parse(&self, content_type: Option<&str>, body: &[u8]) -> &FormFields {
        self.cell.get_or_init(|| {
            if is_form_encoded(content_type) {
                FormFields::parse(body)
            } else {
                FormFields::default()
            }
        })
    }

    /// Drop the cached view; the next read re-parses.
    pub fn invalidate(&mut self) {
        self.cell.take();
    }
}

/// Media type without parameters, lower-cased.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Form-encoded, or no content type at all.
pub fn is_form_encoded(content_type: Option<&str>) -> bool {
    match content_type.map(essence) {
        None => true,
        Some(ct) => ct.is_empty() || ct == FORM_CONTENT_TYPE,
    }
}

/// `application/json` or any `+json` structured syntax.
pub fn is_json(content_type: Option<&str>) -> bool {
    content_type
        .map(essence)
        .is_some_and(|ct| ct == "application/json" || ct.ends_with("+json"))
}
