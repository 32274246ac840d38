mod api;
pub mod callback;
pub mod form;

pub use api::{CallbackAccepted, CompositeCallbackForm, HealthResponse};
pub use callback::{COMPOSITE_FIELD, CallbackPayload, FLAT_FIELDS, FieldValue};
pub use form::{CachedForm, FORM_CONTENT_TYPE, FormCache, FormFields, RequestFormExt};
