//! Fuzz testing for Telegram callback normalization.
//!
//! Feeds arbitrary bodies and content types through payload decoding, form
//! parsing and the full normalization step. It checks that:
//!
//! - Nothing panics on any input
//! - A rewritten body always carries a decodable `tgAuthResult` field
//! - Normalizing a rewritten body again is a no-op
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the callback fuzz target
//! cargo +nightly fuzz run fuzz_callback
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_callback -- -max_total_time=60
//! ```

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use greatideas_edge::middleware::{CallbackRequest, Outcome, SkipReason};
use greatideas_edge::models::callback::{
    COMPOSITE_FIELD, CallbackPayload, composite_is_usable, looks_like_object,
};
use greatideas_edge::models::FormFields;

#[derive(Debug, Arbitrary)]
enum ContentType {
    Json,
    Form,
    Missing,
    Other(String),
}

#[derive(Debug, Arbitrary)]
struct Input {
    content_type: ContentType,
    body: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let _ = CallbackPayload::from_json_body(&input.body);
    let _ = looks_like_object(&input.body);
    let fields = FormFields::parse(&input.body);
    if let Some(value) = fields.get(COMPOSITE_FIELD) {
        let _ = composite_is_usable(value);
    }

    let content_type = match input.content_type {
        ContentType::Json => Some("application/json".to_string()),
        ContentType::Form => Some("application/x-www-form-urlencoded".to_string()),
        ContentType::Missing => None,
        ContentType::Other(s) => Some(s),
    };

    let mut request = CallbackRequest::new(content_type, input.body.into());
    if let Ok(Outcome::Rewritten(_)) = request.normalize() {
        let composite = request
            .form_fields()
            .get(COMPOSITE_FIELD)
            .map(str::to_string);
        assert!(composite.as_deref().and_then(CallbackPayload::from_composite).is_some());

        let before = request.body().clone();
        assert!(matches!(
            request.normalize(),
            Ok(Outcome::Unchanged(SkipReason::CompositePresent))
        ));
        assert_eq!(request.body(), &before);
    }
});
