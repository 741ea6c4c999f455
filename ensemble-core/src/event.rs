//! Typed event specifications.
//!
//! An event is a specification, not a message delivered across the network.
//! Messages are the envelopes holding event data; buses are the transports
//! delivering them. Declaring events up front lets the rest of the code
//! target domain events instead of hand-written subject strings.
//!
//! An [`EventSpec`] carries four schema parameters:
//!
//! - `S` — the scope, typed attributes extracted from the subject,
//! - `T` — the payload, decoded from the message body,
//! - `M` — the metadata, decoded from the message headers,
//! - `R` — the reply payload; [`NoReply`] marks plain events.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DecodeError, SubjectError};
use crate::subject::{filter_match, Template};
use crate::syntax::FilterSyntax;

/// Bound shared by every schema parameter of an event.
pub trait Schema: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Schema for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Reply schema of events that cannot be requested.
///
/// The type is uninhabited, so a responder for a plain event can never be
/// written and a reply can never be constructed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum NoReply {}

/// A keyed record whose fields name the placeholders of a subject template.
///
/// `keys()` must list every field; construction of an [`EventSpec`] checks
/// the set against the template's placeholders. Field values render into
/// subject tokens, so they should be strings (scalars are stringified).
pub trait Scope: Schema {
    /// The placeholder names this scope covers.
    fn keys() -> &'static [&'static str];

    /// Render the scope as placeholder values.
    fn to_tokens(&self) -> Result<HashMap<String, String>, SubjectError> {
        let value = serde_json::to_value(self).map_err(|err| SubjectError::InvalidScope {
            reason: err.to_string(),
        })?;
        let mut tokens = HashMap::new();
        match value {
            Value::Null => {}
            Value::Object(map) => {
                for (key, value) in map {
                    let rendered = match value {
                        Value::String(s) => s,
                        Value::Bool(_) | Value::Number(_) => value.to_string(),
                        other => {
                            return Err(SubjectError::InvalidScope {
                                reason: format!("field '{key}' is not a scalar: {other}"),
                            });
                        }
                    };
                    tokens.insert(key, rendered);
                }
            }
            other => {
                return Err(SubjectError::InvalidScope {
                    reason: format!("scope must serialize to a map, got: {other}"),
                });
            }
        }
        Ok(tokens)
    }

    /// Rebuild the scope from extracted placeholder values.
    fn from_tokens(tokens: HashMap<String, String>) -> Result<Self, DecodeError> {
        let value = serde_json::to_value(tokens).map_err(|err| DecodeError::Scope {
            reason: err.to_string(),
        })?;
        serde_json::from_value(value).map_err(|err| DecodeError::Scope {
            reason: err.to_string(),
        })
    }
}

impl Scope for () {
    fn keys() -> &'static [&'static str] {
        &[]
    }

    fn to_tokens(&self) -> Result<HashMap<String, String>, SubjectError> {
        Ok(HashMap::new())
    }

    fn from_tokens(_tokens: HashMap<String, String>) -> Result<Self, DecodeError> {
        Ok(())
    }
}

/// An immutable, typed event declaration.
///
/// The address is a subject template; `{name}` placeholders are normalized
/// to the match-one wildcard at construction, producing the filter used to
/// subscribe. Construction fails when the scope's key set differs from the
/// template's placeholder set.
pub struct EventSpec<S, T, M = (), R = NoReply> {
    name: String,
    address: String,
    title: Option<String>,
    description: Option<String>,
    syntax: FilterSyntax,
    template: Template,
    _schemas: PhantomData<fn() -> (S, T, M, R)>,
}

/// An event without a reply schema.
pub type Event<S, T, M = ()> = EventSpec<S, T, M, NoReply>;

/// An event whose messages must be replied to.
pub type Service<S, T, R, M = ()> = EventSpec<S, T, M, R>;

/// An event with a static subject (no scope).
pub type StaticEvent<T, M = ()> = EventSpec<(), T, M, NoReply>;

/// A service with a static subject (no scope).
pub type StaticService<T, R, M = ()> = EventSpec<(), T, M, R>;

impl<S: Scope, T: Schema, M: Schema, R: Schema> EventSpec<S, T, M, R> {
    /// Declare an event with the default filter syntax.
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
    ) -> Result<Self, SubjectError> {
        Self::with_syntax(name, address, FilterSyntax::default())
    }

    /// Declare an event with a custom filter syntax.
    pub fn with_syntax(
        name: impl Into<String>,
        address: impl Into<String>,
        syntax: FilterSyntax,
    ) -> Result<Self, SubjectError> {
        let name = name.into();
        let address = address.into();
        if name.is_empty() {
            return Err(SubjectError::EmptyName);
        }
        let template = Template::parse(&address, &syntax)?;
        let keys = S::keys();
        let missing: Vec<String> = keys
            .iter()
            .filter(|key| !template.placeholders().iter().any(|(name, _)| name == *key))
            .map(|key| (*key).to_string())
            .collect();
        let unexpected: Vec<String> = template
            .placeholders()
            .iter()
            .filter(|(name, _)| !keys.contains(&name.as_str()))
            .map(|(name, _)| name.clone())
            .collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(SubjectError::ScopeMismatch {
                missing,
                unexpected,
            });
        }
        Ok(Self {
            name,
            address,
            title: None,
            description: None,
            syntax,
            template,
            _schemas: PhantomData,
        })
    }

    /// Attach a human-readable title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Attach a short description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }

    pub fn syntax(&self) -> &FilterSyntax {
        &self.syntax
    }

    /// The normalized filter used to subscribe to this event.
    pub fn filter_subject(&self) -> &str {
        self.template.filter()
    }

    /// Return `true` if this event's filter matches the given subject.
    pub fn match_subject(&self, subject: &str) -> Result<bool, SubjectError> {
        filter_match(self.filter_subject(), subject, &self.syntax)
    }

    /// Construct a concrete subject from the given scope.
    pub fn get_subject(&self, scope: &S) -> Result<String, SubjectError> {
        let values = scope.to_tokens()?;
        self.template.render(&values, &self.syntax)
    }

    /// Extract the scope from a concrete subject.
    pub fn extract_scope(&self, subject: &str) -> Result<S, DecodeError> {
        let values = self.template.extract(subject, &self.syntax)?;
        S::from_tokens(values)
    }
}

impl<S, T, M, R> Clone for EventSpec<S, T, M, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            address: self.address.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            syntax: self.syntax.clone(),
            template: self.template.clone(),
            _schemas: PhantomData,
        }
    }
}

impl<S, T, M, R> fmt::Debug for EventSpec<S, T, M, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSpec")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("filter", &self.template.filter())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct PageScope {
        id: String,
    }

    impl Scope for PageScope {
        fn keys() -> &'static [&'static str] {
            &["id"]
        }
    }

    #[test]
    fn test_event_declaration() {
        let event: Event<PageScope, u64> = EventSpec::new("measure", "m.{id}").unwrap();
        assert_eq!(event.name(), "measure");
        assert_eq!(event.filter_subject(), "m.*");
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = EventSpec::<(), u64>::new("", "m").unwrap_err();
        assert_eq!(err, SubjectError::EmptyName);
    }

    #[test]
    fn test_empty_address_rejected() {
        let err = EventSpec::<(), u64>::new("measure", "").unwrap_err();
        assert_eq!(err, SubjectError::EmptySubject);
    }

    #[test]
    fn test_scope_key_missing_from_template() {
        let err = EventSpec::<PageScope, u64>::new("measure", "m.static").unwrap_err();
        match err {
            SubjectError::ScopeMismatch { missing, unexpected } => {
                assert_eq!(missing, vec!["id".to_string()]);
                assert!(unexpected.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_template_placeholder_missing_from_scope() {
        let err = EventSpec::<(), u64>::new("measure", "m.{id}").unwrap_err();
        match err {
            SubjectError::ScopeMismatch { missing, unexpected } => {
                assert!(missing.is_empty());
                assert_eq!(unexpected, vec!["id".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_render_extract_round_trip() {
        let event: Event<PageScope, u64> = EventSpec::new("measure", "m.{id}").unwrap();
        let scope = PageScope {
            id: "d1".to_string(),
        };
        let subject = event.get_subject(&scope).unwrap();
        assert_eq!(subject, "m.d1");
        assert_eq!(event.extract_scope(&subject).unwrap(), scope);
        assert!(event.match_subject(&subject).unwrap());
    }

    #[test]
    fn test_static_event_subject() {
        let event: StaticEvent<u64> = EventSpec::new("tick", "clock.tick").unwrap();
        assert_eq!(event.get_subject(&()).unwrap(), "clock.tick");
        assert_eq!(event.extract_scope("clock.tick").unwrap(), ());
    }

    #[test]
    fn test_service_alias_carries_reply_schema() {
        let service: Service<(), u64, u64> = EventSpec::new("cmd", "t").unwrap();
        assert_eq!(service.filter_subject(), "t");
    }
}
