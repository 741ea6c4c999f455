//! Subject tokenization, wildcard matching, and template handling.
//!
//! A subject is an ordered sequence of tokens separated by the syntax's
//! separator. Filters may use the match-one wildcard (`*`, exactly one
//! token) and the match-all wildcard (`>`, one or more remaining tokens,
//! final position only). Templates embed `{name}` placeholders, each of
//! which must occupy a whole token.

use std::collections::HashMap;

use crate::error::{DecodeError, SubjectError};
use crate::syntax::FilterSyntax;

/// Return `true` if `filter` matches `subject`.
///
/// Tokens are compared left to right: equal tokens advance, the match-one
/// wildcard accepts any single present token, and the match-all wildcard
/// accepts the remaining suffix provided at least one token remains. A
/// trailing match-one does not match a subject with additional tokens.
///
/// Empty filters and subjects are rejected.
pub fn filter_match(
    filter: &str,
    subject: &str,
    syntax: &FilterSyntax,
) -> Result<bool, SubjectError> {
    if subject.is_empty() {
        return Err(SubjectError::EmptySubject);
    }
    if filter.is_empty() {
        return Err(SubjectError::EmptyFilter);
    }
    let match_one = syntax.match_one.to_string();
    let match_all = syntax.match_all.to_string();
    let filter_tokens: Vec<&str> = filter.split(syntax.sep).collect();
    let subject_tokens: Vec<&str> = subject.split(syntax.sep).collect();
    for (idx, token) in filter_tokens.iter().enumerate() {
        if *token == match_all {
            // At least one subject token must remain.
            return Ok(subject_tokens.len() > idx);
        }
        match subject_tokens.get(idx) {
            None => return Ok(false),
            Some(candidate) => {
                if *token == match_one || token == candidate {
                    continue;
                }
                return Ok(false);
            }
        }
    }
    Ok(subject_tokens.len() == filter_tokens.len())
}

/// A parsed subject template: the normalized filter plus placeholder map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    filter: String,
    tokens: Vec<String>,
    placeholders: Vec<(String, usize)>,
}

impl Template {
    /// Parse a template, replacing each `{name}` placeholder with the
    /// match-one wildcard and recording its token index.
    pub fn parse(address: &str, syntax: &FilterSyntax) -> Result<Self, SubjectError> {
        if address.is_empty() {
            return Err(SubjectError::EmptySubject);
        }
        let raw_tokens: Vec<&str> = address.split(syntax.sep).collect();
        let last = raw_tokens.len() - 1;
        let mut tokens = Vec::with_capacity(raw_tokens.len());
        let mut placeholders: Vec<(String, usize)> = Vec::new();
        for (idx, token) in raw_tokens.iter().enumerate() {
            if token.starts_with('{') && token.ends_with('}') && token.len() > 2 {
                let name = &token[1..token.len() - 1];
                if placeholders.iter().any(|(n, _)| n == name) {
                    return Err(SubjectError::DuplicatePlaceholder {
                        name: name.to_string(),
                    });
                }
                placeholders.push((name.to_string(), idx));
                tokens.push(syntax.match_one_str());
                continue;
            }
            if token.contains('{') || token.contains('}') {
                return Err(SubjectError::PlaceholderNotToken {
                    token: (*token).to_string(),
                });
            }
            if *token == syntax.match_all.to_string() && idx != last {
                return Err(SubjectError::MatchAllNotTerminal);
            }
            tokens.push((*token).to_string());
        }
        let filter = tokens.join(&syntax.sep.to_string());
        Ok(Self {
            filter,
            tokens,
            placeholders,
        })
    }

    /// The normalized filter, with placeholders replaced by wildcards.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Placeholder names with their token indices, in template order.
    pub fn placeholders(&self) -> &[(String, usize)] {
        &self.placeholders
    }

    /// Substitute placeholder values positionally to produce a concrete
    /// subject. Fails naming every key absent from `values`.
    pub fn render(
        &self,
        values: &HashMap<String, String>,
        syntax: &FilterSyntax,
    ) -> Result<String, SubjectError> {
        let mut tokens = self.tokens.clone();
        let mut missing = Vec::new();
        for (name, idx) in &self.placeholders {
            match values.get(name) {
                Some(value) => tokens[*idx] = value.clone(),
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(SubjectError::MissingPlaceholders { keys: missing });
        }
        Ok(tokens.join(&syntax.sep.to_string()))
    }

    /// Read the concrete token at each placeholder index.
    ///
    /// A subject too short to cover a placeholder fails naming the key and
    /// its index; the failure is a decode error because it happens on the
    /// receive path.
    pub fn extract(
        &self,
        subject: &str,
        syntax: &FilterSyntax,
    ) -> Result<HashMap<String, String>, DecodeError> {
        let tokens: Vec<&str> = subject.split(syntax.sep).collect();
        let mut values = HashMap::with_capacity(self.placeholders.len());
        for (name, idx) in &self.placeholders {
            match tokens.get(*idx) {
                Some(token) => {
                    values.insert(name.clone(), (*token).to_string());
                }
                None => {
                    return Err(DecodeError::MissingToken {
                        key: name.clone(),
                        index: *idx,
                    });
                }
            }
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syntax() -> FilterSyntax {
        FilterSyntax::default()
    }

    #[test]
    fn test_equal_subjects_match() {
        assert!(filter_match("a.b.c", "a.b.c", &syntax()).unwrap());
        assert!(!filter_match("a.b.c", "a.b.d", &syntax()).unwrap());
    }

    #[test]
    fn test_match_one_wildcard() {
        assert!(filter_match("a.*.c", "a.b.c", &syntax()).unwrap());
        assert!(filter_match("a.*.c", "a.x.c", &syntax()).unwrap());
        assert!(!filter_match("a.*.c", "a.b", &syntax()).unwrap());
        assert!(!filter_match("a.*.c", "a.b.c.d", &syntax()).unwrap());
    }

    #[test]
    fn test_trailing_match_one_is_exact_width() {
        assert!(filter_match("t.*", "t.1", &syntax()).unwrap());
        assert!(!filter_match("t.*", "t.1.2", &syntax()).unwrap());
        assert!(!filter_match("t.*", "t", &syntax()).unwrap());
    }

    #[test]
    fn test_match_all_wildcard() {
        assert!(filter_match("a.>", "a.b", &syntax()).unwrap());
        assert!(filter_match("a.>", "a.b.c", &syntax()).unwrap());
        assert!(!filter_match("a.>", "a", &syntax()).unwrap());
    }

    #[test]
    fn test_empty_arguments_are_rejected() {
        assert_eq!(
            filter_match("a.b", "", &syntax()),
            Err(SubjectError::EmptySubject)
        );
        assert_eq!(
            filter_match("", "a.b", &syntax()),
            Err(SubjectError::EmptyFilter)
        );
    }

    #[test]
    fn test_subject_longer_than_filter() {
        assert!(!filter_match("a.b", "a.b.c", &syntax()).unwrap());
        assert!(!filter_match("a.b.c", "a.b", &syntax()).unwrap());
    }

    #[test]
    fn test_template_normalization() {
        let template = Template::parse("pages.{id}.versions.{v}", &syntax()).unwrap();
        assert_eq!(template.filter(), "pages.*.versions.*");
        assert_eq!(
            template.placeholders(),
            &[("id".to_string(), 1), ("v".to_string(), 3)]
        );
    }

    #[test]
    fn test_placeholder_must_be_whole_token() {
        let err = Template::parse("pages.pre{id}", &syntax()).unwrap_err();
        assert!(matches!(err, SubjectError::PlaceholderNotToken { .. }));
        let err = Template::parse("pages.{id}suf", &syntax()).unwrap_err();
        assert!(matches!(err, SubjectError::PlaceholderNotToken { .. }));
    }

    #[test]
    fn test_duplicate_placeholder_rejected() {
        let err = Template::parse("a.{id}.{id}", &syntax()).unwrap_err();
        assert!(matches!(err, SubjectError::DuplicatePlaceholder { .. }));
    }

    #[test]
    fn test_match_all_must_be_terminal() {
        let err = Template::parse("a.>.b", &syntax()).unwrap_err();
        assert_eq!(err, SubjectError::MatchAllNotTerminal);
        assert!(Template::parse("a.>", &syntax()).is_ok());
    }

    #[test]
    fn test_render_and_extract_round_trip() {
        let template = Template::parse("m.{id}", &syntax()).unwrap();
        let mut values = HashMap::new();
        values.insert("id".to_string(), "d1".to_string());
        let subject = template.render(&values, &syntax()).unwrap();
        assert_eq!(subject, "m.d1");
        let extracted = template.extract(&subject, &syntax()).unwrap();
        assert_eq!(extracted, values);
    }

    #[test]
    fn test_render_names_all_missing_keys() {
        let template = Template::parse("a.{x}.{y}", &syntax()).unwrap();
        let err = template.render(&HashMap::new(), &syntax()).unwrap_err();
        match err {
            SubjectError::MissingPlaceholders { keys } => {
                assert_eq!(keys, vec!["x".to_string(), "y".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_extract_too_short_subject() {
        let template = Template::parse("a.{x}.{y}", &syntax()).unwrap();
        let err = template.extract("a.1", &syntax()).unwrap_err();
        match err {
            DecodeError::MissingToken { key, index } => {
                assert_eq!(key, "y");
                assert_eq!(index, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rendered_subject_matches_own_filter() {
        let template = Template::parse("pages.{id}.updated", &syntax()).unwrap();
        let mut values = HashMap::new();
        values.insert("id".to_string(), "p42".to_string());
        let subject = template.render(&values, &syntax()).unwrap();
        assert!(filter_match(template.filter(), &subject, &syntax()).unwrap());
    }
}
