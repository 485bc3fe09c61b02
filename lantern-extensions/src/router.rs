//! Keyword routing of launcher queries

use std::collections::BTreeMap;

use crate::identity::ExtensionId;

/// Query text split into keyword and argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub keyword: String,
    /// `None` when nothing follows the keyword, `Some("")` when only a
    /// space does
    pub argument: Option<String>,
}

impl Query {
    pub fn parse(text: &str) -> Self {
        match text.split_once(' ') {
            Some((keyword, argument)) => Self {
                keyword: keyword.to_string(),
                argument: Some(argument.to_string()),
            },
            None => Self {
                keyword: text.to_string(),
                argument: None,
            },
        }
    }

    /// Only a keyword followed by a space addresses an extension
    pub fn is_active(&self) -> bool {
        !self.keyword.is_empty() && self.argument.is_some()
    }
}

/// Find the extension and trigger whose keyword matches the query
///
/// `candidates` pairs each registered extension with its effective
/// keywords by trigger id. The first match wins. Inactive queries match
/// nothing.
pub fn route<'a, I>(query: &Query, candidates: I) -> Option<(ExtensionId, String)>
where
    I: IntoIterator<Item = (&'a ExtensionId, BTreeMap<String, String>)>,
{
    if !query.is_active() {
        return None;
    }
    candidates.into_iter().find_map(|(ext_id, keywords)| {
        keywords
            .into_iter()
            .find(|(_, keyword)| *keyword == query.keyword)
            .map(|(trigger_id, _)| (ext_id.clone(), trigger_id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(
            Query::parse("gh"),
            Query {
                keyword: "gh".to_string(),
                argument: None
            }
        );
        assert_eq!(Query::parse("gh ").argument, Some(String::new()));
        assert_eq!(Query::parse("gh rust lang").argument, Some("rust lang".to_string()));
        assert_eq!(Query::parse("").keyword, "");

        assert!(!Query::parse("gh").is_active());
        assert!(Query::parse("gh ").is_active());
        assert!(!Query::parse(" gh").is_active());
    }

    #[test]
    fn test_route() {
        let github = ExtensionId::new("com.github.a.gh");
        let notes = ExtensionId::new("notes");
        let keywords = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
            pairs
                .iter()
                .map(|(t, k)| (t.to_string(), k.to_string()))
                .collect()
        };
        let candidates = || {
            vec![
                (&github, keywords(&[("search", "gh"), ("issues", "ghi")])),
                (&notes, keywords(&[("new", "n")])),
            ]
        };

        assert_eq!(
            route(&Query::parse("ghi 42"), candidates()),
            Some((github.clone(), "issues".to_string()))
        );
        assert_eq!(
            route(&Query::parse("n "), candidates()),
            Some((notes.clone(), "new".to_string()))
        );
        // a bare keyword has no argument yet
        assert_eq!(route(&Query::parse("n"), candidates()), None);
        assert_eq!(route(&Query::parse("g hub"), candidates()), None);
        assert_eq!(route(&Query::parse(" gh"), candidates()), None);
    }
}
