//! Shared domain model
//!
//! These types cross service boundaries, so their serde field names are part
//! of the wire contract (see [`crate::wire`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::wire::is_valid_url;
use crate::{Error, Result};

/// Identity of one monitoring query: the issue being tracked plus the
/// requester that asked for it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey {
    pub issue: String,
    pub requester: String,
}

impl QueryKey {
    /// Build a key, rejecting empty or whitespace-only labels
    pub fn new(issue: impl Into<String>, requester: impl Into<String>) -> Result<Self> {
        let issue = issue.into();
        let requester = requester.into();
        if issue.trim().is_empty() {
            return Err(Error::InvalidInput("issue label is empty".to_string()));
        }
        if requester.trim().is_empty() {
            return Err(Error::InvalidInput("requester label is empty".to_string()));
        }
        Ok(Self { issue, requester })
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.issue, self.requester)
    }
}

/// Search hit returned by the source before the body has been fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMatch {
    pub id: String,
    pub title: String,
    pub url: String,
    pub section_id: String,
    pub section_name: String,
    #[serde(with = "crate::wire::timestamp")]
    pub publication_timestamp: DateTime<Utc>,
}

/// A fully fetched article
///
/// All fields are non-empty once constructed through [`Article::from_match`]
/// or accepted through [`Article::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub issue: String,
    pub requester: String,
    pub label: String,
    pub section_id: String,
    pub section_name: String,
    #[serde(with = "crate::wire::timestamp")]
    pub publication_timestamp: DateTime<Utc>,
    pub title: String,
    pub url: String,
    pub body_text: String,
}

impl Article {
    /// Combine a search hit with its fetched body
    ///
    /// The article label is the issue it was harvested for.
    pub fn from_match(key: &QueryKey, hit: SourceMatch, body_text: String) -> Result<Self> {
        let article = Self {
            id: hit.id,
            issue: key.issue.clone(),
            requester: key.requester.clone(),
            label: key.issue.clone(),
            section_id: hit.section_id,
            section_name: hit.section_name,
            publication_timestamp: hit.publication_timestamp,
            title: hit.title,
            url: hit.url,
            body_text,
        };
        article.validate()?;
        Ok(article)
    }

    /// Key of the query this article was harvested for
    pub fn query_key(&self) -> QueryKey {
        QueryKey {
            issue: self.issue.clone(),
            requester: self.requester.clone(),
        }
    }

    /// Check the non-empty and URL invariants
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("id", &self.id),
            ("issue", &self.issue),
            ("requester", &self.requester),
            ("label", &self.label),
            ("sectionId", &self.section_id),
            ("sectionName", &self.section_name),
            ("title", &self.title),
            ("url", &self.url),
            ("bodyText", &self.body_text),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(Error::InvalidInput(format!(
                    "article {} has empty field '{}'",
                    self.id, name
                )));
            }
        }
        if !is_valid_url(&self.url) {
            return Err(Error::InvalidInput(format!(
                "article {} has invalid url '{}'",
                self.id, self.url
            )));
        }
        Ok(())
    }
}

/// One document handed to the compute engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusDocument {
    pub id: String,
    pub label: String,
    pub text: String,
}

impl From<&Article> for CorpusDocument {
    fn from(article: &Article) -> Self {
        Self {
            id: article.id.clone(),
            label: article.label.clone(),
            text: article.body_text.clone(),
        }
    }
}

/// Topic extraction output for one document
///
/// `top_words` holds one word list per extracted topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentTopics {
    pub id: String,
    pub top_words: Vec<Vec<String>>,
}

/// Topic assignment delivered to the requester: the article metadata
/// (without the body) plus the extracted topic word lists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicResult {
    pub id: String,
    pub issue: String,
    pub requester: String,
    pub label: String,
    pub section_id: String,
    pub section_name: String,
    #[serde(with = "crate::wire::timestamp")]
    pub publication_timestamp: DateTime<Utc>,
    pub title: String,
    pub url: String,
    pub top_words: Vec<Vec<String>>,
}

impl TopicResult {
    pub fn new(article: &Article, top_words: Vec<Vec<String>>) -> Self {
        Self {
            id: article.id.clone(),
            issue: article.issue.clone(),
            requester: article.requester.clone(),
            label: article.label.clone(),
            section_id: article.section_id.clone(),
            section_name: article.section_name.clone(),
            publication_timestamp: article.publication_timestamp,
            title: article.title.clone(),
            url: article.url.clone(),
            top_words,
        }
    }
}

/// Monitoring state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Idle,
    Polling,
    Sleeping,
    Completed,
    /// Stopped by an external request before completing
    Stopped,
}

impl MonitorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MonitorState::Completed | MonitorState::Stopped)
    }
}

/// Status notification sent to the requester-facing sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub issue: String,
    pub requester: String,
    pub status: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hit() -> SourceMatch {
        SourceMatch {
            id: "world/2024/mar/09/a".to_string(),
            title: "A title".to_string(),
            url: "https://source.example/world/a".to_string(),
            section_id: "world".to_string(),
            section_name: "World news".to_string(),
            publication_timestamp: Utc.with_ymd_and_hms(2024, 3, 9, 7, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_query_key_rejects_blank_labels() {
        assert!(QueryKey::new("", "alice").is_err());
        assert!(QueryKey::new("brexit", "  ").is_err());
        assert_eq!(QueryKey::new("brexit", "alice").unwrap().to_string(), "brexit/alice");
    }

    #[test]
    fn test_article_from_match_rejects_empty_body() {
        let key = QueryKey::new("brexit", "alice").unwrap();
        assert!(Article::from_match(&key, hit(), "   ".to_string()).is_err());

        let article = Article::from_match(&key, hit(), "Body".to_string()).unwrap();
        assert_eq!(article.label, "brexit");
        assert_eq!(article.query_key(), key);
    }

    #[test]
    fn test_article_wire_field_names() {
        let key = QueryKey::new("brexit", "alice").unwrap();
        let article = Article::from_match(&key, hit(), "Body".to_string()).unwrap();
        let json = serde_json::to_value(&article).unwrap();

        assert_eq!(json["sectionId"], "world");
        assert_eq!(json["publicationTimestamp"], "2024-03-09T07:00:00Z");
        assert_eq!(json["bodyText"], "Body");
    }

    #[test]
    fn test_topic_result_drops_body() {
        let key = QueryKey::new("brexit", "alice").unwrap();
        let article = Article::from_match(&key, hit(), "Body".to_string()).unwrap();
        let result = TopicResult::new(&article, vec![vec!["vote".to_string()]]);
        let json = serde_json::to_value(&result).unwrap();

        assert!(json.get("bodyText").is_none());
        assert_eq!(json["topWords"][0][0], "vote");
    }
}
