// ABOUTME: Assistant profiles that parameterize one session controller.
// ABOUTME: Policy assistant and page-help differ only in payload shape and document detection.

use std::collections::BTreeMap;

use crate::models::PendingQuestion;
use crate::protocol::QueryPayload;

/// What the user submitted, after pending-question binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// A fresh free-form query
    Query { text: String, query_id: String },
    /// An answer bound to the question the server asked
    Answer {
        answer: String,
        question: PendingQuestion,
    },
}

impl Submission {
    pub fn query_id(&self) -> &str {
        match self {
            Submission::Query { query_id, .. } => query_id,
            Submission::Answer { question, .. } => &question.original_query_id,
        }
    }

    /// Shared payload shape; profiles add their own fields on top.
    fn payload(&self, session_id: &str) -> QueryPayload {
        match self {
            Submission::Query { text, query_id } => QueryPayload {
                session_id: session_id.to_string(),
                user_query: text.clone(),
                query_id: query_id.clone(),
                policy_id: None,
                page: None,
                answers: None,
                original_query: None,
            },
            Submission::Answer { answer, question } => {
                let mut answers = BTreeMap::new();
                answers.insert(question.question.clone(), answer.clone());
                QueryPayload {
                    session_id: session_id.to_string(),
                    user_query: question.original_query.clone(),
                    query_id: question.original_query_id.clone(),
                    policy_id: None,
                    page: None,
                    answers: Some(answers),
                    original_query: Some(question.original_query.clone()),
                }
            }
        }
    }
}

/// Variation point between the assistants that share the controller.
pub trait AssistantProfile: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Build the outbound payload for a submission.
    fn query_payload(&self, session_id: &str, submission: &Submission) -> QueryPayload;

    /// Whether a token's response category marks a generated artifact.
    fn is_document(&self, category: Option<&str>) -> bool;
}

/// Policy drafting assistant
#[derive(Debug, Clone)]
pub struct PolicyAssistant {
    pub policy_id: Option<String>,
    pub document_categories: Vec<String>,
}

impl Default for PolicyAssistant {
    fn default() -> Self {
        Self {
            policy_id: None,
            document_categories: vec!["document".to_string()],
        }
    }
}

impl PolicyAssistant {
    pub fn with_policy_id(mut self, policy_id: impl Into<String>) -> Self {
        self.policy_id = Some(policy_id.into());
        self
    }
}

impl AssistantProfile for PolicyAssistant {
    fn name(&self) -> &'static str {
        "policy"
    }

    fn query_payload(&self, session_id: &str, submission: &Submission) -> QueryPayload {
        QueryPayload {
            policy_id: self.policy_id.clone(),
            ..submission.payload(session_id)
        }
    }

    fn is_document(&self, category: Option<&str>) -> bool {
        category.is_some_and(|c| {
            self.document_categories
                .iter()
                .any(|d| d.eq_ignore_ascii_case(c))
        })
    }
}

/// Contextual help for one console page
#[derive(Debug, Clone, Default)]
pub struct PageHelp {
    pub page: Option<String>,
}

impl AssistantProfile for PageHelp {
    fn name(&self) -> &'static str {
        "page_help"
    }

    fn query_payload(&self, session_id: &str, submission: &Submission) -> QueryPayload {
        QueryPayload {
            page: self.page.clone(),
            ..submission.payload(session_id)
        }
    }

    fn is_document(&self, _category: Option<&str>) -> bool {
        false
    }
}
