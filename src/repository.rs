//! Repository - metadata of one ingestion session

use crate::entity::Language;
use crate::id::RepositoryId;
use crate::schema::attr;
use crate::value::{AttributeMap, Value};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Repository {
    pub id: RepositoryId,
    pub name: String,
    pub path: Option<String>,
    pub ingestion_date: DateTime<Utc>,
    /// Languages of the entities stored by this session
    pub languages: BTreeSet<Language>,
}

impl Repository {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: RepositoryId::new(),
            name: name.into(),
            path: None,
            ingestion_date: Utc::now(),
            languages: BTreeSet::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn to_facts(&self) -> AttributeMap {
        let mut facts = AttributeMap::new()
            .with(attr::REPOSITORY_ID, self.id.to_string())
            .with(attr::REPOSITORY_NAME, self.name.as_str())
            .with(attr::REPOSITORY_INGESTION_DATE, self.ingestion_date);
        facts.push_opt(attr::REPOSITORY_PATH, self.path.as_deref());
        for language in &self.languages {
            facts.push(attr::REPOSITORY_LANGUAGES, Value::keyword(language.as_str()));
        }
        facts
    }

    pub fn from_facts(facts: &AttributeMap) -> Result<Self> {
        Ok(Self {
            id: RepositoryId::parse(facts.require_str(attr::REPOSITORY_ID)?)?,
            name: facts.require_str(attr::REPOSITORY_NAME)?.to_string(),
            path: facts.get_str(attr::REPOSITORY_PATH).map(str::to_string),
            ingestion_date: facts
                .get_instant(attr::REPOSITORY_INGESTION_DATE)
                .unwrap_or_default(),
            languages: facts
                .get_all(attr::REPOSITORY_LANGUAGES)
                .filter_map(Value::as_str)
                .map(Language::from_name)
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facts_roundtrip() {
        let mut repo = Repository::new("demo").with_path("/src/demo");
        repo.languages.insert(Language::Rust);
        repo.languages.insert(Language::Python);

        let facts = repo.to_facts();
        assert_eq!(facts.get_all(attr::REPOSITORY_LANGUAGES).count(), 2);

        let decoded = Repository::from_facts(&facts).unwrap();
        assert_eq!(decoded, repo);
    }
}
