use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, instrument};

use super::IndexError;
use crate::ingest::TextRecord;

/// A paper in the corpus
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    #[serde(default)]
    pub title: String,

    #[serde(rename = "abstract", default)]
    pub abstract_text: String,

    #[serde(default)]
    pub url_pdf: Option<String>,

    #[serde(default)]
    pub paper_url: String,

    /// Publication date as written by the cleaning stage
    #[serde(default, deserialize_with = "string_or_number")]
    pub date: Option<String>,

    /// Text that was embedded; falls back to title and abstract
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl DocumentRecord {
    /// The text this document is embedded from
    pub fn embedding_text(&self) -> String {
        match self.content.as_deref() {
            Some(content) if !content.trim().is_empty() => content.to_string(),
            _ => format!("{} {}", self.title, self.abstract_text),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

/// The documents of the corpus in index order
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    documents: Vec<DocumentRecord>,
    by_paper_url: HashMap<String, usize>,
}

impl Corpus {
    pub fn from_documents(documents: Vec<DocumentRecord>) -> Self {
        let mut by_paper_url = HashMap::with_capacity(documents.len());
        for (i, doc) in documents.iter().enumerate() {
            if !doc.paper_url.is_empty() {
                by_paper_url.entry(doc.paper_url.clone()).or_insert(i);
            }
        }
        Self {
            documents,
            by_paper_url,
        }
    }

    /// Load one document per non-blank line of a JSON Lines file
    #[instrument]
    pub fn load_jsonl(path: &Path) -> Result<Self, IndexError> {
        let file = File::open(path)
            .map_err(|e| IndexError::Corpus(format!("{}: {}", path.display(), e)))?;
        let mut documents = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let doc: DocumentRecord = serde_json::from_str(&line).map_err(|e| {
                IndexError::Corpus(format!("{} line {}: {}", path.display(), line_no + 1, e))
            })?;
            documents.push(doc);
        }
        info!("Loaded {} documents", documents.len());
        Ok(Self::from_documents(documents))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DocumentRecord> {
        self.documents.get(index)
    }

    pub fn documents(&self) -> &[DocumentRecord] {
        &self.documents
    }

    /// Row of the first document with this `paper_url`
    pub fn position_of_paper_url(&self, paper_url: &str) -> Option<usize> {
        self.by_paper_url.get(paper_url).copied()
    }

    /// Embedding inputs in corpus order
    pub fn text_records(&self) -> Vec<TextRecord> {
        self.documents
            .iter()
            .enumerate()
            .map(|(i, doc)| TextRecord::new(i, doc.embedding_text()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_jsonl() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"title": "Attention", "abstract": "Transformers.", "paper_url": "p/1", "url_pdf": "a.pdf", "date": "2017-06-12"}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"title": "LSTM", "abstract": "Memory.", "paper_url": "p/2", "date": 1997, "content": "custom text"}}"#
        )
        .unwrap();

        let corpus = Corpus::load_jsonl(file.path()).unwrap();

        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.get(0).unwrap().abstract_text, "Transformers.");
        assert_eq!(corpus.get(1).unwrap().date.as_deref(), Some("1997"));
        assert_eq!(corpus.position_of_paper_url("p/2"), Some(1));
        assert_eq!(corpus.position_of_paper_url("p/3"), None);

        let records = corpus.text_records();
        assert_eq!(records[0], TextRecord::new(0, "Attention Transformers."));
        assert_eq!(records[1].content, "custom text");
    }

    #[test]
    fn test_bad_line_reports_position() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"title": "ok"}}"#).unwrap();
        writeln!(file, "not json").unwrap();

        match Corpus::load_jsonl(file.path()) {
            Err(IndexError::Corpus(message)) => assert!(message.contains("line 2")),
            other => panic!("unexpected result: {:?}", other.map(|c| c.len())),
        }
    }

    #[test]
    fn test_duplicate_paper_url_maps_to_first_row() {
        let doc = |url: &str| DocumentRecord {
            paper_url: url.to_string(),
            ..Default::default()
        };
        let corpus = Corpus::from_documents(vec![doc("a"), doc("b"), doc("a")]);
        assert_eq!(corpus.position_of_paper_url("a"), Some(0));
    }
}
