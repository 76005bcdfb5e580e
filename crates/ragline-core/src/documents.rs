//! Loading text documents from files and directories for ingestion.
//!
//! Markdown and plain-text files are read as-is, minus an optional YAML
//! front matter block whose scalar fields become document metadata.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::metadata::{self, Metadata, MetadataValue};

const EXTENSIONS: [&str; 3] = ["md", "markdown", "txt"];

/// Metadata key holding the file a document was read from.
pub const SOURCE_KEY: &str = "source";
/// Metadata key holding a paragraph's position after [`split_paragraphs`].
pub const PARAGRAPH_KEY: &str = "paragraph";

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: PathBuf,
    /// Content without front matter.
    pub body: String,
    pub tags: Metadata,
}

impl Document {
    /// Stable caller id for the document, derived from its path.
    pub fn id(&self) -> String {
        match self.tags.get(PARAGRAPH_KEY) {
            Some(p) => format!("{}:{p}", self.path.display()),
            None => self.path.display().to_string(),
        }
    }
}

/// Reads every supported file among `paths`; directories are walked
/// recursively, skipping hidden entries. Files are returned in path order.
pub fn load_documents(paths: &[PathBuf]) -> Result<Vec<Document>, LoadError> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
            {
                let entry = entry.map_err(|e| LoadError::Walk(e.to_string()))?;
                if entry.file_type().is_file() && is_supported(entry.path()) {
                    files.push(entry.into_path());
                }
            }
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            return Err(LoadError::NotFound(path.clone()));
        }
    }
    files
        .into_iter()
        .map(|path| {
            let raw = std::fs::read_to_string(&path).map_err(|e| LoadError::Read(path.clone(), e))?;
            Ok(parse_document(path, &raw))
        })
        .collect()
}

/// Splits each document on blank lines into one document per paragraph,
/// tagged with its position.
pub fn split_paragraphs(documents: Vec<Document>) -> Vec<Document> {
    documents
        .into_iter()
        .flat_map(|doc| {
            paragraphs(&doc.body)
                .into_iter()
                .enumerate()
                .map(|(i, body)| {
                    let mut tags = doc.tags.clone();
                    tags.insert(PARAGRAPH_KEY.into(), i.into());
                    Document {
                        path: doc.path.clone(),
                        body,
                        tags,
                    }
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

fn paragraphs(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in body.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n"));
    }
    out
}

fn parse_document(path: PathBuf, raw: &str) -> Document {
    let (front, body) = split_front_matter(raw);
    let mut tags = front.map(front_matter_tags).unwrap_or_default();
    tags.insert(SOURCE_KEY.into(), MetadataValue::String(path.display().to_string()));
    Document {
        path,
        body: body.to_string(),
        tags,
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Returns the YAML between a leading `---` line and the next `---` line,
/// and the rest of the content.
fn split_front_matter(content: &str) -> (Option<&str>, &str) {
    let s = content.trim_start();
    let Some(after_open) = s.strip_prefix("---") else {
        return (None, content);
    };
    let Some(after_open) = after_open.strip_prefix('\n').or_else(|| after_open.strip_prefix("\r\n")) else {
        return (None, content);
    };
    if let Some(rest) = after_open.strip_prefix("---") {
        return (Some(""), rest.trim_start());
    }
    match after_open.find("\n---") {
        Some(end) => {
            let yaml = &after_open[..end];
            let rest = &after_open[end + 4..];
            let rest = rest.split_once('\n').map_or("", |(_, body)| body);
            (Some(yaml), rest.trim_start())
        }
        None => (None, content),
    }
}

/// Scalar fields only; keys unusable as metadata are skipped.
fn front_matter_tags(yaml: &str) -> Metadata {
    let mapping: serde_yaml::Mapping = match serde_yaml::from_str(yaml) {
        Ok(Some(m)) => m,
        Ok(None) => return Metadata::new(),
        Err(e) => {
            debug!("ignoring unreadable front matter: {e}");
            return Metadata::new();
        }
    };
    mapping
        .into_iter()
        .filter_map(|(key, value)| {
            let key = key.as_str()?.to_string();
            if metadata::validate_key(&key).is_err() || key == SOURCE_KEY {
                debug!("skipping front matter key {key:?}");
                return None;
            }
            let value = match value {
                serde_yaml::Value::Bool(b) => MetadataValue::Bool(b),
                serde_yaml::Value::Number(n) => match n.as_i64() {
                    Some(i) => MetadataValue::Integer(i),
                    None => MetadataValue::Float(n.as_f64()?),
                },
                serde_yaml::Value::String(s) => MetadataValue::String(s),
                _ => return None,
            };
            Some((key, value))
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("no such file or directory: {0}")]
    NotFound(PathBuf),
    #[error("failed to walk directory: {0}")]
    Walk(String),
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ragline-docs-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn front_matter_plain() {
        assert_eq!(split_front_matter("Hello world."), (None, "Hello world."));
    }

    #[test]
    fn front_matter_with_yaml() {
        let s = "---\ntitle: Foo\ndate: 2024-01-01\n---\n\nActual content here.";
        let (yaml, body) = split_front_matter(s);
        assert_eq!(yaml, Some("title: Foo\ndate: 2024-01-01"));
        assert_eq!(body, "Actual content here.");
    }

    #[test]
    fn unterminated_front_matter_is_content() {
        let s = "---\ntitle: Foo\nno closing fence";
        assert_eq!(split_front_matter(s), (None, s));
    }

    #[test]
    fn front_matter_scalars_become_tags() {
        let tags = front_matter_tags("title: Intro\nweight: 3\nratio: 0.5\ndraft: false\nlist: [a, b]\nBad-Key: x");
        assert_eq!(tags["title"], MetadataValue::from("Intro"));
        assert_eq!(tags["weight"], MetadataValue::Integer(3));
        assert_eq!(tags["ratio"], MetadataValue::Float(0.5));
        assert_eq!(tags["draft"], MetadataValue::Bool(false));
        assert!(!tags.contains_key("list"));
        assert!(!tags.contains_key("Bad-Key"));
    }

    #[test]
    fn paragraphs_split_on_blank_lines() {
        let doc = Document {
            path: PathBuf::from("notes.md"),
            body: "First line\ncontinued.\n\n\nSecond.  \n   \nThird.".into(),
            tags: Metadata::new(),
        };
        let parts = split_paragraphs(vec![doc]);
        let bodies: Vec<_> = parts.iter().map(|d| d.body.as_str()).collect();
        assert_eq!(bodies, ["First line\ncontinued.", "Second.", "Third."]);
        assert_eq!(parts[2].tags[PARAGRAPH_KEY], MetadataValue::Integer(2));
        assert_eq!(parts[2].id(), "notes.md:2");
    }

    #[test]
    fn loads_supported_files_and_skips_hidden() {
        let dir = scratch_dir("walk");
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::create_dir_all(dir.join(".git")).unwrap();
        std::fs::write(dir.join("a.md"), "---\ntopic: rust\n---\nAlpha").unwrap();
        std::fs::write(dir.join("sub/b.txt"), "Beta").unwrap();
        std::fs::write(dir.join("c.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.join(".hidden.md"), "secret").unwrap();
        std::fs::write(dir.join(".git/d.md"), "ignored").unwrap();

        let docs = load_documents(&[dir.clone()]).unwrap();
        let bodies: Vec<_> = docs.iter().map(|d| d.body.as_str()).collect();
        assert_eq!(bodies, ["Alpha", "Beta"]);
        assert_eq!(docs[0].tags["topic"], MetadataValue::from("rust"));
        assert!(docs[1].tags.contains_key(SOURCE_KEY));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_path_is_an_error() {
        let missing = std::env::temp_dir().join("ragline-docs-definitely-missing");
        assert!(matches!(load_documents(&[missing]), Err(LoadError::NotFound(_))));
    }
}
