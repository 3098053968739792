use anyhow::{anyhow, Context, Result};
use std::path::Path;

/// Class-id to label table.
///
/// Loaded from a newline-separated labels file (line N is class N). Blank lines keep
/// their index so ids stay aligned with the model.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassLabels {
    labels: Vec<String>,
}

impl ClassLabels {
    pub fn from_list<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let labels: Vec<String> = contents
            .lines()
            .map(|line| line.trim().to_string())
            .collect();
        if labels.iter().all(|label| label.is_empty()) {
            return Err(anyhow!("labels file contains no class labels"));
        }
        Ok(Self { labels })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read labels file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid labels file {}", path.display()))
    }

    /// Label for `class_id`, if the table has a non-empty entry for it.
    pub fn get(&self, class_id: u32) -> Option<&str> {
        self.labels
            .get(class_id as usize)
            .map(String::as_str)
            .filter(|label| !label.is_empty())
    }

    /// Label for `class_id`, falling back to `class #<id>`.
    pub fn resolve(&self, class_id: u32) -> String {
        self.get(class_id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("class #{}", class_id))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_blank_lines_aligned() -> Result<()> {
        let labels = ClassLabels::parse("background\n\ncat\ndog\n")?;
        assert_eq!(labels.get(0), Some("background"));
        assert_eq!(labels.get(1), None);
        assert_eq!(labels.get(3), Some("dog"));
        assert_eq!(labels.resolve(1), "class #1");
        assert_eq!(labels.resolve(42), "class #42");
        Ok(())
    }

    #[test]
    fn parse_rejects_empty_table() {
        assert!(ClassLabels::parse("\n \n").is_err());
    }
}
