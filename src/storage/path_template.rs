use std::path::PathBuf;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use log::info;

use crate::configuration::types::Timezone;
use crate::error_handling::types::{ConfigError, StorageError};

/// Output path with strftime placeholders, e.g. `/var/lib/redcap/%Y/%m/%d/%H%M.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    template: String,
    timezone: Timezone,
}

impl PathTemplate {
    pub fn new(template: impl Into<String>, timezone: Timezone) -> Result<Self, ConfigError> {
        let template = template.into();
        if template.is_empty() {
            return Err(ConfigError::BadTemplate("template is empty".to_string()));
        }
        if StrftimeItems::new(&template).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::BadTemplate(template));
        }
        Ok(Self { template, timezone })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    pub fn timezone(&self) -> Timezone {
        self.timezone
    }

    /// Renders the template for `t`, without collision handling.
    pub fn render(&self, t: DateTime<Utc>) -> Result<PathBuf, StorageError> {
        self.render_pattern(&self.template, t)
    }

    /// Renders the template for `t` and, while the result already exists,
    /// retries with `-1`, `-2`, ... inserted before the file extension.
    pub fn find_free_path(&self, t: DateTime<Utc>) -> Result<PathBuf, StorageError> {
        let mut path = self.render(t)?;
        let mut suffix = 1u32;
        while path.exists() {
            info!("File already exists: {}", path.display());
            path = self.render_pattern(&with_suffix(&self.template, suffix), t)?;
            suffix += 1;
        }
        Ok(path)
    }

    fn render_pattern(&self, pattern: &str, t: DateTime<Utc>) -> Result<PathBuf, StorageError> {
        self.timezone
            .format(t, pattern)
            .map(PathBuf::from)
            .map_err(|_| StorageError::TemplateFailed(pattern.to_string()))
    }
}

/// `dir/name.ext` -> `dir/name-N.ext`; names without an extension get `-N` appended.
/// The extension starts at the last dot of the file name, so `dir/.hidden`
/// becomes `dir/-N.hidden`.
fn with_suffix(template: &str, n: u32) -> String {
    let name_start = template.rfind('/').map_or(0, |i| i + 1);
    let name = &template[name_start..];
    match name.rfind('.') {
        Some(dot) => {
            let split = name_start + dot;
            format!("{}-{}{}", &template[..split], n, &template[split..])
        }
        _ => format!("{}-{}", template, n),
    }
}
