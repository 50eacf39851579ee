use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no se pudo leer el archivo de comandos: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML de comandos inválido: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("slug de comando repetido: {0}")]
    DuplicateSlug(String),
}

/// Comando que el worker sabe correr; las tareas lo piden por `slug`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub slug: String,
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CommandsFile {
    commands: Vec<CommandConfig>,
}

/// Comandos indexados por slug.
#[derive(Debug, Clone, Default)]
pub struct CommandSet {
    by_slug: HashMap<String, CommandConfig>,
}

impl CommandSet {
    pub fn new(commands: Vec<CommandConfig>) -> Result<Self, ConfigError> {
        let mut by_slug = HashMap::new();
        for command in commands {
            if by_slug.contains_key(&command.slug) {
                return Err(ConfigError::DuplicateSlug(command.slug));
            }
            by_slug.insert(command.slug.clone(), command);
        }
        Ok(Self { by_slug })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let file: CommandsFile = serde_yaml::from_str(yaml)?;
        Self::new(file.commands)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn get(&self, slug: &str) -> Option<&CommandConfig> {
        self.by_slug.get(slug)
    }

    pub fn len(&self) -> usize {
        self.by_slug.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slug.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_de_comandos_se_indexa_por_slug() {
        let yaml = r#"
commands:
  - slug: upper
    cmd: tr
    args: ["a-z", "A-Z"]
  - slug: copy
    cmd: cat
"#;
        let set = CommandSet::from_yaml_str(yaml).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("upper").unwrap().args, vec!["a-z", "A-Z"]);
        assert!(set.get("copy").unwrap().args.is_empty());
        assert!(set.get("nada").is_none());
    }

    #[test]
    fn slug_repetido_es_error() {
        let yaml = r#"
commands:
  - { slug: x, cmd: cat }
  - { slug: x, cmd: tac }
"#;
        let err = CommandSet::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSlug(ref s) if s == "x"));
    }

    #[test]
    fn yaml_mal_formado_es_error_de_parseo() {
        let err = CommandSet::from_yaml_str("commands: 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
