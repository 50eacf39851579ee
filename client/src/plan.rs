use std::path::Path;

use anyhow::{bail, Context, Result};
use glob::glob;

use common::{JobRequest, MergeRule, TaskSpec};

/// Lee un plan completo (`JobRequest`) de un archivo JSON o YAML.
pub fn load_plan(path: &Path) -> Result<JobRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("no se pudo leer el plan {}", path.display()))?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let req = if is_yaml {
        serde_yaml::from_str(&raw).with_context(|| format!("YAML inválido en {}", path.display()))?
    } else {
        serde_json::from_str(&raw).with_context(|| format!("JSON inválido en {}", path.display()))?
    };
    Ok(req)
}

/// Una tarea por archivo que haga match, en orden de ruta. El contenido del
/// archivo es el payload y su posición la pista de orden.
pub fn plan_from_glob(
    pattern: &str,
    name: String,
    merge_rule: MergeRule,
    command: Option<String>,
) -> Result<JobRequest> {
    let mut paths: Vec<_> = glob(pattern)
        .with_context(|| format!("patrón inválido: {}", pattern))?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    if paths.is_empty() {
        bail!("ningún archivo coincide con {}", pattern);
    }

    let mut tasks = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        let payload = std::fs::read_to_string(path)
            .with_context(|| format!("no se pudo leer {}", path.display()))?;
        tasks.push(TaskSpec {
            id: path.to_string_lossy().to_string(),
            payload,
            optional: false,
            sequence: Some(i as u64),
            command: command.clone(),
        });
    }

    Ok(JobRequest {
        id: None,
        name,
        tasks,
        merge_rule,
    })
}
