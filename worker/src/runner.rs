use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use common::{Task, TaskOutcome};

use crate::config::{CommandConfig, CommandSet};

/// Directorio de trabajo de los comandos, con el PATH que ven.
#[derive(Debug, Clone)]
pub struct RunDir {
    dir: PathBuf,
    path_env: Option<OsString>,
}

impl RunDir {
    /// Crea el directorio si falta.
    pub fn prepare(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref();
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            info!("directorio de datos creado: {}", dir.display());
        }
        let dir = dir.canonicalize()?;
        let path_env = command_path(&dir);
        Ok(Self { dir, path_env })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// PATH actual más el directorio del ejecutable y el de datos, sin repetir.
fn command_path(data_dir: &Path) -> Option<OsString> {
    let current = std::env::var_os("PATH").unwrap_or_default();
    let mut parts: Vec<PathBuf> = std::env::split_paths(&current).collect();

    match std::env::current_exe() {
        Ok(exe) => {
            if let Some(exe_dir) = exe.parent() {
                if !parts.iter().any(|p| p == exe_dir) {
                    parts.push(exe_dir.to_path_buf());
                }
            }
        }
        Err(e) => warn!("no se pudo obtener la ruta del ejecutable: {}", e),
    }
    if !parts.iter().any(|p| p == data_dir) {
        parts.push(data_dir.to_path_buf());
    }

    match std::env::join_paths(parts) {
        Ok(path) => Some(path),
        Err(e) => {
            warn!("PATH inválido, se hereda el del proceso: {}", e);
            None
        }
    }
}

/// Ejecuta una tarea. Sin comando es identidad: el payload vuelve tal cual.
pub async fn run_task(task: &Task, commands: &CommandSet, run_dir: &RunDir) -> TaskOutcome {
    let Some(slug) = task.command.as_deref() else {
        debug!("tarea {} sin comando, identidad", task.id);
        return TaskOutcome::Success {
            payload: task.payload.clone(),
        };
    };

    let Some(command) = commands.get(slug) else {
        return TaskOutcome::Failure {
            reason: format!("comando desconocido: {}", slug),
        };
    };

    let deadline = Duration::from_millis(task.deadline_ms);
    match tokio::time::timeout(deadline, run_command(command, &task.payload, run_dir)).await {
        Ok(Ok(stdout)) => TaskOutcome::Success { payload: stdout },
        Ok(Err(reason)) => TaskOutcome::Failure { reason },
        Err(_) => TaskOutcome::Failure {
            reason: format!("el comando {} superó el plazo de {:?}", slug, deadline),
        },
    }
}

// El payload va por stdin; stdout es el resultado parcial.
async fn run_command(command: &CommandConfig, input: &str, run_dir: &RunDir) -> Result<String, String> {
    let cmd = command.cmd.as_str();
    info!("corriendo {} {:?} en {}", cmd, command.args, run_dir.dir.display());

    let mut builder = Command::new(cmd);
    builder
        .args(&command.args)
        .current_dir(&run_dir.dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(path) = &run_dir.path_env {
        builder.env("PATH", path);
    }

    let mut child = builder
        .spawn()
        .map_err(|e| format!("no se pudo lanzar {}: {}", cmd, e))?;

    // stdin se escribe aparte mientras se leen stdout/stderr; si no, un
    // payload más grande que el buffer del pipe bloquea a los dos lados
    let writer = child.stdin.take().map(|mut stdin| {
        let input = input.as_bytes().to_vec();
        let cmd = cmd.to_string();
        tokio::spawn(async move {
            // si el comando no lee stdin, el pipe roto no es un error de la tarea
            if let Err(e) = stdin.write_all(&input).await {
                debug!("stdin de {} cerrado antes de tiempo: {}", cmd, e);
            }
        })
    });

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| format!("error esperando a {}: {}", cmd, e))?;
    if let Some(writer) = writer {
        let _ = writer.await;
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        warn!("{} terminó con {}: {}", cmd, output.status, stderr.trim());
        return Err(format!("{} terminó con {}: {}", cmd, output.status, stderr.trim()));
    }
    if !stderr.is_empty() {
        debug!("stderr de {}:\n{}", cmd, stderr);
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(command: Option<&str>, payload: &str, deadline_ms: u64) -> Task {
        Task {
            id: "t".to_string(),
            job_id: "j".to_string(),
            attempt: 1,
            payload: payload.to_string(),
            command: command.map(str::to_string),
            deadline_ms,
        }
    }

    fn commands() -> CommandSet {
        let sh = |slug: &str, script: &str| CommandConfig {
            slug: slug.to_string(),
            cmd: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        };
        CommandSet::new(vec![
            CommandConfig {
                slug: "copy".to_string(),
                cmd: "cat".to_string(),
                args: vec![],
            },
            sh("falla", "echo roto >&2; exit 3"),
            sh("lento", "sleep 5"),
            sh("donde", "pwd"),
            sh("path", "echo \"$PATH\""),
        ])
        .unwrap()
    }

    fn run_dir(name: &str) -> RunDir {
        let dir = std::env::temp_dir().join(format!("junction_worker_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        RunDir::prepare(&dir).unwrap()
    }

    #[tokio::test]
    async fn sin_comando_devuelve_el_payload() {
        let outcome = run_task(&task(None, "hola", 1000), &CommandSet::default(), &run_dir("identidad")).await;
        assert_eq!(
            outcome,
            TaskOutcome::Success {
                payload: "hola".to_string()
            }
        );
    }

    #[tokio::test]
    async fn comando_desconocido_falla() {
        let outcome = run_task(&task(Some("nada"), "x", 1000), &commands(), &run_dir("desconocido")).await;
        assert!(matches!(outcome, TaskOutcome::Failure { reason } if reason.contains("nada")));
    }

    #[test]
    fn prepare_crea_el_directorio_y_lo_suma_al_path() {
        let dir = std::env::temp_dir().join("junction_worker_nuevo").join("datos");
        let _ = std::fs::remove_dir_all(&dir);

        let run_dir = RunDir::prepare(&dir).unwrap();
        assert!(dir.is_dir());

        let path = run_dir.path_env.clone().unwrap();
        assert!(std::env::split_paths(&path).any(|p| p == run_dir.dir()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn payload_entra_por_stdin_y_sale_por_stdout() {
        let outcome = run_task(&task(Some("copy"), "línea 1\nlínea 2", 5000), &commands(), &run_dir("copy")).await;
        assert_eq!(
            outcome,
            TaskOutcome::Success {
                payload: "línea 1\nlínea 2".to_string()
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn payload_mayor_que_el_buffer_del_pipe_no_se_traba() {
        let payload = "0123456789abcdef".repeat(64 * 1024);
        assert!(payload.len() >= 1024 * 1024);

        let outcome = run_task(&task(Some("copy"), &payload, 10_000), &commands(), &run_dir("grande")).await;
        match outcome {
            TaskOutcome::Success { payload: out } => assert_eq!(out.len(), payload.len()),
            other => panic!("esperaba Success, llegó {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn comando_corre_en_el_directorio_de_datos() {
        let run_dir = run_dir("cwd");
        let outcome = run_task(&task(Some("donde"), "", 5000), &commands(), &run_dir).await;
        match outcome {
            TaskOutcome::Success { payload } => {
                let cwd = PathBuf::from(payload.trim()).canonicalize().unwrap();
                assert_eq!(cwd, run_dir.dir());
            }
            other => panic!("esperaba Success, llegó {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn path_del_comando_incluye_el_directorio_de_datos() {
        let run_dir = run_dir("path");
        let outcome = run_task(&task(Some("path"), "", 5000), &commands(), &run_dir).await;
        match outcome {
            TaskOutcome::Success { payload } => {
                assert!(std::env::split_paths(payload.trim()).any(|p| p == run_dir.dir()));
            }
            other => panic!("esperaba Success, llegó {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn salida_no_cero_es_fallo_con_stderr() {
        let outcome = run_task(&task(Some("falla"), "", 5000), &commands(), &run_dir("falla")).await;
        match outcome {
            TaskOutcome::Failure { reason } => assert!(reason.contains("roto")),
            other => panic!("esperaba Failure, llegó {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn plazo_vencido_mata_el_comando() {
        let outcome = run_task(&task(Some("lento"), "", 100), &commands(), &run_dir("lento")).await;
        assert!(matches!(outcome, TaskOutcome::Failure { reason } if reason.contains("plazo")));
    }
}
