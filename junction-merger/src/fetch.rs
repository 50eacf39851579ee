use std::path::Path;

use tracing::info;

use crate::error::MergeError;

/// Lee una fuente del modo `merge`: URL http(s) o ruta de archivo.
pub async fn fetch_content(client: &reqwest::Client, source: &str) -> Result<String, MergeError> {
    if source.starts_with("http://") || source.starts_with("https://") {
        info!("descargando {}", source);
        let fetch_err = |reason: String| MergeError::Fetch {
            origin: source.to_string(),
            reason,
        };

        let response = client
            .get(source)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_err(format!("HTTP {}", response.status())));
        }
        response.text().await.map_err(|e| fetch_err(e.to_string()))
    } else {
        info!("leyendo archivo {}", source);
        if !Path::new(source).exists() {
            return Err(MergeError::Fetch {
                origin: source.to_string(),
                reason: "el archivo no existe".to_string(),
            });
        }
        Ok(tokio::fs::read_to_string(source).await?)
    }
}
