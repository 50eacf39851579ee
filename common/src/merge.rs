use serde::{Deserialize, Serialize};

fn default_separator() -> String {
    "\n".to_string()
}

/// Regla de merge declarada por el job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeRule {
    /// Concatenación ordenada de payloads
    Concat {
        #[serde(default = "default_separator")]
        separator: String,
    },
    /// Objetos JSON fusionados en orden; la última clave gana
    Json,
    /// Documentos INI fusionados por sección
    Ini,
    /// Suma numérica (combinador asociativo)
    Sum,
}

impl Default for MergeRule {
    fn default() -> Self {
        MergeRule::Concat {
            separator: default_separator(),
        }
    }
}

impl MergeRule {
    /// Si el resultado depende del orden de las partes.
    pub fn is_order_sensitive(&self) -> bool {
        !matches!(self, MergeRule::Sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_sin_separador_usa_salto_de_linea() {
        let rule: MergeRule = serde_json::from_str(r#"{"kind":"concat"}"#).unwrap();
        assert_eq!(rule, MergeRule::default());
    }

    #[test]
    fn reglas_simples_se_parsean_por_kind() {
        let rule: MergeRule = serde_json::from_str(r#"{"kind":"ini"}"#).unwrap();
        assert_eq!(rule, MergeRule::Ini);
        assert!(!MergeRule::Sum.is_order_sensitive());
        assert!(MergeRule::Json.is_order_sensitive());
    }
}
