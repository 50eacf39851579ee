use indexmap::IndexMap;
use serde_json::{Map, Value};

use common::MergeRule;

use crate::error::MergeError;

/// Clave JSON donde se listan las tareas opcionales que no aportaron.
pub const JSON_MISSING_KEY: &str = "_missing";

/// Una posición del merge: aporte real o marcador de tarea ausente.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Part<'a> {
    Present { task_id: &'a str, payload: &'a str },
    Missing { task_id: &'a str },
}

/// Aplica la regla a las partes, que ya vienen en el orden final.
pub fn merge_parts(rule: &MergeRule, parts: &[Part<'_>]) -> Result<String, MergeError> {
    match rule {
        MergeRule::Concat { separator } => Ok(merge_concat(parts, separator)),
        MergeRule::Json => merge_json(parts),
        MergeRule::Ini => Ok(merge_ini(parts)),
        MergeRule::Sum => merge_sum(parts),
    }
}

fn missing_ids<'a>(parts: &[Part<'a>]) -> Vec<&'a str> {
    parts
        .iter()
        .filter_map(|p| match p {
            Part::Missing { task_id } => Some(*task_id),
            Part::Present { .. } => None,
        })
        .collect()
}

fn merge_concat(parts: &[Part<'_>], separator: &str) -> String {
    parts
        .iter()
        .map(|p| match p {
            Part::Present { payload, .. } => (*payload).to_string(),
            Part::Missing { task_id } => format!("<missing:{}>", task_id),
        })
        .collect::<Vec<_>>()
        .join(separator)
}

fn merge_json(parts: &[Part<'_>]) -> Result<String, MergeError> {
    let mut merged = Map::new();
    // último aporte que trajo su propia clave `_missing`
    let mut reserved_by: Option<&str> = None;

    for part in parts {
        let Part::Present { task_id, payload } = part else {
            continue;
        };

        let value: Value = serde_json::from_str(payload).map_err(|e| MergeError::InvalidJson {
            task_id: task_id.to_string(),
            reason: e.to_string(),
        })?;

        match value {
            Value::Object(obj) => {
                if obj.contains_key(JSON_MISSING_KEY) {
                    reserved_by = Some(task_id);
                }
                for (key, val) in obj {
                    merged.insert(key, val);
                }
            }
            _ => {
                return Err(MergeError::NotAnObject {
                    task_id: task_id.to_string(),
                })
            }
        }
    }

    let missing = missing_ids(parts);
    if !missing.is_empty() {
        // el marcador pisaría datos del aporte
        if let Some(task_id) = reserved_by {
            return Err(MergeError::ReservedKey {
                task_id: task_id.to_string(),
                key: JSON_MISSING_KEY.to_string(),
            });
        }
        merged.insert(
            JSON_MISSING_KEY.to_string(),
            Value::Array(missing.into_iter().map(|id| Value::String(id.to_string())).collect()),
        );
    }

    serde_json::to_string_pretty(&Value::Object(merged)).map_err(|e| MergeError::InvalidJson {
        task_id: String::new(),
        reason: e.to_string(),
    })
}

type IniSection = IndexMap<String, Option<String>>;

/// Parseo manual para conservar mayúsculas y el orden de aparición.
fn parse_ini_into(content: &str, merged: &mut IndexMap<String, IniSection>) {
    let mut current_section = String::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            current_section = line[1..line.len() - 1].trim().to_string();
            merged.entry(current_section.clone()).or_default();
        } else if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim().to_string();
            let value = line[eq_pos + 1..].trim().to_string();
            merged
                .entry(current_section.clone())
                .or_default()
                .insert(key, if value.is_empty() { None } else { Some(value) });
        } else {
            // clave sin valor
            merged
                .entry(current_section.clone())
                .or_default()
                .insert(line.to_string(), None);
        }
    }
}

fn merge_ini(parts: &[Part<'_>]) -> String {
    let mut merged: IndexMap<String, IniSection> = IndexMap::new();

    for part in parts {
        if let Part::Present { payload, .. } = part {
            parse_ini_into(payload, &mut merged);
        }
    }

    let mut output = String::new();

    for id in missing_ids(parts) {
        output.push_str(&format!("; missing: {}\n", id));
    }

    for (section_name, section) in merged {
        if !section_name.is_empty() {
            output.push_str(&format!("[{}]\n", section_name));
        }

        for (key, value) in section {
            match value {
                Some(val) => output.push_str(&format!("{}={}\n", key, val)),
                None => output.push_str(&format!("{}\n", key)),
            }
        }
        output.push('\n');
    }

    output
}

#[derive(Debug, Clone, Copy)]
enum Total {
    Int(i64),
    Float(f64),
}

impl Total {
    fn as_f64(self) -> f64 {
        match self {
            Total::Int(i) => i as f64,
            Total::Float(f) => f,
        }
    }
}

fn merge_sum(parts: &[Part<'_>]) -> Result<String, MergeError> {
    let mut total = Total::Int(0);

    for part in parts {
        let Part::Present { task_id, payload } = part else {
            continue;
        };
        let raw = payload.trim();

        total = if let Ok(n) = raw.parse::<i64>() {
            match total {
                Total::Int(acc) => match acc.checked_add(n) {
                    Some(sum) => Total::Int(sum),
                    None => Total::Float(acc as f64 + n as f64),
                },
                Total::Float(acc) => Total::Float(acc + n as f64),
            }
        } else if let Ok(f) = raw.parse::<f64>() {
            Total::Float(total.as_f64() + f)
        } else {
            return Err(MergeError::NotANumber {
                task_id: task_id.to_string(),
                value: raw.to_string(),
            });
        };
    }

    Ok(match total {
        Total::Int(i) => i.to_string(),
        Total::Float(f) => f.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn present<'a>(task_id: &'a str, payload: &'a str) -> Part<'a> {
        Part::Present { task_id, payload }
    }

    #[test]
    fn concat_respeta_orden_y_separador() {
        let parts = [present("a", "uno"), present("b", "dos")];
        let rule = MergeRule::Concat {
            separator: ", ".to_string(),
        };
        assert_eq!(merge_parts(&rule, &parts).unwrap(), "uno, dos");
    }

    #[test]
    fn concat_marca_tareas_ausentes_en_su_posicion() {
        let parts = [present("a", "uno"), Part::Missing { task_id: "b" }, present("c", "tres")];
        let out = merge_parts(&MergeRule::default(), &parts).unwrap();
        assert_eq!(out, "uno\n<missing:b>\ntres");
    }

    #[test]
    fn json_fusiona_objetos_y_la_ultima_clave_gana() {
        let parts = [
            present("a", r#"{"x": 1, "y": 1}"#),
            present("b", r#"{"y": 2, "z": 3}"#),
        ];
        let out = merge_parts(&MergeRule::Json, &parts).unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v, serde_json::json!({"x": 1, "y": 2, "z": 3}));
    }

    #[test]
    fn json_agrega_lista_de_ausentes() {
        let parts = [present("a", r#"{"x": 1}"#), Part::Missing { task_id: "b" }];
        let out = merge_parts(&MergeRule::Json, &parts).unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v[JSON_MISSING_KEY], serde_json::json!(["b"]));
    }

    #[test]
    fn json_con_clave_reservada_falla_solo_si_hay_ausentes() {
        let propio = r#"{"_missing": "dato del usuario"}"#;

        let out = merge_parts(&MergeRule::Json, &[present("a", propio)]).unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v[JSON_MISSING_KEY], "dato del usuario");

        let parts = [present("a", propio), Part::Missing { task_id: "b" }];
        let err = merge_parts(&MergeRule::Json, &parts).unwrap_err();
        assert!(matches!(err, MergeError::ReservedKey { ref task_id, .. } if task_id == "a"));
    }

    #[test]
    fn json_rechaza_aportes_que_no_son_objetos() {
        let parts = [present("a", r#"{"x": 1}"#), present("b", "[1, 2]")];
        let err = merge_parts(&MergeRule::Json, &parts).unwrap_err();
        assert!(matches!(err, MergeError::NotAnObject { ref task_id } if task_id == "b"));

        let parts = [present("c", "no es json")];
        let err = merge_parts(&MergeRule::Json, &parts).unwrap_err();
        assert!(matches!(err, MergeError::InvalidJson { .. }));
    }

    #[test]
    fn ini_fusiona_secciones_y_conserva_mayusculas() {
        let parts = [
            present("a", "[Core]\nName=uno\nFlag\n; comentario\n"),
            present("b", "[Core]\nName=dos\n[Extra]\nKey=\n"),
        ];
        let out = merge_parts(&MergeRule::Ini, &parts).unwrap();
        assert_eq!(out, "[Core]\nName=dos\nFlag\n\n[Extra]\nKey\n\n");
    }

    #[test]
    fn ini_sin_seccion_y_con_ausentes() {
        let parts = [present("a", "global=1\n"), Part::Missing { task_id: "b" }];
        let out = merge_parts(&MergeRule::Ini, &parts).unwrap();
        assert_eq!(out, "; missing: b\nglobal=1\n\n");
    }

    #[test]
    fn sum_enteros_y_flotantes() {
        let ints = [present("a", "1"), present("b", " 41 ")];
        assert_eq!(merge_parts(&MergeRule::Sum, &ints).unwrap(), "42");

        let mixed = [present("a", "1"), present("b", "0.5")];
        assert_eq!(merge_parts(&MergeRule::Sum, &mixed).unwrap(), "1.5");

        let with_missing = [present("a", "2"), Part::Missing { task_id: "b" }];
        assert_eq!(merge_parts(&MergeRule::Sum, &with_missing).unwrap(), "2");
    }

    #[test]
    fn sum_rechaza_valores_no_numericos() {
        let parts = [present("a", "uno")];
        let err = merge_parts(&MergeRule::Sum, &parts).unwrap_err();
        assert!(matches!(err, MergeError::NotANumber { .. }));
    }
}
