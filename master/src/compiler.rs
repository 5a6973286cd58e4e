use common::{Dag, JobStage};

use crate::error::{MasterError, Result};

/// Resultado de compilar un programa de usuario.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledProgram {
    /// Archivo de entrada; vacío si el programa no lee nada.
    pub file: String,
    pub stages: Vec<JobStage>,
}

pub trait ProgramCompiler: Send + Sync {
    fn compile(&self, source: &str) -> Result<CompiledProgram>;
}

/// Compila programas escritos como un `Dag` en JSON.
///
/// Los nodos se toman en orden: `map`, `flat_map` y `filter` son etapas de
/// map; `reduce_by_key` y `reduce` son etapas de reduce.
pub struct DagCompiler;

impl ProgramCompiler for DagCompiler {
    fn compile(&self, source: &str) -> Result<CompiledProgram> {
        let dag: Dag = serde_json::from_str(source)
            .map_err(|e| MasterError::InvalidProgram(e.to_string()))?;

        let file = dag
            .read_node()
            .and_then(|n| n.path.clone())
            .unwrap_or_default();

        let mut stages = Vec::new();
        for node in dag.nodes.iter().filter(|n| !n.is_read()) {
            let function = node.fn_name.clone().unwrap_or_else(|| node.op.clone());
            let stage = match node.op.as_str() {
                "map" | "flat_map" | "filter" => JobStage::map(function),
                "reduce_by_key" | "reduce" => JobStage::reduce(function),
                other => {
                    return Err(MasterError::InvalidProgram(format!(
                        "operador desconocido '{other}' en nodo {}",
                        node.id
                    )))
                }
            };
            stages.push(stage);
        }

        Ok(CompiledProgram { file, stages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::StageKind;

    #[test]
    fn compila_wordcount() {
        let source = serde_json::to_string(&Dag::wordcount("/data/in.txt")).unwrap();
        let program = DagCompiler.compile(&source).unwrap();

        assert_eq!(program.file, "/data/in.txt");
        let kinds: Vec<_> = program.stages.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![StageKind::Map, StageKind::Map, StageKind::Reduce]);
        assert_eq!(program.stages[0].function, "tokenize");
    }

    #[test]
    fn programa_sin_lectura_no_tiene_archivo() {
        let source = r#"{"nodes": [{"id": "m", "op": "map", "fn": "f"}]}"#;
        let program = DagCompiler.compile(source).unwrap();
        assert!(program.file.is_empty());
    }

    #[test]
    fn operador_desconocido_es_error() {
        let source = r#"{"nodes": [{"id": "s", "op": "shuffle"}]}"#;
        assert!(matches!(
            DagCompiler.compile(source),
            Err(MasterError::InvalidProgram(_))
        ));
    }

    #[test]
    fn json_invalido_es_error() {
        assert!(DagCompiler.compile("no es json").is_err());
    }
}
