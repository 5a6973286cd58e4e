use serde::{Deserialize, Serialize};

/// Programa de usuario descrito como un DAG de operadores. Viaja como JSON
/// dentro de `UserProgram::content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dag {
    pub nodes: Vec<DagNode>,
    #[serde(default)]
    pub edges: Vec<(String, String)>, // (from, to)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagNode {
    pub id: String,
    pub op: String, // "read_text", "map", "flat_map", "reduce_by_key", etc.

    /// Archivo del namespace. Sólo tiene sentido en nodos de lectura (read_xxx).
    #[serde(default)]
    pub path: Option<String>,

    /// Nombre de la función asociada, se serializa como "fn" en el JSON.
    /// Ej: "tokenize", "to_lower", "sum".
    #[serde(rename = "fn", default)]
    pub fn_name: Option<String>,

    /// Campo clave para reduce_by_key, ej: "token".
    #[serde(default)]
    pub key: Option<String>,
}

impl DagNode {
    fn new(id: &str, op: &str) -> Self {
        Self {
            id: id.to_string(),
            op: op.to_string(),
            path: None,
            fn_name: None,
            key: None,
        }
    }

    pub fn is_read(&self) -> bool {
        self.op.starts_with("read")
    }
}

impl Dag {
    /// WordCount sobre un archivo del namespace:
    /// read -> flat(tokenize) -> map(to_lower) -> agg(sum por token)
    pub fn wordcount(input: &str) -> Dag {
        let mut read = DagNode::new("read", "read_text");
        read.path = Some(input.to_string());

        let mut flat = DagNode::new("flat", "flat_map");
        flat.fn_name = Some("tokenize".to_string());

        let mut lower = DagNode::new("map1", "map");
        lower.fn_name = Some("to_lower".to_string());

        let mut agg = DagNode::new("agg", "reduce_by_key");
        agg.fn_name = Some("sum".to_string());
        agg.key = Some("token".to_string());

        Dag {
            nodes: vec![read, flat, lower, agg],
            edges: vec![
                ("read".to_string(), "flat".to_string()),
                ("flat".to_string(), "map1".to_string()),
                ("map1".to_string(), "agg".to_string()),
            ],
        }
    }

    pub fn read_node(&self) -> Option<&DagNode> {
        self.nodes.iter().find(|n| n.is_read())
    }
}
