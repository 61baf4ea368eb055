use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<Model>,
}

impl ModelList {
    pub fn new(ids: impl IntoIterator<Item = String>, owned_by: &str, created: i64) -> Self {
        Self {
            object: "list".to_string(),
            data: ids
                .into_iter()
                .map(|id| Model {
                    id,
                    object: "model".to_string(),
                    created,
                    owned_by: owned_by.to_string(),
                })
                .collect(),
        }
    }
}
