use minijinja::Environment;
use serde::Serialize;

use crate::models::RetrievedDocument;

const INDEX_TEMPLATE: &str = "index.html";

/// Everything `index.html` can show.
#[derive(Debug, Clone, Serialize)]
pub struct IndexPage {
    pub collection_names: Vec<String>,
    pub collection_name: Option<String>,
    pub query: Option<String>,
    pub query_answer: Option<String>,
    pub documents: Vec<RetrievedDocument>,
    pub top_k: u64,
    pub rerank_top_k: usize,
}

impl IndexPage {
    pub fn empty(collection_names: Vec<String>) -> Self {
        Self {
            collection_names,
            collection_name: None,
            query: None,
            query_answer: None,
            documents: Vec::new(),
            top_k: 10,
            rerank_top_k: 5,
        }
    }
}

pub fn environment() -> Result<Environment<'static>, minijinja::Error> {
    let mut env = Environment::new();
    env.add_template(INDEX_TEMPLATE, include_str!("../templates/index.html"))?;
    Ok(env)
}

pub fn render_index(env: &Environment<'_>, page: &IndexPage) -> Result<String, minijinja::Error> {
    env.get_template(INDEX_TEMPLATE)?.render(page)
}
