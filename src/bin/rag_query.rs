use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use commontale::answer::AnswerGenerator;
use commontale::config::Settings;
use commontale::rag::Retriever;

#[derive(Parser, Debug)]
#[command(name = "rag-query")]
#[command(about = "Search a collection and print the reranked documents as JSON")]
#[command(after_help = "Example: rag-query '什么是耕田队' '中央苏区革命史调查资料汇编'")]
struct Args {
    /// Question to search for
    query: String,

    /// Qdrant collection name
    collection: String,

    /// Required `metadata` payload value (repeatable)
    #[arg(short, long)]
    metadata: Vec<String>,

    /// Number of nearest neighbours to fetch
    #[arg(long, default_value_t = 10)]
    top_k: u64,

    /// Number of documents to keep after reranking
    #[arg(long, default_value_t = 5)]
    rerank_top_k: usize,

    /// Rewrite the query with the chat model before searching
    #[arg(long)]
    enhance: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let retriever = Retriever::from_settings(&settings)?;

    let search_query = if args.enhance {
        AnswerGenerator::from_settings(&settings)?
            .enhance_query(&args.query)
            .await?
    } else {
        args.query.clone()
    };

    let results = retriever
        .search(
            &search_query,
            &args.collection,
            &args.metadata,
            args.top_k,
            args.rerank_top_k,
        )
        .await?;

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
