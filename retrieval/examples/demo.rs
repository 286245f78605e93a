//! Ingest the IRA guide fixture and run a few personalized questions.
//!
//! Usage: RUST_LOG=debug cargo run -p finrag-retrieval --example demo

use std::path::PathBuf;

use finrag_retrieval::{
    FilingStatus, Metadata, RetrievalEngine, RetrievalRequest, UserProfile,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let guide_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("passages")
        .join("tests")
        .join("fixtures")
        .join("ira_guide.md");
    let guide = std::fs::read_to_string(&guide_path)?;

    let engine = RetrievalEngine::builder().build()?;

    let mut metadata = Metadata::new();
    metadata.insert("document_id".to_string(), "ira-guide".into());
    metadata.insert("source".to_string(), "irs-pub-590".into());
    metadata.insert("category".to_string(), "retirement".into());
    metadata.insert("year".to_string(), 2024.into());

    let report = engine.add_document(&guide, metadata).await?;
    println!(
        "Ingested {} passages from {}\n",
        report.passages, report.document_id
    );

    let profile = UserProfile::new()
        .with_age(55)
        .with_filing_status(FilingStatus::MarriedFilingJointly)
        .with_goal("retire early");

    for question in [
        "What's my IRA limit?",
        "When do RMDs start?",
        "Can I give to charity from my IRA?",
    ] {
        let result = engine
            .retrieve(
                RetrievalRequest::new(question)
                    .with_profile(profile.clone())
                    .with_k(3),
            )
            .await?;

        println!("Q: {question}");
        println!("   expanded ({:?}): {}", result.query.source, result.query.expanded);
        println!(
            "   keyword scan: {} passages in {} pages, {}ms total",
            result.keyword.scanned, result.keyword.pages, result.elapsed_ms
        );
        for candidate in &result.passages {
            println!(
                "   {:.3} {:?} {} / {}",
                candidate.score,
                candidate.channel,
                candidate.passage.section.as_deref().unwrap_or("-"),
                candidate.passage.subsection.as_deref().unwrap_or("-")
            );
        }
        println!();
    }

    Ok(())
}
