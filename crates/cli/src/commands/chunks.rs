//! Chunks command handler.
//!
//! Dry run: scan, filter, chunk and score a bundle, then print the plan.

use super::{analysis_config, compile_rules, load_source, progress_reporter, to_json, TuningArgs};
use bundlescope_core::{config::AppConfig, AppResult};
use bundlescope_segment::scorer::{ScoreBreakdown, Scorer};
use bundlescope_segment::{plan, Chunk, SegmentPlan};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

/// Show the chunk plan for a bundle without analyzing it
#[derive(Args, Debug)]
pub struct ChunksCommand {
    /// JavaScript file to plan
    pub file: PathBuf,

    #[command(flatten)]
    pub tuning: TuningArgs,

    /// Include per-chunk score components
    #[arg(long)]
    pub breakdown: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Print progress events to stderr
    #[arg(long)]
    pub progress: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlannedChunk<'a> {
    #[serde(flatten)]
    chunk: &'a Chunk,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<ScoreBreakdown>,
}

impl ChunksCommand {
    pub fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing chunks command");

        let analysis = analysis_config(config, &self.tuning)?;
        let (_, compiled) = compile_rules(&analysis)?;
        let buffer = load_source(config, &self.file)?;
        let plan = plan(&buffer, &compiled, &analysis, &progress_reporter(self.progress))?;

        let scorer = Scorer::new(
            &buffer,
            &compiled.security,
            &plan.libraries,
            analysis.scoring.effective_weights(),
        );
        let planned: Vec<PlannedChunk> = plan
            .chunks
            .iter()
            .map(|chunk| PlannedChunk {
                chunk,
                score: self.breakdown.then(|| scorer.breakdown(chunk)),
            })
            .collect();

        if self.json {
            let output = serde_json::json!({
                "totalBytes": buffer.len(),
                "revision": buffer.revision(),
                "safeSplits": plan.safe_splits,
                "estimatedTokens": plan.estimated_tokens(),
                "libraries": plan.libraries,
                "notes": plan.notes,
                "chunks": planned,
            });
            println!("{}", to_json(&output)?);
        } else {
            println!("{}", render_plan(&plan, &planned));
        }
        Ok(())
    }
}

fn render_plan(plan: &SegmentPlan, planned: &[PlannedChunk]) -> String {
    let mut lines = vec![format!(
        "{} chunks, ~{} tokens, {} oversized, {} library regions",
        plan.chunks.len(),
        plan.estimated_tokens(),
        plan.oversized(),
        plan.libraries.len()
    )];
    for note in &plan.notes {
        lines.push(format!("note: {}", note));
    }
    for entry in planned {
        let chunk = entry.chunk;
        let mut line = format!(
            "{:>5} {} [{}..{}) {:<13} {:>6} tok  importance {:.3}",
            chunk.index,
            chunk.id,
            chunk.byte_range.start,
            chunk.byte_range.end,
            chunk.kind.as_str(),
            chunk.estimated_tokens,
            chunk.importance
        );
        if chunk.oversized {
            line.push_str("  oversized");
        }
        if let Some(library) = &chunk.library {
            line.push_str(&format!("  library={}", library));
        }
        if !chunk.dependencies.is_empty() {
            line.push_str(&format!("  deps={}", chunk.dependencies.len()));
        }
        if let Some(score) = &entry.score {
            line.push_str(&format!(
                "  density={:.3} conn={:.3} cover={:.3}",
                score.density, score.connectivity, score.library_cover
            ));
        }
        lines.push(line);
    }
    lines.join("\n")
}
