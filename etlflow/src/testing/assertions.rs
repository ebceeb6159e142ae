//! Test assertions for pipeline summaries.

use crate::core::{BlockSummary, PipelineSummary};

/// Asserts that the pipeline finished without any recorded failure.
pub fn assert_pipeline_succeeded(summary: &PipelineSummary) {
    assert!(
        summary.has_completed_without_error(),
        "Expected '{}' to succeed, got error {:?} and exceptions {:?}",
        summary.qualified_name(),
        summary.error,
        summary
            .blocks
            .iter()
            .flat_map(|b| b.exceptions.keys())
            .collect::<Vec<_>>()
    );
}

/// Asserts that the pipeline recorded at least one failure.
pub fn assert_pipeline_failed(summary: &PipelineSummary) {
    assert!(
        !summary.has_completed_without_error(),
        "Expected '{}' to fail, but it completed cleanly",
        summary.qualified_name()
    );
}

/// Returns the named pipeline's summary, failing the test if it is missing.
pub fn find_summary<'a>(summaries: &'a [PipelineSummary], name: &str) -> &'a PipelineSummary {
    summaries
        .iter()
        .find(|s| s.name == name)
        .unwrap_or_else(|| {
            panic!(
                "No summary for '{}'. Present: {:?}",
                name,
                summaries.iter().map(|s| s.name.as_str()).collect::<Vec<_>>()
            )
        })
}

/// Returns the named block's summary, failing the test if it is missing.
pub fn find_block<'a>(summary: &'a PipelineSummary, block: &str) -> &'a BlockSummary {
    summary.block(block).unwrap_or_else(|| {
        panic!(
            "Pipeline '{}' has no block '{}'. Present: {:?}",
            summary.name,
            block,
            summary.blocks.iter().map(|b| b.name.as_str()).collect::<Vec<_>>()
        )
    })
}

/// Asserts that the named pipeline ran in the expected 1-based wave.
pub fn assert_wave(summaries: &[PipelineSummary], name: &str, expected: usize) {
    let summary = find_summary(summaries, name);
    assert_eq!(
        summary.group, expected,
        "Expected '{}' in wave {}, got {}",
        name, expected, summary.group
    );
}
