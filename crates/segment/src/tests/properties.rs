//! Property tests for chunk coverage and token bounds.

use super::{compiled_rules, config};
use crate::progress::ProgressReporter;
use crate::{plan, SourceBuffer};
use proptest::prelude::*;

fn fragment() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("var a=1;"),
        Just("function f(b){return b+1}"),
        Just("class K{m(){return this.v}}"),
        Just("if(x){y()}else{z()}"),
        Just("s='str;ing}';"),
        Just("t=`a${b}c`;"),
        Just("/*c;}*/"),
        Just("r=/[;}]+/g.test(q);"),
        Just("!function(){var q=1;var w=2;}();"),
        Just("m={b:1,c:[1,2],d:function(){return eval(x)}};"),
        Just("var u='\u{e9}\u{4e2d}';"),
        Just("\n"),
    ]
}

fn source() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::collection::vec(fragment(), 0..60).prop_map(|parts| parts.concat()),
        "[ -~\n]{0,300}",
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn primary_ranges_tile_the_buffer(
        text in source(),
        max_tokens in 1usize..24,
        overlap_seed in 0usize..24,
    ) {
        let overlap_tokens = overlap_seed % max_tokens;
        let buffer = SourceBuffer::new(text);
        let plan = plan(
            &buffer,
            &compiled_rules(),
            &config(max_tokens, overlap_tokens),
            &ProgressReporter::noop(),
        )
        .unwrap();

        let mut cursor = 0;
        for (i, chunk) in plan.chunks.iter().enumerate() {
            prop_assert_eq!(chunk.index, i);
            prop_assert_eq!(chunk.byte_range.start, cursor);
            prop_assert!(!chunk.byte_range.is_empty());
            cursor = chunk.byte_range.end;
        }
        prop_assert_eq!(cursor, buffer.len());
    }

    #[test]
    fn chunks_respect_token_limit_and_overlap_bounds(
        text in source(),
        max_tokens in 1usize..24,
        overlap_seed in 0usize..24,
    ) {
        let overlap_tokens = overlap_seed % max_tokens;
        let buffer = SourceBuffer::new(text);
        let plan = plan(
            &buffer,
            &compiled_rules(),
            &config(max_tokens, overlap_tokens),
            &ProgressReporter::noop(),
        )
        .unwrap();

        let mut previous_start = 0;
        for chunk in &plan.chunks {
            prop_assert_eq!(chunk.estimated_tokens, chunk.primary_tokens + chunk.context_tokens);
            if !chunk.oversized {
                prop_assert!(chunk.estimated_tokens <= max_tokens);
            }
            prop_assert!(chunk.context_tokens <= overlap_tokens);
            prop_assert!(chunk.context_start <= chunk.byte_range.start);
            prop_assert!(chunk.context_start >= previous_start);
            prop_assert!((0.0..=1.0).contains(&chunk.importance));
            previous_start = chunk.byte_range.start;
        }
    }

    #[test]
    fn planning_is_deterministic(text in source(), max_tokens in 2usize..24) {
        let buffer = SourceBuffer::new(text);
        let rules = compiled_rules();
        let config = config(max_tokens, 1);
        let first = plan(&buffer, &rules, &config, &ProgressReporter::noop()).unwrap();
        let second = plan(&buffer, &rules, &config, &ProgressReporter::noop()).unwrap();
        prop_assert_eq!(first.chunks, second.chunks);
    }
}
