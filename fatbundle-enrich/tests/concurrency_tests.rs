//! Concurrent enrichment and word-entity cache sharing

mod helpers;

use fatbundle_common::bundle::{DisplayToken, SenseToken, TokenAlignment};
use fatbundle_common::{Language, WordEntity};
use fatbundle_enrich::{EnricherConfig, Helper, WorkMapGenerator};
use helpers::{
    build_enricher, ctx, memory_store, raw_entry, strict_config, timed_bundle, with_thai_tokens,
    MockHelpers,
};
use std::time::Duration;

#[tokio::test]
async fn test_batch_computes_shared_word_once() {
    let helpers = MockHelpers::new().with_delay(Duration::from_millis(20));
    let config = EnricherConfig {
        max_concurrent_records: 4,
        ..strict_config()
    };
    let enricher = build_enricher(&helpers, memory_store(), config);
    let generator = WorkMapGenerator::default();

    let batch: Vec<_> = (0..4)
        .map(|n| {
            let bundle = with_thai_tokens(
                timed_bundle(&format!("w{}", n), Some("รถ"), Some("car")),
                &["รถ"],
            );
            let workmap = generator.generate(&bundle).unwrap();
            (bundle, workmap)
        })
        .collect();

    let results = enricher.process_batch(batch, &ctx()).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(helpers.calls(Helper::Transliteration), 1);
    assert_eq!(helpers.calls(Helper::LegibleRendering), 1);
    assert_eq!(helpers.calls(Helper::DictionaryLookup), 1);

    for result in results {
        let bundle = result.unwrap().bundle;
        assert_eq!(bundle.tokens.th.display[0].romanization.as_deref(), Some("rom:รถ"));
        assert_eq!(bundle.tokens.th.senses[0].entries[0].id, "รถ#0");
    }
    assert_eq!(enricher.cache().in_flight().await, 0);
}

#[tokio::test]
async fn test_later_bundle_reuses_cached_word() {
    let helpers = MockHelpers::new();
    let store = memory_store();
    let enricher = build_enricher(&helpers, store.clone(), strict_config());
    let generator = WorkMapGenerator::default();

    let first = with_thai_tokens(timed_bundle("u1", Some("รถ"), Some("car")), &["รถ"]);
    let done = enricher
        .process(&first, &generator.generate(&first).unwrap(), &ctx())
        .await
        .unwrap();
    let normalized = enricher
        .process(&done.bundle, &generator.generate(&done.bundle).unwrap(), &ctx())
        .await
        .unwrap();
    assert!(normalized.bundle.tokens.th.senses[0].fully_normalized());

    let entity = enricher.cache().entity(Language::Th, "รถ").await.unwrap();
    assert_eq!(entity.romanization.as_deref(), Some("rom:รถ"));
    assert!(entity.senses.as_ref().is_some_and(|s| s.iter().all(|e| e.normalized)));

    helpers.reset_calls();
    let second = with_thai_tokens(timed_bundle("u2", Some("รถ"), Some("car")), &["รถ"]);
    let reused = enricher
        .process(&second, &generator.generate(&second).unwrap(), &ctx())
        .await
        .unwrap();

    assert_eq!(helpers.calls(Helper::Transliteration), 0);
    assert_eq!(helpers.calls(Helper::LegibleRendering), 0);
    assert_eq!(helpers.calls(Helper::DictionaryLookup), 0);
    // Cached senses arrive already normalized
    assert!(reused.bundle.tokens.th.senses[0].fully_normalized());

    let stored: Option<WordEntity> = fatbundle_common::store::get_typed(
        store.as_ref(),
        Language::Th.word_collection(),
        "รถ",
    )
    .await
    .unwrap();
    assert_eq!(stored, Some(entity));
}

#[tokio::test]
async fn test_lookup_is_cached_raw_until_normalized() {
    let helpers = MockHelpers::new();
    let enricher = build_enricher(&helpers, memory_store(), strict_config());
    let generator = WorkMapGenerator::default();

    let bundle = with_thai_tokens(timed_bundle("l1", Some("รถ"), Some("car")), &["รถ"]);
    let seeded = enricher
        .process(&bundle, &generator.generate(&bundle).unwrap(), &ctx())
        .await
        .unwrap();

    let entity = enricher.cache().entity(Language::Th, "รถ").await.unwrap();
    let lookup = entity.lookup.expect("raw lookup cached");
    assert_eq!(lookup.len(), 1);
    assert!(!lookup[0].normalized);
    assert!(entity.senses.is_none());

    enricher
        .process(
            &seeded.bundle,
            &generator.generate(&seeded.bundle).unwrap(),
            &ctx(),
        )
        .await
        .unwrap();

    let entity = enricher.cache().entity(Language::Th, "รถ").await.unwrap();
    let senses = entity.senses.expect("normalized senses cached");
    assert!(senses.iter().all(|e| e.normalized));
    assert_eq!(senses[0].id, lookup[0].id);
}

#[tokio::test]
async fn test_edited_raw_entry_is_not_replaced_from_cache() {
    let helpers = MockHelpers::new();
    let enricher = build_enricher(&helpers, memory_store(), strict_config());
    let generator = WorkMapGenerator::default();

    // First bundle takes the word through lookup and normalization
    let mut first = with_thai_tokens(timed_bundle("e1", Some("รถ"), Some("car")), &["รถ"]);
    for _ in 0..2 {
        let workmap = generator.generate(&first).unwrap();
        first = enricher.process(&first, &workmap, &ctx()).await.unwrap().bundle;
    }
    assert!(first.tokens.th.senses[0].fully_normalized());

    // Second bundle carries the same id with an edited definition
    let mut second = with_thai_tokens(timed_bundle("e2", Some("รถ"), Some("car")), &["รถ"]);
    second.tokens.th.senses[0].entries = vec![raw_entry("รถ", 0, "automobile")];
    helpers.reset_calls();

    let report = enricher
        .process(&second, &generator.generate(&second).unwrap(), &ctx())
        .await
        .unwrap();

    assert_eq!(helpers.calls(Helper::Normalization), 1);
    let entry = &report.bundle.tokens.th.senses[0].entries[0];
    assert_eq!(entry.id, "รถ#0");
    assert_eq!(entry.definition.as_deref(), Some("automobile"));
    assert_eq!(entry.gloss.as_deref(), Some("gloss:automobile"));
    assert!(entry.normalized);

    // The shared entity still describes the dictionary's own sense
    let entity = enricher.cache().entity(Language::Th, "รถ").await.unwrap();
    let cached = entity.senses.unwrap();
    assert_eq!(cached[0].definition.as_deref(), Some("meaning of รถ"));
}

#[tokio::test]
async fn test_token_fan_out_is_bounded_and_ordered() {
    let helpers = MockHelpers::new().with_delay(Duration::from_millis(15));
    let config = EnricherConfig {
        max_concurrent_tokens: 2,
        ..strict_config()
    };
    let enricher = build_enricher(&helpers, memory_store(), config);

    let tokens = ["ก", "ข", "ค", "ง", "จ", "ฉ"];
    let line = tokens.join(" ");
    let mut bundle = with_thai_tokens(timed_bundle("f1", Some(&line), Some("abc")), &tokens);
    // English layer already segmented so only Thai tokens run
    bundle.tokens.en.display = vec![DisplayToken::new("abc")];
    bundle.tokens.en.senses = vec![SenseToken::default()];
    bundle.tokens.en.word_refs = vec!["abc".to_string()];
    bundle.alignment = vec![TokenAlignment {
        th_index: 0,
        en_index: 0,
    }];

    let workmap = WorkMapGenerator::default().generate(&bundle).unwrap();
    let report = enricher.process(&bundle, &workmap, &ctx()).await.unwrap();

    assert!(helpers.max_in_flight() <= 2);
    assert_eq!(helpers.calls(Helper::Transliteration), tokens.len());
    for (index, token) in tokens.iter().enumerate() {
        assert_eq!(
            report.bundle.tokens.th.display[index].romanization,
            Some(format!("rom:{}", token))
        );
        assert_eq!(
            report.bundle.tokens.th.senses[index].entries[0].id,
            format!("{}#0", token)
        );
    }
}
