use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use uuid::Uuid;

use atomem_core::{
  AdaptiveRetrievalConfig, AtomicFact, ConsolidationConfig, ConversationTurn, QueryComplexity,
  cluster_facts, create_windows, dedup_facts, select_facts, similarity, strategy_for,
};

fn arb_name() -> impl Strategy<Value = String> {
  prop::sample::select(vec![
    "Alice", "Bob", "Carol", "Dave", "Acme", "Globex", "Initech", "Oslo", "Tokyo",
  ])
  .prop_map(str::to_owned)
}

fn arb_names() -> impl Strategy<Value = Vec<String>> {
  prop::collection::vec(arb_name(), 0..4)
}

prop_compose! {
  fn arb_fact()(
    statement in "[a-zA-Z ]{1,60}",
    entities in arb_names(),
    persons in arb_names(),
    topic in prop::option::of(prop::sample::select(vec!["work", "travel", "hobby"])),
    has_timestamp in any::<bool>(),
    day_offset in 0_i64..365,
    confidence in 0.0_f64..=1.0,
    level in 0_i32..3,
  ) -> AtomicFact {
    let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    AtomicFact {
      id: Uuid::new_v4(),
      statement,
      keywords: vec![],
      persons,
      entities,
      topic: topic.map(str::to_owned),
      timestamp: has_timestamp.then(|| base + chrono::Duration::days(day_offset)),
      location: None,
      confidence,
      entropy: None,
      extracted_at: base + chrono::Duration::days(day_offset),
      level,
      parent_cluster_id: None,
      source_fact_ids: vec![],
      source_window_id: None,
      source_chunk_id: None,
      source_session_file: None,
    }
  }
}

proptest! {
  #[test]
  fn windows_cover_every_turn_exactly(
    turn_count in 0_usize..60,
    window_size in 1_usize..12,
    stride_offset in 0_usize..12,
  ) {
    // stride <= window_size guarantees gap-free coverage
    let stride = 1 + stride_offset % window_size;
    let turns: Vec<ConversationTurn> = (0..turn_count)
      .map(|i| ConversationTurn::new("user", format!("turn {i}")))
      .collect();

    let windows = create_windows(&turns, window_size, stride, Some("prop-session"));

    if turns.is_empty() {
      prop_assert!(windows.is_empty());
    } else {
      let mut covered: Vec<usize> = windows
        .iter()
        .flat_map(|w| w.start_index..=w.end_index)
        .collect();
      covered.sort_unstable();
      covered.dedup();
      prop_assert_eq!(covered, (0..turn_count).collect::<Vec<_>>());
      for window in &windows {
        prop_assert!(window.turns.len() <= window_size);
        prop_assert_eq!(window.end_index - window.start_index + 1, window.turns.len());
      }
    }
  }

  #[test]
  fn similarity_is_symmetric_and_bounded(a in arb_fact(), b in arb_fact()) {
    let config = ConsolidationConfig::default();
    let ab = similarity(&a, &b, &config);
    let ba = similarity(&b, &a, &config);
    prop_assert!((ab - ba).abs() < 1e-12);
    prop_assert!((0.0..=1.0).contains(&ab));
  }

  #[test]
  fn self_similarity_is_one_with_content(a in arb_fact()) {
    let config = ConsolidationConfig::default();
    let has_content = !a.entities.is_empty()
      || !a.persons.is_empty()
      || a.topic.is_some()
      || a.timestamp.is_some();
    if has_content {
      prop_assert!((similarity(&a, &a, &config) - 1.0).abs() < 1e-9);
    } else {
      prop_assert_eq!(similarity(&a, &a, &config), 0.0);
    }
  }

  #[test]
  fn dedup_is_idempotent(facts in prop::collection::vec(arb_fact(), 0..20)) {
    let once = dedup_facts(facts);
    let twice = dedup_facts(once.clone());
    prop_assert_eq!(once, twice);
  }

  #[test]
  fn clusters_respect_size_bounds(facts in prop::collection::vec(arb_fact(), 0..24)) {
    let config = ConsolidationConfig::default();
    let clusters = cluster_facts(&facts, &config);
    for cluster in &clusters {
      prop_assert!(cluster.facts.len() >= config.min_facts_for_cluster);
      prop_assert!(cluster.facts.len() <= config.max_facts_per_cluster);
      prop_assert!((0.0..=1.0).contains(&cluster.coherence_score));
    }
    // no fact appears in two clusters
    let mut seen = std::collections::HashSet::new();
    for cluster in &clusters {
      for fact in &cluster.facts {
        prop_assert!(seen.insert(fact.id));
      }
    }
  }

  #[test]
  fn selection_never_exceeds_caps(
    facts in prop::collection::vec(arb_fact(), 0..40),
    max_tokens in 1_usize..400,
  ) {
    let config = AdaptiveRetrievalConfig {
      complex_query_tokens: max_tokens,
      ..AdaptiveRetrievalConfig::default()
    };
    let strategy = strategy_for(QueryComplexity::Complex, &config);
    let analysis = atomem_core::analyze_query("why did everything change").unwrap();

    let result = select_facts(
      facts.clone(),
      &facts,
      analysis,
      strategy.clone(),
      &config,
      Utc::now(),
    );
    prop_assert!(result.facts.len() <= strategy.max_facts);
    prop_assert!(result.metadata.total_tokens <= strategy.max_tokens);
  }
}
