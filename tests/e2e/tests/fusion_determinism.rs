//! Fusion determinism over fixed inputs, per the RRF reference scenario.

use engram_core::{fuse, FusionConfig, FusionStrategy, QueryProfile};

fn rrf_config() -> FusionConfig {
    FusionConfig {
        strategy: FusionStrategy::Rrf,
        rrf_k: 60.0,
        ..Default::default()
    }
}

#[test]
fn rrf_reference_scenario() {
    let dense = vec![(1, 0.9), (2, 0.8), (3, 0.7)];
    let sparse = vec![(2, 5.0), (3, 4.0), (4, 1.0)];
    let profile = QueryProfile::analyze("reference query");

    let hits = fuse(&rrf_config(), &profile, &dense, &sparse, 10);
    let ids: Vec<i64> = hits.iter().map(|h| h.doc_id).collect();
    assert_eq!(ids, vec![2, 3, 1, 4]);

    let expected = [
        1.0 / 62.0 + 1.0 / 61.0, // id 2: dense rank 2, sparse rank 1
        1.0 / 63.0 + 1.0 / 62.0, // id 3: dense rank 3, sparse rank 2
        1.0 / 61.0,              // id 1: dense rank 1 only
        1.0 / 63.0,              // id 4: sparse rank 3 only
    ];
    for (hit, want) in hits.iter().zip(expected) {
        assert!(
            (hit.score - want).abs() < 1e-9,
            "doc {}: {} vs {}",
            hit.doc_id,
            hit.score,
            want
        );
    }
}

#[test]
fn repeated_fusion_is_identical() {
    let dense = vec![(10, 0.61), (7, 0.61), (3, 0.61)];
    let sparse = vec![(7, 2.0), (10, 2.0), (5, 2.0)];
    let profile = QueryProfile::analyze("same scores everywhere");

    let first = fuse(&rrf_config(), &profile, &dense, &sparse, 10);
    for _ in 0..10 {
        let again = fuse(&rrf_config(), &profile, &dense, &sparse, 10);
        assert_eq!(first, again);
    }
}

#[test]
fn empty_inputs_across_strategies() {
    let profile = QueryProfile::analyze("q");
    for strategy in [
        FusionStrategy::Rrf,
        FusionStrategy::HybridRrf,
        FusionStrategy::Weighted,
        FusionStrategy::Convex,
        FusionStrategy::Interleave,
        FusionStrategy::RankFusion,
        FusionStrategy::ScoreFusion,
        FusionStrategy::Cascade,
        FusionStrategy::Adaptive,
    ] {
        let config = FusionConfig {
            strategy,
            ..Default::default()
        };
        // Both empty: empty out
        assert!(fuse(&config, &profile, &[], &[], 5).is_empty());

        // One empty: the other, truncated, in order
        let dense = vec![(1, 0.9), (2, 0.8), (3, 0.7)];
        let hits = fuse(&config, &profile, &dense, &[], 2);
        let ids: Vec<i64> = hits.iter().map(|h| h.doc_id).collect();
        assert_eq!(ids, vec![1, 2], "{strategy:?}");
    }
}
