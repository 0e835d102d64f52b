mod common;

use common::{collect_keys, region, TestEnv, TABLE};
use region_client::{Direction, ScanError, ScanState};
use region_core::key_encoding;

#[tokio::test]
async fn test_reverse_scan_resolves_previous_region() -> anyhow::Result<()> {
    let env = TestEnv::two_regions(2);
    env.cluster
        .put_keys(TABLE, &["a", "bro", "bro1", "c", "ka", "key", "kz", "zz"]);

    let scanner = env
        .client
        .open_scanner(TABLE, "key", "bro", Direction::Reverse)?;
    let keys = collect_keys(&scanner).await?;
    assert_eq!(keys, vec!["ka", "c", "bro1"]);
    assert_eq!(scanner.state(), ScanState::Exhausted);

    // The first region came from a "previous region" lookup on the start key
    let meta_log = env.cluster.meta_log();
    assert_eq!(
        meta_log,
        vec![key_encoding::previous_region_search_key(b"table", b"key")]
    );
    assert_eq!(env.cluster.scans_against("b:16020"), 0);

    let cached = env.client.region_cache().lookup(b"table", b"bro").unwrap();
    assert_eq!(*cached.region, region("", "key", 1234567890));
    assert_eq!(cached.server.as_str(), "a:16020");
    Ok(())
}

#[tokio::test]
async fn test_reverse_scan_crosses_every_region() -> anyhow::Result<()> {
    let env = TestEnv::three_regions(3);
    let all = ["a", "b", "f", "g", "h", "o", "p", "q", "z"];
    env.cluster.put_keys(TABLE, &all);

    let scanner = env.client.new_scanner(TABLE).reversed().open()?;
    let keys = collect_keys(&scanner).await?;
    let expected: Vec<String> = all.iter().rev().map(|k| k.to_string()).collect();
    assert_eq!(keys, expected);

    assert_eq!(
        env.cluster.meta_log(),
        vec![
            key_encoding::last_region_search_key(b"table"),
            key_encoding::previous_region_search_key(b"table", b"p"),
            key_encoding::previous_region_search_key(b"table", b"g"),
        ]
    );
    assert_eq!(env.client.region_cache().regions_of(b"table").len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_forward_and_reverse_mirror_each_other() -> anyhow::Result<()> {
    let env = TestEnv::three_regions(2);
    env.cluster.put_keys(
        TABLE,
        &["a", "c", "d", "g", "ga", "k", "p", "pa", "q", "r"],
    );

    let forward = env.client.open_scanner(TABLE, "c", "q", Direction::Forward)?;
    let forward_keys = collect_keys(&forward).await?;
    assert_eq!(forward_keys, vec!["c", "d", "g", "ga", "k", "p", "pa"]);

    let reverse = env.client.open_scanner(TABLE, "q", "c", Direction::Reverse)?;
    let reverse_keys = collect_keys(&reverse).await?;

    // Forward includes its start key, reverse excludes the same key as its
    // lower bound; both exclude "q"
    let mut mirrored = reverse_keys.clone();
    mirrored.reverse();
    assert_eq!(mirrored, forward_keys[1..].to_vec());
    assert!(!reverse_keys.contains(&"c".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_reverse_scan_stops_at_lower_bound_region() -> anyhow::Result<()> {
    let env = TestEnv::three_regions(10);
    env.cluster.put_keys(TABLE, &["a", "f", "h", "x"]);

    let scanner = env.client.open_scanner(TABLE, "", "h", Direction::Reverse)?;
    assert_eq!(collect_keys(&scanner).await?, vec!["x"]);
    // ["g", "p") holds the stop key, so ["", "g") is never visited
    assert_eq!(env.cluster.scans_against("a:16020"), 0);
    Ok(())
}

#[tokio::test]
async fn test_reverse_crossing_into_gap_is_retried_then_broken() -> anyhow::Result<()> {
    let env = TestEnv::new(10);
    // META mid-split: nothing covers the keys below "h"
    env.cluster.add_region(&region("", "g", 1), "a:16020");
    env.cluster.add_region(&region("h", "", 1), "b:16020");
    env.cluster.put_keys(TABLE, &["a", "i"]);

    let scanner = env.client.new_scanner(TABLE).reversed().open()?;
    let first = scanner.next_batch().await?.unwrap();
    assert_eq!(first.len(), 1);

    let err = scanner.next_batch().await.unwrap_err();
    assert!(matches!(err, ScanError::BrokenMeta { attempts: 3, .. }), "{err}");
    assert_eq!(scanner.state(), ScanState::Failed);
    assert_eq!(env.scheduler.delays().len(), 2);
    assert!(env.client.region_cache().lookup(b"table", b"a").is_none());
    assert_eq!(env.client.pending_retries(), 0);
    Ok(())
}
