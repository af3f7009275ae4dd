//! Full pipeline: source adapter, both cache tiers, real-time ingestion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use gridfeed_cache::{open_hot_cache, CacheOrchestrator, FetchStrategy, RangeQuery, SqliteStore};
use gridfeed_core::{
    logging, CacheDataType, CacheKey, CacheRange, Candle, Config, ContractBasis, DerivativeKey,
    FundingRate, ManualClock, MarketMode,
};
use gridfeed_ingestion::{CandleBuffer, IngestionManager, StreamOptions};
use gridfeed_sources::{SourceCapability, SourceRegistry, StaticSource};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

struct Pipeline {
    source: Arc<StaticSource>,
    buffer: Arc<CandleBuffer>,
    orchestrator: Arc<CacheOrchestrator>,
    manager: IngestionManager,
}

fn make_pipeline(config: &Config) -> Pipeline {
    logging::init_for_tests();
    let clock = Arc::new(ManualClock::default());
    let buffer = Arc::new(CandleBuffer::default());
    let capability = SourceCapability {
        max_candles_per_fetch: 300,
        ..SourceCapability::with_granularities(["1s", "1m", "5m", "15m", "1h", "4h", "1d"])
    };
    let source = Arc::new(
        StaticSource::new("okx")
            .with_capability(capability)
            .with_live_buffer(buffer.clone()),
    );
    let registry = Arc::new(SourceRegistry::new());
    registry.register(source.clone());

    let orchestrator = Arc::new(
        CacheOrchestrator::new(
            registry,
            open_hot_cache(&config.cache, clock.clone()).unwrap(),
            Arc::new(SqliteStore::from_config(&config.store).unwrap()),
            config,
        )
        .with_clock(clock.clone()),
    );
    let manager = IngestionManager::new(orchestrator.clone(), config.ingestion.clone())
        .with_clock(clock);
    Pipeline {
        source,
        buffer,
        orchestrator,
        manager,
    }
}

fn make_candle(time: i64, close: Decimal) -> Candle {
    Candle::new(time, close, close + dec!(5), close - dec!(5), close, dec!(0.25))
}

fn times(candles: &[Candle]) -> Vec<i64> {
    candles.iter().map(|c| c.time).collect()
}

#[test]
fn test_on_demand_fetch_then_cache_serves() {
    let p = make_pipeline(&Config::default());
    let key = CacheKey::new("okx", "BTCUSDT", MarketMode::Spot, "1m");
    let t0 = 1_700_000_040;
    p.source.insert_candles(
        "BTCUSDT",
        "1m",
        &[
            make_candle(t0, dec!(42000)),
            make_candle(t0 + 60, dec!(42010)),
            make_candle(t0 + 120, dec!(42020)),
        ],
    );

    let first = p
        .orchestrator
        .get(&key, &RangeQuery::latest(3), FetchStrategy::CacheFirst)
        .unwrap();
    assert_eq!(times(&first), vec![t0, t0 + 60, t0 + 120]);
    assert_eq!(
        p.orchestrator.get_cache_range(&key).unwrap(),
        CacheRange {
            oldest: Some(t0),
            newest: Some(t0 + 120),
            count: 3
        }
    );

    // served from cache, even once the source is gone
    p.source.set_failing(true);
    let second = p
        .orchestrator
        .get(&key, &RangeQuery::latest(3), FetchStrategy::CacheFirst)
        .unwrap();
    assert_eq!(second, first);
    assert_eq!(p.source.candle_calls(), 1);
}

#[test]
fn test_aggregated_granularity_is_cached_under_requested_key() {
    let p = make_pipeline(&Config::default());
    let key = CacheKey::new("okx", "BTCUSDT", MarketMode::Spot, "10m");
    let start = 1_700_000_400;
    let fine: Vec<Candle> = (0..6)
        .map(|i| make_candle(start + i * 300, Decimal::from(100 + i)))
        .collect();
    p.source.insert_candles("BTCUSDT", "5m", &fine);

    let candles = p.orchestrator.get_with_auto_fetch(&key, &RangeQuery::latest(3)).unwrap();

    assert_eq!(candles.len(), 3);
    assert!(candles.iter().all(|c| c.time % 600 == 0));
    assert_eq!(candles[0].volume, dec!(0.5));
    assert_eq!(p.orchestrator.get_cache_range(&key).unwrap().count, 3);
}

#[test]
fn test_ingested_trades_reach_the_cache() {
    let p = make_pipeline(&Config::default());
    let stream = p
        .manager
        .start_stream(
            "okx",
            "BTC-USDT",
            MarketMode::Spot,
            "1m",
            StreamOptions::default().with_autostart(false),
        )
        .unwrap();

    p.buffer.push_trade("BTCUSDT", "1m", 60_000, dec!(10), dec!(1)).unwrap();
    p.buffer.push_trade("BTCUSDT", "1m", 60_030, dec!(12), dec!(1)).unwrap();
    assert_eq!(p.manager.run_once(&stream).unwrap(), 1);

    // the open period moves, and a new one opens
    p.buffer.push_trade("BTCUSDT", "1m", 60_050, dec!(11), dec!(2)).unwrap();
    p.buffer.push_trade("BTCUSDT", "1m", 60_070, dec!(13), dec!(1)).unwrap();
    assert_eq!(p.manager.run_once(&stream).unwrap(), 2);
    assert_eq!(p.manager.run_once(&stream).unwrap(), 0);

    let key = CacheKey::new("okx", "BTCUSDT", MarketMode::Spot, "1m");
    let cached = p.orchestrator.get_from_cache(&key, &RangeQuery::latest(10)).unwrap();
    assert_eq!(times(&cached), vec![60_000, 60_060]);
    assert_eq!(cached[0].open, dec!(10));
    assert_eq!(cached[0].high, dec!(12));
    assert_eq!(cached[0].close, dec!(11));
    assert_eq!(cached[0].volume, dec!(4));

    let status = &p.manager.list_streams()[0];
    assert_eq!(status.total_persisted, 3);
    assert_eq!(status.consecutive_failures, 0);
}

#[test]
fn test_configured_streams_run_in_background() {
    let config = Config::from_json_str(
        r#"{
            "ingestion": {
                "poll_interval_ms": 20,
                "streams": [{"source": "okx", "symbol": "BTCUSDT", "bar": "1s"}]
            }
        }"#,
    )
    .unwrap();
    let p = make_pipeline(&config);
    p.buffer.push_all(
        "BTCUSDT",
        "1s",
        (1..=5).map(|i| make_candle(1_700_000_000 + i, dec!(1))),
    );

    let started = p.manager.start_configured(&config.ingestion.streams);
    assert_eq!(started, vec!["okx::BTCUSDT::spot::1s"]);

    let key = CacheKey::new("okx", "BTCUSDT", MarketMode::Spot, "1s");
    let deadline = Instant::now() + Duration::from_secs(5);
    while p.orchestrator.get_cache_range(&key).unwrap().count < 5 {
        assert!(Instant::now() < deadline, "background worker never caught up");
        std::thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(p.manager.shutdown(true), 1);
    assert!(p.manager.list_streams().is_empty());
}

#[test]
fn test_derivative_data_uses_configured_limits() {
    let config = Config::from_json_str(
        r#"{"cache": {"funding_history": {"ttl_secs": 600, "max_entries": 3}}}"#,
    )
    .unwrap();
    let p = make_pipeline(&config);
    let key = DerivativeKey::new("okx", "btcusdt");
    let history: Vec<FundingRate> = (1..=5)
        .map(|i| FundingRate::new(i * 28_800, Decimal::new(i, 4)))
        .collect();

    let derivatives = p.orchestrator.derivatives();
    assert!(derivatives.save_funding_history(&key, &history));
    assert!(derivatives.save_basis(&key, &ContractBasis::new(60, dec!(42010), dec!(42000))));

    let cached = derivatives.funding_history(&key).unwrap();
    assert_eq!(cached.iter().map(|r| r.time).collect::<Vec<_>>(), vec![86_400, 115_200, 144_000]);
    assert_eq!(derivatives.basis(&key).unwrap().basis, dec!(10));

    let stats = p.orchestrator.hot_stats();
    assert_eq!(stats.get(CacheDataType::FundingHistory), 1);
    assert_eq!(p.orchestrator.clear_derivatives(), 2);
    assert!(derivatives.funding_history(&key).is_none());
}
