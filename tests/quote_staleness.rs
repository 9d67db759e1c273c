mod support;

use std::time::Duration;

use chrono::TimeZone;
use chrono::Utc;
use invtrack::error::Warning;
use support::{d, harness, start_time, write_csv};

#[tokio::test]
async fn failed_fetches_back_off_and_serve_the_stale_quote() {
    let h = harness("Main");
    write_csv(
        h.dir.path(),
        "b.csv",
        "symbol,quantity,avg_buy_price\nAAPL,10,150\n",
    );
    h.source.set_quote("AAPL", d("155"), "USD", start_time());

    let snapshot = h.service.refresh("Main").await.unwrap();
    assert!(snapshot.broker.connected);
    assert_eq!(
        h.service.next_delay("Main").await.unwrap(),
        Duration::from_secs(900)
    );

    h.source.set_failing("AAPL", true);
    let mut delays = Vec::new();
    for _ in 0..6 {
        let snapshot = h.service.refresh("Main").await.unwrap();
        assert!(!snapshot.broker.connected);
        // The last known price keeps being served while the provider is down.
        let asset = snapshot.asset("b", "AAPL").unwrap();
        assert_eq!(asset.current_price, Some(d("155")));
        assert!(snapshot
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::FetchFailure { .. })));
        delays.push(h.service.next_delay("Main").await.unwrap().as_secs());
    }
    assert_eq!(delays, vec![60, 120, 240, 480, 900, 900]);
}

#[tokio::test]
async fn recovery_resets_backoff_and_refreshes_the_price() {
    let h = harness("Main");
    write_csv(
        h.dir.path(),
        "b.csv",
        "symbol,quantity,avg_buy_price\nAAPL,10,150\n",
    );
    h.source.set_quote("AAPL", d("155"), "USD", start_time());
    h.service.refresh("Main").await.unwrap();

    h.source.set_failing("AAPL", true);
    for _ in 0..3 {
        h.service.refresh("Main").await.unwrap();
    }

    h.clock.advance(chrono::Duration::hours(1));
    h.source.set_failing("AAPL", false);
    h.source.set_quote(
        "AAPL",
        d("158"),
        "USD",
        Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap(),
    );

    let snapshot = h.service.refresh("Main").await.unwrap();
    assert!(snapshot.broker.connected);
    assert_eq!(
        snapshot.asset("b", "AAPL").unwrap().current_price,
        Some(d("158"))
    );
    assert_eq!(
        h.service.next_delay("Main").await.unwrap(),
        Duration::from_secs(900)
    );
}

#[tokio::test]
async fn an_out_of_order_quote_never_clobbers_a_fresher_one() {
    let h = harness("Main");
    write_csv(
        h.dir.path(),
        "b.csv",
        "symbol,quantity,avg_buy_price\nAAPL,10,150\n",
    );
    h.source.set_quote(
        "AAPL",
        d("158"),
        "USD",
        Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap(),
    );
    h.service.refresh("Main").await.unwrap();

    // A lagging response carrying an earlier timestamp is discarded.
    h.source.set_quote("AAPL", d("150"), "USD", start_time());
    let snapshot = h.service.refresh("Main").await.unwrap();
    assert_eq!(
        snapshot.asset("b", "AAPL").unwrap().current_price,
        Some(d("158"))
    );
}
