mod common;

use common::{block_sync, count, recorder, reports, run_loop};
use loopwatch::{Options, Ticker};
use std::time::Duration;

#[test]
fn test_short_blocks_are_never_reported() {
    let reports = reports();
    loopwatch::install(
        Options::new()
            .interval_ms(10u64)
            .threshold_ms(250u64)
            .on_blocked(recorder(&reports)),
    )
    .expect("install");

    let mut ticker = Ticker::new(Duration::from_millis(10));
    for _ in 0..5 {
        ticker.poll();
        block_sync(Duration::from_millis(50));
    }
    run_loop(&mut ticker, &reports, 1, Duration::from_millis(500));

    assert_eq!(count(&reports), 0);
}
