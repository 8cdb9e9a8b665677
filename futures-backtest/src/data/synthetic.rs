use chrono::Duration;
use common::{BacktestParameters, Tick, TradeSide};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Average spacing between synthetic prints, in milliseconds
const MEAN_TICK_INTERVAL_MS: i64 = 2_000;
/// Minimum price increment (index-futures quarter point)
const TICK_SIZE: f64 = 0.25;

/// Seeded random-walk ticks covering every session of `params`.
///
/// The same seed always yields the same stream, so demo runs are reproducible.
pub fn generate_synthetic_ticks(params: &BacktestParameters, initial_price: f64, seed: u64) -> Vec<Tick> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ticks = Vec::new();
    let mut price = round_to_tick(initial_price);
    // Slowly drifting order-flow bias so CVD trends form
    let mut bias: f64 = 0.0;

    for date in params.trading_days() {
        let (open, close) = params.session_bounds(date);
        let mut ts = open;

        while ts <= close {
            bias = (bias + rng.gen_range(-0.05..0.05)).clamp(-0.4, 0.4);
            let buy = rng.gen_bool(0.5 + bias);
            let side = if buy { TradeSide::Buy } else { TradeSide::Sell };

            let step = if rng.gen_bool(0.35) {
                if buy { TICK_SIZE } else { -TICK_SIZE }
            } else {
                0.0
            };
            price = (price + step).max(TICK_SIZE);

            let volume = rng.gen_range(1..=10);
            ticks.push(Tick::new(ts, price, volume, side));

            ts += Duration::milliseconds(rng.gen_range(1..=2 * MEAN_TICK_INTERVAL_MS));
        }
    }

    ticks
}

fn round_to_tick(price: f64) -> f64 {
    (price / TICK_SIZE).round() * TICK_SIZE
}
